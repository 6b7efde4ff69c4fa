use std::path::Path;

use sled::IVec;
use tracing::instrument;
use tracing::trace;

use super::init_sled_registration_db;
use super::RegistrationStore;
use crate::constants::REGISTRATION_TREE;
use crate::Error;
use crate::RegistrationMemento;
use crate::Result;
use crate::StorageError;

/// Registrations persisted in a sled tree, keyed by big-endian id and
/// encoded with bincode.
pub struct SledRegistrationStore {
    #[allow(dead_code)]
    db: sled::Db,

    pub(crate) tree: sled::Tree,
}

impl std::fmt::Debug for SledRegistrationStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledRegistrationStore").field("len", &self.tree.len()).finish()
    }
}

impl SledRegistrationStore {
    pub fn new(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree(REGISTRATION_TREE)?;
        Ok(Self { db, tree })
    }

    pub fn open(root: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        let db = init_sled_registration_db(root).map_err(StorageError::IoError)?;
        Self::new(db)
    }

    fn id_to_key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn decode(
        key: &[u8],
        bytes: &[u8],
    ) -> Result<RegistrationMemento> {
        bincode::deserialize(bytes).map_err(|e| {
            StorageError::DataCorruption {
                location: format!("{REGISTRATION_TREE}/{key:02x?}: {e}"),
            }
            .into()
        })
    }

    /// Atomically rewrites the record of `id` through `f`, which sees the
    /// stored memento if there is one. Returning `None` for a missing record
    /// leaves it missing.
    fn update(
        &self,
        id: u64,
        mut f: impl FnMut(Option<RegistrationMemento>) -> Option<RegistrationMemento>,
    ) -> Result<()> {
        let key = Self::id_to_key(id);
        let mut failure: Option<Error> = None;
        self.tree.update_and_fetch(key, |old| {
            failure = None;
            let stored = match old.map(|bytes| Self::decode(&key, bytes)).transpose() {
                Ok(stored) => stored,
                Err(e) => {
                    failure = Some(e);
                    return old.map(IVec::from);
                }
            };
            let had_record = stored.is_some();
            match f(stored).map(|m| bincode::serialize(&m)) {
                Some(Ok(bytes)) => Some(IVec::from(bytes)),
                Some(Err(e)) => {
                    failure = Some(e.into());
                    old.map(IVec::from)
                }
                None if had_record => old.map(IVec::from),
                None => None,
            }
        })?;
        failure.map_or(Ok(()), Err)
    }
}

impl RegistrationStore for SledRegistrationStore {
    /// Never moves a checkpointed sequence number backwards
    #[instrument(skip(self, memento), fields(id = memento.id))]
    fn save(
        &self,
        memento: &RegistrationMemento,
    ) -> Result<()> {
        self.update(memento.id, |stored| {
            let mut next = memento.clone();
            if let Some(stored) = stored {
                next.seq = next.seq.max(stored.seq);
            }
            Some(next)
        })
    }

    fn save_sequence(
        &self,
        id: u64,
        seq: u64,
    ) -> Result<()> {
        let mut known = false;
        self.update(id, |stored| {
            known = stored.is_some();
            stored.map(|mut memento| {
                memento.seq = memento.seq.max(seq);
                memento
            })
        })?;
        if known {
            trace!(id, seq, "registration sequence checkpointed");
        } else {
            trace!(id, "sequence checkpoint for unknown registration ignored");
        }
        Ok(())
    }

    fn remove(
        &self,
        id: u64,
    ) -> Result<()> {
        self.tree.remove(Self::id_to_key(id))?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<RegistrationMemento>> {
        let mut mementos = Vec::new();
        for item in self.tree.iter() {
            let (key, value) = item?;
            mementos.push(Self::decode(&key, &value)?);
        }
        Ok(mementos)
    }

    #[instrument(skip(self))]
    fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}
