use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::EntryRepository;
use super::ScanControl;
use super::ScanVisitor;
use crate::EntryHandle;
use crate::Matcher;
use crate::Oid;
use crate::Result;
use crate::Template;

/// In-memory repository indexed by type.
///
/// Scans work on a snapshot of the candidate handles so no repository lock
/// is held while visitors run.
pub struct MemRepository {
    matcher: Arc<dyn Matcher>,
    by_type: RwLock<HashMap<String, BTreeMap<Oid, EntryHandle>>>,
    by_oid: RwLock<HashMap<Oid, EntryHandle>>,
}

impl std::fmt::Debug for MemRepository {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemRepository").field("len", &self.len()).finish()
    }
}

impl MemRepository {
    pub fn new(matcher: Arc<dyn Matcher>) -> Self {
        Self {
            matcher,
            by_type: RwLock::new(HashMap::new()),
            by_oid: RwLock::new(HashMap::new()),
        }
    }

    fn candidates(
        &self,
        template: &Template,
    ) -> Vec<EntryHandle> {
        let by_type = self.by_type.read();
        let mut candidates: Vec<EntryHandle> = by_type
            .iter()
            .filter(|(type_name, _)| match &template.type_name {
                None => true,
                Some(t) => self.matcher.is_subtype(t, type_name),
            })
            .flat_map(|(_, entries)| entries.values().cloned())
            .collect();
        candidates.sort_by_key(|e| e.oid());
        candidates
    }
}

impl EntryRepository for MemRepository {
    fn insert(
        &self,
        entry: EntryHandle,
    ) -> Result<()> {
        trace!(oid = ?entry.oid(), type_name = entry.type_name(), "repository insert");
        self.by_type
            .write()
            .entry(entry.type_name().to_string())
            .or_default()
            .insert(entry.oid(), entry.clone());
        self.by_oid.write().insert(entry.oid(), entry);
        Ok(())
    }

    fn remove(
        &self,
        oid: Oid,
    ) -> Result<Option<EntryHandle>> {
        let removed = self.by_oid.write().remove(&oid);
        if let Some(entry) = &removed {
            let mut by_type = self.by_type.write();
            if let Some(entries) = by_type.get_mut(entry.type_name()) {
                entries.remove(&oid);
                if entries.is_empty() {
                    by_type.remove(entry.type_name());
                }
            }
        }
        Ok(removed)
    }

    fn get(
        &self,
        oid: Oid,
    ) -> Result<Option<EntryHandle>> {
        Ok(self.by_oid.read().get(&oid).cloned())
    }

    fn find(
        &self,
        template: &Template,
        visitor: &mut dyn ScanVisitor,
    ) -> Result<()> {
        for candidate in self.candidates(template) {
            if candidate.is_removed() {
                continue;
            }
            if visitor.offer(&candidate) == ScanControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.by_oid.read().len()
    }
}
