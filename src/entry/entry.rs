use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

/// Opaque unique identifier of a stored entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Oid(pub u64);

impl fmt::Display for Oid {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "oid-{}", self.0)
    }
}

/// Encoded field value. `None` is a null field.
pub type FieldValue = Option<Vec<u8>>;

/// A typed, field-tagged record stored in the space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub type_name: String,
    pub fields: Vec<FieldValue>,
}

impl Entry {
    pub fn new(
        type_name: impl Into<String>,
        fields: Vec<FieldValue>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    /// Convenience constructor for entries whose fields are all present
    pub fn with_values<V: AsRef<[u8]>>(
        type_name: impl Into<String>,
        values: &[V],
    ) -> Self {
        Self::new(
            type_name,
            values.iter().map(|v| Some(v.as_ref().to_vec())).collect(),
        )
    }
}

/// A possibly partial entry used to match stored entries.
///
/// `type_name == None` matches every type. A `None` field is a wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Template {
    pub type_name: Option<String>,
    pub fields: Vec<FieldValue>,
}

impl Template {
    pub fn new(
        type_name: impl Into<String>,
        fields: Vec<FieldValue>,
    ) -> Self {
        Self {
            type_name: Some(type_name.into()),
            fields,
        }
    }

    /// Matches every entry of `type_name` (and its subtypes)
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self::new(type_name, Vec::new())
    }

    /// Matches every entry in the space
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_values<V: AsRef<[u8]>>(
        type_name: impl Into<String>,
        values: &[Option<V>],
    ) -> Self {
        Self::new(
            type_name,
            values
                .iter()
                .map(|v| v.as_ref().map(|v| v.as_ref().to_vec()))
                .collect(),
        )
    }
}

impl From<&Entry> for Template {
    fn from(entry: &Entry) -> Self {
        Self {
            type_name: Some(entry.type_name.clone()),
            fields: entry.fields.clone(),
        }
    }
}

/// An entry as held by the repository, identified by its [`Oid`].
///
/// The `removed` flag flips once when the entry is taken (commit) or its
/// uncommitted write is rolled back; holders of a stale handle use it to
/// skip dead candidates cheaply.
#[derive(Debug)]
pub struct StoredEntry {
    oid: Oid,
    entry: Entry,
    removed: AtomicBool,
}

pub type EntryHandle = Arc<StoredEntry>;

impl StoredEntry {
    pub fn new(
        oid: Oid,
        entry: Entry,
    ) -> EntryHandle {
        Arc::new(Self {
            oid,
            entry,
            removed: AtomicBool::new(false),
        })
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn type_name(&self) -> &str {
        &self.entry.type_name
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Returns true only for the call that performed the transition
    pub(crate) fn mark_removed(&self) -> bool {
        !self.removed.swap(true, Ordering::AcqRel)
    }
}
