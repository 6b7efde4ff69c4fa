//! Per-entry transactional locks.
//!
//! A [`TxnLock`] grants READ access to any number of transactions and WRITE
//! or DELETE access to at most one. Contention is not an error: a baulked
//! acquire optionally registers a [`BaulkedParty`] that receives exactly one
//! `unblocked` call once a conflicting holder releases.
//!
//! Waiter callbacks are always invoked after the lock's monitor has been
//! dropped.

mod lock_manager;
mod txn_lock;
pub use lock_manager::*;
pub use txn_lock::*;


use serde::Deserialize;
use serde::Serialize;

use crate::EntryHandle;
use crate::Oid;

/// Access requested on an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Shared access; any number of transactions
    Read,
    /// Held by the transaction that wrote a not yet committed entry
    Write,
    /// Held by the transaction that took the entry
    Delete,
}

impl LockMode {
    pub fn is_exclusive(&self) -> bool {
        !matches!(self, LockMode::Read)
    }
}

/// Result of an acquire attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Access granted. `prior` is the strongest mode the same transaction
    /// already held, so that a caller can roll back exactly its own change.
    Granted { prior: Option<LockMode> },
    /// A conflicting holder exists
    Baulked,
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockOutcome::Granted { .. })
    }
}

/// Context handed back to a [`BaulkedParty`] once its conflict resolves
#[derive(Debug, Clone)]
pub struct Handback {
    pub oid: Oid,
    /// The candidate that was in conflict
    pub entry: EntryHandle,
}

/// Conflict waiter registered with a [`TxnLock`].
///
/// The lock owns the registration and only keeps a weak reference to the
/// party, so a completed or dropped waiter is simply skipped.
pub trait BaulkedParty: Send + Sync {
    /// Invoked once the conflict has been registered
    fn blocked(
        &self,
        handback: &Handback,
    );

    /// Invoked exactly once per registration, after the conflicting holder
    /// released
    fn unblocked(
        &self,
        handback: Handback,
    );
}
