use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use super::BaulkedParty;
use super::Handback;
use super::LockMode;
use super::LockOutcome;
use super::TxnLock;
use crate::metrics::LOCK_CONFLICTS;
use crate::Oid;
use crate::TxnId;

/// Owns every [`TxnLock`], keyed by entry id.
///
/// Locks are created lazily on first use and reclaimed once their entry is
/// gone and nobody holds or waits on them.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<Oid, Arc<TxnLock>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing lock for `oid`, if any
    pub fn get_lock(
        &self,
        oid: Oid,
    ) -> Option<Arc<TxnLock>> {
        self.locks.get(&oid).map(|l| l.value().clone())
    }

    /// Lock for `oid`, created on first use
    pub fn new_lock(
        &self,
        oid: Oid,
    ) -> Arc<TxnLock> {
        // The shard guard must be gone before any lock method runs: waiter
        // callbacks may come back into this map.
        self.locks
            .entry(oid)
            .or_insert_with(|| Arc::new(TxnLock::new(oid)))
            .value()
            .clone()
    }

    /// See [`TxnLock::acquire`]
    pub fn acquire(
        &self,
        txn: TxnId,
        oid: Oid,
        mode: LockMode,
        party: Option<(&Arc<dyn BaulkedParty>, Handback)>,
        restore: bool,
    ) -> LockOutcome {
        let outcome = self.new_lock(oid).acquire(txn, mode, party, restore);
        if outcome == LockOutcome::Baulked {
            LOCK_CONFLICTS.inc();
        }
        outcome
    }

    /// Rebuilds a hold during recovery replay. Nothing is registered on
    /// conflict.
    pub fn restore(
        &self,
        txn: TxnId,
        oid: Oid,
        mode: LockMode,
    ) -> LockOutcome {
        self.new_lock(oid).acquire(txn, mode, None, true)
    }

    /// See [`TxnLock::release`]
    pub fn release(
        &self,
        txn: TxnId,
        oid: Oid,
        mode: LockMode,
    ) {
        match self.get_lock(oid) {
            Some(lock) => lock.release(txn, mode),
            None => trace!(?oid, ?txn, "release on unknown lock ignored"),
        }
    }

    /// See [`TxnLock::revert`]
    pub fn revert(
        &self,
        txn: TxnId,
        oid: Oid,
        prior: Option<LockMode>,
    ) {
        if let Some(lock) = self.get_lock(oid) {
            lock.revert(txn, prior);
        }
    }

    /// Probe without registration. An entry nobody ever locked is available.
    pub fn is_available(
        &self,
        txn: Option<TxnId>,
        oid: Oid,
        mode: LockMode,
    ) -> bool {
        self.get_lock(oid)
            .map(|lock| lock.is_available(txn, mode))
            .unwrap_or(true)
    }

    /// Drops the lock of a removed entry if it is idle
    pub fn reclaim(
        &self,
        oid: Oid,
    ) -> bool {
        self.locks.remove_if(&oid, |_, lock| lock.is_idle()).is_some()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
