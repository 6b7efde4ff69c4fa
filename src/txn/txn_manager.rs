use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use super::EntryTxnOp;
use super::TxnId;
use super::TxnState;
use super::TxnStatus;
use crate::EntryHandle;
use crate::EntryLog;
use crate::EntryRepository;
use crate::EventQueue;
use crate::LockManager;
use crate::LockMode;
use crate::LockOutcome;
use crate::LogRecord;
use crate::LoggedOp;
use crate::QueueEvent;
use crate::Result;
use crate::StoredEntry;
use crate::TransactionError;

/// Creates, resolves and ends transactions.
///
/// On commit, every written entry's `EntryWritten` event is dispatched
/// synchronously before its lock is released, so blocked readers are offered
/// the entry before a racing take can claim it.
pub struct TxnManager {
    next_id: AtomicU64,
    txns: DashMap<TxnId, Arc<TxnState>>,
    locks: Arc<LockManager>,
    events: Arc<EventQueue>,
    repository: Arc<dyn EntryRepository>,
    log: Arc<dyn EntryLog>,
}

impl std::fmt::Debug for TxnManager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TxnManager").field("active", &self.txns.len()).finish_non_exhaustive()
    }
}

impl TxnManager {
    pub fn new(
        locks: Arc<LockManager>,
        events: Arc<EventQueue>,
        repository: Arc<dyn EntryRepository>,
        log: Arc<dyn EntryLog>,
    ) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            txns: DashMap::new(),
            locks,
            events,
            repository,
            log,
        }
    }

    pub fn begin(&self) -> Arc<TxnState> {
        let id = TxnId(self.next_id.fetch_add(1, Ordering::AcqRel));
        let state = Arc::new(TxnState::new(id));
        self.txns.insert(id, state.clone());
        debug!(txn = ?id, "transaction started");
        state
    }

    /// Resolves a handle to its live transaction
    pub fn resolve(
        &self,
        txn: TxnId,
    ) -> std::result::Result<Arc<TxnState>, TransactionError> {
        self.txns
            .get(&txn)
            .map(|s| s.value().clone())
            .ok_or(TransactionError::Unknown(txn))
    }

    /// Resolves a handle that must still accept operations
    pub fn resolve_active(
        &self,
        txn: TxnId,
    ) -> std::result::Result<Arc<TxnState>, TransactionError> {
        let state = self.resolve(txn)?;
        let status = state.status();
        if !status.accepts_ops() {
            return Err(TransactionError::NotActive { txn, status });
        }
        Ok(state)
    }

    pub fn active_count(&self) -> usize {
        self.txns.len()
    }

    /// First phase of two-phase commit: logs the ops and stops the
    /// transaction from accepting new ones
    #[instrument(skip(self))]
    pub fn prepare(
        &self,
        txn: TxnId,
    ) -> Result<()> {
        let state = self.resolve(txn)?;
        let (prior, ops) = state.transition(&[TxnStatus::Active], TxnStatus::Prepared)?;
        if let Err(e) = self.log.log(&LogRecord::Prepare {
            txn,
            ops: ops.iter().map(LoggedOp::from).collect(),
        }) {
            state.set_status(prior);
            return Err(e);
        }
        debug!(?txn, ops = ops.len(), "transaction prepared");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn commit(
        &self,
        txn: TxnId,
    ) -> Result<()> {
        let state = self.resolve(txn)?;
        let (prior, ops) = state.transition(&[TxnStatus::Active, TxnStatus::Prepared], TxnStatus::Committing)?;
        // An unlogged commit never happened: the caller may retry or abort
        if let Err(e) = self.log.log(&LogRecord::Commit {
            txn,
            ops: ops.iter().map(LoggedOp::from).collect(),
        }) {
            state.set_status(prior);
            return Err(e);
        }

        // Taken entries leave storage first so nobody can be offered them
        for op in ops.iter().filter(|op| op.mode == LockMode::Delete) {
            self.remove_entry(&op.entry);
        }

        for op in ops.iter().filter(|op| op.mode == LockMode::Write) {
            self.post(QueueEvent::entry_written(txn, op.entry.clone()), true);
            self.locks.release(txn, op.entry.oid(), LockMode::Write);
        }

        let mut freed: Vec<EntryHandle> = Vec::new();
        for op in ops.iter().filter(|op| op.mode != LockMode::Write) {
            self.locks.release(txn, op.entry.oid(), op.mode);
            if op.mode == LockMode::Delete {
                self.locks.reclaim(op.entry.oid());
            } else if !op.entry.is_removed() {
                freed.push(op.entry.clone());
            }
        }
        for entry in freed {
            self.post(QueueEvent::entry_not_conflicted(txn, entry), false);
        }

        for op in ops.iter().filter(|op| op.mode == LockMode::Write) {
            self.post(QueueEvent::entry_visible(txn, op.entry.clone()), false);
        }

        self.end(&state, TxnStatus::Committed);
        debug!(?txn, ops = ops.len(), "transaction committed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn abort(
        &self,
        txn: TxnId,
    ) -> Result<()> {
        let state = self.resolve(txn)?;
        let (_, ops) = state.transition(&[TxnStatus::Active, TxnStatus::Prepared], TxnStatus::Aborting)?;
        // Abort always completes in memory; recovery treats an unlogged
        // prepared transaction as in doubt
        if let Err(e) = self.log.log(&LogRecord::Abort { txn }) {
            warn!(?txn, "failed to log abort: {:?}", e);
        }

        for op in ops.iter().filter(|op| op.written) {
            self.remove_entry(&op.entry);
        }

        let mut freed: Vec<(EntryHandle, bool)> = Vec::new();
        for op in &ops {
            self.locks.release(txn, op.entry.oid(), op.mode);
            if op.written {
                self.locks.reclaim(op.entry.oid());
            } else {
                freed.push((op.entry.clone(), op.mode == LockMode::Delete));
            }
        }

        // An entry whose take was rolled back is visible again
        for (entry, was_taken) in freed {
            if was_taken {
                self.post(QueueEvent::entry_visible(txn, entry.clone()), false);
            }
            self.post(QueueEvent::entry_not_conflicted(txn, entry), false);
        }

        self.end(&state, TxnStatus::Aborted);
        debug!(?txn, ops = ops.len(), "transaction aborted");
        Ok(())
    }

    /// Recovery replay of a prepared transaction: rebuilds its ops and lock
    /// holds exactly, without registering any waiter.
    #[instrument(skip(self, ops), fields(ops = ops.len()))]
    pub fn restore(
        &self,
        txn: TxnId,
        ops: Vec<LoggedOp>,
    ) -> Result<Arc<TxnState>> {
        if self.txns.contains_key(&txn) {
            return Err(TransactionError::Restore(format!("{txn} is already live")).into());
        }
        self.next_id.fetch_max(txn.0 + 1, Ordering::AcqRel);
        let state = Arc::new(TxnState::new(txn));

        for logged in ops {
            let entry = match self.repository.get(logged.oid)? {
                Some(entry) => entry,
                None if logged.written => {
                    let entry = StoredEntry::new(logged.oid, logged.entry);
                    self.repository.insert(entry.clone())?;
                    entry
                }
                None => {
                    return Err(TransactionError::Restore(format!("{} missing from storage", logged.oid)).into());
                }
            };

            if logged.written {
                self.locks.restore(txn, logged.oid, LockMode::Write);
            }
            if let LockOutcome::Baulked = self.locks.restore(txn, logged.oid, logged.mode) {
                return Err(TransactionError::Restore(format!("lock conflict on {}", logged.oid)).into());
            }

            let mut op = EntryTxnOp::new(entry, logged.mode);
            op.written = logged.written;
            state.add(op)?;
        }

        state.set_status(TxnStatus::Prepared);
        self.txns.insert(txn, state.clone());
        debug!(?txn, "prepared transaction restored");
        Ok(state)
    }

    fn remove_entry(
        &self,
        entry: &EntryHandle,
    ) {
        if entry.mark_removed() {
            if let Err(e) = self.repository.remove(entry.oid()) {
                warn!(oid = ?entry.oid(), "failed to remove entry from repository: {:?}", e);
            }
        }
    }

    fn end(
        &self,
        state: &Arc<TxnState>,
        status: TxnStatus,
    ) {
        state.set_status(status);
        self.txns.remove(&state.id());
        self.post(QueueEvent::transaction_ended(state.id()), false);
    }

    fn post(
        &self,
        event: QueueEvent,
        wait: bool,
    ) {
        let kind = event.kind();
        if let Err(e) = self.events.add(event, wait) {
            warn!(kind = kind.as_str(), "event not dispatched: {:?}", e);
        }
    }
}
