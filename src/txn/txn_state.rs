use parking_lot::Mutex;

use super::TxnId;
use super::TxnStatus;
use crate::EntryHandle;
use crate::LockMode;
use crate::TransactionError;

/// One operation a transaction performed on one entry
#[derive(Debug, Clone)]
pub struct EntryTxnOp {
    pub entry: EntryHandle,
    pub mode: LockMode,
    /// The entry was written by this transaction, whatever happened to it
    /// afterwards
    pub written: bool,
}

impl EntryTxnOp {
    pub fn new(
        entry: EntryHandle,
        mode: LockMode,
    ) -> Self {
        Self {
            entry,
            written: mode == LockMode::Write,
            mode,
        }
    }
}

#[derive(Debug)]
struct Inner {
    status: TxnStatus,
    ops: Vec<EntryTxnOp>,
}

/// Status and undo/redo record of one transaction.
///
/// Status transitions and op registration share one monitor, so an op can
/// never slip in once commit or abort has started.
#[derive(Debug)]
pub struct TxnState {
    id: TxnId,
    inner: Mutex<Inner>,
}

impl TxnState {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            inner: Mutex::new(Inner {
                status: TxnStatus::Active,
                ops: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn status(&self) -> TxnStatus {
        self.inner.lock().status
    }

    /// Records `op`. A second op on the same entry replaces the first when it
    /// is stronger (a take after a read keeps only the take).
    pub fn add(
        &self,
        op: EntryTxnOp,
    ) -> Result<(), TransactionError> {
        let mut inner = self.inner.lock();
        if !inner.status.accepts_ops() {
            return Err(TransactionError::NotActive {
                txn: self.id,
                status: inner.status,
            });
        }

        let oid = op.entry.oid();
        match inner.ops.iter_mut().find(|o| o.entry.oid() == oid) {
            Some(existing) => {
                existing.written |= op.written;
                if rank(op.mode) > rank(existing.mode) {
                    existing.mode = op.mode;
                }
            }
            None => inner.ops.push(op),
        }
        Ok(())
    }

    /// Mode recorded for `oid`, if any
    pub fn mode_of(
        &self,
        oid: crate::Oid,
    ) -> Option<LockMode> {
        self.inner.lock().ops.iter().find(|o| o.entry.oid() == oid).map(|o| o.mode)
    }

    pub fn ops(&self) -> Vec<EntryTxnOp> {
        self.inner.lock().ops.clone()
    }

    /// Moves from one of `from` to `to`, returning the ops recorded so far
    pub(crate) fn transition(
        &self,
        from: &[TxnStatus],
        to: TxnStatus,
    ) -> Result<(TxnStatus, Vec<EntryTxnOp>), TransactionError> {
        let mut inner = self.inner.lock();
        if !from.contains(&inner.status) {
            return Err(TransactionError::NotActive {
                txn: self.id,
                status: inner.status,
            });
        }
        let prior = std::mem::replace(&mut inner.status, to);
        Ok((prior, inner.ops.clone()))
    }

    pub(crate) fn set_status(
        &self,
        status: TxnStatus,
    ) {
        self.inner.lock().status = status;
    }
}

fn rank(mode: LockMode) -> u8 {
    match mode {
        LockMode::Read => 0,
        LockMode::Write => 1,
        LockMode::Delete => 2,
    }
}
