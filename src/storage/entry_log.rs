//! Durable log of transaction outcomes.

#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;

use crate::Entry;
use crate::EntryTxnOp;
use crate::LockMode;
use crate::Oid;
use crate::Result;
use crate::TxnId;

/// One operation as recorded in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedOp {
    pub oid: Oid,
    pub mode: LockMode,
    pub written: bool,
    pub entry: Entry,
}

impl From<&EntryTxnOp> for LoggedOp {
    fn from(op: &EntryTxnOp) -> Self {
        Self {
            oid: op.entry.oid(),
            mode: op.mode,
            written: op.written,
            entry: op.entry.entry().clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    Prepare { txn: TxnId, ops: Vec<LoggedOp> },
    Commit { txn: TxnId, ops: Vec<LoggedOp> },
    Abort { txn: TxnId },
}

impl LogRecord {
    pub fn txn(&self) -> TxnId {
        match self {
            LogRecord::Prepare { txn, .. } | LogRecord::Commit { txn, .. } | LogRecord::Abort { txn } => *txn,
        }
    }
}

#[cfg_attr(test, automock)]
pub trait EntryLog: Send + Sync + 'static {
    /// Appends a durable record
    fn log(
        &self,
        record: &LogRecord,
    ) -> Result<()>;
}

/// Keeps records in memory; useful for tests and embedded use
#[derive(Debug, Default)]
pub struct MemEntryLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemEntryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Prepared transactions that have not been committed or aborted since,
    /// in log order. This is what recovery replays.
    pub fn in_doubt(&self) -> Vec<(TxnId, Vec<LoggedOp>)> {
        let records = self.records.lock();
        let mut pending: Vec<(TxnId, Vec<LoggedOp>)> = Vec::new();
        for record in records.iter() {
            match record {
                LogRecord::Prepare { txn, ops } => pending.push((*txn, ops.clone())),
                LogRecord::Commit { txn, .. } | LogRecord::Abort { txn } => pending.retain(|(t, _)| t != txn),
            }
        }
        pending
    }
}

impl EntryLog for MemEntryLog {
    fn log(
        &self,
        record: &LogRecord,
    ) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
