use serde::Deserialize;
use serde::Serialize;

use crate::EntryHandle;
use crate::TxnId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueEventKind {
    /// A transaction committed or aborted
    TransactionEnded,
    /// An entry was written under a still open transaction
    EntryWrite,
    /// A written entry was committed
    EntryWritten,
    /// An entry became visible to everyone
    EntryVisible,
    /// A lock on an entry was released without removing it
    EntryNotConflicted,
}

impl QueueEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEventKind::TransactionEnded => "transaction_ended",
            QueueEventKind::EntryWrite => "entry_write",
            QueueEventKind::EntryWritten => "entry_written",
            QueueEventKind::EntryVisible => "entry_visible",
            QueueEventKind::EntryNotConflicted => "entry_not_conflicted",
        }
    }
}

/// Immutable fact posted to the [`crate::EventQueue`]
#[derive(Debug, Clone)]
pub struct QueueEvent {
    kind: QueueEventKind,
    txn: TxnId,
    entry: Option<EntryHandle>,
}

impl QueueEvent {
    pub fn transaction_ended(txn: TxnId) -> Self {
        Self {
            kind: QueueEventKind::TransactionEnded,
            txn,
            entry: None,
        }
    }

    pub fn entry_write(
        txn: TxnId,
        entry: EntryHandle,
    ) -> Self {
        Self::with_entry(QueueEventKind::EntryWrite, txn, entry)
    }

    pub fn entry_written(
        txn: TxnId,
        entry: EntryHandle,
    ) -> Self {
        Self::with_entry(QueueEventKind::EntryWritten, txn, entry)
    }

    pub fn entry_visible(
        txn: TxnId,
        entry: EntryHandle,
    ) -> Self {
        Self::with_entry(QueueEventKind::EntryVisible, txn, entry)
    }

    pub fn entry_not_conflicted(
        txn: TxnId,
        entry: EntryHandle,
    ) -> Self {
        Self::with_entry(QueueEventKind::EntryNotConflicted, txn, entry)
    }

    fn with_entry(
        kind: QueueEventKind,
        txn: TxnId,
        entry: EntryHandle,
    ) -> Self {
        Self {
            kind,
            txn,
            entry: Some(entry),
        }
    }

    pub fn kind(&self) -> QueueEventKind {
        self.kind
    }

    pub fn txn(&self) -> TxnId {
        self.txn
    }

    pub fn entry(&self) -> Option<&EntryHandle> {
        self.entry.as_ref()
    }
}
