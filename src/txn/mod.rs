//! Transaction bookkeeping.
//!
//! [`TxnManager`] is the reference transaction collaborator: it hands out
//! [`TxnId`]s, records every [`EntryTxnOp`] a transaction performs and, on
//! commit or abort, applies them against storage, releases locks and posts
//! the resulting queue events in the order blocked searches rely on.

mod txn_manager;
mod txn_state;
pub use txn_manager::*;
pub use txn_state::*;


use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Internal transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Stands for "no transaction". Never handed out by [`TxnManager`].
    pub const NONE: TxnId = TxnId(0);
}

impl fmt::Display for TxnId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    Active,
    Prepared,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TxnStatus {
    /// Whether new operations may still join the transaction
    pub fn accepts_ops(&self) -> bool {
        matches!(self, TxnStatus::Active)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, TxnStatus::Committed | TxnStatus::Aborted)
    }
}
