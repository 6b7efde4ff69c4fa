use crate::EntryHandle;
use crate::Error;
use crate::StorageError;
use crate::TransactionError;
use crate::TxnId;

/// Completion of a search task
#[derive(Debug, Clone)]
pub enum Outcome {
    Found(EntryHandle),
    NotFound,
    /// The owning transaction ended while the search was outstanding
    TxnEnded(TxnId),
    Interrupted,
    StorageError(String),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Found(_) => "found",
            Outcome::NotFound => "not_found",
            Outcome::TxnEnded(_) => "txn_ended",
            Outcome::Interrupted => "interrupted",
            Outcome::StorageError(_) => "storage_error",
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Outcome::Found(_))
    }

    /// Error carried by an abnormal completion
    pub fn error(&self) -> Option<Error> {
        match self {
            Outcome::Found(_) | Outcome::NotFound => None,
            Outcome::TxnEnded(txn) => Some(TransactionError::Ended(*txn).into()),
            Outcome::Interrupted => Some(TransactionError::Interrupted.into()),
            Outcome::StorageError(msg) => Some(StorageError::Repository(msg.clone()).into()),
        }
    }

    /// `Found` and `NotFound` become `Ok`; everything else is an error
    pub fn into_result(self) -> crate::Result<Option<EntryHandle>> {
        match self {
            Outcome::Found(entry) => Ok(Some(entry)),
            Outcome::NotFound => Ok(None),
            other => Err(other.error().unwrap_or_else(|| Error::Fatal("unexpected outcome".into()))),
        }
    }
}
