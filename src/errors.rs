//! Tuple Space Engine Error Hierarchy
//!
//! Defines the error types surfaced by the space, categorized by layer:
//! infrastructure (storage, dispatch, serialization), configuration and
//! transaction lifecycle.
//!
//! Lock contention is never an error. It is ordinary control flow expressed
//! through [`crate::LockOutcome`] and [`crate::ScanControl::TryAgain`].

use config::ConfigError;

use crate::TxnId;
use crate::TxnStatus;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (storage, dispatch, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The owning transaction cannot accept the operation, or ended while it
    /// was outstanding
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    /// Handle does not resolve to a live transaction
    #[error("Unknown transaction {0:?}")]
    Unknown(TxnId),

    /// Transaction is committing, prepared or already resolved
    #[error("Transaction {txn:?} is not active (status: {status:?})")]
    NotActive { txn: TxnId, status: TxnStatus },

    /// Transaction ended while an operation was still outstanding
    #[error("Transaction {0:?} ended while the operation was outstanding")]
    Ended(TxnId),

    /// Blocking search was interrupted before completion
    #[error("Search interrupted")]
    Interrupted,

    /// Recovery replay could not reconstruct transaction state
    #[error("Transaction restore failed: {0}")]
    Restore(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Storage layer
    #[error("Storage operation failed")]
    Storage(#[from] StorageError),

    // Event dispatch
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    //Serialization
    #[error("Serialization error")]
    Serialization(#[from] SerializationError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Entry repository failures
    #[error("Entry repository failure: {0}")]
    Repository(String),

    /// Durable log append failures
    #[error("Log append failed: {0}")]
    Log(String),

    /// Persisted record that no longer decodes
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Event queue has been stopped; pending dispatches were abandoned
    #[error("Event queue is shut down")]
    ShutDown,

    /// Event queue was never started
    #[error("Event queue is not running")]
    NotStarted,
}

// Serialization is classified separately (used by storage and registrations)
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Failures reported by a remote listener.
///
/// These never cross the engine boundary: any of them taints the generator
/// that attempted the delivery and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Listener endpoint cannot be reached
    #[error("Listener unreachable: {0}")]
    Unreachable(String),

    /// Listener no longer knows about this registration
    #[error("Listener does not recognise registration {0}")]
    UnknownRegistration(u64),

    /// Listener refused the event
    #[error("Listener rejected event: {0}")]
    Rejected(String),
}

// ============== Conversion Implementations ============== //
impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<DispatchError> for Error {
    fn from(e: DispatchError) -> Self {
        Error::System(SystemError::Dispatch(e))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        SerializationError::Bincode(e).into()
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string()).into()
    }
}

impl Error {
    /// Returns the transaction error carried by this error, if any
    pub fn as_transaction(&self) -> Option<&TransactionError> {
        match self {
            Error::Transaction(e) => Some(e),
            _ => None,
        }
    }
}
