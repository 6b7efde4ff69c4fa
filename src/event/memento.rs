use serde::Deserialize;
use serde::Serialize;

use crate::Template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MementoKind {
    Notify,
    Visibility { visible_only: bool },
}

/// Durable state of a persistent registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationMemento {
    pub id: u64,
    pub source_id: u64,
    pub templates: Vec<Template>,
    pub kind: MementoKind,
    /// [`crate::RemoteListener::address`] of the listener
    pub listener: String,
    pub handback: Vec<u8>,
    /// Lease expiry, ms since epoch
    pub expiry: u64,
    /// Last checkpointed sequence number
    pub seq: u64,
}
