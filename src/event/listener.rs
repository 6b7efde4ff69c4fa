use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use super::QueueEventKind;
use crate::DeliveryError;
use crate::Entry;

/// Notification delivered to a remote registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub source_id: u64,
    pub registration_id: u64,
    pub seq_num: u64,
    pub handback: Vec<u8>,
    pub kind: QueueEventKind,
    pub entry: Entry,
}

/// Endpoint of a notify or visibility registration.
///
/// `notify` runs on a dispatch worker and must fail fast rather than block.
#[cfg_attr(test, automock)]
pub trait RemoteListener: Send + Sync + 'static {
    /// Stable address persisted with the registration
    fn address(&self) -> String;

    fn notify(
        &self,
        event: &RemoteEvent,
    ) -> Result<(), DeliveryError>;
}

/// Re-binds persisted listener addresses after a restart
#[cfg_attr(test, automock)]
pub trait ListenerResolver: Send + Sync {
    fn resolve(
        &self,
        address: &str,
    ) -> Option<Arc<dyn RemoteListener>>;
}
