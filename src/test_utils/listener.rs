use std::sync::Arc;

use parking_lot::Mutex;

use crate::DeliveryError;
use crate::RemoteEvent;
use crate::RemoteListener;

/// Listener that keeps every event it receives
#[derive(Debug, Default)]
pub struct RecordingListener {
    address: String,
    events: Mutex<Vec<RemoteEvent>>,
}

impl RecordingListener {
    pub fn at(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<RemoteEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }
}

impl RemoteListener for RecordingListener {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn notify(
        &self,
        event: &RemoteEvent,
    ) -> Result<(), DeliveryError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
