use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use tspace::DeliveryError;
use tspace::Entry;
use tspace::RemoteEvent;
use tspace::RemoteListener;
use tspace::Space;
use tspace::SpaceBuilder;
use tspace::SpaceConfig;
use tspace::Template;

pub const SHORT: Duration = Duration::from_millis(100);
pub const LONG: Duration = Duration::from_secs(5);

pub fn item(value: &str) -> Entry {
    Entry::with_values("Item", &[value])
}

pub fn items() -> Vec<Template> {
    vec![Template::of_type("Item")]
}

pub fn test_config() -> SpaceConfig {
    let mut config = SpaceConfig::default();
    config.dispatcher.worker_threads = 2;
    config.dispatcher.shutdown_grace_ms = 100;
    config
}

pub fn start_space(config: SpaceConfig) -> Arc<Space> {
    let space = SpaceBuilder::from_config(config).build().expect("space builds");
    space.start().expect("space starts");
    Arc::new(space)
}

#[allow(dead_code)]
pub fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Keeps every delivered event; optionally refuses all of them
#[derive(Debug, Default)]
pub struct Recorder {
    pub address: String,
    pub refuse: bool,
    pub events: Mutex<Vec<RemoteEvent>>,
}

impl Recorder {
    pub fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            ..Default::default()
        })
    }

    #[allow(dead_code)]
    pub fn refusing(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            refuse: true,
            ..Default::default()
        })
    }

    pub fn seq_nums(&self) -> Vec<u64> {
        self.events.lock().iter().map(|e| e.seq_num).collect()
    }
}

impl RemoteListener for Recorder {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn notify(
        &self,
        event: &RemoteEvent,
    ) -> Result<(), DeliveryError> {
        if self.refuse {
            return Err(DeliveryError::Unreachable(self.address.clone()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}
