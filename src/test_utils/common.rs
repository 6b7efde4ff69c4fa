use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crate::Entry;
use crate::Space;
use crate::SpaceBuilder;
use crate::SpaceConfig;

/// `Item` entry with a single field
pub fn item_entry(value: &str) -> Entry {
    Entry::with_values("Item", &[value])
}

/// Small, started space with in-memory collaborators
pub fn started_space() -> Arc<Space> {
    started_space_with(SpaceConfig::default())
}

pub fn started_space_with(mut config: SpaceConfig) -> Arc<Space> {
    config.dispatcher.worker_threads = 2;
    config.dispatcher.shutdown_grace_ms = 50;
    let space = SpaceBuilder::from_config(config).build().unwrap();
    space.start().unwrap();
    Arc::new(space)
}

/// Polls `cond` for up to two seconds
pub fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
