use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;


lazy_static! {
    pub static ref LOCK_CONFLICTS: IntCounter = IntCounter::new(
        "lock_conflicts",
        "Lock acquisitions that baulked on a conflicting holder"
    )
    .expect("metric can not be created");

    pub static ref EVENTS_POSTED: IntCounterVec = IntCounterVec::new(
        Opts::new("events_posted", "Queue events posted to the dispatcher"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref EVENTS_DISPATCHED: IntCounterVec = IntCounterVec::new(
        Opts::new("events_dispatched", "Queue events fully processed by a worker"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref GENERATORS_TAINTED: IntCounterVec = IntCounterVec::new(
        Opts::new("generators_tainted", "Event generators retired, by reason"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref DELIVERY_FAILURES: IntCounter = IntCounter::new(
        "delivery_failures",
        "Remote listener deliveries that failed"
    )
    .expect("metric can not be created");

    pub static ref TASKS_COMPLETED: IntCounterVec = IntCounterVec::new(
        Opts::new("tasks_completed", "Search tasks completed, by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_custom_metrics(&registry);
        registry
    };
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(LOCK_CONFLICTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(EVENTS_POSTED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(EVENTS_DISPATCHED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(GENERATORS_TAINTED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(DELIVERY_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(TASKS_COMPLETED.clone()))
        .expect("collector can be registered");
}

/// Engine metrics in the Prometheus text exposition format
pub fn gather_text() -> String {
    encode(&REGISTRY)
}

pub(crate) fn encode(registry: &Registry) -> String {
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        warn!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            warn!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
