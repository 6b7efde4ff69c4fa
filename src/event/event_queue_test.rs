use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;

use super::*;
use crate::DeliveryError;
use crate::DispatchError;
use crate::DispatcherConfig;
use crate::Entry;
use crate::EntryHandle;
use crate::Error;
use crate::FieldMatcher;
use crate::MemRegistrationStore;
use crate::Oid;
use crate::RegistrationConfig;
use crate::RegistrationStore;
use crate::StoredEntry;
use crate::SystemError;
use crate::Template;
use crate::TxnId;

#[derive(Default)]
struct Recorder {
    address: String,
    events: Mutex<Vec<RemoteEvent>>,
}

impl Recorder {
    fn at(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            events: Mutex::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.events.lock().len()
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
        self.events.lock().push(event.clone());
        Ok(())
    }
}

struct Target {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl LiveTarget for Target {
    fn offer_live(
        &self,
        _entry: &EntryHandle,
    ) {
        self.log.lock().push(self.name);
    }

    fn resolved(
        &self,
        _txn: TxnId,
    ) {
    }
}

fn queue_with(store: Arc<dyn RegistrationStore>) -> EventQueue {
    let dispatcher = DispatcherConfig {
        worker_threads: 2,
        queue_capacity: 16,
        ..Default::default()
    };
    let registration = RegistrationConfig {
        save_interval: 4,
        restart_jump: 16,
        ..Default::default()
    };
    EventQueue::new(dispatcher, registration, Arc::new(FieldMatcher::new()), store)
}

fn started_queue() -> EventQueue {
    let queue = queue_with(Arc::new(MemRegistrationStore::new()));
    queue.start().unwrap();
    queue
}

fn item(oid: u64) -> EntryHandle {
    StoredEntry::new(Oid(oid), Entry::with_values("Item", &["a"]))
}

fn notify_kind(listener: Arc<dyn RemoteListener>) -> GeneratorKind {
    GeneratorKind::Notify {
        listener,
        handback: Vec::new(),
    }
}

fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn dispatch_error(result: crate::Result<()>) -> Option<DispatchError> {
    match result {
        Err(Error::System(SystemError::Dispatch(e))) => Some(e),
        _ => None,
    }
}

#[test]
fn test_add_requires_running_queue() {
    let queue = queue_with(Arc::new(MemRegistrationStore::new()));
    let event = QueueEvent::entry_written(TxnId(1), item(1));
    assert_eq!(dispatch_error(queue.add(event.clone(), false)), Some(DispatchError::NotStarted));

    queue.start().unwrap();
    assert!(queue.is_running());
    queue.stop();
    assert!(!queue.is_running());
    assert_eq!(dispatch_error(queue.add(event, true)), Some(DispatchError::ShutDown));
}

#[test]
fn test_synchronous_add_returns_after_ping() {
    let queue = started_queue();
    let recorder = Recorder::at("a");
    queue
        .register(vec![Template::of_type("Item")], notify_kind(recorder.clone()), Affinity::Persistent, u64::MAX)
        .unwrap();

    queue.add(QueueEvent::entry_written(TxnId(1), item(1)), true).unwrap();
    assert_eq!(recorder.count(), 1);

    // Not matching
    let other = StoredEntry::new(Oid(2), Entry::with_values("Other", &["a"]));
    queue.add(QueueEvent::entry_written(TxnId(1), other), true).unwrap();
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_generators_pinged_in_registration_order() {
    let queue = started_queue();
    let log = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::new(Target { name: "first", log: log.clone() });
    let second = Arc::new(Target { name: "second", log: log.clone() });

    queue.register_search(
        vec![Template::of_type("Item")],
        TxnId(3),
        Arc::downgrade(&first) as Weak<dyn LiveTarget>,
    );
    queue.register_search(
        vec![Template::any()],
        TxnId(4),
        Arc::downgrade(&second) as Weak<dyn LiveTarget>,
    );

    queue.add(QueueEvent::entry_written(TxnId(1), item(1)), true).unwrap();
    assert_eq!(*log.lock(), vec!["first", "second"]);
}

#[test]
fn test_failed_delivery_isolated_to_one_generator() {
    let queue = started_queue();
    let mut failing = MockRemoteListener::new();
    failing.expect_address().returning(|| "down".to_string());
    failing
        .expect_notify()
        .returning(|_| Err(DeliveryError::Rejected("no".into())));
    let healthy = Recorder::at("up");

    let bad = queue
        .register(vec![Template::any()], notify_kind(Arc::new(failing)), Affinity::Persistent, u64::MAX)
        .unwrap();
    let good = queue
        .register(vec![Template::any()], notify_kind(healthy.clone()), Affinity::Persistent, u64::MAX)
        .unwrap();

    queue.add(QueueEvent::entry_written(TxnId(1), item(1)), true).unwrap();
    assert!(bad.is_tainted());
    assert!(!good.is_tainted());

    queue.add(QueueEvent::entry_written(TxnId(1), item(2)), true).unwrap();
    assert_eq!(healthy.count(), 2);
    assert!(eventually(|| queue.generator(bad.id()).is_none()));
}

#[test]
fn test_persistent_registration_saved_and_dropped_on_cancel() {
    let store = Arc::new(MemRegistrationStore::new());
    let queue = queue_with(store.clone());
    queue.start().unwrap();

    let generator = queue
        .register(vec![Template::any()], notify_kind(Recorder::at("a")), Affinity::Persistent, u64::MAX)
        .unwrap();
    assert!(generator.is_persistent());
    assert!(store.get(generator.id()).is_some());

    let transactional = queue
        .register(vec![Template::any()], notify_kind(Recorder::at("b")), Affinity::Transactional(TxnId(2)), u64::MAX)
        .unwrap();
    assert!(!transactional.is_persistent());
    assert!(store.get(transactional.id()).is_none());

    assert!(queue.cancel(generator.id()));
    assert!(!queue.cancel(generator.id()));
    assert!(eventually(|| store.get(generator.id()).is_none()));
    assert!(eventually(|| queue.registered_count() == 1));
}

#[test]
fn test_renew_and_reap_expired() {
    let queue = started_queue();
    let short = queue
        .register(vec![Template::any()], notify_kind(Recorder::at("a")), Affinity::Persistent, 1_000)
        .unwrap();
    let long = queue
        .register(vec![Template::any()], notify_kind(Recorder::at("b")), Affinity::Persistent, 1_000)
        .unwrap();

    assert!(queue.renew(long.id(), 10_000).unwrap());
    assert!(!queue.renew(999, 10_000).unwrap());

    assert_eq!(queue.reap_expired(5_000), 1);
    assert!(short.is_tainted());
    assert!(!long.is_tainted());
    assert_eq!(queue.live_count(), 1);
    assert_eq!(queue.reap_expired(5_000), 0);
}

#[test]
fn test_restore_registrations() {
    let store = Arc::new(MemRegistrationStore::new());
    let memento = |id: u64, listener: &str, expiry: u64| RegistrationMemento {
        id,
        source_id: 1,
        templates: vec![Template::any()],
        kind: MementoKind::Notify,
        listener: listener.to_string(),
        handback: Vec::new(),
        expiry,
        seq: 10,
    };
    store.save(&memento(3, "known", u64::MAX)).unwrap();
    store.save(&memento(5, "lost", u64::MAX)).unwrap();
    store.save(&memento(9, "known", 1)).unwrap();

    let recorder = Recorder::at("known");
    let mut resolver = MockListenerResolver::new();
    let resolved = recorder.clone();
    resolver.expect_resolve().returning(move |address| {
        (address == "known").then(|| resolved.clone() as Arc<dyn RemoteListener>)
    });

    let queue = queue_with(store.clone());
    queue.start().unwrap();
    assert_eq!(queue.restore_registrations(&resolver).unwrap(), 1);

    assert_eq!(store.len(), 1);
    assert_eq!(store.get(3).unwrap().seq, 26);
    let restored = queue.generator(3).unwrap();
    assert_eq!(restored.seq(), 26);

    // Fresh ids never collide with restored ones
    let fresh = queue
        .register(vec![Template::any()], notify_kind(Recorder::at("x")), Affinity::Persistent, u64::MAX)
        .unwrap();
    assert!(fresh.id() > 9);

    queue.add(QueueEvent::entry_written(TxnId(1), item(1)), true).unwrap();
    assert_eq!(recorder.events.lock()[0].seq_num, 27);
}

/// Holds every delivery until its gate sender is dropped
struct Gated {
    gate: crossbeam_channel::Receiver<()>,
    delivered: Mutex<usize>,
}

impl RemoteListener for Gated {
    fn address(&self) -> String {
        "gated".to_string()
    }

    fn notify(
        &self,
        _event: &RemoteEvent,
    ) -> Result<(), DeliveryError> {
        let _ = self.gate.recv();
        *self.delivered.lock() += 1;
        Ok(())
    }
}

#[test]
fn test_wait_drained_tracks_in_flight_events() {
    let queue = started_queue();
    assert!(queue.wait_drained(Duration::ZERO));

    let (open, gate) = crossbeam_channel::bounded::<()>(0);
    let listener = Arc::new(Gated {
        gate,
        delivered: Mutex::new(0),
    });
    queue
        .register(vec![Template::any()], notify_kind(listener.clone()), Affinity::Persistent, u64::MAX)
        .unwrap();

    for oid in 1..=3 {
        queue.add(QueueEvent::entry_written(TxnId(1), item(oid)), false).unwrap();
    }
    assert!(!queue.wait_drained(Duration::from_millis(30)));
    assert!(queue.pending() > 0);

    drop(open);
    assert!(queue.wait_drained(Duration::from_secs(2)));
    assert_eq!(queue.pending(), 0);
    assert_eq!(*listener.delivered.lock(), 3);
}

#[test]
fn test_wait_drained_without_deadline() {
    let queue = Arc::new(started_queue());
    let (open, gate) = crossbeam_channel::bounded::<()>(0);
    let listener = Arc::new(Gated {
        gate,
        delivered: Mutex::new(0),
    });
    queue
        .register(vec![Template::any()], notify_kind(listener), Affinity::Persistent, u64::MAX)
        .unwrap();
    queue.add(QueueEvent::entry_written(TxnId(1), item(1)), false).unwrap();

    let waiter = {
        let queue = queue.clone();
        std::thread::spawn(move || queue.wait_drained(Duration::MAX))
    };
    std::thread::sleep(Duration::from_millis(20));
    drop(open);
    assert!(waiter.join().unwrap());
}

#[test]
fn test_stop_is_idempotent_and_flushes() {
    let mut store = crate::MockRegistrationStore::new();
    store.expect_flush().times(1).returning(|| Ok(()));
    let queue = queue_with(Arc::new(store));
    queue.start().unwrap();
    queue.stop();
    queue.stop();
}
