use std::time::Duration;

use tspace::QueueEventKind;

use crate::common::eventually;
use crate::common::item;
use crate::common::items;
use crate::common::start_space;
use crate::common::test_config;
use crate::common::Recorder;

#[test]
fn notify_numbers_events_per_registration() {
    let space = start_space(test_config());
    let first = Recorder::new("mem://first");
    let second = Recorder::new("mem://second");
    let first_id = space.notify(items(), first.clone(), b"one".to_vec(), None, None).unwrap();
    let second_id = space.notify(items(), second.clone(), b"two".to_vec(), None, None).unwrap();
    assert_ne!(first_id, second_id);

    for i in 0..3 {
        space.write(item(&i.to_string()), None).unwrap();
    }

    assert_eq!(first.seq_nums(), vec![1, 2, 3]);
    assert_eq!(second.seq_nums(), vec![1, 2, 3]);
    let events = first.events.lock();
    assert!(events.iter().all(|e| e.registration_id == first_id && e.handback == b"one".to_vec()));
    assert!(events.iter().all(|e| e.kind == QueueEventKind::EntryWritten));
}

#[test]
fn failing_listener_is_dropped_alone() {
    let space = start_space(test_config());
    let down = Recorder::refusing("mem://down");
    let up = Recorder::new("mem://up");
    let down_id = space.notify(items(), down, Vec::new(), None, None).unwrap();
    space.notify(items(), up.clone(), Vec::new(), None, None).unwrap();

    space.write(item("a"), None).unwrap();
    assert!(eventually(|| space.events().generator(down_id).is_none()));

    space.write(item("b"), None).unwrap();
    assert_eq!(up.seq_nums(), vec![1, 2]);
}

#[test]
fn transactional_registration_ends_with_transaction() {
    let space = start_space(test_config());
    let txn = space.begin();
    let recorder = Recorder::new("mem://txn");
    let id = space.notify(items(), recorder.clone(), Vec::new(), None, Some(txn)).unwrap();

    space.write(item("mine"), Some(txn)).unwrap();
    assert!(eventually(|| recorder.events.lock().len() == 1));
    assert_eq!(recorder.events.lock()[0].kind, QueueEventKind::EntryWrite);

    space.commit(txn).unwrap();
    assert!(eventually(|| space.events().generator(id).is_none()));
}

#[test]
fn visibility_reports_rolled_back_take() {
    let space = start_space(test_config());
    space.write(item("a"), None).unwrap();

    let recorder = Recorder::new("mem://visibility");
    space
        .register_visibility(items(), recorder.clone(), Vec::new(), false, Some(Duration::from_secs(60)), None)
        .unwrap();

    let txn = space.begin();
    assert!(space.take(items(), Some(txn), Duration::from_millis(100)).unwrap().is_some());
    space.abort(txn).unwrap();

    // The earlier write's visibility event may or may not reach the new
    // registration; the rollback must produce both kinds
    let seen = |kind: QueueEventKind| recorder.events.lock().iter().any(|e| e.kind == kind);
    assert!(eventually(|| seen(QueueEventKind::EntryNotConflicted)));
    assert!(eventually(|| seen(QueueEventKind::EntryVisible)));
}
