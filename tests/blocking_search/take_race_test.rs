use std::thread;

use tracing_test::traced_test;
use tspace::EntryRepository;

use crate::common::item;
use crate::common::items;
use crate::common::start_space;
use crate::common::test_config;
use crate::common::LONG;
use crate::common::SHORT;

/// A take blocked before the write is offered the entry while the writer
/// still holds it, so it wins against any take started after the write.
#[test]
#[traced_test]
fn blocked_take_wins_over_later_take() {
    let space = start_space(test_config());

    let blocked = {
        let space = space.clone();
        thread::spawn(move || space.take(items(), None, LONG))
    };
    thread::sleep(SHORT);

    let written = space.write(item("e1"), None).unwrap();
    let late = space.take_if_exists(items(), None, SHORT).unwrap();
    assert!(late.is_none(), "late take must not see the entry");

    let taken = blocked.join().unwrap().unwrap().expect("blocked take gets the entry");
    assert_eq!(taken.oid(), written.oid());
    assert!(space.repository().is_empty());
}

#[test]
fn concurrent_takers_each_get_a_distinct_entry() {
    let space = start_space(test_config());
    let takers: Vec<_> = (0..4)
        .map(|_| {
            let space = space.clone();
            thread::spawn(move || space.take(items(), None, LONG))
        })
        .collect();
    thread::sleep(SHORT);

    for i in 0..4 {
        space.write(item(&format!("e{i}")), None).unwrap();
    }

    let mut oids: Vec<_> = takers
        .into_iter()
        .map(|t| t.join().unwrap().unwrap().expect("every taker is served").oid())
        .collect();
    oids.sort();
    oids.dedup();
    assert_eq!(oids.len(), 4);
    assert!(space.repository().is_empty());
}

#[test]
fn take_times_out_with_nothing_to_take() {
    let space = start_space(test_config());
    assert!(space.take(items(), None, SHORT).unwrap().is_none());
    assert_eq!(space.txns().active_count(), 0);
}
