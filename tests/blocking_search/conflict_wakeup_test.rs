use std::sync::Arc;
use std::sync::Weak;
use std::thread;

use parking_lot::Mutex;
use tspace::DeliveryError;
use tspace::LockMode;
use tspace::Oid;
use tspace::RemoteEvent;
use tspace::RemoteListener;
use tspace::Space;

use crate::common::item;
use crate::common::items;
use crate::common::start_space;
use crate::common::test_config;
use crate::common::SHORT;

/// Two takers wait on an entry held by a reader. When the reader commits
/// both are woken, exactly one gets the entry.
#[test]
fn read_release_serves_exactly_one_taker() {
    let space = start_space(test_config());
    space.write(item("e"), None).unwrap();

    let reader = space.begin();
    assert!(space.read(items(), Some(reader), SHORT).unwrap().is_some());

    let takers: Vec<_> = (0..2)
        .map(|_| {
            let space = space.clone();
            thread::spawn(move || space.take(items(), None, SHORT * 10))
        })
        .collect();
    thread::sleep(SHORT);
    space.commit(reader).unwrap();

    let served = takers
        .into_iter()
        .filter_map(|t| t.join().unwrap().unwrap())
        .count();
    assert_eq!(served, 1);
}

/// Checks, at delivery time, that the committed entry is still locked
struct LockProbe {
    space: Mutex<Weak<Space>>,
    oid: Mutex<Option<Oid>>,
    observed: Mutex<Vec<bool>>,
}

impl RemoteListener for LockProbe {
    fn address(&self) -> String {
        "probe".to_string()
    }

    fn notify(
        &self,
        _event: &RemoteEvent,
    ) -> Result<(), DeliveryError> {
        let (Some(space), Some(oid)) = (self.space.lock().upgrade(), *self.oid.lock()) else {
            return Ok(());
        };
        let locked = !space.locks().is_available(None, oid, LockMode::Read);
        self.observed.lock().push(locked);
        Ok(())
    }
}

#[test]
fn committed_write_is_dispatched_before_lock_release() {
    let space = start_space(test_config());
    let probe = Arc::new(LockProbe {
        space: Mutex::new(Arc::downgrade(&space)),
        oid: Mutex::new(None),
        observed: Mutex::new(Vec::new()),
    });
    space.notify(items(), probe.clone(), Vec::new(), None, None).unwrap();

    let txn = space.begin();
    let written = space.write(item("e"), Some(txn)).unwrap();
    *probe.oid.lock() = Some(written.oid());
    space.commit(txn).unwrap();

    assert_eq!(*probe.observed.lock(), vec![true]);
    assert!(space.locks().is_available(None, written.oid(), LockMode::Delete));
}
