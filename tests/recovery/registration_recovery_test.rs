use std::collections::HashMap;
use std::sync::Arc;

use tspace::ListenerResolver;
use tspace::RegistrationStoreKind;
use tspace::RemoteListener;

use crate::common::item;
use crate::common::items;
use crate::common::start_space;
use crate::common::test_config;
use crate::common::Recorder;

struct Directory(HashMap<String, Arc<Recorder>>);

impl ListenerResolver for Directory {
    fn resolve(
        &self,
        address: &str,
    ) -> Option<Arc<dyn RemoteListener>> {
        self.0
            .get(address)
            .map(|r| r.clone() as Arc<dyn RemoteListener>)
    }
}

#[test]
fn persistent_registration_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.registration.save_interval = 2;
    config.registration.restart_jump = 8;
    config.registration.store = RegistrationStoreKind::Sled {
        path: dir.path().to_path_buf(),
    };

    let id = {
        let space = start_space(config.clone());
        let recorder = Recorder::new("mem://durable");
        let id = space.notify(items(), recorder.clone(), b"hb".to_vec(), None, None).unwrap();
        for i in 0..5 {
            space.write(item(&i.to_string()), None).unwrap();
        }
        assert_eq!(recorder.seq_nums(), vec![1, 2, 3, 4, 5]);
        space.stop();
        id
    };

    let space = start_space(config);
    let recorder = Recorder::new("mem://durable");
    let directory = Directory(HashMap::from([("mem://durable".to_string(), recorder.clone())]));
    assert_eq!(space.restore_registrations(&directory).unwrap(), 1);

    space.write(item("after"), None).unwrap();
    let events = recorder.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].registration_id, id);
    // Last checkpoint was 4; the restart pads it by 8
    assert_eq!(events[0].seq_num, 13);
    assert_eq!(events[0].handback, b"hb".to_vec());
}

#[test]
fn unresolvable_listener_is_forgotten() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.registration.store = RegistrationStoreKind::Sled {
        path: dir.path().to_path_buf(),
    };

    {
        let space = start_space(config.clone());
        space.notify(items(), Recorder::new("mem://gone"), Vec::new(), None, None).unwrap();
        space.stop();
    }

    let empty = Directory(HashMap::new());
    {
        let space = start_space(config.clone());
        assert_eq!(space.restore_registrations(&empty).unwrap(), 0);
        space.stop();
    }
    let space = start_space(config);
    assert_eq!(space.restore_registrations(&empty).unwrap(), 0);
    assert_eq!(space.events().registered_count(), 0);
}
