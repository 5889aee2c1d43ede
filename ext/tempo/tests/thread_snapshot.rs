#![cfg(target_os = "linux")]

use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use tempo::{Configuration, Session, SnapshotSource, ThreadSnapshot};
use tokio_util::sync::CancellationToken;

fn labeled_configuration() -> Configuration {
    Configuration {
        propagate_labels: true,
        capture_timeout: Duration::from_millis(500),
        ..Configuration::default()
    }
}

#[test]
fn test_captures_blocked_threads() {
    let (tx, rx) = mpsc::channel::<()>();
    let ready = Arc::new(Barrier::new(2));
    let parked_ready = Arc::clone(&ready);
    let parked = thread::Builder::new()
        .name("tempo-parked".to_owned())
        .spawn(move || {
            parked_ready.wait();
            let _ = rx.recv();
        })
        .unwrap();
    ready.wait();

    let snapshot = ThreadSnapshot::new(&labeled_configuration()).unwrap();
    let records = snapshot.capture().unwrap();

    let parked_record = records
        .iter()
        .find(|record| {
            record
                .labels
                .as_ref()
                .and_then(|labels| labels.get("thread_name"))
                .map(String::as_str)
                == Some("tempo-parked")
        })
        .expect("blocked thread missing from snapshot");
    assert!(parked_record.depth() > 1);

    drop(tx);
    parked.join().unwrap();
}

#[test]
fn test_capturing_thread_is_excluded() {
    let snapshot = ThreadSnapshot::new(&labeled_configuration()).unwrap();
    let records = snapshot.capture().unwrap();

    let me = unsafe { libc::gettid() }.to_string();
    assert!(records.iter().all(|record| {
        record.labels.as_ref().and_then(|labels| labels.get("thread_id")) != Some(&me)
    }));
}

#[test]
fn test_session_over_current_process() {
    let lock = Arc::new(Mutex::new(()));
    let guard = lock.lock().unwrap();
    let waiter_lock = Arc::clone(&lock);
    let waiter = thread::Builder::new()
        .name("tempo-waiter".to_owned())
        .spawn(move || {
            let _guard = waiter_lock.lock().unwrap();
        })
        .unwrap();

    let configuration = Configuration {
        duration: Duration::from_millis(50),
        ..labeled_configuration()
    };
    let session = Session::for_current_process(configuration).unwrap();
    let profile = session.run(&CancellationToken::new()).unwrap();

    assert!(profile.total_count() >= 5);
    assert!(!profile.functions.is_empty());
    assert!(profile.samples.iter().any(|sample| {
        sample
            .labels
            .as_ref()
            .and_then(|labels| labels.get("thread_name"))
            .map(String::as_str)
            == Some("tempo-waiter")
    }));
    for (index, location) in profile.locations.iter().enumerate() {
        assert_eq!(location.id, index as u64 + 1);
        assert!(profile.function(location.function_id).is_some());
    }

    drop(guard);
    waiter.join().unwrap();
}
