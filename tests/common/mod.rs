use lockwatch::{DeadlockInfo, Lockwatch};
use std::sync::{Arc, Mutex as StdMutex, mpsc};
use std::time::Duration;

#[allow(dead_code)]
pub const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(3);
#[allow(dead_code)]
pub const NO_DEADLOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval short enough that tests do not wait on the 10 s default
pub const CHECK_INTERVAL: Duration = Duration::from_millis(50);

pub struct DetectorHarness {
    pub rx: mpsc::Receiver<DeadlockInfo>,
    pub detected: Arc<StdMutex<bool>>,
}

#[allow(dead_code)]
pub fn start_detector() -> DetectorHarness {
    start_with(Lockwatch::new())
}

#[allow(dead_code)]
pub fn start_with(builder: Lockwatch) -> DetectorHarness {
    let (tx, rx) = mpsc::channel::<DeadlockInfo>();
    let detected = Arc::new(StdMutex::new(false));
    let flag = Arc::clone(&detected);

    builder
        .interval(CHECK_INTERVAL)
        .callback(move |info| {
            *flag.lock().unwrap() = true;
            let _ = tx.send(info);
        })
        .start()
        .expect("Failed to initialize detector");

    DetectorHarness { rx, detected }
}

#[allow(dead_code)]
pub fn expect_deadlock(h: &DetectorHarness, timeout: Duration) -> DeadlockInfo {
    match h.rx.recv_timeout(timeout) {
        Ok(info) => {
            assert!(*h.detected.lock().unwrap(), "Deadlock flag should be set");
            info
        }
        Err(_) => panic!("No deadlock detected within {timeout:?}"),
    }
}

#[allow(dead_code)]
pub fn assert_no_deadlock(h: &DetectorHarness, timeout: Duration) {
    assert!(
        h.rx.recv_timeout(timeout).is_err(),
        "Unexpected deadlock detected"
    );
    assert!(
        !*h.detected.lock().unwrap(),
        "Deadlock flag should not be set"
    );
}

/// Check that every blocked entry agrees with the cycle it belongs to
#[allow(dead_code)]
pub fn assert_consistent(info: &DeadlockInfo) {
    for cycle in &info.cycles {
        for (i, &tid) in cycle.iter().enumerate() {
            let next = cycle[(i + 1) % cycle.len()];
            let blocked = info
                .blocked_thread(tid)
                .unwrap_or_else(|| panic!("thread {tid} missing from blocked list"));
            assert_eq!(blocked.held_by, next, "thread {tid} should wait on {next}");
        }
    }
    assert_eq!(info.blocked.len(), info.thread_cycle.len());
}
