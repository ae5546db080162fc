use lockwatch::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
mod common;
use common::{DEADLOCK_TIMEOUT, assert_consistent, expect_deadlock, start_detector};

#[test]
fn test_simple_two_thread_deadlock() {
    let harness = start_detector();

    // Create two mutexes
    let mutex_a = Arc::new(Mutex::new("Resource A"));
    let mutex_b = Arc::new(Mutex::new("Resource B"));
    let (id_a, id_b) = (mutex_a.id(), mutex_b.id());

    // Clone references for the second thread
    let mutex_a_clone = Arc::clone(&mutex_a);
    let mutex_b_clone = Arc::clone(&mutex_b);

    // Thread 1: Lock A, then try to lock B
    let _thread1 = thread::spawn(move || {
        let _guard_a = mutex_a.lock();
        thread::sleep(Duration::from_millis(100));
        let _guard_b = mutex_b.lock();
    });

    // Thread 2: Lock B, then try to lock A
    let _thread2 = thread::spawn(move || {
        let _guard_b = mutex_b_clone.lock();
        thread::sleep(Duration::from_millis(100));
        let _guard_a = mutex_a_clone.lock();
    });

    let info = expect_deadlock(&harness, DEADLOCK_TIMEOUT);
    assert_eq!(info.thread_cycle.len(), 2);
    assert_eq!(info.cycles.len(), 1);
    assert!(info.self_waits.is_empty());
    assert_consistent(&info);

    let mut wanted: Vec<_> = info.blocked.iter().map(|b| b.waiting_for).collect();
    wanted.sort_unstable();
    let mut expected = vec![id_a, id_b];
    expected.sort_unstable();
    assert_eq!(wanted, expected);

    // Stacks are captured by default
    assert!(info.blocked.iter().all(|b| !b.stack.is_empty()));

    // The rendered report names every waiting thread and lock owner
    let text = info.to_string();
    for b in &info.blocked {
        assert!(text.contains(&format!("thread_id {} apply lock_id {}", b.thread_id, b.waiting_for)));
        assert!(text.contains(&format!("The lock {} is owned by {}", b.waiting_for, b.held_by)));
    }

    // The threads stay deadlocked; we don't join them
}
