use lockwatch::DeadlockInfo;
use lockwatch::ffi::mutex::{lockwatch_create_mutex, lockwatch_lock_mutex, lockwatch_mutex_id};
use lockwatch::ffi::{
    lockwatch_check_deadlock, lockwatch_init, lockwatch_is_deadlock_detected,
    lockwatch_reset_deadlock_flag, lockwatch_shutdown,
};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;
use std::sync::Mutex as StdMutex;
use std::thread;
use std::time::{Duration, Instant};

static REPORTS: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

extern "C" fn on_deadlock(json: *const c_char) {
    let json = unsafe { CStr::from_ptr(json) }.to_string_lossy().into_owned();
    REPORTS.lock().unwrap().push(json);
}

#[test]
fn test_c_api_two_thread_deadlock() {
    assert_eq!(unsafe { lockwatch_init(50, 1, ptr::null(), Some(on_deadlock)) }, 0);

    // Raw pointers cross threads as integers, as a C program would share them
    let a = unsafe { lockwatch_create_mutex() } as usize;
    let b = unsafe { lockwatch_create_mutex() } as usize;
    let id_a = unsafe { lockwatch_mutex_id(a as *mut _) };
    let id_b = unsafe { lockwatch_mutex_id(b as *mut _) };

    for (first, second) in [(a, b), (b, a)] {
        thread::spawn(move || unsafe {
            lockwatch_lock_mutex(first as *mut _);
            thread::sleep(Duration::from_millis(100));
            lockwatch_lock_mutex(second as *mut _);
        });
    }

    let deadline = Instant::now() + Duration::from_secs(3);
    while REPORTS.lock().unwrap().is_empty() {
        assert!(Instant::now() < deadline, "No deadlock reported through the C callback");
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(lockwatch_is_deadlock_detected(), 1);

    let report = REPORTS.lock().unwrap()[0].clone();
    let info: DeadlockInfo = serde_json::from_str(&report).unwrap();
    assert_eq!(info.thread_cycle.len(), 2);
    let mut wanted: Vec<_> = info.blocked.iter().map(|b| b.waiting_for).collect();
    wanted.sort_unstable();
    let mut expected = vec![id_a, id_b];
    expected.sort_unstable();
    assert_eq!(wanted, expected);

    // An on-demand check sees the same deadlock
    lockwatch_reset_deadlock_flag();
    assert_eq!(lockwatch_check_deadlock(), 1);
    assert_eq!(lockwatch_is_deadlock_detected(), 1);

    assert_eq!(lockwatch_shutdown(), 1);
}
