use std::sync::atomic::{AtomicBool, Ordering};

use monitorkit_core::platform::{
    clear_injected_failure_for_tests, inject_init_failure_for_tests, live_resources,
};
use monitorkit_core::{Backend, InitStage, Monitor, ResourceInitError};

// live_resources() is process-wide; tests in this file run one at a time.
static TEST_GUARD_HELD: AtomicBool = AtomicBool::new(false);

struct TestGuard;

impl Drop for TestGuard {
    fn drop(&mut self) {
        clear_injected_failure_for_tests();
        TEST_GUARD_HELD.store(false, Ordering::Release);
    }
}

fn acquire_test_guard() -> TestGuard {
    loop {
        if TEST_GUARD_HELD
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return TestGuard;
        }
        std::thread::yield_now();
    }
}

fn backends() -> [Backend; 2] {
    [Backend::Native, Backend::Portable]
}

#[test]
fn live_monitor_holds_one_lock_and_one_condition() {
    let _guard = acquire_test_guard();
    for backend in backends() {
        let before = live_resources();
        let monitor = Monitor::with_backend(backend).unwrap();
        assert_eq!(live_resources(), (before.0 + 1, before.1 + 1), "backend {backend:?}");
        drop(monitor);
        assert_eq!(live_resources(), before, "backend {backend:?}");
    }
}

#[test]
fn repeated_create_use_destroy_cycles_leak_nothing() {
    let _guard = acquire_test_guard();
    for backend in backends() {
        let before = live_resources();
        for _ in 0..1_000 {
            let monitor = Monitor::with_backend(backend).unwrap();
            {
                let guard = monitor.synchronized();
                guard.notify();
                guard.notify_all();
            }
            drop(monitor);
        }
        assert_eq!(live_resources(), before, "backend {backend:?}");
    }
}

#[test]
fn many_coexisting_monitors_are_all_released() {
    let _guard = acquire_test_guard();
    for backend in backends() {
        let before = live_resources();
        let monitors: Vec<Monitor> = (0..64)
            .map(|_| Monitor::with_backend(backend).unwrap())
            .collect();
        assert_eq!(live_resources(), (before.0 + 64, before.1 + 64));
        drop(monitors);
        assert_eq!(live_resources(), before, "backend {backend:?}");
    }
}

#[test]
fn lock_failure_acquires_nothing() {
    let _guard = acquire_test_guard();
    for backend in backends() {
        let before = live_resources();
        inject_init_failure_for_tests(InitStage::Lock, libc::EAGAIN);
        let err = Monitor::with_backend(backend).unwrap_err();
        assert_eq!(err, ResourceInitError::new(InitStage::Lock, libc::EAGAIN));
        assert_eq!(live_resources(), before, "backend {backend:?}");
    }
}

#[test]
fn condition_failure_releases_the_lock() {
    let _guard = acquire_test_guard();
    for backend in backends() {
        let before = live_resources();
        inject_init_failure_for_tests(InitStage::Condition, libc::ENOMEM);
        let err = Monitor::with_backend(backend).unwrap_err();
        assert_eq!(err.stage, InitStage::Condition);
        assert_eq!(err.errno, libc::ENOMEM);
        assert_eq!(live_resources(), before, "backend {backend:?}");
    }
}

#[cfg(unix)]
#[test]
fn condition_attribute_failure_releases_the_lock() {
    let _guard = acquire_test_guard();
    let before = live_resources();
    inject_init_failure_for_tests(InitStage::ConditionAttr, libc::ENOMEM);
    let err = Monitor::with_backend(Backend::Native).unwrap_err();
    assert_eq!(
        err,
        ResourceInitError::new(InitStage::ConditionAttr, libc::ENOMEM)
    );
    assert_eq!(live_resources(), before);
}

#[test]
fn construction_succeeds_after_a_failure() {
    let _guard = acquire_test_guard();
    for backend in backends() {
        let before = live_resources();
        inject_init_failure_for_tests(InitStage::Condition, libc::EAGAIN);
        assert!(Monitor::with_backend(backend).is_err());
        let monitor = Monitor::with_backend(backend).unwrap();
        monitor.lock();
        monitor.unlock();
        drop(monitor);
        assert_eq!(live_resources(), before, "backend {backend:?}");
    }
}

#[test]
fn init_error_message_names_stage_and_errno() {
    let _guard = acquire_test_guard();
    inject_init_failure_for_tests(InitStage::Lock, libc::EAGAIN);
    let err = Monitor::new().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("lock"), "{message}");
    assert!(message.contains(&libc::EAGAIN.to_string()), "{message}");
}

#[test]
fn monitor_destroyed_on_another_thread_releases_resources() {
    let _guard = acquire_test_guard();
    for backend in backends() {
        let before = live_resources();
        let monitor = Monitor::with_backend(backend).unwrap();
        monitor.lock();
        monitor.unlock();
        std::thread::spawn(move || drop(monitor)).join().unwrap();
        assert_eq!(live_resources(), before, "backend {backend:?}");
    }
}
