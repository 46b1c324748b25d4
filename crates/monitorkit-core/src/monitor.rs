//! The [`Monitor`]: one lock and one condition, created and destroyed together.
//!
//! Calling convention: `wait`, `notify`, `notify_all` and `unlock` require the
//! calling thread to hold the lock. Each monitor keeps an owner-thread tag
//! that is checked against [`monitor_contract_transition`] before the platform
//! primitive is touched; a violation is fatal in every build profile.
//!
//! The lock is not reentrant. A second [`Monitor::lock`] from the holder
//! deadlocks; this is the documented behavior, not a detected error.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock;
use crate::contract::{HolderState, MonitorOp, MonitorState, monitor_contract_transition};
use crate::error::{ContractViolation, FatalError, ResourceInitError, fatal, primitive_failure};
use crate::log_debug;
use crate::platform::{self, Backend, PrimitiveError, RawMonitor, WaitStatus};

// ---------------------------------------------------------------------------
// Thread tokens
// ---------------------------------------------------------------------------

const NO_OWNER: u64 = 0;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(NO_OWNER) };
}

/// Non-zero id unique to the calling thread for the life of the process.
fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|slot| {
        let existing = slot.get();
        if existing != NO_OWNER {
            return existing;
        }
        let fresh = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
        slot.set(fresh);
        fresh
    })
}

#[track_caller]
fn expect_primitive<T>(result: Result<T, PrimitiveError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => primitive_failure(err.op, err.errno),
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Mutual-exclusion lock paired with a condition variable.
///
/// Share it between threads by reference or `Arc`. The monitor does not own
/// the data it protects; callers access that data only while holding the lock
/// and re-check their predicate in a loop around [`Monitor::wait`], since a
/// wait may return spuriously.
pub struct Monitor {
    raw: Box<dyn RawMonitor>,
    /// Token of the holding thread, [`NO_OWNER`] when free or while the
    /// holder is blocked in `wait`. Only the holder writes a non-zero value.
    owner: AtomicU64,
}

impl Monitor {
    /// Acquire a lock and condition from the native backend.
    pub fn new() -> Result<Self, ResourceInitError> {
        Self::with_backend(Backend::Native)
    }

    /// Acquire a lock and condition from `backend`.
    ///
    /// On failure, any resource already acquired has been released.
    pub fn with_backend(backend: Backend) -> Result<Self, ResourceInitError> {
        let raw = platform::create(backend).inspect_err(|err| {
            log_debug!("monitor construction on {} backend failed: {err}", backend.as_str());
        })?;
        Ok(Self {
            raw,
            owner: AtomicU64::new(NO_OWNER),
        })
    }

    /// Backend the lock and condition were acquired from.
    #[must_use]
    pub fn backend(&self) -> Backend {
        self.raw.backend()
    }

    /// True when the calling thread holds the lock.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_thread_token()
    }

    fn holder_state(&self) -> HolderState {
        if self.is_held_by_current_thread() {
            HolderState::Holding
        } else {
            HolderState::NotHolding
        }
    }

    #[track_caller]
    fn enforce(&self, op: MonitorOp) {
        let outcome = monitor_contract_transition(MonitorState::Initialized, self.holder_state(), op);
        if let Some(violation) = outcome.violation {
            fatal(FatalError::ContractViolation(violation));
        }
    }

    /// Block until the calling thread holds the lock.
    ///
    /// Must not be called by the current holder: the lock is not reentrant
    /// and the call deadlocks.
    #[track_caller]
    pub fn lock(&self) {
        self.enforce(MonitorOp::Lock);
        expect_primitive(self.raw.lock());
        self.owner.store(current_thread_token(), Ordering::Relaxed);
    }

    /// Release the lock. Fatal if the calling thread does not hold it.
    #[track_caller]
    pub fn unlock(&self) {
        self.enforce(MonitorOp::Unlock);
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        // SAFETY: `enforce` verified the calling thread holds the lock.
        expect_primitive(unsafe { self.raw.unlock() });
    }

    /// Release the lock, block until notified or until `timeout_ms`
    /// milliseconds pass, then re-acquire the lock before returning.
    ///
    /// `timeout_ms == 0` waits without a deadline. The deadline is fixed when
    /// this call begins; the call never returns before it unless woken. A
    /// return does not imply a notify: re-check the predicate. Fatal if the
    /// calling thread does not hold the lock or `timeout_ms` is negative.
    #[track_caller]
    pub fn wait(&self, timeout_ms: i64) {
        self.enforce(MonitorOp::Wait);
        let Ok(relative_ms) = u64::try_from(timeout_ms) else {
            fatal(FatalError::ContractViolation(
                ContractViolation::NegativeTimeout { timeout_ms },
            ));
        };
        let deadline =
            (relative_ms > 0).then(|| clock::to_absolute_deadline(clock::now(), relative_ms));

        self.owner.store(NO_OWNER, Ordering::Relaxed);
        loop {
            // SAFETY: `enforce` verified the calling thread holds the lock;
            // each platform wait returns with it re-acquired.
            let status = expect_primitive(unsafe { self.raw.wait(deadline) });
            match (status, deadline) {
                (WaitStatus::Woken, _) | (WaitStatus::TimedOut, None) => break,
                (WaitStatus::TimedOut, Some(deadline)) => {
                    // Some platforms report the timeout slightly before the
                    // wait clock reaches the deadline.
                    if deadline.has_passed(clock::now()) {
                        break;
                    }
                }
            }
        }
        self.owner.store(current_thread_token(), Ordering::Relaxed);
    }

    /// `wait(0)`: block until notified (or spuriously woken).
    #[track_caller]
    pub fn wait_forever(&self) {
        self.wait(0);
    }

    /// Wake at least one waiter, if any. Not remembered when none is waiting.
    #[track_caller]
    pub fn notify(&self) {
        self.enforce(MonitorOp::Notify);
        // SAFETY: `enforce` verified the calling thread holds the lock.
        expect_primitive(unsafe { self.raw.notify_one() });
    }

    /// Wake every current waiter. They re-acquire the lock one at a time, in
    /// no particular order.
    #[track_caller]
    pub fn notify_all(&self) {
        self.enforce(MonitorOp::NotifyAll);
        // SAFETY: `enforce` verified the calling thread holds the lock.
        expect_primitive(unsafe { self.raw.notify_all() });
    }

    /// Lock and return a guard that unlocks when dropped.
    #[track_caller]
    #[must_use = "dropping the guard unlocks the monitor immediately"]
    pub fn synchronized(&self) -> Synchronized<'_> {
        self.lock();
        Synchronized {
            monitor: self,
            _not_send: PhantomData,
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        // Exclusive access: any non-zero owner means the lock is still held,
        // by this thread or by one that never unlocked.
        let holder = if self.owner.load(Ordering::Relaxed) == NO_OWNER {
            HolderState::NotHolding
        } else {
            HolderState::Holding
        };
        let outcome =
            monitor_contract_transition(MonitorState::Initialized, holder, MonitorOp::Destroy);
        if let Some(violation) = outcome.violation {
            fatal(FatalError::ContractViolation(violation));
        }
        // `raw` drops next: condition first, then lock.
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("backend", &self.backend())
            .field("held", &(self.owner.load(Ordering::Relaxed) != NO_OWNER))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Scoped guard
// ---------------------------------------------------------------------------

/// Holds a [`Monitor`]'s lock for its lifetime.
///
/// Not `Send`: the lock must be released by the thread that took it.
pub struct Synchronized<'a> {
    monitor: &'a Monitor,
    _not_send: PhantomData<*const ()>,
}

impl Synchronized<'_> {
    /// See [`Monitor::wait`].
    #[track_caller]
    pub fn wait(&self, timeout_ms: i64) {
        self.monitor.wait(timeout_ms);
    }

    /// See [`Monitor::wait_forever`].
    #[track_caller]
    pub fn wait_forever(&self) {
        self.monitor.wait(0);
    }

    /// See [`Monitor::notify`].
    #[track_caller]
    pub fn notify(&self) {
        self.monitor.notify();
    }

    /// See [`Monitor::notify_all`].
    #[track_caller]
    pub fn notify_all(&self) {
        self.monitor.notify_all();
    }

    #[must_use]
    pub fn monitor(&self) -> &Monitor {
        self.monitor
    }
}

impl Drop for Synchronized<'_> {
    fn drop(&mut self) {
        self.monitor.unlock();
    }
}

impl fmt::Debug for Synchronized<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronized")
            .field("monitor", self.monitor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;

    fn backends() -> [Backend; 2] {
        [Backend::Native, Backend::Portable]
    }

    #[test]
    fn thread_tokens_are_distinct_and_stable() {
        let mine = current_thread_token();
        assert_eq!(mine, current_thread_token());
        let other = std::thread::spawn(current_thread_token).join().unwrap();
        assert_ne!(mine, other);
        assert_ne!(other, NO_OWNER);
    }

    #[test]
    fn owner_tag_follows_lock_and_unlock() {
        for backend in backends() {
            let monitor = Monitor::with_backend(backend).unwrap();
            assert_eq!(monitor.backend(), backend);
            assert!(!monitor.is_held_by_current_thread());
            monitor.lock();
            assert!(monitor.is_held_by_current_thread());
            monitor.unlock();
            assert!(!monitor.is_held_by_current_thread());
        }
    }

    #[test]
    fn holder_is_not_another_thread() {
        let monitor = Arc::new(Monitor::new().unwrap());
        monitor.lock();
        let seen_by_other = {
            let monitor = Arc::clone(&monitor);
            std::thread::spawn(move || monitor.is_held_by_current_thread())
                .join()
                .unwrap()
        };
        assert!(!seen_by_other);
        monitor.unlock();
    }

    #[test]
    fn guard_unlocks_on_drop() {
        for backend in backends() {
            let monitor = Monitor::with_backend(backend).unwrap();
            {
                let guard = monitor.synchronized();
                assert!(guard.monitor().is_held_by_current_thread());
                guard.notify();
                guard.notify_all();
            }
            assert!(!monitor.is_held_by_current_thread());
        }
    }

    #[test]
    fn timed_wait_keeps_lock_on_return() {
        for backend in backends() {
            let monitor = Monitor::with_backend(backend).unwrap();
            let guard = monitor.synchronized();
            let start = Instant::now();
            guard.wait(10);
            assert!(start.elapsed() >= Duration::from_millis(10));
            assert!(monitor.is_held_by_current_thread());
        }
    }

    #[test]
    fn debug_reports_backend_and_hold_state() {
        let monitor = Monitor::with_backend(Backend::Portable).unwrap();
        let guard = monitor.synchronized();
        let rendered = format!("{guard:?}");
        assert!(rendered.contains("Portable"), "{rendered}");
        assert!(rendered.contains("held: true"), "{rendered}");
    }
}
