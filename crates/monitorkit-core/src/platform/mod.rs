//! Platform abstraction over the lock and condition primitives.
//!
//! [`RawMonitor`] is the capability set {acquire, release, wait-with-deadline,
//! signal-one, signal-all}. Each backend owns one lock and one condition built
//! as separate RAII parts, so a construction that fails half-way releases only
//! what it acquired.
//!
//! Test hooks:
//! - [`live_resources`]: process-wide count of initialized locks and conditions.
//! - [`inject_init_failure_for_tests`]: force the next init of a stage on the
//!   current thread to fail.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::clock::Deadline;
use crate::error::{InitStage, ResourceInitError};

pub(crate) mod portable;
#[cfg(unix)]
pub(crate) mod pthread;

/// Which primitive implementation a monitor is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// The target's OS primitives: pthreads on unix, [`Backend::Portable`] elsewhere.
    #[default]
    Native,
    /// Pure Rust over `parking_lot`, available on every target.
    Portable,
}

impl Backend {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "native" | "os" | "pthread" => Some(Self::Native),
            "portable" | "parking_lot" | "parking-lot" => Some(Self::Portable),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Portable => "portable",
        }
    }
}

/// Outcome of one platform wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Returned before the deadline: signaled, or spuriously.
    Woken,
    /// The platform reported the deadline as reached.
    TimedOut,
}

/// A platform call that failed after successful initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveError {
    pub op: &'static str,
    pub errno: i32,
}

/// Paired lock + condition capability.
///
/// The lock is non-reentrant. Implementations must release the lock and
/// register as a waiter atomically inside [`RawMonitor::wait`].
pub trait RawMonitor: Send + Sync {
    fn backend(&self) -> Backend;

    /// Block until the calling thread holds the lock.
    fn lock(&self) -> Result<(), PrimitiveError>;

    /// # Safety
    ///
    /// The calling thread must hold the lock.
    unsafe fn unlock(&self) -> Result<(), PrimitiveError>;

    /// Release the lock, block until notified or `deadline`, re-acquire.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock.
    unsafe fn wait(&self, deadline: Option<Deadline>) -> Result<WaitStatus, PrimitiveError>;

    /// # Safety
    ///
    /// The calling thread must hold the lock.
    unsafe fn notify_one(&self) -> Result<(), PrimitiveError>;

    /// # Safety
    ///
    /// The calling thread must hold the lock.
    unsafe fn notify_all(&self) -> Result<(), PrimitiveError>;
}

/// Acquire a lock and condition from `backend`.
pub(crate) fn create(backend: Backend) -> Result<Box<dyn RawMonitor>, ResourceInitError> {
    match backend {
        #[cfg(unix)]
        Backend::Native => Ok(Box::new(pthread::PthreadMonitor::new()?)),
        #[cfg(not(unix))]
        Backend::Native => Ok(Box::new(portable::PortableMonitor::new()?)),
        Backend::Portable => Ok(Box::new(portable::PortableMonitor::new()?)),
    }
}

// ---------------------------------------------------------------------------
// Live resource counters
// ---------------------------------------------------------------------------

static LIVE_LOCKS: AtomicUsize = AtomicUsize::new(0);
static LIVE_CONDITIONS: AtomicUsize = AtomicUsize::new(0);

/// Snapshot of `(live locks, live conditions)` across every backend.
#[must_use]
pub fn live_resources() -> (usize, usize) {
    (
        LIVE_LOCKS.load(Ordering::Acquire),
        LIVE_CONDITIONS.load(Ordering::Acquire),
    )
}

pub(crate) fn note_acquired(stage: InitStage) {
    match stage {
        InitStage::Lock => LIVE_LOCKS.fetch_add(1, Ordering::AcqRel),
        InitStage::Condition => LIVE_CONDITIONS.fetch_add(1, Ordering::AcqRel),
        InitStage::ConditionAttr => return,
    };
}

pub(crate) fn note_released(stage: InitStage) {
    match stage {
        InitStage::Lock => LIVE_LOCKS.fetch_sub(1, Ordering::AcqRel),
        InitStage::Condition => LIVE_CONDITIONS.fetch_sub(1, Ordering::AcqRel),
        InitStage::ConditionAttr => return,
    };
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

thread_local! {
    static INJECTED_FAILURE: Cell<Option<(InitStage, i32)>> = const { Cell::new(None) };
}

/// Test hook: make the next initialization of `stage` on this thread fail
/// with `errno`. One-shot; other threads are unaffected.
#[doc(hidden)]
pub fn inject_init_failure_for_tests(stage: InitStage, errno: i32) {
    INJECTED_FAILURE.with(|slot| slot.set(Some((stage, errno))));
}

/// Test hook: drop any pending injected failure on this thread.
#[doc(hidden)]
pub fn clear_injected_failure_for_tests() {
    INJECTED_FAILURE.with(|slot| slot.set(None));
}

/// Consume a pending injected failure for `stage`.
pub(crate) fn take_injected_failure(stage: InitStage) -> Option<i32> {
    INJECTED_FAILURE.with(|slot| match slot.get() {
        Some((pending, errno)) if pending == stage => {
            slot.set(None);
            Some(errno)
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parse() {
        assert_eq!(Backend::from_str_loose("native"), Some(Backend::Native));
        assert_eq!(Backend::from_str_loose("PTHREAD"), Some(Backend::Native));
        assert_eq!(Backend::from_str_loose("portable"), Some(Backend::Portable));
        assert_eq!(
            Backend::from_str_loose("parking_lot"),
            Some(Backend::Portable)
        );
        assert_eq!(Backend::from_str_loose("futex"), None);
        assert_eq!(Backend::default(), Backend::Native);
    }

    #[test]
    fn injected_failure_is_one_shot_and_stage_specific() {
        inject_init_failure_for_tests(InitStage::Condition, libc::ENOMEM);
        assert_eq!(take_injected_failure(InitStage::Lock), None);
        assert_eq!(
            take_injected_failure(InitStage::Condition),
            Some(libc::ENOMEM)
        );
        assert_eq!(take_injected_failure(InitStage::Condition), None);
    }

    #[test]
    fn injected_failure_does_not_leak_across_threads() {
        inject_init_failure_for_tests(InitStage::Lock, libc::EAGAIN);
        let other = std::thread::spawn(|| take_injected_failure(InitStage::Lock))
            .join()
            .unwrap();
        assert_eq!(other, None);
        clear_injected_failure_for_tests();
        assert_eq!(take_injected_failure(InitStage::Lock), None);
    }
}
