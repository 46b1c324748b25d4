//! POSIX backend: `pthread_mutex_t` (NORMAL, non-reentrant) paired with a
//! `pthread_cond_t` measuring deadlines on [`clock::wait_clock`].
//!
//! Both primitives live in their own heap cell so they never move after
//! initialization.

use std::cell::UnsafeCell;

use crate::clock::{self, ClockSource, Deadline};
use crate::error::{InitStage, ResourceInitError, primitive_failure};
use crate::log_debug;

use super::{
    Backend, PrimitiveError, RawMonitor, WaitStatus, note_acquired, note_released,
    take_injected_failure,
};

fn check(op: &'static str, rc: libc::c_int) -> Result<(), PrimitiveError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(PrimitiveError { op, errno: rc })
    }
}

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

struct PthreadLock {
    raw: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

impl PthreadLock {
    fn new() -> Result<Self, ResourceInitError> {
        if let Some(errno) = take_injected_failure(InitStage::Lock) {
            return Err(ResourceInitError::new(InitStage::Lock, errno));
        }
        let raw = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
        // SAFETY: `raw` is a fresh, heap-pinned mutex; null attributes select
        // the default (NORMAL) type.
        let rc = unsafe { libc::pthread_mutex_init(raw.get(), std::ptr::null()) };
        if rc != 0 {
            return Err(ResourceInitError::new(InitStage::Lock, rc));
        }
        note_acquired(InitStage::Lock);
        Ok(Self { raw })
    }

    fn as_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.raw.get()
    }
}

impl Drop for PthreadLock {
    fn drop(&mut self) {
        // SAFETY: initialized in `new`, destroyed exactly once here.
        let rc = unsafe { libc::pthread_mutex_destroy(self.as_ptr()) };
        note_released(InitStage::Lock);
        if rc != 0 {
            primitive_failure("pthread_mutex_destroy", rc);
        }
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

struct PthreadCondition {
    raw: Box<UnsafeCell<libc::pthread_cond_t>>,
}

impl PthreadCondition {
    fn new() -> Result<Self, ResourceInitError> {
        let mut attr = CondAttr::new()?;
        attr.set_clock(clock::wait_clock())?;

        if let Some(errno) = take_injected_failure(InitStage::Condition) {
            return Err(ResourceInitError::new(InitStage::Condition, errno));
        }
        let raw = Box::new(UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER));
        // SAFETY: `raw` is a fresh, heap-pinned condition; `attr` is initialized.
        let rc = unsafe { libc::pthread_cond_init(raw.get(), attr.as_ptr()) };
        if rc != 0 {
            return Err(ResourceInitError::new(InitStage::Condition, rc));
        }
        note_acquired(InitStage::Condition);
        Ok(Self { raw })
    }

    fn as_ptr(&self) -> *mut libc::pthread_cond_t {
        self.raw.get()
    }
}

impl Drop for PthreadCondition {
    fn drop(&mut self) {
        // SAFETY: initialized in `new`, destroyed exactly once here.
        let rc = unsafe { libc::pthread_cond_destroy(self.as_ptr()) };
        note_released(InitStage::Condition);
        if rc != 0 {
            primitive_failure("pthread_cond_destroy", rc);
        }
    }
}

/// Scoped `pthread_condattr_t`, only needed while the condition is created.
struct CondAttr {
    raw: Box<libc::pthread_condattr_t>,
}

impl CondAttr {
    fn new() -> Result<Self, ResourceInitError> {
        if let Some(errno) = take_injected_failure(InitStage::ConditionAttr) {
            return Err(ResourceInitError::new(InitStage::ConditionAttr, errno));
        }
        // SAFETY: pthread_condattr_t is plain old data until initialized below.
        let mut raw: Box<libc::pthread_condattr_t> = Box::new(unsafe { std::mem::zeroed() });
        // SAFETY: `raw` is a valid, heap-pinned out-pointer.
        let rc = unsafe { libc::pthread_condattr_init(&mut *raw) };
        if rc != 0 {
            return Err(ResourceInitError::new(InitStage::ConditionAttr, rc));
        }
        Ok(Self { raw })
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn set_clock(&mut self, source: ClockSource) -> Result<(), ResourceInitError> {
        // SAFETY: `self.raw` was initialized in `new`.
        let rc =
            unsafe { libc::pthread_condattr_setclock(&mut *self.raw, clock::clock_id(source)) };
        if rc != 0 {
            return Err(ResourceInitError::new(InitStage::ConditionAttr, rc));
        }
        Ok(())
    }

    // Without pthread_condattr_setclock the condition keeps its default
    // CLOCK_REALTIME, which is what wait_clock() reports on these targets.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn set_clock(&mut self, source: ClockSource) -> Result<(), ResourceInitError> {
        debug_assert_eq!(source, ClockSource::Realtime);
        Ok(())
    }

    fn as_ptr(&self) -> *const libc::pthread_condattr_t {
        &*self.raw
    }
}

impl Drop for CondAttr {
    fn drop(&mut self) {
        // SAFETY: initialized in `new`. The attribute is not referenced by the
        // condition after pthread_cond_init returns.
        let rc = unsafe { libc::pthread_condattr_destroy(&mut *self.raw) };
        if rc != 0 {
            log_debug!("pthread_condattr_destroy returned {rc}");
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Lock + condition pair. Field order is drop order: condition, then lock.
pub(crate) struct PthreadMonitor {
    cond: PthreadCondition,
    lock: PthreadLock,
}

// SAFETY: the pthread primitives are designed for cross-thread use and are
// only reached through their heap cells, which never move.
unsafe impl Send for PthreadMonitor {}
// SAFETY: as above; all mutation goes through the pthread API.
unsafe impl Sync for PthreadMonitor {}

impl PthreadMonitor {
    /// Lock first, then condition. A condition failure drops the lock before
    /// the error propagates.
    pub(crate) fn new() -> Result<Self, ResourceInitError> {
        let lock = PthreadLock::new()?;
        let cond = PthreadCondition::new()?;
        Ok(Self { cond, lock })
    }
}

impl RawMonitor for PthreadMonitor {
    fn backend(&self) -> Backend {
        Backend::Native
    }

    fn lock(&self) -> Result<(), PrimitiveError> {
        // SAFETY: the mutex is initialized for the lifetime of `self`.
        check("pthread_mutex_lock", unsafe {
            libc::pthread_mutex_lock(self.lock.as_ptr())
        })
    }

    unsafe fn unlock(&self) -> Result<(), PrimitiveError> {
        // SAFETY: caller holds the mutex.
        check("pthread_mutex_unlock", unsafe {
            libc::pthread_mutex_unlock(self.lock.as_ptr())
        })
    }

    unsafe fn wait(&self, deadline: Option<Deadline>) -> Result<WaitStatus, PrimitiveError> {
        match deadline {
            None => {
                // SAFETY: caller holds the mutex; both primitives are initialized.
                let rc =
                    unsafe { libc::pthread_cond_wait(self.cond.as_ptr(), self.lock.as_ptr()) };
                check("pthread_cond_wait", rc).map(|()| WaitStatus::Woken)
            }
            Some(deadline) => {
                let abstime = deadline.to_timespec();
                // SAFETY: caller holds the mutex; `abstime` outlives the call.
                let rc = unsafe {
                    libc::pthread_cond_timedwait(
                        self.cond.as_ptr(),
                        self.lock.as_ptr(),
                        &abstime,
                    )
                };
                match rc {
                    0 => Ok(WaitStatus::Woken),
                    libc::ETIMEDOUT => Ok(WaitStatus::TimedOut),
                    errno => Err(PrimitiveError {
                        op: "pthread_cond_timedwait",
                        errno,
                    }),
                }
            }
        }
    }

    unsafe fn notify_one(&self) -> Result<(), PrimitiveError> {
        // SAFETY: the condition is initialized for the lifetime of `self`.
        check("pthread_cond_signal", unsafe {
            libc::pthread_cond_signal(self.cond.as_ptr())
        })
    }

    unsafe fn notify_all(&self) -> Result<(), PrimitiveError> {
        // SAFETY: the condition is initialized for the lifetime of `self`.
        check("pthread_cond_broadcast", unsafe {
            libc::pthread_cond_broadcast(self.cond.as_ptr())
        })
    }
}
