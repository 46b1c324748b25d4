//! Portable backend built on `parking_lot`.
//!
//! The monitor lock is a flag inside a `parking_lot::Mutex`-guarded state
//! block; threads blocked on it park on `lock_cv`. Each waiter registers a
//! ticket in a FIFO and parks on `cond_cv`. A notify moves tickets from the
//! FIFO to the signaled set: `notify_one` the oldest, `notify_all` every
//! registered one. A waiter returns woken only when its own ticket was
//! signaled, so a thread that starts waiting after a notify can never take a
//! wake meant for a waiter registered before it.
//!
//! Releasing the monitor lock and registering happen under the same internal
//! mutex as notifies, so a notify can never slip between the two.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::clock::{self, Deadline};
use crate::error::{InitStage, ResourceInitError};

use super::{
    Backend, PrimitiveError, RawMonitor, WaitStatus, note_acquired, note_released,
    take_injected_failure,
};

#[derive(Debug, Default)]
struct State {
    locked: bool,
    next_ticket: u64,
    /// Registered waiters not yet selected by a notify, oldest first.
    queued: VecDeque<u64>,
    /// Waiters selected by a notify that have not yet returned.
    signaled: Vec<u64>,
}

impl State {
    fn take_signal(&mut self, ticket: u64) -> bool {
        match self.signaled.iter().position(|&t| t == ticket) {
            Some(pos) => {
                self.signaled.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    fn dequeue(&mut self, ticket: u64) {
        if let Some(pos) = self.queued.iter().position(|&t| t == ticket) {
            self.queued.remove(pos);
        }
    }
}

/// Lock half. Owns the live-resource accounting for the lock.
struct LockPart;

impl LockPart {
    fn new() -> Result<Self, ResourceInitError> {
        if let Some(errno) = take_injected_failure(InitStage::Lock) {
            return Err(ResourceInitError::new(InitStage::Lock, errno));
        }
        note_acquired(InitStage::Lock);
        Ok(Self)
    }
}

impl Drop for LockPart {
    fn drop(&mut self) {
        note_released(InitStage::Lock);
    }
}

/// Condition half. Owns the live-resource accounting for the condition.
struct ConditionPart;

impl ConditionPart {
    fn new() -> Result<Self, ResourceInitError> {
        if let Some(errno) = take_injected_failure(InitStage::Condition) {
            return Err(ResourceInitError::new(InitStage::Condition, errno));
        }
        note_acquired(InitStage::Condition);
        Ok(Self)
    }
}

impl Drop for ConditionPart {
    fn drop(&mut self) {
        note_released(InitStage::Condition);
    }
}

pub(crate) struct PortableMonitor {
    state: Mutex<State>,
    lock_cv: Condvar,
    cond_cv: Condvar,
    // Drop order: condition, then lock.
    _cond: ConditionPart,
    _lock: LockPart,
}

impl PortableMonitor {
    pub(crate) fn new() -> Result<Self, ResourceInitError> {
        let lock = LockPart::new()?;
        let cond = ConditionPart::new()?;
        Ok(Self {
            state: Mutex::new(State::default()),
            lock_cv: Condvar::new(),
            cond_cv: Condvar::new(),
            _cond: cond,
            _lock: lock,
        })
    }

    /// `(locked, queued waiters, signaled waiters)`.
    #[cfg(test)]
    fn snapshot(&self) -> (bool, usize, usize) {
        let state = self.state.lock();
        (state.locked, state.queued.len(), state.signaled.len())
    }
}

impl RawMonitor for PortableMonitor {
    fn backend(&self) -> Backend {
        Backend::Portable
    }

    fn lock(&self) -> Result<(), PrimitiveError> {
        let mut state = self.state.lock();
        while state.locked {
            self.lock_cv.wait(&mut state);
        }
        state.locked = true;
        Ok(())
    }

    unsafe fn unlock(&self) -> Result<(), PrimitiveError> {
        let mut state = self.state.lock();
        if !state.locked {
            return Err(PrimitiveError {
                op: "portable_unlock",
                errno: libc::EPERM,
            });
        }
        state.locked = false;
        drop(state);
        self.lock_cv.notify_one();
        Ok(())
    }

    unsafe fn wait(&self, deadline: Option<Deadline>) -> Result<WaitStatus, PrimitiveError> {
        let mut state = self.state.lock();
        if !state.locked {
            return Err(PrimitiveError {
                op: "portable_wait",
                errno: libc::EPERM,
            });
        }

        // Register and release the monitor lock, atomically w.r.t. notifiers.
        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.queued.push_back(ticket);
        state.locked = false;
        self.lock_cv.notify_one();

        let status = loop {
            if state.take_signal(ticket) {
                break WaitStatus::Woken;
            }
            match deadline {
                None => self.cond_cv.wait(&mut state),
                Some(deadline) => {
                    let now = clock::now();
                    if deadline.has_passed(now) {
                        state.dequeue(ticket);
                        break WaitStatus::TimedOut;
                    }
                    // A timeout here is re-checked against the wait clock above.
                    let _ = self.cond_cv.wait_for(&mut state, deadline.remaining(now));
                }
            }
        };

        while state.locked {
            self.lock_cv.wait(&mut state);
        }
        state.locked = true;
        Ok(status)
    }

    unsafe fn notify_one(&self) -> Result<(), PrimitiveError> {
        let mut state = self.state.lock();
        if let Some(ticket) = state.queued.pop_front() {
            state.signaled.push(ticket);
            // The parked thread owning `ticket` is not addressable on its own.
            self.cond_cv.notify_all();
        }
        Ok(())
    }

    unsafe fn notify_all(&self) -> Result<(), PrimitiveError> {
        let mut state = self.state.lock();
        if !state.queued.is_empty() {
            let State {
                queued, signaled, ..
            } = &mut *state;
            signaled.extend(queued.drain(..));
            self.cond_cv.notify_all();
        }
        Ok(())
    }
}
