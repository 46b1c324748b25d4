//! Monitor calling-convention contract.
//!
//! Deterministic transition table over the monitor lifecycle
//! (`Uninitialized → Initialized → Destroyed`) and the calling thread's
//! relation to the lock (`NotHolding`, `Holding`, `Waiting`). The monitor
//! consults the `Initialized` rows before each operation and on drop; an
//! outcome carrying a [`ContractViolation`] is routed to the fatal path.
//!
//! A live `Monitor` is always `Initialized`, so the `Uninitialized` and
//! `Destroyed` rows and [`MonitorOp::Wake`] are never reached at runtime.
//! They complete the lifecycle and are checked cell by cell in
//! `tests/monitor_contract_matrix_test.rs`.

use crate::error::ContractViolation;

/// Lifecycle of a single monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorState {
    /// Resources have not been acquired.
    Uninitialized,
    /// Lock and condition are both live.
    Initialized,
    /// Lock and condition have been released.
    Destroyed,
}

/// The calling thread's relation to the monitor's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderState {
    NotHolding,
    Holding,
    /// Lock released, registered with the condition, blocked.
    Waiting,
}

/// Operations a thread can apply to a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorOp {
    Construct,
    Destroy,
    Lock,
    Unlock,
    Wait,
    Notify,
    NotifyAll,
    /// A waiter is released by a notify or by its deadline and has
    /// re-acquired the lock.
    Wake,
}

impl MonitorOp {
    /// Every operation, in table order.
    pub const ALL: [Self; 8] = [
        Self::Construct,
        Self::Destroy,
        Self::Lock,
        Self::Unlock,
        Self::Wait,
        Self::Notify,
        Self::NotifyAll,
        Self::Wake,
    ];
}

/// Deterministic transition result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractOutcome {
    pub next_state: MonitorState,
    pub next_holder: HolderState,
    /// Whether the operation may block awaiting progress by another thread.
    pub blocks: bool,
    /// Set when the operation breaks the calling convention. The state and
    /// holder are left unchanged.
    pub violation: Option<ContractViolation>,
}

impl ContractOutcome {
    const fn ok(next_state: MonitorState, next_holder: HolderState, blocks: bool) -> Self {
        Self {
            next_state,
            next_holder,
            blocks,
            violation: None,
        }
    }

    const fn violation(
        state: MonitorState,
        holder: HolderState,
        violation: ContractViolation,
    ) -> Self {
        Self {
            next_state: state,
            next_holder: holder,
            blocks: false,
            violation: Some(violation),
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.violation.is_none()
    }
}

/// Contract transition for `op` applied by a thread in `holder` relation to a
/// monitor in `state`.
///
/// A second `Lock` from the holder is not a violation: the lock is
/// non-reentrant and the call deadlocks, which the outcome reports as
/// blocking while still holding.
#[must_use]
pub const fn monitor_contract_transition(
    state: MonitorState,
    holder: HolderState,
    op: MonitorOp,
) -> ContractOutcome {
    use ContractViolation as V;
    use HolderState::{Holding, NotHolding, Waiting};
    use MonitorState::{Destroyed, Initialized, Uninitialized};

    match state {
        Uninitialized => match op {
            MonitorOp::Construct => ContractOutcome::ok(Initialized, NotHolding, false),
            _ => ContractOutcome::violation(state, holder, V::NotInitialized),
        },
        Destroyed => match op {
            MonitorOp::Destroy => ContractOutcome::violation(state, holder, V::DoubleDestroy),
            MonitorOp::Construct => ContractOutcome::violation(state, holder, V::DoubleInit),
            _ => ContractOutcome::violation(state, holder, V::NotInitialized),
        },
        Initialized => match (holder, op) {
            (_, MonitorOp::Construct) => ContractOutcome::violation(state, holder, V::DoubleInit),

            (NotHolding, MonitorOp::Destroy) => ContractOutcome::ok(Destroyed, NotHolding, false),
            (NotHolding, MonitorOp::Lock) => ContractOutcome::ok(Initialized, Holding, true),
            (NotHolding, MonitorOp::Unlock) => {
                ContractOutcome::violation(state, holder, V::UnlockWithoutLock)
            }
            (NotHolding, MonitorOp::Wait) => {
                ContractOutcome::violation(state, holder, V::WaitWithoutLock)
            }
            (NotHolding, MonitorOp::Notify) => {
                ContractOutcome::violation(state, holder, V::NotifyWithoutLock)
            }
            (NotHolding, MonitorOp::NotifyAll) => {
                ContractOutcome::violation(state, holder, V::NotifyAllWithoutLock)
            }
            (NotHolding, MonitorOp::Wake) => {
                ContractOutcome::violation(state, holder, V::WaitWithoutLock)
            }

            (Holding, MonitorOp::Destroy) => {
                ContractOutcome::violation(state, holder, V::DestroyWhileHeld)
            }
            (Holding, MonitorOp::Lock) => ContractOutcome::ok(Initialized, Holding, true),
            (Holding, MonitorOp::Unlock) => ContractOutcome::ok(Initialized, NotHolding, false),
            (Holding, MonitorOp::Wait) => ContractOutcome::ok(Initialized, Waiting, true),
            (Holding, MonitorOp::Notify | MonitorOp::NotifyAll) => {
                ContractOutcome::ok(Initialized, Holding, false)
            }
            (Holding, MonitorOp::Wake) => {
                ContractOutcome::violation(state, holder, V::WaitWithoutLock)
            }

            // A blocked waiter cannot issue calls; only its release applies.
            (Waiting, MonitorOp::Wake) => ContractOutcome::ok(Initialized, Holding, true),
            (Waiting, MonitorOp::Destroy) => {
                ContractOutcome::violation(state, holder, V::DestroyWhileHeld)
            }
            (Waiting, MonitorOp::Lock) => ContractOutcome::ok(Initialized, Waiting, true),
            (Waiting, MonitorOp::Unlock) => {
                ContractOutcome::violation(state, holder, V::UnlockWithoutLock)
            }
            (Waiting, MonitorOp::Wait) => {
                ContractOutcome::violation(state, holder, V::WaitWithoutLock)
            }
            (Waiting, MonitorOp::Notify) => {
                ContractOutcome::violation(state, holder, V::NotifyWithoutLock)
            }
            (Waiting, MonitorOp::NotifyAll) => {
                ContractOutcome::violation(state, holder, V::NotifyAllWithoutLock)
            }
        },
    }
}
