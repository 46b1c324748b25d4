//! # monitorkit-core
//!
//! A monitor: one non-reentrant lock paired with one condition variable,
//! created and destroyed together, over per-platform primitives.
//!
//! ```no_run
//! use monitorkit_core::Monitor;
//!
//! let monitor = Monitor::new().expect("monitor resources");
//! let mut ready = false;
//! {
//!     let guard = monitor.synchronized();
//!     ready = true;
//!     guard.notify_all();
//! }
//! assert!(ready);
//! ```
//!
//! Only construction reports a recoverable error ([`ResourceInitError`]).
//! Contract violations and platform primitive failures are fatal: a `fatal`
//! diagnostic is logged and the process aborts.

pub mod clock;
pub mod config;
pub mod contract;
pub mod error;
pub mod log;
pub mod monitor;
pub mod platform;

pub use clock::{Deadline, Timestamp};
pub use config::{LogConfig, init_log_config, log_config};
pub use contract::{
    ContractOutcome, HolderState, MonitorOp, MonitorState, monitor_contract_transition,
};
pub use error::{ContractViolation, FatalError, InitStage, ResourceInitError};
pub use monitor::{Monitor, Synchronized};
pub use platform::Backend;
