//! Watcher module for the graceful shutdown state machine
//!
//! Three conceptual states:
//! - Idle: waiting for the stop-state key to announce a stop
//! - Acting: running the graceful shutdown scripts
//! - Stopped: scripts dispatched, nothing left to do

mod machine;

pub use machine::{Delays, ShutdownWatcher};
