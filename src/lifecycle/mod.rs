//! C4: per-VM lifecycle manager — transitions, child supervision, recovery.
//!
//! Unlike the teacher's `flow::Flow` trait (where one process drives a
//! multi-tick state machine via an in-process event loop because each
//! step is cheap and local), here every VM operation runs in its own OS
//! process per §5 ("each supervised VM operation runs in its own OS
//! process"). The engine's job is therefore narrower: spawn the
//! supervised child with the right initial status (`operations::run_*`),
//! and on every tick reconcile what it finds against what a live child
//! should look like (`recovery::run_recovery`). The child's own
//! sequential work (revert → wait-agent → settle, or hard power-off)
//! lives in `worker`, and runs only inside the re-exec'd process.

pub mod operations;
pub mod recovery;
pub mod worker;

pub use operations::{run_check_idle, run_check_off, run_monitor, run_power_off, run_revert};
pub use recovery::run_recovery;
