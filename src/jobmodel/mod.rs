//! C5: Job/Step/Task status aggregation and user-initiated mutations.

pub mod cancel;
pub mod restart;
pub mod rollup;
pub mod skip;

pub use cancel::cancel_job;
pub use restart::restart_job;
pub use rollup::{roll_up_job, roll_up_step};
pub use skip::propagate_skip;
