//! Step entity: a phase of a Job (§3).

use serde::{Deserialize, Serialize};

use super::job::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepType {
    Suite,
    Single,
    Build,
    Reconfig,
}

impl StepType {
    /// Build/reconfig steps propagate failure downstream as `skipped` (§4.2).
    pub fn propagates_skip_on_failure(self) -> bool {
        matches!(self, StepType::Build | StepType::Reconfig)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub job_id: i64,
    pub no: i32,
    /// Strictly less than `no` — enforces a DAG (§3).
    pub previous_no: Option<i32>,
    pub status: JobStatus,
    pub step_type: StepType,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub in_staging: bool,
    pub debug_level: i32,
    pub report_successful_tests: bool,
}

impl Step {
    pub fn key(&self) -> (i64, i32) {
        (self.job_id, self.no)
    }
}
