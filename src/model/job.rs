//! Job entity: the user-visible work unit (§3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    BadPatch,
    BadBuild,
    BotError,
    Canceled,
    /// Only ever a transient roll-up value for a Step; a Job whose Steps
    /// are *all* skipped is reported as `Canceled` instead (§4.2).
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::BadPatch => "badpatch",
            JobStatus::BadBuild => "badbuild",
            JobStatus::BotError => "boterror",
            JobStatus::Canceled => "canceled",
            JobStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub user: String,
    /// Lower value = higher precedence (niceness).
    pub priority: i32,
    pub status: JobStatus,
    /// Unix timestamp (seconds).
    pub submitted: i64,
    pub ended: Option<i64>,
    pub patch: Option<String>,
}

impl Job {
    /// `(Priority, JobId)` tuple used to rank queued jobs for scheduling (§4.3).
    pub fn rank_key(&self) -> (i32, i64) {
        (self.priority, self.id)
    }
}
