//! Task entity: one execution of a Step on one VM (§3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    BadPatch,
    BadBuild,
    BotError,
    Canceled,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }

    /// Status-significance precedence for roll-up (§4.2), most significant
    /// first. Higher index = more significant.
    fn precedence_rank(self) -> u8 {
        match self {
            TaskStatus::Running => 7,
            TaskStatus::BotError => 6,
            TaskStatus::BadPatch => 5,
            TaskStatus::BadBuild => 4,
            TaskStatus::Canceled => 3,
            TaskStatus::Skipped => 2,
            TaskStatus::Completed => 1,
            TaskStatus::Queued => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::BadPatch => "badpatch",
            TaskStatus::BadBuild => "badbuild",
            TaskStatus::BotError => "boterror",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Skipped => "skipped",
        }
    }
}

/// Ordered precedence used by `most_significant` (§4.2): `running >
/// boterror > badpatch > badbuild > canceled > skipped > completed > queued`.
pub fn most_significant(statuses: impl Iterator<Item = TaskStatus>) -> Option<TaskStatus> {
    statuses.max_by_key(|s| s.precedence_rank())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub job_id: i64,
    pub step_no: i32,
    pub no: i32,
    pub vm: String,
    pub status: TaskStatus,
    /// Seconds.
    pub timeout: u64,
    pub cmd_line_arg: Option<String>,
    pub started: Option<i64>,
    pub ended: Option<i64>,
    /// Doubles as the transient-error retry counter (§3, §7).
    pub test_failures: u32,
}

impl Task {
    pub fn key(&self) -> (i64, i32, i32) {
        (self.job_id, self.step_no, self.no)
    }

    pub fn has_started(&self) -> bool {
        self.started.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_order() {
        let statuses = [
            TaskStatus::Completed,
            TaskStatus::Queued,
            TaskStatus::BotError,
            TaskStatus::Skipped,
        ];
        assert_eq!(
            most_significant(statuses.into_iter()),
            Some(TaskStatus::BotError)
        );
    }

    #[test]
    fn running_beats_everything() {
        let statuses = [TaskStatus::Running, TaskStatus::BadPatch, TaskStatus::BadBuild];
        assert_eq!(most_significant(statuses.into_iter()), Some(TaskStatus::Running));
    }

    #[test]
    fn empty_iterator_yields_none() {
        assert_eq!(most_significant(std::iter::empty()), None);
    }
}
