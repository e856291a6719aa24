//! Status roll-up (§4.2): Task → Step → Job.

use crate::model::{JobStatus, Step, Task, TaskStatus};

fn task_to_job_status(s: TaskStatus) -> JobStatus {
    match s {
        TaskStatus::Queued => JobStatus::Queued,
        TaskStatus::Running => JobStatus::Running,
        TaskStatus::Completed => JobStatus::Completed,
        TaskStatus::BadPatch => JobStatus::BadPatch,
        TaskStatus::BadBuild => JobStatus::BadBuild,
        TaskStatus::BotError => JobStatus::BotError,
        TaskStatus::Canceled => JobStatus::Canceled,
        TaskStatus::Skipped => JobStatus::Skipped,
    }
}

fn precedence_rank(s: JobStatus) -> u8 {
    match s {
        JobStatus::Running => 7,
        JobStatus::BotError => 6,
        JobStatus::BadPatch => 5,
        JobStatus::BadBuild => 4,
        JobStatus::Canceled => 3,
        JobStatus::Skipped => 2,
        JobStatus::Completed => 1,
        JobStatus::Queued => 0,
    }
}

/// Roll a Step's status up from its Tasks. Empty task list rolls up to
/// `Queued` (a Step with no Tasks yet is not yet runnable).
pub fn roll_up_step(tasks: &[Task]) -> JobStatus {
    if tasks.is_empty() {
        return JobStatus::Queued;
    }

    let most_significant = tasks
        .iter()
        .map(|t| task_to_job_status(t.status))
        .max_by_key(|s| precedence_rank(*s))
        .unwrap();

    if most_significant != JobStatus::Queued {
        return most_significant;
    }

    // All present statuses are <= Queued in significance; disambiguate
    // the "some queued, none started" vs "some queued, some already ran
    // and finished/were skipped" case.
    let any_started = tasks.iter().any(|t| t.has_started() || t.status != TaskStatus::Queued);
    if any_started { JobStatus::Running } else { JobStatus::Queued }
}

/// Roll a Job's status up from its Steps, with the all-skipped override.
pub fn roll_up_job(steps: &[Step]) -> JobStatus {
    if steps.is_empty() {
        return JobStatus::Queued;
    }

    if steps.iter().all(|s| s.status == JobStatus::Skipped) {
        return JobStatus::Canceled;
    }

    let most_significant = steps
        .iter()
        .map(|s| s.status)
        .max_by_key(|s| precedence_rank(*s))
        .unwrap();

    if most_significant != JobStatus::Queued {
        return most_significant;
    }

    let any_running = steps.iter().any(|s| s.status != JobStatus::Queued);
    if any_running { JobStatus::Running } else { JobStatus::Queued }
}
