//! Restart (§4.2): permitted only from a terminal, non-queued/running
//! Job status. Resets every Task to queued and clears per-run state;
//! the caller is responsible for the filesystem side (deleting the
//! first Step's task directory contents and later Steps' directories
//! entirely) since that lives outside the data model.

use crate::error::{WitError, WitResult};
use crate::model::{Job, JobStatus, Step, Task, TaskStatus};
use crate::util::now_unix;

/// Directories the caller must remove before (or after) this returns,
/// split by §4.2's distinction: the first Step keeps its directory (it
/// holds the patch/exe) but its *task* subdirectories are cleared; later
/// Steps are pure outputs and are removed wholesale.
pub struct RestartPaths {
    pub first_step_no: i32,
    pub later_step_nos: Vec<i32>,
}

pub fn restart_job(job: &mut Job, steps: &mut [Step], tasks: &mut [Task]) -> WitResult<RestartPaths> {
    if !job.status.is_terminal() {
        return Err(WitError::RestartNotPermitted {
            id: job.id,
            status: job.status.as_str().into(),
        });
    }

    let mut step_nos: Vec<i32> = steps.iter().map(|s| s.no).collect();
    step_nos.sort_unstable();
    let first_step_no = step_nos.first().copied().unwrap_or(1);
    let later_step_nos = step_nos.into_iter().filter(|n| *n != first_step_no).collect();

    for task in tasks.iter_mut() {
        task.status = TaskStatus::Queued;
        task.started = None;
        task.ended = None;
        task.test_failures = 0;
    }
    for step in steps.iter_mut() {
        step.status = JobStatus::Queued;
    }

    job.status = JobStatus::Queued;
    job.submitted = now_unix();
    job.ended = None;

    Ok(RestartPaths { first_step_no, later_step_nos })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepType;

    fn terminal_job() -> (Job, Vec<Step>, Vec<Task>) {
        let job = Job {
            id: 7,
            user: "bob".into(),
            priority: 0,
            status: JobStatus::BadBuild,
            submitted: 1,
            ended: Some(50),
            patch: Some("patch.diff".into()),
        };
        let steps = vec![
            Step {
                job_id: 7,
                no: 1,
                previous_no: None,
                status: JobStatus::BadBuild,
                step_type: StepType::Build,
                file_name: None,
                file_type: None,
                in_staging: false,
                debug_level: 0,
                report_successful_tests: false,
            },
            Step {
                job_id: 7,
                no: 2,
                previous_no: Some(1),
                status: JobStatus::Skipped,
                step_type: StepType::Suite,
                file_name: None,
                file_type: None,
                in_staging: false,
                debug_level: 0,
                report_successful_tests: false,
            },
        ];
        let tasks = vec![Task {
            job_id: 7,
            step_no: 1,
            no: 1,
            vm: "Build".into(),
            status: TaskStatus::BadBuild,
            timeout: 600,
            cmd_line_arg: None,
            started: Some(5),
            ended: Some(10),
            test_failures: 2,
        }];
        (job, steps, tasks)
    }

    #[test]
    fn rejects_restart_from_queued_or_running() {
        let (mut job, mut steps, mut tasks) = terminal_job();
        job.status = JobStatus::Running;
        assert!(restart_job(&mut job, &mut steps, &mut tasks).is_err());
    }

    #[test]
    fn resets_job_steps_and_tasks() {
        let (mut job, mut steps, mut tasks) = terminal_job();
        let paths = restart_job(&mut job, &mut steps, &mut tasks).unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.ended.is_none());
        assert!(steps.iter().all(|s| s.status == JobStatus::Queued));
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Queued && t.started.is_none() && t.test_failures == 0));
        assert_eq!(paths.first_step_no, 1);
        assert_eq!(paths.later_step_nos, vec![2]);
    }
}
