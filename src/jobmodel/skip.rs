//! Skip propagation (§4.2): when a build/reconfig Step ends in a
//! non-completed terminal state, every later Step's Tasks are marked
//! `skipped` without running. The only other source of `skipped` is
//! user cancel (`cancel::cancel_job`).

use crate::model::{JobStatus, Step, Task, TaskStatus};

use super::rollup::roll_up_step;

/// Given the just-updated Step (already rolled up) and the Job's other
/// Steps/Tasks, mark everything after it `skipped` if propagation is
/// triggered. Returns the Steps and Tasks that were changed.
pub fn propagate_skip(finished: &Step, steps: &mut [Step], tasks: &mut [Task]) -> (Vec<Step>, Vec<Task>) {
    let mut changed_steps = Vec::new();
    let mut changed_tasks = Vec::new();

    if !finished.step_type.propagates_skip_on_failure() {
        return (changed_steps, changed_tasks);
    }
    if finished.status == JobStatus::Completed || !finished.status.is_terminal() {
        return (changed_steps, changed_tasks);
    }

    for task in tasks.iter_mut().filter(|t| t.step_no > finished.no) {
        if task.status == TaskStatus::Queued {
            task.status = TaskStatus::Skipped;
            changed_tasks.push(task.clone());
        }
    }

    for step in steps.iter_mut().filter(|s| s.no > finished.no) {
        let step_tasks: Vec<Task> = tasks.iter().filter(|t| t.step_no == step.no).cloned().collect();
        let new_status = roll_up_step(&step_tasks);
        if new_status != step.status {
            step.status = new_status;
            changed_steps.push(step.clone());
        }
    }

    (changed_steps, changed_tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepType;

    fn step(no: i32, step_type: StepType, status: JobStatus) -> Step {
        Step {
            job_id: 1,
            no,
            previous_no: if no > 1 { Some(no - 1) } else { None },
            status,
            step_type,
            file_name: None,
            file_type: None,
            in_staging: false,
            debug_level: 0,
            report_successful_tests: false,
        }
    }

    fn task(step_no: i32, no: i32, status: TaskStatus) -> Task {
        Task {
            job_id: 1,
            step_no,
            no,
            vm: "W32".into(),
            status,
            timeout: 600,
            cmd_line_arg: None,
            started: None,
            ended: None,
            test_failures: 0,
        }
    }

    #[test]
    fn failed_build_skips_all_later_queued_tasks() {
        let build = step(1, StepType::Build, JobStatus::BadBuild);
        let mut steps = vec![step(2, StepType::Suite, JobStatus::Queued), step(3, StepType::Suite, JobStatus::Queued)];
        let mut tasks = vec![
            task(2, 1, TaskStatus::Queued),
            task(2, 2, TaskStatus::Queued),
            task(3, 1, TaskStatus::Queued),
        ];

        let (changed_steps, changed_tasks) = propagate_skip(&build, &mut steps, &mut tasks);

        assert_eq!(changed_tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Skipped));
        assert_eq!(changed_steps.len(), 2);
        assert!(steps.iter().all(|s| s.status == JobStatus::Skipped));
    }

    #[test]
    fn successful_build_does_not_propagate() {
        let build = step(1, StepType::Build, JobStatus::Completed);
        let mut steps = vec![step(2, StepType::Suite, JobStatus::Queued)];
        let mut tasks = vec![task(2, 1, TaskStatus::Queued)];
        let (changed_steps, changed_tasks) = propagate_skip(&build, &mut steps, &mut tasks);
        assert!(changed_steps.is_empty());
        assert!(changed_tasks.is_empty());
    }

    #[test]
    fn non_build_reconfig_step_does_not_propagate() {
        let suite = step(1, StepType::Suite, JobStatus::BadPatch);
        let mut steps = vec![step(2, StepType::Single, JobStatus::Queued)];
        let mut tasks = vec![task(2, 1, TaskStatus::Queued)];
        let (changed_steps, changed_tasks) = propagate_skip(&suite, &mut steps, &mut tasks);
        assert!(changed_steps.is_empty());
        assert!(changed_tasks.is_empty());
    }

    #[test]
    fn already_running_later_task_is_left_alone() {
        let build = step(1, StepType::Reconfig, JobStatus::BadBuild);
        let mut steps = vec![step(2, StepType::Suite, JobStatus::Running)];
        let mut tasks = vec![task(2, 1, TaskStatus::Running)];
        let (_changed_steps, changed_tasks) = propagate_skip(&build, &mut steps, &mut tasks);
        assert!(changed_tasks.is_empty());
        assert_eq!(tasks[0].status, TaskStatus::Running);
    }
}
