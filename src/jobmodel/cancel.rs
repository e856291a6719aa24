//! Cancel (§4.2): mark queued tasks skipped, kill and cancel running ones.

use crate::child::SupervisedChild;
use crate::error::WitResult;
use crate::model::record::vmresult_record;
use crate::model::{Job, JobStatus, Record, Step, Task, TaskStatus, Vm, VmStatus};
use crate::store::Store;
use crate::util::now_unix;

use super::rollup::{roll_up_job, roll_up_step};

/// Everything a cancel needs to mutate, handed back to the caller so it
/// can be persisted via `Store::commit_pass` alongside the pass's other
/// changes (§5: writes are batched per pass).
pub struct CancelOutcome {
    pub job: Job,
    pub steps: Vec<Step>,
    pub tasks: Vec<Task>,
    pub vms: Vec<Vm>,
    pub records: Vec<Record>,
}

/// Cancel every non-terminal Task of `job`. `kill_child` is called for
/// each VM whose running task must be torn down; it should kill the
/// task's supervised child if one exists.
pub fn cancel_job(
    job: &mut Job,
    steps: &mut [Step],
    tasks: &mut [Task],
    vms_by_name: &mut std::collections::HashMap<String, Vm>,
    mut kill_child: impl FnMut(&mut SupervisedChild),
    running_children: &mut std::collections::HashMap<(i64, i32, i32), SupervisedChild>,
) -> CancelOutcome {
    let mut touched_vms = Vec::new();
    let mut records = Vec::new();

    for task in tasks.iter_mut() {
        match task.status {
            TaskStatus::Queued => {
                task.status = TaskStatus::Skipped;
            }
            TaskStatus::Running => {
                if let Some(mut child) = running_children.remove(&task.key()) {
                    kill_child(&mut child);
                }
                task.status = TaskStatus::Canceled;
                task.ended = Some(now_unix());

                if let Some(vm) = vms_by_name.get_mut(&task.vm) {
                    vm.status = VmStatus::Dirty;
                    vm.child_pid = None;
                    vm.child_deadline = None;
                    records.push(vmresult_record(&vm.name, &vm.hostname, "canceled", None, None));
                    touched_vms.push(vm.clone());
                }
            }
            _ => {}
        }
    }

    for step in steps.iter_mut() {
        let step_tasks: Vec<Task> = tasks.iter().filter(|t| t.step_no == step.no).cloned().collect();
        step.status = roll_up_step(&step_tasks);
    }
    job.status = roll_up_job(steps);
    if job.status.is_terminal() && job.ended.is_none() {
        job.ended = Some(now_unix());
    }

    CancelOutcome {
        job: job.clone(),
        steps: steps.to_vec(),
        tasks: tasks.to_vec(),
        vms: touched_vms,
        records,
    }
}
