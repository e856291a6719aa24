//! C6: Scheduler — the single-pass, non-reentrant 6-step layout (§4.3):
//!
//! ```text
//! 1. classify_and_check()   // §4.1 recovery + counting + claiming
//! 2. schedule_tasks()       // start runnable tasks; build NeededVMs
//! 3. revert_vms()           // prepare VMs the near-future needs
//! 4. power_off_dirty()      // reclaim idle capacity
//! 5. record_vm_states()     // audit every observed change
//! 6. arm_next_tick()        // earliest ChildDeadline or safety-net 10 min
//! ```
//!
//! `run_pass` is the only entry point the engine calls; everything else
//! here is decomposed so each decision (who to start, who to revert, who
//! to sacrifice) is a pure function over the classified fleet, testable
//! without spawning a single child process.

pub mod domains;
pub mod needed;
pub mod sacrifice;

use std::collections::HashMap;

use crate::config::Config;
use crate::error::WitResult;
use crate::jobmodel::{propagate_skip, roll_up_job, roll_up_step};
use crate::lifecycle::operations::{self, PowerOffReason};
use crate::lifecycle::recovery::{self, ChildProbe};
use crate::model::record::vmstatus_running_record;
use crate::model::{Job, JobStatus, Step, Task, TaskStatus, Vm, VmStatus};
use crate::recorder::PassRecorder;
use crate::store::{PassChanges, Store};
use crate::util::now_unix;

use domains::{ClaimResult, DomainRegister};
use needed::{nicefuture, NeededVms, FUTURE_BASE, NEXT_BASE};
use sacrifice::{pick_victim, Applicant};

pub struct Scheduler<'a> {
    store: &'a dyn Store,
    config: &'a Config,
}

pub struct PassOutcome {
    /// Seconds until the scheduler should be ticked again (§4.5 `arm_next_tick`).
    pub next_delay_secs: u64,
}

/// A job together with its Steps/Tasks, the unit the scheduler walks in
/// `(Priority, JobId)` order.
struct JobView {
    job: Job,
    steps: Vec<Step>,
    tasks: Vec<Task>,
}

impl<'a> Scheduler<'a> {
    pub fn new(store: &'a dyn Store, config: &'a Config) -> Self {
        Self { store, config }
    }

    pub fn run_pass(&self, probe: &dyn ChildProbe) -> WitResult<PassOutcome> {
        let mut recorder = PassRecorder::new();
        let mut changes = PassChanges::default();

        // ── 1. classify_and_check ───────────────────────────────────
        let loaded_vms = self.store.load_vms()?;
        let (vms, recovery_records) = recovery::run_recovery(
            loaded_vms,
            |host| self.config.limits_for_host(host).clone(),
            probe,
        );
        recorder.extend(recovery_records);

        let mut vm_by_name: HashMap<String, Vm> = vms.into_iter().map(|v| (v.name.clone(), v)).collect();

        let jobs = self.store.load_jobs()?;
        let mut job_views: Vec<JobView> = Vec::with_capacity(jobs.len());
        for job in jobs {
            let steps = self.store.load_steps(job.id)?;
            let tasks = self.store.load_tasks_for_job(job.id)?;
            job_views.push(JobView { job, steps, tasks });
        }
        job_views.sort_by_key(|v| v.job.rank_key());

        let mut domains = DomainRegister::new();
        for vm in vm_by_name.values() {
            if vm.status != VmStatus::Off {
                domains.seed(&vm.domain_key(), &vm.name);
            }
        }

        let hosts: Vec<String> = {
            let mut hs: Vec<String> = vm_by_name.values().map(|v| v.hostname.clone()).collect();
            hs.sort();
            hs.dedup();
            hs
        };

        // ── 2. schedule_tasks ───────────────────────────────────────
        let mut needed = NeededVms::new();
        let mut runnable = 0u32;
        let mut queued_count = 0u32;
        let mut blocked = 0u32;

        for (rank, view) in job_views.iter_mut().enumerate() {
            let job_rank = rank as u32 + 1;
            if view.job.status.is_terminal() {
                continue;
            }

            let current_step_no = first_non_completed_step(&view.steps);

            for task in view.tasks.iter_mut() {
                if task.status != TaskStatus::Queued {
                    continue;
                }
                let Some(vm) = vm_by_name.get(&task.vm) else {
                    blocked += 1;
                    continue;
                };
                if vm.is_blocked_target() {
                    blocked += 1;
                    continue;
                }
                queued_count += 1;

                let is_current_step = Some(task.step_no) == current_step_no;
                if is_current_step {
                    runnable += 1;
                }

                if is_current_step && vm.status == VmStatus::Idle {
                    let host_limits = self.config.limits_for_host(&vm.hostname);
                    let running_now = count_running(&vm_by_name, &vm.hostname);
                    if running_now < host_limits.effective_max_running_vms() {
                        start_task(
                            &mut vm_by_name,
                            &mut domains,
                            task,
                            &view.job.id,
                            &mut recorder,
                        );
                        runnable -= 1; // it is no longer queued-and-runnable, it's running
                        continue;
                    }
                    // Host full: still claim the domain so this VM is not
                    // sacrificed out from under the task that's about to use it.
                    domains.seed(&vm.domain_key(), &vm.name);
                    continue;
                }

                // Not runnable yet: register a want in NeededVMs. Next-step
                // preparation (for the task after the currently-running one)
                // only applies when the task's own timeout doesn't exceed the
                // build-timeout cutoff (§9 "next-step preparation cutoff").
                if task.timeout as u64 <= self.config.engine.build_timeout_secs
                    && is_next_step(&view.steps, current_step_no, task.step_no)
                {
                    let deps = current_step_vms(&view.steps, &view.tasks, &vm_by_name, current_step_no);
                    needed.want(&task.vm, NEXT_BASE + job_rank, hot(&vm_by_name, &task.vm), deps);
                } else if !is_current_step {
                    // Too far out to prepare speculatively from this job's
                    // own queue; it may still be picked up as idle-host
                    // speculative work below.
                }
            }

            // Propagate skip for any step of this job that just finished
            // in a non-completed terminal state (§4.2). Tasks started
            // above are already reflected in `view.tasks`.
            for step in view.steps.clone() {
                if step.status.is_terminal() && step.status != JobStatus::Completed {
                    let (_changed_steps, _changed_tasks) =
                        propagate_skip(&step, &mut view.steps, &mut view.tasks);
                }
            }
            for step in view.steps.iter_mut() {
                let step_tasks: Vec<Task> = view.tasks.iter().filter(|t| t.step_no == step.no).cloned().collect();
                step.status = roll_up_step(&step_tasks);
            }
            view.job.status = roll_up_job(&view.steps);
            if view.job.status.is_terminal() && view.job.ended.is_none() {
                view.job.ended = Some(now_unix());
            }
        }

        // Future-job preparation: only when every host has no queued work.
        if queued_count == 0 {
            for vm in vm_by_name.values() {
                if vm.status == VmStatus::Off && vm.has_enabled_role() && vm.has_enabled_status() {
                    needed.want(&vm.name, nicefuture(vm.role, vm.vm_type), 0, Vec::new());
                }
            }
        }

        // ── 3. revert_vms ───────────────────────────────────────────
        let ranked = needed.ranked();
        for host in &hosts {
            let mut reverting_count = count_status(&vm_by_name, host, VmStatus::Reverting);
            let running_count = count_running(&vm_by_name, host);
            let limits = self.config.limits_for_host(host);
            let reverts_cap = limits.effective_max_reverting_vms(running_count);

            for entry in ranked.iter().filter(|e| vm_by_name.get(&e.vm_name).is_some_and(|v| &v.hostname == host)) {
                if reverting_count >= reverts_cap {
                    break;
                }
                let Some(vm) = vm_by_name.get(&entry.vm_name) else { continue };
                if vm.status != VmStatus::Off {
                    continue;
                }
                let deps_ready = entry.dependencies.iter().all(|dep| {
                    vm_by_name
                        .get(dep)
                        .is_some_and(|d| matches!(d.status, VmStatus::Reverting | VmStatus::Sleeping | VmStatus::Running))
                });
                if !deps_ready {
                    continue;
                }

                let domain_key = vm.domain_key();
                let steal = entry.niceness < NEXT_BASE;
                let claim = domains.claim(
                    &domain_key,
                    &entry.vm_name,
                    |owner| is_busy(&vm_by_name, owner),
                    |owner| vm_by_name.get(owner).is_some_and(|v| v.status.is_lamb()),
                    steal,
                );
                let stolen_owner = match claim {
                    ClaimResult::Claimed => None,
                    ClaimResult::Stolen { owner } => Some(owner),
                    ClaimResult::Busy { .. } | ClaimResult::Denied { .. } => continue,
                };
                if let Some(owner) = stolen_owner {
                    if let Some(owner_vm) = vm_by_name.get_mut(&owner) {
                        owner_vm.status = VmStatus::Off;
                        recorder.push(crate::model::record::vmstatus_record(&owner_vm.name, &owner_vm.hostname, "off", None));
                        changes.vms.push(owner_vm.clone());
                    }
                }

                let is_future = entry.niceness >= FUTURE_BASE;
                let active = count_active(&vm_by_name, host);
                let needs_sacrifice = if is_future {
                    let future_idle = count_future_idle(&vm_by_name, host, limits.max_vms_when_idle);
                    future_idle + 1 > limits.max_vms_when_idle
                } else {
                    active + 1 > limits.max_active_vms
                };

                if needs_sacrifice {
                    let lambs: Vec<Vm> = vm_by_name
                        .values()
                        .filter(|v| v.hostname == *host && v.status.is_lamb() && v.name != entry.vm_name)
                        .cloned()
                        .collect();
                    let applicant = Applicant { niceness: entry.niceness, is_future };
                    let niceness_of = |name: &str| needed.get(name).map(|e| e.niceness);
                    if let Some(victim) = pick_victim(&lambs, &applicant, niceness_of).cloned() {
                        let reason = if victim.status == VmStatus::Dirty {
                            PowerOffReason::ReclaimIdle
                        } else {
                            PowerOffReason::Sacrifice
                        };
                        let mut victim_mut = victim.clone();
                        let group_id = self.store.next_record_group_id()?;
                        if let Ok(pid) = operations::run_power_off(
                            &mut victim_mut,
                            self.store,
                            group_id,
                            300,
                            reason,
                        ) {
                            let _ = pid;
                            changes.vms.push(victim_mut.clone());
                            vm_by_name.insert(victim_mut.name.clone(), victim_mut);
                        }
                    } else {
                        // No eligible victim: defer this revert (§7 rule 2).
                        continue;
                    }
                }

                let mut vm_mut = vm.clone();
                let group_id = self.store.next_record_group_id()?;
                let op_budget = self.config.engine.wait_for_tools_in_vm_secs + self.config.engine.sleep_after_revert_secs + 30;
                if operations::run_revert(&mut vm_mut, self.store, group_id, op_budget).is_ok() {
                    reverting_count += 1;
                    changes.vms.push(vm_mut.clone());
                    vm_by_name.insert(vm_mut.name.clone(), vm_mut);
                }
            }
        }

        // ── 4. power_off_dirty ──────────────────────────────────────
        for vm in vm_by_name.values().cloned().collect::<Vec<_>>() {
            if vm.status == VmStatus::Dirty {
                let domain_key = vm.domain_key();
                let claim = domains.claim(&domain_key, &vm.name, |_| false, |_| false, false);
                if !matches!(claim, ClaimResult::Claimed) {
                    continue;
                }
                let mut vm_mut = vm.clone();
                let group_id = self.store.next_record_group_id()?;
                if operations::run_power_off(&mut vm_mut, self.store, group_id, 120, PowerOffReason::ReclaimIdle).is_ok() {
                    changes.vms.push(vm_mut.clone());
                    vm_by_name.insert(vm_mut.name.clone(), vm_mut);
                }
            }
        }

        // ── 5. record_vm_states ─────────────────────────────────────
        recorder.push_counters_if_changed(self.store, runnable, queued_count, blocked)?;
        for view in &job_views {
            changes.jobs.push(view.job.clone());
            changes.steps.extend(view.steps.clone());
            changes.tasks.extend(view.tasks.clone());
        }

        let group_id = self.store.next_record_group_id()?;
        let group = recorder.finish(group_id);
        self.store.commit_pass(&changes, group.as_ref())?;

        // ── 6. arm_next_tick ────────────────────────────────────────
        let next_delay_secs = earliest_deadline_delay(vm_by_name.values(), self.config.engine.safety_net_secs);

        Ok(PassOutcome { next_delay_secs })
    }
}

fn first_non_completed_step(steps: &[Step]) -> Option<i32> {
    let mut nos: Vec<i32> = steps.iter().map(|s| s.no).collect();
    nos.sort_unstable();
    nos.into_iter().find(|no| {
        steps
            .iter()
            .find(|s| s.no == *no)
            .map(|s| s.status != JobStatus::Completed)
            .unwrap_or(false)
    })
}

/// Whether `step_no` is the step right after `current`, i.e. "about to run".
fn is_next_step(steps: &[Step], current: Option<i32>, step_no: i32) -> bool {
    let Some(current) = current else { return false };
    steps.iter().any(|s| s.no == step_no && s.previous_no == Some(current))
}

fn current_step_vms(steps: &[Step], tasks: &[Task], vms: &HashMap<String, Vm>, current: Option<i32>) -> Vec<String> {
    let Some(current) = current else { return Vec::new() };
    let _ = steps;
    tasks
        .iter()
        .filter(|t| t.step_no == current)
        .filter(|t| vms.contains_key(&t.vm))
        .map(|t| t.vm.clone())
        .collect()
}

fn hot(vms: &HashMap<String, Vm>, name: &str) -> u8 {
    vms.get(name).is_some_and(|v| v.status != VmStatus::Off) as u8
}

fn count_running(vms: &HashMap<String, Vm>, host: &str) -> u32 {
    vms.values().filter(|v| v.hostname == host && v.status.counts_as_running()).count() as u32
}

fn count_active(vms: &HashMap<String, Vm>, host: &str) -> u32 {
    vms.values().filter(|v| v.hostname == host && v.status.is_active()).count() as u32
}

fn count_status(vms: &HashMap<String, Vm>, host: &str, status: VmStatus) -> u32 {
    vms.values().filter(|v| v.hostname == host && v.status == status).count() as u32
}

fn count_future_idle(vms: &HashMap<String, Vm>, host: &str, _cap: u32) -> u32 {
    vms.values()
        .filter(|v| v.hostname == host && matches!(v.status, VmStatus::Idle | VmStatus::Sleeping | VmStatus::Reverting))
        .count() as u32
}

fn is_busy(vms: &HashMap<String, Vm>, name: &str) -> bool {
    vms.get(name).is_some_and(|v| v.status == VmStatus::Running)
}

fn start_task(
    vms: &mut HashMap<String, Vm>,
    domains: &mut DomainRegister,
    task: &mut Task,
    job_id: &i64,
    recorder: &mut PassRecorder,
) {
    let Some(vm) = vms.get_mut(&task.vm) else { return };
    vm.status = VmStatus::Running;
    task.status = TaskStatus::Running;
    task.started = Some(now_unix());
    recorder.push(vmstatus_running_record(&vm.name, &vm.hostname, *job_id, task.step_no, task.no));
    domains.seed(&vm.domain_key(), &vm.name);
}

fn earliest_deadline_delay<'a>(vms: impl Iterator<Item = &'a Vm>, safety_net_secs: u64) -> u64 {
    let now = now_unix();
    let earliest = vms.filter_map(|v| v.child_deadline).min();
    match earliest {
        Some(deadline) => (deadline - now).max(1) as u64,
        None => safety_net_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_non_completed_step_skips_completed_prefix() {
        let steps = vec![
            Step {
                job_id: 1,
                no: 1,
                previous_no: None,
                status: JobStatus::Completed,
                step_type: crate::model::StepType::Build,
                file_name: None,
                file_type: None,
                in_staging: false,
                debug_level: 0,
                report_successful_tests: false,
            },
            Step {
                job_id: 1,
                no: 2,
                previous_no: Some(1),
                status: JobStatus::Queued,
                step_type: crate::model::StepType::Suite,
                file_name: None,
                file_type: None,
                in_staging: false,
                debug_level: 0,
                report_successful_tests: false,
            },
        ];
        assert_eq!(first_non_completed_step(&steps), Some(2));
    }

    #[test]
    fn earliest_deadline_delay_picks_minimum_and_clamps_to_one() {
        let vm_a = test_vm("A", Some(now_unix() - 5));
        let vm_b = test_vm("B", Some(now_unix() + 50));
        let delay = earliest_deadline_delay([&vm_a, &vm_b].into_iter(), 600);
        assert_eq!(delay, 1);
    }

    #[test]
    fn earliest_deadline_delay_falls_back_to_safety_net() {
        let vm_a = test_vm("A", None);
        let delay = earliest_deadline_delay([&vm_a].into_iter(), 600);
        assert_eq!(delay, 600);
    }

    fn test_vm(name: &str, child_deadline: Option<i64>) -> Vm {
        Vm {
            name: name.into(),
            vm_type: crate::model::VmType::Win32,
            role: crate::model::VmRole::Base,
            status: VmStatus::Idle,
            virt_uri: "qemu:///system".into(),
            virt_domain: name.to_lowercase(),
            idle_snapshot: "idle".into(),
            hostname: "host-a".into(),
            child_pid: None,
            child_deadline,
            errors: 0,
            sort_order: 0,
        }
    }
}
