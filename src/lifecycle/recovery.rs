//! Consistency recovery (§4.1): run at engine start and at the top of
//! every scheduling pass, before anything else touches VM state.

use crate::config::HostLimits;
use crate::model::record::vmstatus_record;
use crate::model::{Record, Vm, VmStatus};
use crate::util::now_unix;

/// Whether a supervised child claiming to own `vm.child_pid` is actually
/// alive. Abstracted so tests can fake liveness without real processes.
pub trait ChildProbe {
    fn is_alive(&self, pid: i32) -> bool;
    fn kill(&self, pid: i32);
}

/// `nix`-backed probe for production use: `kill(pid, 0)` to test
/// liveness without actually signaling, `kill(pid, SIGKILL)` to reap a
/// stuck child.
pub struct NixChildProbe;

impl ChildProbe for NixChildProbe {
    fn is_alive(&self, pid: i32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    }

    fn kill(&self, pid: i32) {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGKILL);
    }
}

/// Outcome of recovering a single VM: its possibly-mutated record plus
/// the audit record to emit, if anything changed.
pub struct Recovered {
    pub vm: Vm,
    pub record: Option<Record>,
}

/// Apply §4.1's four-step algorithm to one VM. Pure function: the caller
/// persists `vm` and emits `record` as part of the pass's RecordGroup.
pub fn recover_vm(mut vm: Vm, limits: &HostLimits, probe: &dyn ChildProbe) -> Recovered {
    let now = now_unix();
    let alive = vm.child_pid.map(|pid| probe.is_alive(pid)).unwrap_or(false);

    if alive {
        let past_deadline = vm.child_deadline.is_some_and(|d| now >= d);
        if past_deadline {
            probe.kill(vm.child_pid.unwrap());
            return demote(vm, "boterror stuck process", limits);
        }

        let status_ok = matches!(vm.status, VmStatus::Dirty | VmStatus::Reverting | VmStatus::Sleeping | VmStatus::Running);
        if !status_ok {
            probe.kill(vm.child_pid.unwrap());
            vm.child_pid = None;
            vm.child_deadline = None;
            vm.status = VmStatus::Dirty;
            let record = vmstatus_record(&vm.name, &vm.hostname, "dirty", None);
            return Recovered {
                vm,
                record: Some(Record { value: Some("boterror unexpected process".into()), ..record }),
            };
        }

        return Recovered { vm, record: None };
    }

    // No live child.
    let status_implies_child = matches!(vm.status, VmStatus::Running | VmStatus::Reverting | VmStatus::Sleeping);
    if status_implies_child || vm.child_pid.is_some() {
        vm.child_pid = None;
        vm.child_deadline = None;
        vm.status = VmStatus::Dirty;
        let record = vmstatus_record(&vm.name, &vm.hostname, "dirty", None);
        return Recovered {
            vm,
            record: Some(Record { value: Some("boterror process died".into()), ..record }),
        };
    }

    Recovered { vm, record: None }
}

fn demote(mut vm: Vm, reason: &str, limits: &HostLimits) -> Recovered {
    vm.child_pid = None;
    vm.child_deadline = None;
    vm.errors += 1;
    vm.status = if vm.errors >= limits.max_vm_errors {
        VmStatus::Maintenance
    } else {
        VmStatus::Dirty
    };
    let status_str = vm.status.as_str();
    let record = vmstatus_record(&vm.name, &vm.hostname, status_str, None);
    Recovered {
        vm,
        record: Some(Record { value: Some(reason.into()), ..record }),
    }
}

/// Recover every VM in `vms`, returning the mutated set plus the records
/// to append to the pass's RecordGroup.
pub fn run_recovery(vms: Vec<Vm>, limits_for: impl Fn(&str) -> HostLimits, probe: &dyn ChildProbe) -> (Vec<Vm>, Vec<Record>) {
    let mut out_vms = Vec::with_capacity(vms.len());
    let mut records = Vec::new();
    for vm in vms {
        let limits = limits_for(&vm.hostname);
        let recovered = recover_vm(vm, &limits, probe);
        if let Some(r) = recovered.record {
            records.push(r);
        }
        out_vms.push(recovered.vm);
    }
    (out_vms, records)
}
