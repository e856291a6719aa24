//! Spawning side of the lifecycle manager: the handshake writes the
//! scheduler relies on when it decides a VM needs reverting or powering
//! off (§4.1, §4.3).

use crate::child::spawn_supervised;
use crate::error::WitResult;
use crate::model::record::vmstatus_record;
use crate::model::{RecordGroup, Vm, VmStatus};
use crate::store::Store;
use crate::util::now_unix;

/// How long past `now` a supervised child is allowed to run before
/// `recovery::run_recovery` considers it stuck (§4.1 step 1).
fn deadline_for(op_budget_secs: u64) -> i64 {
    now_unix() + op_budget_secs as i64
}

/// `RunRevert(vm)`: spawn the child that reverts to `IdleSnapshot`, waits
/// for the agent, then settles. Persists `Status=reverting` atomically
/// with the child's pid before releasing it.
pub fn run_revert(vm: &mut Vm, store: &dyn Store, group_id: i64, op_budget_secs: u64) -> WitResult<i32> {
    let deadline = deadline_for(op_budget_secs);
    let name = vm.name.clone();
    let host = vm.hostname.clone();

    let child = spawn_supervised("revert", &name, |pid| {
        vm.status = VmStatus::Reverting;
        vm.child_pid = Some(pid);
        vm.child_deadline = Some(deadline);
        let group = RecordGroup {
            id: group_id,
            timestamp: now_unix(),
            records: vec![vmstatus_record(&name, &host, "reverting", None)],
        };
        store.save_vm_and_record_group(vm, Some(&group))
    })?;

    Ok(child.pid())
}

/// `RunPowerOff(vm)`: forcibly transition to `off` from any state. The
/// record emitted is `dirty poweroff` if the VM was already dirty (the
/// idiomatic "we gave up on this one" marker), otherwise a plain
/// power-off is implied by the subsequent `off` record the child writes
/// on exit.
pub fn run_power_off(
    vm: &mut Vm,
    store: &dyn Store,
    group_id: i64,
    op_budget_secs: u64,
    reason: PowerOffReason,
) -> WitResult<i32> {
    let deadline = deadline_for(op_budget_secs);
    let name = vm.name.clone();
    let host = vm.hostname.clone();
    let was_dirty = vm.status == VmStatus::Dirty;

    let child = spawn_supervised("power-off", &name, |pid| {
        vm.status = VmStatus::Dirty;
        vm.child_pid = Some(pid);
        vm.child_deadline = Some(deadline);
        let extra = match reason {
            PowerOffReason::Sacrifice => Some("sacrifice"),
            PowerOffReason::ReclaimIdle if was_dirty => Some("poweroff"),
            PowerOffReason::ReclaimIdle => None,
        };
        let group = RecordGroup {
            id: group_id,
            timestamp: now_unix(),
            records: vec![vmstatus_record(&name, &host, "dirty", extra)],
        };
        store.save_vm_and_record_group(vm, Some(&group))
    })?;

    Ok(child.pid())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOffReason {
    Sacrifice,
    ReclaimIdle,
}

/// `RunCheckIdle(vm)`: lightweight probe confirming an `idle` VM is still
/// reachable. No child process — the spec distinguishes "probe
/// operations" from the two full child-supervised operations.
pub async fn run_check_idle(vm: &Vm, agent: &dyn crate::vmagent::VmAgent) -> WitResult<bool> {
    Ok(agent.wait_for_tools(&vm.name, 5).await.is_ok())
}

/// `RunCheckOff(vm)`: confirm the hypervisor agrees the domain is off.
pub async fn run_check_off(vm: &Vm, hv: &dyn crate::hypervisor::Hypervisor) -> WitResult<bool> {
    Ok(hv.power_state(&vm.virt_uri, &vm.virt_domain).await? == crate::hypervisor::PowerState::Off)
}

/// `RunMonitor(vm)`: probe an `offline`/`maintenance` VM's real power
/// state, so an operator fix becomes visible on the next pass without
/// requiring a manual status edit.
pub async fn run_monitor(vm: &Vm, hv: &dyn crate::hypervisor::Hypervisor) -> WitResult<crate::hypervisor::PowerState> {
    hv.power_state(&vm.virt_uri, &vm.virt_domain).await
}
