//! The supervised child's own sequential work (§4.1, §5). Invoked only
//! from the re-exec'd `--internal-worker` entry point in `main.rs`; the
//! parent process never calls these directly.

use crate::child::await_release;
use crate::config::{EngineTuning, HostLimits};
use crate::error::WitResult;
use crate::hypervisor::Hypervisor;
use crate::model::record::vmstatus_record;
use crate::model::{RecordGroup, VmStatus};
use crate::store::Store;
use crate::util::now_unix;
use crate::vmagent::VmAgent;

/// `RunRevert`: revert to `IdleSnapshot`, wait for the agent, settle.
/// Exits (logically — returns) `Ok(())` on success; on any failure the
/// VM is left `dirty` (or `maintenance` past the error threshold) and
/// the error is returned for the caller to log.
pub async fn run_revert_worker(
    vm_name: &str,
    store: &dyn Store,
    hv: &dyn Hypervisor,
    agent: &dyn VmAgent,
    engine: &EngineTuning,
    limits: &HostLimits,
) -> WitResult<()> {
    await_release()?;

    let mut vm = store
        .load_vm(vm_name)?
        .ok_or_else(|| crate::error::WitError::UnknownVm { name: vm_name.into() })?;

    // §4.1: if the parent lost the race and another child now owns this
    // VM's pid, we must not touch shared state.
    let my_pid = std::process::id() as i32;
    if vm.child_pid != Some(my_pid) {
        return Ok(());
    }

    let result = do_revert(&mut vm, store, hv, agent, engine).await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            vm.errors += 1;
            vm.child_pid = None;
            vm.child_deadline = None;
            vm.status = if vm.errors >= limits.max_vm_errors {
                VmStatus::Maintenance
            } else {
                VmStatus::Dirty
            };
            let group = RecordGroup {
                id: store.next_record_group_id()?,
                timestamp: now_unix(),
                records: vec![vmstatus_record(&vm.name, &vm.hostname, vm.status.as_str(), Some("boterror revert failed"))],
            };
            store.save_vm_and_record_group(&vm, Some(&group))?;
            Err(e)
        }
    }
}

async fn do_revert(
    vm: &mut crate::model::Vm,
    store: &dyn Store,
    hv: &dyn Hypervisor,
    agent: &dyn VmAgent,
    engine: &EngineTuning,
) -> WitResult<()> {
    hv.revert_to_snapshot(&vm.virt_uri, &vm.virt_domain, &vm.idle_snapshot).await?;
    agent.wait_for_tools(&vm.name, engine.wait_for_tools_in_vm_secs).await?;
    vm.status = VmStatus::Sleeping;
    let group = RecordGroup {
        id: store.next_record_group_id()?,
        timestamp: now_unix(),
        records: vec![vmstatus_record(&vm.name, &vm.hostname, "sleeping", None)],
    };
    store.save_vm_and_record_group(vm, Some(&group))?;

    tokio::time::sleep(std::time::Duration::from_secs(engine.sleep_after_revert_secs)).await;

    vm.status = VmStatus::Idle;
    vm.child_pid = None;
    vm.child_deadline = None;
    let group = RecordGroup {
        id: store.next_record_group_id()?,
        timestamp: now_unix(),
        records: vec![vmstatus_record(&vm.name, &vm.hostname, "idle", None)],
    };
    store.save_vm_and_record_group(vm, Some(&group))?;
    Ok(())
}

/// `RunPowerOff`: forcibly transition to `off` from any state.
pub async fn run_power_off_worker(vm_name: &str, store: &dyn Store, hv: &dyn Hypervisor) -> WitResult<()> {
    await_release()?;

    let mut vm = store
        .load_vm(vm_name)?
        .ok_or_else(|| crate::error::WitError::UnknownVm { name: vm_name.into() })?;

    let my_pid = std::process::id() as i32;
    if vm.child_pid != Some(my_pid) {
        return Ok(());
    }

    hv.power_off(&vm.virt_uri, &vm.virt_domain).await?;
    vm.status = VmStatus::Off;
    vm.child_pid = None;
    vm.child_deadline = None;
    let group = RecordGroup {
        id: store.next_record_group_id()?,
        timestamp: now_unix(),
        records: vec![vmstatus_record(&vm.name, &vm.hostname, "off", None)],
    };
    store.save_vm_and_record_group(&vm, Some(&group))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Vm, VmRole, VmType};
    use crate::store::memory::MemoryStore;

    fn seeded_vm(store: &MemoryStore, pid: i32) -> Vm {
        let vm = Vm {
            name: "W32".into(),
            vm_type: VmType::Win32,
            role: VmRole::Base,
            status: VmStatus::Reverting,
            virt_uri: "qemu:///system".into(),
            virt_domain: "w32".into(),
            idle_snapshot: "idle".into(),
            hostname: "host-a".into(),
            child_pid: Some(pid),
            child_deadline: Some(now_unix() + 300),
            errors: 0,
            sort_order: 0,
        };
        store.seed_vm(vm.clone());
        vm
    }

    #[tokio::test]
    async fn revert_failure_marks_vm_dirty_and_increments_errors() {
        let store = MemoryStore::new();
        let my_pid = std::process::id() as i32;
        seeded_vm(&store, my_pid);

        let hv = crate::hypervisor::FakeHypervisor::new();
        hv.set_fail("w32");
        let agent = crate::vmagent::FakeVmAgent::new();
        let engine = EngineTuning::default();
        let limits = HostLimits::default();

        let result = do_revert(&mut store.load_vm("W32").unwrap().unwrap(), &store, &hv, &agent, &engine).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn successful_revert_ends_idle() {
        let store = MemoryStore::new();
        let my_pid = std::process::id() as i32;
        seeded_vm(&store, my_pid);

        let hv = crate::hypervisor::FakeHypervisor::new();
        let agent = crate::vmagent::FakeVmAgent::new();
        let engine = EngineTuning {
            sleep_after_revert_secs: 0,
            ..EngineTuning::default()
        };

        let mut vm = store.load_vm("W32").unwrap().unwrap();
        do_revert(&mut vm, &store, &hv, &agent, &engine).await.unwrap();
        assert_eq!(vm.status, VmStatus::Idle);
        assert!(vm.child_pid.is_none());
    }
}
