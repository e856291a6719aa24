//! End-to-end scheduler pass scenarios driven through `MemoryStore`,
//! exercising the public `run_pass` entry point rather than its internal
//! helpers.

use witbot::config::Config;
use witbot::lifecycle::recovery::ChildProbe;
use witbot::model::{Job, JobStatus, Step, StepType, Task, TaskStatus, Vm, VmRole, VmStatus, VmType};
use witbot::scheduler::Scheduler;
use witbot::store::memory::MemoryStore;
use witbot::store::Store;

struct NeverAliveProbe;

impl ChildProbe for NeverAliveProbe {
    fn is_alive(&self, _pid: i32) -> bool {
        false
    }
    fn kill(&self, _pid: i32) {}
}

fn config() -> Config {
    let toml = r#"
data_dir = "/tmp/witbot-test"
control_socket = "/tmp/witbot-test/control.sock"

[limits]
max_active_vms = 2
max_running_vms = 2
max_reverting_vms = 1
max_reverts_while_running_vms = 1
max_vms_when_idle = 1
max_vm_errors = 3
max_task_tries = 3
"#;
    facet_toml::from_str(toml).expect("valid test config")
}

fn idle_vm(name: &str) -> Vm {
    Vm {
        name: name.into(),
        vm_type: VmType::Win32,
        role: VmRole::Base,
        status: VmStatus::Idle,
        virt_uri: "qemu:///system".into(),
        virt_domain: name.to_lowercase(),
        idle_snapshot: "idle".into(),
        hostname: "host-a".into(),
        child_pid: None,
        child_deadline: None,
        errors: 0,
        sort_order: 0,
    }
}

fn single_task_job(id: i64, vm: &str) -> (Job, Vec<Step>, Vec<Task>) {
    let job = Job {
        id,
        user: "alice".into(),
        priority: 0,
        status: JobStatus::Queued,
        submitted: 1,
        ended: None,
        patch: None,
    };
    let steps = vec![Step {
        job_id: id,
        no: 1,
        previous_no: None,
        status: JobStatus::Queued,
        step_type: StepType::Single,
        file_name: None,
        file_type: None,
        in_staging: false,
        debug_level: 0,
        report_successful_tests: false,
    }];
    let tasks = vec![Task {
        job_id: id,
        step_no: 1,
        no: 1,
        vm: vm.into(),
        status: TaskStatus::Queued,
        timeout: 600,
        cmd_line_arg: None,
        started: None,
        ended: None,
        test_failures: 0,
    }];
    (job, steps, tasks)
}

#[test]
fn happy_path_starts_queued_task_on_idle_vm() {
    let store = MemoryStore::new();
    store.seed_vm(idle_vm("W32"));
    let (job, steps, tasks) = single_task_job(1, "W32");
    store.seed_job(job, steps, tasks);

    let config = config();
    let scheduler = Scheduler::new(&store, &config);
    scheduler.run_pass(&NeverAliveProbe).expect("pass succeeds");

    let vm = store.load_vm("W32").unwrap().unwrap();
    assert_eq!(vm.status, VmStatus::Running);

    let task = &store.load_tasks_for_job(1).unwrap()[0];
    assert_eq!(task.status, TaskStatus::Running);
    assert!(task.started.is_some());

    let job = store.load_job(1).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
}

#[test]
fn build_failure_skips_downstream_tasks() {
    let store = MemoryStore::new();
    store.seed_vm(idle_vm("W32"));

    let job = Job {
        id: 2,
        user: "bob".into(),
        priority: 0,
        status: JobStatus::Running,
        submitted: 1,
        ended: None,
        patch: None,
    };
    let steps = vec![
        Step {
            job_id: 2,
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
            job_id: 2,
            no: 2,
            previous_no: Some(1),
            status: JobStatus::Queued,
            step_type: StepType::Suite,
            file_name: None,
            file_type: None,
            in_staging: false,
            debug_level: 0,
            report_successful_tests: false,
        },
    ];
    let tasks = vec![
        Task {
            job_id: 2,
            step_no: 1,
            no: 1,
            vm: "W32".into(),
            status: TaskStatus::BadBuild,
            timeout: 600,
            cmd_line_arg: None,
            started: Some(1),
            ended: Some(2),
            test_failures: 0,
        },
        Task {
            job_id: 2,
            step_no: 2,
            no: 1,
            vm: "W32".into(),
            status: TaskStatus::Queued,
            timeout: 600,
            cmd_line_arg: None,
            started: None,
            ended: None,
            test_failures: 0,
        },
    ];
    store.seed_job(job, steps, tasks);

    let config = config();
    let scheduler = Scheduler::new(&store, &config);
    scheduler.run_pass(&NeverAliveProbe).expect("pass succeeds");

    let tasks = store.load_tasks_for_job(2).unwrap();
    let downstream = tasks.iter().find(|t| t.step_no == 2).unwrap();
    assert_eq!(downstream.status, TaskStatus::Skipped);

    let job = store.load_job(2).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::BadBuild);
}

#[test]
fn host_at_running_cap_defers_new_task_but_claims_the_domain() {
    let store = MemoryStore::new();
    let mut busy = idle_vm("W32A");
    busy.status = VmStatus::Running;
    store.seed_vm(busy);
    store.seed_vm(idle_vm("W32B"));

    // Two jobs contending for the one remaining slot on host-a, whose
    // `max_running_vms` is 2 in `config()` — seed a second running VM so
    // the host is already at capacity before the pass runs.
    let mut running2 = idle_vm("W32C");
    running2.status = VmStatus::Running;
    store.seed_vm(running2);

    let (job, steps, tasks) = single_task_job(3, "W32B");
    store.seed_job(job, steps, tasks);

    let config = config();
    let scheduler = Scheduler::new(&store, &config);
    scheduler.run_pass(&NeverAliveProbe).expect("pass succeeds");

    let vm = store.load_vm("W32B").unwrap().unwrap();
    assert_eq!(vm.status, VmStatus::Idle, "host is already at max_running_vms");
}
