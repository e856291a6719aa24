//! In-memory `Store` — used by tests and as an embeddable reference
//! implementation. Mirrors the `Arc<Mutex<...>>` shared-state pattern used
//! throughout the event loop for `AccumulatedState`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::WitResult;
use crate::model::{Job, RecordGroup, Step, Task, Vm};

use super::{PassChanges, Store};

#[derive(Default)]
struct Inner {
    vms: BTreeMap<String, Vm>,
    jobs: BTreeMap<i64, Job>,
    steps: BTreeMap<(i64, i32), Step>,
    tasks: BTreeMap<(i64, i32, i32), Task>,
    record_groups: Vec<RecordGroup>,
    next_group_id: i64,
    last_counters: Option<String>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_group_id: 1,
                ..Inner::default()
            }),
        }
    }

    pub fn seed_vm(&self, vm: Vm) {
        self.inner.lock().unwrap().vms.insert(vm.name.clone(), vm);
    }

    pub fn seed_job(&self, job: Job, steps: Vec<Step>, tasks: Vec<Task>) {
        let mut inner = self.inner.lock().unwrap();
        inner.jobs.insert(job.id, job);
        for s in steps {
            inner.steps.insert(s.key(), s);
        }
        for t in tasks {
            inner.tasks.insert(t.key(), t);
        }
    }
}

impl Store for MemoryStore {
    fn load_vms(&self) -> WitResult<Vec<Vm>> {
        Ok(self.inner.lock().unwrap().vms.values().cloned().collect())
    }

    fn load_vm(&self, name: &str) -> WitResult<Option<Vm>> {
        Ok(self.inner.lock().unwrap().vms.get(name).cloned())
    }

    fn load_jobs(&self) -> WitResult<Vec<Job>> {
        Ok(self.inner.lock().unwrap().jobs.values().cloned().collect())
    }

    fn load_job(&self, id: i64) -> WitResult<Option<Job>> {
        Ok(self.inner.lock().unwrap().jobs.get(&id).cloned())
    }

    fn load_steps(&self, job_id: i64) -> WitResult<Vec<Step>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .steps
            .values()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect())
    }

    fn load_tasks_for_job(&self, job_id: i64) -> WitResult<Vec<Task>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tasks.values().filter(|t| t.job_id == job_id).cloned().collect())
    }

    fn load_tasks_for_step(&self, job_id: i64, step_no: i32) -> WitResult<Vec<Task>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.job_id == job_id && t.step_no == step_no)
            .cloned()
            .collect())
    }

    fn load_record_groups_since(&self, since_ts: i64) -> WitResult<Vec<RecordGroup>> {
        let inner = self.inner.lock().unwrap();
        let mut groups: Vec<RecordGroup> = inner
            .record_groups
            .iter()
            .filter(|g| g.timestamp >= since_ts)
            .cloned()
            .collect();
        groups.sort_by_key(|g| (g.timestamp, g.id));
        Ok(groups)
    }

    fn last_counters_value(&self) -> WitResult<Option<String>> {
        Ok(self.inner.lock().unwrap().last_counters.clone())
    }

    fn save_job(&self, job: &Job) -> WitResult<()> {
        self.inner.lock().unwrap().jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn save_step(&self, step: &Step) -> WitResult<()> {
        self.inner.lock().unwrap().steps.insert(step.key(), step.clone());
        Ok(())
    }

    fn delete_tasks_for_step(&self, job_id: i64, step_no: i32) -> WitResult<()> {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .retain(|k, _| !(k.0 == job_id && k.1 == step_no));
        Ok(())
    }

    fn save_vm_and_record_group(&self, vm: &Vm, group: Option<&RecordGroup>) -> WitResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.vms.insert(vm.name.clone(), vm.clone());
        if let Some(g) = group {
            record_counters(&mut inner, g);
            inner.record_groups.push(g.clone());
        }
        Ok(())
    }

    fn commit_pass(&self, changes: &PassChanges, group: Option<&RecordGroup>) -> WitResult<()> {
        let mut inner = self.inner.lock().unwrap();
        for vm in &changes.vms {
            inner.vms.insert(vm.name.clone(), vm.clone());
        }
        for job in &changes.jobs {
            inner.jobs.insert(job.id, job.clone());
        }
        for step in &changes.steps {
            inner.steps.insert(step.key(), step.clone());
        }
        for task in &changes.tasks {
            inner.tasks.insert(task.key(), task.clone());
        }
        if let Some(g) = group {
            record_counters(&mut inner, g);
            inner.record_groups.push(g.clone());
        }
        Ok(())
    }

    fn next_record_group_id(&self) -> WitResult<i64> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_group_id;
        inner.next_group_id += 1;
        Ok(id)
    }
}

fn record_counters(inner: &mut Inner, group: &RecordGroup) {
    for r in &group.records {
        if r.record_type == crate::model::RecordType::Tasks && r.name == "counters" {
            inner.last_counters = r.value.clone();
        }
    }
}
