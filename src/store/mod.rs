//! Persistence (C3): load/save entities, transactional save (§3, §5).
//!
//! The core does not mandate a specific engine (spec §1 Non-goals); this
//! module defines the contract and ships two implementations: `SqliteStore`
//! for real deployments and `MemoryStore` for tests and embedding.

pub mod memory;
pub mod sqlite;

use crate::error::WitResult;
use crate::model::{Job, RecordGroup, Step, Task, Vm};

/// A batch of entity mutations produced by one scheduling pass, persisted
/// together with that pass's RecordGroup (§5: "Record writes ... are
/// committed as a single RecordGroup at the end of the pass").
#[derive(Debug, Clone, Default)]
pub struct PassChanges {
    pub vms: Vec<Vm>,
    pub jobs: Vec<Job>,
    pub steps: Vec<Step>,
    pub tasks: Vec<Task>,
}

impl PassChanges {
    pub fn is_empty(&self) -> bool {
        self.vms.is_empty() && self.jobs.is_empty() && self.steps.is_empty() && self.tasks.is_empty()
    }
}

pub trait Store: Send + Sync {
    fn load_vms(&self) -> WitResult<Vec<Vm>>;
    fn load_vm(&self, name: &str) -> WitResult<Option<Vm>>;

    fn load_jobs(&self) -> WitResult<Vec<Job>>;
    fn load_job(&self, id: i64) -> WitResult<Option<Job>>;

    fn load_steps(&self, job_id: i64) -> WitResult<Vec<Step>>;
    fn load_tasks_for_job(&self, job_id: i64) -> WitResult<Vec<Task>>;
    fn load_tasks_for_step(&self, job_id: i64, step_no: i32) -> WitResult<Vec<Task>>;

    fn load_record_groups_since(&self, since_ts: i64) -> WitResult<Vec<RecordGroup>>;
    fn last_counters_value(&self) -> WitResult<Option<String>>;

    fn save_job(&self, job: &Job) -> WitResult<()>;
    fn save_step(&self, step: &Step) -> WitResult<()>;
    fn delete_tasks_for_step(&self, job_id: i64, step_no: i32) -> WitResult<()>;

    /// Atomically persist one VM's new `(Status, ChildPid, ChildDeadline)`
    /// together with the RecordGroup describing the transition — this is
    /// the handshake write in §4.1's child-process protocol: the child
    /// must never observe a state where the pid is published but the
    /// status/record are not, or vice versa.
    fn save_vm_and_record_group(&self, vm: &Vm, group: Option<&RecordGroup>) -> WitResult<()>;

    /// Atomically persist everything one scheduling pass touched, plus
    /// that pass's RecordGroup (discarded entirely if nothing changed).
    fn commit_pass(&self, changes: &PassChanges, group: Option<&RecordGroup>) -> WitResult<()>;

    /// Allocate the next RecordGroup id. Must be monotonic across the
    /// whole store (P7): the scheduler reserves its id before dispatching
    /// any child, so children's groups always sort after it.
    fn next_record_group_id(&self) -> WitResult<i64>;
}
