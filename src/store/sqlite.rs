//! `rusqlite`-backed `Store` implementation.
//!
//! Schema is created on open; each public method runs inside its own
//! transaction (or, for multi-row batches, a single transaction covering
//! the whole batch) so a crash never leaves a torn write (§5 "Shared-
//! resource policy": the persistence layer is the only shared mutable
//! resource).

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{WitError, WitResult};
use crate::model::{
    Job, JobStatus, Record, RecordGroup, RecordType, Step, StepType, Task, TaskStatus, Vm, VmRole, VmStatus, VmType,
};

use super::{PassChanges, Store};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> WitResult<Self> {
        let conn = Connection::open(path).map_err(|e| WitError::Store {
            message: format!("opening database at {}: {e}", path.display()),
        })?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> WitResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| WitError::Store {
            message: format!("opening in-memory database: {e}"),
        })?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> WitResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS vms (
                name TEXT PRIMARY KEY,
                vm_type TEXT NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                virt_uri TEXT NOT NULL,
                virt_domain TEXT NOT NULL,
                idle_snapshot TEXT NOT NULL,
                hostname TEXT NOT NULL,
                child_pid INTEGER,
                child_deadline INTEGER,
                errors INTEGER NOT NULL,
                sort_order INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY,
                user TEXT NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL,
                submitted INTEGER NOT NULL,
                ended INTEGER,
                patch TEXT
            );
            CREATE TABLE IF NOT EXISTS steps (
                job_id INTEGER NOT NULL,
                no INTEGER NOT NULL,
                previous_no INTEGER,
                status TEXT NOT NULL,
                step_type TEXT NOT NULL,
                file_name TEXT,
                file_type TEXT,
                in_staging INTEGER NOT NULL,
                debug_level INTEGER NOT NULL,
                report_successful_tests INTEGER NOT NULL,
                PRIMARY KEY (job_id, no)
            );
            CREATE TABLE IF NOT EXISTS tasks (
                job_id INTEGER NOT NULL,
                step_no INTEGER NOT NULL,
                no INTEGER NOT NULL,
                vm TEXT NOT NULL,
                status TEXT NOT NULL,
                timeout INTEGER NOT NULL,
                cmd_line_arg TEXT,
                started INTEGER,
                ended INTEGER,
                test_failures INTEGER NOT NULL,
                PRIMARY KEY (job_id, step_no, no)
            );
            CREATE TABLE IF NOT EXISTS record_groups (
                id INTEGER PRIMARY KEY,
                timestamp INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS records (
                group_id INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                record_type TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT,
                PRIMARY KEY (group_id, seq)
            );
            CREATE INDEX IF NOT EXISTS record_groups_timestamp ON record_groups(timestamp, id);
            ",
        )
        .map_err(|e| WitError::Store {
            message: format!("running migrations: {e}"),
        })?;
        Ok(())
    }
}

// ── row <-> model conversions ─────────────────────────────────────

fn vm_from_row(row: &rusqlite::Row) -> rusqlite::Result<Vm> {
    Ok(Vm {
        name: row.get("name")?,
        vm_type: parse_enum(row.get::<_, String>("vm_type")?.as_str()),
        role: parse_role(row.get::<_, String>("role")?.as_str()),
        status: VmStatus::from_str(row.get::<_, String>("status")?.as_str()).unwrap_or(VmStatus::Off),
        virt_uri: row.get("virt_uri")?,
        virt_domain: row.get("virt_domain")?,
        idle_snapshot: row.get("idle_snapshot")?,
        hostname: row.get("hostname")?,
        child_pid: row.get("child_pid")?,
        child_deadline: row.get("child_deadline")?,
        errors: row.get::<_, i64>("errors")? as u32,
        sort_order: row.get("sort_order")?,
    })
}

fn parse_enum(s: &str) -> VmType {
    match s {
        "build" => VmType::Build,
        "win32" => VmType::Win32,
        "win64" => VmType::Win64,
        _ => VmType::Wine,
    }
}

fn vm_type_str(t: VmType) -> &'static str {
    match t {
        VmType::Build => "build",
        VmType::Win32 => "win32",
        VmType::Win64 => "win64",
        VmType::Wine => "wine",
    }
}

fn parse_role(s: &str) -> VmRole {
    match s {
        "base" => VmRole::Base,
        "winetest" => VmRole::Winetest,
        "extra" => VmRole::Extra,
        "retired" => VmRole::Retired,
        _ => VmRole::Deleted,
    }
}

fn role_str(r: VmRole) -> &'static str {
    match r {
        VmRole::Base => "base",
        VmRole::Winetest => "winetest",
        VmRole::Extra => "extra",
        VmRole::Retired => "retired",
        VmRole::Deleted => "deleted",
    }
}

fn job_status_str(s: JobStatus) -> &'static str {
    s.as_str()
}

fn parse_job_status(s: &str) -> JobStatus {
    match s {
        "queued" => JobStatus::Queued,
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "badpatch" => JobStatus::BadPatch,
        "badbuild" => JobStatus::BadBuild,
        "boterror" => JobStatus::BotError,
        "skipped" => JobStatus::Skipped,
        _ => JobStatus::Canceled,
    }
}

fn job_from_row(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get("id")?,
        user: row.get("user")?,
        priority: row.get("priority")?,
        status: parse_job_status(row.get::<_, String>("status")?.as_str()),
        submitted: row.get("submitted")?,
        ended: row.get("ended")?,
        patch: row.get("patch")?,
    })
}

fn step_type_str(t: StepType) -> &'static str {
    match t {
        StepType::Suite => "suite",
        StepType::Single => "single",
        StepType::Build => "build",
        StepType::Reconfig => "reconfig",
    }
}

fn parse_step_type(s: &str) -> StepType {
    match s {
        "suite" => StepType::Suite,
        "single" => StepType::Single,
        "build" => StepType::Build,
        _ => StepType::Reconfig,
    }
}

fn step_from_row(row: &rusqlite::Row) -> rusqlite::Result<Step> {
    Ok(Step {
        job_id: row.get("job_id")?,
        no: row.get("no")?,
        previous_no: row.get("previous_no")?,
        status: parse_job_status(row.get::<_, String>("status")?.as_str()),
        step_type: parse_step_type(row.get::<_, String>("step_type")?.as_str()),
        file_name: row.get("file_name")?,
        file_type: row.get("file_type")?,
        in_staging: row.get::<_, i64>("in_staging")? != 0,
        debug_level: row.get("debug_level")?,
        report_successful_tests: row.get::<_, i64>("report_successful_tests")? != 0,
    })
}

fn task_status_str(s: TaskStatus) -> &'static str {
    s.as_str()
}

fn parse_task_status(s: &str) -> TaskStatus {
    match s {
        "queued" => TaskStatus::Queued,
        "running" => TaskStatus::Running,
        "completed" => TaskStatus::Completed,
        "badpatch" => TaskStatus::BadPatch,
        "badbuild" => TaskStatus::BadBuild,
        "boterror" => TaskStatus::BotError,
        "canceled" => TaskStatus::Canceled,
        _ => TaskStatus::Skipped,
    }
}

fn task_from_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        job_id: row.get("job_id")?,
        step_no: row.get("step_no")?,
        no: row.get("no")?,
        vm: row.get("vm")?,
        status: parse_task_status(row.get::<_, String>("status")?.as_str()),
        timeout: row.get::<_, i64>("timeout")? as u64,
        cmd_line_arg: row.get("cmd_line_arg")?,
        started: row.get("started")?,
        ended: row.get("ended")?,
        test_failures: row.get::<_, i64>("test_failures")? as u32,
    })
}

fn write_vm(tx: &rusqlite::Transaction, vm: &Vm) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO vms (name, vm_type, role, status, virt_uri, virt_domain, idle_snapshot, hostname,
                          child_pid, child_deadline, errors, sort_order)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
         ON CONFLICT(name) DO UPDATE SET
            vm_type=excluded.vm_type, role=excluded.role, status=excluded.status,
            virt_uri=excluded.virt_uri, virt_domain=excluded.virt_domain,
            idle_snapshot=excluded.idle_snapshot, hostname=excluded.hostname,
            child_pid=excluded.child_pid, child_deadline=excluded.child_deadline,
            errors=excluded.errors, sort_order=excluded.sort_order",
        params![
            vm.name,
            vm_type_str(vm.vm_type),
            role_str(vm.role),
            vm.status.as_str(),
            vm.virt_uri,
            vm.virt_domain,
            vm.idle_snapshot,
            vm.hostname,
            vm.child_pid,
            vm.child_deadline,
            vm.errors,
            vm.sort_order,
        ],
    )?;
    Ok(())
}

fn write_job(tx: &rusqlite::Transaction, job: &Job) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO jobs (id, user, priority, status, submitted, ended, patch)
         VALUES (?1,?2,?3,?4,?5,?6,?7)
         ON CONFLICT(id) DO UPDATE SET
            user=excluded.user, priority=excluded.priority, status=excluded.status,
            submitted=excluded.submitted, ended=excluded.ended, patch=excluded.patch",
        params![
            job.id,
            job.user,
            job.priority,
            job_status_str(job.status),
            job.submitted,
            job.ended,
            job.patch,
        ],
    )?;
    Ok(())
}

fn write_step(tx: &rusqlite::Transaction, step: &Step) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO steps (job_id, no, previous_no, status, step_type, file_name, file_type,
                            in_staging, debug_level, report_successful_tests)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
         ON CONFLICT(job_id, no) DO UPDATE SET
            previous_no=excluded.previous_no, status=excluded.status, step_type=excluded.step_type,
            file_name=excluded.file_name, file_type=excluded.file_type, in_staging=excluded.in_staging,
            debug_level=excluded.debug_level, report_successful_tests=excluded.report_successful_tests",
        params![
            step.job_id,
            step.no,
            step.previous_no,
            job_status_str(step.status),
            step_type_str(step.step_type),
            step.file_name,
            step.file_type,
            step.in_staging as i64,
            step.debug_level,
            step.report_successful_tests as i64,
        ],
    )?;
    Ok(())
}

fn write_task(tx: &rusqlite::Transaction, task: &Task) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO tasks (job_id, step_no, no, vm, status, timeout, cmd_line_arg, started, ended, test_failures)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
         ON CONFLICT(job_id, step_no, no) DO UPDATE SET
            vm=excluded.vm, status=excluded.status, timeout=excluded.timeout,
            cmd_line_arg=excluded.cmd_line_arg, started=excluded.started, ended=excluded.ended,
            test_failures=excluded.test_failures",
        params![
            task.job_id,
            task.step_no,
            task.no,
            task.vm,
            task_status_str(task.status),
            task.timeout as i64,
            task.cmd_line_arg,
            task.started,
            task.ended,
            task.test_failures,
        ],
    )?;
    Ok(())
}

fn write_record_group(tx: &rusqlite::Transaction, group: &RecordGroup) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO record_groups (id, timestamp) VALUES (?1, ?2)",
        params![group.id, group.timestamp],
    )?;
    for (seq, rec) in group.records.iter().enumerate() {
        tx.execute(
            "INSERT INTO records (group_id, seq, record_type, name, value) VALUES (?1,?2,?3,?4,?5)",
            params![group.id, seq as i64, rec.record_type.as_str(), rec.name, rec.value],
        )?;
    }
    Ok(())
}

impl Store for SqliteStore {
    fn load_vms(&self) -> WitResult<Vec<Vm>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM vms ORDER BY sort_order, name")
            .map_err(store_err)?;
        let rows = stmt.query_map([], vm_from_row).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    fn load_vm(&self, name: &str) -> WitResult<Option<Vm>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM vms WHERE name = ?1", params![name], vm_from_row)
            .optional()
            .map_err(store_err)
    }

    fn load_jobs(&self) -> WitResult<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY priority, id").map_err(store_err)?;
        let rows = stmt.query_map([], job_from_row).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    fn load_job(&self, id: i64) -> WitResult<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM jobs WHERE id = ?1", params![id], job_from_row)
            .optional()
            .map_err(store_err)
    }

    fn load_steps(&self, job_id: i64) -> WitResult<Vec<Step>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM steps WHERE job_id = ?1 ORDER BY no")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![job_id], step_from_row).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    fn load_tasks_for_job(&self, job_id: i64) -> WitResult<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM tasks WHERE job_id = ?1 ORDER BY step_no, no")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![job_id], task_from_row).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    fn load_tasks_for_step(&self, job_id: i64, step_no: i32) -> WitResult<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM tasks WHERE job_id = ?1 AND step_no = ?2 ORDER BY no")
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![job_id, step_no], task_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    fn load_record_groups_since(&self, since_ts: i64) -> WitResult<Vec<RecordGroup>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, timestamp FROM record_groups WHERE timestamp >= ?1 ORDER BY timestamp, id")
            .map_err(store_err)?;
        let group_rows: Vec<(i64, i64)> = stmt
            .query_map(params![since_ts], |r| Ok((r.get(0)?, r.get(1)?)))
            .map_err(store_err)?
            .collect::<rusqlite::Result<_>>()
            .map_err(store_err)?;

        let mut groups = Vec::with_capacity(group_rows.len());
        let mut rec_stmt = conn
            .prepare("SELECT record_type, name, value FROM records WHERE group_id = ?1 ORDER BY seq")
            .map_err(store_err)?;
        for (id, timestamp) in group_rows {
            let records = rec_stmt
                .query_map(params![id], |r| {
                    let rt: String = r.get(0)?;
                    Ok(Record {
                        record_type: match rt.as_str() {
                            "engine" => RecordType::Engine,
                            "tasks" => RecordType::Tasks,
                            "vmresult" => RecordType::VmResult,
                            _ => RecordType::VmStatus,
                        },
                        name: r.get(1)?,
                        value: r.get(2)?,
                    })
                })
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?;
            groups.push(RecordGroup { id, timestamp, records });
        }
        Ok(groups)
    }

    fn last_counters_value(&self) -> WitResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM records WHERE record_type = 'tasks' AND name = 'counters'
             ORDER BY group_id DESC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()
        .map_err(store_err)
    }

    fn save_job(&self, job: &Job) -> WitResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(store_err)?;
        write_job(&tx, job).map_err(store_err)?;
        tx.commit().map_err(store_err)
    }

    fn save_step(&self, step: &Step) -> WitResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(store_err)?;
        write_step(&tx, step).map_err(store_err)?;
        tx.commit().map_err(store_err)
    }

    fn delete_tasks_for_step(&self, job_id: i64, step_no: i32) -> WitResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM tasks WHERE job_id = ?1 AND step_no = ?2",
            params![job_id, step_no],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn save_vm_and_record_group(&self, vm: &Vm, group: Option<&RecordGroup>) -> WitResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(store_err)?;
        write_vm(&tx, vm).map_err(store_err)?;
        if let Some(g) = group {
            write_record_group(&tx, g).map_err(store_err)?;
        }
        tx.commit().map_err(store_err)
    }

    fn commit_pass(&self, changes: &PassChanges, group: Option<&RecordGroup>) -> WitResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(store_err)?;
        for vm in &changes.vms {
            write_vm(&tx, vm).map_err(store_err)?;
        }
        for job in &changes.jobs {
            write_job(&tx, job).map_err(store_err)?;
        }
        for step in &changes.steps {
            write_step(&tx, step).map_err(store_err)?;
        }
        for task in &changes.tasks {
            write_task(&tx, task).map_err(store_err)?;
        }
        if let Some(g) = group {
            write_record_group(&tx, g).map_err(store_err)?;
        }
        tx.commit().map_err(store_err)
    }

    fn next_record_group_id(&self) -> WitResult<i64> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i64> = conn
            .query_row("SELECT MAX(id) FROM record_groups", [], |r| r.get(0))
            .map_err(store_err)?;
        Ok(max.unwrap_or(0) + 1)
    }
}

fn store_err(e: rusqlite::Error) -> WitError {
    WitError::Store { message: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{VmRole, VmStatus, VmType};

    fn test_vm(name: &str) -> Vm {
        Vm {
            name: name.into(),
            vm_type: VmType::Win32,
            role: VmRole::Base,
            status: VmStatus::Off,
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

    #[test]
    fn roundtrips_a_vm() {
        let store = SqliteStore::open_in_memory().unwrap();
        let vm = test_vm("W32");
        store.save_vm_and_record_group(&vm, None).unwrap();
        let loaded = store.load_vm("W32").unwrap().unwrap();
        assert_eq!(loaded, vm);
    }

    #[test]
    fn upsert_updates_existing_vm() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut vm = test_vm("W32");
        store.save_vm_and_record_group(&vm, None).unwrap();
        vm.status = VmStatus::Reverting;
        vm.child_pid = Some(123);
        store.save_vm_and_record_group(&vm, None).unwrap();
        let loaded = store.load_vm("W32").unwrap().unwrap();
        assert_eq!(loaded.status, VmStatus::Reverting);
        assert_eq!(loaded.child_pid, Some(123));
    }

    #[test]
    fn record_group_ids_are_monotonic_across_restarts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id1 = store.next_record_group_id().unwrap();
        let group = RecordGroup {
            id: id1,
            timestamp: 1000,
            records: vec![crate::model::record::engine_record(true)],
        };
        store.save_vm_and_record_group(&test_vm("W32"), Some(&group)).unwrap();
        let id2 = store.next_record_group_id().unwrap();
        assert!(id2 > id1);
    }

    #[test]
    fn load_record_groups_since_orders_by_timestamp_then_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        for ts in [200, 100, 100] {
            let id = store.next_record_group_id().unwrap();
            let group = RecordGroup {
                id,
                timestamp: ts,
                records: vec![],
            };
            store.save_vm_and_record_group(&test_vm("W32"), Some(&group)).unwrap();
        }
        let groups = store.load_record_groups_since(0).unwrap();
        assert_eq!(groups.len(), 3);
        assert!(groups.windows(2).all(|w| {
            (w[0].timestamp, w[0].id) <= (w[1].timestamp, w[1].id)
        }));
    }

    #[test]
    fn commit_pass_is_all_or_nothing_in_one_transaction() {
        let store = SqliteStore::open_in_memory().unwrap();
        let changes = PassChanges {
            vms: vec![test_vm("W32"), test_vm("W64")],
            ..PassChanges::default()
        };
        store.commit_pass(&changes, None).unwrap();
        assert_eq!(store.load_vms().unwrap().len(), 2);
    }
}
