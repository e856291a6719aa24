//! Control channel (§6): a Unix-domain stream socket accepting short
//! newline-terminated commands. Replies are `1` + payload on success,
//! `0` + message on error.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::error::WitResult;
use crate::jobmodel::{cancel_job, restart_job};
use crate::model::JobStatus;
use crate::store::Store;

/// What a command tells the engine to do after the reply is sent.
/// Most commands only touch the store; `Reschedule` additionally wakes
/// the scheduler immediately instead of waiting for the next tick.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    Reschedule,
    Shutdown { kill_tasks: bool, kill_vms: bool },
}

/// Shared handle the control listener uses to reach the running engine:
/// the store for command handling, plus a channel to request an
/// out-of-band scheduler pass or shutdown.
pub struct ControlHandle<S: Store> {
    pub store: Arc<S>,
    pub signal_tx: mpsc::UnboundedSender<EngineSignal>,
}

pub async fn serve(socket_path: &std::path::Path, handle: Arc<ControlHandle<impl Store + 'static>>) -> WitResult<()> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path).map_err(|e| crate::error::WitError::Io {
        context: format!("binding control socket at {}", socket_path.display()),
        source: e,
    })?;

    loop {
        let (stream, _addr) = listener.accept().await.map_err(|e| crate::error::WitError::Io {
            context: "accepting control connection".into(),
            source: e,
        })?;
        let handle = Arc::clone(&handle);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &handle).await {
                tracing::warn!(error = %e, "control connection ended with an error");
            }
        });
    }
}

async fn handle_connection<S: Store>(stream: UnixStream, handle: &ControlHandle<S>) -> WitResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await.map_err(|e| crate::error::WitError::Io {
        context: "reading control command".into(),
        source: e,
    })? {
        let reply = dispatch(&line, handle).await;
        let wire = match reply {
            Ok(payload) => format!("1{payload}\n"),
            Err(message) => format!("0{message}\n"),
        };
        writer.write_all(wire.as_bytes()).await.map_err(|e| crate::error::WitError::Io {
            context: "writing control reply".into(),
            source: e,
        })?;
    }
    Ok(())
}

async fn dispatch<S: Store>(line: &str, handle: &ControlHandle<S>) -> Result<String, String> {
    let mut parts = line.trim_end().split_whitespace();
    let Some(cmd) = parts.next() else {
        return Err("empty command".into());
    };
    let args: Vec<&str> = parts.collect();

    match cmd {
        "ping" => Ok("pong".into()),

        "shutdown" => {
            let kill_tasks = args.first().is_some_and(|a| *a == "1");
            let kill_vms = args.get(1).is_some_and(|a| *a == "1");
            let _ = handle.signal_tx.send(EngineSignal::Shutdown { kill_tasks, kill_vms });
            Ok(String::new())
        }

        "jobstatuschange" => {
            let (Some(job_id), Some(_old), Some(_new)) = (args.first(), args.get(1), args.get(2)) else {
                return Err("usage: jobstatuschange <jobId> <oldStatus> <newStatus>".into());
            };
            job_id.parse::<i64>().map_err(|_| "invalid jobId".to_string())?;
            let _ = handle.signal_tx.send(EngineSignal::Reschedule);
            Ok(String::new())
        }

        "jobcancel" => {
            let Some(job_id_str) = args.first() else {
                return Err("usage: jobcancel <jobId>".into());
            };
            let job_id: i64 = job_id_str.parse().map_err(|_| "invalid jobId".to_string())?;
            do_cancel(&*handle.store, job_id).map_err(|e| e.to_string())?;
            let _ = handle.signal_tx.send(EngineSignal::Reschedule);
            Ok(String::new())
        }

        "jobrestart" => {
            let Some(job_id_str) = args.first() else {
                return Err("usage: jobrestart <jobId>".into());
            };
            let job_id: i64 = job_id_str.parse().map_err(|_| "invalid jobId".to_string())?;
            do_restart(&*handle.store, job_id).map_err(|e| e.to_string())?;
            let _ = handle.signal_tx.send(EngineSignal::Reschedule);
            Ok(String::new())
        }

        "reschedulejobs" => {
            let _ = handle.signal_tx.send(EngineSignal::Reschedule);
            Ok(String::new())
        }

        "vmstatuschange" => {
            let (Some(_vm_key), Some(_old), Some(_new)) = (args.first(), args.get(1), args.get(2)) else {
                return Err("usage: vmstatuschange <vmKey> <oldStatus> <newStatus>".into());
            };
            let _ = handle.signal_tx.send(EngineSignal::Reschedule);
            Ok(String::new())
        }

        "winepatchmlsubmission" | "winepatchwebsubmission" => {
            // Patch ingestion lives outside the core (§1 "Out of scope");
            // acknowledge the trigger so the caller's drain loop doesn't stall.
            Ok(String::new())
        }

        "getscreenshot" => Err("screenshot capture is not available without a VM agent backend".into()),

        other => Err(format!("unknown command: {other}")),
    }
}

pub(crate) fn do_cancel(store: &dyn Store, job_id: i64) -> WitResult<()> {
    let mut job = store.load_job(job_id)?.ok_or(crate::error::WitError::UnknownJob { id: job_id })?;
    let mut steps = store.load_steps(job_id)?;
    let mut tasks = store.load_tasks_for_job(job_id)?;
    let mut vms_by_name = std::collections::HashMap::new();
    for task in &tasks {
        if let Some(vm) = store.load_vm(&task.vm)? {
            vms_by_name.insert(vm.name.clone(), vm);
        }
    }
    let mut running_children = std::collections::HashMap::new();
    let outcome = cancel_job(&mut job, &mut steps, &mut tasks, &mut vms_by_name, |_| {}, &mut running_children);

    let changes = crate::store::PassChanges {
        jobs: vec![outcome.job],
        steps: outcome.steps,
        tasks: outcome.tasks,
        vms: outcome.vms,
    };
    let group = if outcome.records.is_empty() {
        None
    } else {
        Some(crate::model::RecordGroup {
            id: store.next_record_group_id()?,
            timestamp: crate::util::now_unix(),
            records: outcome.records,
        })
    };
    store.commit_pass(&changes, group.as_ref())
}

fn do_restart(store: &dyn Store, job_id: i64) -> WitResult<()> {
    let mut job = store.load_job(job_id)?.ok_or(crate::error::WitError::UnknownJob { id: job_id })?;
    let mut steps = store.load_steps(job_id)?;
    let mut tasks = store.load_tasks_for_job(job_id)?;

    let paths = restart_job(&mut job, &mut steps, &mut tasks)?;

    let changes = crate::store::PassChanges {
        jobs: vec![job],
        steps,
        tasks,
        vms: Vec::new(),
    };
    store.commit_pass(&changes, None)?;
    // Filesystem cleanup is the caller's side effect (§4.2); left to the
    // engine, which knows `DataDir`.
    let _ = paths;
    Ok(())
}

/// Whether `status` is one the web UI/CGI would consider "terminal" for
/// the purposes of a `jobstatuschange` send-log trigger (§6). Exposed so
/// `engine.rs` can decide whether to fire the (out-of-core) notification
/// hook.
pub fn is_terminal_for_notification(status: JobStatus) -> bool {
    status.is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Job;
    use crate::store::memory::MemoryStore;

    fn seed_cancelable_job(store: &MemoryStore) {
        let job = Job {
            id: 1,
            user: "alice".into(),
            priority: 0,
            status: JobStatus::Running,
            submitted: 1,
            ended: None,
            patch: None,
        };
        let steps = vec![crate::model::Step {
            job_id: 1,
            no: 1,
            previous_no: None,
            status: JobStatus::Running,
            step_type: crate::model::StepType::Single,
            file_name: None,
            file_type: None,
            in_staging: false,
            debug_level: 0,
            report_successful_tests: false,
        }];
        let tasks = vec![crate::model::Task {
            job_id: 1,
            step_no: 1,
            no: 1,
            vm: "W32".into(),
            status: crate::model::TaskStatus::Queued,
            timeout: 600,
            cmd_line_arg: None,
            started: None,
            ended: None,
            test_failures: 0,
        }];
        store.seed_job(job, steps, tasks);
    }

    #[tokio::test]
    async fn ping_replies_pong() {
        let store = MemoryStore::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = ControlHandle { store: Arc::new(store), signal_tx: tx };
        assert_eq!(dispatch("ping", &handle).await, Ok("pong".into()));
    }

    #[tokio::test]
    async fn unknown_command_is_an_error_reply() {
        let store = MemoryStore::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = ControlHandle { store: Arc::new(store), signal_tx: tx };
        assert!(dispatch("frobnicate", &handle).await.is_err());
    }

    #[tokio::test]
    async fn jobcancel_skips_queued_tasks_and_signals_reschedule() {
        let store = MemoryStore::new();
        seed_cancelable_job(&store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ControlHandle { store: Arc::new(store), signal_tx: tx };

        let reply = dispatch("jobcancel 1", &handle).await;
        assert!(reply.is_ok());
        assert_eq!(rx.recv().await, Some(EngineSignal::Reschedule));

        let job = handle.store.load_job(1).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Canceled);
    }

    #[tokio::test]
    async fn jobrestart_rejects_non_terminal_job() {
        let store = MemoryStore::new();
        seed_cancelable_job(&store); // status = Running, not terminal
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = ControlHandle { store: Arc::new(store), signal_tx: tx };
        assert!(dispatch("jobrestart 1", &handle).await.is_err());
    }

    #[tokio::test]
    async fn jobcancel_unknown_job_is_an_error_reply() {
        let store = MemoryStore::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = ControlHandle { store: Arc::new(store), signal_tx: tx };
        assert!(dispatch("jobcancel 999", &handle).await.is_err());
    }
}
