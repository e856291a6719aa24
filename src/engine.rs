//! Wires C3..C8 together into one running engine (§2 data flow, §4.5,
//! §5). Mirrors the teacher's `daemon::run_serve` shape — a
//! `tokio::select!` loop over the control-socket listener, an
//! out-of-band reschedule channel, and a periodic tick — but drives the
//! scheduler (C6) instead of a per-VM `Flow`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::control::{ControlHandle, EngineSignal};
use crate::error::WitResult;
use crate::lifecycle::recovery::NixChildProbe;
use crate::model::record::engine_record;
use crate::model::RecordGroup;
use crate::scheduler::Scheduler;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;
use crate::util::now_unix;

pub struct Engine {
    store: Arc<SqliteStore>,
    config: Config,
}

impl Engine {
    pub fn open(config: Config) -> WitResult<Self> {
        let db_path = PathBuf::from(&config.data_dir).join("witbot.db");
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| crate::error::WitError::Io {
                context: format!("creating data dir {}", parent.display()),
                source: e,
            })?;
        }
        let store = Arc::new(SqliteStore::open(&db_path)?);
        Ok(Self { store, config })
    }

    /// Run until a `shutdown` command arrives or a process signal is
    /// received. Ticks the scheduler on its own schedule (§4.5
    /// `arm_next_tick`) and otherwise reacts to control-channel commands.
    pub async fn run(self) -> WitResult<()> {
        emit_engine_record(&*self.store, true)?;

        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<EngineSignal>();
        let handle = Arc::new(ControlHandle { store: Arc::clone(&self.store), signal_tx: signal_tx.clone() });

        let socket_path = PathBuf::from(&self.config.control_socket);
        let control_handle = Arc::clone(&handle);
        let control_task = tokio::spawn(async move {
            if let Err(e) = crate::control::serve(&socket_path, control_handle).await {
                tracing::error!(error = %e, "control channel exited");
            }
        });

        let mut next_delay = std::time::Duration::from_secs(1);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(next_delay) => {
                    next_delay = self.tick()?;
                }
                Some(signal) = signal_rx.recv() => {
                    match signal {
                        EngineSignal::Reschedule => {
                            next_delay = self.tick()?;
                        }
                        EngineSignal::Shutdown { kill_tasks, kill_vms } => {
                            self.shutdown(kill_tasks, kill_vms)?;
                            break;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown(false, false)?;
                    break;
                }
            }
        }

        control_task.abort();
        emit_engine_record(&*self.store, false)?;
        Ok(())
    }

    fn tick(&self) -> WitResult<std::time::Duration> {
        let scheduler = Scheduler::new(&*self.store, &self.config);
        let outcome = scheduler.run_pass(&NixChildProbe)?;
        Ok(std::time::Duration::from_secs(outcome.next_delay_secs))
    }

    /// Graceful drain (§6 `shutdown`): stop accepting new scheduling
    /// decisions; optionally cancel every running task and/or power off
    /// every active VM before exiting.
    fn shutdown(&self, kill_tasks: bool, kill_vms: bool) -> WitResult<()> {
        tracing::info!(kill_tasks, kill_vms, "engine shutting down");
        if kill_tasks {
            for job in self.store.load_jobs()? {
                if !job.status.is_terminal() {
                    let _ = crate::control::do_cancel(&*self.store, job.id);
                }
            }
        }
        if kill_vms {
            for mut vm in self.store.load_vms()? {
                if vm.status.is_active() {
                    if let Ok(group_id) = self.store.next_record_group_id() {
                        let _ = crate::lifecycle::operations::run_power_off(
                            &mut vm,
                            &*self.store,
                            group_id,
                            self.config.engine.wait_for_tools_in_vm_secs,
                            crate::lifecycle::operations::PowerOffReason::ReclaimIdle,
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

fn emit_engine_record(store: &dyn Store, started: bool) -> WitResult<()> {
    let group = RecordGroup {
        id: store.next_record_group_id()?,
        timestamp: now_unix(),
        records: vec![engine_record(started)],
    };
    store.commit_pass(&crate::store::PassChanges::default(), Some(&group))
}
