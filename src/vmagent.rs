//! C2: the per-VM agent capability.
//!
//! Opaque remote-exec/file-transfer protocol that runs inside a guest
//! (§1 "Out of scope"). The core only needs three operations from it:
//! wait for the agent to come up after a revert, copy a task's inputs in
//! and its log/results out, and run a command to completion.

use crate::error::WitResult;

pub struct RunOutcome {
    pub exit_code: i32,
    pub log: String,
}

#[allow(async_fn_in_trait)]
pub trait VmAgent: Send + Sync {
    /// Block until the in-guest agent answers, or the timeout elapses.
    /// This is `WaitForToolsInVM` from §4.1's `RunRevert`.
    async fn wait_for_tools(&self, vm: &str, timeout_secs: u64) -> WitResult<()>;

    async fn copy_in(&self, vm: &str, local_path: &str, remote_path: &str) -> WitResult<()>;
    async fn copy_out(&self, vm: &str, remote_path: &str, local_path: &str) -> WitResult<()>;

    /// Run `cmd_line_arg` to completion or until `timeout_secs` elapses.
    async fn run(&self, vm: &str, cmd_line_arg: &str, timeout_secs: u64) -> WitResult<RunOutcome>;
}

/// Scripted double for lifecycle/scheduler tests: canned responses keyed
/// by VM name, with an optional artificial delay to exercise timeouts.
#[derive(Default)]
pub struct FakeVmAgent {
    unreachable: std::sync::Mutex<std::collections::HashSet<String>>,
    outcomes: std::sync::Mutex<std::collections::HashMap<String, RunOutcomeSpec>>,
}

#[derive(Clone)]
struct RunOutcomeSpec {
    exit_code: i32,
    log: String,
}

impl FakeVmAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, vm: &str) {
        self.unreachable.lock().unwrap().insert(vm.to_string());
    }

    pub fn set_outcome(&self, vm: &str, exit_code: i32, log: impl Into<String>) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(vm.to_string(), RunOutcomeSpec { exit_code, log: log.into() });
    }
}

impl VmAgent for FakeVmAgent {
    async fn wait_for_tools(&self, vm: &str, _timeout_secs: u64) -> WitResult<()> {
        if self.unreachable.lock().unwrap().contains(vm) {
            return Err(crate::error::WitError::VmAgent {
                vm: vm.to_string(),
                message: "agent did not respond before timeout".into(),
            });
        }
        Ok(())
    }

    async fn copy_in(&self, vm: &str, _local_path: &str, _remote_path: &str) -> WitResult<()> {
        if self.unreachable.lock().unwrap().contains(vm) {
            return Err(crate::error::WitError::VmAgent {
                vm: vm.to_string(),
                message: "copy-in failed: agent unreachable".into(),
            });
        }
        Ok(())
    }

    async fn copy_out(&self, vm: &str, _remote_path: &str, _local_path: &str) -> WitResult<()> {
        if self.unreachable.lock().unwrap().contains(vm) {
            return Err(crate::error::WitError::VmAgent {
                vm: vm.to_string(),
                message: "copy-out failed: agent unreachable".into(),
            });
        }
        Ok(())
    }

    async fn run(&self, vm: &str, _cmd_line_arg: &str, _timeout_secs: u64) -> WitResult<RunOutcome> {
        if self.unreachable.lock().unwrap().contains(vm) {
            return Err(crate::error::WitError::VmAgent {
                vm: vm.to_string(),
                message: "run failed: agent unreachable".into(),
            });
        }
        let spec = self
            .outcomes
            .lock()
            .unwrap()
            .get(vm)
            .cloned()
            .unwrap_or(RunOutcomeSpec { exit_code: 0, log: String::new() });
        Ok(RunOutcome {
            exit_code: spec.exit_code,
            log: spec.log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    fn default_run_succeeds_with_empty_log() {
        let agent = FakeVmAgent::new();
        let outcome = agent.run("W32", "runtests.exe", 60).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.log.is_empty());
    }

    #[tokio::test]
    fn scripted_outcome_is_returned() {
        let agent = FakeVmAgent::new();
        agent.set_outcome("W32", 1, "one test failed");
        let outcome = agent.run("W32", "runtests.exe", 60).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.log, "one test failed");
    }

    #[tokio::test]
    fn unreachable_agent_fails_every_operation() {
        let agent = FakeVmAgent::new();
        agent.set_unreachable("W32");
        assert!(agent.wait_for_tools("W32", 60).await.is_err());
        assert!(agent.run("W32", "x", 60).await.is_err());
    }
}
