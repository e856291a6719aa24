//! Engine configuration.
//!
//! Loaded once at startup from `witbot.toml`. Per-host scheduling limits
//! (§4.3) can be overridden per hostname; any host without an override
//! uses `[limits]`.

use std::collections::HashMap;
use std::path::Path;

use facet::Facet;

use crate::error::WitError;

#[derive(Debug, Clone, Facet)]
pub struct Config {
    pub data_dir: String,
    pub control_socket: String,
    #[facet(default)]
    pub limits: HostLimits,
    #[facet(default)]
    pub host_limits: HashMap<String, HostLimits>,
    #[facet(default)]
    pub engine: EngineTuning,
}

/// Per-host scheduling caps (§4.3).
#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct HostLimits {
    #[facet(default = 4)]
    pub max_active_vms: u32,
    /// Optional per §9's open question — defaults to and is clamped by
    /// `max_active_vms`.
    #[facet(default)]
    pub max_running_vms: Option<u32>,
    #[facet(default = 1)]
    pub max_reverting_vms: u32,
    #[facet(default = 2)]
    pub max_reverts_while_running_vms: u32,
    #[facet(default = 2)]
    pub max_vms_when_idle: u32,
    #[facet(default = 3)]
    pub max_vm_errors: u32,
    #[facet(default = 3)]
    pub max_task_tries: u32,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            max_active_vms: 4,
            max_running_vms: None,
            max_reverting_vms: 1,
            max_reverts_while_running_vms: 2,
            max_vms_when_idle: 2,
            max_vm_errors: 3,
            max_task_tries: 3,
        }
    }
}

impl HostLimits {
    /// `MaxRunningVMs` resolved: explicit value clamped to never exceed
    /// `MaxActiveVMs`, or `MaxActiveVMs` itself when unset (§9).
    pub fn effective_max_running_vms(&self) -> u32 {
        match self.max_running_vms {
            Some(v) => v.min(self.max_active_vms),
            None => self.max_active_vms,
        }
    }

    /// Effective reverts cap: the "while running" cap applies whenever the
    /// host has at least one running VM, otherwise the plain cap (§4.3).
    pub fn effective_max_reverting_vms(&self, running_count: u32) -> u32 {
        if running_count > 0 {
            self.max_reverts_while_running_vms
        } else {
            self.max_reverting_vms
        }
    }
}

/// Tuning knobs for VM lifecycle operations and the event loop.
#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct EngineTuning {
    #[facet(default = 60)]
    pub wait_for_tools_in_vm_secs: u64,
    #[facet(default = 10)]
    pub sleep_after_revert_secs: u64,
    /// §9: tasks whose `Timeout` exceeds this do not trigger next-step
    /// preparation — the payoff is too far out.
    #[facet(default = 1800)]
    pub build_timeout_secs: u64,
    /// Safety-net re-arm delay for the event loop (§4.5) in seconds.
    #[facet(default = 600)]
    pub safety_net_secs: u64,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            wait_for_tools_in_vm_secs: 60,
            sleep_after_revert_secs: 10,
            build_timeout_secs: 1800,
            safety_net_secs: 600,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<(), WitError> {
        if self.data_dir.is_empty() {
            return Err(WitError::Validation {
                message: "data_dir must not be empty".into(),
            });
        }
        if self.control_socket.is_empty() {
            return Err(WitError::Validation {
                message: "control_socket must not be empty".into(),
            });
        }
        for (host, limits) in &self.host_limits {
            if limits.max_active_vms == 0 {
                return Err(WitError::Validation {
                    message: format!("host '{host}': max_active_vms must be at least 1"),
                });
            }
        }
        if self.limits.max_active_vms == 0 {
            return Err(WitError::Validation {
                message: "limits.max_active_vms must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Limits in effect for a given hostname: the per-host override if
    /// present, otherwise the default `[limits]` block.
    pub fn limits_for_host(&self, hostname: &str) -> &HostLimits {
        self.host_limits.get(hostname).unwrap_or(&self.limits)
    }
}

pub fn load_config(path: &Path) -> Result<Config, WitError> {
    let contents = std::fs::read_to_string(path).map_err(|source| WitError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    let config: Config = facet_toml::from_str(&contents).map_err(|e| WitError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    config.validate()?;
    Ok(config)
}
