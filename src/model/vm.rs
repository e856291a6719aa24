//! VM entity: the unit the lifecycle manager and scheduler operate on.
//!
//! Reconstructed from the store on every pass (see `store::Store::load_vms`);
//! the in-memory copy a pass works with is never shared across passes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmType {
    Build,
    Win32,
    Win64,
    Wine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmRole {
    Base,
    Winetest,
    Extra,
    Retired,
    Deleted,
}

impl VmRole {
    /// `HasEnabledRole` (§3): a VM the scheduler may still assign work to.
    pub fn is_enabled(self) -> bool {
        matches!(self, VmRole::Base | VmRole::Winetest | VmRole::Extra)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmStatus {
    Dirty,
    Reverting,
    Sleeping,
    Idle,
    Running,
    Off,
    Offline,
    Maintenance,
}

impl VmStatus {
    /// `HasEnabledStatus` (§3): administrative holds exclude scheduling.
    pub fn is_enabled(self) -> bool {
        !matches!(self, VmStatus::Offline | VmStatus::Maintenance)
    }

    /// A VM consuming host resources — everything but off/offline/maintenance.
    pub fn is_active(self) -> bool {
        !matches!(self, VmStatus::Off | VmStatus::Offline | VmStatus::Maintenance)
    }

    /// Counts against `MaxRunningVMs` (running/sleeping/dirty can all still
    /// be using CPU/IO, §4.3).
    pub fn counts_as_running(self) -> bool {
        matches!(self, VmStatus::Running | VmStatus::Sleeping | VmStatus::Dirty)
    }

    /// A "lamb" VM: powered on but not committed to imminent work — the
    /// scheduler's sacrificial pool (glossary).
    pub fn is_lamb(self) -> bool {
        matches!(self, VmStatus::Dirty | VmStatus::Idle | VmStatus::Sleeping)
    }

    /// Legal next states along the canonical lifecycle graph (§4.1),
    /// ignoring the administrative side-transitions (those are always
    /// legal from any state and validated separately).
    pub fn legal_successors(self) -> &'static [VmStatus] {
        match self {
            VmStatus::Off => &[VmStatus::Reverting],
            VmStatus::Reverting => &[VmStatus::Sleeping],
            VmStatus::Sleeping => &[VmStatus::Idle],
            VmStatus::Idle => &[VmStatus::Running],
            VmStatus::Running => &[VmStatus::Dirty],
            VmStatus::Dirty => &[VmStatus::Off],
            VmStatus::Offline | VmStatus::Maintenance => &[],
        }
    }

    /// Whether `to` is a legal step from `self` along the canonical graph,
    /// or an administrative side-transition (always legal).
    pub fn is_legal_transition(self, to: VmStatus) -> bool {
        if matches!(to, VmStatus::Maintenance | VmStatus::Offline) {
            return true;
        }
        self.legal_successors().contains(&to)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VmStatus::Dirty => "dirty",
            VmStatus::Reverting => "reverting",
            VmStatus::Sleeping => "sleeping",
            VmStatus::Idle => "idle",
            VmStatus::Running => "running",
            VmStatus::Off => "off",
            VmStatus::Offline => "offline",
            VmStatus::Maintenance => "maintenance",
        }
    }
}

impl std::str::FromStr for VmStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "dirty" => VmStatus::Dirty,
            "reverting" => VmStatus::Reverting,
            "sleeping" => VmStatus::Sleeping,
            "idle" => VmStatus::Idle,
            "running" => VmStatus::Running,
            "off" => VmStatus::Off,
            "offline" => VmStatus::Offline,
            "maintenance" => VmStatus::Maintenance,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    pub name: String,
    pub vm_type: VmType,
    pub role: VmRole,
    pub status: VmStatus,
    pub virt_uri: String,
    pub virt_domain: String,
    pub idle_snapshot: String,
    pub hostname: String,
    pub child_pid: Option<i32>,
    /// Unix timestamp (seconds) after which a supervised child is
    /// considered stuck (§4.1, §5).
    pub child_deadline: Option<i64>,
    pub errors: u32,
    pub sort_order: i32,
}

impl Vm {
    pub fn has_enabled_role(&self) -> bool {
        self.role.is_enabled()
    }

    pub fn has_enabled_status(&self) -> bool {
        self.status.is_enabled()
    }

    /// The hypervisor-domain exclusivity key (§3): `"{VirtURI} {VirtDomain}"`.
    pub fn domain_key(&self) -> String {
        format!("{} {}", self.virt_uri, self.virt_domain)
    }

    /// Whether the VM's `Status`/`ChildPid` pairing is internally coherent
    /// *without* consulting whether a child process is actually alive —
    /// this is the static half of invariant P2; the dynamic half (is the
    /// pid really alive) is checked by `lifecycle::recovery`.
    pub fn status_child_coherent(&self) -> bool {
        match self.child_pid {
            Some(_) => matches!(
                self.status,
                VmStatus::Dirty | VmStatus::Reverting | VmStatus::Sleeping | VmStatus::Running
            ),
            None => true,
        }
    }

    /// A task may target this VM only if it is not retired/deleted/offline
    /// /maintenance — used by the scheduler's `blocked` counter (§4.3).
    pub fn is_blocked_target(&self) -> bool {
        matches!(self.role, VmRole::Retired | VmRole::Deleted) || !self.has_enabled_status()
    }
}
