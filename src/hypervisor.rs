//! C1: the hypervisor driver capability.
//!
//! The core never speaks libvirt (or any other hypervisor API) directly;
//! it depends on this trait only. Concrete drivers live outside the core's
//! size budget (§1 "Out of scope" names the hypervisor driver as opaque) —
//! `FakeHypervisor` below stands in for both tests and for wiring the
//! engine before a real driver exists.

use crate::error::WitResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

#[allow(async_fn_in_trait)]
pub trait Hypervisor: Send + Sync {
    /// Power on `domain` at `uri` and revert it to `snapshot` in one step
    /// (the two are inseparable on the driver side: reverting a running
    /// domain first requires stopping it).
    async fn revert_to_snapshot(&self, uri: &str, domain: &str, snapshot: &str) -> WitResult<()>;

    /// Hard power-off; no guest cooperation assumed (§4.1: "hypervisor
    /// hard-off; guest OS shutdown not required").
    async fn power_off(&self, uri: &str, domain: &str) -> WitResult<()>;

    async fn power_state(&self, uri: &str, domain: &str) -> WitResult<PowerState>;
}

/// In-memory double used by lifecycle/scheduler tests. Tracks the power
/// state of every domain it has seen so repeated calls compose the way a
/// real driver's would.
#[derive(Default)]
pub struct FakeHypervisor {
    domains: std::sync::Mutex<std::collections::HashMap<(String, String), PowerState>>,
    pub fail_domains: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl FakeHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, domain: &str) {
        self.fail_domains.lock().unwrap().insert(domain.to_string());
    }

    fn check_fail(&self, domain: &str) -> WitResult<()> {
        if self.fail_domains.lock().unwrap().contains(domain) {
            return Err(crate::error::WitError::Hypervisor {
                vm: domain.to_string(),
                message: "injected failure".into(),
                hint: "test double configured to fail this domain".into(),
            });
        }
        Ok(())
    }
}

impl Hypervisor for FakeHypervisor {
    async fn revert_to_snapshot(&self, uri: &str, domain: &str, _snapshot: &str) -> WitResult<()> {
        self.check_fail(domain)?;
        self.domains
            .lock()
            .unwrap()
            .insert((uri.to_string(), domain.to_string()), PowerState::On);
        Ok(())
    }

    async fn power_off(&self, uri: &str, domain: &str) -> WitResult<()> {
        self.check_fail(domain)?;
        self.domains
            .lock()
            .unwrap()
            .insert((uri.to_string(), domain.to_string()), PowerState::Off);
        Ok(())
    }

    async fn power_state(&self, uri: &str, domain: &str) -> WitResult<PowerState> {
        Ok(self
            .domains
            .lock()
            .unwrap()
            .get(&(uri.to_string(), domain.to_string()))
            .copied()
            .unwrap_or(PowerState::Unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn revert_then_power_off_round_trips() {
        let hv = FakeHypervisor::new();
        hv.revert_to_snapshot("qemu:///system", "w32", "idle").await.unwrap();
        assert_eq!(
            hv.power_state("qemu:///system", "w32").await.unwrap(),
            PowerState::On
        );
        hv.power_off("qemu:///system", "w32").await.unwrap();
        assert_eq!(
            hv.power_state("qemu:///system", "w32").await.unwrap(),
            PowerState::Off
        );
    }

    #[tokio::test]
    async fn unseen_domain_is_unknown() {
        let hv = FakeHypervisor::new();
        assert_eq!(
            hv.power_state("qemu:///system", "nope").await.unwrap(),
            PowerState::Unknown
        );
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_hypervisor_error() {
        let hv = FakeHypervisor::new();
        hv.set_fail("w32");
        let err = hv.revert_to_snapshot("qemu:///system", "w32", "idle").await.unwrap_err();
        assert!(matches!(err, crate::error::WitError::Hypervisor { .. }));
    }
}
