//! Hypervisor-domain exclusivity register (§4.3, §5).
//!
//! Reset at the start of every pass; `CanScheduleOnVM` in the spec's
//! prose is `DomainRegister::claim` here.

use std::collections::HashMap;

/// Tracks, for the duration of one pass, which VM currently owns each
/// hypervisor domain (`VirtURI VirtDomain` key).
#[derive(Default)]
pub struct DomainRegister {
    owners: HashMap<String, String>,
}

pub enum ClaimResult {
    /// This VM now (or still) owns the domain.
    Claimed,
    /// Another VM owns the domain and is doing real work; cannot be
    /// displaced.
    Busy { owner: String },
    /// Another VM owns the domain and is not a lamb, or `steal` was
    /// false; claim denied without displacing anyone.
    Denied { owner: String },
    /// The domain was stolen from `owner`; caller must force `owner` to
    /// `off` and adjust host counters.
    Stolen { owner: String },
}

impl DomainRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to claim `domain_key` for `vm_name`.
    ///
    /// `owner_is_busy` / `owner_is_lamb` describe the *current* owner (if
    /// any) at the moment of the claim; `steal` mirrors the spec's
    /// `steal = niceness < NEXT_BASE` — speculative future work never
    /// steals.
    pub fn claim(
        &mut self,
        domain_key: &str,
        vm_name: &str,
        owner_is_busy: impl FnOnce(&str) -> bool,
        owner_is_lamb: impl FnOnce(&str) -> bool,
        steal: bool,
    ) -> ClaimResult {
        match self.owners.get(domain_key) {
            None => {
                self.owners.insert(domain_key.to_string(), vm_name.to_string());
                ClaimResult::Claimed
            }
            Some(owner) if owner == vm_name => ClaimResult::Claimed,
            Some(owner) => {
                let owner = owner.clone();
                if owner_is_busy(&owner) {
                    return ClaimResult::Busy { owner };
                }
                if steal && owner_is_lamb(&owner) {
                    self.owners.insert(domain_key.to_string(), vm_name.to_string());
                    ClaimResult::Stolen { owner }
                } else {
                    ClaimResult::Denied { owner }
                }
            }
        }
    }

    /// Record that `vm_name` owns `domain_key` without going through the
    /// claim/steal logic — used to seed the register at pass start from
    /// each VM's current `Status != off`.
    pub fn seed(&mut self, domain_key: &str, vm_name: &str) {
        self.owners.insert(domain_key.to_string(), vm_name.to_string());
    }

    pub fn owner_of(&self, domain_key: &str) -> Option<&str> {
        self.owners.get(domain_key).map(String::as_str)
    }
}
