//! SacrificeVM (§4.3): pick a victim to power off so a higher-priority
//! revert can proceed within the host's active/idle caps.

use crate::model::{Vm, VmStatus};

/// `idle=2 > sleeping=1 > dirty=0` — tie-break among otherwise equal
/// lamb candidates.
fn status_priority(status: VmStatus) -> u8 {
    match status {
        VmStatus::Idle => 2,
        VmStatus::Sleeping => 1,
        VmStatus::Dirty => 0,
        _ => 0,
    }
}

/// Applicant on whose behalf we are sacrificing: its niceness decides
/// which lambs are "not more important" (`_CompareNeededVMs <= 0`), and
/// whether this is future (speculative) work, which may never sacrifice
/// idle/sleeping VMs.
pub struct Applicant {
    pub niceness: u32,
    pub is_future: bool,
}

/// Pick the best sacrifice victim among `lambs` (already filtered to
/// the same host), or `None` if nothing is eligible.
///
/// `niceness_of` gives each lamb's current `NeededVms` niceness if it
/// has one (a lamb not wanted by anything has no niceness entry and is
/// always eligible, being the least important possible candidate).
pub fn pick_victim<'a>(lambs: &'a [Vm], applicant: &Applicant, niceness_of: impl Fn(&str) -> Option<u32>) -> Option<&'a Vm> {
    lambs
        .iter()
        .filter(|v| !(applicant.is_future && matches!(v.status, VmStatus::Idle | VmStatus::Sleeping)))
        // `_CompareNeededVMs <= 0`: a victim strictly more important
        // (lower niceness) than the applicant is never eligible.
        .filter(|v| !niceness_of(&v.name).is_some_and(|n| n < applicant.niceness))
        // Primary key: least important first (highest niceness; a lamb
        // nobody wants has no entry at all and ranks least important of
        // all). Tie-break by status-priority, then name for determinism.
        .min_by_key(|v| {
            let importance = niceness_of(&v.name).map(|n| n as u64).unwrap_or(u64::MAX);
            (std::cmp::Reverse(importance), std::cmp::Reverse(status_priority(v.status)), v.name.clone())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{VmRole, VmType};

    fn vm(name: &str, status: VmStatus) -> Vm {
        Vm {
            name: name.into(),
            vm_type: VmType::Win32,
            role: VmRole::Base,
            status,
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
    fn prefers_idle_over_sleeping_over_dirty() {
        let lambs = vec![vm("A", VmStatus::Dirty), vm("B", VmStatus::Idle), vm("C", VmStatus::Sleeping)];
        let applicant = Applicant { niceness: 100, is_future: false };
        let victim = pick_victim(&lambs, &applicant, |_| None).unwrap();
        assert_eq!(victim.name, "B");
    }

    #[test]
    fn future_applicant_never_sacrifices_idle_or_sleeping() {
        let lambs = vec![vm("A", VmStatus::Idle), vm("B", VmStatus::Sleeping), vm("C", VmStatus::Dirty)];
        let applicant = Applicant { niceness: 2500, is_future: true };
        let victim = pick_victim(&lambs, &applicant, |_| None).unwrap();
        assert_eq!(victim.name, "C");
    }

    #[test]
    fn more_important_lamb_is_never_sacrificed() {
        let lambs = vec![vm("A", VmStatus::Idle)];
        let applicant = Applicant { niceness: 500, is_future: false };
        // "A" is wanted with a much better (lower) niceness than the
        // applicant -- it is more important and must not be sacrificed.
        let victim = pick_victim(&lambs, &applicant, |name| if name == "A" { Some(10) } else { None });
        assert!(victim.is_none());
    }

    #[test]
    fn equally_or_less_important_lamb_is_eligible() {
        let lambs = vec![vm("A", VmStatus::Idle)];
        let applicant = Applicant { niceness: 10, is_future: false };
        let victim = pick_victim(&lambs, &applicant, |name| if name == "A" { Some(10) } else { None });
        assert!(victim.is_some());
    }

    #[test]
    fn niceness_outranks_status_when_choosing_among_eligible_lambs() {
        // Applicant niceness=5; an idle VM still wanted at niceness=8 (more
        // important than an unwanted lamb) competes with an unwanted dirty
        // VM (no niceness entry, i.e. least important possible). The dirty
        // VM must be sacrificed even though idle outranks dirty on status
        // alone -- niceness is the primary key, status only a tie-break.
        let lambs = vec![vm("Idle", VmStatus::Idle), vm("Dirty", VmStatus::Dirty)];
        let applicant = Applicant { niceness: 5, is_future: false };
        let victim = pick_victim(&lambs, &applicant, |name| if name == "Idle" { Some(8) } else { None });
        assert_eq!(victim.unwrap().name, "Dirty");
    }
}
