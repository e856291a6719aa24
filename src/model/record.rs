//! RecordGroup / Record: the append-only audit log (§3, §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    Engine,
    Tasks,
    VmResult,
    VmStatus,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Engine => "engine",
            RecordType::Tasks => "tasks",
            RecordType::VmResult => "vmresult",
            RecordType::VmStatus => "vmstatus",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub record_type: RecordType,
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordGroup {
    pub id: i64,
    /// Unix timestamp (seconds) — the one-second grain §4.4 reconstruction
    /// relies on; ties within a group are broken by `id`.
    pub timestamp: i64,
    pub records: Vec<Record>,
}

impl RecordGroup {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ── Encoders (§6) ────────────────────────────────────────────────────

pub fn engine_record(started: bool) -> Record {
    Record {
        record_type: RecordType::Engine,
        name: if started { "start" } else { "stop" }.into(),
        value: None,
    }
}

pub fn tasks_counters_record(runnable: u32, queued: u32, blocked: u32) -> Record {
    Record {
        record_type: RecordType::Tasks,
        name: "counters".into(),
        value: Some(format!("{runnable} {queued} {blocked}")),
    }
}

/// `"{VMName} {Host}"` — the key the reconstructor groups cells by (§4.4).
pub fn vmstatus_name(vm_name: &str, host: &str) -> String {
    format!("{vm_name} {host}")
}

/// A plain status transition, e.g. `reverting`, `idle`, `dirty poweroff`.
pub fn vmstatus_record(vm_name: &str, host: &str, status: &str, extra: Option<&str>) -> Record {
    let value = match extra {
        Some(e) if !e.is_empty() => format!("{status} {e}"),
        _ => status.to_string(),
    };
    Record {
        record_type: RecordType::VmStatus,
        name: vmstatus_name(vm_name, host),
        value: Some(value),
    }
}

/// A `running` transition with the task it is now executing.
pub fn vmstatus_running_record(vm_name: &str, host: &str, job_id: i64, step_no: i32, task_no: i32) -> Record {
    vmstatus_record(vm_name, host, "running", Some(&format!("{job_id} {step_no} {task_no}")))
}

/// A terminal task outcome, `"{result}[ {tries} {maxtries}][ {details}]"`.
pub fn vmresult_record(
    vm_name: &str,
    host: &str,
    result: &str,
    tries_maxtries: Option<(u32, u32)>,
    details: Option<&str>,
) -> Record {
    let mut value = result.to_string();
    if let Some((tries, maxtries)) = tries_maxtries {
        value.push_str(&format!(" {tries} {maxtries}"));
    }
    if let Some(d) = details
        && !d.is_empty()
    {
        value.push(' ');
        value.push_str(d);
    }
    Record {
        record_type: RecordType::VmResult,
        name: vmstatus_name(vm_name, host),
        value: Some(value),
    }
}

/// Parsed view of a `vmresult` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmResultValue {
    pub result: String,
    pub tries: Option<u32>,
    pub maxtries: Option<u32>,
    pub details: Option<String>,
}

/// Parse a `vmresult` record value per the stricter rule adopted for §9's
/// open question: the extras are `tries maxtries` only if *both* of the
/// first two whitespace-separated tokens after `result` parse as integers;
/// otherwise the entire remainder is free-form `details`.
pub fn parse_vmresult_value(value: &str) -> VmResultValue {
    let mut parts = value.split_whitespace();
    let Some(result) = parts.next() else {
        return VmResultValue {
            result: String::new(),
            tries: None,
            maxtries: None,
            details: None,
        };
    };
    let rest: Vec<&str> = parts.collect();

    if rest.len() >= 2
        && let (Ok(tries), Ok(maxtries)) = (rest[0].parse::<u32>(), rest[1].parse::<u32>())
    {
        let details = if rest.len() > 2 {
            Some(rest[2..].join(" "))
        } else {
            None
        };
        return VmResultValue {
            result: result.to_string(),
            tries: Some(tries),
            maxtries: Some(maxtries),
            details,
        };
    }

    let details = if rest.is_empty() { None } else { Some(rest.join(" ")) };
    VmResultValue {
        result: result.to_string(),
        tries: None,
        maxtries: None,
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_running_extra() {
        let r = vmstatus_running_record("W32", "host-a", 1, 1, 1);
        assert_eq!(r.name, "W32 host-a");
        assert_eq!(r.value.as_deref(), Some("running 1 1 1"));
    }

    #[test]
    fn encodes_sacrifice_poweroff() {
        let r = vmstatus_record("W32", "host-a", "dirty", Some("sacrifice"));
        assert_eq!(r.value.as_deref(), Some("dirty sacrifice"));
    }

    #[test]
    fn encodes_vmresult_with_tries() {
        let r = vmresult_record("W32", "host-a", "boterror", Some((2, 3)), Some("stuck process"));
        assert_eq!(r.value.as_deref(), Some("boterror 2 3 stuck process"));
    }

    #[test]
    fn parses_strict_tries_maxtries() {
        let v = parse_vmresult_value("boterror 2 3 stuck process");
        assert_eq!(v.result, "boterror");
        assert_eq!(v.tries, Some(2));
        assert_eq!(v.maxtries, Some(3));
        assert_eq!(v.details.as_deref(), Some("stuck process"));
    }

    #[test]
    fn non_integer_first_token_is_details_not_tries() {
        // Only one of the two tokens is an integer — whole remainder is details.
        let v = parse_vmresult_value("timeout after 90s");
        assert_eq!(v.result, "timeout");
        assert_eq!(v.tries, None);
        assert_eq!(v.maxtries, None);
        assert_eq!(v.details.as_deref(), Some("after 90s"));
    }

    #[test]
    fn single_integer_token_is_not_tries_maxtries() {
        // Only one token present at all — can't be a tries/maxtries pair.
        let v = parse_vmresult_value("canceled 7");
        assert_eq!(v.tries, None);
        assert_eq!(v.details.as_deref(), Some("7"));
    }

    #[test]
    fn no_extras_at_all() {
        let v = parse_vmresult_value("completed");
        assert_eq!(v.result, "completed");
        assert_eq!(v.tries, None);
        assert_eq!(v.details, None);
    }
}
