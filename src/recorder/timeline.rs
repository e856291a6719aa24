//! Timeline reconstruction (§4.4): replay `vmstatus`/`vmresult` records
//! into a per-VM sequence of status cells with gap-filling and
//! mispredict detection.

use std::collections::HashMap;

use crate::model::record::parse_vmresult_value;
use crate::model::{RecordType, VmStatus};

/// One span of time a VM spent in a given status.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// `"{VMName} {Host}"`, matching `Record::name` (§4.4).
    pub key: String,
    pub status: String,
    /// The `running JobId StepNo TaskNo` suffix, a `dirty poweroff`/
    /// `dirty sacrifice` detail, or a terminal `vmresult` attached by the
    /// gap-fill rule.
    pub extra: Option<String>,
    pub start: i64,
    pub end: i64,
    /// Set when a later RecordGroup's transition for this VM is not a
    /// legal step along §4.1's lifecycle graph (and not an
    /// administrative side-transition).
    pub mispredict: bool,
}

fn is_administrative(status: &str) -> bool {
    matches!(status, "maintenance" | "offline")
}

fn split_status_value(value: &str) -> (String, Option<String>) {
    let mut parts = value.splitn(2, ' ');
    let status = parts.next().unwrap_or("").to_string();
    let extra = parts.next().map(str::to_string);
    (status, extra)
}

/// Replay `groups` (already in `(Timestamp, Id)` order) into a flat list
/// of cells, one per VM per contiguous status span. The final cell per
/// VM is closed with `now`.
pub fn reconstruct(groups: &[crate::model::RecordGroup], now: i64) -> Vec<Cell> {
    let mut open: HashMap<String, Cell> = HashMap::new();
    let mut closed: Vec<Cell> = Vec::new();

    for group in groups {
        for rec in &group.records {
            match rec.record_type {
                RecordType::VmStatus => {
                    let (status, extra) = split_status_value(rec.value.as_deref().unwrap_or(""));
                    if let Some(mut prev) = open.remove(&rec.name) {
                        let mispredict = !is_administrative(&status) && !legal_step(&prev.status, &status);
                        prev.end = group.timestamp;
                        prev.mispredict = mispredict;
                        closed.push(prev);
                    }
                    open.insert(
                        rec.name.clone(),
                        Cell {
                            key: rec.name.clone(),
                            status,
                            extra,
                            start: group.timestamp,
                            end: group.timestamp,
                            mispredict: false,
                        },
                    );
                }
                RecordType::VmResult => {
                    // Gap-fill: attach the result to the still-open cell
                    // unless it's the synthetic `engine` pseudo-cell.
                    if let Some(cell) = open.get_mut(&rec.name)
                        && cell.status != "engine"
                    {
                        let parsed = parse_vmresult_value(rec.value.as_deref().unwrap_or(""));
                        cell.extra = Some(parsed.result);
                    }
                }
                RecordType::Engine | RecordType::Tasks => {}
            }
        }
    }

    for (_, mut cell) in open {
        cell.end = now;
        closed.push(cell);
    }

    closed.sort_by(|a, b| (a.key.as_str(), a.start).cmp(&(b.key.as_str(), b.start)));
    closed
}

fn legal_step(from: &str, to: &str) -> bool {
    let Ok(from) = from.parse::<VmStatus>() else { return true };
    let Ok(to) = to.parse::<VmStatus>() else { return true };
    from.is_legal_transition(to)
}
