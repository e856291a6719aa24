//! C7: append-only activity recorder. `timeline` reconstructs a per-VM
//! history from what this accumulates.

pub mod timeline;

use crate::model::record::tasks_counters_record;
use crate::model::{Record, RecordGroup};
use crate::store::Store;
use crate::util::now_unix;

/// Accumulates the records one scheduling pass produces; turned into a
/// single `RecordGroup` at the end of the pass (§5: "committed as a
/// single RecordGroup at the end of the pass ... or discarded if no
/// state changed").
#[derive(Default)]
pub struct PassRecorder {
    records: Vec<Record>,
}

impl PassRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) {
        self.records.extend(records);
    }

    /// Append the `tasks counters` record, but only if it differs from
    /// the last one persisted (§4.3).
    pub fn push_counters_if_changed(&mut self, store: &dyn Store, runnable: u32, queued: u32, blocked: u32) -> crate::error::WitResult<()> {
        let record = tasks_counters_record(runnable, queued, blocked);
        if store.last_counters_value()? != record.value {
            self.records.push(record);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Materialize into a `RecordGroup` with `group_id`, or `None` if
    /// nothing happened this pass.
    pub fn finish(self, group_id: i64) -> Option<RecordGroup> {
        if self.records.is_empty() {
            None
        } else {
            Some(RecordGroup { id: group_id, timestamp: now_unix(), records: self.records })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn empty_pass_produces_no_group() {
        let recorder = PassRecorder::new();
        assert!(recorder.finish(1).is_none());
    }

    #[test]
    fn counters_only_recorded_when_changed() {
        let store = MemoryStore::new();
        let mut recorder = PassRecorder::new();
        recorder.push_counters_if_changed(&store, 1, 2, 0).unwrap();
        assert_eq!(recorder.records.len(), 1);

        // Commit it, then try to push the same counters again — should
        // not duplicate.
        let group = recorder.finish(store.next_record_group_id().unwrap()).unwrap();
        store.commit_pass(&crate::store::PassChanges::default(), Some(&group)).unwrap();

        let mut recorder2 = PassRecorder::new();
        recorder2.push_counters_if_changed(&store, 1, 2, 0).unwrap();
        assert!(recorder2.is_empty());

        recorder2.push_counters_if_changed(&store, 2, 2, 0).unwrap();
        assert_eq!(recorder2.records.len(), 1);
    }
}
