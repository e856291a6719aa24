//! Integration coverage for timeline reconstruction driven off a real
//! `SqliteStore` (rather than hand-built `RecordGroup`s), confirming
//! P7/P8/P9 hold across the persistence boundary: record groups commit
//! in monotonic id order, round-trip byte-for-byte, and reconstruct into
//! a sane timeline.

use witbot::model::record::{vmstatus_record, vmstatus_running_record};
use witbot::model::RecordGroup;
use witbot::recorder::timeline::reconstruct;
use witbot::store::sqlite::SqliteStore;
use witbot::store::{PassChanges, Store};

#[test]
fn record_groups_round_trip_and_reconstruct_in_commit_order() {
    let store = SqliteStore::open_in_memory().expect("in-memory sqlite opens");

    let g1 = RecordGroup {
        id: store.next_record_group_id().unwrap(),
        timestamp: 100,
        records: vec![vmstatus_record("W32", "host-a", "reverting", None)],
    };
    store.commit_pass(&PassChanges::default(), Some(&g1)).unwrap();

    let g2 = RecordGroup {
        id: store.next_record_group_id().unwrap(),
        timestamp: 110,
        records: vec![vmstatus_record("W32", "host-a", "idle", None)],
    };
    store.commit_pass(&PassChanges::default(), Some(&g2)).unwrap();

    let g3 = RecordGroup {
        id: store.next_record_group_id().unwrap(),
        timestamp: 120,
        records: vec![vmstatus_running_record("W32", "host-a", 1, 1, 1)],
    };
    store.commit_pass(&PassChanges::default(), Some(&g3)).unwrap();

    assert!(g2.id > g1.id && g3.id > g2.id, "record group ids are monotonic (P7)");

    let loaded = store.load_record_groups_since(0).unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded[0].records[0].value.as_deref(), Some("reverting"));

    let cells = reconstruct(&loaded, 200);
    assert_eq!(cells.len(), 3);
    assert_eq!(cells[0].status, "reverting");
    assert_eq!(cells[0].end, 110);
    assert_eq!(cells[2].status, "running");
    assert_eq!(cells[2].extra.as_deref(), Some("1 1 1"));
    assert_eq!(cells[2].end, 200);
}

#[test]
fn load_record_groups_since_excludes_earlier_timestamps() {
    let store = SqliteStore::open_in_memory().expect("in-memory sqlite opens");

    let g1 = RecordGroup {
        id: store.next_record_group_id().unwrap(),
        timestamp: 100,
        records: vec![vmstatus_record("W32", "host-a", "off", None)],
    };
    store.commit_pass(&PassChanges::default(), Some(&g1)).unwrap();

    let g2 = RecordGroup {
        id: store.next_record_group_id().unwrap(),
        timestamp: 200,
        records: vec![vmstatus_record("W32", "host-a", "reverting", None)],
    };
    store.commit_pass(&PassChanges::default(), Some(&g2)).unwrap();

    let recent = store.load_record_groups_since(150).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].timestamp, 200);
}
