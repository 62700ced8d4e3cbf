use chrono::{TimeZone, Utc};
use uuid::Uuid;

use fleet_core::{
    LivenessStatus, RuleItem, RuleProvenance, RuleSet, RuleSetFiles, RuleSetLink, RuleSetStatus,
};

use super::*;

const SID_START: u64 = 3_000_000;

fn make_item(sid: u64, text: &str) -> RuleItem {
    RuleItem {
        id: Uuid::new_v4(),
        gid: 1,
        sid,
        rev: 1,
        msg: "test".to_string(),
        rule_text: text.to_string(),
        rule_hash: String::new(),
        protocol: "ip".to_string(),
        src_sel: "any:any".to_string(),
        dst_sel: "any:any".to_string(),
        keywords: vec![],
        metadata: RuleProvenance::default(),
        created_at: Utc::now(),
    }
}

fn make_set(version: &str, item_count: usize) -> RuleSet {
    RuleSet {
        id: Uuid::new_v4(),
        name: "misp-event-1".to_string(),
        version: version.to_string(),
        event_id: 1,
        event_uuid: String::new(),
        engine: "snort3".to_string(),
        item_count,
        status: RuleSetStatus::Draft,
        active: false,
        created_at: Utc::now(),
        build_time: None,
        deployed_at: None,
        files: RuleSetFiles::default(),
        notes: None,
    }
}

#[test]
fn sid_sequence_starts_at_configured_value() {
    let store = FleetStore::in_memory();
    assert_eq!(store.next_sid(SID_START).unwrap(), 3_000_000);
    assert_eq!(store.next_sid(SID_START).unwrap(), 3_000_001);
}

#[test]
fn seed_raises_counter_above_stored_sids() {
    let store = FleetStore::in_memory();
    store
        .upsert_rule_item_by_hash("h1", 5_000_000, |sid| make_item(sid, "a"))
        .unwrap();
    assert_eq!(store.seed_sid_counter(SID_START).unwrap(), 5_000_000);
    assert_eq!(store.next_sid(SID_START).unwrap(), 5_000_001);
}

#[test]
fn upsert_by_hash_is_idempotent_and_spends_one_sid() {
    let store = FleetStore::in_memory();
    let first = store
        .upsert_rule_item_by_hash("abc", SID_START, |sid| make_item(sid, "alert one"))
        .unwrap();
    let second = store
        .upsert_rule_item_by_hash("abc", SID_START, |sid| make_item(sid, "alert two"))
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.item.sid, second.item.sid);
    assert_eq!(second.item.rule_text, "alert one");
    assert_eq!(store.rule_item_count(), 1);
    assert_eq!(store.next_sid(SID_START).unwrap(), SID_START + 1);
}

#[test]
fn heartbeat_upsert_seeds_never_seen() {
    let store = FleetStore::in_memory();
    let now = Utc::now();
    store
        .upsert_sensor("s1", now, |s| s.metadata.hostname = "probe-1".to_string())
        .unwrap();
    let s = store.get_sensor("s1").unwrap();
    assert_eq!(s.status, LivenessStatus::Inactive);
    assert_eq!(s.metadata.hostname, "probe-1");
}

#[test]
fn update_unknown_sensor_returns_none() {
    let store = FleetStore::in_memory();
    let out = store.update_sensor("ghost", |_| (true, ())).unwrap();
    assert!(out.is_none());
}

#[test]
fn bulk_update_counts_matched_and_modified() {
    let store = FleetStore::in_memory();
    let now = Utc::now();
    for id in ["s1", "s2", "s3"] {
        store.upsert_sensor(id, now, |_| ()).unwrap();
    }
    store
        .update_sensor("s2", |s| (s.desired_rule_versions.insert("V".to_string()), ()))
        .unwrap();

    let result = store
        .update_sensors_where(|_| true, |s| s.desired_rule_versions.insert("V".to_string()))
        .unwrap();
    assert_eq!(result, BulkUpdate { matched: 3, modified: 2 });
}

#[test]
fn create_rule_set_generates_unique_versions() {
    let store = FleetStore::in_memory();
    let now = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();

    let a = store
        .create_rule_set(now, 9, |v| (make_set(v.as_str(), 0), vec![]))
        .unwrap();
    let b = store
        .create_rule_set(now, 9, |v| (make_set(v.as_str(), 0), vec![]))
        .unwrap();
    assert_eq!(a.version, "2025.03.04-050607-e9");
    assert_eq!(b.version, "2025.03.04-050607-e9-01");
}

#[test]
fn items_for_version_follow_sid_order() {
    let store = FleetStore::in_memory();
    let hi = store
        .upsert_rule_item_by_hash("h-hi", 10, |sid| make_item(sid, "first"))
        .unwrap()
        .item;
    let lo = store
        .upsert_rule_item_by_hash("h-lo", 10, |sid| make_item(sid, "second"))
        .unwrap()
        .item;

    let set = store
        .create_rule_set(Utc::now(), 1, |v| {
            let set = make_set(v.as_str(), 2);
            let links = [&lo, &hi]
                .iter()
                .map(|item| RuleSetLink {
                    set_id: set.id,
                    item_id: item.id,
                    set_version: v.to_string(),
                    gid: 1,
                    sid: item.sid,
                    rev: 1,
                })
                .collect();
            (set, links)
        })
        .unwrap();

    let texts: Vec<String> = store
        .rule_items_for_version(&set.version)
        .into_iter()
        .map(|i| i.rule_text)
        .collect();
    assert_eq!(texts, vec!["first", "second"]);
}

#[test]
fn collections_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let store = FleetStore::open(tmp.path()).unwrap();
        store.upsert_sensor("s1", Utc::now(), |_| ()).unwrap();
        store
            .upsert_rule_item_by_hash("h", SID_START, |sid| make_item(sid, "x"))
            .unwrap();
    }
    let store = FleetStore::open(tmp.path()).unwrap();
    assert!(store.get_sensor("s1").is_some());
    assert!(store.find_rule_item_by_hash("h").is_some());
    assert_eq!(store.next_sid(SID_START).unwrap(), SID_START + 1);
}

#[test]
fn failed_write_rolls_back_memory() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("store");
    let store = FleetStore::open(&dir).unwrap();
    store.upsert_sensor("s1", Utc::now(), |_| ()).unwrap();

    // Pull the directory out from under the store so the next write fails.
    std::fs::remove_dir_all(&dir).unwrap();
    std::fs::write(&dir, b"not a directory").unwrap();

    let err = store.upsert_sensor("s2", Utc::now(), |_| ()).unwrap_err();
    assert!(matches!(err, StorageError::Io(_)));
    assert!(store.get_sensor("s2").is_none());
    assert!(store.get_sensor("s1").is_some());
}

#[test]
fn corrupt_collection_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("sensors.json"), b"{ not json").unwrap();
    let err = FleetStore::open(tmp.path()).err().unwrap();
    assert!(matches!(err, StorageError::Corrupt { collection: "sensors", .. }));
}
