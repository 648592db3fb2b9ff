use chrono::{Duration, Utc};
use mindloom_storage::{MapStore, StoreScope};
use mindloom_types::MindMap;

fn test_map(title: &str) -> MindMap {
    MindMap::new(title)
}

// ── Current document singleton ───────────────────────────────────

#[test]
fn current_starts_empty() {
    let store = MapStore::open_in_memory().unwrap();
    assert!(store.load_current().unwrap().is_none());
}

#[test]
fn save_and_load_current() {
    let store = MapStore::open_in_memory().unwrap();
    let map = test_map("Trip");
    store.save_current(&map).unwrap();
    let loaded = store.load_current().unwrap().unwrap();
    assert_eq!(loaded, map);
}

#[test]
fn save_current_overwrites() {
    let store = MapStore::open_in_memory().unwrap();
    store.save_current(&test_map("v1")).unwrap();
    let v2 = test_map("v2");
    store.save_current(&v2).unwrap();
    assert_eq!(store.load_current().unwrap().unwrap().title, "v2");
}

#[test]
fn clear_current() {
    let store = MapStore::open_in_memory().unwrap();
    store.save_current(&test_map("t")).unwrap();
    store.clear_current().unwrap();
    assert!(store.load_current().unwrap().is_none());
}

// ── Document list ────────────────────────────────────────────────

#[test]
fn local_write_marks_dirty_and_versions() {
    let store = MapStore::open_in_memory().unwrap();
    let map = test_map("Trip");

    let v1 = store.record_local_write(&map, "u1").unwrap();
    assert_eq!(v1, 1);

    let entry = store.get_entry(&map.id).unwrap().unwrap();
    assert!(entry.is_dirty);
    assert_eq!(entry.version, 1);
    assert_eq!(entry.owner_user_id, "u1");
    assert_eq!(entry.map, map);

    let v2 = store.record_local_write(&map, "u1").unwrap();
    assert_eq!(v2, 2);
}

#[test]
fn remote_copy_is_clean_and_preserves_version() {
    let store = MapStore::open_in_memory().unwrap();
    let map = test_map("Trip");

    store.record_local_write(&map, "u1").unwrap();
    store.record_remote_copy(&map, "u1").unwrap();

    let entry = store.get_entry(&map.id).unwrap().unwrap();
    assert!(!entry.is_dirty);
    assert_eq!(entry.version, 1);
}

#[test]
fn get_nonexistent_returns_none() {
    let store = MapStore::open_in_memory().unwrap();
    assert!(store.get_entry("missing").unwrap().is_none());
}

#[test]
fn list_entries_scoped_to_owner() {
    let store = MapStore::open_in_memory().unwrap();
    store.record_local_write(&test_map("a"), "u1").unwrap();
    store.record_local_write(&test_map("b"), "u1").unwrap();
    store.record_local_write(&test_map("c"), "u2").unwrap();

    assert_eq!(store.list_entries("u1").unwrap().len(), 2);
    assert_eq!(store.list_entries("u2").unwrap().len(), 1);
    assert!(store.list_entries("nobody").unwrap().is_empty());
}

#[test]
fn mark_clean_then_dirty() {
    let store = MapStore::open_in_memory().unwrap();
    let map = test_map("Trip");
    store.record_local_write(&map, "u1").unwrap();

    store.mark_clean(&map.id, Utc::now()).unwrap();
    assert!(!store.get_entry(&map.id).unwrap().unwrap().is_dirty);
    assert!(store.list_dirty("u1").unwrap().is_empty());

    store.mark_dirty(&map.id).unwrap();
    assert!(store.get_entry(&map.id).unwrap().unwrap().is_dirty);
    assert_eq!(store.list_dirty("u1").unwrap().len(), 1);
}

#[test]
fn mark_clean_if_version_requires_matching_version() {
    let store = MapStore::open_in_memory().unwrap();
    let map = test_map("Trip");
    store.record_local_write(&map, "u1").unwrap(); // v1
    store.record_local_write(&map, "u1").unwrap(); // v2

    // A push that carried v1 must not clear the newer write's flag
    assert!(!store.mark_clean_if_version(&map.id, 1, Utc::now()).unwrap());
    assert!(store.get_entry(&map.id).unwrap().unwrap().is_dirty);

    assert!(store.mark_clean_if_version(&map.id, 2, Utc::now()).unwrap());
    assert!(!store.get_entry(&map.id).unwrap().unwrap().is_dirty);
}

#[test]
fn mark_clean_if_not_newer_respects_document_timestamp() {
    let store = MapStore::open_in_memory().unwrap();
    let mut map = test_map("Trip");
    store.record_local_write(&map, "u1").unwrap();

    // Confirmation for an older revision is ignored
    let stale = map.updated_at - Duration::seconds(60);
    assert!(!store
        .mark_clean_if_not_newer(&map.id, stale, Utc::now())
        .unwrap());
    assert!(store.get_entry(&map.id).unwrap().unwrap().is_dirty);

    // Confirmation for the same or a newer revision clears the flag
    map.touch();
    assert!(store
        .mark_clean_if_not_newer(&map.id, map.updated_at, Utc::now())
        .unwrap());
    assert!(!store.get_entry(&map.id).unwrap().unwrap().is_dirty);
}

#[test]
fn delete_entry() {
    let store = MapStore::open_in_memory().unwrap();
    let map = test_map("Trip");
    store.record_local_write(&map, "u1").unwrap();
    store.delete_entry(&map.id).unwrap();
    assert!(store.get_entry(&map.id).unwrap().is_none());
}

// ── Eviction support ─────────────────────────────────────────────

#[test]
fn evict_older_than_respects_cutoff_and_protection() {
    let store = MapStore::open_in_memory().unwrap();
    let old = test_map("old");
    let open = test_map("open");
    let fresh = test_map("fresh");
    for m in [&old, &open, &fresh] {
        store.record_local_write(m, "u1").unwrap();
    }
    // Age two of them past the cutoff
    let stale = Utc::now() - Duration::days(40);
    store.mark_clean(&old.id, stale).unwrap();
    store.mark_clean(&open.id, stale).unwrap();

    let cutoff = Utc::now() - Duration::days(30);
    let removed = store
        .evict_older_than("u1", cutoff, Some(&open.id))
        .unwrap();

    assert_eq!(removed, 1);
    assert!(store.get_entry(&old.id).unwrap().is_none());
    assert!(store.get_entry(&open.id).unwrap().is_some());
    assert!(store.get_entry(&fresh.id).unwrap().is_some());
}

#[test]
fn evict_capacity_removes_oldest_excess() {
    let store = MapStore::open_in_memory().unwrap();
    let mut ids = Vec::new();
    for i in 0..5 {
        let map = test_map(&format!("m{i}"));
        store.record_local_write(&map, "u1").unwrap();
        // Spread last_sync so ordering is deterministic
        store
            .mark_clean(&map.id, Utc::now() - Duration::days(10 - i))
            .unwrap();
        ids.push(map.id);
    }

    let removed = store.evict_capacity_excess("u1", 3, None).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(store.count_for_owner("u1").unwrap(), 3);
    // The two oldest are gone
    assert!(store.get_entry(&ids[0]).unwrap().is_none());
    assert!(store.get_entry(&ids[1]).unwrap().is_none());
    assert!(store.get_entry(&ids[4]).unwrap().is_some());
}

#[test]
fn evict_capacity_under_limit_is_noop() {
    let store = MapStore::open_in_memory().unwrap();
    store.record_local_write(&test_map("a"), "u1").unwrap();
    assert_eq!(store.evict_capacity_excess("u1", 100, None).unwrap(), 0);
}

#[test]
fn evict_capacity_skips_protected() {
    let store = MapStore::open_in_memory().unwrap();
    let oldest = test_map("oldest");
    store.record_local_write(&oldest, "u1").unwrap();
    store
        .mark_clean(&oldest.id, Utc::now() - Duration::days(20))
        .unwrap();
    for i in 0..3 {
        store.record_local_write(&test_map(&format!("m{i}")), "u1").unwrap();
    }

    let removed = store.evict_capacity_excess("u1", 3, Some(&oldest.id)).unwrap();
    assert_eq!(removed, 1);
    assert!(store.get_entry(&oldest.id).unwrap().is_some());
}

// ── Janitor timestamps ───────────────────────────────────────────

#[test]
fn janitor_last_run_round_trip() {
    let store = MapStore::open_in_memory().unwrap();
    assert!(store.janitor_last_run("u1").unwrap().is_none());

    let at = Utc::now();
    store.set_janitor_last_run("u1", at).unwrap();
    let loaded = store.janitor_last_run("u1").unwrap().unwrap();
    assert_eq!(loaded.timestamp_millis(), at.timestamp_millis());
}

// ── Scopes ───────────────────────────────────────────────────────

#[test]
fn scopes_are_physically_separate() {
    let dir = tempfile::tempdir().unwrap();
    let local = MapStore::open_scope(dir.path(), StoreScope::Local).unwrap();
    let cloud = MapStore::open_scope(dir.path(), StoreScope::Cloud).unwrap();

    let map = test_map("Trip");
    local.record_local_write(&map, "u1").unwrap();

    assert!(local.get_entry(&map.id).unwrap().is_some());
    assert!(cloud.get_entry(&map.id).unwrap().is_none());
}

#[test]
fn reopen_persists_data() {
    let dir = tempfile::tempdir().unwrap();
    let map = test_map("Trip");
    {
        let store = MapStore::open_scope(dir.path(), StoreScope::Local).unwrap();
        store.record_local_write(&map, "u1").unwrap();
    }
    let store = MapStore::open_scope(dir.path(), StoreScope::Local).unwrap();
    assert_eq!(store.get_entry(&map.id).unwrap().unwrap().map, map);
}
