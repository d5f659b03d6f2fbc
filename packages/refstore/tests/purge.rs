//! Integration test: purging of streams and unused lookup entries.
//!
//! Validates that:
//! - Mark/sweep keeps exactly the lookup entries live data refers to
//! - Purging one stream leaves values shared with other streams intact
//! - Aged and failed streams are purged, fresh ones are kept
//! - Stale marks from an earlier pass never protect an entry
//! - Touching an entry resets its stream's age

use refstore::kv::{KvStore, KvWrite, MemoryKvStore};
use refstore::lookup::LookupTable;
use refstore::schema;
use refstore::{
    CompositeKey, KeyPrefix, MapDefinition, ProcessingState, RefDataStore, RefStreamDefinition,
    StoreConfig, Tag, TypedValue, ValueRange,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open() -> RefDataStore<MemoryKvStore> {
    RefDataStore::open(MemoryKvStore::default(), StoreConfig::default()).unwrap()
}

fn stream(id: i64) -> RefStreamDefinition {
    RefStreamDefinition::new("0f4e-pipeline", "12", id)
}

/// A key long enough to be interned in the keys UID table.
fn uid_key(i: usize) -> String {
    format!("{:0>100}", i)
}

fn load(store: &RefDataStore<MemoryKvStore>, def: &RefStreamDefinition, keys: &[String]) {
    let mut loader = store.begin_load(def, 0).unwrap();
    for key in keys {
        loader
            .put("map", &KeyPrefix::from(key.as_str()), &TypedValue::from(key.as_str()))
            .unwrap();
    }
    loader
        .put("map", &KeyPrefix::Tags(vec![Tag::new("stream", def.stream_id)]), &TypedValue::Null)
        .unwrap();
    loader.complete().unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn purge_keeps_exactly_the_live_lookups() {
    let store = open();
    let keys: Vec<String> = (0..20).map(uid_key).collect();
    let def = stream(1);
    load(&store, &def, &keys);
    assert_eq!(store.entry_counts().unwrap()["keys-uid-fwd"], 20);

    let map = MapDefinition::new(def.clone(), "map");
    for key in keys.iter().step_by(2) {
        assert!(store
            .delete(&CompositeKey::new(map.clone(), key.as_str()))
            .unwrap());
    }

    let summary = store.purge_unused().unwrap();
    assert_eq!(summary.removed_from("keys-uid"), 10);
    assert_eq!(summary.removed_from("map-defs"), 0);
    assert_eq!(summary.removed_from("stream-parts"), 0);

    let counts = store.entry_counts().unwrap();
    assert_eq!(counts["keys-uid-fwd"], 10);
    assert_eq!(counts["keys-uid-rev"], 10);
    for (i, key) in keys.iter().enumerate() {
        let found = store
            .get(&CompositeKey::new(map.clone(), key.as_str()))
            .unwrap();
        if i % 2 == 0 {
            assert_eq!(found, None);
        } else {
            assert_eq!(found, Some(TypedValue::from(key.as_str())));
        }
    }

    // A second pass finds nothing more to do.
    assert_eq!(store.purge_unused().unwrap().total(), 0);
}

#[test]
fn stale_marks_do_not_protect_entries() {
    let store = open();
    let def = stream(2);
    load(&store, &def, &[uid_key(1)]);
    store
        .delete(&CompositeKey::new(MapDefinition::new(def, "map"), uid_key(1).as_str()))
        .unwrap();

    // Leave marks behind as if an earlier pass had been interrupted.
    {
        let kv = store.kv();
        let mut txn = kv.write_txn().unwrap();
        let tables = refstore::lookup::LookupTables::new(store.config(), &Default::default());
        tables.keys_uid.mark_used(&mut txn, &0u32.to_be_bytes()).unwrap();
        txn.commit().unwrap();
    }
    assert_eq!(store.entry_counts().unwrap()[schema::KEYS_UID.used.name()], 1);

    let summary = store.purge_unused().unwrap();
    assert_eq!(summary.removed_from("keys-uid"), 1);
    assert_eq!(store.entry_counts().unwrap()[schema::KEYS_UID.used.name()], 0);
}

#[test]
fn purging_a_stream_keeps_shared_data() {
    let store = open();
    let shared: Vec<String> = (0..5).map(uid_key).collect();
    let (a, b) = (stream(10), stream(11));
    load(&store, &a, &shared);
    load(&store, &b, &shared);
    let map_a = MapDefinition::new(a.clone(), "map");
    store
        .put_range(&map_a, ValueRange::new(-100, 100).unwrap(), &TypedValue::from("around zero"))
        .unwrap();

    let purged = store.purge_ref_stream(&a).unwrap().unwrap();
    assert_eq!(purged.maps, 1);
    assert_eq!(purged.entries, 7);
    // Only the range value is not shared with stream b.
    assert_eq!(purged.values_deleted, 1);

    let summary = store.purge_unused().unwrap();
    assert_eq!(summary.removed_from("keys-uid"), 0, "keys still used by stream b");
    assert_eq!(summary.removed_from("map-defs"), 1);
    assert_eq!(summary.removed_from("tag-values"), 1);

    let map_b = MapDefinition::new(b.clone(), "map");
    for key in &shared {
        assert_eq!(
            store.get(&CompositeKey::new(map_b.clone(), key.as_str())).unwrap(),
            Some(TypedValue::from(key.as_str()))
        );
    }
    assert!(store.get_processing_info(&a).unwrap().is_none());
    assert!(store.is_loaded(&b).unwrap());
}

#[test]
fn purge_old_data_removes_idle_and_failed_streams() {
    let store = open();
    let (fresh, idle, failed) = (stream(20), stream(21), stream(22));
    for def in [&fresh, &idle, &failed] {
        load(&store, def, &[uid_key(def.stream_id as usize)]);
    }
    let age = store.config().purge_age_ms as i64;
    let now = 100 * age;
    store.update_last_accessed_at(&fresh, now - age).unwrap();
    store.update_last_accessed_at(&idle, now - age - 1).unwrap();
    store.update_last_accessed_at(&failed, now).unwrap();
    store
        .set_processing_state(&failed, ProcessingState::Failed)
        .unwrap();

    let summary = store.purge_old_data(now).unwrap();
    assert_eq!(summary.streams_purged, 2);
    assert_eq!(summary.streams_failed, 0);
    assert_eq!(summary.unused.removed_from("keys-uid"), 2);

    let streams: Vec<RefStreamDefinition> = store
        .list_ref_streams()
        .unwrap()
        .into_iter()
        .map(|(def, _)| def)
        .collect();
    assert_eq!(streams, vec![fresh]);
    assert_eq!(store.entry_counts().unwrap()["keys-uid-fwd"], 1);
}

#[test]
fn touching_an_entry_keeps_its_stream_from_aging_out() {
    let store = open();
    let def = stream(40);
    load(&store, &def, &[uid_key(40)]);
    store.update_last_accessed_at(&def, 0).unwrap();

    let key = CompositeKey::new(MapDefinition::new(def.clone(), "map"), uid_key(40).as_str());
    assert!(store.update_last_accessed(&key).unwrap());
    let touched = store
        .get_processing_info(&def)
        .unwrap()
        .unwrap()
        .last_accessed_time_ms;
    assert!(touched > 0);

    let age = store.config().purge_age_ms as i64;
    assert_eq!(store.purge_old_data(touched + age).unwrap().streams_purged, 0);
    assert!(store.is_loaded(&def).unwrap());
    assert_eq!(store.purge_old_data(touched + age + 1).unwrap().streams_purged, 1);
    assert!(store.get(&key).unwrap().is_none());
}

#[test]
fn purging_everything_empties_the_store() {
    let store = open();
    let defs: Vec<RefStreamDefinition> = (30..33).map(stream).collect();
    for def in &defs {
        load(&store, def, &[uid_key(1), uid_key(2)]);
    }
    for def in &defs {
        store.purge_ref_stream(def).unwrap().unwrap();
    }
    store.purge_unused().unwrap();

    let counts = store.entry_counts().unwrap();
    for (table, count) in counts {
        if table == schema::META.name() {
            continue;
        }
        assert_eq!(count, 0, "table {} should be empty", table);
    }
}
