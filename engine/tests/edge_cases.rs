//! Edge case tests for meshdb-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use meshdb_engine::{
    Document, HlcClock, HlcTimestamp, MemoryStore, MergeStrategy, OplogEntry, QueryNode,
    Resolution, Resolver, Store,
};
use serde_json::json;

fn ts(wall: u64, node: &str) -> HlcTimestamp {
    HlcTimestamp::new(wall, 0, node)
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn empty_string_fields() {
    let store = MemoryStore::new();
    store
        .put_document(Document::new(
            "items",
            "item1",
            json!({"name": ""}).to_string(),
            ts(1000, "node1"),
        ))
        .unwrap();

    let doc = store.document("items", "item1").unwrap().unwrap();
    assert_eq!(doc.json().unwrap()["name"], "");
}

#[test]
fn unicode_payloads() {
    let store = MemoryStore::new();
    let clock = HlcClock::new("node1");

    let unicode_names = vec![
        "日本語テスト",      // Japanese
        "Привет мир",        // Russian
        "مرحبا بالعالم",     // Arabic
        "🎉🚀💯",            // Emoji
        "Ω≈ç√∫",             // Math symbols
        "Hello\nWorld\tTab", // Whitespace
    ];

    for (i, name) in unicode_names.iter().enumerate() {
        let key = format!("item_{}", i);
        store
            .put_document(Document::new(
                "items",
                key.clone(),
                json!({"name": name}).to_string(),
                clock.now(),
            ))
            .unwrap();

        let doc = store.document("items", &key).unwrap().unwrap();
        assert_eq!(
            doc.json().unwrap()["name"],
            json!(name),
            "failed for: {}",
            name
        );
    }
}

#[test]
fn unicode_keys_and_collections() {
    let store = MemoryStore::new();
    store
        .put_document(Document::new(
            "мои-заметки",
            "ключ-1",
            json!({"v": 1}).to_string(),
            ts(1, "node1"),
        ))
        .unwrap();

    assert!(store.document("мои-заметки", "ключ-1").unwrap().is_some());
    assert!(store
        .collections()
        .unwrap()
        .contains(&"мои-заметки".to_string()));
}

#[test]
fn node_ids_with_hyphens_survive_the_textual_form() {
    let stamp = HlcTimestamp::new(42, 7, "eu-west-1-node-42");
    let parsed: HlcTimestamp = stamp.to_string().parse().unwrap();
    assert_eq!(parsed, stamp);
}

// ============================================================================
// Payload Shape Edge Cases
// ============================================================================

#[test]
fn deeply_nested_payload_roundtrip() {
    let store = MemoryStore::new();
    let mut value = json!({"leaf": 1});
    for _ in 0..32 {
        value = json!({"inner": value});
    }

    store
        .put_document(Document::new(
            "items",
            "deep",
            value.to_string(),
            ts(1, "node1"),
        ))
        .unwrap();
    assert_eq!(
        store
            .document("items", "deep")
            .unwrap()
            .unwrap()
            .json()
            .unwrap(),
        value
    );
}

#[test]
fn large_payload_roundtrip() {
    let store = MemoryStore::new();
    let big: Vec<i64> = (0..10_000).collect();

    store
        .put_document(Document::new(
            "items",
            "big",
            json!({"data": big}).to_string(),
            ts(1, "node1"),
        ))
        .unwrap();
    let doc = store.document("items", "big").unwrap().unwrap();
    assert_eq!(doc.json().unwrap()["data"].as_array().unwrap().len(), 10_000);
}

#[test]
fn null_payload_fields_are_preserved() {
    let store = MemoryStore::new();
    store
        .put_document(Document::new(
            "items",
            "n",
            json!({"gone": null, "there": 1}).to_string(),
            ts(1, "node1"),
        ))
        .unwrap();
    let doc = store.document("items", "n").unwrap().unwrap();
    assert!(doc.json().unwrap()["gone"].is_null());
}

// ============================================================================
// Resolver Edge Cases
// ============================================================================

#[test]
fn equal_wall_times_break_ties_on_counter_then_node() {
    let resolver = Resolver::default();
    let local = Document::new("items", "k", "{\"v\":1}", HlcTimestamp::new(100, 1, "b"));

    // Same wall and counter, smaller node id: loses.
    let stale = OplogEntry::put("items", "k", "{\"v\":2}", HlcTimestamp::new(100, 1, "a"));
    assert_eq!(resolver.resolve(Some(&local), &stale), Resolution::Ignore);

    // Same wall, higher counter: wins.
    let fresh = OplogEntry::put("items", "k", "{\"v\":3}", HlcTimestamp::new(100, 2, "a"));
    assert!(matches!(
        resolver.resolve(Some(&local), &fresh),
        Resolution::Apply(_)
    ));
}

#[test]
fn merge_with_empty_object_sides() {
    let resolver = Resolver::new(MergeStrategy::DeepMerge);
    let local = Document::new("items", "k", "{}", ts(100, "a"));
    let remote = OplogEntry::put("items", "k", json!({"a": 1}).to_string(), ts(200, "b"));

    let doc = resolver.resolve(Some(&local), &remote).applied().unwrap();
    assert_eq!(doc.json(), Some(json!({"a": 1})));
}

#[test]
fn tombstone_then_resurrection_keeps_latest_write() {
    let store = MemoryStore::new();
    let resolver = Resolver::default();

    store
        .put_document(Document::new(
            "items",
            "phoenix",
            json!({"alive": true}).to_string(),
            ts(100, "a"),
        ))
        .unwrap();
    store
        .delete_document("items", "phoenix", ts(200, "a"))
        .unwrap();

    // A later remote put resurrects the key.
    let rebirth = OplogEntry::put(
        "items",
        "phoenix",
        json!({"alive": true, "again": true}).to_string(),
        ts(300, "b"),
    );
    let local = store.document("items", "phoenix").unwrap();
    let doc = resolver.resolve(local.as_ref(), &rebirth).applied().unwrap();
    store.apply_batch(vec![doc], vec![rebirth]).unwrap();

    let current = store.document("items", "phoenix").unwrap().unwrap();
    assert!(current.is_active());
    assert_eq!(current.timestamp, ts(300, "b"));
}

// ============================================================================
// Query Edge Cases
// ============================================================================

#[test]
fn query_against_heterogeneous_types_never_panics() {
    let store = MemoryStore::new();
    store
        .put_document(Document::new(
            "items",
            "a",
            json!({"v": "string"}).to_string(),
            ts(1, "n"),
        ))
        .unwrap();
    store
        .put_document(Document::new(
            "items",
            "b",
            json!({"v": 42}).to_string(),
            ts(2, "n"),
        ))
        .unwrap();

    // Numeric comparison silently skips the string-valued document.
    let q = QueryNode::Gt {
        field: "v".into(),
        value: json!(10),
    };
    let found = store.find_documents("items", &q).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key, "b");
}

#[test]
fn float_and_integer_numbers_compare() {
    let store = MemoryStore::new();
    store
        .put_document(Document::new(
            "items",
            "f",
            json!({"v": 1.5}).to_string(),
            ts(1, "n"),
        ))
        .unwrap();

    let q = QueryNode::Lt {
        field: "v".into(),
        value: json!(2),
    };
    assert_eq!(store.find_documents("items", &q).unwrap().len(), 1);
}

// ============================================================================
// Oplog Edge Cases
// ============================================================================

#[test]
fn zero_limit_pull_returns_nothing() {
    let store = MemoryStore::new();
    store
        .put_document(Document::new("items", "a", "{}", ts(1, "n")))
        .unwrap();
    assert!(store
        .oplog_after(&HlcTimestamp::zero(), 0)
        .unwrap()
        .is_empty());
}

#[test]
fn out_of_order_batches_still_sort_the_oplog() {
    let store = MemoryStore::new();
    let entries = vec![
        OplogEntry::put("items", "c", "{}", ts(300, "n")),
        OplogEntry::put("items", "a", "{}", ts(100, "n")),
        OplogEntry::put("items", "b", "{}", ts(200, "n")),
    ];
    let docs = entries
        .iter()
        .map(meshdb_engine::document_from_entry)
        .collect();
    store.apply_batch(docs, entries).unwrap();

    let replayed = store.oplog_after(&HlcTimestamp::zero(), 10).unwrap();
    let walls: Vec<u64> = replayed.iter().map(|e| e.timestamp.wall).collect();
    assert_eq!(walls, vec![100, 200, 300]);
}

#[test]
fn cursor_past_the_end_yields_empty() {
    let store = MemoryStore::new();
    store
        .put_document(Document::new("items", "a", "{}", ts(100, "n")))
        .unwrap();
    assert!(store.oplog_after(&ts(900, "n"), 10).unwrap().is_empty());
}
