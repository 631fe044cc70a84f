//! Table operations against the in-memory store.

use std::collections::BTreeSet;
use std::time::Duration;

use theorydb_core::{
    BackendError, BatchRetryPolicy, Condition, CoreError, Filter, GetOptions, Key, QueryOptions,
    ReturnValues, ScanOptions, SortKeyCondition, TableConfig, Value, WriteCondition,
};
use theorydb_testkit::fixtures::{Doc, Harness, Note, Secret};
use theorydb_testkit::memory::Operation;

fn seeded_notes() -> Harness<Note> {
    let notes = Harness::<Note>::new();
    for (i, sk) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
        notes.put(&Note::new("P", sk, i as i64)).unwrap();
    }
    notes.put(&Note::new("Q", "a", 10)).unwrap();
    notes
}

#[test]
fn pages_follow_cursors_to_the_end() {
    let notes = seeded_notes();
    let mut options = QueryOptions::new().limit(2);
    let mut seen = Vec::new();
    let mut pages = 0;

    loop {
        let page = notes.query("P", &options).unwrap();
        pages += 1;
        seen.extend(page.items.into_iter().map(|n| n.sk));
        match page.next_cursor {
            Some(cursor) => options = options.cursor(cursor),
            None => break,
        }
    }

    assert_eq!(seen, ["a", "b", "c", "d", "e"]);
    assert_eq!(pages, 3);
    assert_eq!(notes.query_all("P", &QueryOptions::new().limit(2)).unwrap().len(), 5);
}

#[test]
fn descending_query_and_sort_direction_check() {
    let notes = seeded_notes();
    let page = notes
        .query("P", &QueryOptions::new().descending().limit(2))
        .unwrap();
    let sks: Vec<_> = page.items.iter().map(|n| n.sk.as_str()).collect();
    assert_eq!(sks, ["e", "d"]);

    let cursor = page.next_cursor.unwrap();
    let err = notes
        .query("P", &QueryOptions::new().cursor(cursor))
        .unwrap_err();
    assert_eq!(err.to_string(), "validation error: cursor sort does not match query");
}

#[test]
fn index_query_with_cursor() {
    let notes = seeded_notes();
    notes.put(&Note::new("R", "z", 3)).unwrap();

    let options = QueryOptions::new().index("byValue").limit(1);
    let first = notes.query(3, &options).unwrap();
    assert_eq!(first.items.len(), 1);
    let cursor = first.next_cursor.clone().unwrap();

    let second = notes.query(3, &options.clone().cursor(cursor.clone())).unwrap();
    let mut pks: Vec<_> = first
        .items
        .iter()
        .chain(&second.items)
        .map(|n| n.pk.as_str())
        .collect();
    pks.sort_unstable();
    assert_eq!(pks, ["P", "R"]);

    let err = notes
        .query(3, &QueryOptions::new().cursor(cursor))
        .unwrap_err();
    assert_eq!(err.to_string(), "validation error: cursor index does not match query");
}

#[test]
fn filters_apply_after_the_key_condition() {
    let notes = seeded_notes();
    let options = QueryOptions::new()
        .sort(SortKeyCondition::ge("b"))
        .filter(Filter::or(vec![
            Condition::lt("value", 2).into(),
            Condition::is_in("value", [4]).into(),
        ]));
    let found: Vec<_> = notes
        .query_all("P", &options)
        .unwrap()
        .into_iter()
        .map(|n| n.sk)
        .collect();
    assert_eq!(found, ["b", "e"]);

    let scanned = notes
        .scan_all(&ScanOptions::new().filter(Condition::between("value", 1, 3)))
        .unwrap();
    assert_eq!(scanned.len(), 3);
}

#[test]
fn segmented_scan_covers_every_item_once() {
    let notes = Harness::<Note>::new();
    for i in 0..20 {
        notes.put(&Note::new(&format!("p{i:02}"), "s", i)).unwrap();
    }

    let mut values: Vec<_> = notes
        .scan_all_segments(4, Some(2), &ScanOptions::new())
        .unwrap()
        .into_iter()
        .map(|n| n.value)
        .collect();
    values.sort_unstable();
    assert_eq!(values, (0..20).collect::<Vec<_>>());
    assert!(notes.scan_all_segments(0, None, &ScanOptions::new()).is_err());
}

#[test]
fn segmented_scan_concatenates_in_segment_order() {
    let notes = Harness::<Note>::new();
    for i in 0..20 {
        notes.put(&Note::new(&format!("p{i:02}"), "s", i)).unwrap();
    }

    let expected: Vec<_> = (0..4)
        .flat_map(|segment| {
            notes
                .scan_all(&ScanOptions::new().segment(segment, 4))
                .unwrap()
        })
        .map(|n| n.value)
        .collect();
    assert_eq!(expected.len(), 20);

    for workers in [1, 2, 3, 4] {
        for _ in 0..5 {
            let values: Vec<_> = notes
                .scan_all_segments(4, Some(workers), &ScanOptions::new())
                .unwrap()
                .into_iter()
                .map(|n| n.value)
                .collect();
            assert_eq!(values, expected, "workers = {workers}");
        }
    }
}

#[test]
fn projection_keeps_keys_and_required_fields() {
    let docs = Harness::<Doc>::new();
    let mut doc = Doc::new("A", "1", "first");
    doc.tags = BTreeSet::from(["x".to_string()]);
    doc.history = vec![Value::from("created")];
    docs.put(&doc).unwrap();

    let projected = docs
        .get_with(("A", "1"), &GetOptions::new().projection(["tags"]))
        .unwrap();
    assert_eq!(projected.name, "first");
    assert_eq!(projected.tags, doc.tags);
    assert!(projected.history.is_empty());
}

#[test]
fn encrypted_attributes_are_sealed_at_rest() {
    let secrets = Harness::<Secret>::new();
    secrets.put(&Secret::new("A", "hunter2")).unwrap();

    let stored = &secrets.stored()[0];
    assert!(stored["secret"].as_m().is_some());
    assert_eq!(secrets.get(Key::partition("A")).unwrap().secret, "hunter2");
    assert_eq!((secrets.kms.generated(), secrets.kms.unwrapped()), (1, 1));

    let err = secrets
        .scan(&ScanOptions::new().filter(Condition::eq("secret", "hunter2")))
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
}

#[test]
fn batch_round_trip_resubmits_unprocessed_work() {
    let notes = Harness::<Note>::with_config(TableConfig::new().batch_write_chunk_size(2));
    let records: Vec<_> = (0..5).map(|i| Note::new("B", &i.to_string(), i)).collect();

    notes.backend.leave_unprocessed(2);
    notes.batch_write(&records, &[]).unwrap();
    assert_eq!(notes.stored().len(), 5);
    assert_eq!(notes.backend.call_count(Operation::BatchWriteItem), 5);
    assert_eq!(
        notes.clock.sleeps(),
        [Duration::from_millis(50), Duration::from_millis(100)]
    );

    let keys: Vec<Key> = (0..5).map(|i| Key::new("B", i.to_string())).collect();
    let fetched = notes.batch_get(&keys).unwrap();
    assert_eq!(fetched.len(), 5);

    notes.batch_write(&[], &keys[..2]).unwrap();
    assert_eq!(notes.stored().len(), 3);
}

#[test]
fn batch_retry_budget_is_bounded() {
    let policy = BatchRetryPolicy::new().max_retries(2);
    let notes = Harness::<Note>::with_config(TableConfig::new().batch_retry(policy));
    notes.backend.leave_unprocessed(usize::MAX);

    let err = notes.batch_get(&[Key::new("A", "a"), Key::new("A", "b")]).unwrap_err();
    assert!(matches!(
        err,
        CoreError::BatchRetryExceeded {
            operation: "batch_get",
            unprocessed: 2
        }
    ));
    assert_eq!(notes.backend.call_count(Operation::BatchGetItem), 3);
}

#[test]
fn transactions_are_all_or_nothing() {
    let notes = Harness::<Note>::new();
    notes.put(&Note::new("T", "taken", 1)).unwrap();

    let err = notes
        .transaction()
        .put(&Note::new("T", "fresh", 2), WriteCondition::new().if_not_exists())
        .put(&Note::new("T", "taken", 3), WriteCondition::new().if_not_exists())
        .execute()
        .unwrap_err();
    assert!(err.is_condition_failed());
    assert_eq!(notes.stored().len(), 1);

    let err = notes
        .transaction()
        .put(&Note::new("T", "fresh", 2), WriteCondition::new().if_not_exists())
        .condition_check(("T", "taken"), WriteCondition::new().field(Condition::eq("value", 99)))
        .execute()
        .unwrap_err();
    assert!(err.is_condition_failed());
    assert_eq!(notes.stored().len(), 1);

    notes
        .transaction()
        .put(&Note::new("T", "fresh", 2), WriteCondition::new().if_not_exists())
        .delete(("T", "taken"), WriteCondition::new().field(Condition::eq("value", 1)))
        .execute()
        .unwrap();
    let sks: Vec<_> = notes
        .query_all("T", &QueryOptions::new())
        .unwrap()
        .into_iter()
        .map(|n| n.sk)
        .collect();
    assert_eq!(sks, ["fresh"]);
}

#[test]
fn empty_transaction_is_rejected() {
    let notes = Harness::<Note>::new();
    let err = notes.transaction().execute().unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
    assert_eq!(notes.backend.call_count(Operation::TransactWriteItems), 0);
}

#[test]
fn optimistic_versioning() {
    let docs = Harness::<Doc>::new();
    let mut doc = Doc::new("V", "1", "draft");
    docs.put_with(&doc, &WriteCondition::new().if_not_exists()).unwrap();

    doc.version = 1;
    doc.name = "final".to_string();
    docs.put_with(&doc, &WriteCondition::new().at_version(0)).unwrap();

    let err = docs
        .put_with(&doc, &WriteCondition::new().at_version(0))
        .unwrap_err();
    assert!(err.is_condition_failed());
    assert_eq!(docs.get(("V", "1")).unwrap().name, "final");
}

#[test]
fn update_builder_against_the_store() {
    let docs = Harness::<Doc>::new();
    let mut doc = Doc::new("U", "1", "notes");
    doc.history = vec![Value::from("created")];
    doc.tags = BTreeSet::from(["a".to_string(), "b".to_string()]);
    docs.put(&doc).unwrap();

    let updated = docs
        .update_builder(("U", "1"))
        .append_to_list("history", vec![Value::from("edited")])
        .add("tags", BTreeSet::from(["c".to_string()]))
        .increment("version")
        .condition_version(0)
        .execute()
        .unwrap()
        .unwrap();
    assert_eq!(updated.history, [Value::from("created"), Value::from("edited")]);
    assert_eq!(
        updated.tags,
        BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()])
    );
    assert_eq!(updated.version, 1);

    let err = docs
        .update_builder(("U", "1"))
        .set("name", "stale")
        .condition_version(0)
        .execute()
        .unwrap_err();
    assert!(err.is_condition_failed());

    let none = docs
        .update_builder(("U", "1"))
        .remove_from_list_at("history", 0)
        .delete("tags", BTreeSet::from(["a".to_string(), "b".to_string()]))
        .return_values(ReturnValues::None)
        .execute()
        .unwrap();
    assert!(none.is_none());
    let stored = docs.get(("U", "1")).unwrap();
    assert_eq!(stored.history, [Value::from("edited")]);
    assert_eq!(stored.tags, BTreeSet::from(["c".to_string()]));
}

#[test]
fn field_map_update_removes_nulls() {
    let docs = Harness::<Doc>::new();
    let mut doc = Doc::new("F", "1", "fields");
    doc.meta = Some(Value::from("m"));
    docs.put(&doc).unwrap();

    let updated = docs
        .update(
            ("F", "1"),
            &theorydb_core::Fields::new()
                .with("name", "renamed")
                .with("meta", Value::Null),
            None,
        )
        .unwrap();
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.meta, None);
}

#[test]
fn transient_errors_are_retried_for_reads() {
    let notes = seeded_notes();
    notes
        .backend
        .fail_next(Operation::Query, BackendError::throttled());

    let page = notes
        .query_with_retry("P", &QueryOptions::new(), None)
        .unwrap();
    assert_eq!(page.items.len(), 5);
    assert_eq!(notes.backend.call_count(Operation::Query), 2);
    assert_eq!(notes.clock.sleeps(), [Duration::from_millis(100)]);
}

#[test]
fn cancelled_table_stops_retrying() {
    let notes = Harness::<Note>::new();
    notes.cancellation_token().cancel();

    let err = notes
        .query_with_retry("P", &QueryOptions::new(), None)
        .unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
    assert_eq!(notes.backend.call_count(Operation::Query), 0);
}

#[test]
fn conditional_delete() {
    let notes = seeded_notes();
    let err = notes
        .delete_with(("P", "a"), &WriteCondition::new().field(Condition::gt("value", 5)))
        .unwrap_err();
    assert!(err.is_condition_failed());

    notes.delete(("P", "a")).unwrap();
    notes.delete(("P", "a")).unwrap();
    assert!(matches!(notes.get(("P", "a")), Err(CoreError::NotFound)));
}
