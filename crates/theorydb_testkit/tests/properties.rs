//! Property tests for the codec, cursors, envelopes, compiler and leases.

use std::sync::Arc;

use proptest::prelude::*;
use theorydb_core::{
    decode_cursor, encode_cursor, value_to_wire, wire_to_value, AttributeValue, BatchRetryPolicy,
    Clock, Condition, CoreError, Cursor, EnvelopeCipher, Fields, Filter, ItemCodec, Key,
    LeaseManager, Placeholders, Record, TableConfig,
};
use theorydb_testkit::fakes::{CountingRandom, ManualClock, StubKms};
use theorydb_testkit::fixtures::{Harness, Note, Secret, MASTER_KEY_ID};
use theorydb_testkit::generators::{
    attribute_value_strategy, index_strategy, key_strategy, sort_strategy, value_strategy,
    PropTestConfig,
};
use theorydb_testkit::memory::{MemoryBackend, Operation, TableSchema};

fn cipher() -> EnvelopeCipher {
    EnvelopeCipher::new(Arc::new(StubKms::new()), MASTER_KEY_ID)
        .with_random(Arc::new(CountingRandom::default()))
}

fn condition_strategy() -> impl Strategy<Value = Condition> {
    let field = prop_oneof![Just("pk"), Just("sk"), Just("value")];
    (field, 0u8..7, value_strategy(), value_strategy()).prop_map(|(field, op, a, b)| match op {
        0 => Condition::eq(field, a),
        1 => Condition::lt(field, a),
        2 => Condition::between(field, a, b),
        3 => Condition::is_in(field, vec![a, b]),
        4 => Condition::begins_with(field, a),
        5 => Condition::exists(field),
        _ => Condition::not_exists(field),
    })
}

fn filter_strategy() -> impl Strategy<Value = Filter> {
    condition_strategy()
        .prop_map(Filter::from)
        .prop_recursive(2, 12, 3, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..3).prop_map(Filter::and),
                prop::collection::vec(inner, 1..3).prop_map(Filter::or),
            ]
        })
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn wire_round_trip(value in value_strategy()) {
        let wire = value_to_wire(&value).unwrap();
        prop_assert_eq!(wire_to_value(&wire).unwrap(), value);
    }

    #[test]
    fn encrypted_round_trip(value in value_strategy()) {
        prop_assume!(!value.is_null());
        let codec = ItemCodec::new(Arc::new(Secret::definition().unwrap()), Some(cipher())).unwrap();
        let fields = Fields::new().with("pk", "A").with("secret", value.clone());

        let item = codec.encode_item(fields).unwrap();
        prop_assert!(item["secret"].as_m().is_some());
        let mut decoded = codec.decode_item(&item).unwrap();
        prop_assert_eq!(decoded.take("secret"), Some(value));
    }

    #[test]
    fn cursor_round_trip(key in key_strategy(), index in index_strategy(), sort in sort_strategy()) {
        let token = encode_cursor(&key, index.as_deref(), sort).unwrap();
        let cursor = decode_cursor(&token).unwrap();
        prop_assert_eq!(&cursor, &Cursor::new(key, index, sort));
        prop_assert_eq!(cursor.encode().unwrap(), token);
    }

    #[test]
    fn envelope_is_bound_to_attribute(
        value in attribute_value_strategy(),
        a in "[a-z]{1,8}",
        b in "[a-z]{1,8}",
    ) {
        prop_assume!(a != b);
        let cipher = cipher();
        let sealed = cipher.encrypt(&value, &a).unwrap();
        prop_assert_eq!(cipher.decrypt(&sealed, &a).unwrap(), value.clone());
        let is_validation = matches!(cipher.decrypt(&sealed, &b), Err(CoreError::Validation { .. }));
        prop_assert!(is_validation);

        let again = cipher.encrypt(&value, &a).unwrap();
        prop_assert_ne!(again, sealed);
    }

    #[test]
    fn filter_compilation_is_deterministic(filter in filter_strategy()) {
        let codec = ItemCodec::new(Arc::new(Note::definition().unwrap()), None).unwrap();
        let compile = || {
            let mut placeholders = Placeholders::new();
            theorydb_core::expr::compile_filter(&filter, &codec, &mut placeholders)
                .map(|expression| (expression, placeholders.into_parts()))
                .map_err(|err| err.to_string())
        };
        let first = compile();
        prop_assert_eq!(&first, &compile());
        if let Ok((expression, (names, values))) = first {
            for placeholder in names.keys() {
                prop_assert!(placeholder.starts_with("#f_"));
                prop_assert!(expression.contains(placeholder.as_str()));
            }
            for placeholder in values.keys() {
                prop_assert!(placeholder.starts_with(":f"));
            }
        }
    }

    #[test]
    fn one_live_lease_at_a_time(steps in prop::collection::vec((0usize..3, 0u32..40), 1..24)) {
        let backend = Arc::new(MemoryBackend::new().with_table(TableSchema::new("locks", "pk", Some("sk"))));
        let clock = Arc::new(ManualClock::at(1_000.0));
        let leases = LeaseManager::new(backend, "locks").unwrap().with_clock(clock.clone());
        let key = leases.lock_key("shared");

        let mut held: Option<(usize, i64)> = None;
        for (holder, wait) in steps {
            clock.advance(std::time::Duration::from_secs(u64::from(wait)));
            let now = clock.now_unix().floor() as i64;
            let free = held.map_or(true, |(_, expires_at)| expires_at <= now);

            match leases.acquire(&key, 30) {
                Ok(lease) => {
                    prop_assert!(free, "holder {} acquired a live lease", holder);
                    held = Some((holder, lease.expires_at));
                }
                Err(CoreError::LeaseHeld) => prop_assert!(!free),
                Err(err) => prop_assert!(false, "unexpected error: {}", err),
            }
        }
    }

    #[test]
    fn batch_calls_are_bounded(max_retries in 0u32..6, keys in 1usize..8) {
        let policy = BatchRetryPolicy::new().max_retries(max_retries);
        let notes = Harness::<Note>::with_config(TableConfig::new().batch_retry(policy));
        notes.backend.leave_unprocessed(usize::MAX);

        let keys: Vec<Key> = (0..keys).map(|i| Key::new("A", i.to_string())).collect();
        let is_exceeded = matches!(notes.batch_get(&keys), Err(CoreError::BatchRetryExceeded { .. }));
        prop_assert!(is_exceeded);
        prop_assert_eq!(
            notes.backend.call_count(Operation::BatchGetItem),
            max_retries as usize + 1
        );
        prop_assert_eq!(notes.clock.sleeps().len(), max_retries as usize);
    }
}

#[test]
fn empty_key_encodes_to_empty_token() {
    let empty = theorydb_core::Item::new();
    assert_eq!(encode_cursor(&empty, Some("byValue"), None).unwrap(), "");
    assert!(matches!(decode_cursor("  "), Err(CoreError::Validation { .. })));
    assert!(matches!(decode_cursor("!!"), Err(CoreError::Validation { .. })));
}

#[test]
fn sealed_values_are_maps() {
    let sealed = cipher()
        .encrypt(&AttributeValue::S("x".to_string()), "secret")
        .unwrap();
    let map = sealed.as_m().unwrap();
    assert_eq!(map["v"], AttributeValue::number(1));
    assert_eq!(map["nonce"].as_b().map(<[u8]>::len), Some(12));
    assert!(map.contains_key("edk") && map.contains_key("ct"));
}
