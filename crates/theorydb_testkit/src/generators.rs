//! Property-based test generators using proptest.
//!
//! Strategies produce values the store can represent: sets are non-empty
//! and duplicate-free, numbers are decimal strings, map keys are sorted.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use theorydb_core::{AttributeValue, Item, Number, SortDirection, Value};

/// Decimal number strings: integers and short fixed-point decimals.
pub fn number_text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<i64>().prop_map(|n| n.to_string()),
        (any::<i32>(), 1u32..10_000).prop_map(|(whole, frac)| format!("{whole}.{frac:04}")),
    ]
}

/// Placeholder-safe field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9_]{0,15}").expect("invalid regex")
}

fn scalar_strategy() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        ".{0,24}".prop_map(AttributeValue::S),
        number_text_strategy().prop_map(AttributeValue::N),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(AttributeValue::B),
        any::<bool>().prop_map(AttributeValue::Bool),
        Just(AttributeValue::Null),
        prop::collection::btree_set("[a-z]{0,8}", 1..5)
            .prop_map(|s| AttributeValue::Ss(s.into_iter().collect())),
        prop::collection::btree_set(any::<i32>(), 1..5)
            .prop_map(|s| AttributeValue::Ns(s.into_iter().map(|n| n.to_string()).collect())),
        prop::collection::btree_set(prop::collection::vec(any::<u8>(), 0..8), 1..4)
            .prop_map(|s| AttributeValue::Bs(s.into_iter().collect())),
    ]
}

/// Any wire value, nesting lists and maps up to a few levels deep.
pub fn attribute_value_strategy() -> impl Strategy<Value = AttributeValue> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(AttributeValue::L),
            prop::collection::btree_map("[a-zA-Z_]{1,6}", inner, 0..4).prop_map(AttributeValue::M),
        ]
    })
}

/// A non-empty last-evaluated key.
pub fn key_strategy() -> impl Strategy<Value = Item> {
    prop::collection::btree_map(field_name_strategy(), attribute_value_strategy(), 1..4)
}

/// An optional index name.
pub fn index_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[A-Za-z][A-Za-z0-9_.-]{0,20}")
}

/// An optional sort direction.
pub fn sort_strategy() -> impl Strategy<Value = Option<SortDirection>> {
    prop::option::of(prop_oneof![Just(SortDirection::Asc), Just(SortDirection::Desc)])
}

fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        number_text_strategy().prop_filter_map("unparseable number", |n| {
            Number::parse(&n).ok().map(Value::Number)
        }),
        ".{0,24}".prop_map(Value::String),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        prop::collection::btree_set("[a-z]{0,8}", 1..5).prop_map(Value::StringSet),
        prop::collection::btree_set(any::<i32>(), 1..5)
            .prop_map(|s| Value::NumberSet(s.into_iter().map(Number::from).collect())),
        prop::collection::btree_set(prop::collection::vec(any::<u8>(), 0..8), 1..4)
            .prop_map(|s| Value::BytesSet(s.into_iter().collect::<BTreeSet<_>>())),
    ]
}

/// Any domain value the codec can store.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            prop::collection::btree_map("[a-zA-Z_]{1,6}", inner, 0..4)
                .prop_map(|m: BTreeMap<String, Value>| Value::Map(m)),
        ]
    })
}

/// Domain values with a JSON form: no bytes and no sets.
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        ".{0,24}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            prop::collection::btree_map("[a-zA-Z_]{1,6}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// A configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
