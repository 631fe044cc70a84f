//! Benchmark utilities.

use rand::distributions::Alphanumeric;
use rand::Rng;
use theorydb_core::{Fields, Value};

/// A random alphanumeric string of `len` characters.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Random bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// A nested map `depth` levels deep with `width` entries per level.
pub fn nested_value(depth: usize, width: usize) -> Value {
    if depth == 0 {
        return Value::from("leaf");
    }
    Value::Map(
        (0..width)
            .map(|i| (format!("key_{i}"), nested_value(depth - 1, width)))
            .collect(),
    )
}

/// Fields for a `Doc` fixture with `tags` tags and a `history` list of
/// `history` entries.
pub fn doc_fields(pk: &str, tags: usize, history: usize) -> Fields {
    Fields::new()
        .with("pk", pk)
        .with("sk", "1")
        .with("name", random_string(24))
        .with("version", 3)
        .with(
            "tags",
            (0..tags).map(|i| format!("tag-{i}")).collect::<std::collections::BTreeSet<_>>(),
        )
        .with(
            "history",
            (0..history).map(|i| Value::from(format!("event-{i}"))).collect::<Vec<_>>(),
        )
        .with("meta", nested_value(2, 3))
}
