//! Caller-owned cache of validated models.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::CoreResult;
use crate::model::{ModelDefinition, Record};

/// Resolves record types to their validated models.
///
/// Each record type's `definition()` runs at most once per registry (a racing
/// first resolution may build twice; the first stored result wins). There is
/// no process-wide registry: create one and share it by reference or `Arc`.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<TypeId, Arc<ModelDefinition>>>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve (and cache) the model for `T`.
    pub fn resolve<T: Record>(&self) -> CoreResult<Arc<ModelDefinition>> {
        let key = TypeId::of::<T>();
        if let Some(model) = self.models.read().get(&key) {
            return Ok(Arc::clone(model));
        }

        let model = Arc::new(T::definition()?);
        let mut models = self.models.write();
        Ok(Arc::clone(models.entry(key).or_insert(model)))
    }

    /// Number of cached models.
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// True if nothing has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::model::{AttributeDefinition, Fields};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static BUILDS: AtomicUsize = AtomicUsize::new(0);

    struct Counted;

    impl Record for Counted {
        fn definition() -> CoreResult<ModelDefinition> {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            ModelDefinition::builder("Counted")
                .attribute(AttributeDefinition::new("id").partition_key())
                .build()
        }

        fn to_fields(&self) -> Fields {
            Fields::new()
        }

        fn from_fields(_fields: Fields) -> CoreResult<Self> {
            Ok(Counted)
        }
    }

    struct Broken;

    impl Record for Broken {
        fn definition() -> CoreResult<ModelDefinition> {
            ModelDefinition::builder("Broken").build()
        }

        fn to_fields(&self) -> Fields {
            Fields::new()
        }

        fn from_fields(_fields: Fields) -> CoreResult<Self> {
            Ok(Broken)
        }
    }

    #[test]
    fn caches_per_type() {
        let registry = ModelRegistry::new();
        let first = registry.resolve::<Counted>().unwrap();
        let second = registry.resolve::<Counted>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invalid_models_are_not_cached() {
        let registry = ModelRegistry::new();
        assert!(matches!(
            registry.resolve::<Broken>(),
            Err(CoreError::Validation { .. })
        ));
        assert!(registry.is_empty());
    }
}
