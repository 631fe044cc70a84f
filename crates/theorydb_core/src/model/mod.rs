//! Model registry: declared record types resolved into attribute maps, key
//! roles and index lists.

mod definition;
mod record;
mod registry;

pub use definition::{
    AttributeConverter, AttributeDefinition, IndexDefinition, IndexKind, IndexSpec,
    ModelBuilder, ModelDefinition, Projection, Role,
};
pub use record::{Fields, Record};
pub use registry::ModelRegistry;
