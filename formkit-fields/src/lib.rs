//! Entity metadata and field validation
//!
//! `formkit-fields` describes the shape of business entities independently of
//! any UI or data. It knows nothing about live values; `formkit-store`
//! materializes these descriptions into mutable node graphs.
//!
//! # Architecture
//!
//! - **Immutable metadata**: [`EntityDef`]s are built once and shared behind `Arc`
//! - **Shared domains**: a field's [`Domain`] (required flag, validators,
//!   formatters) is shared by every node instantiated for that field
//! - **Registry**: [`EntityRegistry`] resolves entity names in O(1), built in
//!   code or loaded from a directory of YAML files
//! - **Validation**: [`ValidationEngine`] evaluates one field value at a time

pub mod error;
pub mod registry;
pub mod types;
pub mod validation;

pub use error::{FieldsError, Result};
pub use registry::{DomainSpec, EntityRegistry, EntityRegistryBuilder, EntitySpec, EntrySpec};
pub use types::{
    Domain, EntityDef, EntityDefBuilder, EntryDef, FieldDef, FieldType, Rule, Validator,
};
pub use validation::{is_empty_value, ValidationEngine};

/// Scalar and entity-data value type.
pub use serde_json::Value;
