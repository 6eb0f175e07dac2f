pub mod error;
pub mod node;
pub mod types;
pub mod validate;

/// Maximum length for registry-name identifiers.
pub const MAX_REGISTRY_NAME_LEN: usize = 64;

/// Maximum length for field identifiers.
pub const MAX_FIELD_NAME_LEN: usize = 64;

/// Maximum length for physical table identifiers.
pub const MAX_TABLE_NAME_LEN: usize = 64;

use crate::error::ErrorTree;
use thiserror::Error as ThisError;

///
/// Prelude
///

pub mod prelude {
    pub use crate::{
        err,
        error::ErrorTree,
        node::{BehaviorRef, EntityDescriptor, EntityKind, FieldDescriptor, FieldList, ForeignRef},
        types::FieldType,
    };
    pub use serde::{Deserialize, Serialize};
}

///
/// Error
///

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(ErrorTree),
}
