use crate::{
    assemble::{FieldError, ViewError},
    cache::CacheError,
    module::{lifecycle::LifecycleError, resolver::ResolutionError},
    policy::PolicyError,
    registry::RegistryError,
    store::StoreError,
};
use thiserror::Error as ThisError;

///
/// Error
///
/// Workspace-level error: every failure family surfaces transparently.
/// Configuration-time families (resolution, field, view, schema) abort a
/// load outright; the rest are per-operation.
///

#[derive(Debug, ThisError)]
#[remain::sorted]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Schema(#[from] moddb_schema::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    View(#[from] ViewError),
}
