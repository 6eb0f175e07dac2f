//! moddb assembles independently authored modules into one queryable schema
//! registry: a dependency resolver orders the modules, each module
//! contributes entity/mixin/behavior fragments, a two-pass assembler
//! composes the final entity runtimes, and a lifecycle state machine drives
//! install/update/uninstall with a conditional-dependency cascade.
//!
//! ## Crate layout
//! - `core`: resolver, contribution store, assembler, lifecycle, registry
//!   pool, storage interface.
//! - `schema`: schema IR (entity/field descriptors) and validation.

pub use moddb_core as core;
pub use moddb_schema as schema;

mod admin;

pub use admin::{Upgrade, upgrade};
pub use moddb_core::Error;
pub use moddb_core::registry::{Loader, clear, clear_all, registry};

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

///
/// Prelude
///
/// The surface module authors and embedders touch: declaration building,
/// the load pipeline, and the runtime entity handles.
///

pub mod prelude {
    pub use crate::{
        Upgrade,
        core::{
            contrib::{ContributionKind, ContributionProps, FieldDecl, Fragment, LoadContext},
            entity::{EntityHandle, EntityQuery, MethodCtx},
            error::Error,
            module::{Module, ModuleDescriptor, ModuleState, catalog::ModuleCatalog},
            registry::{Db, Loader},
            store::{Backend, Cmp, Filter, MemoryBackend, Row, Value},
        },
        schema::types::FieldType,
        upgrade,
    };
}
