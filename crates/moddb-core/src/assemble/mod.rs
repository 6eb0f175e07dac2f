mod build;
mod flatten;


pub use build::TableBinding;

use crate::{
    cache::CacheIndex,
    contrib::{ContributionKind, ContributionStore, RegistryName},
    entity::EntityRuntime,
    error::Error,
    module::ModuleName,
    policy::Operation,
};
use moddb_schema::{node::EntityDescriptor, types::FieldType, validate::validate_registry};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error as ThisError;

///
/// FieldError
///
/// Configuration-time field composition failures.
///

#[derive(Debug, ThisError)]
#[remain::sorted]
pub enum FieldError {
    #[error(
        "relation '{registry_name}.{field}' found {found} candidate columns on '{target}' (need exactly 1)"
    )]
    AmbiguousRemote {
        registry_name: RegistryName,
        field: String,
        target: RegistryName,
        found: usize,
    },

    #[error("inheritance cycle: {}", path.join(" -> "))]
    InheritanceCycle { path: Vec<RegistryName> },

    #[error("registry name '{registry_name}' declared under conflicting kinds")]
    KindConflict { registry_name: RegistryName },

    #[error(
        "table '{table}' column '{column}' declared as {declared}, already bound as {existing}"
    )]
    SharedColumnMismatch {
        table: String,
        column: String,
        existing: FieldType,
        declared: FieldType,
    },

    #[error("'{registry_name}' inherits unknown registry name '{ancestor}'")]
    UnknownAncestor {
        registry_name: RegistryName,
        ancestor: RegistryName,
    },

    #[error("relation '{registry_name}.{field}' names missing column '{target}.{remote}'")]
    UnknownRemoteField {
        registry_name: RegistryName,
        field: String,
        target: RegistryName,
        remote: String,
    },

    #[error("relation '{registry_name}.{field}' targets unknown entity '{target}'")]
    UnknownTarget {
        registry_name: RegistryName,
        field: String,
        target: RegistryName,
    },
}

///
/// ViewError
///

#[derive(Debug, ThisError)]
#[remain::sorted]
pub enum ViewError {
    #[error("view entity '{registry_name}' has no view definition")]
    MissingDefinition { registry_name: RegistryName },

    #[error("{operation} is not supported on view entity '{registry_name}'")]
    MutationOnView {
        registry_name: RegistryName,
        operation: Operation,
    },

    #[error("view entity '{registry_name}' declares {found} primary-key columns (exactly 1)")]
    PrimaryKey {
        registry_name: RegistryName,
        found: usize,
    },
}

///
/// AssembledSchema
///
/// The output of one full assembly run: the entity runtimes, the physical
/// table bindings, and the cache invalidation index populated during
/// wrapping.
///

#[derive(Debug)]
pub struct AssembledSchema {
    pub entities: BTreeMap<RegistryName, Arc<EntityRuntime>>,
    pub tables: BTreeMap<String, TableBinding>,
    pub caches: CacheIndex,
}

/// Assemble the contribution store into entity runtimes. Two passes: pass 1
/// flattens field metadata for every registry name, then pass 2 builds each
/// concrete entity against that frozen map — relations resolve against
/// pass-1 output, which is why the barrier between passes is global.
/// Idempotent from scratch; reload runs the whole pipeline again.
pub fn assemble(
    store: &ContributionStore,
    load_order: &[ModuleName],
) -> Result<AssembledSchema, Error> {
    let precedence: Vec<ModuleName> = load_order.iter().rev().cloned().collect();

    let flat = flatten::flatten_all(store, load_order, &precedence)?;

    let caches = CacheIndex::new();
    let mut builder = build::Builder::new(store, load_order, &precedence, &flat, &caches);
    for name in store.registry_names(load_order) {
        if flat.kinds.get(&name) == Some(&ContributionKind::Entity) {
            builder.second_step(&name)?;
        }
    }
    let (entities, tables) = builder.finish();

    let descriptors: BTreeMap<String, EntityDescriptor> = entities
        .iter()
        .map(|(name, runtime)| (name.clone(), runtime.descriptor().clone()))
        .collect();
    validate_registry(&descriptors)
        .map_err(|errs| Error::Schema(moddb_schema::Error::Validation(errs)))?;

    tracing::info!(
        entities = entities.len(),
        tables = tables.len(),
        "schema assembly complete"
    );

    Ok(AssembledSchema {
        entities,
        tables,
        caches,
    })
}
