use crate::{
    assemble::{
        FieldError, ViewError,
        flatten::{FieldMap, FlattenOutput},
    },
    cache::{CacheCell, CacheIndex, CacheKey},
    contrib::{ContributionProps, ContributionStore, FieldDecl, MethodSpec, RegistryName},
    entity::{EntityRuntime, MethodRuntime},
    error::Error,
    module::ModuleName,
};
use moddb_schema::node::{
    BehaviorRef, EntityDescriptor, EntityKind, FieldDescriptor, FieldList, ForeignRef,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

///
/// TableBinding
///
/// One physical table and the entities bound onto it. The first entity to
/// declare the table owns its column layout; later entities reuse it after
/// a shared-column compatibility check.
///

#[derive(Clone, Debug)]
pub struct TableBinding {
    pub table: String,
    pub owner: RegistryName,
    pub columns: FieldList,
    pub shared_by: Vec<RegistryName>,
}

/// Default physical table for a registry name: dots become underscores.
fn default_table(registry_name: &str) -> String {
    registry_name.to_lowercase().replace('.', "_")
}

///
/// Builder
///
/// Pass 2. Consumes the frozen pass-1 output and synthesizes one immutable
/// [`EntityRuntime`] per entity name. Method chains are wrapped under the
/// requesting entity's cache key even when the body lives on a shared
/// mixin.
///

pub(crate) struct Builder<'a> {
    store: &'a ContributionStore,
    load_order: &'a [ModuleName],
    precedence: &'a [ModuleName],
    flat: &'a FlattenOutput,
    caches: &'a CacheIndex,
    built: BTreeMap<RegistryName, Arc<EntityRuntime>>,
    tables: BTreeMap<String, TableBinding>,
}

impl<'a> Builder<'a> {
    pub(crate) fn new(
        store: &'a ContributionStore,
        load_order: &'a [ModuleName],
        precedence: &'a [ModuleName],
        flat: &'a FlattenOutput,
        caches: &'a CacheIndex,
    ) -> Self {
        Self {
            store,
            load_order,
            precedence,
            flat,
            caches,
            built: BTreeMap::new(),
            tables: BTreeMap::new(),
        }
    }

    pub(crate) fn finish(
        self,
    ) -> (
        BTreeMap<RegistryName, Arc<EntityRuntime>>,
        BTreeMap<String, TableBinding>,
    ) {
        (self.built, self.tables)
    }

    pub(crate) fn second_step(&mut self, name: &str) -> Result<Arc<EntityRuntime>, Error> {
        if let Some(done) = self.built.get(name) {
            return Ok(done.clone());
        }

        let fields = &self.flat.fields[name];
        let props = self.merged_props(name);
        let is_view = props.is_sql_view.unwrap_or(false);

        let mut resolved = FieldList::new();
        for (ident, decl) in fields.iter() {
            resolved.upsert(self.resolve_field(name, ident, decl)?);
        }

        let (kind, table) = if fields.is_empty() && !is_view {
            // Behavior-only entity: drop any declared table name.
            (EntityKind::Behavior, None)
        } else if is_view {
            if props.view_def.is_none() {
                return Err(ViewError::MissingDefinition {
                    registry_name: name.to_string(),
                }
                .into());
            }
            let pk_count = resolved.primary_keys().count();
            if pk_count != 1 {
                return Err(ViewError::PrimaryKey {
                    registry_name: name.to_string(),
                    found: pk_count,
                }
                .into());
            }
            (EntityKind::View, None)
        } else {
            let table = props
                .table_name
                .clone()
                .unwrap_or_else(|| default_table(name));
            self.bind_table(name, &table, &resolved)?;
            (EntityKind::Storage, Some(table))
        };

        let descriptor = EntityDescriptor {
            name: name.to_string(),
            kind,
            table,
            fields: resolved,
            behaviors: self.behavior_refs(name),
        };

        let methods = self.compose_methods(name);
        let runtime = Arc::new(EntityRuntime {
            descriptor,
            methods,
            view_def: props.view_def,
        });

        tracing::debug!(registry_name = name, kind = ?kind, "entity built");
        self.built.insert(name.to_string(), runtime.clone());
        Ok(runtime)
    }

    // Namespace properties across modules in load order: a later module's
    // set keys overwrite an earlier module's.
    fn merged_props(&self, name: &str) -> ContributionProps {
        let mut props = ContributionProps::default();
        for contribution in self.store.contributions_for(self.load_order, name) {
            props.merge(contribution.properties.clone());
        }
        props
    }

    // Fragment provenance in precedence order (index 0 wins).
    fn behavior_refs(&self, name: &str) -> Vec<BehaviorRef> {
        self.store
            .contributions_for(self.precedence, name)
            .into_iter()
            .flat_map(|c| {
                c.ordered_bases.iter().map(|fragment| BehaviorRef {
                    module: c.module.clone(),
                    label: fragment.label.clone(),
                })
            })
            .collect()
    }

    fn bind_table(
        &mut self,
        name: &str,
        table: &str,
        columns: &FieldList,
    ) -> Result<(), FieldError> {
        if let Some(binding) = self.tables.get_mut(table) {
            // Reuse: never redeclare, but shared columns must agree.
            for field in columns {
                if let Some(existing) = binding.columns.get(&field.ident)
                    && existing.ty != field.ty
                {
                    return Err(FieldError::SharedColumnMismatch {
                        table: table.to_string(),
                        column: field.ident.clone(),
                        existing: existing.ty,
                        declared: field.ty,
                    });
                }
            }
            binding.shared_by.push(name.to_string());
        } else {
            self.tables.insert(
                table.to_string(),
                TableBinding {
                    table: table.to_string(),
                    owner: name.to_string(),
                    columns: columns.clone(),
                    shared_by: vec![name.to_string()],
                },
            );
        }
        Ok(())
    }

    fn resolve_field(
        &self,
        entity: &str,
        ident: &str,
        decl: &FieldDecl,
    ) -> Result<FieldDescriptor, FieldError> {
        match decl {
            FieldDecl::Column {
                ty,
                nullable,
                primary_key,
            } => Ok(FieldDescriptor {
                ident: ident.to_string(),
                ty: *ty,
                nullable: *nullable,
                primary_key: *primary_key,
                foreign: None,
                relation: None,
            }),
            FieldDecl::Relation {
                target,
                remote_field,
                nullable,
            } => {
                let target_map = self
                    .flat
                    .fields
                    .get(target)
                    .filter(|_| {
                        self.flat.kinds.get(target)
                            == Some(&crate::contrib::ContributionKind::Entity)
                    })
                    .ok_or_else(|| FieldError::UnknownTarget {
                        registry_name: entity.to_string(),
                        field: ident.to_string(),
                        target: target.clone(),
                    })?;

                let (remote_ident, remote_decl) =
                    self.remote_column(entity, ident, target, remote_field.as_deref(), target_map)?;

                let FieldDecl::Column { ty, .. } = remote_decl else {
                    return Err(FieldError::UnknownRemoteField {
                        registry_name: entity.to_string(),
                        field: ident.to_string(),
                        target: target.clone(),
                        remote: remote_ident,
                    });
                };

                Ok(FieldDescriptor {
                    ident: ident.to_string(),
                    ty: *ty,
                    nullable: *nullable,
                    primary_key: false,
                    foreign: Some(ForeignRef {
                        registry_name: target.clone(),
                        field: remote_ident,
                    }),
                    relation: Some(target.clone()),
                })
            }
        }
    }

    // Explicitly named remote column, or the target's sole primary key.
    fn remote_column<'m>(
        &self,
        entity: &str,
        ident: &str,
        target: &str,
        remote_field: Option<&str>,
        target_map: &'m FieldMap,
    ) -> Result<(String, &'m FieldDecl), FieldError> {
        match remote_field {
            Some(remote) => target_map
                .get(remote)
                .map(|decl| (remote.to_string(), decl))
                .ok_or_else(|| FieldError::UnknownRemoteField {
                    registry_name: entity.to_string(),
                    field: ident.to_string(),
                    target: target.to_string(),
                    remote: remote.to_string(),
                }),
            None => {
                let mut candidates = target_map
                    .iter()
                    .filter(|(_, decl)| decl.is_primary_key());
                match (candidates.next(), candidates.next()) {
                    (Some((remote, decl)), None) => Ok((remote.to_string(), decl)),
                    _ => Err(FieldError::AmbiguousRemote {
                        registry_name: entity.to_string(),
                        field: ident.to_string(),
                        target: target.to_string(),
                        found: target_map.primary_keys().count(),
                    }),
                }
            }
        }
    }

    // Compose override chains: a name's own fragments (precedence order)
    // outrank every inherited level, ancestors follow in the same order.
    // Every cacheable level registers under THIS entity's cache key.
    fn compose_methods(&self, name: &str) -> BTreeMap<String, Vec<MethodRuntime>> {
        let mut chains: BTreeMap<String, Vec<MethodSpec>> = BTreeMap::new();
        let mut visited = BTreeSet::new();
        self.walk_methods(name, &mut visited, &mut chains);

        chains
            .into_iter()
            .map(|(method, specs)| {
                let chain = specs
                    .into_iter()
                    .map(|spec| {
                        let cache = spec.cacheable.then(|| {
                            let cell = Arc::new(CacheCell::new());
                            self.caches
                                .register(CacheKey::new(name, &method), cell.clone());
                            cell
                        });
                        MethodRuntime { spec, cache }
                    })
                    .collect();
                (method, chain)
            })
            .collect()
    }

    fn walk_methods(
        &self,
        name: &str,
        visited: &mut BTreeSet<RegistryName>,
        chains: &mut BTreeMap<String, Vec<MethodSpec>>,
    ) {
        if !visited.insert(name.to_string()) {
            return;
        }

        let contributions = self.store.contributions_for(self.precedence, name);
        for contribution in &contributions {
            for fragment in &contribution.ordered_bases {
                for spec in &fragment.methods {
                    chains.entry(spec.name.clone()).or_default().push(spec.clone());
                }
            }
        }
        for contribution in &contributions {
            for fragment in &contribution.ordered_bases {
                for ancestor in &fragment.inherits {
                    self.walk_methods(ancestor, visited, chains);
                }
            }
        }
    }
}
