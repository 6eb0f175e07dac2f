use crate::{
    assemble::ViewError,
    cache::CacheCell,
    contrib::{MethodSpec, ViewDef},
    error::Error,
    policy::Operation,
    registry::{Db, RegistryError},
    store::{Backend, Cmp, Filter, Row, StoreError, Value},
};
use moddb_schema::node::{EntityDescriptor, EntityKind};
use std::{collections::BTreeMap, fmt, sync::Arc};

///
/// MethodRuntime
///
/// One level of a composed method chain. Level 0 is the dispatch target;
/// deeper levels are reachable through [`MethodCtx::inherited`]. A level is
/// wrapped in a cache cell iff its own spec carries the cacheable flag.
///

pub struct MethodRuntime {
    pub(crate) spec: MethodSpec,
    pub(crate) cache: Option<Arc<CacheCell>>,
}

impl fmt::Debug for MethodRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRuntime")
            .field("spec", &self.spec)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

///
/// EntityRuntime
///
/// The permanent assembly output for one registry name: the frozen
/// descriptor plus the composed method chains. Immutable after assembly;
/// cache cells are the only interior-mutable state.
///

pub struct EntityRuntime {
    pub(crate) descriptor: EntityDescriptor,
    pub(crate) methods: BTreeMap<String, Vec<MethodRuntime>>,
    pub(crate) view_def: Option<ViewDef>,
}

impl EntityRuntime {
    #[must_use]
    pub const fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[must_use]
    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for EntityRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRuntime")
            .field("descriptor", &self.descriptor)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("view", &self.view_def.is_some())
            .finish()
    }
}

fn dispatch(
    db: &Db,
    runtime: &Arc<EntityRuntime>,
    chain: &[MethodRuntime],
    level: usize,
    args: &[Value],
) -> Result<Value, Error> {
    let method = &chain[level];

    if let Some(cache) = &method.cache
        && let Some(hit) = cache.lookup(args)
    {
        return Ok(hit);
    }

    let ctx = MethodCtx {
        db,
        runtime,
        chain,
        level,
    };
    let value = (method.spec.body)(&ctx, args)?;

    if let Some(cache) = &method.cache {
        cache.store(args, value.clone());
    }
    Ok(value)
}

///
/// MethodCtx
///
/// Execution context handed to method bodies: the database, the concrete
/// entity the method was composed into, and the override chain position.
///

pub struct MethodCtx<'a> {
    db: &'a Db,
    runtime: &'a Arc<EntityRuntime>,
    chain: &'a [MethodRuntime],
    level: usize,
}

impl MethodCtx<'_> {
    #[must_use]
    pub const fn db(&self) -> &Db {
        self.db
    }

    #[must_use]
    pub fn entity_name(&self) -> &str {
        self.runtime.name()
    }

    /// Handle on the entity this method runs against.
    #[must_use]
    pub fn entity(&self) -> EntityHandle {
        EntityHandle {
            runtime: self.runtime.clone(),
            db: self.db.clone(),
        }
    }

    /// Call the next implementation in the override chain. Goes through the
    /// inherited level's cache when that level is cacheable.
    pub fn inherited(&self, args: &[Value]) -> Result<Value, Error> {
        let next = self.level + 1;
        if next >= self.chain.len() {
            return Err(RegistryError::NoInherited {
                entity: self.runtime.name().to_string(),
                method: self.chain[self.level].spec.name.clone(),
            }
            .into());
        }
        dispatch(self.db, self.runtime, self.chain, next, args)
    }
}

///
/// EntityHandle
///
/// Bound pair of an assembled entity and a database; the runtime surface
/// for rows and method calls.
///

#[derive(Clone)]
pub struct EntityHandle {
    pub(crate) runtime: Arc<EntityRuntime>,
    pub(crate) db: Db,
}

impl EntityHandle {
    #[must_use]
    pub fn descriptor(&self) -> &EntityDescriptor {
        self.runtime.descriptor()
    }

    #[must_use]
    pub const fn runtime(&self) -> &Arc<EntityRuntime> {
        &self.runtime
    }

    fn check_policy(&self, operation: Operation) -> Result<(), Error> {
        self.db
            .policy()
            .check(self.runtime.name(), operation)
            .map_err(Error::from)
    }

    // Mutations are storage-only: views fail loudly, behavior-only
    // entities have nothing to write to.
    fn writable_table(&self, operation: Operation) -> Result<String, Error> {
        let descriptor = self.runtime.descriptor();
        match descriptor.kind {
            EntityKind::View => Err(ViewError::MutationOnView {
                registry_name: descriptor.name.clone(),
                operation,
            }
            .into()),
            EntityKind::Behavior => {
                Err(StoreError::NoTable(descriptor.name.clone()).into())
            }
            EntityKind::Storage => descriptor
                .table
                .clone()
                .ok_or_else(|| StoreError::NoTable(descriptor.name.clone()).into()),
        }
    }

    fn primary_key_field(&self) -> Result<String, Error> {
        self.runtime
            .descriptor()
            .primary_key()
            .map(|f| f.ident.clone())
            .ok_or_else(|| StoreError::NoPrimaryKey(self.runtime.name().to_string()).into())
    }

    // Check provided cells against the descriptor; with `complete`, fill
    // absent nullable columns with Null and require the rest.
    fn validate_row(&self, mut row: Row, complete: bool) -> Result<Row, Error> {
        let descriptor = self.runtime.descriptor();

        for (column, value) in &row {
            let Some(field) = descriptor.fields.get(column) else {
                return Err(StoreError::UnknownColumn {
                    target: descriptor.name.clone(),
                    column: column.clone(),
                }
                .into());
            };
            if value.is_null() {
                if !field.nullable {
                    return Err(StoreError::MissingValue {
                        column: column.clone(),
                    }
                    .into());
                }
            } else if value.field_type() != Some(field.ty) {
                return Err(StoreError::TypeMismatch {
                    column: column.clone(),
                    expected: field.ty,
                    found: value.to_string(),
                }
                .into());
            }
        }

        if complete {
            for field in &descriptor.fields {
                if row.contains_key(&field.ident) {
                    continue;
                }
                if field.nullable {
                    row.insert(field.ident.clone(), Value::Null);
                } else {
                    return Err(StoreError::MissingValue {
                        column: field.ident.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(row)
    }

    pub fn insert(&self, row: Row) -> Result<(), Error> {
        self.check_policy(Operation::Insert)?;
        let table = self.writable_table(Operation::Insert)?;
        let row = self.validate_row(row, true)?;

        if let Some(pk) = self.runtime.descriptor().primary_key() {
            let key = row.get(&pk.ident).cloned().unwrap_or(Value::Null);
            let existing = self
                .db
                .backend()
                .first(&table, &Filter::eq(pk.ident.clone(), key.clone()))?;
            if existing.is_some() {
                return Err(StoreError::DuplicateKey { table, key }.into());
            }
        }

        self.db.backend().insert(&table, row)?;
        Ok(())
    }

    /// Fetch one row by primary key.
    pub fn get(&self, key: impl Into<Value>) -> Result<Option<Row>, Error> {
        let pk = self.primary_key_field()?;
        self.query().filter(pk, Cmp::Eq, key).first()
    }

    /// Patch the row with the given primary key; returns rows touched.
    pub fn update(&self, key: impl Into<Value>, patch: Row) -> Result<u64, Error> {
        self.check_policy(Operation::Update)?;
        let table = self.writable_table(Operation::Update)?;
        let pk = self.primary_key_field()?;
        let patch = self.validate_row(patch, false)?;

        let touched = self
            .db
            .backend()
            .update(&table, &Filter::eq(pk, key), &patch)?;
        Ok(touched)
    }

    /// Delete the row with the given primary key; returns rows removed.
    pub fn delete(&self, key: impl Into<Value>) -> Result<u64, Error> {
        self.check_policy(Operation::Delete)?;
        let table = self.writable_table(Operation::Delete)?;
        let pk = self.primary_key_field()?;

        let removed = self.db.backend().delete(&table, &Filter::eq(pk, key))?;
        Ok(removed)
    }

    #[must_use]
    pub fn query(&self) -> EntityQuery {
        EntityQuery {
            handle: self.clone(),
            filter: Filter::new(),
        }
    }

    /// Invoke a composed method; cacheable levels are served from their
    /// memoized adapters.
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value, Error> {
        self.check_policy(Operation::Call)?;
        let chain = self.runtime.methods.get(method).ok_or_else(|| {
            RegistryError::MethodNotFound {
                entity: self.runtime.name().to_string(),
                method: method.to_string(),
            }
        })?;

        dispatch(&self.db, &self.runtime, chain, 0, args)
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle")
            .field("entity", &self.runtime.name())
            .finish_non_exhaustive()
    }
}

///
/// EntityQuery
///
/// Filter-accumulating read query. Storage entities read through the
/// backend; views materialize their row source and filter in memory.
///

pub struct EntityQuery {
    handle: EntityHandle,
    filter: Filter,
}

impl EntityQuery {
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, cmp: Cmp, value: impl Into<Value>) -> Self {
        self.filter = self.filter.and(field, cmp, value);
        self
    }

    #[must_use]
    pub fn filter_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Cmp::Eq, value)
    }

    fn rows(&self) -> Result<Vec<Row>, Error> {
        self.handle.check_policy(Operation::Select)?;
        let descriptor = self.handle.runtime.descriptor();

        match descriptor.kind {
            EntityKind::Storage => {
                let table = descriptor
                    .table
                    .as_deref()
                    .ok_or_else(|| StoreError::NoTable(descriptor.name.clone()))?;
                Ok(self.handle.db.backend().select(table, &self.filter)?)
            }
            EntityKind::View => {
                let def = self.handle.runtime.view_def.as_ref().ok_or_else(|| {
                    ViewError::MissingDefinition {
                        registry_name: descriptor.name.clone(),
                    }
                })?;
                let rows = def(&self.handle.db)?;
                Ok(rows
                    .into_iter()
                    .filter(|row| self.filter.matches(row))
                    .collect())
            }
            EntityKind::Behavior => {
                Err(StoreError::NoTable(descriptor.name.clone()).into())
            }
        }
    }

    pub fn all(&self) -> Result<Vec<Row>, Error> {
        self.rows()
    }

    pub fn first(&self) -> Result<Option<Row>, Error> {
        Ok(self.rows()?.into_iter().next())
    }

    pub fn count(&self) -> Result<u64, Error> {
        Ok(self.rows()?.len() as u64)
    }
}
