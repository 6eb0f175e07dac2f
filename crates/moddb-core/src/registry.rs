use crate::{
    assemble::{self, TableBinding},
    cache::{CACHE_TABLE, CacheIndex, CacheKey, CacheRecord},
    contrib::{ContributionStore, LoadContext},
    entity::{EntityHandle, EntityRuntime},
    error::Error,
    module::{
        ASSOCIATION_TABLE, MODULE_TABLE, Module, ModuleName, ModuleState,
        catalog::ModuleCatalog,
        lifecycle::Lifecycle,
        resolver,
    },
    policy::{AccessPolicy, AllowAll},
    store::{Backend, Cmp, Filter, Value},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, RwLock},
};
use thiserror::Error as ThisError;

///
/// RegistryError
///

#[derive(Debug, ThisError)]
#[remain::sorted]
pub enum RegistryError {
    #[error("unknown registry name '{0}'")]
    EntityNotFound(String),

    #[error("entity '{entity}' has no method '{method}'")]
    MethodNotFound { entity: String, method: String },

    #[error("method '{method}' on '{entity}' has no inherited implementation")]
    NoInherited { entity: String, method: String },

    #[error("registry '{0}' is not loaded")]
    NotLoaded(String),
}

///
/// Registry
///
/// One assembled schema for one database: immutable after load. Concurrent
/// readers share it through an `Arc`; reload builds a fresh registry and
/// swaps the published handle.
///

pub struct Registry {
    name: String,
    entities: BTreeMap<String, Arc<EntityRuntime>>,
    tables: BTreeMap<String, TableBinding>,
    caches: CacheIndex,
    catalog: ModuleCatalog,
    groups: Vec<String>,
    order: Vec<ModuleName>,
    policy: Arc<dyn AccessPolicy>,
}

impl Registry {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn get(&self, registry_name: &str) -> Option<&Arc<EntityRuntime>> {
        self.entities.get(registry_name)
    }

    #[must_use]
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub const fn tables(&self) -> &BTreeMap<String, TableBinding> {
        &self.tables
    }

    #[must_use]
    pub const fn caches(&self) -> &CacheIndex {
        &self.caches
    }

    /// Resolved module order of the load that built this registry.
    #[must_use]
    pub fn module_order(&self) -> &[ModuleName] {
        &self.order
    }

    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.catalog.get(name)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .field("modules", &self.order)
            .finish_non_exhaustive()
    }
}

///
/// Db
///
/// Bound pair of an assembled registry and a storage backend; the handle
/// everything at runtime goes through.
///

#[derive(Clone)]
pub struct Db {
    registry: Arc<Registry>,
    backend: Arc<dyn Backend>,
}

impl Db {
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub const fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.registry.name()
    }

    pub(crate) fn policy(&self) -> &Arc<dyn AccessPolicy> {
        &self.registry.policy
    }

    pub fn entity(&self, registry_name: &str) -> Result<EntityHandle, Error> {
        let runtime = self
            .registry
            .get(registry_name)
            .cloned()
            .ok_or_else(|| RegistryError::EntityNotFound(registry_name.to_string()))?;

        Ok(EntityHandle {
            runtime,
            db: self.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Cache administration
    // ------------------------------------------------------------------

    /// Evict every adapter under `(entity, method)` and persist the
    /// invalidation for other processes.
    pub fn invalidate(&self, entity: &str, method: &str) -> Result<(), Error> {
        let key = CacheKey::new(entity, method);
        self.registry.caches.invalidate(&key)?;
        self.persist_invalidation(&key)?;
        Ok(())
    }

    /// Evict everything, persisting one record per registered key.
    pub fn invalidate_all(&self) -> Result<(), Error> {
        self.registry.caches.invalidate_all();
        for key in self.registry.caches.keys() {
            self.persist_invalidation(&key)?;
        }
        Ok(())
    }

    /// Whether another process persisted invalidations this registry has
    /// not applied yet.
    pub fn detect_invalidation(&self) -> Result<bool, Error> {
        Ok(!self.pending_invalidation()?.is_empty())
    }

    /// Pending persisted invalidation records, oldest first.
    pub fn get_invalidation(&self) -> Result<Vec<CacheRecord>, Error> {
        self.pending_invalidation()
    }

    /// Apply pending persisted invalidations. Records for keys this
    /// registry never composed (another database's modules) are skipped.
    pub fn refresh_invalidation(&self) -> Result<(), Error> {
        for record in self.pending_invalidation()? {
            if self.registry.caches.contains(&record.key) {
                self.registry.caches.invalidate(&record.key)?;
            }
            self.registry.caches.mark_seen(record.id);
        }
        Ok(())
    }

    fn pending_invalidation(&self) -> Result<Vec<CacheRecord>, Error> {
        let last_seen = self.registry.caches.last_seen();
        let rows = self.backend.select(
            CACHE_TABLE,
            &Filter::new().and("id", Cmp::Gt, Value::Int(last_seen)),
        )?;

        let mut records: Vec<CacheRecord> =
            rows.iter().filter_map(CacheRecord::from_row).collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    fn persist_invalidation(&self, key: &CacheKey) -> Result<(), Error> {
        let rows = self.backend.select(CACHE_TABLE, &Filter::new())?;
        let next_id = rows
            .iter()
            .filter_map(CacheRecord::from_row)
            .map(|r| r.id)
            .max()
            .unwrap_or(0)
            + 1;

        let record = CacheRecord {
            id: next_id,
            key: key.clone(),
        };
        self.backend.insert(CACHE_TABLE, record.to_row())?;
        self.registry.caches.mark_seen(next_id);
        Ok(())
    }

    /// Rebuild this database's registry from scratch and republish it.
    pub fn reload(&self) -> Result<Self, Error> {
        Loader::new(self.registry.name.clone(), self.backend.clone())
            .catalog(self.registry.catalog.clone())
            .groups(self.registry.groups.clone())
            .policy(self.registry.policy.clone())
            .load()
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("registry", &self.registry.name())
            .finish_non_exhaustive()
    }
}

///
/// Loader
///
/// Drives one full load: resolve → import → assemble → persist module rows
/// → run pending installs → publish. Loads are serialized by a process-wide
/// mutex; failure on any step discards the partial order and contribution
/// state before the lock is released.
///

pub struct Loader {
    name: String,
    backend: Arc<dyn Backend>,
    catalog: ModuleCatalog,
    groups: Vec<String>,
    install: BTreeSet<ModuleName>,
    policy: Arc<dyn AccessPolicy>,
}

impl Loader {
    #[must_use]
    pub fn new(name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.into(),
            backend,
            catalog: ModuleCatalog::new(),
            groups: Vec::new(),
            install: BTreeSet::new(),
            policy: Arc::new(AllowAll),
        }
    }

    #[must_use]
    pub fn catalog(mut self, catalog: ModuleCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.groups.push(name.into());
        self
    }

    #[must_use]
    pub fn groups(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.groups.extend(names.into_iter().map(Into::into));
        self
    }

    /// Request a module install as part of this load. Already-installed
    /// modules are left alone.
    #[must_use]
    pub fn install(mut self, name: impl Into<String>) -> Self {
        self.install.insert(name.into());
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn load(self) -> Result<Db, Error> {
        let _guard = load_lock();

        let modules = resolver::resolve(&self.catalog, &self.groups)?;
        let order: Vec<ModuleName> = modules
            .iter()
            .map(|m| m.descriptor().name.clone())
            .collect();

        // Import declarations in resolved order, one module current at a
        // time. Later modules' fragments take override precedence.
        let mut contributions = ContributionStore::new();
        for module in &modules {
            let name = module.descriptor().name.clone();
            tracing::debug!(module = %name, "import declarations");
            let mut ctx = LoadContext::new(name, &mut contributions);
            module.import_declarations(&mut ctx);
        }

        let assembled = assemble::assemble(&contributions, &order)?;

        for table in [MODULE_TABLE, ASSOCIATION_TABLE, CACHE_TABLE] {
            self.backend.ensure_table(table)?;
        }
        for table in assembled.tables.keys() {
            self.backend.ensure_table(table)?;
        }

        let registry = Arc::new(Registry {
            name: self.name.clone(),
            entities: assembled.entities,
            tables: assembled.tables,
            caches: assembled.caches,
            catalog: self.catalog,
            groups: self.groups,
            order,
            policy: self.policy,
        });
        let db = Db {
            registry,
            backend: self.backend,
        };

        let lifecycle = Lifecycle::new(&db);
        lifecycle.sync_modules()?;

        let mut pending: Vec<ModuleName> = Vec::new();
        for name in &self.install {
            match lifecycle.state_of(name)? {
                ModuleState::Undefined | ModuleState::Uninstalled => {
                    lifecycle.mark_to_install(name)?;
                    pending.push(name.clone());
                }
                _ => {}
            }
        }
        if !pending.is_empty() {
            lifecycle.apply_state(&pending)?;
        }

        tracing::info!(
            registry = %db.name(),
            modules = db.registry().module_order().len(),
            "registry load complete"
        );

        publish(db.clone());
        Ok(db)
    }
}

// ----------------------------------------------------------------------
// Registry pool
// ----------------------------------------------------------------------

static REGISTRIES: LazyLock<RwLock<BTreeMap<String, Db>>> =
    LazyLock::new(|| RwLock::new(BTreeMap::new()));

static LOAD_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

// Serializes loads; a second load blocks until the first completes.
fn load_lock() -> MutexGuard<'static, ()> {
    LOAD_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

fn publish(db: Db) {
    REGISTRIES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(db.name().to_string(), db);
}

/// Fetch the published registry handle for a database.
pub fn registry(name: &str) -> Result<Db, Error> {
    REGISTRIES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
        .ok_or_else(|| RegistryError::NotLoaded(name.to_string()).into())
}

/// Drop one published registry; returns whether it existed.
pub fn clear(name: &str) -> bool {
    REGISTRIES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(name)
        .is_some()
}

/// Drop every published registry.
pub fn clear_all() {
    REGISTRIES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}
