#![allow(dead_code)]

use moddb::prelude::*;
use std::sync::{Arc, Mutex, PoisonError};

type ImportFn = Arc<dyn Fn(&mut LoadContext<'_>) + Send + Sync>;

///
/// HookLog
///
/// Shared record of lifecycle hook invocations, in call order.
///

#[derive(Clone, Debug, Default)]
pub struct HookLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl HookLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: String) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

///
/// FixtureModule
///
/// Builder-style module fixture driven entirely through the public crate
/// surface.
///

pub struct FixtureModule {
    descriptor: ModuleDescriptor,
    import: Option<ImportFn>,
    log: Option<HookLog>,
}

impl FixtureModule {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: ModuleDescriptor::new(name, "1.0.0"),
            import: None,
            log: None,
        }
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.descriptor.version = version.into();
        self
    }

    #[must_use]
    pub fn requires(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.descriptor = self.descriptor.requires(deps);
        self
    }

    #[must_use]
    pub fn conditionally(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.descriptor = self.descriptor.conditionally(deps);
        self
    }

    #[must_use]
    pub fn importing(
        mut self,
        import: impl Fn(&mut LoadContext<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.import = Some(Arc::new(import));
        self
    }

    #[must_use]
    pub fn logging(mut self, log: &HookLog) -> Self {
        self.log = Some(log.clone());
        self
    }

    fn log(&self, hook: &str, detail: Option<&str>) {
        if let Some(log) = &self.log {
            let name = &self.descriptor.name;
            match detail {
                Some(detail) => log.push(format!("{hook}:{name}:{detail}")),
                None => log.push(format!("{hook}:{name}")),
            }
        }
    }
}

impl Module for FixtureModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn import_declarations(&self, ctx: &mut LoadContext<'_>) {
        if let Some(import) = &self.import {
            import(ctx);
        }
    }

    fn install(&self, _db: &Db) -> Result<(), Error> {
        self.log("install", None);
        Ok(())
    }

    fn update(&self, _db: &Db, from_version: Option<&str>) -> Result<(), Error> {
        self.log("update", Some(from_version.unwrap_or("none")));
        Ok(())
    }

    fn uninstall(&self, _db: &Db) -> Result<(), Error> {
        self.log("uninstall", None);
        Ok(())
    }
}

/// Load a registry over a fresh in-memory backend; every module lands in
/// one `app` group. Registry names are global, so tests pick unique ones.
pub fn load_db(name: &str, modules: Vec<FixtureModule>) -> Db {
    try_load_db(name, modules).expect("test registry should load")
}

pub fn try_load_db(name: &str, modules: Vec<FixtureModule>) -> Result<Db, Error> {
    let mut catalog = ModuleCatalog::new();
    for module in modules {
        catalog
            .register("app", Arc::new(module))
            .expect("unique test module names");
    }

    Loader::new(name, Arc::new(MemoryBackend::new()))
        .catalog(catalog)
        .group("app")
        .load()
}

/// Build a row literal.
#[must_use]
pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}
