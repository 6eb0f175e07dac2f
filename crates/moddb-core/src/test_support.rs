use crate::{
    contrib::LoadContext,
    error::Error,
    module::{Module, ModuleDescriptor, catalog::ModuleCatalog},
    registry::{Db, Loader},
    store::{MemoryBackend, StoreError},
};
use std::sync::{Arc, Mutex, PoisonError};

///
/// HookLog
///
/// Shared record of lifecycle hook invocations, in call order.
///

#[derive(Clone, Debug, Default)]
pub(crate) struct HookLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl HookLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: String) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

///
/// TestModule
///
/// Builder-style module fixture: descriptor knobs plus hooks that report
/// into a [`HookLog`]. Declaration imports are exercised end to end by the
/// facade crate's tests; core tests drive the contribution store directly.
///

pub(crate) struct TestModule {
    descriptor: ModuleDescriptor,
    log: Option<HookLog>,
    fail_install: bool,
}

impl TestModule {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: ModuleDescriptor::new(name, "1.0.0"),
            log: None,
            fail_install: false,
        }
    }

    pub(crate) fn version(mut self, version: impl Into<String>) -> Self {
        self.descriptor.version = version.into();
        self
    }

    pub(crate) fn priority(mut self, priority: i32) -> Self {
        self.descriptor = self.descriptor.priority(priority);
        self
    }

    pub(crate) fn requires(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.descriptor = self.descriptor.requires(deps);
        self
    }

    pub(crate) fn optionally(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.descriptor = self.descriptor.optionally(deps);
        self
    }

    pub(crate) fn conditionally(
        mut self,
        deps: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.descriptor = self.descriptor.conditionally(deps);
        self
    }

    pub(crate) fn logging(mut self, log: &HookLog) -> Self {
        self.log = Some(log.clone());
        self
    }

    /// Install hook fails; used for partial-batch assertions.
    pub(crate) fn failing_install(mut self) -> Self {
        self.fail_install = true;
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

impl Module for TestModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn import_declarations(&self, _ctx: &mut LoadContext<'_>) {}

    fn install(&self, _db: &Db) -> Result<(), Error> {
        self.log("install", None);
        if self.fail_install {
            return Err(StoreError::TableNotFound("install failure".to_string()).into());
        }
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
pub(crate) fn load_db(name: &str, modules: Vec<TestModule>) -> Db {
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
        .expect("test registry should load")
}
