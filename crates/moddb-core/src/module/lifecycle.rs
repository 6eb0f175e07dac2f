use crate::{
    error::Error,
    module::{
        ASSOCIATION_TABLE, MODULE_TABLE, Module, ModuleAssociation, ModuleDescriptor, ModuleName,
        ModuleState,
    },
    registry::Db,
    store::{Backend, Filter, Row, Value},
};
use std::sync::Arc;
use thiserror::Error as ThisError;

///
/// LifecycleError
///

#[derive(Debug, ThisError)]
#[remain::sorted]
pub enum LifecycleError {
    #[error("module '{module}' cannot transition out of state {state}")]
    IllegalTransition {
        module: ModuleName,
        state: ModuleState,
    },

    #[error("persisted row for module '{0}' is malformed")]
    MalformedRow(ModuleName),

    #[error("module '{0}' is not part of this registry")]
    UnknownModule(ModuleName),
}

///
/// Lifecycle
///
/// The module state machine. `sync_modules` persists the resolved module
/// set, the `mark_*` calls validate a requested transition at the call
/// boundary, and `apply_state` runs the hooks and drives the conditional
/// cascades to fixpoint. State lives in the `system_module` table; only
/// this type writes it.
///

pub struct Lifecycle<'a> {
    db: &'a Db,
}

impl<'a> Lifecycle<'a> {
    #[must_use]
    pub const fn new(db: &'a Db) -> Self {
        Self { db }
    }

    fn module(&self, name: &str) -> Result<Arc<dyn Module>, Error> {
        self.db
            .registry()
            .module(name)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownModule(name.to_string()).into())
    }

    fn row(&self, name: &str) -> Result<Option<Row>, Error> {
        Ok(self
            .db
            .backend()
            .first(MODULE_TABLE, &Filter::eq("name", name))?)
    }

    /// Persisted state of a module; `Undefined` when no row exists yet.
    pub fn state_of(&self, name: &str) -> Result<ModuleState, Error> {
        self.module(name)?;
        match self.row(name)? {
            None => Ok(ModuleState::Undefined),
            Some(row) => {
                let Some(Value::Text(state)) = row.get("state") else {
                    return Err(LifecycleError::MalformedRow(name.to_string()).into());
                };
                state
                    .parse()
                    .map_err(|_| LifecycleError::MalformedRow(name.to_string()).into())
            }
        }
    }

    /// Version recorded by the last completed install or update.
    pub fn installed_version(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self.row(name)?.and_then(|row| match row.get("installed_version") {
            Some(Value::Text(version)) => Some(version.clone()),
            _ => None,
        }))
    }

    /// Create or refresh the persisted rows for every module of the current
    /// load: the module row (position, version) and its dependency edges.
    /// Existing lifecycle state is left untouched.
    pub fn sync_modules(&self) -> Result<(), Error> {
        let order: Vec<ModuleName> = self.db.registry().module_order().to_vec();

        for (position, name) in order.iter().enumerate() {
            let module = self.module(name)?;
            let descriptor = module.descriptor();

            let mut patch = Row::new();
            patch.insert("order".to_string(), Value::Int(position as i64));
            patch.insert("version".to_string(), Value::Text(descriptor.version.clone()));
            let touched =
                self.db
                    .backend()
                    .update(MODULE_TABLE, &Filter::eq("name", name.as_str()), &patch)?;
            if touched == 0 {
                self.db
                    .backend()
                    .insert(MODULE_TABLE, module_row(descriptor, position))?;
            }

            self.db
                .backend()
                .delete(ASSOCIATION_TABLE, &Filter::eq("module", name.as_str()))?;
            for association in descriptor.associations() {
                self.db
                    .backend()
                    .insert(ASSOCIATION_TABLE, association_row(&association))?;
            }
        }

        tracing::debug!(modules = order.len(), "module rows synced");
        Ok(())
    }

    /// Request an install. Valid only from `Undefined` or `Uninstalled`.
    pub fn mark_to_install(&self, name: &str) -> Result<(), Error> {
        match self.state_of(name)? {
            ModuleState::Undefined | ModuleState::Uninstalled => {
                self.persist_state(name, ModuleState::ToInstall, None)
            }
            state => Err(illegal(name, state)),
        }
    }

    /// Request an update. Valid only from `Installed`.
    pub fn mark_to_update(&self, name: &str) -> Result<(), Error> {
        match self.state_of(name)? {
            ModuleState::Installed => self.persist_state(name, ModuleState::ToUpdate, None),
            state => Err(illegal(name, state)),
        }
    }

    /// Request an uninstall. Valid only from `Installed`.
    pub fn mark_to_uninstall(&self, name: &str) -> Result<(), Error> {
        match self.state_of(name)? {
            ModuleState::Installed => self.persist_state(name, ModuleState::ToUninstall, None),
            state => Err(illegal(name, state)),
        }
    }

    /// Process the requested modules in caller order, then run the
    /// conditional cascades to fixpoint. A failing hook aborts the rest of
    /// the batch; transitions already applied are retained.
    pub fn apply_state(&self, names: &[ModuleName]) -> Result<(), Error> {
        for name in names {
            self.apply_one(name)?;
        }
        self.cascade()
    }

    fn apply_one(&self, name: &str) -> Result<(), Error> {
        let module = self.module(name)?;
        let descriptor = module.descriptor();

        match self.state_of(name)? {
            ModuleState::Undefined | ModuleState::Uninstalled | ModuleState::ToInstall => {
                tracing::info!(module = name, version = %descriptor.version, "install module");
                module.install(self.db)?;
                self.persist_state(
                    name,
                    ModuleState::Installed,
                    Some(Value::Text(descriptor.version.clone())),
                )
            }
            ModuleState::ToUpdate => {
                let previous = self.installed_version(name)?;
                tracing::info!(module = name, from = previous.as_deref(), "update module");
                module.update(self.db, previous.as_deref())?;
                self.persist_state(
                    name,
                    ModuleState::Installed,
                    Some(Value::Text(descriptor.version.clone())),
                )
            }
            ModuleState::ToUninstall => {
                tracing::info!(module = name, "uninstall module");
                module.uninstall(self.db)?;
                self.persist_state(name, ModuleState::Uninstalled, Some(Value::Null))
            }
            state @ ModuleState::Installed => Err(illegal(name, state)),
        }
    }

    // Forward: an uninstalled module whose nonempty conditional set is
    // fully installed is auto-installed. Reverse: an installed module
    // whose nonempty conditional set is no longer fully installed is
    // driven back out. Installs never enable uninstalls within one run,
    // so one fixpoint sweep per direction suffices.
    fn cascade(&self) -> Result<(), Error> {
        loop {
            let ready = self.conditional_candidates(ModuleState::Uninstalled, true)?;
            if ready.is_empty() {
                break;
            }
            tracing::debug!(modules = ?ready, "conditional cascade: install");
            for name in &ready {
                self.persist_state(name, ModuleState::ToInstall, None)?;
            }
            for name in &ready {
                self.apply_one(name)?;
            }
        }

        loop {
            let broken = self.conditional_candidates(ModuleState::Installed, false)?;
            if broken.is_empty() {
                break;
            }
            tracing::debug!(modules = ?broken, "conditional cascade: uninstall");
            for name in &broken {
                self.persist_state(name, ModuleState::ToUninstall, None)?;
            }
            for name in &broken {
                self.apply_one(name)?;
            }
        }

        Ok(())
    }

    // Modules currently in `state` with a nonempty conditional set whose
    // full-installation status equals `satisfied`.
    fn conditional_candidates(
        &self,
        state: ModuleState,
        satisfied: bool,
    ) -> Result<Vec<ModuleName>, Error> {
        let order: Vec<ModuleName> = self.db.registry().module_order().to_vec();

        let mut candidates = Vec::new();
        for name in &order {
            let module = self.module(name)?;
            let conditional = &module.descriptor().conditional;
            if conditional.is_empty() || self.state_of(name)? != state {
                continue;
            }

            let mut fully_installed = true;
            for dependency in conditional {
                if !self.dependency_installed(dependency)? {
                    fully_installed = false;
                    break;
                }
            }
            if fully_installed == satisfied {
                candidates.push(name.clone());
            }
        }
        Ok(candidates)
    }

    // A conditional edge to a module this registry never loaded counts as
    // unsatisfied.
    fn dependency_installed(&self, name: &str) -> Result<bool, Error> {
        if self.db.registry().module(name).is_none() {
            return Ok(false);
        }
        Ok(self.state_of(name)? == ModuleState::Installed)
    }

    // Update the persisted row; `installed_version: None` leaves the
    // recorded version untouched.
    fn persist_state(
        &self,
        name: &str,
        state: ModuleState,
        installed_version: Option<Value>,
    ) -> Result<(), Error> {
        let mut patch = Row::new();
        patch.insert("state".to_string(), Value::Text(state.to_string()));
        if let Some(version) = installed_version {
            patch.insert("installed_version".to_string(), version);
        }

        let touched = self
            .db
            .backend()
            .update(MODULE_TABLE, &Filter::eq("name", name), &patch)?;
        if touched == 0 {
            let module = self.module(name)?;
            let position = self
                .db
                .registry()
                .module_order()
                .iter()
                .position(|n| n == name)
                .unwrap_or_default();
            let mut row = module_row(module.descriptor(), position);
            row.insert("state".to_string(), Value::Text(state.to_string()));
            self.db.backend().insert(MODULE_TABLE, row)?;
        }
        Ok(())
    }
}

fn illegal(name: &str, state: ModuleState) -> Error {
    LifecycleError::IllegalTransition {
        module: name.to_string(),
        state,
    }
    .into()
}

fn module_row(descriptor: &ModuleDescriptor, position: usize) -> Row {
    let mut row = Row::new();
    row.insert("name".to_string(), Value::Text(descriptor.name.clone()));
    row.insert(
        "state".to_string(),
        Value::Text(ModuleState::Uninstalled.to_string()),
    );
    row.insert("order".to_string(), Value::Int(position as i64));
    row.insert("version".to_string(), Value::Text(descriptor.version.clone()));
    row.insert("installed_version".to_string(), Value::Null);
    row
}

fn association_row(association: &ModuleAssociation) -> Row {
    let mut row = Row::new();
    row.insert("module".to_string(), Value::Text(association.module.clone()));
    row.insert(
        "linked_module".to_string(),
        Value::Text(association.linked_module.clone()),
    );
    row.insert("mode".to_string(), Value::Text(association.mode.to_string()));
    row
}
