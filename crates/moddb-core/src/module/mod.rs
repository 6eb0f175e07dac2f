pub mod catalog;
pub mod lifecycle;
pub mod resolver;

use crate::{contrib::LoadContext, error::Error, registry::Db};
use derive_more::{Display, FromStr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Persisted module rows.
pub const MODULE_TABLE: &str = "system_module";

/// Persisted dependency edges.
pub const ASSOCIATION_TABLE: &str = "system_module_association";

pub type ModuleName = String;

/// Resolution tie-break priority when nothing orders two modules.
pub const DEFAULT_PRIORITY: i32 = 100;

///
/// ModuleState
///
/// Persisted lifecycle state. Only the lifecycle state machine writes it.
///

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, FromStr, PartialEq, Serialize,
)]
#[remain::sorted]
pub enum ModuleState {
    Installed,
    ToInstall,
    ToUninstall,
    ToUpdate,
    #[default]
    Undefined,
    Uninstalled,
}

///
/// DependencyMode
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, FromStr, Ord, PartialEq, PartialOrd, Serialize)]
#[remain::sorted]
pub enum DependencyMode {
    Conditional,
    Optional,
    Required,
}

///
/// ModuleDescriptor
///
/// Static shape of one module: identity, resolution priority, version, and
/// the three dependency sets.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ModuleDescriptor {
    pub name: ModuleName,
    pub priority: i32,
    pub version: String,
    pub required: BTreeSet<ModuleName>,
    pub optional: BTreeSet<ModuleName>,
    pub conditional: BTreeSet<ModuleName>,
}

impl ModuleDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            version: version.into(),
            required: BTreeSet::new(),
            optional: BTreeSet::new(),
            conditional: BTreeSet::new(),
        }
    }

    #[must_use]
    pub const fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn requires(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required.extend(deps.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn optionally(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.optional.extend(deps.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn conditionally(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.conditional.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Dependency edges in persistence order.
    pub fn associations(&self) -> impl Iterator<Item = ModuleAssociation> + '_ {
        let edges = |set: &BTreeSet<ModuleName>, mode: DependencyMode| {
            set.iter()
                .map(move |linked| ModuleAssociation {
                    module: self.name.clone(),
                    linked_module: linked.clone(),
                    mode,
                })
                .collect::<Vec<_>>()
        };

        edges(&self.required, DependencyMode::Required)
            .into_iter()
            .chain(edges(&self.optional, DependencyMode::Optional))
            .chain(edges(&self.conditional, DependencyMode::Conditional))
    }
}

///
/// ModuleAssociation
///
/// One persisted dependency edge.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ModuleAssociation {
    pub module: ModuleName,
    pub linked_module: ModuleName,
    pub mode: DependencyMode,
}

///
/// Module
///
/// One extension unit. The resolver orders modules by descriptor, the loader
/// drives `import_declarations` exactly once per load, and the lifecycle
/// state machine runs the install/update/uninstall hooks against the
/// assembled registry.
///

pub trait Module: Send + Sync {
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Contribute declaration fragments. Called once per load with the
    /// context already scoped to this module.
    fn import_declarations(&self, ctx: &mut LoadContext<'_>);

    fn install(&self, _db: &Db) -> Result<(), Error> {
        Ok(())
    }

    fn update(&self, _db: &Db, _from_version: Option<&str>) -> Result<(), Error> {
        Ok(())
    }

    fn uninstall(&self, _db: &Db) -> Result<(), Error> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.descriptor(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::{DependencyMode, ModuleDescriptor, ModuleState};

    #[test]
    fn state_round_trips_through_display() {
        let state: ModuleState = "ToInstall".parse().expect("known state should parse");
        assert_eq!(state, ModuleState::ToInstall);
        assert_eq!(state.to_string(), "ToInstall");
    }

    #[test]
    fn associations_cover_all_three_sets() {
        let descriptor = ModuleDescriptor::new("app", "1.0.0")
            .requires(["base"])
            .optionally(["extras"])
            .conditionally(["base", "extras"]);

        let modes: Vec<DependencyMode> =
            descriptor.associations().map(|a| a.mode).collect();
        assert_eq!(
            modes,
            [
                DependencyMode::Required,
                DependencyMode::Optional,
                DependencyMode::Conditional,
                DependencyMode::Conditional,
            ],
        );
    }
}
