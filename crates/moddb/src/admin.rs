use moddb_core::{
    error::Error,
    module::{ModuleName, lifecycle::Lifecycle},
    registry::Db,
};
use std::collections::BTreeSet;

///
/// Upgrade
///
/// One administrative batch: the module sets to install, update, and
/// uninstall. Every requested transition is validated at the call boundary
/// before any hook runs; the lifecycle state machine then processes the
/// batch and cascades conditional installs/uninstalls to fixpoint.
///

#[derive(Debug, Default)]
pub struct Upgrade {
    install: BTreeSet<ModuleName>,
    update: BTreeSet<ModuleName>,
    uninstall: BTreeSet<ModuleName>,
}

impl Upgrade {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn install(mut self, name: impl Into<String>) -> Self {
        self.install.insert(name.into());
        self
    }

    #[must_use]
    pub fn update(mut self, name: impl Into<String>) -> Self {
        self.update.insert(name.into());
        self
    }

    #[must_use]
    pub fn uninstall(mut self, name: impl Into<String>) -> Self {
        self.uninstall.insert(name.into());
        self
    }

    pub fn apply(self, db: &Db) -> Result<(), Error> {
        tracing::info!(
            registry = %db.name(),
            install = self.install.len(),
            update = self.update.len(),
            uninstall = self.uninstall.len(),
            "upgrade"
        );

        let lifecycle = Lifecycle::new(db);
        let mut batch: Vec<ModuleName> = Vec::new();
        for name in self.install {
            lifecycle.mark_to_install(&name)?;
            batch.push(name);
        }
        for name in self.update {
            lifecycle.mark_to_update(&name)?;
            batch.push(name);
        }
        for name in self.uninstall {
            lifecycle.mark_to_uninstall(&name)?;
            batch.push(name);
        }

        lifecycle.apply_state(&batch)
    }
}

/// The single administrative entry point: mark and apply the requested
/// installs, updates, and uninstalls against a loaded registry.
pub fn upgrade(
    db: &Db,
    install: &[&str],
    update: &[&str],
    uninstall: &[&str],
) -> Result<(), Error> {
    let mut batch = Upgrade::new();
    for name in install {
        batch = batch.install(*name);
    }
    for name in update {
        batch = batch.update(*name);
    }
    for name in uninstall {
        batch = batch.uninstall(*name);
    }
    batch.apply(db)
}
