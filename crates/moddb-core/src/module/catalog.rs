use crate::module::{Module, ModuleName, resolver::ResolutionError};
use std::{collections::BTreeMap, sync::Arc};

///
/// ModuleCatalog
///
/// Pluggable module discovery: modules registered per named group, with one
/// flat by-name index for dependency lookup. Duplicate registration of a
/// module name is rejected regardless of group.
///

#[derive(Clone, Default)]
pub struct ModuleCatalog {
    groups: BTreeMap<String, Vec<Arc<dyn Module>>>,
    by_name: BTreeMap<ModuleName, Arc<dyn Module>>,
}

impl ModuleCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        group: &str,
        module: Arc<dyn Module>,
    ) -> Result<(), ResolutionError> {
        let name = module.descriptor().name.clone();
        if self.by_name.contains_key(&name) {
            return Err(ResolutionError::DuplicateModule(name));
        }

        self.by_name.insert(name, module.clone());
        self.groups.entry(group.to_string()).or_default().push(module);
        Ok(())
    }

    /// Look a module up by name, across all groups.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.by_name.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Enumerate the requested groups; a group that yields zero modules is a
    /// fatal configuration error.
    pub fn modules_in(&self, groups: &[String]) -> Result<Vec<Arc<dyn Module>>, ResolutionError> {
        let mut out = Vec::new();
        for group in groups {
            let members = self
                .groups
                .get(group)
                .filter(|members| !members.is_empty())
                .ok_or_else(|| ResolutionError::EmptyGroup(group.clone()))?;
            out.extend(members.iter().cloned());
        }
        Ok(out)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModuleName, &Arc<dyn Module>)> {
        self.by_name.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::ModuleCatalog;
    use crate::{module::resolver::ResolutionError, test_support::TestModule};
    use std::sync::Arc;

    #[test]
    fn duplicate_registration_rejected_across_groups() {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register("app", Arc::new(TestModule::new("base")))
            .expect("first registration");

        let err = catalog
            .register("other", Arc::new(TestModule::new("base")))
            .expect_err("same name in another group should fail");
        assert!(matches!(err, ResolutionError::DuplicateModule(name) if name == "base"));
    }

    #[test]
    fn empty_group_is_fatal() {
        let catalog = ModuleCatalog::new();
        let err = catalog
            .modules_in(&["app".to_string()])
            .expect_err("unknown group should fail");
        assert!(matches!(err, ResolutionError::EmptyGroup(group) if group == "app"));
    }
}
