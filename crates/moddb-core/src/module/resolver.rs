use crate::module::{Module, ModuleName, catalog::ModuleCatalog};
use std::{
    collections::BTreeSet,
    sync::Arc,
};
use thiserror::Error as ThisError;

///
/// ResolutionError
///
/// Fatal startup-time failures. The caller discards any partially built
/// order and contribution state.
///

#[derive(Debug, ThisError)]
#[remain::sorted]
pub enum ResolutionError {
    #[error("required dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<ModuleName> },

    #[error("module '{0}' registered more than once")]
    DuplicateModule(ModuleName),

    #[error("module group '{0}' matched no modules")]
    EmptyGroup(String),

    #[error("missing required dependency '{dependency}' of module '{module}'")]
    MissingRequired {
        module: ModuleName,
        dependency: ModuleName,
    },
}

///
/// Resolver
///
/// Computes the install order over the requested groups: a queue sorted by
/// `(priority, name)` is drained through a recursive required/optional walk.
/// Required edges always point earlier in the output; a missing optional
/// dependency is skipped silently; conditional dependencies are left to the
/// lifecycle cascade.
///

struct Resolver<'a> {
    catalog: &'a ModuleCatalog,
    resolved: BTreeSet<ModuleName>,
    resolving: Vec<ModuleName>,
    order: Vec<Arc<dyn Module>>,
}

impl Resolver<'_> {
    fn resolve_one(&mut self, module: &Arc<dyn Module>) -> Result<(), ResolutionError> {
        let descriptor = module.descriptor();
        if self.resolved.contains(&descriptor.name) {
            return Ok(());
        }
        if let Some(pos) = self.resolving.iter().position(|n| n == &descriptor.name) {
            let mut path = self.resolving[pos..].to_vec();
            path.push(descriptor.name.clone());
            return Err(ResolutionError::DependencyCycle { path });
        }

        self.resolving.push(descriptor.name.clone());

        for dependency in &descriptor.required {
            match self.catalog.get(dependency) {
                Some(dep) => self.resolve_one(dep)?,
                None => {
                    return Err(ResolutionError::MissingRequired {
                        module: descriptor.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        for dependency in &descriptor.optional {
            if let Some(dep) = self.catalog.get(dependency) {
                self.resolve_one(dep)?;
            }
        }

        self.resolving.pop();
        self.resolved.insert(descriptor.name.clone());
        self.order.push(module.clone());
        Ok(())
    }
}

/// Resolve the install order for the requested discovery groups.
pub fn resolve(
    catalog: &ModuleCatalog,
    groups: &[String],
) -> Result<Vec<Arc<dyn Module>>, ResolutionError> {
    let mut queue = catalog.modules_in(groups)?;
    queue.sort_by(|a, b| {
        let (da, db) = (a.descriptor(), b.descriptor());
        (da.priority, da.name.as_str()).cmp(&(db.priority, db.name.as_str()))
    });

    let mut resolver = Resolver {
        catalog,
        resolved: BTreeSet::new(),
        resolving: Vec::new(),
        order: Vec::new(),
    };

    for module in &queue {
        resolver.resolve_one(module)?;
    }

    tracing::debug!(
        modules = resolver.order.len(),
        "module resolution complete"
    );

    Ok(resolver.order)
}

#[cfg(test)]
mod tests {
    use super::{ResolutionError, resolve};
    use crate::{module::catalog::ModuleCatalog, test_support::TestModule};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn catalog(modules: Vec<TestModule>) -> ModuleCatalog {
        let mut catalog = ModuleCatalog::new();
        for module in modules {
            catalog
                .register("app", Arc::new(module))
                .expect("unique test module names");
        }
        catalog
    }

    fn order_of(catalog: &ModuleCatalog) -> Vec<String> {
        resolve(catalog, &["app".to_string()])
            .expect("resolution should succeed")
            .iter()
            .map(|m| m.descriptor().name.clone())
            .collect()
    }

    #[test]
    fn required_dependency_resolves_first() {
        let catalog = catalog(vec![
            TestModule::new("app").requires(["base"]),
            TestModule::new("base"),
        ]);

        let order = order_of(&catalog);
        assert_eq!(order, ["base", "app"]);
    }

    #[test]
    fn missing_required_dependency_fails_closed() {
        let catalog = catalog(vec![TestModule::new("app").requires(["ghost"])]);

        let err = resolve(&catalog, &["app".to_string()])
            .expect_err("unknown required dependency should fail");
        assert!(matches!(
            err,
            ResolutionError::MissingRequired { module, dependency }
                if module == "app" && dependency == "ghost"
        ));
    }

    #[test]
    fn missing_optional_dependency_is_skipped() {
        let catalog = catalog(vec![TestModule::new("app").optionally(["ghost"])]);

        let order = order_of(&catalog);
        assert_eq!(order, ["app"]);
    }

    #[test]
    fn present_optional_dependency_orders_before_dependent() {
        let catalog = catalog(vec![
            TestModule::new("app").optionally(["extras"]),
            TestModule::new("extras").priority(999),
        ]);

        let order = order_of(&catalog);
        assert_eq!(order, ["extras", "app"]);
    }

    #[test]
    fn conditional_dependencies_do_not_constrain_the_order() {
        let catalog = catalog(vec![
            TestModule::new("app").conditionally(["ghost", "other"]),
        ]);

        let order = order_of(&catalog);
        assert_eq!(order, ["app"]);
    }

    #[test]
    fn ties_break_by_priority_then_name() {
        let catalog = catalog(vec![
            TestModule::new("zeta").priority(10),
            TestModule::new("alpha").priority(50),
            TestModule::new("beta").priority(50),
        ]);

        let order = order_of(&catalog);
        assert_eq!(order, ["zeta", "alpha", "beta"]);
    }

    #[test]
    fn required_cycle_is_rejected() {
        let catalog = catalog(vec![
            TestModule::new("a").requires(["b"]),
            TestModule::new("b").requires(["c"]),
            TestModule::new("c").requires(["a"]),
        ]);

        let err = resolve(&catalog, &["app".to_string()]).expect_err("cycle should fail");
        match err {
            ResolutionError::DependencyCycle { path } => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 3, "cycle path should name the loop: {path:?}");
            }
            other => panic!("expected DependencyCycle, got {other}"),
        }
    }

    #[test]
    fn self_cycle_is_rejected() {
        let catalog = catalog(vec![TestModule::new("a").requires(["a"])]);
        let err = resolve(&catalog, &["app".to_string()]).expect_err("self cycle should fail");
        assert!(matches!(err, ResolutionError::DependencyCycle { .. }));
    }

    proptest! {
        /// Required edges always point earlier in the resolved order, for
        /// arbitrary acyclic required graphs (edges only from higher to
        /// lower index, so the graph is a DAG by construction).
        #[test]
        fn required_edges_point_earlier(
            n in 2usize..10,
            edges in proptest::collection::vec((0usize..10, 0usize..10), 0..20),
        ) {
            let names: Vec<String> = (0..n).map(|i| format!("mod{i}")).collect();
            let mut modules: Vec<TestModule> =
                names.iter().map(|name| TestModule::new(name.clone())).collect();

            for (from, to) in edges {
                let (from, to) = (from % n, to % n);
                if from > to {
                    let dep = names[to].clone();
                    let m = std::mem::replace(&mut modules[from], TestModule::new("tmp"));
                    modules[from] = m.requires([dep]);
                }
            }

            let catalog = catalog(modules);
            let order = order_of(&catalog);

            for (i, name) in order.iter().enumerate() {
                let module = catalog.get(name).expect("resolved module is known");
                for dep in &module.descriptor().required {
                    let dep_pos = order.iter().position(|other| other == dep)
                        .expect("required dependency must be resolved");
                    prop_assert!(dep_pos < i, "{dep} must come before {name}");
                }
            }
        }
    }
}
