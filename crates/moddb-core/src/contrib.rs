use crate::{
    entity::MethodCtx,
    error::Error,
    module::ModuleName,
    store::{Row, Value},
};
use derive_more::Display;
use moddb_schema::types::FieldType;
use std::{collections::BTreeMap, fmt, sync::Arc};

pub type RegistryName = String;

/// Callable body of a contributed method.
pub type MethodBody = Arc<dyn Fn(&MethodCtx<'_>, &[Value]) -> Result<Value, Error> + Send + Sync>;

/// Row source of a view entity.
pub type ViewDef = Arc<dyn Fn(&crate::registry::Db) -> Result<Vec<Row>, Error> + Send + Sync>;

///
/// ContributionKind
///

#[derive(Clone, Copy, Debug, Display, Eq, Ord, PartialEq, PartialOrd)]
#[remain::sorted]
pub enum ContributionKind {
    /// Methods only; never yields columns of its own.
    Behavior,
    /// A concrete, queryable registry name.
    Entity,
    /// Reusable columns and methods folded into entities.
    Mixin,
}

///
/// FieldDecl
///
/// A declared (unresolved) field. Relation declarations carry no column type;
/// the assembler resolves it from the target's flattened metadata.
///

#[derive(Clone, Debug)]
pub enum FieldDecl {
    Column {
        ty: FieldType,
        nullable: bool,
        primary_key: bool,
    },
    Relation {
        target: RegistryName,
        remote_field: Option<String>,
        nullable: bool,
    },
}

impl FieldDecl {
    #[must_use]
    pub const fn column(ty: FieldType) -> Self {
        Self::Column {
            ty,
            nullable: true,
            primary_key: false,
        }
    }

    #[must_use]
    pub const fn primary(ty: FieldType) -> Self {
        Self::Column {
            ty,
            nullable: false,
            primary_key: true,
        }
    }

    /// Relation whose remote column is auto-detected from the target's
    /// primary key.
    #[must_use]
    pub fn relation(target: impl Into<String>) -> Self {
        Self::Relation {
            target: target.into(),
            remote_field: None,
            nullable: true,
        }
    }

    /// Relation against an explicit remote column.
    #[must_use]
    pub fn relation_to(target: impl Into<String>, remote_field: impl Into<String>) -> Self {
        Self::Relation {
            target: target.into(),
            remote_field: Some(remote_field.into()),
            nullable: true,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        match &mut self {
            Self::Column { nullable, .. } | Self::Relation { nullable, .. } => *nullable = false,
        }
        self
    }

    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        matches!(self, Self::Column { primary_key: true, .. })
    }
}

///
/// MethodSpec
///

#[derive(Clone)]
pub struct MethodSpec {
    pub name: String,
    pub cacheable: bool,
    pub body: MethodBody,
}

impl fmt::Debug for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSpec")
            .field("name", &self.name)
            .field("cacheable", &self.cacheable)
            .finish_non_exhaustive()
    }
}

///
/// Fragment
///
/// One declaration unit contributed by a module under a registry name:
/// inherited registry names, declared fields, declared methods.
///

#[derive(Clone, Debug, Default)]
pub struct Fragment {
    pub label: String,
    pub inherits: Vec<RegistryName>,
    pub fields: Vec<(String, FieldDecl)>,
    pub methods: Vec<MethodSpec>,
}

impl Fragment {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn inherit(mut self, registry_name: impl Into<String>) -> Self {
        self.inherits.push(registry_name.into());
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, decl: FieldDecl) -> Self {
        self.fields.push((name.into(), decl));
        self
    }

    #[must_use]
    pub fn method(
        mut self,
        name: impl Into<String>,
        body: impl Fn(&MethodCtx<'_>, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        self.methods.push(MethodSpec {
            name: name.into(),
            cacheable: false,
            body: Arc::new(body),
        });
        self
    }

    /// Method whose results are memoized per argument vector under the
    /// requesting entity's cache key.
    #[must_use]
    pub fn cached_method(
        mut self,
        name: impl Into<String>,
        body: impl Fn(&MethodCtx<'_>, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        self.methods.push(MethodSpec {
            name: name.into(),
            cacheable: true,
            body: Arc::new(body),
        });
        self
    }
}

///
/// ContributionProps
///
/// Declared namespace properties, shallow-merged across registrations:
/// a later registration's set keys overwrite earlier ones.
///

#[derive(Clone, Default)]
pub struct ContributionProps {
    pub table_name: Option<String>,
    pub is_sql_view: Option<bool>,
    pub view_def: Option<ViewDef>,
}

impl ContributionProps {
    #[must_use]
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table_name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn view(
        def: impl Fn(&crate::registry::Db) -> Result<Vec<Row>, Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            table_name: None,
            is_sql_view: Some(true),
            view_def: Some(Arc::new(def)),
        }
    }

    /// Overwrite with the set keys of a later registration.
    pub fn merge(&mut self, later: Self) {
        if later.table_name.is_some() {
            self.table_name = later.table_name;
        }
        if later.is_sql_view.is_some() {
            self.is_sql_view = later.is_sql_view;
        }
        if later.view_def.is_some() {
            self.view_def = later.view_def;
        }
    }
}

impl fmt::Debug for ContributionProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContributionProps")
            .field("table_name", &self.table_name)
            .field("is_sql_view", &self.is_sql_view)
            .field("view_def", &self.view_def.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

///
/// Contribution
///
/// Everything one module registered under one `(kind, registry_name)`.
/// `ordered_bases` is front-inserted: index 0 is the most recently declared
/// fragment and wins on override.
///

#[derive(Clone, Debug)]
pub struct Contribution {
    pub module: ModuleName,
    pub kind: ContributionKind,
    pub registry_name: RegistryName,
    pub ordered_bases: Vec<Fragment>,
    pub properties: ContributionProps,
}

///
/// ContributionStore
///
/// Accumulates every module's declaration fragments during load. Written
/// only through a [`LoadContext`], which pins the current module; the
/// assembler consumes merged views of it.
///

#[derive(Debug, Default)]
pub struct ContributionStore {
    by_module: BTreeMap<ModuleName, Vec<Contribution>>,
}

impl ContributionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &mut self,
        module: &str,
        kind: ContributionKind,
        registry_name: &str,
        fragment: Fragment,
        props: ContributionProps,
    ) {
        let contributions = self.by_module.entry(module.to_string()).or_default();

        match contributions
            .iter_mut()
            .find(|c| c.kind == kind && c.registry_name == registry_name)
        {
            Some(existing) => {
                existing.ordered_bases.insert(0, fragment);
                existing.properties.merge(props);
            }
            None => contributions.push(Contribution {
                module: module.to_string(),
                kind,
                registry_name: registry_name.to_string(),
                ordered_bases: vec![fragment],
                properties: props,
            }),
        }
    }

    /// Remove one fragment by label; drops the contribution when it was the
    /// last. Returns whether anything was removed.
    pub fn unregister(
        &mut self,
        module: &str,
        kind: ContributionKind,
        registry_name: &str,
        label: &str,
    ) -> bool {
        let Some(contributions) = self.by_module.get_mut(module) else {
            return false;
        };
        let Some(pos) = contributions
            .iter()
            .position(|c| c.kind == kind && c.registry_name == registry_name)
        else {
            return false;
        };

        let bases = &mut contributions[pos].ordered_bases;
        let Some(idx) = bases.iter().position(|f| f.label == label) else {
            return false;
        };
        bases.remove(idx);
        if bases.is_empty() {
            contributions.remove(pos);
        }
        true
    }

    /// Drop everything a module contributed (module unload).
    pub fn remove_module(&mut self, module: &str) {
        self.by_module.remove(module);
    }

    /// Contributions for one registry name across `modules`, in the given
    /// module order, any kind.
    pub fn contributions_for(
        &self,
        modules: &[ModuleName],
        registry_name: &str,
    ) -> Vec<&Contribution> {
        modules
            .iter()
            .filter_map(|m| self.by_module.get(m))
            .flat_map(|contributions| {
                contributions
                    .iter()
                    .filter(|c| c.registry_name == registry_name)
            })
            .collect()
    }

    /// Ordered fragment concatenation across `modules` for one
    /// `(kind, registry_name)` — the sequence the assembler composes.
    pub fn merge(
        &self,
        modules: &[ModuleName],
        kind: ContributionKind,
        registry_name: &str,
    ) -> Vec<Fragment> {
        self.contributions_for(modules, registry_name)
            .into_iter()
            .filter(|c| c.kind == kind)
            .flat_map(|c| c.ordered_bases.iter().cloned())
            .collect()
    }

    /// Every registry name contributed by `modules`.
    pub fn registry_names(&self, modules: &[ModuleName]) -> Vec<RegistryName> {
        let mut names: Vec<RegistryName> = Vec::new();
        for module in modules {
            let Some(contributions) = self.by_module.get(module) else {
                continue;
            };
            for c in contributions {
                if !names.contains(&c.registry_name) {
                    names.push(c.registry_name.clone());
                }
            }
        }
        names
    }
}

///
/// LoadContext
///
/// Explicit registration scope: which module is current, and the store it
/// writes to. Exactly one context is live at a time during a load.
///

pub struct LoadContext<'a> {
    module: ModuleName,
    store: &'a mut ContributionStore,
}

impl<'a> LoadContext<'a> {
    #[must_use]
    pub fn new(module: impl Into<String>, store: &'a mut ContributionStore) -> Self {
        Self {
            module: module.into(),
            store,
        }
    }

    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn register(
        &mut self,
        kind: ContributionKind,
        registry_name: &str,
        fragment: Fragment,
        props: ContributionProps,
    ) {
        tracing::debug!(
            module = %self.module,
            %kind,
            registry_name,
            fragment = %fragment.label,
            "register contribution"
        );
        self.store
            .register(&self.module, kind, registry_name, fragment, props);
    }

    pub fn register_entity(&mut self, registry_name: &str, fragment: Fragment) {
        self.register(
            ContributionKind::Entity,
            registry_name,
            fragment,
            ContributionProps::default(),
        );
    }

    pub fn register_entity_as(
        &mut self,
        registry_name: &str,
        fragment: Fragment,
        props: ContributionProps,
    ) {
        self.register(ContributionKind::Entity, registry_name, fragment, props);
    }

    pub fn register_mixin(&mut self, registry_name: &str, fragment: Fragment) {
        self.register(
            ContributionKind::Mixin,
            registry_name,
            fragment,
            ContributionProps::default(),
        );
    }

    pub fn register_behavior(&mut self, registry_name: &str, fragment: Fragment) {
        self.register(
            ContributionKind::Behavior,
            registry_name,
            fragment,
            ContributionProps::default(),
        );
    }

    pub fn unregister(
        &mut self,
        kind: ContributionKind,
        registry_name: &str,
        label: &str,
    ) -> bool {
        self.store
            .unregister(&self.module, kind, registry_name, label)
    }
}
