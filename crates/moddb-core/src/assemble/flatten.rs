use crate::{
    assemble::FieldError,
    contrib::{ContributionKind, ContributionStore, FieldDecl, RegistryName},
    module::ModuleName,
};
use std::collections::BTreeMap;

///
/// FieldMap
///
/// Declaration-ordered accumulator for flattened field declarations.
/// Overwriting an ident keeps its original position.
///

#[derive(Clone, Debug, Default)]
pub(crate) struct FieldMap {
    entries: Vec<(String, FieldDecl)>,
}

impl FieldMap {
    pub(crate) const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn get(&self, ident: &str) -> Option<&FieldDecl> {
        self.entries
            .iter()
            .find(|(name, _)| name == ident)
            .map(|(_, decl)| decl)
    }

    pub(crate) fn upsert(&mut self, ident: &str, decl: FieldDecl) {
        match self.entries.iter_mut().find(|(name, _)| name == ident) {
            Some((_, slot)) => *slot = decl,
            None => self.entries.push((ident.to_string(), decl)),
        }
    }

    pub(crate) fn extend_from(&mut self, other: &Self) {
        for (ident, decl) in &other.entries {
            self.upsert(ident, decl.clone());
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &FieldDecl)> {
        self.entries.iter().map(|(name, decl)| (name.as_str(), decl))
    }

    pub(crate) fn primary_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, decl)| decl.is_primary_key())
            .map(|(name, _)| name.as_str())
    }
}

///
/// FlattenOutput
///
/// The frozen pass-1 result: per registry name, the flattened field map and
/// the declared kind. Pass 2 consumes this and never re-queries pass 1.
///

#[derive(Debug, Default)]
pub(crate) struct FlattenOutput {
    pub fields: BTreeMap<RegistryName, FieldMap>,
    pub kinds: BTreeMap<RegistryName, ContributionKind>,
}

///
/// Flattener
///
/// Pass 1. Each registry name is visited at most once; the value memoized
/// for ancestors is what propagates upward, which for entities is empty —
/// an entity's concrete fields never leak past its own boundary.
///

struct Flattener<'a> {
    store: &'a ContributionStore,
    /// Module precedence order: index 0 wins.
    precedence: &'a [ModuleName],
    out: FlattenOutput,
    /// Memoized upward-propagating maps.
    memo: BTreeMap<RegistryName, FieldMap>,
    visiting: Vec<RegistryName>,
}

impl Flattener<'_> {
    fn first_step(&mut self, name: &str) -> Result<FieldMap, FieldError> {
        if let Some(done) = self.memo.get(name) {
            return Ok(done.clone());
        }
        if let Some(pos) = self.visiting.iter().position(|n| n == name) {
            let mut path = self.visiting[pos..].to_vec();
            path.push(name.to_string());
            return Err(FieldError::InheritanceCycle { path });
        }

        let contributions = self.store.contributions_for(self.precedence, name);
        if contributions.is_empty() {
            return Err(FieldError::UnknownAncestor {
                registry_name: self
                    .visiting
                    .last()
                    .cloned()
                    .unwrap_or_else(|| name.to_string()),
                ancestor: name.to_string(),
            });
        }

        let kind = contributions[0].kind;
        if contributions.iter().any(|c| c.kind != kind) {
            return Err(FieldError::KindConflict {
                registry_name: name.to_string(),
            });
        }

        self.visiting.push(name.to_string());

        // Lowest-precedence fragment first, so a higher-precedence fragment
        // overwrites on collision. Within each fragment: ancestor fields
        // first, own fields win.
        let mut acc = FieldMap::new();
        let fragments: Vec<_> = contributions
            .iter()
            .flat_map(|c| c.ordered_bases.iter())
            .collect();
        for fragment in fragments.iter().rev() {
            for ancestor in &fragment.inherits {
                let ancestor_map = self.first_step(ancestor)?;
                acc.extend_from(&ancestor_map);
            }
            for (ident, decl) in &fragment.fields {
                acc.upsert(ident, decl.clone());
            }
        }

        self.visiting.pop();
        self.out.kinds.insert(name.to_string(), kind);
        self.out.fields.insert(name.to_string(), acc.clone());

        // Entity boundary: concrete fields stay with the entity.
        let upward = if kind == ContributionKind::Entity {
            FieldMap::new()
        } else {
            acc
        };
        self.memo.insert(name.to_string(), upward.clone());
        Ok(upward)
    }
}

/// Flatten every contributed registry name. Runs to completion before any
/// pass-2 build starts; relationship resolution depends on the full map.
pub(crate) fn flatten_all(
    store: &ContributionStore,
    load_order: &[ModuleName],
    precedence: &[ModuleName],
) -> Result<FlattenOutput, FieldError> {
    let mut flattener = Flattener {
        store,
        precedence,
        out: FlattenOutput::default(),
        memo: BTreeMap::new(),
        visiting: Vec::new(),
    };

    for name in store.registry_names(load_order) {
        flattener.first_step(&name)?;
    }

    Ok(flattener.out)
}

#[cfg(test)]
mod tests {
    use super::flatten_all;
    use crate::{
        assemble::FieldError,
        contrib::{ContributionStore, FieldDecl, Fragment, LoadContext},
    };
    use moddb_schema::types::FieldType;

    fn orders(modules: &[&str]) -> (Vec<String>, Vec<String>) {
        let load: Vec<String> = modules.iter().map(ToString::to_string).collect();
        let precedence: Vec<String> = load.iter().rev().cloned().collect();
        (load, precedence)
    }

    #[test]
    fn own_fields_override_mixin_fields() {
        let mut store = ContributionStore::new();
        let mut ctx = LoadContext::new("m1", &mut store);
        ctx.register_mixin(
            "with_label",
            Fragment::new("mixin")
                .field("label", FieldDecl::column(FieldType::Text))
                .field("weight", FieldDecl::column(FieldType::Int)),
        );
        ctx.register_entity(
            "tag",
            Fragment::new("tag")
                .inherit("with_label")
                .field("id", FieldDecl::primary(FieldType::Int))
                .field("weight", FieldDecl::column(FieldType::Timestamp)),
        );

        let (load, precedence) = orders(&["m1"]);
        let flat = flatten_all(&store, &load, &precedence).expect("flatten");

        let fields = &flat.fields["tag"];
        let idents: Vec<&str> = fields.iter().map(|(n, _)| n).collect();
        // Ancestor fields first; the entity's own weight wins in place.
        assert_eq!(idents, ["label", "weight", "id"]);
        assert!(matches!(
            fields.get("weight"),
            Some(FieldDecl::Column { ty: FieldType::Timestamp, .. }),
        ));
    }

    #[test]
    fn entity_fields_do_not_leak_past_the_entity_edge() {
        let mut store = ContributionStore::new();
        let mut ctx = LoadContext::new("m1", &mut store);
        ctx.register_entity(
            "base_entity",
            Fragment::new("base").field("id", FieldDecl::primary(FieldType::Int)),
        );
        ctx.register_entity(
            "derived",
            Fragment::new("derived")
                .inherit("base_entity")
                .field("name", FieldDecl::column(FieldType::Text)),
        );

        let (load, precedence) = orders(&["m1"]);
        let flat = flatten_all(&store, &load, &precedence).expect("flatten");

        let derived: Vec<&str> = flat.fields["derived"].iter().map(|(n, _)| n).collect();
        assert_eq!(derived, ["name"], "base entity's id must not propagate");

        let base: Vec<&str> = flat.fields["base_entity"].iter().map(|(n, _)| n).collect();
        assert_eq!(base, ["id"], "base entity keeps its own fields");
    }

    #[test]
    fn mixin_fields_propagate_through_nested_mixins() {
        let mut store = ContributionStore::new();
        let mut ctx = LoadContext::new("m1", &mut store);
        ctx.register_mixin(
            "timestamps",
            Fragment::new("timestamps").field("created_at", FieldDecl::column(FieldType::Timestamp)),
        );
        ctx.register_mixin(
            "audited",
            Fragment::new("audited")
                .inherit("timestamps")
                .field("author", FieldDecl::column(FieldType::Text)),
        );
        ctx.register_entity(
            "doc",
            Fragment::new("doc")
                .inherit("audited")
                .field("id", FieldDecl::primary(FieldType::Int)),
        );

        let (load, precedence) = orders(&["m1"]);
        let flat = flatten_all(&store, &load, &precedence).expect("flatten");

        let idents: Vec<&str> = flat.fields["doc"].iter().map(|(n, _)| n).collect();
        assert_eq!(idents, ["created_at", "author", "id"]);
    }

    #[test]
    fn later_module_fragment_wins_on_collision() {
        let mut store = ContributionStore::new();
        LoadContext::new("m1", &mut store).register_entity(
            "tag",
            Fragment::new("m1").field("label", FieldDecl::column(FieldType::Int)),
        );
        LoadContext::new("m2", &mut store).register_entity(
            "tag",
            Fragment::new("m2").field("label", FieldDecl::column(FieldType::Text)),
        );

        let (load, precedence) = orders(&["m1", "m2"]);
        let flat = flatten_all(&store, &load, &precedence).expect("flatten");

        assert!(matches!(
            flat.fields["tag"].get("label"),
            Some(FieldDecl::Column { ty: FieldType::Text, .. }),
        ));
    }

    #[test]
    fn unknown_ancestor_is_reported_with_the_consumer() {
        let mut store = ContributionStore::new();
        LoadContext::new("m1", &mut store).register_entity(
            "tag",
            Fragment::new("tag").inherit("ghost"),
        );

        let (load, precedence) = orders(&["m1"]);
        let err = flatten_all(&store, &load, &precedence).expect_err("missing ancestor");
        assert!(matches!(
            err,
            FieldError::UnknownAncestor { registry_name, ancestor }
                if registry_name == "tag" && ancestor == "ghost"
        ));
    }

    #[test]
    fn inheritance_cycle_fails_fast() {
        let mut store = ContributionStore::new();
        let mut ctx = LoadContext::new("m1", &mut store);
        ctx.register_mixin("a", Fragment::new("a").inherit("b"));
        ctx.register_mixin("b", Fragment::new("b").inherit("a"));

        let (load, precedence) = orders(&["m1"]);
        let err = flatten_all(&store, &load, &precedence).expect_err("cycle");
        assert!(matches!(err, FieldError::InheritanceCycle { .. }));
    }

    #[test]
    fn conflicting_kinds_for_one_name_rejected() {
        let mut store = ContributionStore::new();
        LoadContext::new("m1", &mut store).register_entity("tag", Fragment::new("a"));
        LoadContext::new("m2", &mut store).register_mixin("tag", Fragment::new("b"));

        let (load, precedence) = orders(&["m1", "m2"]);
        let err = flatten_all(&store, &load, &precedence).expect_err("kind conflict");
        assert!(matches!(
            err,
            FieldError::KindConflict { registry_name } if registry_name == "tag"
        ));
    }

    #[test]
    fn shared_mixin_is_flattened_once_and_reused() {
        let mut store = ContributionStore::new();
        let mut ctx = LoadContext::new("m1", &mut store);
        ctx.register_mixin(
            "shared",
            Fragment::new("shared").field("label", FieldDecl::column(FieldType::Text)),
        );
        ctx.register_entity(
            "a",
            Fragment::new("a")
                .inherit("shared")
                .field("id", FieldDecl::primary(FieldType::Int)),
        );
        ctx.register_entity(
            "b",
            Fragment::new("b")
                .inherit("shared")
                .field("id", FieldDecl::primary(FieldType::Int)),
        );

        let (load, precedence) = orders(&["m1"]);
        let flat = flatten_all(&store, &load, &precedence).expect("flatten");

        for entity in ["a", "b"] {
            let idents: Vec<&str> = flat.fields[entity].iter().map(|(n, _)| n).collect();
            assert_eq!(idents, ["label", "id"], "entity {entity}");
        }
    }
}
