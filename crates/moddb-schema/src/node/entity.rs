use crate::node::{FieldDescriptor, FieldList};
use serde::{Deserialize, Serialize};

///
/// EntityKind
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[remain::sorted]
pub enum EntityKind {
    /// Methods only; no physical table.
    Behavior,
    /// Backed by a physical table.
    Storage,
    /// Backed by a derived row source; read-only.
    View,
}

///
/// BehaviorRef
///
/// Provenance of one composed fragment: the module that contributed it and
/// the fragment label. Index 0 of the composed list wins on override.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BehaviorRef {
    pub module: String,
    pub label: String,
}

///
/// EntityDescriptor
///
/// The permanent assembly output for one registry name: resolved columns,
/// the bound table (storage entities only), and the ordered fragment
/// provenance the entity was composed from.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub kind: EntityKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    pub fields: FieldList,
    pub behaviors: Vec<BehaviorRef>,
}

impl EntityDescriptor {
    /// The single primary-key column, when exactly one is declared.
    #[must_use]
    pub fn primary_key(&self) -> Option<&FieldDescriptor> {
        let mut pks = self.fields.primary_keys();
        let first = pks.next()?;
        if pks.next().is_some() { None } else { Some(first) }
    }

    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self.kind, EntityKind::Storage)
    }

    #[must_use]
    pub const fn is_view(&self) -> bool {
        matches!(self.kind, EntityKind::View)
    }
}
