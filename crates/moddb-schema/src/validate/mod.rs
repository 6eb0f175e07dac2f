//! Registry validation orchestration and shared helpers.

pub mod naming;
pub mod relation;

use crate::{
    err,
    error::ErrorTree,
    node::{EntityDescriptor, EntityKind},
};
use std::collections::BTreeMap;

/// Run full registry validation in a staged, deterministic order.
pub fn validate_registry(entities: &BTreeMap<String, EntityDescriptor>) -> Result<(), ErrorTree> {
    // Phase 1: validate each descriptor (structural + local invariants).
    let mut errors = ErrorTree::new();
    for entity in entities.values() {
        validate_node(entity, &mut errors);
    }

    // Phase 2: enforce registry-wide invariants.
    validate_global(entities, &mut errors);

    errors.result()
}

// Local invariants for one descriptor.
fn validate_node(entity: &EntityDescriptor, errs: &mut ErrorTree) {
    naming::validate_entity_naming(entity, errs);

    let pk_count = entity.fields.primary_keys().count();
    match entity.kind {
        EntityKind::Storage => {
            if entity.table.is_none() {
                err!(errs, "storage entity '{}' has no bound table", entity.name);
            }
            if pk_count > 1 {
                err!(
                    errs,
                    "entity '{}' declares {pk_count} primary-key columns (at most 1)",
                    entity.name,
                );
            }
        }
        EntityKind::View => {
            if entity.table.is_some() {
                err!(
                    errs,
                    "view entity '{}' must not bind a physical table",
                    entity.name,
                );
            }
            if pk_count != 1 {
                err!(
                    errs,
                    "view entity '{}' declares {pk_count} primary-key columns (exactly 1)",
                    entity.name,
                );
            }
        }
        EntityKind::Behavior => {
            if entity.table.is_some() {
                err!(
                    errs,
                    "behavior entity '{}' must not bind a physical table",
                    entity.name,
                );
            }
            if !entity.fields.is_empty() {
                err!(
                    errs,
                    "behavior entity '{}' must not declare columns",
                    entity.name,
                );
            }
        }
    }

    for field in &entity.fields {
        if field.primary_key && !field.ty.supports_primary_key() {
            errs.add_route(
                &entity.name,
                format!("field '{}' of type {} cannot be a primary key", field.ident, field.ty),
            );
        }
        if field.primary_key && field.nullable {
            errs.add_route(
                &entity.name,
                format!("primary-key field '{}' cannot be nullable", field.ident),
            );
        }
    }
}

// Registry-wide passes that need the full descriptor map.
fn validate_global(entities: &BTreeMap<String, EntityDescriptor>, errs: &mut ErrorTree) {
    relation::validate_relation_targets(entities, errs);
}

#[cfg(test)]
mod tests {
    use super::validate_registry;
    use crate::{
        node::{EntityDescriptor, EntityKind, FieldDescriptor, FieldList},
        types::FieldType,
    };
    use std::collections::BTreeMap;

    fn field(ident: &str, ty: FieldType, primary_key: bool) -> FieldDescriptor {
        FieldDescriptor {
            ident: ident.to_string(),
            ty,
            nullable: !primary_key,
            primary_key,
            foreign: None,
            relation: None,
        }
    }

    fn storage(name: &str, table: &str, fields: Vec<FieldDescriptor>) -> EntityDescriptor {
        EntityDescriptor {
            name: name.to_string(),
            kind: EntityKind::Storage,
            table: Some(table.to_string()),
            fields: fields.into_iter().collect::<FieldList>(),
            behaviors: vec![],
        }
    }

    #[test]
    fn well_formed_registry_passes() {
        let mut entities = BTreeMap::new();
        entities.insert(
            "tag".to_string(),
            storage("tag", "tag", vec![field("id", FieldType::Int, true)]),
        );

        validate_registry(&entities).expect("single storage entity should validate");
    }

    #[test]
    fn multiple_primary_keys_rejected() {
        let mut entities = BTreeMap::new();
        entities.insert(
            "tag".to_string(),
            storage(
                "tag",
                "tag",
                vec![
                    field("id", FieldType::Int, true),
                    field("code", FieldType::Text, true),
                ],
            ),
        );

        let err = validate_registry(&entities).expect_err("two pk columns should fail");
        assert!(err.to_string().contains("2 primary-key columns"));
    }

    #[test]
    fn nullable_primary_key_rejected() {
        let mut pk = field("id", FieldType::Int, true);
        pk.nullable = true;

        let mut entities = BTreeMap::new();
        entities.insert("tag".to_string(), storage("tag", "tag", vec![pk]));

        let err = validate_registry(&entities).expect_err("nullable pk should fail");
        assert!(err.to_string().contains("cannot be nullable"));
    }
}
