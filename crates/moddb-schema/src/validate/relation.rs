use crate::{error::ErrorTree, node::EntityDescriptor};
use std::collections::BTreeMap;

/// Every foreign reference must land on an existing storage entity and an
/// existing column of it. The assembler resolves these during composition;
/// this pass re-checks the frozen output so a hand-built or deserialized
/// registry fails just as loudly.
pub fn validate_relation_targets(
    entities: &BTreeMap<String, EntityDescriptor>,
    errs: &mut ErrorTree,
) {
    for entity in entities.values() {
        for field in &entity.fields {
            let Some(foreign) = &field.foreign else {
                continue;
            };

            match entities.get(&foreign.registry_name) {
                None => errs.add_route(
                    &entity.name,
                    format!(
                        "field '{}' references unknown registry name '{}'",
                        field.ident, foreign.registry_name,
                    ),
                ),
                Some(target) if !target.is_storage() => errs.add_route(
                    &entity.name,
                    format!(
                        "field '{}' references non-storage entity '{}'",
                        field.ident, foreign.registry_name,
                    ),
                ),
                Some(target) => {
                    if target.fields.get(&foreign.field).is_none() {
                        errs.add_route(
                            &entity.name,
                            format!(
                                "field '{}' references missing column '{}.{}'",
                                field.ident, foreign.registry_name, foreign.field,
                            ),
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::validate_relation_targets;
    use crate::{
        error::ErrorTree,
        node::{EntityDescriptor, EntityKind, FieldDescriptor, FieldList, ForeignRef},
        types::FieldType,
    };
    use std::collections::BTreeMap;

    fn entity(name: &str, fields: Vec<FieldDescriptor>) -> EntityDescriptor {
        EntityDescriptor {
            name: name.to_string(),
            kind: EntityKind::Storage,
            table: Some(name.to_string()),
            fields: fields.into_iter().collect::<FieldList>(),
            behaviors: vec![],
        }
    }

    fn pk(ident: &str) -> FieldDescriptor {
        FieldDescriptor {
            ident: ident.to_string(),
            ty: FieldType::Int,
            nullable: false,
            primary_key: true,
            foreign: None,
            relation: None,
        }
    }

    fn fk(ident: &str, target: &str, field: &str) -> FieldDescriptor {
        FieldDescriptor {
            ident: ident.to_string(),
            ty: FieldType::Int,
            nullable: true,
            primary_key: false,
            foreign: Some(ForeignRef {
                registry_name: target.to_string(),
                field: field.to_string(),
            }),
            relation: Some(target.to_string()),
        }
    }

    #[test]
    fn resolved_reference_passes() {
        let mut entities = BTreeMap::new();
        entities.insert("owner".to_string(), entity("owner", vec![pk("id")]));
        entities.insert(
            "pet".to_string(),
            entity("pet", vec![pk("id"), fk("owner_id", "owner", "id")]),
        );

        let mut errs = ErrorTree::new();
        validate_relation_targets(&entities, &mut errs);
        assert!(errs.is_empty());
    }

    #[test]
    fn dangling_reference_reported_with_route() {
        let mut entities = BTreeMap::new();
        entities.insert(
            "pet".to_string(),
            entity("pet", vec![pk("id"), fk("owner_id", "owner", "id")]),
        );

        let mut errs = ErrorTree::new();
        validate_relation_targets(&entities, &mut errs);
        let err = errs.result().expect_err("dangling target should fail");
        assert!(err.to_string().contains("pet: field 'owner_id'"));
    }
}
