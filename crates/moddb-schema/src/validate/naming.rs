use crate::{
    MAX_FIELD_NAME_LEN, MAX_REGISTRY_NAME_LEN, MAX_TABLE_NAME_LEN, err, error::ErrorTree,
    node::EntityDescriptor,
};

/// Identifier charset shared by registry names, field names, and tables.
/// Registry names may additionally be dotted.
fn is_ident(s: &str, allow_dots: bool) -> bool {
    !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit())
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || (allow_dots && c == '.'))
}

pub fn validate_entity_naming(entity: &EntityDescriptor, errs: &mut ErrorTree) {
    if entity.name.len() > MAX_REGISTRY_NAME_LEN || !is_ident(&entity.name, true) {
        err!(errs, "invalid registry name '{}'", entity.name);
    }

    if let Some(table) = &entity.table
        && (table.len() > MAX_TABLE_NAME_LEN || !is_ident(table, false))
    {
        errs.add_route(&entity.name, format!("invalid table name '{table}'"));
    }

    for field in &entity.fields {
        if field.ident.len() > MAX_FIELD_NAME_LEN || !is_ident(&field.ident, false) {
            errs.add_route(&entity.name, format!("invalid field name '{}'", field.ident));
        }
    }
}
