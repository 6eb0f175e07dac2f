use crate::types::FieldType;
use serde::{Deserialize, Serialize};

///
/// ForeignRef
///
/// Target of a resolved foreign-key column.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ForeignRef {
    pub registry_name: String,
    pub field: String,
}

///
/// FieldDescriptor
///
/// One resolved column or relationship of an assembled entity. Relationship
/// fields carry both the resolved foreign target and the remote registry
/// name they were declared against.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FieldDescriptor {
    pub ident: String,
    pub ty: FieldType,
    pub nullable: bool,
    pub primary_key: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign: Option<ForeignRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

///
/// FieldList
///
/// Declaration-ordered column list. Order is the composed override order and
/// is preserved through serialization.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldList {
    fields: Vec<FieldDescriptor>,
}

impl FieldList {
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    #[must_use]
    pub fn get(&self, ident: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.ident == ident)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// All primary-key columns, in declaration order.
    pub fn primary_keys(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.primary_key)
    }

    /// Append a column; replaces in place if the ident is already present,
    /// keeping the original position.
    pub fn upsert(&mut self, field: FieldDescriptor) {
        match self.fields.iter_mut().find(|f| f.ident == field.ident) {
            Some(slot) => *slot = field,
            None => self.fields.push(field),
        }
    }
}

impl<'a> IntoIterator for &'a FieldList {
    type Item = &'a FieldDescriptor;
    type IntoIter = std::slice::Iter<'a, FieldDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl FromIterator<FieldDescriptor> for FieldList {
    fn from_iter<I: IntoIterator<Item = FieldDescriptor>>(iter: I) -> Self {
        let mut list = Self::new();
        for field in iter {
            list.upsert(field);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldDescriptor, FieldList};
    use crate::types::FieldType;

    fn column(ident: &str, ty: FieldType) -> FieldDescriptor {
        FieldDescriptor {
            ident: ident.to_string(),
            ty,
            nullable: true,
            primary_key: false,
            foreign: None,
            relation: None,
        }
    }

    #[test]
    fn upsert_preserves_first_declaration_position() {
        let mut list = FieldList::new();
        list.upsert(column("id", FieldType::Int));
        list.upsert(column("name", FieldType::Text));
        list.upsert(column("id", FieldType::Text));

        let idents: Vec<&str> = list.iter().map(|f| f.ident.as_str()).collect();
        assert_eq!(idents, ["id", "name"]);
        assert_eq!(
            list.get("id").expect("id column should survive upsert").ty,
            FieldType::Text,
        );
    }
}
