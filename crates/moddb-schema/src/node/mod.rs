mod entity;
mod field;

pub use entity::{BehaviorRef, EntityDescriptor, EntityKind};
pub use field::{FieldDescriptor, FieldList, ForeignRef};
