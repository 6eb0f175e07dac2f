use derive_more::{Display, FromStr};
use serde::{Deserialize, Serialize};

///
/// FieldType
///
/// Logical column types understood by the registry. Wire and storage
/// representations are the backend's concern.
///

#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, FromStr, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[remain::sorted]
pub enum FieldType {
    Bool,
    Int,
    Text,
    Timestamp,
}

impl FieldType {
    /// Types usable as a primary key column.
    #[must_use]
    pub const fn supports_primary_key(self) -> bool {
        matches!(self, Self::Int | Self::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::FieldType;

    #[test]
    fn parses_from_display_form() {
        let ty: FieldType = "Timestamp".parse().expect("known type name should parse");
        assert_eq!(ty, FieldType::Timestamp);
        assert_eq!(ty.to_string(), "Timestamp");
    }

    #[test]
    fn primary_key_support_excludes_temporal_types() {
        assert!(FieldType::Int.supports_primary_key());
        assert!(FieldType::Text.supports_primary_key());
        assert!(!FieldType::Timestamp.supports_primary_key());
        assert!(!FieldType::Bool.supports_primary_key());
    }
}
