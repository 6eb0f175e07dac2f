use derive_more::Display;
use thiserror::Error as ThisError;

///
/// Operation
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[remain::sorted]
pub enum Operation {
    Call,
    Delete,
    Insert,
    Select,
    Update,
}

///
/// PolicyError
///

#[derive(Debug, ThisError)]
pub enum PolicyError {
    #[error("operation {operation} denied on '{entity}'")]
    Denied { entity: String, operation: Operation },
}

///
/// AccessPolicy
///
/// Lookup hook wrapped around every entity operation. Policy evaluation
/// itself lives outside the core; the registry only consults the verdict.
///

pub trait AccessPolicy: Send + Sync {
    fn check(&self, entity: &str, operation: Operation) -> Result<(), PolicyError>;
}

///
/// AllowAll
///

#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn check(&self, _entity: &str, _operation: Operation) -> Result<(), PolicyError> {
        Ok(())
    }
}
