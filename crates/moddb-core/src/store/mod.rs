mod memory;
mod value;

pub use memory::MemoryBackend;
pub use value::Value;

use derive_more::Display;
use moddb_schema::types::FieldType;
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

/// One stored record: column name → value.
pub type Row = BTreeMap<String, Value>;

///
/// StoreError
///

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("entity '{0}' has no physical table")]
    NoTable(String),

    #[error("entity '{0}' has no single primary key")]
    NoPrimaryKey(String),

    #[error("unknown column '{column}' on '{target}'")]
    UnknownColumn { target: String, column: String },

    #[error("column '{column}' expects {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: FieldType,
        found: String,
    },

    #[error("column '{column}' requires a value")]
    MissingValue { column: String },

    #[error("duplicate key {key} in table '{table}'")]
    DuplicateKey { table: String, key: Value },
}

///
/// Cmp
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[remain::sorted]
pub enum Cmp {
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
    Ne,
}

impl Cmp {
    #[must_use]
    pub fn eval(self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
        }
    }
}

///
/// Filter
///
/// Conjunction of column comparisons. A missing column evaluates as Null.
///

#[derive(Clone, Debug)]
pub struct FilterClause {
    pub field: String,
    pub cmp: Cmp,
    pub value: Value,
}

#[derive(Clone, Debug, Default)]
pub struct Filter {
    clauses: Vec<FilterClause>,
}

impl Filter {
    #[must_use]
    pub const fn new() -> Self {
        Self { clauses: Vec::new() }
    }

    #[must_use]
    pub fn and(mut self, field: impl Into<String>, cmp: Cmp, value: impl Into<Value>) -> Self {
        self.clauses.push(FilterClause {
            field: field.into(),
            cmp,
            value: value.into(),
        });
        self
    }

    /// Equality shortcut.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().and(field, Cmp::Eq, value)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> impl Iterator<Item = &FilterClause> {
        self.clauses.iter()
    }

    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.clauses.iter().all(|clause| {
            let cell = row.get(&clause.field).unwrap_or(&Value::Null);
            clause.cmp.eval(cell, &clause.value)
        })
    }
}

///
/// Backend
///
/// Generic storage boundary: create/read/update/delete plus the query
/// capability the registry needs. Wire format and physical layout are the
/// implementation's concern.
///

pub trait Backend: Send + Sync {
    /// Make a table available, creating it when absent.
    fn ensure_table(&self, table: &str) -> Result<(), StoreError>;

    fn insert(&self, table: &str, row: Row) -> Result<(), StoreError>;

    /// Apply `patch` to every matching row; returns the number touched.
    fn update(&self, table: &str, filter: &Filter, patch: &Row) -> Result<u64, StoreError>;

    /// Delete every matching row; returns the number removed.
    fn delete(&self, table: &str, filter: &Filter) -> Result<u64, StoreError>;

    fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    fn count(&self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.select(table, filter)?.len() as u64)
    }

    fn first(&self, table: &str, filter: &Filter) -> Result<Option<Row>, StoreError> {
        Ok(self.select(table, filter)?.into_iter().next())
    }
}
