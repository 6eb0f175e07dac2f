use crate::store::{Backend, Filter, Row, StoreError};
use std::{
    collections::BTreeMap,
    sync::{PoisonError, RwLock},
};

///
/// MemoryBackend
///
/// Reference backend holding every table as an insertion-ordered row list.
/// Suitable for tests and single-process demos; concurrent readers share a
/// RwLock.
///

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<BTreeMap<String, Vec<Row>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every materialized table.
    pub fn table_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<Row>>> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<Row>>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for MemoryBackend {
    fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        self.write().entry(table.to_string()).or_default();
        Ok(())
    }

    fn insert(&self, table: &str, row: Row) -> Result<(), StoreError> {
        let mut tables = self.write();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        rows.push(row);
        Ok(())
    }

    fn update(&self, table: &str, filter: &Filter, patch: &Row) -> Result<u64, StoreError> {
        let mut tables = self.write();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        let mut touched = 0;
        for row in rows.iter_mut().filter(|row| filter.matches(row)) {
            for (column, value) in patch {
                row.insert(column.clone(), value.clone());
            }
            touched += 1;
        }
        Ok(touched)
    }

    fn delete(&self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut tables = self.write();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        let before = rows.len();
        rows.retain(|row| !filter.matches(row));
        Ok((before - rows.len()) as u64)
    }

    fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let tables = self.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        Ok(rows.iter().filter(|row| filter.matches(row)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryBackend;
    use crate::store::{Backend, Filter, Row, Value};

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.ensure_table("t").expect("create");
        backend
            .insert("t", row(&[("id", Value::Int(1))]))
            .expect("insert");
        backend.ensure_table("t").expect("re-create");

        let rows = backend.select("t", &Filter::new()).expect("select");
        assert_eq!(rows.len(), 1, "re-ensuring a table must not clear it");
    }

    #[test]
    fn update_touches_only_matching_rows() {
        let backend = MemoryBackend::new();
        backend.ensure_table("t").expect("create");
        backend
            .insert("t", row(&[("id", Value::Int(1)), ("v", Value::Int(10))]))
            .expect("insert");
        backend
            .insert("t", row(&[("id", Value::Int(2)), ("v", Value::Int(20))]))
            .expect("insert");

        let touched = backend
            .update("t", &Filter::eq("id", 2_i64), &row(&[("v", Value::Int(99))]))
            .expect("update");
        assert_eq!(touched, 1);

        let unchanged = backend
            .first("t", &Filter::eq("id", 1_i64))
            .expect("select")
            .expect("row 1 should remain");
        assert_eq!(unchanged["v"], Value::Int(10));
    }

    #[test]
    fn missing_table_is_an_error() {
        let backend = MemoryBackend::new();
        let err = backend.select("ghost", &Filter::new()).expect_err("no table");
        assert!(err.to_string().contains("'ghost' not found"));
    }
}
