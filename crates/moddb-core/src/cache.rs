use crate::store::{Row, Value};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Mutex, PoisonError, RwLock,
        atomic::{AtomicI64, Ordering},
    },
    sync::Arc,
};
use thiserror::Error as ThisError;

/// Persisted invalidation records, for cross-process cache administration.
pub const CACHE_TABLE: &str = "system_cache";

///
/// CacheError
///

#[derive(Debug, ThisError)]
pub enum CacheError {
    #[error("no cacheable method registered under '{0}'")]
    UnknownKey(CacheKey),
}

///
/// CacheKey
///
/// Administrative invalidation key. Always names the concrete entity the
/// method was composed into, never the mixin that physically declared it.
///

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct CacheKey {
    pub entity: String,
    pub method: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(entity: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.method)
    }
}

///
/// CacheRecord
///
/// One persisted invalidation event.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheRecord {
    pub id: i64,
    pub key: CacheKey,
}

impl CacheRecord {
    #[must_use]
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Int(self.id));
        row.insert("entity".to_string(), Value::Text(self.key.entity.clone()));
        row.insert("method".to_string(), Value::Text(self.key.method.clone()));
        row
    }

    #[must_use]
    pub fn from_row(row: &Row) -> Option<Self> {
        let Value::Int(id) = row.get("id")? else {
            return None;
        };
        let Value::Text(entity) = row.get("entity")? else {
            return None;
        };
        let Value::Text(method) = row.get("method")? else {
            return None;
        };

        Some(Self {
            id: *id,
            key: CacheKey::new(entity.clone(), method.clone()),
        })
    }
}

///
/// CacheCell
///
/// One memoizing adapter: results keyed by argument vector. Several cells
/// may serve the same [`CacheKey`] (one per contributing fragment); they
/// evict together.
///

#[derive(Debug, Default)]
pub struct CacheCell {
    memo: Mutex<BTreeMap<Vec<Value>, Value>>,
}

impl CacheCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lookup(&self, args: &[Value]) -> Option<Value> {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(args)
            .cloned()
    }

    pub fn store(&self, args: &[Value], value: Value) {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(args.to_vec(), value);
    }

    pub fn clear(&self) {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

///
/// CacheIndex
///
/// Global invalidation index for one assembled registry. Populated during
/// pass 2; interior-mutable afterwards so an immutable registry can still
/// evict.
///

#[derive(Debug, Default)]
pub struct CacheIndex {
    cells: RwLock<BTreeMap<CacheKey, Vec<Arc<CacheCell>>>>,
    last_seen: AtomicI64,
}

impl CacheIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one adapter under its key.
    pub fn register(&self, key: CacheKey, cell: Arc<CacheCell>) {
        self.cells
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .push(cell);
    }

    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Evict every adapter registered under `key`.
    pub fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        let registered = cells
            .get(key)
            .ok_or_else(|| CacheError::UnknownKey(key.clone()))?;

        for cell in registered {
            cell.clear();
        }
        Ok(())
    }

    pub fn invalidate_all(&self) {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        for registered in cells.values() {
            for cell in registered {
                cell.clear();
            }
        }
    }

    /// High-water mark of applied persisted invalidations.
    #[must_use]
    pub fn last_seen(&self) -> i64 {
        self.last_seen.load(Ordering::Acquire)
    }

    pub fn mark_seen(&self, id: i64) {
        self.last_seen.fetch_max(id, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheCell, CacheIndex, CacheKey, CacheRecord};
    use crate::store::Value;
    use std::sync::Arc;

    #[test]
    fn all_cells_under_a_key_evict_together() {
        let index = CacheIndex::new();
        let key = CacheKey::new("tag", "label");
        let a = Arc::new(CacheCell::new());
        let b = Arc::new(CacheCell::new());
        index.register(key.clone(), a.clone());
        index.register(key.clone(), b.clone());

        a.store(&[], Value::Int(1));
        b.store(&[], Value::Int(2));
        index.invalidate(&key).expect("registered key");

        assert!(a.lookup(&[]).is_none());
        assert!(b.lookup(&[]).is_none());
    }

    #[test]
    fn invalidating_unknown_key_is_an_error() {
        let index = CacheIndex::new();
        let err = index
            .invalidate(&CacheKey::new("tag", "ghost"))
            .expect_err("unknown key should fail");
        assert!(err.to_string().contains("tag.ghost"));
    }

    #[test]
    fn record_round_trips_through_row() {
        let record = CacheRecord {
            id: 7,
            key: CacheKey::new("tag", "label"),
        };
        let parsed = CacheRecord::from_row(&record.to_row()).expect("well-formed row");
        assert_eq!(parsed, record);
    }
}
