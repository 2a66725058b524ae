//! Backend bookkeeping-store abstraction.
//!
//! The catalog persists every descriptor as a `(id, serial, parent id)`
//! row, plus a `(onion id, position) → layer serial` table that preserves
//! layer order. Implementations must return rows in ascending id order so
//! children always follow parents at reload.
//!
//! Stores are deliberately unaware of the onion model; they move rows.
//! The in-memory store below backs tests; `sogandb-meta-file` ships a
//! file-backed one for development.

use std::time::Duration;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::StoreError;

/// One persisted descriptor row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    /// Node id; primary key.
    pub id: u32,
    /// Owning node id, absent for roots.
    pub parent_id: Option<u32>,
    /// Textual serialization of the descriptor.
    pub serial: String,
}

/// One persisted layer row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRow {
    /// Owning onion id.
    pub onion_id: u32,
    /// Position in the stack, innermost-first.
    pub position: u32,
    /// Textual serialization of the layer.
    pub serial: String,
}

/// A backend bookkeeping store.
///
/// Writes must be durable before they return: the catalog installs a
/// mutation in memory only after the store accepted it.
pub trait MetaStore: Send + Sync {
    /// Inserts or replaces one descriptor row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the row could not be made durable.
    fn put_record(&self, row: &RecordRow) -> Result<(), StoreError>;

    /// Deletes one descriptor row. Deleting a missing row is not an error:
    /// rollback paths re-delete blindly.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn delete_record(&self, id: u32) -> Result<(), StoreError>;

    /// Inserts or replaces one layer row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the row could not be made durable.
    fn put_layer(&self, row: &LayerRow) -> Result<(), StoreError>;

    /// Deletes one layer row. Deleting a missing row is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn delete_layer(&self, onion_id: u32, position: u32) -> Result<(), StoreError>;

    /// All descriptor rows, ascending by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn load_records(&self) -> Result<Vec<RecordRow>, StoreError>;

    /// All layer rows, ascending by (onion id, position).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn load_layers(&self) -> Result<Vec<LayerRow>, StoreError>;
}

/// Retry policy for bookkeeping writes: exponential backoff, bounded
/// attempts, then give up and let the caller roll back.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4, base_delay: Duration::from_millis(50) }
    }
}

impl RetryPolicy {
    /// A policy that never retries; used in tests.
    #[must_use]
    pub fn none() -> Self {
        Self { max_attempts: 1, base_delay: Duration::ZERO }
    }

    /// Runs `op`, retrying store failures with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns the last [`StoreError`] once attempts are exhausted.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(err) if attempt < self.max_attempts => {
                    warn!(%err, attempt, what, "bookkeeping write failed; retrying");
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: BTreeMap<u32, RecordRow>,
    layers: BTreeMap<(u32, u32), LayerRow>,
}

/// An in-memory store. Durability is a fiction here; it exists for tests
/// and for wiring the engine without a backend.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryMetaStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemoryMetaStore {
    fn put_record(&self, row: &RecordRow) -> Result<(), StoreError> {
        self.inner.lock().records.insert(row.id, row.clone());
        Ok(())
    }

    fn delete_record(&self, id: u32) -> Result<(), StoreError> {
        self.inner.lock().records.remove(&id);
        Ok(())
    }

    fn put_layer(&self, row: &LayerRow) -> Result<(), StoreError> {
        self.inner.lock().layers.insert((row.onion_id, row.position), row.clone());
        Ok(())
    }

    fn delete_layer(&self, onion_id: u32, position: u32) -> Result<(), StoreError> {
        self.inner.lock().layers.remove(&(onion_id, position));
        Ok(())
    }

    fn load_records(&self) -> Result<Vec<RecordRow>, StoreError> {
        Ok(self.inner.lock().records.values().cloned().collect())
    }

    fn load_layers(&self) -> Result<Vec<LayerRow>, StoreError> {
        Ok(self.inner.lock().layers.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_memory_store_orders_records_by_id() {
        let store = MemoryMetaStore::new();
        for id in [5u32, 1, 3] {
            store
                .put_record(&RecordRow { id, parent_id: None, serial: format!("t {id}") })
                .unwrap();
        }
        let ids: Vec<u32> = store.load_records().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn test_memory_store_layer_rows_keyed_by_position() {
        let store = MemoryMetaStore::new();
        store.put_layer(&LayerRow { onion_id: 9, position: 1, serial: "b".into() }).unwrap();
        store.put_layer(&LayerRow { onion_id: 9, position: 0, serial: "a".into() }).unwrap();
        let serials: Vec<String> =
            store.load_layers().unwrap().iter().map(|r| r.serial.clone()).collect();
        assert_eq!(serials, vec!["a", "b"]);

        store.delete_layer(9, 1).unwrap();
        assert_eq!(store.load_layers().unwrap().len(), 1);
        // Blind re-delete is fine.
        store.delete_layer(9, 1).unwrap();
    }

    #[test]
    fn test_retry_policy_retries_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 3, base_delay: Duration::ZERO };
        let result = policy.run("test", || {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::WriteFailed("transient".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_policy_gives_up() {
        let policy = RetryPolicy { max_attempts: 2, base_delay: Duration::ZERO };
        let result: Result<(), StoreError> =
            policy.run("test", || Err(StoreError::WriteFailed("permanent".into())));
        assert!(result.is_err());
    }
}
