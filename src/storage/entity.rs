use crate::core::{CrudError, Result};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A record type stored in a named collection under a string key.
///
/// Records are serialized with `serde_json`; the key must be stable for the
/// lifetime of the record.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name of the collection holding this record type
    const COLLECTION: &'static str;

    fn key(&self) -> String;
}

pub(crate) fn encode<E: Entity>(entity: &E) -> Result<JsonValue> {
    Ok(serde_json::to_value(entity)?)
}

pub(crate) fn decode<E: Entity>(value: JsonValue) -> Result<E> {
    serde_json::from_value(value).map_err(|err| {
        CrudError::Serialization(format!(
            "Failed to decode record from collection '{}': {}",
            E::COLLECTION,
            err
        ))
    })
}

fn lock<E>(cell: &Mutex<E>) -> MutexGuard<'_, E> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An entity attached to a unit of work's change tracker.
///
/// Edits made through [`Tracked::modify`] are picked up by the next save on
/// the handle that produced this cell. Clones share the same cell.
pub struct Tracked<E> {
    cell: Arc<Mutex<E>>,
    key: String,
}

impl<E: Entity> Tracked<E> {
    pub(crate) fn from_cell(cell: Arc<Mutex<E>>, key: String) -> Self {
        Self { cell, key }
    }

    /// Key the entity was tracked under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Copy of the current in-memory state.
    pub fn get(&self) -> E {
        lock(&self.cell).clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        f(&lock(&self.cell))
    }

    /// Edits the tracked state in place.
    pub fn modify<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(&mut lock(&self.cell))
    }

    pub(crate) fn replace(&self, value: E) {
        *lock(&self.cell) = value;
    }

    pub fn same_cell(&self, other: &Tracked<E>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<E> Clone for Tracked<E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            key: self.key.clone(),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Tracked<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("key", &self.key)
            .field("value", &*lock(&self.cell))
            .finish()
    }
}

/// Type-erased access the change tracker needs to a tracked cell.
pub(crate) trait TrackedSlot: Send + Sync {
    fn snapshot(&self) -> Result<JsonValue>;
    fn current_key(&self) -> String;
}

impl<E: Entity> TrackedSlot for Mutex<E> {
    fn snapshot(&self) -> Result<JsonValue> {
        encode(&*lock(self))
    }

    fn current_key(&self) -> String {
        lock(self).key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        text: String,
    }

    impl Entity for Note {
        const COLLECTION: &'static str = "notes";

        fn key(&self) -> String {
            self.id.clone()
        }
    }

    #[test]
    fn test_tracked_clones_share_state() {
        let note = Note {
            id: "n-1".to_string(),
            text: "draft".to_string(),
        };
        let tracked = Tracked::from_cell(Arc::new(Mutex::new(note)), "n-1".to_string());
        let alias = tracked.clone();

        alias.modify(|n| n.text = "final".to_string());
        assert_eq!(tracked.get().text, "final");
        assert!(tracked.same_cell(&alias));
    }

    #[test]
    fn test_slot_snapshot_reflects_edits() {
        let cell = Arc::new(Mutex::new(Note {
            id: "n-2".to_string(),
            text: "a".to_string(),
        }));
        let before = cell.snapshot().unwrap();
        lock(&cell).text = "b".to_string();
        let after = cell.snapshot().unwrap();

        assert_ne!(before, after);
        assert_eq!(cell.current_key(), "n-2");
    }

    #[test]
    fn test_decode_reports_collection_on_failure() {
        let err = decode::<Note>(serde_json::json!({"id": 5})).unwrap_err();
        assert!(matches!(err, CrudError::Serialization(ref msg) if msg.contains("notes")));
    }
}
