// ============================================================================
// Staged Record Changes
// ============================================================================
//
// A unit of work flushes its pending mutations as a batch of `Change`s.
// Outside a transaction scope the batch is applied at once; inside one it is
// staged until the scope commits (apply) or rolls back (discard).
//
// ============================================================================

use serde_json::Value as JsonValue;

/// A single record mutation carrying the version it was based on.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a record under a key that must not exist yet
    Insert {
        collection: String,
        key: String,
        value: JsonValue,
    },

    /// Replace a record whose current version must equal `expected_version`
    Update {
        collection: String,
        key: String,
        value: JsonValue,
        expected_version: u64,
    },

    /// Remove a record whose current version must equal `expected_version`
    Delete {
        collection: String,
        key: String,
        expected_version: u64,
    },
}

impl Change {
    pub fn collection(&self) -> &str {
        match self {
            Change::Insert { collection, .. }
            | Change::Update { collection, .. }
            | Change::Delete { collection, .. } => collection,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Change::Insert { key, .. } | Change::Update { key, .. } | Change::Delete { key, .. } => {
                key
            }
        }
    }

    /// Version the record carries once this change is applied.
    ///
    /// `None` for deletes.
    pub fn resulting_version(&self) -> Option<u64> {
        match self {
            Change::Insert { .. } => Some(1),
            Change::Update {
                expected_version, ..
            } => Some(expected_version + 1),
            Change::Delete { .. } => None,
        }
    }
}
