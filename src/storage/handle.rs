// ============================================================================
// Unit of Work
// ============================================================================
//
// A `StoreHandle` is one unit of work against a `MemoryStore`: it reads
// records (tracked or detached), records pending mutations in its change
// tracker and flushes them as one batch on save. Inside an ambient
// transaction the batch is staged by the store until the scope ends.
//
// A handle is owned by exactly one handler; it is not meant to serve two
// in-flight operations at once.
//
// ============================================================================

use super::entity::{Entity, Tracked, TrackedSlot, decode};
use super::memory::{MemoryStore, StoredRecord};
use super::set::EntitySet;
use crate::core::{CrudError, Result};
use crate::transaction::{AmbientTransaction, CancellationSignal, Change, TransactionId};
use futures::stream::{self, Stream};
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Pending state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Will be inserted on save
    Added,
    /// Loaded from the store; saved only if its state changed since
    Unchanged,
    /// Will be written on save
    Modified,
    /// Will be removed on save
    Deleted,
}

struct TrackedEntry {
    collection: String,
    key: String,
    state: EntryState,
    /// Version observed in the store; `None` for entities not stored yet
    original_version: Option<u64>,
    /// Serialized state at load / last accepted save
    original: Option<JsonValue>,
    slot: Arc<dyn TrackedSlot>,
    cell: Arc<dyn Any + Send + Sync>,
}

impl TrackedEntry {
    fn tracked<E: Entity>(&self) -> Result<Tracked<E>> {
        let cell = Arc::clone(&self.cell)
            .downcast::<Mutex<E>>()
            .map_err(|_| {
                CrudError::ExecutionError(format!(
                    "Record '{}' in '{}' is tracked as a different type",
                    self.key, self.collection
                ))
            })?;
        Ok(Tracked::from_cell(cell, self.key.clone()))
    }
}

#[derive(Default)]
struct ChangeTracker {
    entries: Vec<TrackedEntry>,
}

impl ChangeTracker {
    fn position(&self, collection: &str, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.collection == collection && entry.key == key)
    }

    fn attach<E: Entity>(
        &mut self,
        entity: E,
        state: EntryState,
        original: Option<StoredRecord>,
    ) -> Tracked<E> {
        let key = entity.key();
        let cell = Arc::new(Mutex::new(entity));
        let (original_version, original) = match original {
            Some(record) => (Some(record.version), Some(record.value)),
            None => (None, None),
        };
        self.entries.push(TrackedEntry {
            collection: E::COLLECTION.to_string(),
            key: key.clone(),
            state,
            original_version,
            original,
            slot: cell.clone(),
            cell: cell.clone(),
        });
        Tracked::from_cell(cell, key)
    }
}

/// One unit of work against a backing store.
pub struct StoreHandle {
    store: MemoryStore,
    context: String,
    tracker: Mutex<ChangeTracker>,
}

impl StoreHandle {
    pub fn new(store: MemoryStore, context: impl Into<String>) -> Self {
        Self {
            store,
            context: context.into(),
            tracker: Mutex::new(ChangeTracker::default()),
        }
    }

    /// Name of the store context that opened this handle.
    pub fn context_name(&self) -> &str {
        &self.context
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn tracker(&self) -> MutexGuard<'_, ChangeTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ambient() -> Option<AmbientTransaction> {
        AmbientTransaction::current().filter(AmbientTransaction::is_active)
    }

    fn ambient_id() -> Option<TransactionId> {
        Self::ambient().map(|txn| txn.id())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Detached copies of every record of `E`. Editing them never reaches
    /// the store.
    pub fn untracked<E: Entity>(&self) -> Result<Vec<E>> {
        let txn = Self::ambient_id();
        let mut entities = Vec::new();
        for key in self.store.keys(E::COLLECTION, txn)? {
            if let Some(record) = self.store.get(E::COLLECTION, &key, txn)? {
                entities.push(decode(record.value)?);
            }
        }
        Ok(entities)
    }

    /// Detached copy of one record.
    pub fn find<E: Entity>(&self, key: &str) -> Result<Option<E>> {
        self.store
            .get(E::COLLECTION, key, Self::ambient_id())?
            .map(|record| decode(record.value))
            .transpose()
    }

    /// Every record of `E`, attached to this handle's change tracker.
    pub fn tracked<E: Entity>(&self) -> Result<Vec<Tracked<E>>> {
        let txn = Self::ambient_id();
        let mut entities = Vec::new();
        for key in self.store.keys(E::COLLECTION, txn)? {
            if let Some(record) = self.store.get(E::COLLECTION, &key, txn)? {
                entities.push(self.track_loaded::<E>(&key, record)?);
            }
        }
        Ok(entities)
    }

    /// One record attached to the change tracker, or the cell already
    /// tracked under that key.
    pub fn find_tracked<E: Entity>(&self, key: &str) -> Result<Option<Tracked<E>>> {
        {
            let tracker = self.tracker();
            if let Some(pos) = tracker.position(E::COLLECTION, key) {
                let entry = &tracker.entries[pos];
                if entry.state == EntryState::Deleted {
                    return Ok(None);
                }
                return entry.tracked().map(Some);
            }
        }

        match self.store.get(E::COLLECTION, key, Self::ambient_id())? {
            Some(record) => self.track_loaded::<E>(key, record).map(Some),
            None => Ok(None),
        }
    }

    fn track_loaded<E: Entity>(&self, key: &str, record: StoredRecord) -> Result<Tracked<E>> {
        let mut tracker = self.tracker();
        if let Some(pos) = tracker.position(E::COLLECTION, key) {
            return tracker.entries[pos].tracked();
        }
        let entity: E = decode(record.value.clone())?;
        Ok(tracker.attach(entity, EntryState::Unchanged, Some(record)))
    }

    /// Lazily yields detached records of `E`.
    ///
    /// Only the key list is read up front; each record is fetched when the
    /// stream is polled, and records removed in the meantime are skipped.
    pub fn stream<E: Entity>(&self) -> impl Stream<Item = Result<E>> + Send + use<E> {
        let store = self.store.clone();
        let txn = Self::ambient_id();
        stream::unfold(Cursor::Pending, move |cursor| {
            let store = store.clone();
            async move {
                let mut keys = match cursor.resume(&store, E::COLLECTION, txn) {
                    Ok(Some(keys)) => keys,
                    Ok(None) => return None,
                    Err(err) => return Some((Err(err), Cursor::Done)),
                };
                while let Some(key) = keys.pop_front() {
                    match store.get(E::COLLECTION, &key, txn) {
                        Ok(Some(record)) => {
                            return Some((decode::<E>(record.value), Cursor::Running(keys)));
                        }
                        Ok(None) => continue,
                        Err(err) => return Some((Err(err), Cursor::Done)),
                    }
                }
                None
            }
        })
    }

    /// Lazily yields records of `E` attached to the change tracker.
    pub fn stream_tracked<E: Entity>(&self) -> impl Stream<Item = Result<Tracked<E>>> + Send + '_ {
        let txn = Self::ambient_id();
        stream::unfold(Cursor::Pending, move |cursor| async move {
            let mut keys = match cursor.resume(&self.store, E::COLLECTION, txn) {
                Ok(Some(keys)) => keys,
                Ok(None) => return None,
                Err(err) => return Some((Err(err), Cursor::Done)),
            };
            while let Some(key) = keys.pop_front() {
                match self.store.get(E::COLLECTION, &key, txn) {
                    Ok(Some(record)) => {
                        let tracked = self.track_loaded::<E>(&key, record);
                        return Some((tracked, Cursor::Running(keys)));
                    }
                    Ok(None) => continue,
                    Err(err) => return Some((Err(err), Cursor::Done)),
                }
            }
            None
        })
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Typed mutation view over the collection of `E`.
    pub fn set<E: Entity>(&self) -> EntitySet<'_, E> {
        EntitySet::new(self)
    }

    pub(crate) fn add_entity<E: Entity>(&self, entity: E) -> Result<Tracked<E>> {
        let key = entity.key();
        let mut tracker = self.tracker();
        if let Some(pos) = tracker.position(E::COLLECTION, &key) {
            let entry = &mut tracker.entries[pos];
            if entry.state != EntryState::Deleted {
                return Err(CrudError::DuplicateKey {
                    collection: E::COLLECTION.to_string(),
                    key,
                });
            }
            let tracked = entry.tracked::<E>()?;
            tracked.replace(entity);
            entry.state = match entry.original_version {
                Some(_) => EntryState::Modified,
                None => EntryState::Added,
            };
            return Ok(tracked);
        }
        Ok(tracker.attach(entity, EntryState::Added, None))
    }

    pub(crate) fn update_entity<E: Entity>(&self, entity: E) -> Result<Tracked<E>> {
        let key = entity.key();
        {
            let mut tracker = self.tracker();
            if let Some(pos) = tracker.position(E::COLLECTION, &key) {
                let entry = &mut tracker.entries[pos];
                let tracked = entry.tracked::<E>()?;
                tracked.replace(entity);
                if entry.state != EntryState::Added {
                    entry.state = EntryState::Modified;
                }
                return Ok(tracked);
            }
        }

        let record = self.require_record::<E>(&key)?;
        Ok(self
            .tracker()
            .attach(entity, EntryState::Modified, Some(record)))
    }

    pub(crate) fn remove_by_key<E: Entity>(&self, key: &str) -> Result<()> {
        {
            let mut tracker = self.tracker();
            if let Some(pos) = tracker.position(E::COLLECTION, key) {
                if tracker.entries[pos].state == EntryState::Added {
                    tracker.entries.remove(pos);
                } else {
                    tracker.entries[pos].state = EntryState::Deleted;
                }
                return Ok(());
            }
        }

        let record = self.require_record::<E>(key)?;
        let entity: E = decode(record.value.clone())?;
        self.tracker()
            .attach(entity, EntryState::Deleted, Some(record));
        Ok(())
    }

    fn require_record<E: Entity>(&self, key: &str) -> Result<StoredRecord> {
        self.store
            .get(E::COLLECTION, key, Self::ambient_id())?
            .ok_or_else(|| CrudError::NotFound {
                collection: E::COLLECTION.to_string(),
                key: key.to_string(),
            })
    }

    // ------------------------------------------------------------------
    // Tracker state
    // ------------------------------------------------------------------

    /// Whether a save would write anything.
    pub fn has_changes(&self) -> Result<bool> {
        let tracker = self.tracker();
        for entry in &tracker.entries {
            match entry.state {
                EntryState::Added | EntryState::Modified | EntryState::Deleted => return Ok(true),
                EntryState::Unchanged => {
                    if entry.original.as_ref() != Some(&entry.slot.snapshot()?) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracker().entries.len()
    }

    pub fn entry_state<E: Entity>(&self, key: &str) -> Option<EntryState> {
        let tracker = self.tracker();
        tracker
            .position(E::COLLECTION, key)
            .map(|pos| tracker.entries[pos].state)
    }

    /// Detaches everything without saving.
    pub fn clear_tracker(&self) {
        self.tracker().entries.clear();
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Flushes pending changes; returns the number of affected records.
    pub fn save_changes_sync(&self) -> Result<usize> {
        self.save_changes_sync_with(true)
    }

    /// Flushes pending changes. With `accept_all_changes_on_success` unset
    /// the tracker keeps its pending states after a successful save.
    pub fn save_changes_sync_with(&self, accept_all_changes_on_success: bool) -> Result<usize> {
        let mut tracker = self.tracker();
        let mut changes = Vec::new();
        let mut flushed: Vec<(usize, Option<JsonValue>)> = Vec::new();

        for (index, entry) in tracker.entries.iter().enumerate() {
            let change = match entry.state {
                EntryState::Added => {
                    let value = Self::checked_snapshot(entry)?;
                    flushed.push((index, Some(value.clone())));
                    Change::Insert {
                        collection: entry.collection.clone(),
                        key: entry.key.clone(),
                        value,
                    }
                }
                EntryState::Unchanged | EntryState::Modified => {
                    let value = Self::checked_snapshot(entry)?;
                    if entry.state == EntryState::Unchanged && entry.original.as_ref() == Some(&value)
                    {
                        continue;
                    }
                    flushed.push((index, Some(value.clone())));
                    Change::Update {
                        collection: entry.collection.clone(),
                        key: entry.key.clone(),
                        value,
                        expected_version: Self::base_version(entry)?,
                    }
                }
                EntryState::Deleted => {
                    flushed.push((index, None));
                    Change::Delete {
                        collection: entry.collection.clone(),
                        key: entry.key.clone(),
                        expected_version: Self::base_version(entry)?,
                    }
                }
            };
            changes.push(change);
        }

        if changes.is_empty() {
            return Ok(0);
        }

        let versions: Vec<Option<u64>> = changes.iter().map(Change::resulting_version).collect();
        let affected = self.store.save(changes, Self::ambient().as_ref())?;

        if accept_all_changes_on_success {
            let mut removed = Vec::new();
            for ((index, snapshot), version) in flushed.into_iter().zip(versions) {
                let entry = &mut tracker.entries[index];
                match snapshot {
                    Some(value) => {
                        entry.state = EntryState::Unchanged;
                        entry.original = Some(value);
                        entry.original_version = version;
                    }
                    None => removed.push(index),
                }
            }
            for index in removed.into_iter().rev() {
                tracker.entries.remove(index);
            }
        }

        Ok(affected)
    }

    /// Async form of [`StoreHandle::save_changes_sync`].
    pub async fn save_changes(&self) -> Result<usize> {
        self.save_changes_sync()
    }

    /// Like [`StoreHandle::save_changes`], refusing to start once `signal`
    /// has fired.
    pub async fn save_changes_cancellable(&self, signal: &CancellationSignal) -> Result<usize> {
        signal.check()?;
        self.save_changes_sync()
    }

    fn checked_snapshot(entry: &TrackedEntry) -> Result<JsonValue> {
        let current_key = entry.slot.current_key();
        if current_key != entry.key {
            return Err(CrudError::InvalidArgument(format!(
                "Key of tracked record '{}' in '{}' changed to '{}'",
                entry.key, entry.collection, current_key
            )));
        }
        entry.slot.snapshot()
    }

    fn base_version(entry: &TrackedEntry) -> Result<u64> {
        entry.original_version.ok_or_else(|| {
            CrudError::ExecutionError(format!(
                "Record '{}' in '{}' has no stored version",
                entry.key, entry.collection
            ))
        })
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("context", &self.context)
            .field("store", &self.store)
            .field("tracked", &self.tracked_count())
            .finish()
    }
}

/// Progress of a lazy record stream.
enum Cursor {
    Pending,
    Running(VecDeque<String>),
    Done,
}

impl Cursor {
    fn resume(
        self,
        store: &MemoryStore,
        collection: &str,
        txn: Option<TransactionId>,
    ) -> Result<Option<VecDeque<String>>> {
        match self {
            Cursor::Pending => Ok(Some(store.keys(collection, txn)?.into())),
            Cursor::Running(keys) => Ok(Some(keys)),
            Cursor::Done => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: String,
        balance: i64,
    }

    impl Entity for Account {
        const COLLECTION: &'static str = "accounts";

        fn key(&self) -> String {
            self.id.clone()
        }
    }

    fn account(id: &str, balance: i64) -> Account {
        Account {
            id: id.to_string(),
            balance,
        }
    }

    fn seeded(accounts: &[Account]) -> MemoryStore {
        let store = MemoryStore::new("test");
        let handle = StoreHandle::new(store.clone(), "seed");
        handle.set::<Account>().add_range(accounts.to_vec()).unwrap();
        handle.save_changes_sync().unwrap();
        store
    }

    #[test]
    fn test_add_then_save_inserts_records() {
        let store = MemoryStore::new("test");
        let handle = StoreHandle::new(store.clone(), "ctx");

        handle.set().add(account("a", 10)).unwrap();
        assert_eq!(handle.entry_state::<Account>("a"), Some(EntryState::Added));
        assert_eq!(handle.save_changes_sync().unwrap(), 1);

        assert_eq!(store.version_of("accounts", "a").unwrap(), Some(1));
        assert_eq!(handle.entry_state::<Account>("a"), Some(EntryState::Unchanged));
        assert!(!handle.has_changes().unwrap());
    }

    #[test]
    fn test_tracked_edits_are_detected_on_save() {
        let store = seeded(&[account("a", 10)]);
        let handle = StoreHandle::new(store.clone(), "ctx");

        let tracked = handle.find_tracked::<Account>("a").unwrap().unwrap();
        tracked.modify(|a| a.balance = 25);
        assert!(handle.has_changes().unwrap());
        assert_eq!(handle.save_changes_sync().unwrap(), 1);

        let reread = StoreHandle::new(store.clone(), "ctx");
        assert_eq!(reread.find::<Account>("a").unwrap().unwrap().balance, 25);
        assert_eq!(store.version_of("accounts", "a").unwrap(), Some(2));
    }

    #[test]
    fn test_untracked_edits_never_reach_the_store() {
        let store = seeded(&[account("a", 10)]);
        let handle = StoreHandle::new(store, "ctx");

        let mut detached = handle.find::<Account>("a").unwrap().unwrap();
        detached.balance = 99;

        assert_eq!(handle.tracked_count(), 0);
        assert_eq!(handle.save_changes_sync().unwrap(), 0);
        assert_eq!(handle.find::<Account>("a").unwrap().unwrap().balance, 10);
    }

    #[test]
    fn test_identity_resolution_returns_same_cell() {
        let store = seeded(&[account("a", 1), account("b", 2)]);
        let handle = StoreHandle::new(store, "ctx");

        let first = handle.find_tracked::<Account>("a").unwrap().unwrap();
        let all = handle.tracked::<Account>().unwrap();

        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|t| t.same_cell(&first)));
        assert_eq!(handle.tracked_count(), 2);
    }

    #[test]
    fn test_stale_update_is_a_concurrency_conflict() {
        let store = seeded(&[account("a", 10)]);
        let first = StoreHandle::new(store.clone(), "one");
        let second = StoreHandle::new(store, "two");

        first.find_tracked::<Account>("a").unwrap().unwrap().modify(|a| a.balance = 1);
        second.find_tracked::<Account>("a").unwrap().unwrap().modify(|a| a.balance = 2);

        first.save_changes_sync().unwrap();
        let err = second.save_changes_sync().unwrap_err();
        assert!(err.is_concurrency_conflict());
    }

    #[test]
    fn test_remove_and_duplicate_add() {
        let store = seeded(&[account("a", 10)]);
        let handle = StoreHandle::new(store.clone(), "ctx");

        let set = handle.set::<Account>();
        set.remove_by_key("a").unwrap();
        assert!(set.find("a").unwrap().is_none());
        assert_eq!(handle.save_changes_sync().unwrap(), 1);
        assert_eq!(store.record_count("accounts").unwrap(), 0);
        assert_eq!(handle.tracked_count(), 0);

        set.add(account("b", 1)).unwrap();
        let err = set.add(account("b", 2)).unwrap_err();
        assert!(matches!(err, CrudError::DuplicateKey { .. }));
    }

    #[test]
    fn test_missing_record_cannot_be_updated() {
        let handle = StoreHandle::new(MemoryStore::new("test"), "ctx");
        let err = handle.set().update(account("ghost", 0)).unwrap_err();
        assert!(matches!(err, CrudError::NotFound { .. }));
    }

    #[test]
    fn test_key_change_is_rejected_on_save() {
        let store = seeded(&[account("a", 10)]);
        let handle = StoreHandle::new(store, "ctx");

        handle
            .find_tracked::<Account>("a")
            .unwrap()
            .unwrap()
            .modify(|a| a.id = "b".to_string());

        let err = handle.save_changes_sync().unwrap_err();
        assert!(matches!(err, CrudError::InvalidArgument(_)));
    }

    #[test]
    fn test_save_without_accepting_keeps_pending_state() {
        let handle = StoreHandle::new(MemoryStore::new("test"), "ctx");
        handle.set().add(account("a", 1)).unwrap();

        assert_eq!(handle.save_changes_sync_with(false).unwrap(), 1);
        assert_eq!(handle.entry_state::<Account>("a"), Some(EntryState::Added));
    }

    #[tokio::test]
    async fn test_stream_is_lazy_and_skips_removed_records() {
        let store = seeded(&[account("a", 1), account("b", 2), account("c", 3)]);
        let handle = StoreHandle::new(store.clone(), "ctx");

        let mut stream = Box::pin(handle.stream::<Account>());
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.id, "a");

        let remover = StoreHandle::new(store, "other");
        remover.set::<Account>().remove_by_key("b").unwrap();
        remover.save_changes_sync().unwrap();

        let rest: Vec<Account> = stream.map(|item| item.unwrap()).collect().await;
        assert_eq!(rest, vec![account("c", 3)]);
    }

    #[tokio::test]
    async fn test_stream_tracked_attaches_entities() {
        let store = seeded(&[account("a", 1), account("b", 2)]);
        let handle = StoreHandle::new(store, "ctx");

        let tracked: Vec<Tracked<Account>> = handle
            .stream_tracked::<Account>()
            .map(|item| item.unwrap())
            .collect()
            .await;

        assert_eq!(tracked.len(), 2);
        assert_eq!(handle.tracked_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_save_writes_nothing() {
        let store = MemoryStore::new("test");
        let handle = StoreHandle::new(store.clone(), "ctx");
        handle.set().add(account("a", 1)).unwrap();

        let signal = CancellationSignal::new();
        signal.cancel();
        let err = handle.save_changes_cancellable(&signal).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(store.record_count("accounts").unwrap(), 0);
    }
}
