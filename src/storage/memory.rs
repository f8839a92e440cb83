use crate::core::{CrudError, IsolationLevel, Result};
use crate::transaction::{AmbientTransaction, Change, Enlistment, TransactionId};
use lazy_static::lazy_static;
use log::trace;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// A committed record and its optimistic-concurrency version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub value: JsonValue,
    pub version: u64,
}

type Collections = HashMap<String, BTreeMap<String, StoredRecord>>;

static NEXT_STORE_ID: AtomicUsize = AtomicUsize::new(1);

// Process-wide stores addressed by name
lazy_static! {
    static ref NAMED_STORES: Mutex<HashMap<String, MemoryStore>> = Mutex::new(HashMap::new());
}

/// In-memory backing store of versioned JSON records grouped in collections.
///
/// Clones refer to the same data. Writes made inside an ambient transaction
/// are staged per transaction and only become visible to other readers once
/// the transaction commits.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    id: usize,
    name: String,
    /// Committed records
    collections: RwLock<Collections>,
    /// Changes staged by open transactions, in save order
    staged: Mutex<HashMap<TransactionId, Vec<Change>>>,
}

impl MemoryStore {
    /// Creates a store that shares data with nobody.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                id: NEXT_STORE_ID.fetch_add(1, Ordering::SeqCst),
                name: name.into(),
                collections: RwLock::new(HashMap::new()),
                staged: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the process-wide store registered under `name`, creating it
    /// on first use.
    pub fn named(name: &str) -> Result<Self> {
        let mut stores = NAMED_STORES.lock()?;
        let store = stores
            .entry(name.to_string())
            .or_insert_with(|| MemoryStore::new(name))
            .clone();
        Ok(store)
    }

    /// Removes `name` from the process-wide registry. Existing clones keep
    /// their data; the next `named(name)` starts empty.
    pub fn forget_named(name: &str) -> Result<bool> {
        Ok(NAMED_STORES.lock()?.remove(name).is_some())
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn same_store(&self, other: &MemoryStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of committed records in `collection`.
    pub fn record_count(&self, collection: &str) -> Result<usize> {
        let collections = self.inner.collections.read()?;
        Ok(collections.get(collection).map_or(0, BTreeMap::len))
    }

    pub fn collection_names(&self) -> Result<Vec<String>> {
        let collections = self.inner.collections.read()?;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Committed version of a record, ignoring any staged work.
    pub fn version_of(&self, collection: &str, key: &str) -> Result<Option<u64>> {
        let collections = self.inner.collections.read()?;
        Ok(collections
            .get(collection)
            .and_then(|records| records.get(key))
            .map(|record| record.version))
    }

    /// Number of transactions currently holding staged changes.
    pub fn staged_transaction_count(&self) -> Result<usize> {
        Ok(self.inner.staged.lock()?.len())
    }

    /// Drops all committed records. Staged work is left untouched.
    pub fn clear(&self) -> Result<()> {
        self.inner.collections.write()?.clear();
        Ok(())
    }

    /// Keys of `collection` as seen by `transaction` (committed + own staged).
    pub(crate) fn keys(
        &self,
        collection: &str,
        transaction: Option<TransactionId>,
    ) -> Result<Vec<String>> {
        let collections = self.inner.collections.read()?;
        let mut keys: BTreeSet<String> = collections
            .get(collection)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default();

        if let Some(txn) = transaction {
            let staged = self.inner.staged.lock()?;
            for change in staged.get(&txn).into_iter().flatten() {
                if change.collection() != collection {
                    continue;
                }
                match change {
                    Change::Insert { key, .. } => {
                        keys.insert(key.clone());
                    }
                    Change::Delete { key, .. } => {
                        keys.remove(key);
                    }
                    Change::Update { .. } => {}
                }
            }
        }

        Ok(keys.into_iter().collect())
    }

    /// A record as seen by `transaction` (committed + own staged).
    pub(crate) fn get(
        &self,
        collection: &str,
        key: &str,
        transaction: Option<TransactionId>,
    ) -> Result<Option<StoredRecord>> {
        let collections = self.inner.collections.read()?;
        let mut record = collections
            .get(collection)
            .and_then(|records| records.get(key))
            .cloned();

        if let Some(txn) = transaction {
            let staged = self.inner.staged.lock()?;
            for change in staged.get(&txn).into_iter().flatten() {
                if change.collection() != collection || change.key() != key {
                    continue;
                }
                record = match change {
                    Change::Insert { value, .. } | Change::Update { value, .. } => {
                        change.resulting_version().map(|version| StoredRecord {
                            value: value.clone(),
                            version,
                        })
                    }
                    Change::Delete { .. } => None,
                };
            }
        }

        Ok(record)
    }

    /// Validates and applies (or stages, inside `ambient`) a batch of changes.
    ///
    /// Either every change is accepted or none is. Returns the number of
    /// affected records.
    pub(crate) fn save(
        &self,
        changes: Vec<Change>,
        ambient: Option<&AmbientTransaction>,
    ) -> Result<usize> {
        let count = changes.len();
        if count == 0 {
            return Ok(0);
        }

        match ambient {
            None => {
                let mut collections = self.inner.collections.write()?;
                PendingView::new(&collections, &[]).check_all(&changes)?;
                apply_all(&mut collections, changes);
                trace!("store '{}': applied {} changes", self.inner.name, count);
            }
            Some(txn) => {
                txn.enlist(self.inner.clone())?;

                let collections = self.inner.collections.read()?;
                let mut staged = self.inner.staged.lock()?;
                check_claims(&staged, txn.id(), &changes)?;
                let pending = staged.entry(txn.id()).or_default();
                PendingView::new(&collections, pending.as_slice()).check_all(&changes)?;
                pending.extend(changes);
                trace!(
                    "store '{}': staged {} changes under {}",
                    self.inner.name,
                    count,
                    txn.id()
                );
            }
        }

        Ok(count)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

impl Enlistment for StoreInner {
    fn enlistment_id(&self) -> usize {
        self.id
    }

    fn commit(&self, transaction: TransactionId, isolation_level: IsolationLevel) -> Result<()> {
        let changes = self
            .staged
            .lock()?
            .remove(&transaction)
            .unwrap_or_default();
        if changes.is_empty() {
            return Ok(());
        }

        let mut collections = self.collections.write()?;
        PendingView::new(&collections, &[]).check_all(&changes)?;
        let count = changes.len();
        apply_all(&mut collections, changes);
        trace!(
            "store '{}': committed {} changes from {} ({})",
            self.name,
            count,
            transaction,
            isolation_level
        );
        Ok(())
    }

    fn rollback(&self, transaction: TransactionId) {
        let discarded = match self.staged.lock() {
            Ok(mut staged) => staged.remove(&transaction),
            Err(poisoned) => poisoned.into_inner().remove(&transaction),
        };
        if let Some(changes) = discarded {
            trace!(
                "store '{}': discarded {} changes from {}",
                self.name,
                changes.len(),
                transaction
            );
        }
    }
}

/// Record versions as they would be after `prior` and the changes checked so
/// far, on top of the committed state.
struct PendingView<'a> {
    collections: &'a Collections,
    prior: &'a [Change],
    shadow: HashMap<(String, String), Option<u64>>,
}

impl<'a> PendingView<'a> {
    fn new(collections: &'a Collections, prior: &'a [Change]) -> Self {
        Self {
            collections,
            prior,
            shadow: HashMap::new(),
        }
    }

    fn current_version(&self, collection: &str, key: &str) -> Option<u64> {
        if let Some(version) = self.shadow.get(&(collection.to_string(), key.to_string())) {
            return *version;
        }

        let mut version = self
            .collections
            .get(collection)
            .and_then(|records| records.get(key))
            .map(|record| record.version);
        for change in self.prior {
            if change.collection() == collection && change.key() == key {
                version = change.resulting_version();
            }
        }
        version
    }

    fn check(&mut self, change: &Change) -> Result<()> {
        let current = self.current_version(change.collection(), change.key());
        match change {
            Change::Insert { collection, key, .. } => {
                if current.is_some() {
                    return Err(CrudError::DuplicateKey {
                        collection: collection.clone(),
                        key: key.clone(),
                    });
                }
            }
            Change::Update {
                collection,
                key,
                expected_version,
                ..
            }
            | Change::Delete {
                collection,
                key,
                expected_version,
            } => match current {
                None => {
                    return Err(CrudError::ConcurrencyConflict(format!(
                        "record '{}' in '{}' was removed by another writer",
                        key, collection
                    )));
                }
                Some(found) if found != *expected_version => {
                    return Err(CrudError::ConcurrencyConflict(format!(
                        "record '{}' in '{}' expected version {}, found {}",
                        key, collection, expected_version, found
                    )));
                }
                Some(_) => {}
            },
        }

        self.shadow.insert(
            (change.collection().to_string(), change.key().to_string()),
            change.resulting_version(),
        );
        Ok(())
    }

    fn check_all(mut self, changes: &[Change]) -> Result<()> {
        for change in changes {
            self.check(change)?;
        }
        Ok(())
    }
}

/// A record staged by one open transaction cannot be written by another
/// until the first one ends.
fn check_claims(
    staged: &HashMap<TransactionId, Vec<Change>>,
    owner: TransactionId,
    changes: &[Change],
) -> Result<()> {
    for (other, pending) in staged.iter().filter(|(id, _)| **id != owner) {
        for change in changes {
            let claimed = pending.iter().any(|staged_change| {
                staged_change.collection() == change.collection()
                    && staged_change.key() == change.key()
            });
            if claimed {
                return Err(CrudError::ConcurrencyConflict(format!(
                    "record '{}' in '{}' has uncommitted changes from {}",
                    change.key(),
                    change.collection(),
                    other
                )));
            }
        }
    }
    Ok(())
}

fn apply_all(collections: &mut Collections, changes: Vec<Change>) {
    for change in changes {
        let version = change.resulting_version();
        match change {
            Change::Insert {
                collection,
                key,
                value,
            }
            | Change::Update {
                collection,
                key,
                value,
                ..
            } => {
                collections.entry(collection).or_default().insert(
                    key,
                    StoredRecord {
                        value,
                        version: version.unwrap_or(1),
                    },
                );
            }
            Change::Delete {
                collection, key, ..
            } => {
                if let Some(records) = collections.get_mut(&collection) {
                    records.remove(&key);
                }
            }
        }
    }
}
