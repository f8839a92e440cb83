use super::entity::{Entity, Tracked};
use super::handle::StoreHandle;
use crate::core::Result;
use std::marker::PhantomData;

/// Typed mutation view over one collection of a [`StoreHandle`].
///
/// Every operation only records intent in the handle's change tracker; the
/// store sees nothing until the handle is saved.
pub struct EntitySet<'a, E> {
    handle: &'a StoreHandle,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, E: Entity> EntitySet<'a, E> {
    pub(crate) fn new(handle: &'a StoreHandle) -> Self {
        Self {
            handle,
            _entity: PhantomData,
        }
    }

    /// Marks `entity` for insertion.
    ///
    /// Fails with `DuplicateKey` if the handle already tracks a live entity
    /// under the same key. A key that exists only in the store is reported
    /// on save.
    pub fn add(&self, entity: E) -> Result<Tracked<E>> {
        self.handle.add_entity(entity)
    }

    pub fn add_range(&self, entities: impl IntoIterator<Item = E>) -> Result<Vec<Tracked<E>>> {
        entities.into_iter().map(|entity| self.add(entity)).collect()
    }

    /// Marks `entity` as a full replacement of the stored record with the
    /// same key.
    pub fn update(&self, entity: E) -> Result<Tracked<E>> {
        self.handle.update_entity(entity)
    }

    pub fn update_range(&self, entities: impl IntoIterator<Item = E>) -> Result<Vec<Tracked<E>>> {
        entities.into_iter().map(|entity| self.update(entity)).collect()
    }

    pub fn remove(&self, entity: &E) -> Result<()> {
        self.handle.remove_by_key::<E>(&entity.key())
    }

    pub fn remove_by_key(&self, key: &str) -> Result<()> {
        self.handle.remove_by_key::<E>(key)
    }

    pub fn remove_range<'e>(&self, entities: impl IntoIterator<Item = &'e E>) -> Result<()> {
        for entity in entities {
            self.remove(entity)?;
        }
        Ok(())
    }

    /// Tracked lookup by key; see [`StoreHandle::find_tracked`].
    pub fn find(&self, key: &str) -> Result<Option<Tracked<E>>> {
        self.handle.find_tracked(key)
    }

    /// Number of records visible to this handle, ignoring unsaved changes.
    pub fn count(&self) -> Result<usize> {
        Ok(self.handle.untracked::<E>()?.len())
    }
}
