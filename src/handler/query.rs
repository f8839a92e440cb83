use super::{BindToken, Bindable, Query};
use crate::core::{CrudError, Result};
use crate::storage::{Entity, StoreHandle, Tracked};
use futures::Stream;

/// Read access shared by query handlers.
#[derive(Debug, Default)]
pub struct QueryBase {
    handle: Option<StoreHandle>,
}

impl QueryBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `handle`. A handler returned already bound by a custom
    /// factory is rebound to the router's context.
    pub fn bind(&mut self, handle: StoreHandle, _token: BindToken) {
        self.handle = Some(handle);
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    /// The bound handle.
    pub fn handle(&self) -> Result<&StoreHandle> {
        self.handle.as_ref().ok_or_else(|| {
            CrudError::Configuration("query handler used before being bound".to_string())
        })
    }

    /// Every `E`, tracked: edits saved through the same handle are seen by
    /// later reads on it.
    pub fn as_tracking<E: Entity>(&self) -> Result<Vec<Tracked<E>>> {
        self.handle()?.tracked()
    }

    /// Every `E` as a detached snapshot.
    pub fn as_no_tracking<E: Entity>(&self) -> Result<Vec<E>> {
        self.handle()?.untracked()
    }

    pub fn find_tracked<E: Entity>(&self, key: &str) -> Result<Option<Tracked<E>>> {
        self.handle()?.find_tracked(key)
    }

    pub fn find<E: Entity>(&self, key: &str) -> Result<Option<E>> {
        self.handle()?.find(key)
    }

    /// Lazy, single-pass sequence of detached `E`s.
    pub fn stream<E: Entity>(&self) -> Result<impl Stream<Item = Result<E>> + Send + use<E>> {
        Ok(self.handle()?.stream())
    }

    /// Lazy, single-pass sequence of tracked `E`s.
    pub fn stream_tracked<E: Entity>(
        &self,
    ) -> Result<impl Stream<Item = Result<Tracked<E>>> + Send + '_> {
        Ok(self.handle()?.stream_tracked())
    }

    /// Saves in-place edits made to tracked results.
    pub fn save_changes_sync(&self) -> Result<usize> {
        self.handle()?.save_changes_sync()
    }
}

impl Bindable for QueryBase {
    fn bind(&mut self, handle: StoreHandle, token: BindToken) {
        QueryBase::bind(self, handle, token);
    }
}

impl Query for QueryBase {}
