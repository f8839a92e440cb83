use super::{BindToken, Bindable, Command};
use crate::core::{CrudError, Result};
use crate::storage::{Entity, EntitySet, StoreHandle};
use crate::transaction::CancellationSignal;

/// Write access shared by command handlers.
#[derive(Debug, Default)]
pub struct CommandBase {
    handle: Option<StoreHandle>,
}

impl CommandBase {
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
            CrudError::Configuration("command handler used before being bound".to_string())
        })
    }

    /// Mutation view over the collection of `E`.
    pub fn set<E: Entity>(&self) -> Result<EntitySet<'_, E>> {
        Ok(self.handle()?.set())
    }

    pub fn has_changes(&self) -> Result<bool> {
        self.handle()?.has_changes()
    }

    /// Flushes pending mutations; returns the number of affected records.
    pub async fn save_changes(&self) -> Result<usize> {
        self.handle()?.save_changes().await
    }

    pub async fn save_changes_cancellable(&self, signal: &CancellationSignal) -> Result<usize> {
        self.handle()?.save_changes_cancellable(signal).await
    }

    pub fn save_changes_sync(&self) -> Result<usize> {
        self.handle()?.save_changes_sync()
    }

    pub fn save_changes_sync_with(&self, accept_all_changes_on_success: bool) -> Result<usize> {
        self.handle()?
            .save_changes_sync_with(accept_all_changes_on_success)
    }
}

impl Bindable for CommandBase {
    fn bind(&mut self, handle: StoreHandle, token: BindToken) {
        CommandBase::bind(self, handle, token);
    }
}

impl Command for CommandBase {}
