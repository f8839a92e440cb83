use super::{CrudRouter, HandlerFactory, HandlerRegistry, build_bound};
use crate::context::StoreContext;
use crate::core::{CrudError, Result};
use crate::handler::{Command, Query};
use crate::transaction::TransactionPlan;
use std::any::{TypeId, type_name};
use std::fmt;
use std::sync::Arc;

/// Router binding queries to a read context and commands to a write context.
///
/// The two contexts may point at different stores. Records written through
/// a command are then invisible to queries; nothing here replicates them.
pub struct SplitContextRouter<R, W, F = HandlerRegistry> {
    read: Arc<R>,
    write: Arc<W>,
    factory: Arc<F>,
}

impl<R: StoreContext, W: StoreContext, F: HandlerFactory> SplitContextRouter<R, W, F> {
    /// Fails with `Configuration` when `R` and `W` are the same type; use
    /// [`super::SingleContextRouter`] for that case.
    pub fn new(read: R, write: W, factory: F) -> Result<Self> {
        Self::from_shared(Arc::new(read), Arc::new(write), Arc::new(factory))
    }

    pub fn from_shared(read: Arc<R>, write: Arc<W>, factory: Arc<F>) -> Result<Self> {
        if TypeId::of::<R>() == TypeId::of::<W>() {
            return Err(CrudError::Configuration(format!(
                "Read and write contexts are both '{}'; use a single-context router instead",
                type_name::<R>()
            )));
        }
        Ok(Self {
            read,
            write,
            factory,
        })
    }

    pub fn read_context(&self) -> &R {
        &self.read
    }

    pub fn write_context(&self) -> &W {
        &self.write
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}

impl<R: StoreContext, W: StoreContext, F: HandlerFactory> CrudRouter
    for SplitContextRouter<R, W, F>
{
    fn build_query<Q: Query>(&self) -> Result<Q> {
        build_bound(&*self.factory, &*self.read)
    }

    fn build_command<C: Command>(&self) -> Result<C> {
        build_bound(&*self.factory, &*self.write)
    }

    /// Transactions wrap writes, so the write context's defaults apply.
    fn default_plan(&self) -> TransactionPlan {
        self.write.default_plan()
    }
}

impl<R, W, F> Clone for SplitContextRouter<R, W, F> {
    fn clone(&self) -> Self {
        Self {
            read: Arc::clone(&self.read),
            write: Arc::clone(&self.write),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<R: StoreContext, W: StoreContext, F> fmt::Debug for SplitContextRouter<R, W, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitContextRouter")
            .field("read", &self.read.name())
            .field("write", &self.write.name())
            .finish()
    }
}
