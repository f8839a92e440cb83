use super::{CrudRouter, HandlerFactory, HandlerRegistry, build_bound};
use crate::context::StoreContext;
use crate::core::Result;
use crate::handler::{Command, Query};
use crate::transaction::TransactionPlan;
use std::fmt;
use std::sync::Arc;

/// Router binding queries and commands to the same context.
pub struct SingleContextRouter<C, F = HandlerRegistry> {
    context: Arc<C>,
    factory: Arc<F>,
}

impl<C: StoreContext, F: HandlerFactory> SingleContextRouter<C, F> {
    pub fn new(context: C, factory: F) -> Self {
        Self::from_shared(Arc::new(context), Arc::new(factory))
    }

    pub fn from_shared(context: Arc<C>, factory: Arc<F>) -> Self {
        Self { context, factory }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}

impl<C: StoreContext, F: HandlerFactory> CrudRouter for SingleContextRouter<C, F> {
    fn build_query<Q: Query>(&self) -> Result<Q> {
        build_bound(&*self.factory, &*self.context)
    }

    fn build_command<H: Command>(&self) -> Result<H> {
        build_bound(&*self.factory, &*self.context)
    }

    fn default_plan(&self) -> TransactionPlan {
        self.context.default_plan()
    }
}

impl<C, F> Clone for SingleContextRouter<C, F> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<C: StoreContext, F> fmt::Debug for SingleContextRouter<C, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleContextRouter")
            .field("context", &self.context.name())
            .finish()
    }
}
