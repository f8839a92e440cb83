// ============================================================================
// CRUD Routers
// ============================================================================
//
// A router resolves a fresh handler from its factory and binds it to a fresh
// store handle opened from the right context:
//
// - SingleContextRouter: queries and commands share one context
// - SplitContextRouter: queries read from one context, commands write to
//   another; nothing keeps the two consistent
//
// ============================================================================

pub mod factory;
pub mod registration;
pub mod single;
pub mod split;

pub use factory::{HandlerFactory, HandlerRegistry};
pub use registration::CrudServices;
pub use single::SingleContextRouter;
pub use split::SplitContextRouter;

use crate::context::StoreContext;
use crate::core::{Result, RetryableError};
use crate::handler::{BindToken, Bindable, Command, Query};
use crate::transaction::{TransactionPlan, with_transaction};
use log::trace;
use std::any::type_name;
use std::future::Future;

/// Builds bound handlers and runs transactional work.
pub trait CrudRouter: Send + Sync {
    /// A new query handler bound to the read context.
    fn build_query<Q: Query>(&self) -> Result<Q>;

    /// A new command handler bound to the write context.
    fn build_command<C: Command>(&self) -> Result<C>;

    /// Plan used by [`CrudRouter::transaction`].
    fn default_plan(&self) -> TransactionPlan;

    /// Runs `work` through the retry executor with `plan`.
    fn with_transaction<T, E, F, Fut>(
        &self,
        work: F,
        plan: TransactionPlan,
    ) -> impl Future<Output = std::result::Result<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: RetryableError,
    {
        with_transaction(work, plan)
    }

    /// Runs `work` through the retry executor with the router's default plan.
    fn transaction<T, E, F, Fut>(&self, work: F) -> impl Future<Output = std::result::Result<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: RetryableError,
    {
        with_transaction(work, self.default_plan())
    }
}

/// Resolves `H` and binds it to a handle freshly opened from `context`.
pub(crate) fn build_bound<H, F, C>(factory: &F, context: &C) -> Result<H>
where
    H: Bindable,
    F: HandlerFactory,
    C: StoreContext,
{
    let mut handler = factory.create::<H>()?;
    let handle = context.open_handle()?;
    trace!(
        "binding {} to context '{}'",
        type_name::<H>(),
        context.name()
    );
    handler.bind(handle, BindToken::new());
    Ok(handler)
}
