// ============================================================================
// crudroute Library
// ============================================================================
//
// Command/query handlers bound to store handles by routers, and a
// transactional executor that retries optimistic-concurrency conflicts.
//
// ============================================================================

pub mod context;
pub mod core;
pub mod handler;
pub mod prelude;
pub mod router;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use crate::core::{CrudError, IsolationLevel, Result, RetryableError};

pub use crate::context::{ContextConfig, MemoryContext, StoreContext};
pub use crate::handler::{BindToken, Bindable, Command, CommandBase, Query, QueryBase};
pub use crate::router::{
    CrudRouter, CrudServices, HandlerFactory, HandlerRegistry, SingleContextRouter,
    SplitContextRouter,
};
pub use crate::storage::{Entity, EntitySet, EntryState, MemoryStore, StoreHandle, Tracked};
pub use crate::transaction::{
    CancellationSignal, TransactionPlan, TransactionScope, execute_with_retry, with_transaction,
};

// ============================================================================
// Usage
// ============================================================================
//
// ```ignore
// use crudroute::prelude::*;
//
// store_context!(pub OrdersDb);
//
// let router = CrudServices::new()
//     .register_command::<CommandBase>()
//     .add_store(OrdersDb::named("orders")?);
//
// let placed = router
//     .with_transaction(
//         || async {
//             let command = router.build_command::<CommandBase>()?;
//             command.set::<Order>()?.add(order.clone())?;
//             command.save_changes().await
//         },
//         TransactionPlan::new().retry_count(3),
//     )
//     .await?;
// ```
