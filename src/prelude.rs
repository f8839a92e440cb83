//! Everything an application usually needs, in one import.
//!
//! ```ignore
//! use crudroute::prelude::*;
//! ```

pub use crate::context::{ContextConfig, MemoryContext, StoreContext};
pub use crate::core::{CrudError, IsolationLevel, Result, RetryableError};
pub use crate::handler::{BindToken, Bindable, Command, CommandBase, Query, QueryBase};
pub use crate::router::{
    CrudRouter, CrudServices, HandlerFactory, HandlerRegistry, SingleContextRouter,
    SplitContextRouter,
};
pub use crate::storage::{Entity, EntitySet, MemoryStore, StoreHandle, Tracked};
pub use crate::store_context;
pub use crate::transaction::{CancellationSignal, TransactionPlan, with_transaction};
