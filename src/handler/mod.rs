// ============================================================================
// Command / Query Handlers
// ============================================================================
//
// Handlers receive their store handle exactly once, from the router that
// built them. Binding is gated by `BindToken`, which only this crate can
// construct, so application code cannot rebind a handler.
//
// A handler type embeds `QueryBase` or `CommandBase`, forwards `bind` to it
// and marks itself with `Query` or `Command`:
//
// ```ignore
// #[derive(Default)]
// struct OpenOrders { base: QueryBase }
//
// impl Bindable for OpenOrders {
//     fn bind(&mut self, handle: StoreHandle, token: BindToken) {
//         self.base.bind(handle, token);
//     }
// }
// impl Query for OpenOrders {}
// ```
//
// ============================================================================

pub mod command;
pub mod query;

pub use command::CommandBase;
pub use query::QueryBase;

use crate::storage::StoreHandle;

/// Proof that a bind call comes from a router.
#[derive(Debug)]
pub struct BindToken {
    _private: (),
}

impl BindToken {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// A handler that can be bound to a store handle.
pub trait Bindable: Send + 'static {
    /// Receives the handle this handler uses for its whole lifetime.
    fn bind(&mut self, handle: StoreHandle, token: BindToken);
}

/// Read-side handler; routers bind it to the read context.
pub trait Query: Bindable {}

/// Write-side handler; routers bind it to the write context.
pub trait Command: Bindable {}
