use super::{HandlerRegistry, SingleContextRouter, SplitContextRouter};
use crate::context::StoreContext;
use crate::core::Result;
use crate::handler::{Command, Query};
use log::debug;
use std::any::Any;
use std::sync::Arc;

/// Collects handler registrations and wires routers over them.
///
/// ```ignore
/// let router = CrudServices::new()
///     .register_query::<OpenOrders>()
///     .register_command::<PlaceOrder>()
///     .add_split_store(ReadContext::named("orders")?, WriteContext::named("orders")?)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct CrudServices {
    registry: HandlerRegistry,
}

impl CrudServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_query<Q: Query + Default>(mut self) -> Self {
        self.registry.register_default::<Q>();
        self
    }

    pub fn register_command<C: Command + Default>(mut self) -> Self {
        self.registry.register_default::<C>();
        self
    }

    /// Registers an explicit constructor for `T`.
    pub fn register_with<T, F>(mut self, constructor: F) -> Self
    where
        T: Any + Send,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.registry.register(constructor);
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Router binding every handler to `context`.
    pub fn add_store<C: StoreContext>(&self, context: C) -> SingleContextRouter<C> {
        debug!(
            "single-context router over '{}' with {} handler types",
            context.name(),
            self.registry.len()
        );
        SingleContextRouter::from_shared(Arc::new(context), Arc::new(self.registry.clone()))
    }

    /// Router binding queries to `read` and commands to `write`.
    ///
    /// Fails with `Configuration` when `R` and `W` are the same type.
    pub fn add_split_store<R: StoreContext, W: StoreContext>(
        &self,
        read: R,
        write: W,
    ) -> Result<SplitContextRouter<R, W>> {
        let router = SplitContextRouter::from_shared(
            Arc::new(read),
            Arc::new(write),
            Arc::new(self.registry.clone()),
        )?;
        debug!(
            "split router: reads from '{}', writes to '{}'",
            router.read_context().name(),
            router.write_context().name()
        );
        Ok(router)
    }
}
