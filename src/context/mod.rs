// ============================================================================
// Store Contexts
// ============================================================================
//
// A store context is a typed source of store handles. Routers hold contexts
// and open one fresh handle per handler they build; the split router tells
// its read and write sides apart by the context's Rust type.
//
// ============================================================================

pub mod config;

pub use config::ContextConfig;

use crate::core::Result;
use crate::storage::{MemoryStore, StoreHandle};
use crate::transaction::TransactionPlan;

/// A typed source of store handles.
pub trait StoreContext: Send + Sync + 'static {
    /// Human-readable name, recorded on every handle this context opens
    fn name(&self) -> &str;

    /// Opens a fresh unit of work. Never returns a handle already given out.
    fn open_handle(&self) -> Result<StoreHandle>;

    /// Transaction defaults configured for this context, if any.
    fn config(&self) -> Option<&ContextConfig> {
        None
    }

    /// Plan used by routers when the caller does not supply one.
    fn default_plan(&self) -> TransactionPlan {
        self.config()
            .map(ContextConfig::transaction_plan)
            .unwrap_or_default()
    }
}

/// Context over a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryContext {
    name: String,
    store: MemoryStore,
    config: Option<ContextConfig>,
}

impl MemoryContext {
    /// Context over a private store nobody else can reach.
    pub fn new(name: &str) -> Self {
        Self::with_store(name, MemoryStore::new(name))
    }

    /// Context over the process-wide store registered under `database`.
    pub fn named(database: &str) -> Result<Self> {
        Ok(Self::with_store(database, MemoryStore::named(database)?))
    }

    /// Context over an existing store.
    pub fn with_store(name: &str, store: MemoryStore) -> Self {
        Self {
            name: name.to_string(),
            store,
            config: None,
        }
    }

    /// Validates `config` and opens its named store with its defaults.
    pub fn from_config(config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let store = MemoryStore::named(&config.database)?;
        Ok(Self {
            name: config.database.clone(),
            store,
            config: Some(config),
        })
    }

    pub fn from_url(url: &str) -> Result<Self> {
        Self::from_config(ContextConfig::from_url(url)?)
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl StoreContext for MemoryContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_handle(&self) -> Result<StoreHandle> {
        Ok(StoreHandle::new(self.store.clone(), self.name.clone()))
    }

    fn config(&self) -> Option<&ContextConfig> {
        self.config.as_ref()
    }
}

/// Declares a distinct context type wrapping a [`MemoryContext`].
///
/// Split routers require different context types for their read and write
/// sides; this is the shortest way to get one.
///
/// ```ignore
/// store_context!(pub ReportingContext);
/// let read = ReportingContext::named("reporting")?;
/// ```
#[macro_export]
macro_rules! store_context {
    ($vis:vis $name:ident) => {
        #[derive(Debug, Clone)]
        $vis struct $name {
            inner: $crate::context::MemoryContext,
        }

        impl $name {
            /// Wraps an existing memory context.
            pub fn new(inner: $crate::context::MemoryContext) -> Self {
                Self { inner }
            }

            /// Context over a private store.
            pub fn isolated() -> Self {
                Self::new($crate::context::MemoryContext::new(stringify!($name)))
            }

            /// Context over the process-wide store registered under `database`.
            pub fn named(database: &str) -> $crate::core::Result<Self> {
                Ok(Self::new($crate::context::MemoryContext::named(database)?))
            }

            pub fn from_config(
                config: $crate::context::ContextConfig,
            ) -> $crate::core::Result<Self> {
                Ok(Self::new($crate::context::MemoryContext::from_config(config)?))
            }

            pub fn inner(&self) -> &$crate::context::MemoryContext {
                &self.inner
            }
        }

        impl $crate::context::StoreContext for $name {
            fn name(&self) -> &str {
                $crate::context::StoreContext::name(&self.inner)
            }

            fn open_handle(&self) -> $crate::core::Result<$crate::storage::StoreHandle> {
                $crate::context::StoreContext::open_handle(&self.inner)
            }

            fn config(&self) -> Option<&$crate::context::ContextConfig> {
                $crate::context::StoreContext::config(&self.inner)
            }
        }
    };
}
