// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Ambient transaction scopes with commit/rollback over enlisted stores, and
// the retry executor that runs units of work inside them.
//
// Design Patterns Used:
// - RAII: a scope rolls back on drop unless explicitly completed
// - Command Pattern: staged `Change`s applied on commit, discarded on rollback
// - Task-local context: the open scope is ambient for the work it runs
//
// ============================================================================

pub mod cancel;
pub mod change;
pub mod executor;
pub mod options;
pub mod scope;
pub mod state;

pub use cancel::CancellationSignal;
pub use change::Change;
pub use executor::{RetryState, execute_with_retry, with_transaction};
pub use options::{DEFAULT_RETRY_DELAY, TransactionPlan};
pub use scope::{AmbientTransaction, Enlistment, TransactionScope};
pub use state::{TransactionId, TransactionState};
