use super::CancellationSignal;
use crate::core::{CrudError, IsolationLevel, Result};
use std::time::Duration;

/// Base backoff used when a plan does not set `retry_delay`.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Options for one executor invocation.
///
/// Built with chained setters and consumed by the executor; the executor
/// never mutates it.
#[derive(Debug, Clone)]
pub struct TransactionPlan {
    /// Isolation level requested for the transaction scope
    pub isolation_level: IsolationLevel,

    /// Maximum number of attempts (must be >= 1)
    pub retry_count: u32,

    /// Base backoff between attempts; `None` means [`DEFAULT_RETRY_DELAY`]
    pub retry_delay: Option<Duration>,

    /// Signal observed at entry and around every backoff wait
    pub cancellation: CancellationSignal,
}

impl TransactionPlan {
    pub fn new() -> Self {
        Self {
            isolation_level: IsolationLevel::default(),
            retry_count: 1,
            retry_delay: None,
            cancellation: CancellationSignal::default(),
        }
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn cancellation(mut self, signal: CancellationSignal) -> Self {
        self.cancellation = signal;
        self
    }

    pub fn base_delay(&self) -> Duration {
        self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY)
    }

    /// Backoff to wait after the `failed_attempts`-th conflict:
    /// `base_delay * 2^(failed_attempts - 1)`, saturating.
    pub fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay().saturating_mul(factor)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_count < 1 {
            return Err(CrudError::InvalidArgument(
                "retry_count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TransactionPlan {
    fn default() -> Self {
        Self::new()
    }
}
