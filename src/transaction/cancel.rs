use crate::core::{CrudError, Result};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cooperative cancellation handle shared between a caller and the executor.
///
/// Clones observe the same signal. The default signal is never triggered
/// unless someone calls [`CancellationSignal::cancel`] on it or a clone.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A signal that is cancelled whenever `self` is, but can also be
    /// cancelled on its own without affecting `self`.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails with [`CrudError::Cancelled`] once the signal has fired.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(CrudError::Cancelled);
        }
        Ok(())
    }

    /// Resolves when the signal fires.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Sleeps for `duration` unless the signal fires first.
    pub async fn sleep(&self, duration: std::time::Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(CrudError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
