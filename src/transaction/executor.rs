// ============================================================================
// Transactional Retry Executor
// ============================================================================
//
// Runs a caller-supplied unit of work inside one ambient transaction scope.
// Concurrency conflicts are retried with exponential backoff inside that same
// scope until the attempt budget is spent; every other failure ends the call
// immediately. The scope commits once, after the first successful attempt,
// and rolls back on every other exit path.
//
// A call made while another call's scope is ambient joins that scope instead
// of opening one: its writes are staged with the outer work, and commit or
// rollback stays with the outermost call.
//
// Retries are silent: the executor emits no log records.
//
// ============================================================================

use super::{AmbientTransaction, TransactionPlan, TransactionScope};
use crate::core::{CrudError, RetryableError};
use std::future::Future;
use tracing::{Instrument, debug_span};

/// Per-call retry bookkeeping; lives only for one executor invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempts_made: u32,
}

/// Runs `work` inside a transaction scope, retrying concurrency conflicts.
///
/// Validation happens before any scope is opened, in this order: `work` must
/// be present, `plan.retry_count` must be at least 1, and the cancellation
/// signal must not have fired.
///
/// With `retry_count == 1` the work runs exactly once and any error is
/// returned as is. Otherwise a conflict after attempt `n` waits
/// `base_delay * 2^(n - 1)` (cancellable) before attempt `n + 1`, and the
/// conflict from the last allowed attempt is returned unchanged.
///
/// If a scope is already ambient, `work` runs inside it and nothing is
/// committed or rolled back here.
pub async fn execute_with_retry<T, E, F, Fut>(work: Option<F>, plan: TransactionPlan) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let Some(work) = work else {
        return Err(CrudError::InvalidArgument("unit of work must be provided".to_string()).into());
    };
    plan.validate()?;
    plan.cancellation.check()?;

    let joined = AmbientTransaction::current().is_some_and(|ambient| ambient.is_active());
    let span = debug_span!(
        "transaction",
        isolation = %plan.isolation_level,
        retry_count = plan.retry_count,
        joined
    );

    run_in_scope(work, plan, !joined).instrument(span).await
}

async fn run_in_scope<T, E, F, Fut>(mut work: F, plan: TransactionPlan, own_scope: bool) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let owned = own_scope.then(|| TransactionScope::begin(plan.isolation_level));

    let value = if plan.retry_count == 1 {
        attempt(owned.as_ref(), work()).await?
    } else {
        run_with_retry(&mut work, &plan, owned.as_ref()).await?
    };

    // Dropping an owned scope on the error paths above rolls it back
    if let Some(scope) = owned {
        scope.complete()?;
    }
    Ok(value)
}

/// Polls one attempt, inside `scope` when this call owns one.
async fn attempt<Fut: Future>(scope: Option<&TransactionScope>, future: Fut) -> Fut::Output {
    match scope {
        Some(scope) => scope.run(future).await,
        None => future.await,
    }
}

async fn run_with_retry<T, E, F, Fut>(
    work: &mut F,
    plan: &TransactionPlan,
    scope: Option<&TransactionScope>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let mut state = RetryState::default();

    loop {
        plan.cancellation.check()?;

        match attempt(scope, work()).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_concurrency_conflict() => {
                state.attempts_made += 1;
                if state.attempts_made >= plan.retry_count {
                    return Err(err);
                }
                plan.cancellation
                    .sleep(plan.backoff_delay(state.attempts_made))
                    .await?;
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`execute_with_retry`] for a unit of work that is always present.
///
/// Use `T = ()` for work that produces no result; the semantics are the same.
///
/// # Examples
///
/// ```
/// use crudroute::{CrudError, TransactionPlan, with_transaction};
///
/// # tokio_test::block_on(async {
/// let value = with_transaction(|| async { Ok::<_, CrudError>(42) }, TransactionPlan::new())
///     .await
///     .unwrap();
/// assert_eq!(value, 42);
/// # });
/// ```
pub async fn with_transaction<T, E, F, Fut>(work: F, plan: TransactionPlan) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    execute_with_retry(Some(work), plan).await
}
