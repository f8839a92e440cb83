/// Concurrent Transaction Tests
///
/// Many callers running the executor at once against one record: no lost
/// updates, conflicts resolved by retry, nested calls joining the outer scope.
/// Run with: cargo test --test concurrent_transaction_tests

use crudroute::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Counter {
    id: String,
    value: u64,
}

impl Entity for Counter {
    const COLLECTION: &'static str = "counters";

    fn key(&self) -> String {
        self.id.clone()
    }
}

fn router(name: &str) -> SingleContextRouter<MemoryContext> {
    CrudServices::new()
        .register_command::<CommandBase>()
        .add_store(MemoryContext::new(name))
}

async fn seed_counter(router: &SingleContextRouter<MemoryContext>) {
    let command = router.build_command::<CommandBase>().unwrap();
    command
        .set()
        .unwrap()
        .add(Counter {
            id: "c".to_string(),
            value: 0,
        })
        .unwrap();
    command.save_changes().await.unwrap();
}

async fn increment(
    router: SingleContextRouter<MemoryContext>,
    plan: TransactionPlan,
    attempts: Arc<AtomicUsize>,
) -> Result<usize> {
    with_transaction(
        || {
            attempts.fetch_add(1, Ordering::SeqCst);
            let router = router.clone();
            async move {
                let command = router.build_command::<CommandBase>()?;
                let counter = command
                    .set::<Counter>()?
                    .find("c")?
                    .ok_or_else(|| CrudError::ExecutionError("counter missing".to_string()))?;
                counter.modify(|c| c.value += 1);
                tokio::time::sleep(Duration::from_millis(2)).await;
                command.save_changes().await
            }
        },
        plan,
    )
    .await
}

fn counter_value(router: &SingleContextRouter<MemoryContext>) -> u64 {
    router
        .build_command::<CommandBase>()
        .unwrap()
        .handle()
        .unwrap()
        .find::<Counter>("c")
        .unwrap()
        .unwrap()
        .value
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_all_commit_with_retries() {
    let router = router("concurrent-retry");
    seed_counter(&router).await;

    let workers = 8;
    let attempts = Arc::new(AtomicUsize::new(0));
    let plan = TransactionPlan::new()
        .retry_count(30)
        .retry_delay(Duration::from_millis(1));

    let mut handles = Vec::new();
    for _ in 0..workers {
        handles.push(tokio::spawn(increment(
            router.clone(),
            plan.clone(),
            attempts.clone(),
        )));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    assert_eq!(counter_value(&router), workers as u64);
    assert!(attempts.load(Ordering::SeqCst) >= workers);
    assert_eq!(router.context().store().staged_transaction_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_without_retries_no_update_is_lost() {
    let router = router("concurrent-single-attempt");
    seed_counter(&router).await;

    let attempts = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(tokio::spawn(increment(
            router.clone(),
            TransactionPlan::new(),
            attempts.clone(),
        )));
    }

    let mut committed = 0u64;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(err) => assert!(err.is_concurrency_conflict(), "unexpected error: {err}"),
        }
    }

    assert!(committed >= 1);
    assert_eq!(counter_value(&router), committed);
    assert_eq!(attempts.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn test_nested_executor_call_is_undone_by_outer_failure() {
    let router = router("concurrent-nested");
    seed_counter(&router).await;
    let attempts = Arc::new(AtomicUsize::new(0));

    let outer: Result<()> = with_transaction(
        || {
            let router = router.clone();
            let attempts = attempts.clone();
            async move {
                increment(router.clone(), TransactionPlan::new(), attempts).await?;
                // Staged with the outer work, not yet durable
                let store = router.context().store();
                assert_eq!(store.staged_transaction_count()?, 1);
                Err(CrudError::ExecutionError("outer fails after inner save".to_string()))
            }
        },
        TransactionPlan::new(),
    )
    .await;

    assert!(outer.is_err());
    assert_eq!(counter_value(&router), 0);
    assert_eq!(router.context().store().staged_transaction_count().unwrap(), 0);
}

#[tokio::test]
async fn test_nested_executor_call_sees_outer_staged_work() {
    let router = router("concurrent-nested-visibility");

    with_transaction(
        || {
            let router = router.clone();
            async move {
                let command = router.build_command::<CommandBase>()?;
                command.set()?.add(Counter {
                    id: "y".to_string(),
                    value: 1,
                })?;
                command.save_changes().await?;

                with_transaction(
                    || {
                        let router = router.clone();
                        async move {
                            let command = router.build_command::<CommandBase>()?;
                            command.set::<Counter>()?.remove_by_key("y")?;
                            command.save_changes().await
                        }
                    },
                    TransactionPlan::new(),
                )
                .await
            }
        },
        TransactionPlan::new(),
    )
    .await
    .unwrap();

    assert_eq!(router.context().store().record_count("counters").unwrap(), 0);
}

#[tokio::test]
async fn test_independent_callers_do_not_share_scopes() {
    let first = router("concurrent-independent-a");
    let second = router("concurrent-independent-b");
    seed_counter(&first).await;
    seed_counter(&second).await;

    let attempts = Arc::new(AtomicUsize::new(0));
    let (a, b) = tokio::join!(
        increment(first.clone(), TransactionPlan::new(), attempts.clone()),
        increment(second.clone(), TransactionPlan::new(), attempts.clone()),
    );

    assert_eq!(a.unwrap(), 1);
    assert_eq!(b.unwrap(), 1);
    assert_eq!(counter_value(&first), 1);
    assert_eq!(counter_value(&second), 1);
}
