// ============================================================================
// Ambient Transaction Scope
// ============================================================================
//
// A `TransactionScope` is opened by the executor and made ambient for the
// future it runs: any code polled inside `TransactionScope::run` can reach it
// through `AmbientTransaction::current()` without handle passing. Stores that
// save inside the scope stage their work and enlist themselves; the scope
// then drives every participant to commit (on `complete`) or rollback (on
// any other exit, including drop). Scopes log nothing.
//
// ============================================================================

use super::{TransactionId, TransactionState};
use crate::core::{CrudError, IsolationLevel, Result};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

tokio::task_local! {
    static AMBIENT: AmbientTransaction;
}

/// A resource manager taking part in an ambient transaction.
pub trait Enlistment: Send + Sync {
    /// Identity used to enlist a participant at most once per scope.
    fn enlistment_id(&self) -> usize;

    /// Makes the work staged under `transaction` durable.
    fn commit(&self, transaction: TransactionId, isolation_level: IsolationLevel) -> Result<()>;

    /// Discards the work staged under `transaction`.
    fn rollback(&self, transaction: TransactionId);
}

struct ScopeInner {
    id: TransactionId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    participants: Mutex<Vec<Arc<dyn Enlistment>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared view of the scope that is ambient for the current task.
#[derive(Clone)]
pub struct AmbientTransaction {
    inner: Arc<ScopeInner>,
}

impl AmbientTransaction {
    /// The transaction ambient for the code currently being polled, if any.
    pub fn current() -> Option<Self> {
        AMBIENT.try_with(|ambient| ambient.clone()).ok()
    }

    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.inner.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *lock(&self.inner.state)
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Registers a participant to be committed or rolled back with the scope.
    pub fn enlist(&self, participant: Arc<dyn Enlistment>) -> Result<()> {
        let state = self.state();
        if !state.is_active() {
            return Err(CrudError::Transaction(format!(
                "Cannot enlist in transaction {}: scope is {}",
                self.inner.id, state
            )));
        }

        let mut participants = lock(&self.inner.participants);
        let id = participant.enlistment_id();
        if !participants.iter().any(|p| p.enlistment_id() == id) {
            participants.push(participant);
        }
        Ok(())
    }

    pub fn participant_count(&self) -> usize {
        lock(&self.inner.participants).len()
    }
}

/// Owner of one transaction for its whole lifetime.
///
/// Dropping the scope without calling [`TransactionScope::complete`] rolls
/// back every enlisted participant.
pub struct TransactionScope {
    ambient: AmbientTransaction,
    finished: bool,
}

impl TransactionScope {
    pub fn begin(isolation_level: IsolationLevel) -> Self {
        let id = TransactionId::next();
        Self {
            ambient: AmbientTransaction {
                inner: Arc::new(ScopeInner {
                    id,
                    isolation_level,
                    state: Mutex::new(TransactionState::Active),
                    participants: Mutex::new(Vec::new()),
                }),
            },
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.ambient.id()
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.ambient.isolation_level()
    }

    pub fn state(&self) -> TransactionState {
        self.ambient.state()
    }

    pub fn ambient(&self) -> &AmbientTransaction {
        &self.ambient
    }

    /// Polls `future` with this scope as the ambient transaction.
    pub async fn run<F: Future>(&self, future: F) -> F::Output {
        AMBIENT.scope(self.ambient.clone(), future).await
    }

    /// Marks the scope complete and commits every participant.
    ///
    /// Participants commit in enlistment order. If one fails, the ones not yet
    /// committed are rolled back and the failure is returned; participants
    /// that already committed stay committed.
    pub fn complete(mut self) -> Result<()> {
        self.finished = true;
        let id = self.id();
        let isolation_level = self.isolation_level();
        let participants = std::mem::take(&mut *lock(&self.ambient.inner.participants));

        for (index, participant) in participants.iter().enumerate() {
            if let Err(err) = participant.commit(id, isolation_level) {
                for pending in &participants[index + 1..] {
                    pending.rollback(id);
                }
                *lock(&self.ambient.inner.state) = TransactionState::Aborted;
                return Err(err);
            }
        }

        *lock(&self.ambient.inner.state) = TransactionState::Committed;
        Ok(())
    }

    /// Ends the scope, discarding all staged work.
    pub fn rollback(mut self) {
        self.finished = true;
        self.abort();
    }

    fn abort(&self) {
        let id = self.id();
        let participants = std::mem::take(&mut *lock(&self.ambient.inner.participants));
        for participant in &participants {
            participant.rollback(id);
        }
        *lock(&self.ambient.inner.state) = TransactionState::Aborted;
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if !self.finished {
            self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingParticipant {
        id: usize,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        fail_commit: bool,
    }

    impl Enlistment for CountingParticipant {
        fn enlistment_id(&self) -> usize {
            self.id
        }

        fn commit(&self, _transaction: TransactionId, _level: IsolationLevel) -> Result<()> {
            if self.fail_commit {
                return Err(CrudError::ConcurrencyConflict("commit rejected".into()));
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn rollback(&self, _transaction: TransactionId) {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_no_ambient_outside_scope() {
        assert!(AmbientTransaction::current().is_none());
    }

    #[tokio::test]
    async fn test_run_exposes_ambient_transaction() {
        let scope = TransactionScope::begin(IsolationLevel::Serializable);
        let seen = scope
            .run(async { AmbientTransaction::current().map(|t| (t.id(), t.isolation_level())) })
            .await;
        assert_eq!(seen, Some((scope.id(), IsolationLevel::Serializable)));
        assert!(AmbientTransaction::current().is_none());
    }

    #[tokio::test]
    async fn test_complete_commits_each_participant_once() {
        let participant = Arc::new(CountingParticipant {
            id: 7,
            ..Default::default()
        });
        let scope = TransactionScope::begin(IsolationLevel::ReadCommitted);
        let ambient = scope.ambient().clone();

        ambient.enlist(participant.clone()).unwrap();
        ambient.enlist(participant.clone()).unwrap();
        assert_eq!(ambient.participant_count(), 1);

        scope.complete().unwrap();
        assert_eq!(participant.commits.load(Ordering::SeqCst), 1);
        assert_eq!(participant.rollbacks.load(Ordering::SeqCst), 0);
        assert_eq!(ambient.state(), TransactionState::Committed);
    }

    #[test]
    fn test_drop_without_complete_rolls_back() {
        let participant = Arc::new(CountingParticipant {
            id: 1,
            ..Default::default()
        });
        let ambient = {
            let scope = TransactionScope::begin(IsolationLevel::default());
            scope.ambient().enlist(participant.clone()).unwrap();
            scope.ambient().clone()
        };

        assert_eq!(participant.commits.load(Ordering::SeqCst), 0);
        assert_eq!(participant.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(ambient.state(), TransactionState::Aborted);
        assert!(ambient.enlist(participant).is_err());
    }

    #[test]
    fn test_failed_commit_rolls_back_remaining_participants() {
        let failing = Arc::new(CountingParticipant {
            id: 1,
            fail_commit: true,
            ..Default::default()
        });
        let trailing = Arc::new(CountingParticipant {
            id: 2,
            ..Default::default()
        });

        let scope = TransactionScope::begin(IsolationLevel::default());
        scope.ambient().enlist(failing.clone()).unwrap();
        scope.ambient().enlist(trailing.clone()).unwrap();

        let err = scope.complete().unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(trailing.commits.load(Ordering::SeqCst), 0);
        assert_eq!(trailing.rollbacks.load(Ordering::SeqCst), 1);
    }
}
