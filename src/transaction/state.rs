// ============================================================================
// Transaction Identity & Lifecycle State
// ============================================================================
//
// State transitions of a transaction scope:
//
//   Active ──complete──> Committed
//     │
//     └──drop / rollback──> Aborted
//
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

static SCOPES_OPENED: AtomicU64 = AtomicU64::new(0);

/// Identity of one transaction scope, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn next() -> Self {
        TransactionId(SCOPES_OPENED.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Scope is open; enlisted stores hold staged work
    Active,

    /// Scope was marked complete and every enlisted store committed
    Committed,

    /// Scope ended without completing; staged work was discarded
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_ids_are_distinct() {
        let first = TransactionId::next();
        let second = TransactionId::next();
        assert_ne!(first, second);
        assert!(first.to_string().starts_with("scope#"));
    }

    #[test]
    fn test_state_classification() {
        assert!(TransactionState::Active.is_active());
        assert!(!TransactionState::Active.is_terminal());
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::Aborted.is_terminal());
    }
}
