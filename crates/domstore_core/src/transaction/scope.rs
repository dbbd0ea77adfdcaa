//! Thread-local transaction scopes.
//!
//! Entering a scope makes a transaction the thread's current transaction
//! (see [`ClientTransaction::current`]) until the scope is left. Scopes
//! nest; leaving one restores the transaction that was current before.

use super::ClientTransaction;
use crate::error::{CoreError, CoreResult};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// What happens to a scope's transaction when the scope is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoRollbackBehavior {
    /// Leave the transaction as it is.
    #[default]
    None,
    /// Roll back uncommitted changes.
    Rollback,
    /// Discard the transaction.
    Discard,
}

struct ScopeFrame {
    id: u64,
    transaction: ClientTransaction,
}

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SCOPES: RefCell<Vec<ScopeFrame>> = const { RefCell::new(Vec::new()) };
}

/// An entered transaction scope.
///
/// Dropping the scope leaves it. Use [`TransactionScope::leave`] to observe
/// errors. Scopes are bound to the thread that entered them.
#[must_use = "the scope is left as soon as it is dropped"]
pub struct TransactionScope {
    id: u64,
    transaction: ClientTransaction,
    behavior: AutoRollbackBehavior,
    left: bool,
    _not_send: PhantomData<*const ()>,
}

impl TransactionScope {
    fn enter(transaction: ClientTransaction, behavior: AutoRollbackBehavior) -> Self {
        let id = NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed);
        let frame = ScopeFrame {
            id,
            transaction: transaction.clone(),
        };
        let pushed = SCOPES
            .try_with(|scopes| match scopes.try_borrow_mut() {
                Ok(mut scopes) => {
                    scopes.push(frame);
                    true
                }
                Err(_) => false,
            })
            .unwrap_or(false);
        if !pushed {
            warn!(transaction = %transaction.id(), "scope stack unavailable; scope not entered");
        }
        Self {
            id,
            transaction,
            behavior,
            left: false,
            _not_send: PhantomData,
        }
    }

    /// The scoped transaction.
    #[must_use]
    pub fn transaction(&self) -> &ClientTransaction {
        &self.transaction
    }

    /// What happens to the transaction when the scope is left.
    #[must_use]
    pub fn behavior(&self) -> AutoRollbackBehavior {
        self.behavior
    }

    /// Changes what happens to the transaction when the scope is left.
    pub fn set_behavior(&mut self, behavior: AutoRollbackBehavior) {
        self.behavior = behavior;
    }

    /// Leaves the scope.
    ///
    /// # Errors
    ///
    /// [`CoreError::ScopeMismatch`] if an inner scope is still active; the
    /// scope is removed anyway. Errors of an automatic rollback are
    /// returned as well.
    pub fn leave(mut self) -> CoreResult<()> {
        self.left = true;
        self.exit()
    }

    fn exit(&self) -> CoreResult<()> {
        let was_innermost = SCOPES
            .try_with(|scopes| {
                let Ok(mut scopes) = scopes.try_borrow_mut() else {
                    return false;
                };
                match scopes.iter().rposition(|f| f.id == self.id) {
                    Some(position) => {
                        let innermost = position + 1 == scopes.len();
                        scopes.remove(position);
                        innermost
                    }
                    None => false,
                }
            })
            .unwrap_or(false);

        let outcome = match self.behavior {
            AutoRollbackBehavior::None => Ok(()),
            AutoRollbackBehavior::Rollback => {
                let tx = &self.transaction;
                if !tx.is_discarded() && tx.is_active() && tx.has_changed() {
                    tx.rollback()
                } else {
                    Ok(())
                }
            }
            AutoRollbackBehavior::Discard => {
                self.transaction.discard();
                Ok(())
            }
        };

        if !was_innermost {
            warn!(transaction = %self.transaction.id(), "scope left while not innermost");
            return Err(CoreError::ScopeMismatch(self.transaction.id()));
        }
        outcome
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.left {
            return;
        }
        if let Err(error) = self.exit() {
            warn!(transaction = %self.transaction.id(), %error, "error leaving transaction scope");
        }
    }
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("transaction", &self.transaction.id())
            .field("behavior", &self.behavior)
            .finish()
    }
}

impl ClientTransaction {
    /// Returns the transaction of the thread's innermost scope.
    #[must_use]
    pub fn current() -> Option<ClientTransaction> {
        SCOPES
            .try_with(|scopes| {
                scopes
                    .try_borrow()
                    .ok()
                    .and_then(|s| s.last().map(|f| f.transaction.clone()))
            })
            .ok()
            .flatten()
    }

    /// Returns true if this transaction is the thread's current transaction.
    #[must_use]
    pub fn is_current(&self) -> bool {
        Self::current().is_some_and(|c| c.ptr_eq(self))
    }

    /// Makes this transaction current until the returned scope is left.
    pub fn enter_scope(&self, behavior: AutoRollbackBehavior) -> TransactionScope {
        TransactionScope::enter(self.clone(), behavior)
    }

    /// Enters a scope that discards the transaction when left.
    pub fn enter_discarding_scope(&self) -> TransactionScope {
        self.enter_scope(AutoRollbackBehavior::Discard)
    }

    /// Enters a scope that leaves the transaction untouched when left.
    pub fn enter_non_discarding_scope(&self) -> TransactionScope {
        self.enter_scope(AutoRollbackBehavior::None)
    }
}
