//! Parent/subtransaction hierarchy.

use super::{ClientTransaction, TransactionKind};
use crate::error::{CoreError, CoreResult};
use tracing::debug;

/// Creates subtransactions.
///
/// Custom factories let callers wrap or decorate subtransactions. A factory
/// must create the transaction with [`ClientTransaction::construct_sub`]
/// so it reports the requesting transaction as its parent.
pub trait SubTransactionFactory {
    /// Creates a subtransaction of `parent`. The parent is already inactive.
    ///
    /// # Errors
    ///
    /// Any error aborts the creation; the parent is reactivated.
    fn create_sub(&self, parent: &ClientTransaction) -> CoreResult<ClientTransaction>;
}

/// The factory used by [`ClientTransaction::create_sub_transaction`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSubTransactionFactory;

impl SubTransactionFactory for DefaultSubTransactionFactory {
    fn create_sub(&self, parent: &ClientTransaction) -> CoreResult<ClientTransaction> {
        ClientTransaction::construct_sub(parent)
    }
}

impl ClientTransaction {
    /// Opens a subtransaction. This transaction stays inactive (read-only)
    /// until the subtransaction is discarded.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::create_sub_transaction_with`].
    pub fn create_sub_transaction(&self) -> CoreResult<ClientTransaction> {
        self.create_sub_transaction_with(&DefaultSubTransactionFactory)
    }

    /// Opens a subtransaction created by `factory`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TransactionDiscarded`] / [`CoreError::TransactionInactive`]
    /// - [`CoreError::BindingSubtransaction`] for binding transactions
    /// - [`CoreError::ParentMismatch`] if the factory returns a transaction
    ///   with another parent
    /// - any error from the factory or a cancelling listener; this
    ///   transaction is then active again
    pub fn create_sub_transaction_with(&self, factory: &dyn SubTransactionFactory) -> CoreResult<ClientTransaction> {
        if self.is_binding() {
            return Err(CoreError::BindingSubtransaction(self.id()));
        }
        self.ensure_writable()?;
        self.extensions()
            .try_notify(|l| l.subtransaction_creating(self))?;

        self.lock().is_active = false;
        let sub = match factory.create_sub(self) {
            Ok(sub) => sub,
            Err(error) => {
                self.lock().is_active = true;
                return Err(error);
            }
        };

        if !sub.parent().is_some_and(|p| p.ptr_eq(self)) {
            self.lock().is_active = true;
            sub.lock().is_discarded = true;
            return Err(CoreError::ParentMismatch {
                expected: self.id(),
                actual: sub.parent().map(ClientTransaction::id),
            });
        }

        if let Err(error) = self
            .extensions()
            .try_notify(|l| l.subtransaction_initialize(self, &sub))
        {
            sub.lock().is_discarded = true;
            self.lock().is_active = true;
            return Err(error);
        }

        self.lock().sub = Some(sub.downgrade());
        self.extensions()
            .notify(|l| l.subtransaction_created(self, &sub));
        debug!(transaction = %self.id(), sub = %sub.id(), "subtransaction created");
        Ok(sub)
    }

    /// Constructs a subtransaction of `parent` without linking it.
    ///
    /// Intended for [`SubTransactionFactory`] implementations; use
    /// [`ClientTransaction::create_sub_transaction`] otherwise.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidOperation`] if `parent` is still active.
    pub fn construct_sub(parent: &ClientTransaction) -> CoreResult<ClientTransaction> {
        if parent.is_active() {
            return Err(CoreError::invalid_operation(
                "subtransactions can only be constructed by create_sub_transaction",
            ));
        }
        Ok(Self::new_transaction(
            parent.context().clone(),
            TransactionKind::Sub,
            Some(parent.clone()),
        ))
    }

    /// Returns the open subtransaction.
    #[must_use]
    pub fn sub_transaction(&self) -> Option<ClientTransaction> {
        let sub = self.lock().sub.clone()?;
        Self::upgrade(&sub)
    }

    /// Returns the root of the hierarchy.
    #[must_use]
    pub fn root(&self) -> ClientTransaction {
        let mut tx = self.clone();
        while let Some(parent) = tx.parent().cloned() {
            tx = parent;
        }
        tx
    }

    /// Returns the innermost transaction of the hierarchy below this one,
    /// which is the only active one.
    #[must_use]
    pub fn leaf(&self) -> ClientTransaction {
        let mut tx = self.clone();
        while let Some(sub) = tx.sub_transaction() {
            tx = sub;
        }
        tx
    }

    /// Parent, grandparent, and so on up to the root.
    pub(crate) fn ancestors(&self) -> Vec<ClientTransaction> {
        let mut ancestors = Vec::new();
        let mut next = self.parent().cloned();
        while let Some(tx) = next {
            next = tx.parent().cloned();
            ancestors.push(tx);
        }
        ancestors
    }

    /// Discards the transaction and, first, any open subtransaction.
    ///
    /// A discarded transaction rejects every further operation. Discarding
    /// a subtransaction reactivates its parent without committing anything.
    /// Discarding twice does nothing.
    pub fn discard(&self) {
        if self.is_discarded() {
            return;
        }
        if let Some(sub) = self.sub_transaction() {
            sub.discard();
        }
        self.extensions()
            .notify(|l| l.transaction_discard(self));
        {
            let mut state = self.lock();
            state.is_discarded = true;
            state.sub = None;
        }
        if let Some(parent) = self.parent() {
            let mut state = parent.lock();
            let linked = state
                .sub
                .as_ref()
                .is_some_and(|sub| std::ptr::eq(sub.as_ptr(), std::sync::Arc::as_ptr(&self.0)));
            if linked {
                state.sub = None;
                state.is_active = true;
            }
        }
        debug!(transaction = %self.id(), "transaction discarded");
    }
}
