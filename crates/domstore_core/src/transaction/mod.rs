//! Client transactions.
//!
//! A [`ClientTransaction`] is a unit of work over the objects of one
//! [`crate::ObjectStore`]. It owns an identity map, the data containers of
//! the objects it has loaded or created, and the relation end-points it has
//! completed. Changes stay in memory until [`ClientTransaction::commit`].
//!
//! ## Hierarchy
//!
//! A transaction may open one subtransaction at a time. While the
//! subtransaction is open its parent is inactive (read-only); the
//! subtransaction reads through its parent and commits into it.
//!
//! ## Re-entrancy
//!
//! Listeners, object factories and the persistence backend are always
//! called without any internal lock held, so they may call back into the
//! transaction.

mod commit;
mod hierarchy;
mod loading;
mod objects;
mod properties;
mod relations;
mod scope;
mod source;

pub use hierarchy::{DefaultSubTransactionFactory, SubTransactionFactory};
pub use scope::{AutoRollbackBehavior, TransactionScope};

use crate::config::Config;
use crate::data::DataContainerStore;
use crate::error::{CoreError, CoreResult};
use crate::extension::ExtensionBroadcaster;
use crate::identity::IdentityRegistry;
use crate::mapping::MappingConfiguration;
use crate::object::DomainObject;
use crate::relations::RelationEndPointRegistry;
use crate::store::StoreContext;
use crate::types::{ObjectState, TransactionId};
use domstore_storage::ObjectKey;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// The kind of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// A top-level transaction reading from and saving to the backend.
    Root,
    /// A top-level transaction that permanently binds its objects and
    /// cannot open subtransactions.
    Binding,
    /// A subtransaction of another transaction.
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Validating,
}

pub(crate) struct TxState {
    pub(crate) is_active: bool,
    pub(crate) is_discarded: bool,
    pub(crate) sub: Option<Weak<TxInner>>,
    pub(crate) phase: Phase,
    pub(crate) identity: IdentityRegistry,
    pub(crate) data: DataContainerStore,
    pub(crate) relations: RelationEndPointRegistry,
}

impl TxState {
    fn new() -> Self {
        Self {
            is_active: true,
            is_discarded: false,
            sub: None,
            phase: Phase::Idle,
            identity: IdentityRegistry::new(),
            data: DataContainerStore::new(),
            relations: RelationEndPointRegistry::new(),
        }
    }

    pub(crate) fn object_state(&self, key: &ObjectKey) -> ObjectState {
        if self.identity.is_invalid(key) {
            return ObjectState::Invalid;
        }
        match self.data.get(key) {
            None => ObjectState::NotLoadedYet,
            Some(container) => match container.state() {
                ObjectState::Unchanged if self.relations.has_changes_for(key) => ObjectState::Changed,
                state => state,
            },
        }
    }

    /// Keys with a non-unchanged state, in container registration order.
    pub(crate) fn commit_set(&self) -> Vec<ObjectKey> {
        let relation_owners: HashSet<&ObjectKey> =
            self.relations.changed().map(|e| &e.id().key).collect();
        self.data
            .ordered()
            .into_iter()
            .filter(|c| c.state() != ObjectState::Unchanged || relation_owners.contains(c.key()))
            .map(|c| c.key().clone())
            .collect()
    }
}

pub(crate) struct TxInner {
    id: TransactionId,
    kind: TransactionKind,
    parent: Option<ClientTransaction>,
    context: Arc<StoreContext>,
    state: Mutex<TxState>,
    extensions: ExtensionBroadcaster,
}

impl Drop for TxInner {
    fn drop(&mut self) {
        let Some(parent) = &self.parent else {
            return;
        };
        if self.state.get_mut().is_discarded {
            return;
        }
        let this: *const TxInner = self;
        let mut parent_state = parent.0.state.lock();
        let linked = parent_state
            .sub
            .as_ref()
            .is_some_and(|sub| std::ptr::eq(sub.as_ptr(), this));
        if linked {
            parent_state.sub = None;
            parent_state.is_active = true;
            warn!(
                transaction = %self.id,
                parent = %parent.0.id,
                "subtransaction dropped without discard; parent reactivated"
            );
        }
    }
}

/// Handle to a transaction. Cloning is cheap; all clones refer to the same
/// transaction.
#[derive(Clone)]
pub struct ClientTransaction(Arc<TxInner>);

impl ClientTransaction {
    pub(crate) fn new_transaction(
        context: Arc<StoreContext>,
        kind: TransactionKind,
        parent: Option<ClientTransaction>,
    ) -> Self {
        let id = context.next_transaction_id();
        let tx = Self(Arc::new(TxInner {
            id,
            kind,
            parent,
            context,
            state: Mutex::new(TxState::new()),
            extensions: ExtensionBroadcaster::new(),
        }));

        for factory in &tx.0.context.listener_factories {
            for listener in factory.create_listeners(&tx) {
                if let Err(error) = tx.0.extensions.add(listener) {
                    warn!(transaction = %id, %error, "listener factory produced a duplicate listener");
                }
            }
        }
        tx.0.extensions.notify(|l| l.transaction_initialize(&tx));
        debug!(transaction = %id, kind = ?kind, "transaction created");
        tx
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.0.id
    }

    /// Returns the transaction kind.
    #[must_use]
    pub fn kind(&self) -> TransactionKind {
        self.0.kind
    }

    /// Returns true for binding transactions.
    #[must_use]
    pub fn is_binding(&self) -> bool {
        self.0.kind == TransactionKind::Binding
    }

    /// Returns false while a subtransaction is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().is_active
    }

    /// Returns true once the transaction has been discarded.
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.lock().is_discarded
    }

    /// Returns the parent of a subtransaction.
    #[must_use]
    pub fn parent(&self) -> Option<&ClientTransaction> {
        self.0.parent.as_ref()
    }

    /// Returns the transaction's listeners.
    #[must_use]
    pub fn extensions(&self) -> &ExtensionBroadcaster {
        &self.0.extensions
    }

    /// Returns the mapping of the store.
    #[must_use]
    pub fn mapping(&self) -> &MappingConfiguration {
        &self.0.context.mapping
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.0.context.config
    }

    /// Returns true if both handles refer to the same transaction.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn context(&self) -> &Arc<StoreContext> {
        &self.0.context
    }

    pub(crate) fn downgrade(&self) -> Weak<TxInner> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<TxInner>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TxState> {
        self.0.state.lock()
    }

    /// Fails if the transaction was discarded.
    pub(crate) fn ensure_readable(&self) -> CoreResult<()> {
        if self.lock().is_discarded {
            return Err(CoreError::TransactionDiscarded(self.id()));
        }
        Ok(())
    }

    /// Fails unless the transaction may be modified.
    pub(crate) fn ensure_writable(&self) -> CoreResult<()> {
        let state = self.lock();
        if state.is_discarded {
            return Err(CoreError::TransactionDiscarded(self.id()));
        }
        if !state.is_active {
            return Err(CoreError::TransactionInactive(self.id()));
        }
        if state.phase == Phase::Validating {
            return Err(CoreError::ReadOnlyPhase(self.id()));
        }
        Ok(())
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.lock().phase = phase;
    }

    pub(crate) fn key_state(&self, key: &ObjectKey) -> ObjectState {
        self.lock().object_state(key)
    }

    pub(crate) fn references(&self, keys: &[ObjectKey]) -> CoreResult<Vec<DomainObject>> {
        keys.iter().map(|k| self.get_object_reference(k)).collect()
    }
}

impl PartialEq for ClientTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ClientTransaction {}

impl fmt::Debug for ClientTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ClientTransaction");
        debug
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .field("parent", &self.0.parent.as_ref().map(ClientTransaction::id));
        if let Some(state) = self.0.state.try_lock() {
            debug
                .field("is_active", &state.is_active)
                .field("is_discarded", &state.is_discarded)
                .field("objects", &state.identity.len());
        }
        debug.finish()
    }
}

impl fmt::Display for ClientTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.id, f)
    }
}
