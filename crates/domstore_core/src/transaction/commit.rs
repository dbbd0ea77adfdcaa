//! Commit and rollback.
//!
//! Both run in phases:
//!
//! 1. Notification rounds. The first round reports every object with
//!    uncommitted changes; each further round reports only objects that
//!    joined the set because of listener activity in the previous round.
//!    Rounds stop at a fixed point, or fail once the configured round limit
//!    is exceeded.
//! 2. Validation (commit only). Listeners see the final set while the
//!    transaction is read-only.
//! 3. Persistence (commit only). A root transaction saves to the backend;
//!    a subtransaction pushes its changes into its parent.
//! 4. The in-memory state is committed or rolled back, then the
//!    `committed` / `rolled_back` hooks run.

use super::{ClientTransaction, Phase};
use crate::data::{DataContainer, Lifecycle};
use crate::error::{CoreError, CoreResult};
use crate::object::DomainObject;
use crate::relations::{EndPointValue, RelationEndPoint};
use crate::types::EndPointId;
use domstore_storage::{ObjectKey, RecordChange};
use std::collections::HashSet;
use tracing::{debug, trace, warn};

impl ClientTransaction {
    /// Keys of objects with uncommitted changes.
    fn commit_keys(&self) -> Vec<ObjectKey> {
        self.lock().commit_set()
    }

    /// Runs notification rounds until no new object joins the commit set.
    fn notify_until_stable(
        &self,
        phase: &'static str,
        mut notify: impl FnMut(&[DomainObject]) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let limit = self.config().notification_round_limit.max(1);
        let mut notified: HashSet<ObjectKey> = HashSet::new();
        let mut round = 0;
        loop {
            let pending: Vec<ObjectKey> = self
                .commit_keys()
                .into_iter()
                .filter(|k| !notified.contains(k))
                .collect();
            if round > 0 && pending.is_empty() {
                return Ok(());
            }
            if round >= limit {
                return Err(CoreError::NotificationLimitExceeded { phase, rounds: round });
            }
            round += 1;
            if round > 1 && round + 1 >= limit {
                warn!(transaction = %self.id(), phase, round, limit, "notification rounds approaching limit");
            }
            trace!(transaction = %self.id(), phase, round, objects = pending.len(), "notification round");

            let objects = self.references(&pending)?;
            notify(&objects)?;
            notified.extend(pending);
        }
    }

    /// Commits all changes.
    ///
    /// A root transaction saves the changes to the backend in one call
    /// (and makes no backend call if nothing changed). A subtransaction
    /// pushes its changes into its parent, which stays uncommitted.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotificationLimitExceeded`] if committing listeners keep adding objects
    /// - any error a `committing` or `commit_validate` listener returns
    /// - [`CoreError::ConcurrencyViolation`] or a storage error from the backend;
    ///   the in-memory state is then left unchanged
    pub fn commit(&self) -> CoreResult<()> {
        self.ensure_writable()?;
        let _scope = self.enter_non_discarding_scope();
        debug!(transaction = %self.id(), "commit started");

        self.notify_until_stable("committing", |objects| {
            self.extensions()
                .try_notify(|l| l.committing(self, objects))?;
            for object in objects {
                for listener in object.listeners() {
                    listener.committing(self, object)?;
                }
            }
            Ok(())
        })?;

        let keys = self.commit_keys();
        let objects = self.references(&keys)?;

        self.set_phase(Phase::Validating);
        let validated = self
            .extensions()
            .try_notify(|l| l.commit_validate(self, &objects));
        self.set_phase(Phase::Idle);
        validated?;

        if let Err(error) = self.persist(&keys) {
            warn!(transaction = %self.id(), %error, "commit failed");
            self.extensions()
                .notify(|l| l.commit_failed(self, &objects, &error));
            return Err(error);
        }

        self.commit_in_memory(&keys);

        for object in &objects {
            for listener in object.listeners() {
                listener.committed(self, object);
            }
        }
        self.extensions().notify(|l| l.committed(self, &objects));
        debug!(transaction = %self.id(), objects = objects.len(), "commit finished");
        Ok(())
    }

    fn persist(&self, keys: &[ObjectKey]) -> CoreResult<()> {
        match self.parent() {
            None => self.save_to_backend(keys),
            Some(parent) => parent.receive_from_sub(self, keys),
        }
    }

    fn save_to_backend(&self, keys: &[ObjectKey]) -> CoreResult<()> {
        let changes: Vec<RecordChange> = {
            let state = self.lock();
            keys.iter()
                .filter_map(|k| state.data.get(k).and_then(DataContainer::record_change))
                .collect()
        };
        if changes.is_empty() {
            return Ok(());
        }

        self.backend().save(&changes)?;
        debug!(transaction = %self.id(), changes = changes.len(), "changes saved");

        let refresh: Vec<ObjectKey> = changes
            .iter()
            .filter(|c| !matches!(c, RecordChange::Delete { .. }))
            .map(|c| c.key().clone())
            .collect();
        if refresh.is_empty() {
            return Ok(());
        }
        match self.backend().refresh_lock_tokens(&refresh) {
            Ok(tokens) => {
                let mut state = self.lock();
                for (key, token) in tokens {
                    if let Some(container) = state.data.get_mut(&key) {
                        container.set_lock_token(token);
                    }
                }
            }
            Err(error) => {
                warn!(transaction = %self.id(), %error, "saved changes but could not refresh lock tokens");
            }
        }
        Ok(())
    }

    /// Applies the committed changes of `sub` to this transaction.
    fn receive_from_sub(&self, sub: &ClientTransaction, keys: &[ObjectKey]) -> CoreResult<()> {
        let (containers, end_points) = {
            let state = sub.lock();
            let containers: Vec<(DataContainer, Option<DomainObject>)> = keys
                .iter()
                .filter_map(|k| {
                    state
                        .data
                        .get(k)
                        .map(|c| (c.clone(), state.identity.lookup(k).cloned()))
                })
                .collect();
            let end_points: Vec<RelationEndPoint> = state.relations.changed().cloned().collect();
            (containers, end_points)
        };

        let mut guard = self.lock();
        let state = &mut *guard;
        let mut definitions = Vec::with_capacity(containers.len());
        for (container, object) in &containers {
            let definition = if container.lifecycle() == Lifecycle::New {
                if let Some(object) = object {
                    state.identity.check_enlist(object, self.id())?;
                }
                Some(self.mapping().class(container.key().class())?)
            } else {
                None
            };
            definitions.push(definition);
        }

        for ((container, object), definition) in containers.into_iter().zip(definitions) {
            let key = container.key().clone();
            match (container.lifecycle(), definition) {
                (Lifecycle::New, Some(definition)) => {
                    if let Some(object) = &object {
                        state.identity.insert_checked(object);
                    }
                    state
                        .data
                        .insert(DataContainer::new_object(key.clone(), container.current_values().clone()));
                    for relation in definition.relations() {
                        state.relations.register(RelationEndPoint::new(
                            EndPointId::new(key.clone(), relation.property()),
                            relation.is_real(),
                            EndPointValue::empty(relation.cardinality()),
                        ));
                    }
                }
                (Lifecycle::New, None) => {}
                (Lifecycle::Existing, _) => match state.data.get_mut(&key) {
                    Some(target) => target.replace_current(container.current_values().clone()),
                    None => warn!(transaction = %self.id(), key = %key, "subtransaction committed an object unknown to its parent"),
                },
                (Lifecycle::Deleted, _) => {
                    let parent_new = state.data.get(&key).map(DataContainer::is_new);
                    match parent_new {
                        Some(true) => {
                            state.data.remove(&key);
                            state.relations.remove_owned_by(&key);
                            state.identity.mark_invalid(key.clone());
                        }
                        Some(false) => {
                            if let Some(target) = state.data.get_mut(&key) {
                                target.mark_deleted();
                            }
                        }
                        None => {}
                    }
                }
            }
        }

        for end_point in end_points {
            let id = end_point.id();
            if state.identity.is_invalid(&id.key) {
                continue;
            }
            match state.relations.get_mut(id) {
                Some(target) => target.set_current(end_point.current().clone()),
                None => trace!(end_point = %id, "parent has no such end-point; derived on demand"),
            }
        }
        debug!(transaction = %self.id(), sub = %sub.id(), objects = keys.len(), "subtransaction changes received");
        Ok(())
    }

    fn commit_in_memory(&self, keys: &[ObjectKey]) {
        let mut guard = self.lock();
        let state = &mut *guard;
        for key in keys {
            let deleted = state.data.get(key).is_some_and(DataContainer::is_deleted);
            if deleted {
                state.data.remove(key);
                state.relations.remove_owned_by(key);
                state.identity.mark_invalid(key.clone());
            } else if let Some(container) = state.data.get_mut(key) {
                container.commit();
            }
        }
        state.relations.commit_all();
    }

    /// Discards all uncommitted changes.
    ///
    /// New objects become invalid; changed and deleted objects return to
    /// their original values.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotificationLimitExceeded`] if rolling-back listeners keep adding objects
    /// - any error a `rolling_back` listener returns; nothing is rolled back then
    pub fn rollback(&self) -> CoreResult<()> {
        self.ensure_writable()?;
        let _scope = self.enter_non_discarding_scope();
        debug!(transaction = %self.id(), "rollback started");

        self.notify_until_stable("rolling back", |objects| {
            self.extensions()
                .try_notify(|l| l.rolling_back(self, objects))?;
            for object in objects {
                for listener in object.listeners() {
                    listener.rolling_back(self, object)?;
                }
            }
            Ok(())
        })?;

        let keys = self.commit_keys();
        let objects = self.references(&keys)?;
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            for key in &keys {
                let is_new = state.data.get(key).is_some_and(DataContainer::is_new);
                if is_new {
                    state.data.remove(key);
                    state.relations.remove_owned_by(key);
                    state.identity.mark_invalid(key.clone());
                }
            }
            state.data.for_each_mut(DataContainer::rollback);
            state.relations.rollback_all();
        }

        for object in &objects {
            for listener in object.listeners() {
                listener.rolled_back(self, object);
            }
        }
        self.extensions().notify(|l| l.rolled_back(self, &objects));
        debug!(transaction = %self.id(), objects = objects.len(), "rollback finished");
        Ok(())
    }
}
