//! Property access.

use super::ClientTransaction;
use crate::error::{CoreError, CoreResult};
use crate::mapping::PropertyDefinition;
use crate::object::DomainObject;
use crate::types::{ObjectState, ValueAccess};
use domstore_storage::Value;
use tracing::trace;

impl ClientTransaction {
    fn property_definition(&self, object: &DomainObject, property: &str) -> CoreResult<&PropertyDefinition> {
        let class = self.mapping().class(object.class_id())?;
        if let Some(definition) = class.property(property) {
            return Ok(definition);
        }
        if class.relation(property).is_some() {
            return Err(CoreError::invalid_operation(format!(
                "{}.{property} is a relation; use the relation accessors",
                object.class_id()
            )));
        }
        Err(CoreError::unknown_property(object.class_id(), property))
    }

    /// Loads the object and checks that its current values may be used.
    fn prepare_access(&self, object: &DomainObject, access: ValueAccess) -> CoreResult<()> {
        self.resolve(object)?;
        self.get_with_lazy_load(object.key(), true)?;
        if access == ValueAccess::Current && self.key_state(object.key()) == ObjectState::Deleted {
            return Err(CoreError::ObjectDeleted {
                key: object.key().clone(),
            });
        }
        Ok(())
    }

    fn read_value(&self, object: &DomainObject, property: &str, access: ValueAccess) -> CoreResult<Value> {
        self.property_definition(object, property)?;
        self.prepare_access(object, access)?;
        self.extensions()
            .try_notify(|l| l.property_value_reading(self, object, property, access))?;

        let value = self
            .lock()
            .data
            .get(object.key())
            .map(|c| c.value(property, access))
            .ok_or_else(|| CoreError::ObjectInvalid {
                key: object.key().clone(),
            })?;

        self.extensions()
            .notify(|l| l.property_value_read(self, object, property, &value, access));
        Ok(value)
    }

    /// Reads the current value of a property, loading the object if needed.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ObjectDeleted`] for deleted objects
    /// - [`CoreError::InvalidOperation`] for relation properties
    /// - [`CoreError::UnknownProperty`] for unmapped properties
    pub fn get_value(&self, object: &DomainObject, property: &str) -> CoreResult<Value> {
        self.read_value(object, property, ValueAccess::Current)
    }

    /// Reads the value a property had when loaded or last committed.
    /// Deleted objects may be read.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::get_value`].
    pub fn get_original_value(&self, object: &DomainObject, property: &str) -> CoreResult<Value> {
        self.read_value(object, property, ValueAccess::Original)
    }

    /// Writes a property value.
    ///
    /// Writing the current value again changes nothing and raises no
    /// events. Otherwise `property_value_changing` runs on transaction
    /// listeners, then object listeners, and may cancel; after the change
    /// `property_value_changed` runs in reverse order.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not writable, the object is deleted or
    /// invalid, the value does not fit the property, or a listener cancels.
    pub fn set_value(&self, object: &DomainObject, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.ensure_writable()?;
        let value = value.into();
        let definition = self.property_definition(object, property)?;
        if self.config().validate_property_types {
            definition.check(object.class_id(), &value)?;
        }
        self.prepare_access(object, ValueAccess::Current)?;

        let old = self
            .lock()
            .data
            .get(object.key())
            .map(|c| c.value(property, ValueAccess::Current))
            .ok_or_else(|| CoreError::ObjectInvalid {
                key: object.key().clone(),
            })?;
        if old == value {
            return Ok(());
        }

        self.extensions()
            .try_notify(|l| l.property_value_changing(self, object, property, &old, &value))?;
        for listener in object.listeners() {
            listener.property_changing(self, object, property, &old, &value)?;
        }

        {
            let mut state = self.lock();
            let container = state
                .data
                .get_mut(object.key())
                .ok_or_else(|| CoreError::ObjectInvalid {
                    key: object.key().clone(),
                })?;
            container.set_value(property, value.clone());
        }
        trace!(transaction = %self.id(), key = %object.key(), property, "property set");

        for listener in object.listeners() {
            listener.property_changed(self, object, property, &old, &value);
        }
        self.extensions()
            .notify(|l| l.property_value_changed(self, object, property, &old, &value));
        Ok(())
    }
}
