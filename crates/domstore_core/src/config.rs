//! Engine configuration.

/// Configuration for an [`crate::ObjectStore`] and the transactions it creates.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of committing / rolling-back notification rounds.
    ///
    /// Each round notifies listeners of the objects that joined the commit
    /// set during the previous round. An operation whose listeners keep
    /// adding objects beyond this many rounds fails with
    /// [`crate::CoreError::NotificationLimitExceeded`].
    pub notification_round_limit: usize,

    /// Whether `set_value` rejects values whose kind does not match the
    /// mapped property kind.
    pub validate_property_types: bool,

    /// Store id of the in-memory backend created by
    /// [`crate::ObjectStore::open_in_memory`].
    pub store_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            notification_round_limit: 32,
            validate_property_types: true,
            store_id: "default".to_owned(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the notification round limit.
    ///
    /// A limit of zero is treated as one: the first round always runs.
    #[must_use]
    pub const fn notification_round_limit(mut self, limit: usize) -> Self {
        self.notification_round_limit = if limit == 0 { 1 } else { limit };
        self
    }

    /// Sets whether property values are type-checked.
    #[must_use]
    pub const fn validate_property_types(mut self, value: bool) -> Self {
        self.validate_property_types = value;
        self
    }

    /// Sets the store id used by in-memory stores.
    #[must_use]
    pub fn store_id(mut self, id: impl Into<String>) -> Self {
        self.store_id = id.into();
        self
    }
}
