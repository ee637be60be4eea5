//! Event Record - immutable participation events

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of participation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Unit saw the variant.
    View,
    /// Unit clicked something in the variant.
    Click,
    /// Unit completed the goal action.
    Conversion,
    /// Application-defined event.
    Custom,
}

impl EventType {
    /// Get event type name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Click => "click",
            Self::Conversion => "conversion",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event Record represents one occurrence tied to a participant.
///
/// Events are append-only. `experiment_id` and `variant_id` are copied from
/// the participant at record time so aggregation never needs a join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    event_id: String,
    participant_id: String,
    experiment_id: String,
    variant_id: String,
    event_type: EventType,
    event_name: String,
    properties: serde_json::Value,
    occurred_at: DateTime<Utc>,
    ip_address: Option<IpAddr>,
    user_agent: Option<String>,
}

impl EventRecord {
    /// Create a builder for an event of `participant_id`.
    ///
    /// The experiment and variant are filled in by the recorder.
    #[must_use]
    pub fn builder(
        participant_id: impl Into<String>,
        event_type: EventType,
        event_name: impl Into<String>,
    ) -> EventRecordBuilder {
        EventRecordBuilder::new(participant_id, event_type, event_name)
    }

    /// Get the event ID.
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Get the participant ID.
    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the variant ID the participant was assigned.
    #[must_use]
    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    /// Get the event type.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Get the event name.
    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Get the free-form properties.
    #[must_use]
    pub const fn properties(&self) -> &serde_json::Value {
        &self.properties
    }

    /// Numeric property `key`, if present and a number.
    #[must_use]
    pub fn numeric_property(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(serde_json::Value::as_f64)
    }

    /// Get the occurrence timestamp.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Client IP address, if captured.
    #[must_use]
    pub const fn ip_address(&self) -> Option<IpAddr> {
        self.ip_address
    }

    /// Client user agent, if captured.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub(crate) fn bind(&mut self, experiment_id: &str, variant_id: &str) {
        self.experiment_id = experiment_id.to_string();
        self.variant_id = variant_id.to_string();
    }
}

/// Builder for `EventRecord`.
#[derive(Debug)]
pub struct EventRecordBuilder {
    participant_id: String,
    event_type: EventType,
    event_name: String,
    properties: serde_json::Value,
    occurred_at: DateTime<Utc>,
    ip_address: Option<IpAddr>,
    user_agent: Option<String>,
}

impl EventRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(
        participant_id: impl Into<String>,
        event_type: EventType,
        event_name: impl Into<String>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            event_type,
            event_name: event_name.into(),
            properties: serde_json::Value::Object(serde_json::Map::new()),
            occurred_at: Utc::now(),
            ip_address: None,
            user_agent: None,
        }
    }

    /// Set the event properties.
    #[must_use]
    pub fn properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }

    /// Set a custom occurrence timestamp.
    #[must_use]
    pub const fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Set the client IP address.
    #[must_use]
    pub const fn ip_address(mut self, ip: IpAddr) -> Self {
        self.ip_address = Some(ip);
        self
    }

    /// Set the client user agent.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Build the `EventRecord` with a fresh event ID.
    #[must_use]
    pub fn build(self) -> EventRecord {
        EventRecord {
            event_id: Uuid::new_v4().to_string(),
            participant_id: self.participant_id,
            experiment_id: String::new(),
            variant_id: String::new(),
            event_type: self.event_type,
            event_name: self.event_name,
            properties: self.properties,
            occurred_at: self.occurred_at,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
        }
    }
}
