use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::kinds::EventKind;

/// Core event structure for the session broker
///
/// Immutable once published. The payload is an arbitrary structured JSON
/// value; the broker never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique id (`evt_<millis>_<random>`), generated when absent on the wire
    #[serde(default = "Event::new_id")]
    pub id: String,

    /// Event kind (one of the closed catalog)
    pub kind: EventKind,

    /// Collaboration session this event belongs to
    pub session_id: String,

    /// Participant (human or agent) that produced the event
    pub participant_id: String,

    /// RFC 3339 on the wire; epoch milliseconds are accepted on input
    #[serde(with = "wire_timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Event-specific data
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Create a new event stamped with the current time
    pub fn new(
        kind: EventKind,
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Self::new_id(),
            kind,
            session_id: session_id.into(),
            participant_id: participant_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Override the timestamp (replays, tests)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Generate an event id from the current time plus a random suffix
    pub fn new_id() -> String {
        prefixed_id("evt")
    }
}

/// `<prefix>_<unix millis>_<9 random hex chars>`
pub(crate) fn prefixed_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), &suffix[..9])
}

/// Diagnostic notices emitted by the broker
///
/// These travel on a broadcast channel separate from event delivery and are
/// meant for debugging and metrics collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerNotice {
    /// A subscription handler returned an error or panicked
    SubscriptionFailed {
        subscription_id: String,
        session_id: String,
        event_id: String,
        error: String,
    },

    /// An event passed the filter and was fanned out
    EventPublished {
        event_id: String,
        session_id: String,
        kind: EventKind,
        timestamp: DateTime<Utc>,
    },

    /// All data for a session was discarded
    SessionCleanedUp { session_id: String },
}

/// Outcome of a single `publish`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// The session filter dropped the event; nothing was notified
    pub dropped: bool,
    /// Subscription handlers that completed successfully
    pub delivered: usize,
    /// Subscription handlers that failed (reported as notices)
    pub failed: usize,
}

impl DispatchReport {
    pub fn dropped() -> Self {
        Self {
            dropped: true,
            ..Self::default()
        }
    }
}

mod wire_timestamp {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireTimestamp {
        Rfc3339(DateTime<Utc>),
        EpochMillis(i64),
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match WireTimestamp::deserialize(d)? {
            WireTimestamp::Rfc3339(ts) => Ok(ts),
            WireTimestamp::EpochMillis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| D::Error::custom(format!("epoch millis out of range: {ms}"))),
        }
    }
}
