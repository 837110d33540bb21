use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::kinds::EventKind;
use super::types::Event;

const SECS_PER_HOUR: f64 = 3_600.0;

/// Usage statistics computed from a session's retained history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub total_events: usize,
    /// Every kind of the catalog, zero when never seen
    pub events_by_kind: BTreeMap<EventKind, usize>,
    /// Only participants that actually appear in history
    pub events_by_participant: HashMap<String, usize>,
    pub events_per_hour: f64,
    pub most_recent_event: Option<DateTime<Utc>>,
}

impl SessionStats {
    /// Aggregate over `events` (any order)
    pub fn from_events<'a>(session_id: &str, events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut events_by_kind: BTreeMap<EventKind, usize> =
            EventKind::ALL.into_iter().map(|kind| (kind, 0)).collect();
        let mut events_by_participant: HashMap<String, usize> = HashMap::new();
        let mut total_events = 0;
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut newest: Option<DateTime<Utc>> = None;

        for event in events {
            total_events += 1;
            *events_by_kind.entry(event.kind).or_insert(0) += 1;
            *events_by_participant
                .entry(event.participant_id.clone())
                .or_insert(0) += 1;
            oldest = Some(oldest.map_or(event.timestamp, |t| t.min(event.timestamp)));
            newest = Some(newest.map_or(event.timestamp, |t| t.max(event.timestamp)));
        }

        // Span at full precision; sub-millisecond gaps are normal for back-to-back publishes
        let hours = match (oldest, newest) {
            (Some(first), Some(last)) => (last - first)
                .to_std()
                .map(|span| span.as_secs_f64() / SECS_PER_HOUR)
                .unwrap_or(0.0),
            _ => 0.0,
        };
        let events_per_hour = if hours > 0.0 {
            total_events as f64 / hours
        } else {
            // Empty history or a zero-length span falls back to the raw count
            total_events as f64
        };

        Self {
            session_id: session_id.to_string(),
            total_events,
            events_by_kind,
            events_by_participant,
            events_per_hour,
            most_recent_event: newest,
        }
    }
}
