use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use super::kinds::EventKind;
use super::types::Event;

/// Query options for session history
///
/// Every supplied predicate must hold (conjunction). An empty query matches
/// the whole retained history.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub kinds: Option<Vec<EventKind>>,
    pub participant_id: Option<String>,
    /// Inclusive lower bound
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn participant(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }

    pub fn since(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn until(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if an event matches every supplied predicate
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        if let Some(ref pid) = self.participant_id {
            if &event.participant_id != pid {
                return false;
            }
        }

        if let Some(start) = self.start_time {
            if event.timestamp < start {
                return false;
            }
        }

        if let Some(end) = self.end_time {
            if event.timestamp > end {
                return false;
            }
        }

        true
    }
}

/// Bounded, insertion-ordered event history per session
///
/// Each session keeps at most `cap` events; recording past the cap evicts
/// from the front, so the newest event is always retained.
pub struct HistoryStore {
    sessions: HashMap<String, VecDeque<Event>>,
    cap: usize,
}

impl HistoryStore {
    pub fn new(cap: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            cap: cap.max(1),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Append an event to its session, returning how many old events were evicted
    pub fn record(&mut self, event: Event) -> usize {
        let history = self.sessions.entry(event.session_id.clone()).or_default();
        history.push_back(event);

        let mut evicted = 0;
        while history.len() > self.cap {
            history.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Matching events, most recent first, truncated to `query.limit`
    ///
    /// Events with equal timestamps keep newest-recorded first.
    pub fn query(&self, session_id: &str, query: &HistoryQuery) -> Vec<Event> {
        let Some(history) = self.sessions.get(session_id) else {
            return Vec::new();
        };

        let mut events: Vec<Event> = history
            .iter()
            .rev()
            .filter(|event| query.matches(event))
            .cloned()
            .collect();

        // Stable sort keeps the reverse-insertion order for ties
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        events
    }

    /// Events at or after `since`, optionally for one participant, capped at `limit`
    pub fn recent_since(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
        participant_id: Option<&str>,
        limit: usize,
    ) -> Vec<Event> {
        let mut query = HistoryQuery::new().since(since).limit(limit);
        if let Some(pid) = participant_id {
            query = query.participant(pid);
        }
        self.query(session_id, &query)
    }

    /// Retained events in insertion order
    pub fn events(&self, session_id: &str) -> impl Iterator<Item = &Event> {
        self.sessions.get(session_id).into_iter().flatten()
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map(VecDeque::len).unwrap_or(0)
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop a session's history entirely (returns the number of events removed)
    pub fn purge(&mut self, session_id: &str) -> usize {
        self.sessions
            .remove(session_id)
            .map(|history| history.len())
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(kind: EventKind, participant: &str, secs: i64) -> Event {
        Event::new(kind, "s1", participant, json!({ "t": secs })).at(at(secs))
    }

    #[test]
    fn test_record_evicts_oldest_past_cap() {
        let mut store = HistoryStore::new(3);
        let ids: Vec<String> = (0..5)
            .map(|i| {
                let e = event(EventKind::CodeEdited, "p1", i);
                let id = e.id.clone();
                store.record(e);
                id
            })
            .collect();

        assert_eq!(store.len("s1"), 3);
        let kept: Vec<&str> = store.events("s1").map(|e| e.id.as_str()).collect();
        assert_eq!(kept, vec![ids[2].as_str(), ids[3].as_str(), ids[4].as_str()]);
    }

    #[test]
    fn test_zero_cap_still_keeps_newest() {
        let mut store = HistoryStore::new(0);
        store.record(event(EventKind::CodeEdited, "p1", 1));
        let newest = event(EventKind::CodeEdited, "p1", 2);
        let newest_id = newest.id.clone();
        assert_eq!(store.record(newest), 1);
        assert_eq!(store.events("s1").next().unwrap().id, newest_id);
    }

    #[test]
    fn test_query_filters_conjunctively_and_sorts_descending() {
        let mut store = HistoryStore::new(100);
        store.record(event(EventKind::CodeEdited, "p1", 1));
        store.record(event(EventKind::StatusChanged, "p1", 2));
        store.record(event(EventKind::CodeEdited, "p2", 3));
        store.record(event(EventKind::CodeEdited, "p1", 4));

        let all = store.query("s1", &HistoryQuery::new());
        let times: Vec<_> = all.iter().map(|e| e.timestamp).collect();
        assert_eq!(times, vec![at(4), at(3), at(2), at(1)]);

        let edits_by_p1 = store.query(
            "s1",
            &HistoryQuery::new()
                .kinds([EventKind::CodeEdited])
                .participant("p1"),
        );
        let times: Vec<_> = edits_by_p1.iter().map(|e| e.timestamp).collect();
        assert_eq!(times, vec![at(4), at(1)]);

        let window = store.query("s1", &HistoryQuery::new().since(at(2)).until(at(3)));
        assert_eq!(window.len(), 2);

        let limited = store.query("s1", &HistoryQuery::new().limit(1));
        assert_eq!(limited[0].timestamp, at(4));
    }

    #[test]
    fn test_query_ties_prefer_latest_recorded() {
        let mut store = HistoryStore::new(10);
        let first = event(EventKind::CodeEdited, "p1", 5);
        let second = event(EventKind::CodeEdited, "p1", 5);
        let second_id = second.id.clone();
        store.record(first);
        store.record(second);

        let result = store.query("s1", &HistoryQuery::new());
        assert_eq!(result[0].id, second_id);
    }

    #[test]
    fn test_recent_since_applies_limit() {
        let mut store = HistoryStore::new(500);
        let base = at(0);
        for i in 0..150 {
            store.record(event(EventKind::MessageSent, "p1", i));
        }
        store.record(event(EventKind::MessageSent, "p2", 200));

        let recent = store.recent_since("s1", base + Duration::seconds(10), None, 100);
        assert_eq!(recent.len(), 100);
        assert_eq!(recent[0].participant_id, "p2");

        let only_p2 = store.recent_since("s1", base, Some("p2"), 100);
        assert_eq!(only_p2.len(), 1);
    }

    #[test]
    fn test_unknown_session_and_purge() {
        let mut store = HistoryStore::new(10);
        assert!(store.query("missing", &HistoryQuery::new()).is_empty());
        assert_eq!(store.purge("missing"), 0);

        store.record(event(EventKind::CodeEdited, "p1", 1));
        assert_eq!(store.session_ids(), vec!["s1".to_string()]);
        assert_eq!(store.purge("s1"), 1);
        assert_eq!(store.len("s1"), 0);
        assert!(store.session_ids().is_empty());
    }
}
