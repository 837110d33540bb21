use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::types::Event;

/// A per-session transform/drop step run before delivery
///
/// Returning `Ok(None)` drops the event; returning an error aborts the
/// publish that triggered it.
#[derive(Clone)]
pub struct SessionFilter(Arc<dyn Fn(&Event) -> anyhow::Result<Option<Event>> + Send + Sync>);

impl SessionFilter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Event) -> anyhow::Result<Option<Event>> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, event: &Event) -> anyhow::Result<Option<Event>> {
        (self.0)(event)
    }
}

impl fmt::Debug for SessionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionFilter(..)")
    }
}

/// Single-slot filter registration per session (last writer wins)
#[derive(Default)]
pub struct FilterPipeline {
    filters: HashMap<String, SessionFilter>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter, returning the one it replaced
    pub fn set(&mut self, session_id: impl Into<String>, filter: SessionFilter) -> Option<SessionFilter> {
        self.filters.insert(session_id.into(), filter)
    }

    pub fn clear(&mut self, session_id: &str) -> bool {
        self.filters.remove(session_id).is_some()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionFilter> {
        self.filters.get(session_id).cloned()
    }

    pub fn clear_all(&mut self) {
        self.filters.clear();
    }
}
