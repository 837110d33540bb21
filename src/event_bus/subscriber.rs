use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::kinds::EventKind;
use super::types::{prefixed_id, Event};

/// Callback invoked for every matching event
///
/// Errors and panics are contained per subscription and reported as
/// `BrokerNotice::SubscriptionFailed`; they never reach the publisher.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event, subscription: &Subscription) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`]
pub struct HandlerFn<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(Event, Subscription) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &Event, subscription: &Subscription) -> anyhow::Result<()> {
        (self.0)(event.clone(), subscription.clone()).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event, Subscription) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// A standing registration for events of chosen kinds within one session
///
/// The handler is shared with the caller; the registry never owns the
/// collaborator behind it.
#[derive(Clone)]
pub struct Subscription {
    pub id: String,
    pub session_id: String,
    pub participant_id: String,
    pub kinds: HashSet<EventKind>,
    pub handler: Arc<dyn EventHandler>,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

impl Subscription {
    pub fn wants(&self, kind: EventKind) -> bool {
        self.active && self.kinds.contains(&kind)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("participant_id", &self.participant_id)
            .field("kinds", &self.kinds)
            .field("created_at", &self.created_at)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// Per-session view of active subscriptions (for debugging)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSubscriptions {
    pub active_subscriptions: usize,
    pub participants: BTreeSet<String>,
}

/// Subscription Registry
///
/// Sessions map to their subscriptions in registration order. A session
/// entry disappears once its last subscription is removed.
#[derive(Default)]
pub struct SubscriptionRegistry {
    sessions: HashMap<String, Vec<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active subscription and return its id
    ///
    /// Duplicate registrations for the same participant and kinds are kept.
    pub fn subscribe(
        &mut self,
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
        kinds: impl IntoIterator<Item = EventKind>,
        handler: Arc<dyn EventHandler>,
    ) -> String {
        let session_id = session_id.into();
        let subscription = Subscription {
            id: prefixed_id("sub"),
            session_id: session_id.clone(),
            participant_id: participant_id.into(),
            kinds: kinds.into_iter().collect(),
            handler,
            created_at: Utc::now(),
            active: true,
        };
        let id = subscription.id.clone();
        self.sessions.entry(session_id).or_default().push(subscription);
        id
    }

    /// Deactivate and remove a subscription; `None` if the id is unknown
    pub fn unsubscribe(&mut self, subscription_id: &str) -> Option<Subscription> {
        let (session_id, index) = self.sessions.iter().find_map(|(session_id, subs)| {
            subs.iter()
                .position(|sub| sub.id == subscription_id)
                .map(|index| (session_id.clone(), index))
        })?;

        let subs = self.sessions.get_mut(&session_id)?;
        let mut removed = subs.remove(index);
        removed.active = false;
        if subs.is_empty() {
            self.sessions.remove(&session_id);
        }
        Some(removed)
    }

    /// Active subscriptions for `session_id` interested in `kind`
    pub fn matching(&self, session_id: &str, kind: EventKind) -> Vec<Subscription> {
        self.sessions
            .get(session_id)
            .map(|subs| subs.iter().filter(|sub| sub.wants(kind)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn active_summary(&self) -> BTreeMap<String, SessionSubscriptions> {
        self.sessions
            .iter()
            .map(|(session_id, subs)| {
                let active: Vec<&Subscription> = subs.iter().filter(|sub| sub.active).collect();
                let summary = SessionSubscriptions {
                    active_subscriptions: active.len(),
                    participants: active.iter().map(|sub| sub.participant_id.clone()).collect(),
                };
                (session_id.clone(), summary)
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.values().map(Vec::len).sum()
    }

    /// Remove every subscription of a session, returning how many were dropped
    pub fn purge(&mut self, session_id: &str) -> usize {
        self.sessions
            .remove(session_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
