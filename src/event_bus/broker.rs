use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::filter::{FilterPipeline, SessionFilter};
use super::kinds::EventKind;
use super::publisher::{Dispatcher, EventListener, ListenerScope};
use super::stats::SessionStats;
use super::store::{HistoryQuery, HistoryStore};
use super::subscriber::{EventHandler, SessionSubscriptions, SubscriptionRegistry};
use super::types::{BrokerNotice, DispatchReport, Event};
use crate::config::BrokerSettings;
use crate::{BrokerError, Result};

/// Shared reference to EventBroker
pub type SharedEventBroker = Arc<EventBroker>;

/// Everything the broker keeps per session, guarded as one unit so that
/// cleanup never exposes a half-purged session.
struct BrokerState {
    history: HistoryStore,
    filters: FilterPipeline,
    subscriptions: SubscriptionRegistry,
}

/// Session event broker
///
/// Publishing records the event, runs the session filter, then fans the
/// result out to listeners and matching subscriptions:
///
/// ```text
/// publish ─▶ HistoryStore.record ─▶ FilterPipeline ─▶ Dispatcher ─┬─▶ listeners (any/kind/session)
///                                        │                        └─▶ subscriptions (settle all)
///                                        └─▶ dropped: stop
/// ```
///
/// State locks are never held across an await, so handlers and listeners
/// may call back into the broker.
pub struct EventBroker {
    settings: BrokerSettings,
    state: RwLock<BrokerState>,
    dispatcher: Dispatcher,
}

impl EventBroker {
    /// Create a broker with default settings
    pub fn new() -> Self {
        Self::with_settings(BrokerSettings::default())
    }

    pub fn with_settings(settings: BrokerSettings) -> Self {
        Self {
            state: RwLock::new(BrokerState {
                history: HistoryStore::new(settings.history_cap),
                filters: FilterPipeline::new(),
                subscriptions: SubscriptionRegistry::new(),
            }),
            dispatcher: Dispatcher::new(settings.notice_capacity),
            settings,
        }
    }

    /// Create a shared reference to this broker
    pub fn shared(self) -> SharedEventBroker {
        Arc::new(self)
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    fn read_state(&self) -> RwLockReadGuard<'_, BrokerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, BrokerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Publish an event
    ///
    /// This will:
    /// 1. Record the event in session history (always, even if later steps fail)
    /// 2. Run the session filter; a filter error is returned to the caller
    /// 3. Notify listeners and every matching subscription concurrently
    /// 4. Emit an `EventPublished` notice
    ///
    /// Handler failures never fail the publish.
    pub async fn publish(&self, event: Event) -> Result<DispatchReport> {
        let filter = {
            let mut state = self.write_state();
            let evicted = state.history.record(event.clone());
            debug!(
                event_id = %event.id,
                session_id = %event.session_id,
                kind = %event.kind,
                evicted,
                cap = state.history.cap(),
                "event recorded"
            );
            state.filters.get(&event.session_id)
        };

        let filtered = match filter {
            Some(filter) => filter.apply(&event).map_err(|source| {
                warn!(
                    event_id = %event.id,
                    session_id = %event.session_id,
                    error = %source,
                    "session filter failed, event not dispatched"
                );
                BrokerError::Filter {
                    session_id: event.session_id.clone(),
                    event_id: event.id.clone(),
                    source,
                }
            })?,
            None => Some(event.clone()),
        };

        let Some(filtered) = filtered else {
            debug!(event_id = %event.id, session_id = %event.session_id, "event dropped by filter");
            return Ok(DispatchReport::dropped());
        };

        let subscriptions = self
            .read_state()
            .subscriptions
            .matching(&filtered.session_id, filtered.kind);
        let report = self.dispatcher.dispatch(&filtered, subscriptions).await;

        self.dispatcher.notify(BrokerNotice::EventPublished {
            event_id: event.id,
            session_id: event.session_id,
            kind: event.kind,
            timestamp: event.timestamp,
        });

        Ok(report)
    }

    /// Publish a `message-sent` event addressed to the whole session
    ///
    /// `exclude_participant_id` is advisory: every matching subscription is
    /// still notified, handlers decide whether to honor it.
    pub async fn broadcast_to_session(
        &self,
        session_id: &str,
        message: &str,
        exclude_participant_id: Option<&str>,
    ) -> Result<Event> {
        let mut payload = json!({ "message": message, "broadcast": true });
        if let Some(excluded) = exclude_participant_id {
            payload["excludeParticipantId"] = json!(excluded);
        }

        let event = Event::new(EventKind::MessageSent, session_id, "system", payload);
        self.publish(event.clone()).await?;
        Ok(event)
    }

    /// Publish a `message-sent` event from one participant to another
    ///
    /// Delivery is not restricted to the target; the payload carries it.
    pub async fn direct_message(
        &self,
        session_id: &str,
        from_participant_id: &str,
        to_participant_id: &str,
        message: &str,
    ) -> Result<Event> {
        let payload = json!({
            "message": message,
            "direct": true,
            "targetParticipantId": to_participant_id,
        });

        let event = Event::new(EventKind::MessageSent, session_id, from_participant_id, payload);
        self.publish(event.clone()).await?;
        Ok(event)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe a participant to some event kinds of one session
    pub fn subscribe(
        &self,
        session_id: &str,
        participant_id: &str,
        kinds: impl IntoIterator<Item = EventKind>,
        handler: Arc<dyn EventHandler>,
    ) -> String {
        let id = self
            .write_state()
            .subscriptions
            .subscribe(session_id, participant_id, kinds, handler);
        info!(
            subscription_id = %id,
            session_id = %session_id,
            participant_id = %participant_id,
            "subscription created"
        );
        id
    }

    /// Cancel a subscription; false if the id is unknown (or already cancelled)
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let removed = self.write_state().subscriptions.unsubscribe(subscription_id);
        match removed {
            Some(sub) => {
                info!(
                    subscription_id = %sub.id,
                    session_id = %sub.session_id,
                    participant_id = %sub.participant_id,
                    "subscription removed"
                );
                true
            }
            None => false,
        }
    }

    /// Per session: active subscription count and the participants holding them
    pub fn active_summary(&self) -> BTreeMap<String, SessionSubscriptions> {
        self.read_state().subscriptions.active_summary()
    }

    pub fn subscription_count(&self) -> usize {
        self.read_state().subscriptions.count()
    }

    // ========================================================================
    // Filters
    // ========================================================================

    /// Install the session's filter, replacing any previous one
    pub fn set_filter<F>(&self, session_id: &str, filter: F)
    where
        F: Fn(&Event) -> anyhow::Result<Option<Event>> + Send + Sync + 'static,
    {
        let replaced = self
            .write_state()
            .filters
            .set(session_id, SessionFilter::new(filter));
        debug!(session_id = %session_id, replaced = replaced.is_some(), "session filter set");
    }

    pub fn clear_filter(&self, session_id: &str) {
        let removed = self.write_state().filters.clear(session_id);
        debug!(session_id = %session_id, removed, "session filter cleared");
    }

    // ========================================================================
    // History & statistics
    // ========================================================================

    /// Matching events, most recent first
    pub fn query_history(&self, session_id: &str, query: &HistoryQuery) -> Vec<Event> {
        self.read_state().history.query(session_id, query)
    }

    /// Events since `since`, capped at the configured recent limit
    pub fn recent_since(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
        participant_id: Option<&str>,
    ) -> Vec<Event> {
        self.read_state().history.recent_since(
            session_id,
            since,
            participant_id,
            self.settings.recent_limit,
        )
    }

    pub fn stats(&self, session_id: &str) -> SessionStats {
        let state = self.read_state();
        SessionStats::from_events(session_id, state.history.events(session_id))
    }

    pub fn history_len(&self, session_id: &str) -> usize {
        self.read_state().history.len(session_id)
    }

    /// Per-session retention limit in effect (a configured 0 reads as 1)
    pub fn history_cap(&self) -> usize {
        self.read_state().history.cap()
    }

    /// Sessions that currently retain history
    pub fn session_ids(&self) -> Vec<String> {
        self.read_state().history.session_ids()
    }

    // ========================================================================
    // Listeners & notices
    // ========================================================================

    pub fn add_listener(&self, scope: ListenerScope, listener: Arc<dyn EventListener>) -> String {
        self.dispatcher.add_listener(scope, listener)
    }

    pub fn remove_listener(&self, listener_id: &str) -> bool {
        self.dispatcher.remove_listener(listener_id)
    }

    pub fn listener_count(&self) -> usize {
        self.dispatcher.listener_count()
    }

    /// Subscribe to diagnostic notices (failures, publish confirmations, cleanups)
    pub fn notices(&self) -> broadcast::Receiver<BrokerNotice> {
        self.dispatcher.notices()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Discard a session's history, filter and subscriptions in one step
    pub fn cleanup_session(&self, session_id: &str) {
        let (events, subscriptions) = {
            let mut state = self.write_state();
            let events = state.history.purge(session_id);
            state.filters.clear(session_id);
            let subscriptions = state.subscriptions.purge(session_id);
            (events, subscriptions)
        };

        info!(
            session_id = %session_id,
            events,
            subscriptions,
            "session cleaned up"
        );
        self.dispatcher.notify(BrokerNotice::SessionCleanedUp {
            session_id: session_id.to_string(),
        });
    }

    /// Broker shutdown: drop every session and detach every listener
    pub fn destroy(&self) {
        {
            let mut state = self.write_state();
            state.history.clear();
            state.filters.clear_all();
            state.subscriptions.clear();
        }
        self.dispatcher.clear_listeners();
        info!("event broker destroyed");
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}
