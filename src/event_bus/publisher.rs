use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::future::{join, join_all};
use futures_util::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::kinds::EventKind;
use super::subscriber::Subscription;
use super::types::{prefixed_id, BrokerNotice, DispatchReport, Event};

/// Non-subscription observer of delivered events (debugging, metrics)
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &Event);
}

/// Adapter turning an async closure into an [`EventListener`]
pub struct ListenerFn<F>(F);

#[async_trait]
impl<F, Fut> EventListener for ListenerFn<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_event(&self, event: &Event) {
        (self.0)(event.clone()).await
    }
}

pub fn listener_fn<F, Fut>(f: F) -> Arc<dyn EventListener>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(ListenerFn(f))
}

/// Which notification channel a listener is attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerScope {
    /// Every delivered event
    Any,
    /// Delivered events of one kind
    Kind(EventKind),
    /// Delivered events of one session
    Session(String),
}

type ListenerEntry = (String, Arc<dyn EventListener>);

/// The three listener channels, each an ordered list of callables
#[derive(Default)]
struct ListenerRegistry {
    any: Vec<ListenerEntry>,
    by_kind: HashMap<EventKind, Vec<ListenerEntry>>,
    by_session: HashMap<String, Vec<ListenerEntry>>,
}

impl ListenerRegistry {
    fn add(&mut self, scope: ListenerScope, listener: Arc<dyn EventListener>) -> String {
        let id = prefixed_id("lst");
        let entry = (id.clone(), listener);
        match scope {
            ListenerScope::Any => self.any.push(entry),
            ListenerScope::Kind(kind) => self.by_kind.entry(kind).or_default().push(entry),
            ListenerScope::Session(session_id) => {
                self.by_session.entry(session_id).or_default().push(entry)
            }
        }
        id
    }

    fn remove(&mut self, listener_id: &str) -> bool {
        fn take(list: &mut Vec<ListenerEntry>, listener_id: &str) -> bool {
            let before = list.len();
            list.retain(|(id, _)| id != listener_id);
            list.len() != before
        }

        if take(&mut self.any, listener_id) {
            return true;
        }
        let removed = self
            .by_kind
            .values_mut()
            .chain(self.by_session.values_mut())
            .any(|list| take(list, listener_id));
        self.by_kind.retain(|_, list| !list.is_empty());
        self.by_session.retain(|_, list| !list.is_empty());
        removed
    }

    /// Listeners from all three channels that should see `event`
    fn for_event(&self, event: &Event) -> Vec<Arc<dyn EventListener>> {
        let by_kind = self.by_kind.get(&event.kind).into_iter().flatten();
        let by_session = self.by_session.get(&event.session_id).into_iter().flatten();
        self.any
            .iter()
            .chain(by_kind)
            .chain(by_session)
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.any.len()
            + self.by_kind.values().map(Vec::len).sum::<usize>()
            + self.by_session.values().map(Vec::len).sum::<usize>()
    }
}

/// Dispatcher
///
/// Fans one event out to the listener channels and to every matching
/// subscription at once, then waits for all of them to settle. A failing
/// recipient is reported on the notice channel and never affects siblings.
pub struct Dispatcher {
    listeners: RwLock<ListenerRegistry>,
    notices: broadcast::Sender<BrokerNotice>,
}

impl Dispatcher {
    pub fn new(notice_capacity: usize) -> Self {
        // Lagged notice receivers are told via RecvError::Lagged
        let (notices, _) = broadcast::channel(notice_capacity.max(1));
        Self {
            listeners: RwLock::new(ListenerRegistry::default()),
            notices,
        }
    }

    pub fn add_listener(&self, scope: ListenerScope, listener: Arc<dyn EventListener>) -> String {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.add(scope, listener)
    }

    pub fn remove_listener(&self, listener_id: &str) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.remove(listener_id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear_listeners(&self) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        *listeners = ListenerRegistry::default();
    }

    /// Subscribe to diagnostic notices
    pub fn notices(&self) -> broadcast::Receiver<BrokerNotice> {
        self.notices.subscribe()
    }

    /// Emit a notice (best-effort, no receivers is fine)
    pub fn notify(&self, notice: BrokerNotice) {
        let _ = self.notices.send(notice);
    }

    /// Deliver `event` to its listeners and to `subscriptions`, settling all calls
    pub async fn dispatch(&self, event: &Event, subscriptions: Vec<Subscription>) -> DispatchReport {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .for_event(event);

        let listener_calls = join_all(listeners.iter().map(|listener| async move {
            if let Err(panic) = AssertUnwindSafe(listener.on_event(event)).catch_unwind().await {
                warn!(
                    event_id = %event.id,
                    session_id = %event.session_id,
                    error = %panic_message(panic.as_ref()),
                    "event listener panicked"
                );
            }
        }));
        let handler_calls = join_all(subscriptions.iter().map(|sub| self.invoke(sub, event)));

        let (_, outcomes) = join(listener_calls, handler_calls).await;

        let delivered = outcomes.iter().filter(|ok| **ok).count();
        let report = DispatchReport {
            dropped: false,
            delivered,
            failed: outcomes.len() - delivered,
        };
        debug!(
            event_id = %event.id,
            kind = %event.kind,
            listeners = listeners.len(),
            delivered = report.delivered,
            failed = report.failed,
            "event dispatched"
        );
        report
    }

    /// Run one subscription handler, converting any failure into a notice
    async fn invoke(&self, subscription: &Subscription, event: &Event) -> bool {
        let outcome = AssertUnwindSafe(subscription.handler.handle(event, subscription))
            .catch_unwind()
            .await;

        let error = match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
        };

        warn!(
            subscription_id = %subscription.id,
            session_id = %subscription.session_id,
            event_id = %event.id,
            error = %error,
            "subscription handler failed"
        );
        self.notify(BrokerNotice::SubscriptionFailed {
            subscription_id: subscription.id.clone(),
            session_id: subscription.session_id.clone(),
            event_id: event.id.clone(),
            error,
        });
        false
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
