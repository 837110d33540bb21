// Event Bus - session broker
//
// Collaborators publish typed events into a session; the broker keeps a
// bounded history per session, applies the session filter, and fans events
// out to listeners and subscriptions without any of them knowing each other.

pub mod broker;
pub mod filter;
pub mod kinds;
pub mod publisher;
pub mod stats;
pub mod store;
pub mod subscriber;
pub mod types;

pub use broker::{EventBroker, SharedEventBroker};
pub use filter::{FilterPipeline, SessionFilter};
pub use kinds::EventKind;
pub use publisher::{listener_fn, Dispatcher, EventListener, ListenerScope};
pub use stats::SessionStats;
pub use store::{HistoryQuery, HistoryStore};
pub use subscriber::{
    handler_fn, EventHandler, SessionSubscriptions, Subscription, SubscriptionRegistry,
};
pub use types::{BrokerNotice, DispatchReport, Event};
