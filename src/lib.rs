//! In-process publish/subscribe broker for collaboration sessions.
//!
//! Participants (people or agents) publish typed events into a session;
//! other collaborators observe them through subscriptions or listeners,
//! query bounded history, and read usage statistics.

pub mod config;
pub mod event_bus;

use thiserror::Error;

pub use config::BrokerSettings;
pub use event_bus::{
    handler_fn, listener_fn, BrokerNotice, DispatchReport, Event, EventBroker, EventHandler,
    EventKind, EventListener, HistoryQuery, ListenerScope, SessionStats, SharedEventBroker,
    Subscription,
};

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Filter for session {session_id} failed on event {event_id}: {source}")]
    Filter {
        session_id: String,
        event_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
