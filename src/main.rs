use std::sync::Arc;

use collab_bus::{listener_fn, BrokerSettings, Event, EventBroker, ListenerScope};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

// ============================================================================
// Main
// ============================================================================

/// Replays newline-delimited JSON events from stdin through a broker and
/// prints per-session statistics when input ends.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = BrokerSettings::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        history_cap = settings.history_cap,
        recent_limit = settings.recent_limit,
        "Starting collab-bus replay"
    );

    let broker = Arc::new(EventBroker::with_settings(settings));
    broker.add_listener(
        ListenerScope::Any,
        listener_fn(|event| async move {
            info!(
                event_id = %event.id,
                session_id = %event.session_id,
                participant_id = %event.participant_id,
                kind = %event.kind,
                "event"
            );
        }),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    let mut published = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: Event = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, "Skipping malformed event: {}", e);
                continue;
            }
        };

        if let Err(e) = broker.publish(event).await {
            warn!(line = line_no, "Publish failed: {}", e);
            continue;
        }
        published += 1;
    }

    info!(published, "Input exhausted, writing statistics");

    let mut stdout = tokio::io::stdout();
    for session_id in broker.session_ids() {
        let stats = broker.stats(&session_id);
        let mut out = serde_json::to_vec(&stats)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
    }
    stdout.flush().await?;

    broker.destroy();
    Ok(())
}
