//! # ripple-watch
//!
//! Connects to a Ripple endpoint and logs everything that arrives.
//!
//! ## Usage
//!
//! ```bash
//! # Watch the default endpoint
//! ripple-watch
//!
//! # Watch a specific endpoint as a specific user
//! RIPPLE_ENDPOINT_URL=wss://example.com/ws RIPPLE_USER_ID=42 ripple-watch
//!
//! # Export Prometheus metrics on :9090
//! RIPPLE_METRICS__ENABLED=true ripple-watch
//! ```

use anyhow::Result;
use ripple_client::{metrics, ClientConfig, ConnectionStatus, RealtimeClient, StaticUser};
use ripple_protocol::EventKind;
use ripple_transport::WebSocketTransport;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple_client=info,ripple_core=info,ripple_watch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = ClientConfig::load()?;

    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
        metrics::init_metrics();
    }

    let user = match std::env::var("RIPPLE_USER_ID") {
        Ok(user_id) => StaticUser::new(user_id),
        Err(_) => StaticUser::anonymous(),
    };

    info!("Watching {}", config.endpoint_url);

    let transport = WebSocketTransport::new(config.websocket_config());
    let client = RealtimeClient::new(config, transport, user);

    // Relayed typing frames keep their wire name as topic.
    let mut topics: Vec<&'static str> = EventKind::ALL.iter().map(|kind| kind.as_str()).collect();
    topics.push("typing_indicator");

    let mut subscriptions = Vec::with_capacity(topics.len());
    for topic in topics {
        subscriptions.push(client.subscribe(topic, move |event| {
            info!(kind = topic, seq = event.seq, data = %event.data(), "Event");
        })?);
    }

    let mut status = client.status_events();
    client.connect().await?;

    let exit = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                break Ok(());
            }
            changed = status.recv() => match changed {
                Ok(ConnectionStatus::ConnectionFailed) => {
                    error!("Could not reach {}", client.config().endpoint_url);
                    break Err(anyhow::anyhow!("connection failed"));
                }
                Ok(other) => info!(status = %other, "Status"),
                Err(RecvError::Lagged(missed)) => info!(missed, "Status stream lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    client.disconnect().await;
    exit
}
