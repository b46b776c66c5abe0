//! # dashpulse
//!
//! Connects to a dashboard backend, opens the configured subscriptions and
//! logs every change until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Run with settings from dashpulse.toml
//! DASHPULSE_TOKEN=... dashpulse
//!
//! # Override the endpoint
//! DASHPULSE_CONNECTION__URL=wss://dash.example.com/ws DASHPULSE_TOKEN=... dashpulse
//! ```

use anyhow::{Context, Result};
use dashpulse_client::{metrics, ClientConfig, EnvCredential, StoreEvent, SyncClient};
use dashpulse_transport::WebSocketTransport;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dashpulse=debug,dashpulse_client=debug,dashpulse_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = ClientConfig::load()?;

    info!("Starting dashpulse against {}", config.connection.url);

    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let client = SyncClient::new(
        Arc::new(WebSocketTransport::connect_to(config.connection.url.clone())),
        Arc::new(EnvCredential::new("DASHPULSE_TOKEN")),
        &config,
    );
    let mut events = client.events();

    for subscription in &config.subscriptions {
        let id = client.subscribe(subscription.to_spec()).await?;
        info!(subscription = %id, dashboard = %subscription.dashboard_type, "Subscription registered");
    }

    if let Err(e) = client.connect().await {
        // Automatic reconnects keep running in the background.
        warn!(error = %e, "Initial connection failed");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event receiver lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect().await.context("Failed to disconnect")?;
    Ok(())
}

fn log_event(event: &StoreEvent) {
    match event {
        StoreEvent::StateChanged { key, state } => {
            info!(key = %key, timestamp = state.timestamp, types = state.data.len(), "State changed");
        }
        StoreEvent::SubscriptionChanged { id, state } => {
            info!(subscription = %id, state = ?state, "Subscription changed");
        }
        StoreEvent::Notification(n) => {
            info!(priority = ?n.priority, kind = ?n.kind, title = %n.title, "{}", n.message);
        }
        StoreEvent::ConnectionChanged(status) => {
            info!(
                connected = status.is_connected,
                attempts = status.reconnect_attempts,
                error = ?status.error,
                "Connection status changed"
            );
        }
        StoreEvent::Replay { key, entries } => {
            info!(key = %key, entries = entries.len(), "Buffered updates replayed");
        }
    }
}
