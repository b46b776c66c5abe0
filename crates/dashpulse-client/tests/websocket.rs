//! Runs the client against a real WebSocket server on localhost.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashpulse_client::{ClientConfig, ClientError, StaticCredential, StoreEvent, SubscriptionRequest, SyncClient};
use dashpulse_core::{FilterSet, StateKey, SubscriptionState};
use dashpulse_protocol::{decode, encode, DashboardType, DataMap, Frame, PROTOCOL_VERSION};
use dashpulse_transport::WebSocketTransport;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

const TOKEN: &str = "ws-token";

async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(serve_socket)
}

/// Minimal dashboard server: handshake, confirm subscriptions and push one
/// snapshot per subscription.
async fn serve_socket(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Binary(data) = message else {
            continue;
        };
        let Ok(frame) = decode(&data) else {
            return;
        };

        let replies = match frame {
            Frame::Connect { token, .. } if token == TOKEN => {
                vec![Frame::connected("ws-1", PROTOCOL_VERSION, 30_000)]
            }
            Frame::Connect { .. } => vec![Frame::DashboardError {
                error: "invalid token".into(),
                details: None,
            }],
            Frame::Ping { timestamp } => vec![Frame::pong(timestamp)],
            Frame::SubscribeToDashboard {
                subscription_id,
                dashboard_type,
                filters,
                data_types,
                ..
            } => {
                let mut data = DataMap::new();
                data.insert("revenue".into(), json!(1250));
                vec![
                    Frame::confirmed(subscription_id, dashboard_type, data_types),
                    Frame::update(dashboard_type, data, 1_000, filters),
                ]
            }
            _ => Vec::new(),
        };

        for reply in replies {
            let Ok(bytes) = encode(&reply) else {
                return;
            };
            if socket.send(Message::Binary(bytes.to_vec())).await.is_err() {
                return;
            }
        }
    }
}

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/ws", get(ws_handler));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{}/ws", addr)
}

fn client(url: &str, token: &str) -> SyncClient {
    let mut config = ClientConfig::default();
    config.connection.timeout_ms = 2_000;
    SyncClient::new(
        Arc::new(WebSocketTransport::connect_to(url)),
        Arc::new(StaticCredential::new(token)),
        &config,
    )
}

#[tokio::test]
async fn test_websocket_subscribe_and_receive() {
    let url = spawn_server().await;
    let client = client(&url, TOKEN);
    let mut events = client.events();

    client.connect().await.unwrap();
    assert!(client.connection_status().is_connected);

    let id = client
        .subscribe(SubscriptionRequest::new(
            DashboardType::Executive,
            FilterSet::new(json!({"region": "eu"})),
            vec!["revenue".into()],
        ))
        .await
        .unwrap();

    let key = StateKey::new(DashboardType::Executive, &FilterSet::new(json!({"region": "eu"})));
    let state = timeout(Duration::from_secs(5), async {
        loop {
            if let StoreEvent::StateChanged { key: changed, state } = events.recv().await.unwrap() {
                if changed == key {
                    return state;
                }
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(state.data["revenue"], json!(1250));
    assert_eq!(state.timestamp, 1_000);
    assert_eq!(
        client.store().subscription_state(&id),
        Some(SubscriptionState::Confirmed)
    );
    assert_eq!(client.connection_status().active_subscriptions_count, 1);

    client.disconnect().await.unwrap();
    assert!(!client.connection_status().is_connected);
}

#[tokio::test]
async fn test_websocket_rejected_handshake() {
    let url = spawn_server().await;
    let client = client(&url, "wrong-token");
    client
        .update_connection_options(dashpulse_client::ConnectionOptionsUpdate {
            auto_reconnect: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();

    match client.connect().await {
        Err(ClientError::Rejected(reason)) => assert_eq!(reason, "invalid token"),
        other => panic!("Expected rejection, got {:?}", other),
    }
    assert!(!client.connection_status().is_connected);
}
