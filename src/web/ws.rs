//! WebSocket handler for lifecycle event streaming
//!
//! `/api/ws` broadcasts [`SystemEvent`]s to the producer application shell:
//! - topic-based filtering (`*`, `prefix.*`, exact names)
//! - subscribe / unsubscribe messages from the client
//! - heartbeat pings

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::SystemEvent;
use crate::state::AppState;

/// Client-to-server message
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload")]
enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { topics: Vec<String> },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topics: Vec<String> },

    #[serde(rename = "ping")]
    Ping,
}

/// WebSocket upgrade handler for `/api/ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = state.events.subscribe();
    let mut shutdown = state.shutdown_signal();

    // Nothing is sent until the client subscribes
    let mut subscribed_topics: Vec<String> = vec![];
    let mut stats_sent = false;

    info!("Event client connected");

    let mut heartbeat_interval = tokio::time::interval(tokio::time::Duration::from_secs(30));

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(&text, &mut subscribed_topics) {
                            warn!("Failed to handle event client message: {}", e);
                        }

                        // Current counters right after the first subscription
                        if !stats_sent && !subscribed_topics.is_empty() {
                            let stats = current_stats(&state);
                            if should_send_event(&stats, &subscribed_topics) {
                                if let Ok(json) = serialize_event(&stats) {
                                    if sender.send(Message::Text(json)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            stats_sent = true;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Event client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Event socket receive error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if should_send_event(&event, &subscribed_topics) {
                            if let Ok(json) = serialize_event(&event) {
                                if sender.send(Message::Text(json)).await.is_err() {
                                    warn!("Failed to send event to client, disconnecting");
                                    break;
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event client lagged by {} events", n);
                        let error_event = SystemEvent::Error {
                            message: format!("Lagged by {} events", n),
                        };
                        if let Ok(json) = serialize_event(&error_event) {
                            let _ = sender.send(Message::Text(json)).await;
                        }
                    }
                    Err(_) => {
                        warn!("Event bus closed");
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    warn!("Failed to send ping, disconnecting");
                    break;
                }
            }

            _ = shutdown.recv() => break,
        }
    }

    let _ = sender.close().await;
}

fn current_stats(state: &AppState) -> SystemEvent {
    SystemEvent::StatsUpdated {
        active_sessions: state.sessions.count(),
        pipeline: state.pipeline.stats(),
        quality: state.quality.current(),
    }
}

fn handle_client_message(text: &str, topics: &mut Vec<String>) -> Result<(), serde_json::Error> {
    match serde_json::from_str::<ClientMessage>(text)? {
        ClientMessage::Subscribe { topics: new_topics } => {
            info!("Event client subscribed to topics: {:?}", new_topics);
            *topics = new_topics;
        }
        ClientMessage::Unsubscribe {
            topics: remove_topics,
        } => {
            topics.retain(|t| !remove_topics.contains(t));
            info!("Event client unsubscribed from topics: {:?}", remove_topics);
        }
        ClientMessage::Ping => debug!("Event client ping"),
    }
    Ok(())
}

/// Check if an event should be sent based on subscribed topics
fn should_send_event(event: &SystemEvent, topics: &[String]) -> bool {
    if topics.is_empty() {
        return false;
    }
    if topics.iter().any(|t| t == "*") {
        return true;
    }
    topics.iter().any(|topic| event.matches_topic(topic))
}

fn serialize_event(event: &SystemEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
