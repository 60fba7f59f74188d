//! Producer link endpoint
//!
//! `GET /ws/producer`. One producer at a time. Binary messages are encoded
//! frame envelopes for the pipeline; text messages report screen geometry.
//! Input and quality commands flow back as JSON.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::producer::{ProducerAttachment, ProducerMessage};
use crate::state::AppState;
use crate::utils::LogThrottler;
use crate::warn_throttled;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket upgrade handler for `/ws/producer`
pub async fn producer_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Result<Response> {
    let attachment = state.attach_producer()?;
    Ok(ws.on_upgrade(move |socket| handle_producer_socket(socket, state, attachment)))
}

async fn handle_producer_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    mut attachment: ProducerAttachment,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut shutdown = state.shutdown_signal();
    let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    let throttler = LogThrottler::default();

    loop {
        tokio::select! {
            command = attachment.commands.recv() => {
                let Some(command) = command else { break };
                match serde_json::to_string(&command) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize producer command: {}", e),
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if let Err(e) = state.pipeline.publish_encoded(&Bytes::from(data)) {
                            warn_throttled!(
                                throttler,
                                "bad_frame",
                                "Discarding malformed frame from producer: {}",
                                e
                            );
                        }
                    }
                    Some(Ok(Message::Text(text))) => handle_producer_message(&state, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("Producer receive error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }

            _ = shutdown.recv() => break,
        }
    }

    let _ = sender.close().await;
    state.detach_producer(attachment.id);
}

fn handle_producer_message(state: &AppState, text: &str) {
    match serde_json::from_str::<ProducerMessage>(text) {
        Ok(ProducerMessage::ScreenInfo(screen)) => {
            if screen.is_valid() {
                state.producer.set_screen_dimensions(screen);
            } else {
                warn!(
                    "Ignoring invalid screen size {}x{}",
                    screen.width, screen.height
                );
            }
        }
        Ok(ProducerMessage::Ping) => debug!("Producer ping"),
        Err(e) => warn!("Dropping malformed producer message: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::producer::CaptureControl;
    use tempfile::tempdir;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn test_screen_info_updates_dimensions() {
        let dir = tempdir().unwrap();
        let config = ConfigStore::new(&dir.path().join("test.db")).await.unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = AppState::new(config, shutdown_tx);
        let _attachment = state.attach_producer().unwrap();

        handle_producer_message(
            &state,
            r#"{"type":"screen_info","width":1080,"height":1920,"scale_factor":2.0}"#,
        );
        let screen = state.producer.screen_dimensions().unwrap();
        assert_eq!((screen.width, screen.height), (1080, 1920));

        handle_producer_message(&state, r#"{"type":"screen_info","width":0,"height":1920}"#);
        assert_eq!(state.producer.screen_dimensions().unwrap().width, 1080);
    }
}
