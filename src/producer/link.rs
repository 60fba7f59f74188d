use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::CaptureControl;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::input::{DeviceCommand, InputExecutor, ScreenDimensions};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Outbound command queue depth; input is dropped rather than delayed
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Server to producer message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProducerCommand {
    /// Execute an input command (device pixels)
    Input { command: DeviceCommand },
    /// Encode quality hint
    Quality { quality: u32 },
    /// A viewer negotiated peer transport; join signaling for this session
    PeerSession { session_id: Uuid },
}

/// Producer to server text message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProducerMessage {
    ScreenInfo(ScreenDimensions),
    Ping,
}

/// A live producer connection
pub struct ProducerAttachment {
    pub id: u64,
    pub commands: mpsc::Receiver<ProducerCommand>,
}

struct Attached {
    id: u64,
    tx: mpsc::Sender<ProducerCommand>,
}

/// Server side of the producer connection
///
/// At most one producer is attached at a time.
pub struct ProducerLink {
    attached: RwLock<Option<Attached>>,
    dimensions: RwLock<Option<ScreenDimensions>>,
    next_id: AtomicU64,
    throttler: LogThrottler,
    events: Arc<EventBus>,
}

impl ProducerLink {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            attached: RwLock::new(None),
            dimensions: RwLock::new(None),
            next_id: AtomicU64::new(1),
            throttler: LogThrottler::default(),
            events,
        }
    }

    /// Attach a producer connection
    pub fn attach(&self) -> Result<ProducerAttachment> {
        let mut attached = self.attached.write();
        if let Some(current) = attached.as_ref() {
            if !current.tx.is_closed() {
                return Err(AppError::Conflict("A producer is already connected".to_string()));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        *attached = Some(Attached { id, tx });
        drop(attached);

        info!("Producer attached (connection {})", id);
        self.events.publish(SystemEvent::ProducerConnected);
        Ok(ProducerAttachment { id, commands })
    }

    /// Detach connection `id`; a newer connection is left in place
    pub fn detach(&self, id: u64) -> bool {
        let mut attached = self.attached.write();
        if attached.as_ref().map(|a| a.id) != Some(id) {
            return false;
        }
        *attached = None;
        drop(attached);

        *self.dimensions.write() = None;
        info!("Producer detached (connection {})", id);
        self.events.publish(SystemEvent::ProducerDisconnected);
        true
    }

    pub fn is_attached(&self) -> bool {
        self.attached
            .read()
            .as_ref()
            .is_some_and(|a| !a.tx.is_closed())
    }

    pub fn set_screen_dimensions(&self, dimensions: ScreenDimensions) {
        debug!(
            "Producer screen {}x{} (scale {})",
            dimensions.width, dimensions.height, dimensions.scale_factor
        );
        *self.dimensions.write() = Some(dimensions);
    }

    /// Tell the producer to join signaling for a peer session
    pub fn notify_peer_session(&self, session_id: Uuid) -> bool {
        self.send(ProducerCommand::PeerSession { session_id })
    }

    fn send(&self, command: ProducerCommand) -> bool {
        let tx = self.attached.read().as_ref().map(|a| a.tx.clone());
        let Some(tx) = tx else {
            return false;
        };
        match tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                warn_throttled!(
                    self.throttler,
                    "producer_queue_full",
                    "Producer command queue full, dropping {:?}",
                    command
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl CaptureControl for ProducerLink {
    fn screen_dimensions(&self) -> Option<ScreenDimensions> {
        *self.dimensions.read()
    }

    fn set_quality_hint(&self, quality: u32) {
        self.send(ProducerCommand::Quality { quality });
    }
}

#[async_trait]
impl InputExecutor for ProducerLink {
    async fn execute(&self, command: &DeviceCommand) -> bool {
        self.send(ProducerCommand::Input {
            command: command.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_producer() {
        let link = ProducerLink::new(Arc::new(EventBus::new()));
        let first = link.attach().unwrap();
        assert!(matches!(link.attach(), Err(AppError::Conflict(_))));

        // A stale id does not detach the live connection
        assert!(!link.detach(first.id + 100));
        assert!(link.is_attached());

        assert!(link.detach(first.id));
        assert!(!link.is_attached());
        assert!(link.attach().is_ok());
    }

    #[tokio::test]
    async fn test_reattach_after_receiver_dropped() {
        let link = ProducerLink::new(Arc::new(EventBus::new()));
        let first = link.attach().unwrap();
        drop(first);
        assert!(link.attach().is_ok());
    }

    #[tokio::test]
    async fn test_commands_delivered() {
        let link = ProducerLink::new(Arc::new(EventBus::new()));
        assert!(!link.execute(&DeviceCommand::Tap { x: 1, y: 2 }).await);

        let mut attachment = link.attach().unwrap();
        assert!(link.execute(&DeviceCommand::Tap { x: 1, y: 2 }).await);
        link.set_quality_hint(65);

        assert_eq!(
            attachment.commands.recv().await.unwrap(),
            ProducerCommand::Input {
                command: DeviceCommand::Tap { x: 1, y: 2 }
            }
        );
        assert_eq!(
            attachment.commands.recv().await.unwrap(),
            ProducerCommand::Quality { quality: 65 }
        );
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&ProducerCommand::Input {
            command: DeviceCommand::Tap { x: 540, y: 960 },
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"input","command":{"action":"tap","x":540,"y":960}}"#
        );

        let msg: ProducerMessage = serde_json::from_str(
            r#"{"type":"screen_info","width":1080,"height":1920,"scale_factor":0.5}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ProducerMessage::ScreenInfo(ScreenDimensions {
                width: 1080,
                height: 1920,
                scale_factor: 0.5
            })
        );
    }
}
