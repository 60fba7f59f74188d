//! Frame pipeline
//!
//! ```text
//! Producer --publish--> [video queue] --\
//!                                        >-- fan-out --> Subscription (per viewer)
//! Producer --publish--> [audio queue] --/
//! ```
//!
//! Each queue is bounded and drops its oldest frame when full, so `publish`
//! never waits on viewers. Each envelope is encoded once and handed to every
//! subscriber with `try_send`; a subscriber whose buffer is full or whose
//! receiver is gone is unsubscribed on the spot.

pub mod queue;

pub use queue::{FrameQueue, QueueSlot, QueueStats};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::protocol::{FrameEnvelope, FrameKind, WireError};

/// Pipeline counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub video: QueueStats,
    pub audio: QueueStats,
    pub subscribers: usize,
    /// Envelopes handed to subscribers
    pub delivered: u64,
    /// Subscribers removed because they could not keep up or went away
    pub evicted_subscribers: u64,
    /// Dropped / pushed across both queues since start
    pub drop_rate: f64,
}

struct Subscriber {
    tx: mpsc::Sender<Bytes>,
    session_id: Option<Uuid>,
}

/// A viewer's pipeline subscription
///
/// Dropping it unsubscribes immediately.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    pipeline: Weak<FramePipeline>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next encoded envelope; `None` once the pipeline dropped this subscriber
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.upgrade() {
            pipeline.unsubscribe(self.id);
        }
    }
}

/// Bounded broadcast of frames to socket-transport viewers
pub struct FramePipeline {
    video: FrameQueue,
    audio: FrameQueue,
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_subscriber_id: AtomicU64,
    subscriber_buffer: usize,
    delivered: AtomicU64,
    evicted_subscribers: AtomicU64,
    running: Mutex<Option<CancellationToken>>,
}

impl FramePipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            video: FrameQueue::new(config.video_capacity as usize),
            audio: FrameQueue::new(config.audio_capacity as usize),
            subscribers: RwLock::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            subscriber_buffer: (config.subscriber_buffer as usize).max(1),
            delivered: AtomicU64::new(0),
            evicted_subscribers: AtomicU64::new(0),
            running: Mutex::new(None),
        }
    }

    fn queue(&self, kind: FrameKind) -> &FrameQueue {
        match kind {
            FrameKind::Video => &self.video,
            FrameKind::Audio => &self.audio,
        }
    }

    /// Enqueue an envelope; evicts the oldest queued frame of the same kind
    /// when full.
    pub fn publish(&self, envelope: FrameEnvelope) {
        let kind = envelope.kind;
        if let Some(evicted) = self.queue(kind).push(envelope) {
            debug!(
                "Evicted {:?} frame ts={} after {:?} in queue",
                kind,
                evicted.envelope.timestamp_micros,
                evicted.enqueued_at.elapsed()
            );
        }
    }

    pub fn publish_video_frame(&self, payload: impl Into<Bytes>, timestamp_micros: u64) {
        self.publish(FrameEnvelope::video(timestamp_micros, payload));
    }

    pub fn publish_audio_frame(&self, pcm: impl Into<Bytes>, timestamp_micros: u64) {
        self.publish(FrameEnvelope::audio(timestamp_micros, pcm));
    }

    /// Decode a wire-format envelope and publish it
    pub fn publish_encoded(&self, data: &Bytes) -> Result<FrameKind, WireError> {
        let envelope = FrameEnvelope::decode(data)?;
        let kind = envelope.kind;
        self.publish(envelope);
        Ok(kind)
    }

    /// Subscribe to encoded envelopes
    pub fn subscribe(self: &Arc<Self>, session_id: Option<Uuid>) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        self.subscribers
            .write()
            .insert(id, Subscriber { tx, session_id });
        debug!("Pipeline subscriber {} added (session {:?})", id, session_id);

        Subscription {
            id,
            rx,
            pipeline: Arc::downgrade(self),
        }
    }

    /// Remove a subscriber; returns whether it was present
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!("Pipeline subscriber {} removed", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Start the delivery loops (no-op if running)
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }
        let token = CancellationToken::new();
        for kind in [FrameKind::Video, FrameKind::Audio] {
            let pipeline = self.clone();
            let token = token.clone();
            tokio::spawn(async move { pipeline.delivery_loop(kind, token).await });
        }
        *running = Some(token);
        info!("Frame pipeline started");
    }

    /// Stop the delivery loops; queued frames stay queued
    pub fn stop(&self) {
        if let Some(token) = self.running.lock().take() {
            token.cancel();
            info!("Frame pipeline stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    async fn delivery_loop(&self, kind: FrameKind, token: CancellationToken) {
        let queue = self.queue(kind);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                slot = queue.next() => self.fan_out(&slot.envelope),
            }
        }
        debug!("{:?} delivery loop exited", kind);
    }

    fn fan_out(&self, envelope: &FrameEnvelope) {
        let encoded = match envelope.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Discarding unencodable frame: {}", e);
                return;
            }
        };

        let mut failed = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, subscriber) in subscribers.iter() {
                match subscriber.tx.try_send(encoded.clone()) {
                    Ok(()) => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        failed.push((*id, subscriber.session_id, "buffer full"));
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        failed.push((*id, subscriber.session_id, "closed"));
                    }
                }
            }
        }

        if failed.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.write();
        for (id, session_id, reason) in failed {
            if subscribers.remove(&id).is_some() {
                self.evicted_subscribers.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Unsubscribed pipeline subscriber {} (session {:?}): {}",
                    id, session_id, reason
                );
            }
        }
    }

    /// Dropped / pushed across both queues
    pub fn drop_rate(&self) -> f64 {
        let video = self.video.stats();
        let audio = self.audio.stats();
        let pushed = video.pushed + audio.pushed;
        if pushed == 0 {
            return 0.0;
        }
        (video.dropped + audio.dropped) as f64 / pushed as f64
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            video: self.video.stats(),
            audio: self.audio.stats(),
            subscribers: self.subscriber_count(),
            delivered: self.delivered.load(Ordering::Relaxed),
            evicted_subscribers: self.evicted_subscribers.load(Ordering::Relaxed),
            drop_rate: self.drop_rate(),
        }
    }

    #[cfg(test)]
    fn queued(&self, kind: FrameKind) -> Vec<FrameEnvelope> {
        self.queue(kind).snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pipeline(video_capacity: u32, subscriber_buffer: u32) -> Arc<FramePipeline> {
        Arc::new(FramePipeline::new(&PipelineConfig {
            video_capacity,
            subscriber_buffer,
            ..PipelineConfig::default()
        }))
    }

    #[test]
    fn test_publish_keeps_most_recent() {
        let pipeline = pipeline(3, 16);
        for ts in 0..8u64 {
            pipeline.publish_video_frame(vec![ts as u8], ts);
        }

        let queued: Vec<u64> = pipeline
            .queued(FrameKind::Video)
            .iter()
            .map(|f| f.timestamp_micros)
            .collect();
        assert_eq!(queued, vec![5, 6, 7]);
        assert_eq!(pipeline.stats().video.dropped, 5);
    }

    #[test]
    fn test_audio_backlog_does_not_evict_video() {
        let pipeline = pipeline(3, 16);
        pipeline.publish_video_frame(vec![1u8], 1);
        for ts in 0..50 {
            pipeline.publish_audio_frame(vec![0u8; 4], ts);
        }

        assert_eq!(pipeline.queued(FrameKind::Video).len(), 1);
        assert_eq!(pipeline.stats().video.dropped, 0);
        assert_eq!(pipeline.stats().audio.dropped, 42);
    }

    #[tokio::test]
    async fn test_fan_out_in_order() {
        let pipeline = pipeline(8, 16);
        let mut a = pipeline.subscribe(None);
        let mut b = pipeline.subscribe(Some(Uuid::new_v4()));
        pipeline.start();

        for ts in 0..3u64 {
            pipeline.publish_video_frame(vec![ts as u8], ts);
        }

        for sub in [&mut a, &mut b] {
            for ts in 0..3u64 {
                let bytes = tokio::time::timeout(Duration::from_secs(1), sub.recv())
                    .await
                    .unwrap()
                    .unwrap();
                let frame = FrameEnvelope::decode(&bytes).unwrap();
                assert_eq!(frame.timestamp_micros, ts);
            }
        }
        pipeline.stop();
    }

    #[test]
    fn test_slow_subscriber_unsubscribed() {
        let pipeline = pipeline(3, 1);
        let _slow = pipeline.subscribe(None);
        let mut fast = pipeline.subscribe(None);

        pipeline.fan_out(&FrameEnvelope::video(1, vec![1u8]));
        assert!(fast.rx.try_recv().is_ok());
        pipeline.fan_out(&FrameEnvelope::video(2, vec![2u8]));
        assert!(fast.rx.try_recv().is_ok());

        assert_eq!(pipeline.subscriber_count(), 1);
        assert_eq!(pipeline.stats().evicted_subscribers, 1);
        assert_eq!(pipeline.stats().delivered, 3);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let pipeline = pipeline(3, 4);
        let sub = pipeline.subscribe(None);
        let id = sub.id();
        assert_eq!(pipeline.subscriber_count(), 1);

        drop(sub);
        assert_eq!(pipeline.subscriber_count(), 0);
        assert!(!pipeline.unsubscribe(id));
    }

    #[test]
    fn test_publish_encoded() {
        let pipeline = pipeline(3, 4);
        let wire = FrameEnvelope::audio_from_samples(9, &[1, 2]).encode().unwrap();
        assert_eq!(pipeline.publish_encoded(&wire), Ok(FrameKind::Audio));
        assert!(pipeline
            .publish_encoded(&Bytes::from_static(&[0x05, 0, 0]))
            .is_err());
        assert_eq!(pipeline.queued(FrameKind::Audio).len(), 1);
    }
}
