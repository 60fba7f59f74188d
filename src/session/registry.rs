//! Session registry
//!
//! One entry per viewer, keyed by session id. State changes are atomic
//! compare-and-swap so the signaling relay and the fallback timer can race
//! without losing updates. Every applied change is mirrored into a `watch`
//! channel for observers (the fallback supervisor).

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::ConnectionState;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::transport::TransportKind;

/// Snapshot of a session
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: Uuid,
    pub transport: TransportKind,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Result of [`SessionRegistry::transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The state changed
    Applied,
    /// Already in the requested state (or already past it, for teardown)
    Unchanged,
    /// The session no longer exists; only returned for teardown states
    Missing,
}

struct Activity {
    instant: Instant,
    at: DateTime<Utc>,
}

struct SessionEntry {
    id: Uuid,
    transport: TransportKind,
    state: AtomicU8,
    removed: AtomicBool,
    created_at: DateTime<Utc>,
    activity: Mutex<Activity>,
    state_tx: watch::Sender<ConnectionState>,
}

impl SessionEntry {
    fn new(id: Uuid, transport: TransportKind) -> Self {
        let now = Utc::now();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            id,
            transport,
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            removed: AtomicBool::new(false),
            created_at: now,
            activity: Mutex::new(Activity {
                instant: Instant::now(),
                at: now,
            }),
            state_tx,
        }
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn touch(&self) {
        *self.activity.lock() = Activity {
            instant: Instant::now(),
            at: Utc::now(),
        };
    }

    fn idle_for(&self) -> Duration {
        self.activity.lock().instant.elapsed()
    }

    /// Mirror the current atomic state into the watch channel. Concurrent
    /// writers may publish out of order, but the last publish always
    /// reflects the latest state.
    fn publish_state(&self) {
        self.state_tx.send_replace(self.state());
    }

    fn snapshot(&self) -> Session {
        Session {
            session_id: self.id,
            transport: self.transport,
            state: self.state(),
            created_at: self.created_at,
            last_activity_at: self.activity.lock().at,
        }
    }
}

/// Registry of live sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<SessionEntry>>>,
    max_sessions: AtomicUsize,
    events: Arc<EventBus>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize, events: Arc<EventBus>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: AtomicUsize::new(max_sessions.max(1)),
            events,
        }
    }

    pub fn set_max_sessions(&self, max_sessions: usize) {
        self.max_sessions.store(max_sessions.max(1), Ordering::Relaxed);
    }

    /// Create a session in `DISCONNECTED`
    pub fn create_session(&self, transport: TransportKind) -> Result<Uuid> {
        let session_id = Uuid::new_v4();
        {
            let mut sessions = self.sessions.write();
            let max = self.max_sessions.load(Ordering::Relaxed);
            if sessions.len() >= max {
                return Err(AppError::SessionLimit(max));
            }
            sessions.insert(session_id, Arc::new(SessionEntry::new(session_id, transport)));
        }

        info!("Session {} created ({})", session_id, transport);
        self.events.publish(SystemEvent::SessionCreated {
            session_id: session_id.to_string(),
            transport,
        });
        Ok(session_id)
    }

    pub fn get(&self, session_id: Uuid) -> Option<Session> {
        self.entry(session_id).map(|e| e.snapshot())
    }

    pub fn contains(&self, session_id: Uuid) -> bool {
        self.sessions.read().contains_key(&session_id)
    }

    fn entry(&self, session_id: Uuid) -> Option<Arc<SessionEntry>> {
        self.sessions.read().get(&session_id).cloned()
    }

    /// Move a session to `next`
    ///
    /// Teardown targets (`FAILED`, `DISCONNECTED`) are idempotent: a missing
    /// session or one already torn down yields `Ok` without change. Any other
    /// edge not in the state machine is `InvalidTransition`.
    pub fn transition(&self, session_id: Uuid, next: ConnectionState) -> Result<TransitionOutcome> {
        let missing = || {
            if next.is_terminal() {
                Ok(TransitionOutcome::Missing)
            } else {
                Err(AppError::NotFound(format!("Session not found: {}", session_id)))
            }
        };

        let Some(entry) = self.entry(session_id) else {
            return missing();
        };

        let mut current = entry.state();
        loop {
            if entry.removed.load(Ordering::Acquire) {
                return missing();
            }
            if current == next
                || (next == ConnectionState::Failed && current == ConnectionState::Disconnected)
            {
                return Ok(TransitionOutcome::Unchanged);
            }
            if !current.can_transition_to(next) {
                return Err(AppError::InvalidTransition {
                    session_id: session_id.to_string(),
                    from: current,
                    to: next,
                });
            }
            match entry.state.compare_exchange(
                current.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = ConnectionState::from_u8(actual),
            }
        }

        entry.touch();
        entry.publish_state();
        debug!("Session {}: {} -> {}", session_id, current, next);

        if next == ConnectionState::Connected {
            self.events.publish(SystemEvent::SessionConnected {
                session_id: session_id.to_string(),
                transport: entry.transport,
            });
        }

        Ok(TransitionOutcome::Applied)
    }

    /// Remove a session. Its watchers observe a final `DISCONNECTED`.
    pub fn remove(&self, session_id: Uuid, reason: &str) -> Option<Session> {
        let entry = self.sessions.write().remove(&session_id)?;

        entry.removed.store(true, Ordering::Release);
        entry
            .state
            .store(ConnectionState::Disconnected.as_u8(), Ordering::Release);
        entry.publish_state();

        info!("Session {} removed ({})", session_id, reason);
        self.events.publish(SystemEvent::SessionDisconnected {
            session_id: session_id.to_string(),
            transport: entry.transport,
            reason: reason.to_string(),
        });
        Some(entry.snapshot())
    }

    /// Observe state changes of a session
    pub fn watch(&self, session_id: Uuid) -> Option<watch::Receiver<ConnectionState>> {
        self.entry(session_id).map(|e| e.state_tx.subscribe())
    }

    /// Record activity (keeps the reaper away)
    pub fn touch(&self, session_id: Uuid) {
        if let Some(entry) = self.entry(session_id) {
            entry.touch();
        }
    }

    pub fn list(&self) -> Vec<Session> {
        self.sessions.read().values().map(|e| e.snapshot()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Number of sessions using `transport`
    pub fn count_by_transport(&self, transport: TransportKind) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|e| e.transport == transport)
            .count()
    }

    /// Remove sessions that sat in `DISCONNECTED` for at least `max_idle`
    /// (negotiated but never connected)
    pub fn reap_idle(&self, max_idle: Duration) -> Vec<Uuid> {
        let stale: Vec<Uuid> = self
            .sessions
            .read()
            .values()
            .filter(|e| e.state() == ConnectionState::Disconnected && e.idle_for() >= max_idle)
            .map(|e| e.id)
            .collect();

        stale
            .into_iter()
            .filter(|id| self.remove(*id, "idle timeout").is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max: usize) -> SessionRegistry {
        SessionRegistry::new(max, Arc::new(EventBus::new()))
    }

    #[test]
    fn test_create_and_get() {
        let registry = registry(4);
        let id = registry.create_session(TransportKind::Socket).unwrap();

        let session = registry.get(id).unwrap();
        assert_eq!(session.transport, TransportKind::Socket);
        assert_eq!(session.state, ConnectionState::Disconnected);
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.count_by_transport(TransportKind::Peer), 0);
    }

    #[test]
    fn test_session_limit() {
        let registry = registry(1);
        registry.create_session(TransportKind::Peer).unwrap();
        assert!(matches!(
            registry.create_session(TransportKind::Socket),
            Err(AppError::SessionLimit(1))
        ));
    }

    #[test]
    fn test_transition_path() {
        let registry = registry(4);
        let id = registry.create_session(TransportKind::Peer).unwrap();

        assert_eq!(
            registry.transition(id, ConnectionState::Negotiating).unwrap(),
            TransitionOutcome::Applied
        );
        assert_eq!(
            registry.transition(id, ConnectionState::Negotiating).unwrap(),
            TransitionOutcome::Unchanged
        );
        assert_eq!(
            registry.transition(id, ConnectionState::Connected).unwrap(),
            TransitionOutcome::Applied
        );
        assert!(matches!(
            registry.transition(id, ConnectionState::Failed),
            Err(AppError::InvalidTransition { .. })
        ));
        assert_eq!(
            registry.transition(id, ConnectionState::Disconnected).unwrap(),
            TransitionOutcome::Applied
        );
    }

    #[test]
    fn test_skipping_negotiating_is_rejected() {
        let registry = registry(4);
        let id = registry.create_session(TransportKind::Socket).unwrap();
        assert!(matches!(
            registry.transition(id, ConnectionState::Connected),
            Err(AppError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_teardown_transitions_on_missing_session_are_noops() {
        let registry = registry(4);
        let id = Uuid::new_v4();

        assert_eq!(
            registry.transition(id, ConnectionState::Failed).unwrap(),
            TransitionOutcome::Missing
        );
        assert_eq!(
            registry.transition(id, ConnectionState::Disconnected).unwrap(),
            TransitionOutcome::Missing
        );
        assert!(matches!(
            registry.transition(id, ConnectionState::Negotiating),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_failed_after_cleanup_is_unchanged() {
        let registry = registry(4);
        let id = registry.create_session(TransportKind::Peer).unwrap();
        registry.transition(id, ConnectionState::Negotiating).unwrap();
        registry.transition(id, ConnectionState::Failed).unwrap();
        registry.transition(id, ConnectionState::Disconnected).unwrap();

        assert_eq!(
            registry.transition(id, ConnectionState::Failed).unwrap(),
            TransitionOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_watch_observes_changes_and_removal() {
        let registry = registry(4);
        let id = registry.create_session(TransportKind::Peer).unwrap();
        let mut rx = registry.watch(id).unwrap();

        registry.transition(id, ConnectionState::Negotiating).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Negotiating);

        registry.remove(id, "test");
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_remove_publishes_event() {
        let events = Arc::new(EventBus::new());
        let registry = SessionRegistry::new(4, events.clone());
        let id = registry.create_session(TransportKind::Socket).unwrap();
        let mut rx = events.subscribe();

        registry.remove(id, "bye");
        assert!(registry.get(id).is_none());
        assert!(registry.remove(id, "bye").is_none());

        match rx.recv().await.unwrap() {
            SystemEvent::SessionDisconnected { reason, .. } => assert_eq!(reason, "bye"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_fail_and_remove_never_resurrects() {
        for _ in 0..200 {
            let registry = Arc::new(registry(4));
            let id = registry.create_session(TransportKind::Peer).unwrap();
            registry.transition(id, ConnectionState::Negotiating).unwrap();

            let failer = {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let _ = registry.transition(id, ConnectionState::Failed);
                })
            };
            let remover = {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.remove(id, "race");
                })
            };

            remover.join().unwrap();
            // Remove has completed: no FAILED session may be visible
            assert!(registry.get(id).is_none());
            failer.join().unwrap();
            assert!(registry.get(id).is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle() {
        let registry = registry(4);
        let idle = registry.create_session(TransportKind::Socket).unwrap();
        let active = registry.create_session(TransportKind::Socket).unwrap();
        registry.transition(active, ConnectionState::Negotiating).unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        let reaped = registry.reap_idle(Duration::from_secs(60));
        assert_eq!(reaped, vec![idle]);
        assert!(registry.get(idle).is_none());
        assert!(registry.get(active).is_some());
    }
}
