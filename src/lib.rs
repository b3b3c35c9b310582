//! Core of a two-party translation chat: a retry-with-backoff wrapper for
//! idempotent network calls, a room-lifecycle state machine, and an
//! event-driven application controller. The datastore and translation
//! provider are trait collaborators — nothing here knows about a DOM, a
//! vendor payload shape, or a concrete backend.

pub mod cli;
pub mod config;
pub mod error;
pub mod idle;
pub mod lifecycle;
pub mod retry;
pub mod room;
pub mod store;
pub mod translate;

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::AppConfig;
use crate::error::ChatError;
use crate::idle::{ActivityHandle, IdleWatch};
use crate::lifecycle::{JoinOutcome, RoomLifecycle, Session};
use crate::retry::with_backoff;
use crate::room::{
    messages_path, messages_snapshot, room_path, settings_path, users_path, users_snapshot,
    Message, RoomSettings, RoomUser,
};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What the controller reports to the presentation layer.
///
/// Snapshots replace earlier ones wholesale — only the latest matters.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Full message list of the current room, ordered by timestamp.
    Messages(Vec<Message>),
    /// Current member list, ordered by join time.
    Users(Vec<RoomUser>),
    /// The shared room settings changed (either party may toggle them).
    Settings(RoomSettings),
    /// The room record disappeared underneath us (deleted by the peer or
    /// the sweep). The UI should inform the user and call
    /// [`ChatController::logout`].
    RoomVanished,
    /// No activity for the configured timeout. The UI shows a notice,
    /// waits [`AppConfig::idle_grace`], then calls
    /// [`ChatController::logout`].
    IdleTimeout,
}

// ---------------------------------------------------------------------------
// ChatController
// ---------------------------------------------------------------------------

/// Top-level application controller.
///
/// Owns the local [`Session`] explicitly (no ambient globals), wires
/// lifecycle operations to the datastore subscriptions, the idle timer and
/// the periodic sweep, and emits [`ChatEvent`]s for a thin presentation
/// layer. On [`logout`](Self::logout) every watcher is detached *before*
/// the leave runs, so updates from the departed room can never trigger
/// further action.
pub struct ChatController {
    lifecycle: Arc<RoomLifecycle>,
    config: AppConfig,
    session: Option<Session>,
    events: mpsc::UnboundedSender<ChatEvent>,
    tasks: Vec<JoinHandle<()>>,
    activity: Option<ActivityHandle>,
    /// Latest member snapshot, kept current by the users watcher.
    peers: Arc<Mutex<Vec<RoomUser>>>,
    /// Latest shared settings, kept current by the settings watcher.
    shared_settings: Arc<Mutex<Option<RoomSettings>>>,
}

impl ChatController {
    pub fn new(
        lifecycle: Arc<RoomLifecycle>,
        config: AppConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            lifecycle,
            config,
            session: None,
            events,
            tasks: Vec::new(),
            activity: None,
            peers: Arc::new(Mutex::new(Vec::new())),
            shared_settings: Arc::new(Mutex::new(None)),
        };
        (controller, rx)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn lifecycle(&self) -> &Arc<RoomLifecycle> {
        &self.lifecycle
    }

    /// Record user activity; resets the idle countdown.
    pub fn touch(&self) {
        if let Some(activity) = &self.activity {
            activity.touch();
        }
    }

    /// Join (or create) a room and start the watchers, the idle timer and
    /// the cleanup sweep.
    pub async fn login(
        &mut self,
        room_id: &str,
        password: &str,
        user_name: &str,
        language: &str,
    ) -> Result<JoinOutcome, ChatError> {
        if self.session.is_some() {
            if let Err(err) = self.logout().await {
                warn!(error = %err, "implicit logout before login failed");
            }
        }

        let grant = self.lifecycle.join(room_id, password, user_name, language).await?;
        self.session = Some(grant.session);
        self.start_watching(room_id).await?;
        Ok(grant.outcome)
    }

    /// Send a message to the peer, translated into their language.
    ///
    /// The peer is resolved from the latest member snapshot; with nobody
    /// else in the room this fails [`ChatError::NoPeer`] without touching
    /// the network.
    pub async fn send(&self, text: &str) -> Result<Message, ChatError> {
        let session = self.session.as_ref().ok_or(ChatError::NoSession)?;
        let peer_language = {
            let peers = self.peers.lock().expect("peers lock");
            peers
                .iter()
                .find(|u| u.name != session.user.user_name)
                .map(|u| u.language.clone())
        };
        let Some(target_lang) = peer_language else {
            return Err(ChatError::NoPeer { room_id: session.room.room_id.clone() });
        };

        self.touch();
        self.lifecycle
            .send_message(
                &session.room.room_id,
                &session.user.user_name,
                &session.user.language,
                text,
                &target_lang,
            )
            .await
    }

    /// Leave the room. Watchers are detached first, then the session is
    /// consumed; it is gone even when the network operations fail. A
    /// logout with no active session is a no-op.
    pub async fn logout(&mut self) -> Result<(), ChatError> {
        self.stop_watching();
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let auto_delete = self
            .shared_settings
            .lock()
            .expect("settings lock")
            .map(|s| s.auto_delete_empty)
            .unwrap_or(self.config.auto_delete_empty);
        self.peers.lock().expect("peers lock").clear();
        *self.shared_settings.lock().expect("settings lock") = None;
        self.lifecycle.leave(session, auto_delete).await
    }

    // -----------------------------------------------------------------------
    // Watchers
    // -----------------------------------------------------------------------

    async fn subscribe(&self, path: &str) -> Result<crate::store::Subscription, ChatError> {
        let store = self.lifecycle.store();
        with_backoff(&self.lifecycle.config().retry, || store.subscribe(path))
            .await
            .map_err(ChatError::Store)
    }

    async fn start_watching(&mut self, room_id: &str) -> Result<(), ChatError> {
        // Messages: parse, order by timestamp, forward.
        let mut sub = self.subscribe(&messages_path(room_id)).await?;
        let events = self.events.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(snapshot) = sub.recv().await {
                let messages = messages_snapshot(snapshot.as_ref());
                if events.send(ChatEvent::Messages(messages)).is_err() {
                    break;
                }
            }
        }));

        // Users: keep the peer cache current and forward.
        let mut sub = self.subscribe(&users_path(room_id)).await?;
        let events = self.events.clone();
        let peers = Arc::clone(&self.peers);
        self.tasks.push(tokio::spawn(async move {
            while let Some(snapshot) = sub.recv().await {
                let users = users_snapshot(snapshot.as_ref());
                *peers.lock().expect("peers lock") = users.clone();
                if events.send(ChatEvent::Users(users)).is_err() {
                    break;
                }
            }
        }));

        // Room existence: a vanished record ends the watch.
        let mut sub = self.subscribe(&room_path(room_id)).await?;
        let events = self.events.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(snapshot) = sub.recv().await {
                if snapshot.is_none() {
                    let _ = events.send(ChatEvent::RoomVanished);
                    break;
                }
            }
        }));

        // Shared settings.
        let mut sub = self.subscribe(&settings_path(room_id)).await?;
        let events = self.events.clone();
        let shared = Arc::clone(&self.shared_settings);
        self.tasks.push(tokio::spawn(async move {
            while let Some(snapshot) = sub.recv().await {
                let Some(value) = snapshot else { continue };
                let Ok(settings) = serde_json::from_value::<RoomSettings>(value) else {
                    continue;
                };
                *shared.lock().expect("settings lock") = Some(settings);
                if events.send(ChatEvent::Settings(settings)).is_err() {
                    break;
                }
            }
        }));

        // Idle timer.
        let (activity, watch) = IdleWatch::new(self.config.idle_timeout());
        self.activity = Some(activity);
        let events = self.events.clone();
        self.tasks.push(tokio::spawn(async move {
            watch.expired().await;
            let _ = events.send(ChatEvent::IdleTimeout);
        }));

        // Periodic cleanup sweep. Redundant sweeps from the peer are fine.
        let lifecycle = Arc::clone(&self.lifecycle);
        let interval = self.config.sweep_interval();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // the immediate first tick
            loop {
                ticker.tick().await;
                if let Err(err) = lifecycle.sweep().await {
                    warn!(error = %err, "cleanup sweep failed, will retry next tick");
                }
            }
        }));

        Ok(())
    }

    fn stop_watching(&mut self) {
        // Aborting a watcher drops its Subscription, which detaches it
        // from the store.
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.activity = None;
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleConfig;
    use crate::retry::RetryPolicy;
    use crate::store::{Datastore, MemoryStore};
    use crate::translate::EchoTranslator;
    use std::time::Duration;

    fn controller(store: &MemoryStore) -> (ChatController, mpsc::UnboundedReceiver<ChatEvent>) {
        let config = AppConfig::default();
        let lifecycle_config = LifecycleConfig {
            retry: RetryPolicy::immediate(3),
            ..config.lifecycle_config()
        };
        let lifecycle = Arc::new(RoomLifecycle::new(
            Arc::new(store.clone()),
            Arc::new(EchoTranslator),
            lifecycle_config,
        ));
        ChatController::new(lifecycle, config)
    }

    async fn settle() {
        // Let watcher tasks drain their channels.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_login_establishes_session() {
        let store = MemoryStore::new();
        let (mut a, _rx) = controller(&store);
        let outcome = a.login("room123", "secret", "Alice", "en").await.unwrap();
        assert_eq!(outcome, JoinOutcome::Created);
        assert!(a.session().is_some());
    }

    #[tokio::test]
    async fn test_login_emits_initial_snapshots() {
        let store = MemoryStore::new();
        let (mut a, mut rx) = controller(&store);
        a.login("room123", "secret", "Alice", "en").await.unwrap();
        settle().await;

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, ChatEvent::Users(users) if users.len() == 1)));
        assert!(events.iter().any(|e| matches!(e, ChatEvent::Messages(m) if m.is_empty())));
    }

    #[tokio::test]
    async fn test_send_without_peer_fails_locally() {
        let store = MemoryStore::new();
        let (mut a, _rx) = controller(&store);
        a.login("room123", "secret", "Alice", "en").await.unwrap();
        settle().await;

        let err = a.send("Hello").await.unwrap_err();
        assert!(matches!(err, ChatError::NoPeer { .. }));
    }

    #[tokio::test]
    async fn test_send_targets_peer_language() {
        let store = MemoryStore::new();
        let (mut a, mut rx_a) = controller(&store);
        let (mut b, _rx_b) = controller(&store);
        a.login("room123", "secret", "Alice", "en").await.unwrap();
        b.login("room123", "secret", "Bob", "ja").await.unwrap();
        settle().await;

        let message = a.send("Hello").await.unwrap();
        assert_eq!(message.original_text, "Hello");
        assert_eq!(message.sender, "Alice");
        settle().await;

        let events = drain(&mut rx_a);
        let last_messages = events.iter().rev().find_map(|e| match e {
            ChatEvent::Messages(m) => Some(m.clone()),
            _ => None,
        });
        assert_eq!(last_messages.expect("messages event").len(), 1);
    }

    #[tokio::test]
    async fn test_send_without_session_is_no_session() {
        let store = MemoryStore::new();
        let (a, _rx) = controller(&store);
        assert!(matches!(a.send("hi").await, Err(ChatError::NoSession)));
    }

    #[tokio::test]
    async fn test_logout_clears_session_and_room() {
        let store = MemoryStore::new();
        let (mut a, _rx) = controller(&store);
        a.login("room123", "secret", "Alice", "en").await.unwrap();
        settle().await;

        a.logout().await.unwrap();
        assert!(a.session().is_none());
        // auto_delete_empty default: the vacated room is gone.
        assert!(store.get("rooms/room123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_twice_is_noop() {
        let store = MemoryStore::new();
        let (mut a, _rx) = controller(&store);
        a.login("room123", "secret", "Alice", "en").await.unwrap();
        a.logout().await.unwrap();
        a.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_logout_respects_shared_settings() {
        let store = MemoryStore::new();
        let (mut a, _rx) = controller(&store);
        a.login("room123", "secret", "Alice", "en").await.unwrap();
        a.lifecycle()
            .update_settings("room123", RoomSettings { auto_delete_empty: false })
            .await
            .unwrap();
        settle().await;

        a.logout().await.unwrap();
        // Shared toggle overrode the config default: room retained.
        assert!(store.get("rooms/room123").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_peer_sees_room_vanish_after_delete() {
        let store = MemoryStore::new();
        let (mut a, _rx_a) = controller(&store);
        let (mut b, mut rx_b) = controller(&store);
        a.login("room123", "secret", "Alice", "en").await.unwrap();
        b.login("room123", "secret", "Bob", "ja").await.unwrap();
        settle().await;
        drain(&mut rx_b);

        a.lifecycle().delete_room("room123", "secret").await.unwrap();
        settle().await;

        let events = drain(&mut rx_b);
        assert!(events.iter().any(|e| matches!(e, ChatEvent::RoomVanished)));
    }

    #[tokio::test]
    async fn test_own_logout_does_not_emit_room_vanished() {
        let store = MemoryStore::new();
        let (mut a, mut rx) = controller(&store);
        a.login("room123", "secret", "Alice", "en").await.unwrap();
        settle().await;
        drain(&mut rx);

        // Watchers are detached before the leave deletes the room.
        a.logout().await.unwrap();
        settle().await;
        let events = drain(&mut rx);
        assert!(
            !events.iter().any(|e| matches!(e, ChatEvent::RoomVanished)),
            "got RoomVanished from our own leave: {events:?}"
        );
    }

    #[tokio::test]
    async fn test_settings_event_reaches_peer() {
        let store = MemoryStore::new();
        let (mut a, _rx_a) = controller(&store);
        let (mut b, mut rx_b) = controller(&store);
        a.login("room123", "secret", "Alice", "en").await.unwrap();
        b.login("room123", "secret", "Bob", "ja").await.unwrap();
        settle().await;
        drain(&mut rx_b);

        a.lifecycle()
            .update_settings("room123", RoomSettings { auto_delete_empty: false })
            .await
            .unwrap();
        settle().await;

        let events = drain(&mut rx_b);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChatEvent::Settings(s) if !s.auto_delete_empty)));
    }
}
