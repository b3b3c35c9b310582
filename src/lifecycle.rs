//! Room membership and message flow.
//!
//! ## Room lifecycle
//! 1. `join` against an unknown room id creates the room with the joiner
//!    as the sole member (`Created`).
//! 2. The second party joins with the shared password (`Joined`); a
//!    returning name reconnects instead of taking a second slot
//!    (`Rejoined`).
//! 3. `send_message` requires the peer to be present, translates through
//!    the retry wrapper, then appends the message under a pushed key.
//! 4. `leave` removes the member; with `auto_delete_empty` the vacated
//!    room is deleted immediately, otherwise the age-based `sweep`
//!    reclaims it later.
//!
//! Every datastore and translation call goes through
//! [`crate::retry::with_backoff`]. `Auth`, `Capacity` and `NoPeer` are
//! decided locally and never retried. The local [`Session`] is an explicit
//! value owned by the caller and consumed on leave — there is no ambient
//! current-user state in this module.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::ChatError;
use crate::retry::{with_backoff, RetryPolicy};
use crate::room::{
    self, message_path, messages_path, now_ms, room_path, settings_path, user_path, users_path,
    Message, RoomRecord, RoomSettings, RoomUser, DEFAULT_MAX_USERS,
};
use crate::store::{Datastore, Presence};
use crate::translate::TranslationProvider;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The local identity for the duration of a membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: String,
    pub user_name: String,
    pub language: String,
}

/// The room half of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRoom {
    pub room_id: String,
    pub password: String,
}

/// Client-local membership state. Never persisted; consumed by
/// [`RoomLifecycle::leave`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: SessionUser,
    pub room: SessionRoom,
}

/// How a successful join resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The room did not exist; it was created with the joiner as sole
    /// member.
    Created,
    /// Added as the second member.
    Joined,
    /// A member with the same name already existed; reconnected as them.
    Rejoined,
}

impl std::fmt::Display for JoinOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinOutcome::Created => write!(f, "created"),
            JoinOutcome::Joined => write!(f, "joined"),
            JoinOutcome::Rejoined => write!(f, "rejoined"),
        }
    }
}

/// Result of a successful join: the outcome plus the established session.
#[derive(Debug, Clone)]
pub struct JoinGrant {
    pub outcome: JoinOutcome,
    pub session: Session,
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// What to do when translation fails after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranslationFallback {
    /// Send with `translated_text == original_text`. The default.
    #[default]
    SendOriginal,
    /// Propagate the failure; nothing is written.
    Fail,
}

/// Knobs for [`RoomLifecycle`].
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    pub max_users_per_room: usize,
    /// Rooms older than this are reclaimed by [`RoomLifecycle::sweep`].
    pub room_retention: Duration,
    pub translation_fallback: TranslationFallback,
    pub retry: RetryPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_users_per_room: DEFAULT_MAX_USERS,
            room_retention: Duration::from_secs(7 * 24 * 60 * 60),
            translation_fallback: TranslationFallback::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one cleanup sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub examined: usize,
    pub removed: usize,
}

// ---------------------------------------------------------------------------
// RoomLifecycle
// ---------------------------------------------------------------------------

/// State machine governing room creation, membership, leave and deletion.
pub struct RoomLifecycle {
    store: Arc<dyn Datastore>,
    translator: Arc<dyn TranslationProvider>,
    presence: Option<Arc<dyn Presence>>,
    config: LifecycleConfig,
}

impl RoomLifecycle {
    pub fn new(
        store: Arc<dyn Datastore>,
        translator: Arc<dyn TranslationProvider>,
        config: LifecycleConfig,
    ) -> Self {
        Self { store, translator, presence: None, config }
    }

    /// Attach the optional disconnect hook.
    pub fn with_presence(mut self, presence: Arc<dyn Presence>) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn store(&self) -> Arc<dyn Datastore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Retried datastore primitives
    // -----------------------------------------------------------------------

    async fn get_value(&self, path: &str) -> Result<Option<Value>, ChatError> {
        with_backoff(&self.config.retry, || self.store.get(path))
            .await
            .map_err(ChatError::Store)
    }

    async fn set_value(&self, path: &str, value: &Value) -> Result<(), ChatError> {
        with_backoff(&self.config.retry, || self.store.set(path, value.clone()))
            .await
            .map_err(ChatError::Store)
    }

    async fn remove_value(&self, path: &str) -> Result<(), ChatError> {
        with_backoff(&self.config.retry, || self.store.remove(path))
            .await
            .map_err(ChatError::Store)
    }

    async fn fetch_room(&self, room_id: &str) -> Result<Option<RoomRecord>, ChatError> {
        let path = room_path(room_id);
        match self.get_value(&path).await? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ChatError::Corrupt { path, detail: e.to_string() }),
        }
    }

    // -----------------------------------------------------------------------
    // Presence (best-effort; failures never abort the operation)
    // -----------------------------------------------------------------------

    async fn arm_presence(&self, room_id: &str, user_id: &str) {
        if let Some(presence) = &self.presence {
            if let Err(err) = presence.arm_remove(&user_path(room_id, user_id)).await {
                warn!(room_id, user_id, error = %err, "could not arm disconnect hook");
            }
        }
    }

    async fn disarm_presence(&self) {
        if let Some(presence) = &self.presence {
            if let Err(err) = presence.disarm().await {
                warn!(error = %err, "could not disarm disconnect hook");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Join `room_id`, creating it when it does not exist.
    ///
    /// # Errors
    /// - [`ChatError::Auth`] on a password mismatch (never retried).
    /// - [`ChatError::Capacity`] when the room is full and `user_name` is
    ///   not already a member.
    /// - [`ChatError::Store`] when the datastore fails after retries; no
    ///   session state survives a failed join.
    pub async fn join(
        &self,
        room_id: &str,
        password: &str,
        user_name: &str,
        language: &str,
    ) -> Result<JoinGrant, ChatError> {
        let session = |user_id: String| Session {
            user: SessionUser {
                user_id,
                user_name: user_name.to_string(),
                language: language.to_string(),
            },
            room: SessionRoom { room_id: room_id.to_string(), password: password.to_string() },
        };

        let Some(record) = self.fetch_room(room_id).await? else {
            let user_id = new_user_id();
            let record = RoomRecord {
                password: password.to_string(),
                created_at: now_ms(),
                users: [(
                    user_id.clone(),
                    RoomUser {
                        name: user_name.to_string(),
                        language: language.to_string(),
                        joined_at: now_ms(),
                    },
                )]
                .into_iter()
                .collect(),
                messages: Default::default(),
                settings: None,
            };
            let value = encode(&room_path(room_id), &record)?;
            self.set_value(&room_path(room_id), &value).await?;
            self.arm_presence(room_id, &user_id).await;
            return Ok(JoinGrant { outcome: JoinOutcome::Created, session: session(user_id) });
        };

        if record.password != password {
            return Err(ChatError::Auth { room_id: room_id.to_string() });
        }

        // Same name: reconnection, not a second seat.
        if let Some(existing) = record.user_id_by_name(user_name) {
            let user_id = existing.to_string();
            self.arm_presence(room_id, &user_id).await;
            return Ok(JoinGrant { outcome: JoinOutcome::Rejoined, session: session(user_id) });
        }

        if record.users.len() >= self.config.max_users_per_room {
            return Err(ChatError::Capacity {
                room_id: room_id.to_string(),
                max_users: self.config.max_users_per_room,
            });
        }

        let user_id = new_user_id();
        let user = RoomUser {
            name: user_name.to_string(),
            language: language.to_string(),
            joined_at: now_ms(),
        };
        let value = encode(&user_path(room_id, &user_id), &user)?;
        self.set_value(&user_path(room_id, &user_id), &value).await?;
        self.arm_presence(room_id, &user_id).await;
        Ok(JoinGrant { outcome: JoinOutcome::Joined, session: session(user_id) })
    }

    /// Leave the room, consuming the session.
    ///
    /// Local membership is gone the moment this is called — the session
    /// cannot outlive a failed network operation. With `auto_delete_empty`
    /// the room (and all its messages) is removed once the last member is
    /// out; otherwise the record stays behind for [`sweep`](Self::sweep).
    pub async fn leave(&self, session: Session, auto_delete_empty: bool) -> Result<(), ChatError> {
        let Session { user, room } = session;
        self.disarm_presence().await;

        let result = self.leave_inner(&room.room_id, &user.user_id, auto_delete_empty).await;
        if let Err(err) = &result {
            warn!(
                room_id = %room.room_id,
                user_id = %user.user_id,
                error = %err,
                "leave failed after local session was cleared"
            );
        }
        result
    }

    async fn leave_inner(
        &self,
        room_id: &str,
        user_id: &str,
        auto_delete_empty: bool,
    ) -> Result<(), ChatError> {
        self.remove_value(&user_path(room_id, user_id)).await?;
        if auto_delete_empty {
            if let Some(record) = self.fetch_room(room_id).await? {
                if record.users.is_empty() {
                    self.remove_value(&room_path(room_id)).await?;
                }
            }
        }
        Ok(())
    }

    /// Password-gated hard delete of a room and everything under it.
    ///
    /// # Errors
    /// [`ChatError::Auth`] when the room is missing or the password does
    /// not match.
    pub async fn delete_room(&self, room_id: &str, password: &str) -> Result<(), ChatError> {
        let Some(record) = self.fetch_room(room_id).await? else {
            return Err(ChatError::Auth { room_id: room_id.to_string() });
        };
        if record.password != password {
            return Err(ChatError::Auth { room_id: room_id.to_string() });
        }
        self.remove_value(&room_path(room_id)).await
    }

    /// Translate and append a message.
    ///
    /// The peer check runs first: with fewer than two members present this
    /// fails [`ChatError::NoPeer`] and the translation collaborator is
    /// never invoked. Translation failures after retries follow
    /// [`LifecycleConfig::translation_fallback`].
    pub async fn send_message(
        &self,
        room_id: &str,
        sender: &str,
        sender_lang: &str,
        text: &str,
        target_lang: &str,
    ) -> Result<Message, ChatError> {
        let users =
            room::users_snapshot(self.get_value(&users_path(room_id)).await?.as_ref());
        if users.len() < 2 {
            return Err(ChatError::NoPeer { room_id: room_id.to_string() });
        }

        let translated = match with_backoff(&self.config.retry, || {
            self.translator.translate(text, target_lang, Some(sender_lang))
        })
        .await
        {
            Ok(translated) => translated,
            Err(err) => match self.config.translation_fallback {
                TranslationFallback::SendOriginal => {
                    warn!(room_id, error = %err, "translation failed, sending original text");
                    text.to_string()
                }
                TranslationFallback::Fail => return Err(ChatError::Translation(err)),
            },
        };

        let message_id = self.store.push_key(&messages_path(room_id));
        let message = Message {
            id: message_id.clone(),
            sender: sender.to_string(),
            sender_lang: sender_lang.to_string(),
            original_text: text.to_string(),
            translated_text: translated,
            timestamp: now_ms(),
        };
        let value = encode(&message_path(room_id, &message_id), &message)?;
        self.set_value(&message_path(room_id, &message_id), &value).await?;
        Ok(message)
    }

    /// Remove every message of a room while keeping the room alive.
    /// Destructive; the embedding UI confirms before calling.
    pub async fn clear_messages(&self, room_id: &str) -> Result<(), ChatError> {
        self.remove_value(&messages_path(room_id)).await
    }

    /// Partial update of the room-shared settings; both members observe
    /// the change through the settings subscription.
    pub async fn update_settings(
        &self,
        room_id: &str,
        settings: RoomSettings,
    ) -> Result<(), ChatError> {
        let path = settings_path(room_id);
        let value = encode(&path, &settings)?;
        let partial = match value {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        with_backoff(&self.config.retry, || self.store.update(&path, partial.clone()))
            .await
            .map_err(ChatError::Store)
    }

    /// Reclaim rooms that are empty or older than the retention window.
    ///
    /// Per-room failures are logged and skipped; removal is idempotent, so
    /// concurrent sweeps from both clients are harmless.
    pub async fn sweep(&self) -> Result<SweepReport, ChatError> {
        let Some(Value::Object(rooms)) = self.get_value("rooms").await? else {
            return Ok(SweepReport::default());
        };

        let now = now_ms();
        let retention_ms = self.config.room_retention.as_millis() as u64;
        let mut report = SweepReport::default();

        for (room_id, value) in rooms {
            report.examined += 1;
            let record: RoomRecord = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(err) => {
                    warn!(room_id = %room_id, error = %err, "skipping malformed room record");
                    continue;
                }
            };
            let empty = record.users.is_empty();
            let over_age = now.saturating_sub(record.created_at) > retention_ms;
            if !(empty || over_age) {
                continue;
            }
            match self.remove_value(&room_path(&room_id)).await {
                Ok(()) => report.removed += 1,
                Err(err) => {
                    warn!(room_id = %room_id, error = %err, "sweep could not remove room")
                }
            }
        }
        Ok(report)
    }
}

fn new_user_id() -> String {
    format!("user_{}", Uuid::new_v4().simple())
}

fn encode<T: serde::Serialize>(path: &str, value: &T) -> Result<Value, ChatError> {
    serde_json::to_value(value).map_err(|e| ChatError::Corrupt {
        path: path.to_string(),
        detail: e.to_string(),
    })
}
