//! Stored room records and the datastore paths they live under.
//!
//! ## Layout in the datastore
//! - `rooms/{roomId}` — [`RoomRecord`]: password, creation time, members,
//!   messages, shared settings.
//! - `rooms/{roomId}/users/{userId}` — [`RoomUser`].
//! - `rooms/{roomId}/messages/{messageId}` — [`Message`].
//! - `rooms/{roomId}/settings` — [`RoomSettings`].
//!
//! Records serialize with camelCase keys; that is the collaborator-side
//! contract, not this crate's API style. Display order of messages is by
//! `timestamp`, never arrival order.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default member cap for a two-party room.
pub const DEFAULT_MAX_USERS: usize = 2;

/// One member of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUser {
    pub name: String,
    pub language: String,
    pub joined_at: u64,
}

/// One chat message, stored with both the original and the translated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub sender_lang: String,
    pub original_text: String,
    pub translated_text: String,
    pub timestamp: u64,
}

/// Room-scoped toggles shared between the two parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    /// Delete the room immediately when the last member leaves.
    pub auto_delete_empty: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self { auto_delete_empty: true }
    }
}

/// The whole record stored under `rooms/{roomId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub password: String,
    pub created_at: u64,
    #[serde(default)]
    pub users: HashMap<String, RoomUser>,
    #[serde(default)]
    pub messages: HashMap<String, Message>,
    #[serde(default)]
    pub settings: Option<RoomSettings>,
}

impl RoomRecord {
    /// Find the id of the member with `name`, if present.
    pub fn user_id_by_name(&self, name: &str) -> Option<&str> {
        self.users
            .iter()
            .find(|(_, u)| u.name == name)
            .map(|(id, _)| id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

pub fn room_path(room_id: &str) -> String {
    format!("rooms/{room_id}")
}

pub fn users_path(room_id: &str) -> String {
    format!("rooms/{room_id}/users")
}

pub fn user_path(room_id: &str, user_id: &str) -> String {
    format!("rooms/{room_id}/users/{user_id}")
}

pub fn messages_path(room_id: &str) -> String {
    format!("rooms/{room_id}/messages")
}

pub fn message_path(room_id: &str, message_id: &str) -> String {
    format!("rooms/{room_id}/messages/{message_id}")
}

pub fn settings_path(room_id: &str) -> String {
    format!("rooms/{room_id}/settings")
}

// ---------------------------------------------------------------------------
// Snapshot helpers
// ---------------------------------------------------------------------------

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Turn a `rooms/{id}/messages` snapshot into a display-ordered list.
///
/// Entries that fail to deserialize are dropped; ordering is by
/// `timestamp` (stable, so same-timestamp messages keep map-arrival
/// order relative to each other).
pub fn messages_snapshot(value: Option<&Value>) -> Vec<Message> {
    let mut messages: Vec<Message> = match value {
        Some(Value::Object(map)) => map
            .values()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect(),
        _ => Vec::new(),
    };
    messages.sort_by_key(|m| m.timestamp);
    messages
}

/// Turn a `rooms/{id}/users` snapshot into a join-ordered member list.
pub fn users_snapshot(value: Option<&Value>) -> Vec<RoomUser> {
    let mut users: Vec<RoomUser> = match value {
        Some(Value::Object(map)) => map
            .values()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect(),
        _ => Vec::new(),
    };
    users.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.name.cmp(&b.name)));
    users
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(id: &str, timestamp: u64) -> Value {
        json!({
            "id": id,
            "sender": "Alice",
            "senderLang": "en",
            "originalText": "hello",
            "translatedText": "hola",
            "timestamp": timestamp,
        })
    }

    // -- paths ---------------------------------------------------------------

    #[test]
    fn test_room_path() {
        assert_eq!(room_path("room123"), "rooms/room123");
    }

    #[test]
    fn test_user_path() {
        assert_eq!(user_path("room123", "u1"), "rooms/room123/users/u1");
    }

    #[test]
    fn test_message_path_nests_under_messages() {
        let p = message_path("r", "m1");
        assert!(p.starts_with(&messages_path("r")));
    }

    #[test]
    fn test_settings_path() {
        assert_eq!(settings_path("r"), "rooms/r/settings");
    }

    // -- serde shapes --------------------------------------------------------

    #[test]
    fn test_room_user_serializes_camel_case() {
        let user = RoomUser { name: "Alice".to_string(), language: "en".to_string(), joined_at: 7 };
        let json = serde_json::to_string(&user).expect("serialize");
        assert!(json.contains("\"joinedAt\":7"), "json: {json}");
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let v: Value = serde_json::to_value(Message {
            id: "m1".to_string(),
            sender: "Alice".to_string(),
            sender_lang: "en".to_string(),
            original_text: "hi".to_string(),
            translated_text: "hola".to_string(),
            timestamp: 9,
        })
        .expect("to_value");
        assert_eq!(v["originalText"], "hi");
        assert_eq!(v["translatedText"], "hola");
        assert_eq!(v["senderLang"], "en");
    }

    #[test]
    fn test_room_record_missing_maps_default_empty() {
        let record: RoomRecord =
            serde_json::from_value(json!({"password": "secret", "createdAt": 1})).expect("deser");
        assert!(record.users.is_empty());
        assert!(record.messages.is_empty());
        assert!(record.settings.is_none());
    }

    #[test]
    fn test_room_record_roundtrip() {
        let mut users = HashMap::new();
        users.insert(
            "u1".to_string(),
            RoomUser { name: "Alice".to_string(), language: "en".to_string(), joined_at: 5 },
        );
        let record = RoomRecord {
            password: "secret".to_string(),
            created_at: 1,
            users,
            messages: HashMap::new(),
            settings: Some(RoomSettings { auto_delete_empty: false }),
        };
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["createdAt"], 1);
        let back: RoomRecord = serde_json::from_value(json).expect("deser");
        assert_eq!(back, record);
    }

    #[test]
    fn test_user_id_by_name_found() {
        let mut users = HashMap::new();
        users.insert(
            "u9".to_string(),
            RoomUser { name: "Bob".to_string(), language: "ja".to_string(), joined_at: 2 },
        );
        let record = RoomRecord {
            password: String::new(),
            created_at: 0,
            users,
            messages: HashMap::new(),
            settings: None,
        };
        assert_eq!(record.user_id_by_name("Bob"), Some("u9"));
        assert_eq!(record.user_id_by_name("Carol"), None);
    }

    #[test]
    fn test_room_settings_default_deletes_immediately() {
        assert!(RoomSettings::default().auto_delete_empty);
    }

    // -- snapshots -----------------------------------------------------------

    #[test]
    fn test_messages_snapshot_sorted_by_timestamp() {
        let value = json!({
            "m3": message("m3", 30),
            "m1": message("m1", 10),
            "m2": message("m2", 20),
        });
        let messages = messages_snapshot(Some(&value));
        let order: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_messages_snapshot_none_is_empty() {
        assert!(messages_snapshot(None).is_empty());
    }

    #[test]
    fn test_messages_snapshot_non_object_is_empty() {
        assert!(messages_snapshot(Some(&json!("garbage"))).is_empty());
    }

    #[test]
    fn test_messages_snapshot_drops_malformed_entries() {
        let value = json!({
            "m1": message("m1", 10),
            "bad": {"nope": true},
        });
        let messages = messages_snapshot(Some(&value));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m1");
    }

    #[test]
    fn test_users_snapshot_ordered_by_join_time() {
        let value = json!({
            "u2": {"name": "Bob", "language": "ja", "joinedAt": 20},
            "u1": {"name": "Alice", "language": "en", "joinedAt": 10},
        });
        let users = users_snapshot(Some(&value));
        assert_eq!(users[0].name, "Alice");
        assert_eq!(users[1].name, "Bob");
    }

    #[test]
    fn test_users_snapshot_tie_breaks_by_name() {
        let value = json!({
            "u2": {"name": "Bob", "language": "ja", "joinedAt": 10},
            "u1": {"name": "Alice", "language": "en", "joinedAt": 10},
        });
        let users = users_snapshot(Some(&value));
        assert_eq!(users[0].name, "Alice");
    }

    #[test]
    fn test_now_ms_plausible_epoch() {
        assert!(now_ms() > 1_704_067_200_000, "now_ms() appears to predate 2024");
    }
}
