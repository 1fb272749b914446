//! Message entity model.
//!
//! A message is visible in at most one conversation or hidden in at most one
//! conversation, never both (enforced by a CHECK constraint). Deleting for
//! everyone turns it into a tombstone: content gone, visible reference moved
//! to the hidden one.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use pl_core::constants::OBFUSCATION_ALPHABET;
use pl_core::error::{PlError, PlResult};
use pl_core::ContextKind;

use super::category::MessageCategory;
use super::db_err;
use super::destruction::PendingDestruction;
use super::user::User;

/// Content kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Location,
    Knock,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::Location => "location",
            MessageKind::Knock => "knock",
            MessageKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "file" => Some(MessageKind::File),
            "location" => Some(MessageKind::Location),
            "knock" => Some(MessageKind::Knock),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

/// Kind of a system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMessageType {
    MissedCall,
    PerformedCall,
}

impl SystemMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemMessageType::MissedCall => "missed_call",
            SystemMessageType::PerformedCall => "performed_call",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missed_call" => Some(SystemMessageType::MissedCall),
            "performed_call" => Some(SystemMessageType::PerformedCall),
            _ => None,
        }
    }
}

/// Delivery state, derived from confirmations, event id and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Invalid,
    Pending,
    Sent,
    Delivered,
    FailedToSend,
}

impl DeliveryState {
    /// Confirmations win over an event id, which wins over expiry.
    pub fn derive(has_confirmations: bool, has_event_id: bool, is_expired: bool) -> Self {
        if has_confirmations {
            DeliveryState::Delivered
        } else if has_event_id {
            DeliveryState::Sent
        } else if is_expired {
            DeliveryState::FailedToSend
        } else {
            DeliveryState::Pending
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryState::Invalid => "invalid",
            DeliveryState::Pending => "pending",
            DeliveryState::Sent => "sent",
            DeliveryState::Delivered => "delivered",
            DeliveryState::FailedToSend => "failed",
        };
        f.write_str(s)
    }
}

/// A single message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<i64>,
    pub nonce: String,
    pub sender_id: Option<i64>,
    pub visible_in_conversation_id: Option<i64>,
    pub hidden_in_conversation_id: Option<i64>,
    pub server_timestamp: Option<DateTime<Utc>>,
    pub local_timestamp: DateTime<Utc>,
    pub event_id: Option<String>,
    pub is_expired: bool,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub mime_type: Option<String>,
    #[serde(skip)]
    pub asset_data: Option<Vec<u8>>,
    pub system_type: Option<SystemMessageType>,
    /// Call duration in seconds (performed calls).
    pub duration: Option<i64>,
    pub parent_message_id: Option<i64>,
    pub cached_category: Option<MessageCategory>,
    pub is_ephemeral: bool,
    pub destruction_timeout_ms: Option<i64>,
    pub is_obfuscated: bool,

    /// Context this instance was loaded in. Not persisted.
    #[serde(skip)]
    pub context: Option<ContextKind>,
}

impl Message {
    /// A new, unsaved message of the given kind.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            id: None,
            nonce: uuid::Uuid::new_v4().to_string(),
            sender_id: None,
            visible_in_conversation_id: None,
            hidden_in_conversation_id: None,
            server_timestamp: None,
            local_timestamp: Utc::now(),
            event_id: None,
            is_expired: false,
            kind,
            text: None,
            mime_type: None,
            asset_data: None,
            system_type: None,
            duration: None,
            parent_message_id: None,
            cached_category: None,
            is_ephemeral: false,
            destruction_timeout_ms: None,
            is_obfuscated: false,
            context: None,
        }
    }

    pub fn text(sender_id: i64, text: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageKind::Text);
        msg.sender_id = Some(sender_id);
        msg.text = Some(text.into());
        msg
    }

    pub fn image(sender_id: i64, data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageKind::Image);
        msg.sender_id = Some(sender_id);
        msg.asset_data = Some(data);
        msg.mime_type = Some(mime_type.into());
        msg
    }

    pub fn file(sender_id: i64, data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageKind::File);
        msg.sender_id = Some(sender_id);
        msg.asset_data = Some(data);
        msg.mime_type = Some(mime_type.into());
        msg
    }

    pub fn location(sender_id: i64, label: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageKind::Location);
        msg.sender_id = Some(sender_id);
        msg.text = Some(label.into());
        msg
    }

    pub fn knock(sender_id: i64) -> Self {
        let mut msg = Self::new(MessageKind::Knock);
        msg.sender_id = Some(sender_id);
        msg
    }

    pub fn system(system_type: SystemMessageType, sender_id: i64) -> Self {
        let mut msg = Self::new(MessageKind::System);
        msg.sender_id = Some(sender_id);
        msg.system_type = Some(system_type);
        msg
    }

    /// Mark as ephemeral with the given self-destruct timeout.
    pub fn with_destruction_timeout(mut self, timeout: Duration) -> Self {
        self.is_ephemeral = true;
        self.destruction_timeout_ms = Some(timeout.as_millis() as i64);
        self
    }

    pub fn with_server_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.server_timestamp = Some(at);
        self
    }

    /// Construct a Message from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get("kind")?;
        let system_type: Option<String> = row.get("system_type")?;
        Ok(Self {
            id: row.get("id")?,
            nonce: row.get("nonce")?,
            sender_id: row.get("sender_id")?,
            visible_in_conversation_id: row.get("visible_in_conversation_id")?,
            hidden_in_conversation_id: row.get("hidden_in_conversation_id")?,
            server_timestamp: row
                .get::<_, Option<i64>>("server_timestamp")?
                .map(from_millis),
            local_timestamp: from_millis(row.get("local_timestamp")?),
            event_id: row.get("event_id")?,
            is_expired: row.get::<_, i32>("is_expired")? != 0,
            kind: MessageKind::parse(&kind).unwrap_or(MessageKind::Text),
            text: row.get("text")?,
            mime_type: row.get("mime_type")?,
            asset_data: row.get("asset_data")?,
            system_type: system_type.as_deref().and_then(SystemMessageType::parse),
            duration: row.get("duration")?,
            parent_message_id: row.get("parent_message_id")?,
            cached_category: row
                .get::<_, Option<i64>>("cached_category")?
                .filter(|bits| *bits != 0)
                .map(|bits| MessageCategory::from_bits(bits as u32)),
            is_ephemeral: row.get::<_, i32>("is_ephemeral")? != 0,
            destruction_timeout_ms: row.get("destruction_timeout_ms")?,
            is_obfuscated: row.get::<_, i32>("is_obfuscated")? != 0,
            context: None,
        })
    }

    // ─── Static finders ──────────────────────────────────────────────────

    /// Find a message by its local database ID.
    pub fn find_by_id(conn: &Connection, id: i64) -> PlResult<Option<Self>> {
        match conn.query_row("SELECT * FROM messages WHERE id = ?1", [id], Self::from_row) {
            Ok(msg) => Ok(Some(msg)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PlError::Database(e.to_string())),
        }
    }

    /// Load messages by id, in the order the ids were given.
    /// Ids with no row are skipped.
    pub fn find_by_ids(conn: &Connection, ids: &[i64]) -> PlResult<Vec<Self>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("SELECT * FROM messages WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let mut by_id: HashMap<i64, Message> = stmt
            .query_map(params_from_iter(ids.iter()), Self::from_row)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .filter_map(|m| m.id.map(|id| (id, m)))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Hard-delete a message row. Reactions, confirmations and owed timers
    /// cascade. Returns whether a row was removed.
    pub fn delete(conn: &Connection, id: i64) -> PlResult<bool> {
        let n = conn
            .execute("DELETE FROM messages WHERE id = ?1", [id])
            .map_err(db_err)?;
        Ok(n > 0)
    }

    /// Erase messages that belong to no conversation. Returns the count.
    pub fn purge_orphans(conn: &Connection) -> PlResult<usize> {
        conn.execute(
            "DELETE FROM messages
             WHERE visible_in_conversation_id IS NULL AND hidden_in_conversation_id IS NULL",
            [],
        )
        .map_err(db_err)
    }

    // ─── Derived state ───────────────────────────────────────────────────

    /// Effective conversation: visible-in, else hidden-in.
    pub fn conversation_id(&self) -> Option<i64> {
        self.visible_in_conversation_id
            .or(self.hidden_in_conversation_id)
    }

    /// Deleted for everyone (or superseded): hidden but no longer visible.
    pub fn has_been_deleted(&self) -> bool {
        self.visible_in_conversation_id.is_none() && self.hidden_in_conversation_id.is_some()
    }

    /// Belongs to no conversation and is eligible for erasure.
    pub fn is_orphaned(&self) -> bool {
        self.conversation_id().is_none()
    }

    /// Timestamp used for newest-first ordering.
    pub fn sort_timestamp(&self) -> DateTime<Utc> {
        self.server_timestamp.unwrap_or(self.local_timestamp)
    }

    pub fn destruction_timeout(&self) -> Option<Duration> {
        self.destruction_timeout_ms
            .filter(|ms| *ms >= 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }

    pub fn delivery_state(&self, conn: &Connection) -> PlResult<DeliveryState> {
        if self.id.is_none() || self.is_orphaned() {
            return Ok(DeliveryState::Invalid);
        }
        let confirmations = self.confirmation_count(conn)?;
        Ok(DeliveryState::derive(
            confirmations > 0,
            self.event_id.is_some(),
            self.is_expired,
        ))
    }

    /// Only messages that reached a settled delivery state may be deleted.
    pub fn can_be_deleted(&self, conn: &Connection) -> PlResult<bool> {
        Ok(matches!(
            self.delivery_state(conn)?,
            DeliveryState::Delivered | DeliveryState::Sent | DeliveryState::FailedToSend
        ))
    }

    /// Short human-readable preview.
    pub fn preview(&self) -> String {
        match self.kind {
            MessageKind::Text | MessageKind::Location => self.text.clone().unwrap_or_default(),
            MessageKind::Image | MessageKind::File => format!(
                "[{}: {} bytes]",
                self.mime_type.as_deref().unwrap_or("asset"),
                self.asset_data.as_ref().map(Vec::len).unwrap_or(0)
            ),
            MessageKind::Knock => "[knock]".to_string(),
            MessageKind::System => match (self.system_type, self.duration) {
                (Some(t), Some(d)) => format!("[{} {}s]", t.as_str(), d),
                (Some(t), None) => format!("[{}]", t.as_str()),
                (None, _) => "[system]".to_string(),
            },
        }
    }

    fn require_id(&self) -> PlResult<i64> {
        self.id
            .ok_or_else(|| PlError::InvalidMessageState("message has not been saved".into()))
    }

    // ─── Persistence ─────────────────────────────────────────────────────

    /// Insert this message. Returns the new local id.
    pub fn insert(&mut self, conn: &Connection) -> PlResult<i64> {
        conn.execute(
            "INSERT INTO messages (
                nonce, sender_id, visible_in_conversation_id, hidden_in_conversation_id,
                server_timestamp, local_timestamp, event_id, is_expired, kind, text,
                mime_type, asset_data, system_type, duration, parent_message_id,
                cached_category, is_ephemeral, destruction_timeout_ms, is_obfuscated
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                self.nonce,
                self.sender_id,
                self.visible_in_conversation_id,
                self.hidden_in_conversation_id,
                self.server_timestamp.map(|t| t.timestamp_millis()),
                self.local_timestamp.timestamp_millis(),
                self.event_id,
                self.is_expired as i32,
                self.kind.as_str(),
                self.text,
                self.mime_type,
                self.asset_data,
                self.system_type.map(|t| t.as_str()),
                self.duration,
                self.parent_message_id,
                self.cached_category.map(|c| c.bits() as i64),
                self.is_ephemeral as i32,
                self.destruction_timeout_ms,
                self.is_obfuscated as i32,
            ],
        )
        .map_err(db_err)?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Store the memoized category.
    pub fn set_cached_category(
        &mut self,
        conn: &Connection,
        category: MessageCategory,
    ) -> PlResult<()> {
        let id = self.require_id()?;
        conn.execute(
            "UPDATE messages SET cached_category = ?1 WHERE id = ?2",
            params![category.bits() as i64, id],
        )
        .map_err(db_err)?;
        self.cached_category = Some(category);
        Ok(())
    }

    /// Record the server acknowledgement.
    pub fn mark_sent(&mut self, conn: &Connection, event_id: &str, at: DateTime<Utc>) -> PlResult<()> {
        let id = self.require_id()?;
        conn.execute(
            "UPDATE messages SET event_id = ?1, server_timestamp = ?2 WHERE id = ?3",
            params![event_id, at.timestamp_millis(), id],
        )
        .map_err(db_err)?;
        self.event_id = Some(event_id.to_string());
        self.server_timestamp = Some(at);
        Ok(())
    }

    pub fn mark_expired(&mut self, conn: &Connection) -> PlResult<()> {
        let id = self.require_id()?;
        conn.execute("UPDATE messages SET is_expired = 1 WHERE id = ?1", [id])
            .map_err(db_err)?;
        self.is_expired = true;
        Ok(())
    }

    // ─── Confirmations & reactions ───────────────────────────────────────

    pub fn add_confirmation(&self, conn: &Connection, user_id: i64) -> PlResult<()> {
        let id = self.require_id()?;
        conn.execute(
            "INSERT OR IGNORE INTO message_confirmations (message_id, user_id, confirmed_at)
             VALUES (?1, ?2, ?3)",
            params![id, user_id, Utc::now().timestamp_millis()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn confirmation_count(&self, conn: &Connection) -> PlResult<i64> {
        let id = self.require_id()?;
        conn.query_row(
            "SELECT COUNT(*) FROM message_confirmations WHERE message_id = ?1",
            [id],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    pub fn add_reaction(&self, conn: &Connection, unicode_value: &str, user_id: i64) -> PlResult<()> {
        let id = self.require_id()?;
        conn.execute(
            "INSERT OR IGNORE INTO reactions (message_id, unicode_value, user_id) VALUES (?1, ?2, ?3)",
            params![id, unicode_value, user_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn remove_reaction(
        &self,
        conn: &Connection,
        unicode_value: &str,
        user_id: i64,
    ) -> PlResult<()> {
        let id = self.require_id()?;
        conn.execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND unicode_value = ?2 AND user_id = ?3",
            params![id, unicode_value, user_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Emoji to reacting users. Emoji nobody currently uses are absent.
    pub fn users_reaction(&self, conn: &Connection) -> PlResult<BTreeMap<String, Vec<User>>> {
        let id = self.require_id()?;
        let mut stmt = conn
            .prepare(
                "SELECT r.unicode_value, u.* FROM reactions r
                 JOIN users u ON u.id = r.user_id
                 WHERE r.message_id = ?1
                 ORDER BY r.unicode_value, u.id",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map([id], |row| Ok((row.get::<_, String>(0)?, User::from_row(row)?)))
            .map_err(db_err)?;

        let mut result: BTreeMap<String, Vec<User>> = BTreeMap::new();
        for (emoji, user) in rows.filter_map(|r| r.ok()) {
            result.entry(emoji).or_default().push(user);
        }
        Ok(result)
    }

    // ─── System message linkage ──────────────────────────────────────────

    pub fn add_system_user(&self, conn: &Connection, user_id: i64) -> PlResult<()> {
        let id = self.require_id()?;
        conn.execute(
            "INSERT OR IGNORE INTO system_message_users (message_id, user_id) VALUES (?1, ?2)",
            params![id, user_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Ids of the users involved in this system message.
    pub fn system_users(&self, conn: &Connection) -> PlResult<Vec<i64>> {
        let id = self.require_id()?;
        let mut stmt = conn
            .prepare("SELECT user_id FROM system_message_users WHERE message_id = ?1 ORDER BY user_id")
            .map_err(db_err)?;
        let users = stmt
            .query_map([id], |row| row.get(0))
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(users)
    }

    /// Merged call events attached to this parent, oldest first.
    pub fn child_messages(&self, conn: &Connection) -> PlResult<Vec<Message>> {
        let id = self.require_id()?;
        let mut stmt = conn
            .prepare("SELECT * FROM messages WHERE parent_message_id = ?1 ORDER BY id")
            .map_err(db_err)?;
        let children = stmt
            .query_map([id], Self::from_row)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(children)
    }

    pub fn parent_message(&self, conn: &Connection) -> PlResult<Option<Message>> {
        match self.parent_message_id {
            Some(parent_id) => Self::find_by_id(conn, parent_id),
            None => Ok(None),
        }
    }

    // ─── Destruction ─────────────────────────────────────────────────────

    /// Scrub content in place, keeping identity and metadata.
    ///
    /// Text becomes random characters of the same length (whitespace kept),
    /// asset bytes are dropped. The category is reset so the next scan
    /// recomputes it.
    pub fn obfuscate(&mut self, conn: &Connection) -> PlResult<()> {
        let id = self.require_id()?;
        if self.is_obfuscated {
            return Ok(());
        }

        let placeholder = self.text.as_deref().map(obfuscated_text);
        conn.execute(
            "UPDATE messages SET text = ?1, asset_data = NULL, is_obfuscated = 1, cached_category = NULL
             WHERE id = ?2",
            params![placeholder, id],
        )
        .map_err(db_err)?;

        self.text = placeholder;
        self.asset_data = None;
        self.is_obfuscated = true;
        self.cached_category = None;
        debug!(message_id = id, "message obfuscated");
        Ok(())
    }

    /// Turn the message into a tombstone hidden in its former conversation.
    ///
    /// Content, reactions and owed timers are removed in one transaction.
    /// Already-deleted messages are left alone.
    pub fn delete_for_everyone(&mut self, conn: &Connection) -> PlResult<()> {
        let id = self.require_id()?;
        if self.has_been_deleted() {
            return Ok(());
        }
        let conversation_id = self.visible_in_conversation_id.ok_or_else(|| {
            PlError::InvalidMessageState(format!("message {id} is not in a conversation"))
        })?;

        let tx = conn.unchecked_transaction().map_err(db_err)?;
        tx.execute(
            "UPDATE messages SET
                text = NULL, asset_data = NULL, mime_type = NULL, cached_category = NULL,
                visible_in_conversation_id = NULL, hidden_in_conversation_id = ?1
             WHERE id = ?2",
            params![conversation_id, id],
        )
        .map_err(db_err)?;
        tx.execute("DELETE FROM reactions WHERE message_id = ?1", [id])
            .map_err(db_err)?;
        PendingDestruction::delete_for_message(&tx, id)?;
        // A deleted call parent can no longer absorb children.
        tx.execute(
            "UPDATE conversations SET last_call_parent_id = NULL, last_call_type = NULL, last_call_user_id = NULL
             WHERE last_call_parent_id = ?1",
            [id],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        self.text = None;
        self.asset_data = None;
        self.mime_type = None;
        self.cached_category = None;
        self.visible_in_conversation_id = None;
        self.hidden_in_conversation_id = Some(conversation_id);
        debug!(message_id = id, conversation_id, "message deleted for everyone");
        Ok(())
    }
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn obfuscated_text(original: &str) -> String {
    let mut rng = rand::thread_rng();
    original
        .chars()
        .map(|c| {
            if c.is_whitespace() {
                c
            } else {
                OBFUSCATION_ALPHABET[rng.gen_range(0..OBFUSCATION_ALPHABET.len())] as char
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn setup() -> (Connection, i64, i64) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        schema::create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO conversations (remote_id, created_at) VALUES ('conv', 0)",
            [],
        )
        .unwrap();
        let conversation_id = conn.last_insert_rowid();
        let mut user = User::new("Ann");
        let user_id = user.save(&conn).unwrap();
        (conn, conversation_id, user_id)
    }

    fn visible_text(conn: &Connection, conversation_id: i64, user_id: i64, text: &str) -> Message {
        let mut msg = Message::text(user_id, text);
        msg.visible_in_conversation_id = Some(conversation_id);
        msg.insert(conn).unwrap();
        msg
    }

    #[test]
    fn test_delivery_state_precedence() {
        assert_eq!(DeliveryState::derive(true, true, true), DeliveryState::Delivered);
        assert_eq!(DeliveryState::derive(false, true, true), DeliveryState::Sent);
        assert_eq!(DeliveryState::derive(false, false, true), DeliveryState::FailedToSend);
        assert_eq!(DeliveryState::derive(false, false, false), DeliveryState::Pending);
    }

    #[test]
    fn test_delivery_state_from_store() {
        let (conn, conv, user) = setup();
        let mut msg = visible_text(&conn, conv, user, "hi");
        assert_eq!(msg.delivery_state(&conn).unwrap(), DeliveryState::Pending);
        assert!(!msg.can_be_deleted(&conn).unwrap());

        msg.mark_sent(&conn, "evt-1", Utc::now()).unwrap();
        assert_eq!(msg.delivery_state(&conn).unwrap(), DeliveryState::Sent);

        msg.add_confirmation(&conn, user).unwrap();
        assert_eq!(msg.delivery_state(&conn).unwrap(), DeliveryState::Delivered);
        assert!(msg.can_be_deleted(&conn).unwrap());
    }

    #[test]
    fn test_unsaved_message_is_invalid() {
        let (conn, _, user) = setup();
        let msg = Message::text(user, "draft");
        assert_eq!(msg.delivery_state(&conn).unwrap(), DeliveryState::Invalid);
    }

    #[test]
    fn test_users_reaction_groups_by_emoji() {
        let (conn, conv, ann) = setup();
        let mut bob = User::new("Bob");
        let bob = bob.save(&conn).unwrap();
        let msg = visible_text(&conn, conv, ann, "hi");

        msg.add_reaction(&conn, "❤️", ann).unwrap();
        msg.add_reaction(&conn, "❤️", bob).unwrap();
        msg.add_reaction(&conn, "👍", bob).unwrap();
        msg.remove_reaction(&conn, "👍", bob).unwrap();

        let reactions = msg.users_reaction(&conn).unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions["❤️"].len(), 2);
    }

    #[test]
    fn test_obfuscate_keeps_identity() {
        let (conn, conv, user) = setup();
        let mut msg = visible_text(&conn, conv, user, "secret words");
        let nonce = msg.nonce.clone();

        msg.obfuscate(&conn).unwrap();

        let stored = Message::find_by_id(&conn, msg.id.unwrap()).unwrap().unwrap();
        assert!(stored.is_obfuscated);
        assert_eq!(stored.nonce, nonce);
        assert_eq!(stored.visible_in_conversation_id, Some(conv));
        let text = stored.text.unwrap();
        assert_ne!(text, "secret words");
        assert_eq!(text.chars().count(), "secret words".chars().count());
        assert_eq!(text.chars().nth(6), Some(' '));
    }

    #[test]
    fn test_delete_for_everyone_makes_tombstone() {
        let (conn, conv, user) = setup();
        let mut msg = visible_text(&conn, conv, user, "bye");
        msg.add_reaction(&conn, "👍", user).unwrap();

        msg.delete_for_everyone(&conn).unwrap();
        assert!(msg.has_been_deleted());

        let stored = Message::find_by_id(&conn, msg.id.unwrap()).unwrap().unwrap();
        assert_eq!(stored.visible_in_conversation_id, None);
        assert_eq!(stored.hidden_in_conversation_id, Some(conv));
        assert_eq!(stored.conversation_id(), Some(conv));
        assert!(stored.text.is_none());
        assert!(stored.users_reaction(&conn).unwrap().is_empty());

        // idempotent
        msg.delete_for_everyone(&conn).unwrap();
    }

    #[test]
    fn test_purge_orphans() {
        let (conn, conv, user) = setup();
        visible_text(&conn, conv, user, "kept");
        let mut orphan = Message::text(user, "lost");
        orphan.insert(&conn).unwrap();

        assert_eq!(Message::purge_orphans(&conn).unwrap(), 1);
        assert!(Message::find_by_id(&conn, orphan.id.unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_find_by_ids_preserves_order() {
        let (conn, conv, user) = setup();
        let a = visible_text(&conn, conv, user, "a").id.unwrap();
        let b = visible_text(&conn, conv, user, "b").id.unwrap();
        let c = visible_text(&conn, conv, user, "c").id.unwrap();

        let loaded = Message::find_by_ids(&conn, &[c, 999, a, b]).unwrap();
        let ids: Vec<i64> = loaded.iter().filter_map(|m| m.id).collect();
        assert_eq!(ids, vec![c, a, b]);
    }

    #[test]
    fn test_zero_category_reads_as_uncached() {
        let (conn, conv, user) = setup();
        let msg = visible_text(&conn, conv, user, "x");
        conn.execute(
            "UPDATE messages SET cached_category = 0 WHERE id = ?1",
            [msg.id.unwrap()],
        )
        .unwrap();
        let stored = Message::find_by_id(&conn, msg.id.unwrap()).unwrap().unwrap();
        assert!(stored.cached_category.is_none());
    }
}
