//! Conversation entity model and message appending.
//!
//! Call events are merged: consecutive call events of the same type started
//! by the same user collapse into one visible parent with hidden children.
//! The merge state is the last parent call recorded on the conversation row,
//! cleared by any other append.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use pl_core::error::{PlError, PlResult};

use super::db_err;
use super::message::{from_millis, Message, SystemMessageType};

/// The most recent parent call event in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCallEvent {
    pub parent_id: i64,
    pub system_type: SystemMessageType,
    pub user_id: i64,
}

/// Where a new call event goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallPlacement {
    NewParent,
    ChildOf(i64),
}

impl CallPlacement {
    fn decide(last: Option<LastCallEvent>, system_type: SystemMessageType, user_id: i64) -> Self {
        match last {
            Some(last) if last.system_type == system_type && last.user_id == user_id => {
                CallPlacement::ChildOf(last.parent_id)
            }
            _ => CallPlacement::NewParent,
        }
    }
}

/// A conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Option<i64>,
    pub remote_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_call: Option<LastCallEvent>,
}

impl Conversation {
    /// A new, unsaved conversation with a fresh remote id.
    pub fn new(display_name: Option<String>) -> Self {
        Self {
            id: None,
            remote_id: uuid::Uuid::new_v4().to_string(),
            display_name,
            created_at: Utc::now(),
            last_call: None,
        }
    }

    /// Construct a Conversation from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let last_call = last_call_from_columns(
            row.get("last_call_parent_id")?,
            row.get("last_call_type")?,
            row.get("last_call_user_id")?,
        );

        Ok(Self {
            id: row.get("id")?,
            remote_id: row.get("remote_id")?,
            display_name: row.get("display_name")?,
            created_at: from_millis(row.get("created_at")?),
            last_call,
        })
    }

    // ─── Static finders ──────────────────────────────────────────────────

    pub fn find_by_id(conn: &Connection, id: i64) -> PlResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM conversations WHERE id = ?1",
            [id],
            Self::from_row,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PlError::Database(e.to_string())),
        }
    }

    /// Like [`find_by_id`](Self::find_by_id) but a missing row is an error.
    pub fn get(conn: &Connection, id: i64) -> PlResult<Self> {
        Self::find_by_id(conn, id)?
            .ok_or_else(|| PlError::ConversationNotFound(id.to_string()))
    }

    // ─── Persistence ─────────────────────────────────────────────────────

    pub fn insert(&mut self, conn: &Connection) -> PlResult<i64> {
        conn.execute(
            "INSERT INTO conversations (remote_id, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![
                self.remote_id,
                self.display_name,
                self.created_at.timestamp_millis()
            ],
        )
        .map_err(db_err)?;
        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    fn require_id(&self) -> PlResult<i64> {
        self.id
            .ok_or_else(|| PlError::ConversationNotFound("conversation has not been saved".into()))
    }

    fn store_last_call(&mut self, conn: &Connection, last: Option<LastCallEvent>) -> PlResult<()> {
        let id = self.require_id()?;
        conn.execute(
            "UPDATE conversations SET last_call_parent_id = ?1, last_call_type = ?2, last_call_user_id = ?3
             WHERE id = ?4",
            params![
                last.map(|l| l.parent_id),
                last.map(|l| l.system_type.as_str()),
                last.map(|l| l.user_id),
                id
            ],
        )
        .map_err(db_err)?;
        self.last_call = last;
        Ok(())
    }

    /// Merge state as stored now, not as cached on this value. Another handle
    /// on the same row may have appended or deleted since this one was
    /// loaded. A parent that is no longer the newest visible message cannot
    /// absorb children.
    fn current_last_call(&mut self, conn: &Connection) -> PlResult<Option<LastCallEvent>> {
        let id = self.require_id()?;
        let stored = conn
            .query_row(
                "SELECT last_call_parent_id, last_call_type, last_call_user_id FROM conversations WHERE id = ?1",
                [id],
                |row| Ok(last_call_from_columns(row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => PlError::ConversationNotFound(id.to_string()),
                e => db_err(e),
            })?;

        let last = match stored {
            Some(last) => {
                let newest: Option<i64> = conn
                    .query_row(
                        "SELECT MAX(id) FROM messages WHERE visible_in_conversation_id = ?1",
                        [id],
                        |row| row.get(0),
                    )
                    .map_err(db_err)?;
                (newest == Some(last.parent_id)).then_some(last)
            }
            None => None,
        };
        self.last_call = last;
        Ok(last)
    }

    // ─── Appending ───────────────────────────────────────────────────────

    /// Append a non-call message as visible. Breaks any pending call merge.
    pub fn append_message(&mut self, conn: &Connection, mut message: Message) -> PlResult<Message> {
        let id = self.require_id()?;
        message.visible_in_conversation_id = Some(id);
        message.hidden_in_conversation_id = None;
        message.insert(conn)?;
        // Cleared on the row even when this handle saw no pending merge.
        self.store_last_call(conn, None)?;
        Ok(message)
    }

    pub fn append_text(&mut self, conn: &Connection, sender_id: i64, text: &str) -> PlResult<Message> {
        self.append_message(conn, Message::text(sender_id, text))
    }

    pub fn append_image(
        &mut self,
        conn: &Connection,
        sender_id: i64,
        data: Vec<u8>,
        mime_type: &str,
    ) -> PlResult<Message> {
        self.append_message(conn, Message::image(sender_id, data, mime_type))
    }

    pub fn append_file(
        &mut self,
        conn: &Connection,
        sender_id: i64,
        data: Vec<u8>,
        mime_type: &str,
    ) -> PlResult<Message> {
        self.append_message(conn, Message::file(sender_id, data, mime_type))
    }

    pub fn append_location(&mut self, conn: &Connection, sender_id: i64, label: &str) -> PlResult<Message> {
        self.append_message(conn, Message::location(sender_id, label))
    }

    pub fn append_knock(&mut self, conn: &Connection, sender_id: i64) -> PlResult<Message> {
        self.append_message(conn, Message::knock(sender_id))
    }

    /// Append a missed call from `user_id` at the given time.
    pub fn append_missed_call(
        &mut self,
        conn: &Connection,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> PlResult<Message> {
        let message = Message::system(SystemMessageType::MissedCall, user_id).with_server_timestamp(at);
        self.append_call(conn, message, user_id)
    }

    /// Append a performed call of `duration_secs` started by `caller_id`.
    pub fn append_performed_call(
        &mut self,
        conn: &Connection,
        duration_secs: i64,
        caller_id: i64,
    ) -> PlResult<Message> {
        let mut message =
            Message::system(SystemMessageType::PerformedCall, caller_id).with_server_timestamp(Utc::now());
        message.duration = Some(duration_secs);
        self.append_call(conn, message, caller_id)
    }

    fn append_call(&mut self, conn: &Connection, mut message: Message, user_id: i64) -> PlResult<Message> {
        let id = self.require_id()?;
        let system_type = message.system_type.ok_or_else(|| {
            PlError::InvalidMessageState("call message without a system type".into())
        })?;

        let last = self.current_last_call(conn)?;
        match CallPlacement::decide(last, system_type, user_id) {
            CallPlacement::ChildOf(parent_id) => {
                message.visible_in_conversation_id = None;
                message.hidden_in_conversation_id = Some(id);
                message.parent_message_id = Some(parent_id);
                message.insert(conn)?;
                message.add_system_user(conn, user_id)?;
                debug!(conversation_id = id, parent_id, "merged call event into parent");
            }
            CallPlacement::NewParent => {
                message.visible_in_conversation_id = Some(id);
                message.hidden_in_conversation_id = None;
                let parent_id = message.insert(conn)?;
                message.add_system_user(conn, user_id)?;
                self.store_last_call(
                    conn,
                    Some(LastCallEvent {
                        parent_id,
                        system_type,
                        user_id,
                    }),
                )?;
            }
        }
        Ok(message)
    }

    // ─── Reading ─────────────────────────────────────────────────────────

    /// Visible messages in insertion order.
    pub fn recent_messages(&self, conn: &Connection) -> PlResult<Vec<Message>> {
        let id = self.require_id()?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM messages WHERE visible_in_conversation_id = ?1
                 ORDER BY local_timestamp, id",
            )
            .map_err(db_err)?;
        let messages = stmt
            .query_map([id], Message::from_row)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(messages)
    }

    /// Messages hidden in this conversation (tombstones and merged calls).
    pub fn hidden_messages(&self, conn: &Connection) -> PlResult<Vec<Message>> {
        let id = self.require_id()?;
        let mut stmt = conn
            .prepare("SELECT * FROM messages WHERE hidden_in_conversation_id = ?1 ORDER BY id")
            .map_err(db_err)?;
        let messages = stmt
            .query_map([id], Message::from_row)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(messages)
    }

    pub fn message_count(&self, conn: &Connection) -> PlResult<i64> {
        crate::queries::count_messages_for_conversation(conn, self.require_id()?)
    }
}

fn last_call_from_columns(
    parent_id: Option<i64>,
    call_type: Option<String>,
    user_id: Option<i64>,
) -> Option<LastCallEvent> {
    match (parent_id, call_type.as_deref().and_then(SystemMessageType::parse), user_id) {
        (Some(parent_id), Some(system_type), Some(user_id)) => Some(LastCallEvent {
            parent_id,
            system_type,
            user_id,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageKind;
    use crate::models::user::User;
    use crate::schema;

    fn setup() -> (Connection, Conversation, i64, i64) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        schema::create_tables(&conn).unwrap();
        let mut conv = Conversation::new(Some("Team".into()));
        conv.insert(&conn).unwrap();
        let ann = User::new("Ann").save(&conn).unwrap();
        let bob = User::new("Bob").save(&conn).unwrap();
        (conn, conv, ann, bob)
    }

    #[test]
    fn test_placement_decision() {
        let last = Some(LastCallEvent {
            parent_id: 7,
            system_type: SystemMessageType::MissedCall,
            user_id: 1,
        });
        assert_eq!(
            CallPlacement::decide(last, SystemMessageType::MissedCall, 1),
            CallPlacement::ChildOf(7)
        );
        assert_eq!(
            CallPlacement::decide(last, SystemMessageType::MissedCall, 2),
            CallPlacement::NewParent
        );
        assert_eq!(
            CallPlacement::decide(last, SystemMessageType::PerformedCall, 1),
            CallPlacement::NewParent
        );
        assert_eq!(
            CallPlacement::decide(None, SystemMessageType::MissedCall, 1),
            CallPlacement::NewParent
        );
    }

    #[test]
    fn test_text_append_clears_call_state() {
        let (conn, mut conv, ann, _) = setup();
        conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
        assert!(conv.last_call.is_some());

        conv.append_text(&conn, ann, "hello").unwrap();
        assert!(conv.last_call.is_none());

        let reloaded = Conversation::get(&conn, conv.id.unwrap()).unwrap();
        assert!(reloaded.last_call.is_none());
    }

    #[test]
    fn test_call_state_survives_reload() {
        let (conn, mut conv, ann, _) = setup();
        let parent = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();

        let mut reloaded = Conversation::get(&conn, conv.id.unwrap()).unwrap();
        let child = reloaded.append_missed_call(&conn, ann, Utc::now()).unwrap();
        assert_eq!(child.parent_message_id, parent.id);
    }

    #[test]
    fn test_recent_and_hidden_messages() {
        let (conn, mut conv, ann, _) = setup();
        conv.append_text(&conn, ann, "one").unwrap();
        conv.append_knock(&conn, ann).unwrap();
        conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
        conv.append_missed_call(&conn, ann, Utc::now()).unwrap();

        assert_eq!(conv.recent_messages(&conn).unwrap().len(), 3);
        assert_eq!(conv.hidden_messages(&conn).unwrap().len(), 1);
        assert_eq!(conv.message_count(&conn).unwrap(), 3);
    }

    #[test]
    fn test_file_and_location_appends() {
        let (conn, mut conv, ann, _) = setup();
        conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
        let file = conv
            .append_file(&conn, ann, b"%PDF-1.7".to_vec(), "application/pdf")
            .unwrap();
        let place = conv.append_location(&conn, ann, "Harbour").unwrap();

        assert_eq!(file.kind, MessageKind::File);
        assert_eq!(place.kind, MessageKind::Location);
        assert_eq!(place.preview(), "Harbour");
        assert!(conv.last_call.is_none());
        assert_eq!(conv.message_count(&conn).unwrap(), 3);
    }
}
