//! Queries for the access patterns the scanner and CLI need.
//!
//! Conversation history is paged with keyset pagination on
//! `(COALESCE(server_timestamp, local_timestamp), id)`, newest first. The
//! id tiebreak makes the order total, so pages never overlap or skip rows
//! even when timestamps collide.

use rusqlite::{params, Connection};

use pl_core::error::PlResult;

use crate::models::conversation::Conversation;
use crate::models::db_err;
use crate::models::message::Message;

/// Position after the last message of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCursor {
    pub sort_key: i64,
    pub id: i64,
}

impl MessageCursor {
    /// Cursor pointing just past `message`. None for unsaved messages.
    pub fn after(message: &Message) -> Option<Self> {
        message.id.map(|id| Self {
            sort_key: message.sort_timestamp().timestamp_millis(),
            id,
        })
    }
}

// ─── Conversation Queries ───────────────────────────────────────────────────

/// All conversations, oldest first.
pub fn list_conversations(conn: &Connection) -> PlResult<Vec<Conversation>> {
    let mut stmt = conn
        .prepare("SELECT * FROM conversations ORDER BY created_at, id")
        .map_err(db_err)?;
    let conversations = stmt
        .query_map([], Conversation::from_row)
        .map_err(db_err)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(conversations)
}

// ─── Message Queries ────────────────────────────────────────────────────────

/// Number of messages visible in a conversation.
pub fn count_messages_for_conversation(conn: &Connection, conversation_id: i64) -> PlResult<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE visible_in_conversation_id = ?1",
        [conversation_id],
        |row| row.get(0),
    )
    .map_err(db_err)
}

/// One page of a conversation's visible messages, newest first.
///
/// - `cursor`: position after the last message of the previous page, or
///   `None` for the first page.
/// - `limit`: maximum number of messages to return.
pub fn messages_for_conversation_cursor(
    conn: &Connection,
    conversation_id: i64,
    cursor: Option<MessageCursor>,
    limit: usize,
) -> PlResult<Vec<Message>> {
    let limit = limit as i64;
    let messages = match cursor {
        Some(cursor) => {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM messages
                     WHERE visible_in_conversation_id = ?1
                       AND (COALESCE(server_timestamp, local_timestamp) < ?2
                            OR (COALESCE(server_timestamp, local_timestamp) = ?2 AND id < ?3))
                     ORDER BY COALESCE(server_timestamp, local_timestamp) DESC, id DESC
                     LIMIT ?4",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(
                    params![conversation_id, cursor.sort_key, cursor.id, limit],
                    Message::from_row,
                )
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)?
        }
        None => {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM messages
                     WHERE visible_in_conversation_id = ?1
                     ORDER BY COALESCE(server_timestamp, local_timestamp) DESC, id DESC
                     LIMIT ?2",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![conversation_id, limit], Message::from_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)?
        }
    };
    Ok(messages)
}

// ─── Timer Queries ──────────────────────────────────────────────────────────

/// Number of owed destruction timers, optionally for one registry.
pub fn pending_destruction_count(conn: &Connection, registry: Option<&str>) -> PlResult<i64> {
    match registry {
        Some(registry) => conn.query_row(
            "SELECT COUNT(*) FROM destruction_timers WHERE registry = ?1",
            [registry],
            |row| row.get(0),
        ),
        None => conn.query_row("SELECT COUNT(*) FROM destruction_timers", [], |row| row.get(0)),
    }
    .map_err(db_err)
}
