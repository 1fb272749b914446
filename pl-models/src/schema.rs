//! Database schema definitions and table creation.
//!
//! Timestamps are stored as integer milliseconds since the Unix epoch so
//! the scanner's ordering key can be computed and compared in SQL.

use pl_core::error::{PlError, PlResult};
use rusqlite::Connection;
use tracing::info;

/// Create all database tables and indexes if they do not exist.
pub fn create_tables(conn: &Connection) -> PlResult<()> {
    conn.execute_batch(SCHEMA_SQL)
        .map_err(|e| PlError::Database(format!("failed to create schema: {e}")))?;
    info!("database schema verified");
    Ok(())
}

/// Drop all tables (used for database reset). Children first.
pub fn drop_tables(conn: &Connection) -> PlResult<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS destruction_timers;
         DROP TABLE IF EXISTS system_message_users;
         DROP TABLE IF EXISTS reactions;
         DROP TABLE IF EXISTS message_confirmations;
         DROP TABLE IF EXISTS messages;
         DROP TABLE IF EXISTS conversations;
         DROP TABLE IF EXISTS users;
         DROP TABLE IF EXISTS schema_version;",
    )
    .map_err(|e| PlError::Database(format!("failed to drop tables: {e}")))?;
    Ok(())
}

/// Complete SQL schema for all tables.
const SCHEMA_SQL: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- Users (senders, reactors, call participants)
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id   TEXT NOT NULL UNIQUE,
    name        TEXT
);

-- Conversations
-- The last_call_* columns hold the call-merge state: the most recent parent
-- call message and who started it. Any non-call append clears them.
CREATE TABLE IF NOT EXISTS conversations (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id               TEXT NOT NULL UNIQUE,
    display_name            TEXT,
    created_at              INTEGER NOT NULL,
    last_call_parent_id     INTEGER,
    last_call_type          TEXT,
    last_call_user_id       INTEGER
);

-- Messages
CREATE TABLE IF NOT EXISTS messages (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    nonce                       TEXT NOT NULL UNIQUE,
    sender_id                   INTEGER REFERENCES users(id) ON DELETE SET NULL,
    visible_in_conversation_id  INTEGER REFERENCES conversations(id) ON DELETE SET NULL,
    hidden_in_conversation_id   INTEGER REFERENCES conversations(id) ON DELETE SET NULL,
    server_timestamp            INTEGER,
    local_timestamp             INTEGER NOT NULL,
    event_id                    TEXT,
    is_expired                  INTEGER NOT NULL DEFAULT 0,
    kind                        TEXT NOT NULL,
    text                        TEXT,
    mime_type                   TEXT,
    asset_data                  BLOB,
    system_type                 TEXT,
    duration                    INTEGER,
    parent_message_id           INTEGER REFERENCES messages(id) ON DELETE SET NULL,
    cached_category             INTEGER,
    is_ephemeral                INTEGER NOT NULL DEFAULT 0,
    destruction_timeout_ms      INTEGER,
    is_obfuscated               INTEGER NOT NULL DEFAULT 0,
    CHECK (visible_in_conversation_id IS NULL OR hidden_in_conversation_id IS NULL)
);
CREATE INDEX IF NOT EXISTS idx_messages_visible_order
    ON messages(visible_in_conversation_id, COALESCE(server_timestamp, local_timestamp), id);
CREATE INDEX IF NOT EXISTS idx_messages_hidden ON messages(hidden_in_conversation_id);
CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_message_id);

-- Delivery confirmations received for a message
CREATE TABLE IF NOT EXISTS message_confirmations (
    message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    confirmed_at INTEGER NOT NULL,
    PRIMARY KEY (message_id, user_id)
);

-- Reactions: one row per (message, emoji, user)
CREATE TABLE IF NOT EXISTS reactions (
    message_id      INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    unicode_value   TEXT NOT NULL,
    user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    PRIMARY KEY (message_id, unicode_value, user_id)
);

-- Users involved in a system (call) message
CREATE TABLE IF NOT EXISTS system_message_users (
    message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    PRIMARY KEY (message_id, user_id)
);

-- Owed destruction timers, re-armed after a restart
CREATE TABLE IF NOT EXISTS destruction_timers (
    registry    TEXT NOT NULL,
    message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    kind        TEXT NOT NULL,
    fire_at     INTEGER NOT NULL,
    PRIMARY KEY (registry, message_id)
);
CREATE INDEX IF NOT EXISTS idx_destruction_timers_fire_at ON destruction_timers(fire_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_twice() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }

    #[test]
    fn test_visible_and_hidden_are_exclusive() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO conversations (remote_id, created_at) VALUES ('c', 0)",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO messages (nonce, local_timestamp, kind, visible_in_conversation_id, hidden_in_conversation_id)
             VALUES ('n', 0, 'text', 1, 1)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_and_recreate() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        drop_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
