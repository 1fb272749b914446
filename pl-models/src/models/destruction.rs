//! Owed destruction timers.
//!
//! A row means "a timer is owed for this message". Rows outlive the
//! in-memory timer so a restart can re-arm it; they are removed when the
//! timer fires, is stopped, or the message is deleted.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use pl_core::error::PlResult;

use super::db_err;
use super::message::from_millis;

/// What happens to the message when its timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestructionType {
    /// Scrub content in place.
    Obfuscation,
    /// Delete for everyone.
    Deletion,
}

impl DestructionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestructionType::Obfuscation => "obfuscation",
            DestructionType::Deletion => "deletion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "obfuscation" => Some(DestructionType::Obfuscation),
            "deletion" => Some(DestructionType::Deletion),
            _ => None,
        }
    }
}

impl std::fmt::Display for DestructionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted owed timer. `registry` names the timer registry that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDestruction {
    pub registry: String,
    pub message_id: i64,
    pub kind: DestructionType,
    pub fire_at: DateTime<Utc>,
}

impl PendingDestruction {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get("kind")?;
        Ok(Self {
            registry: row.get("registry")?,
            message_id: row.get("message_id")?,
            kind: DestructionType::parse(&kind).unwrap_or(DestructionType::Deletion),
            fire_at: from_millis(row.get("fire_at")?),
        })
    }

    /// Insert or replace the owed timer for this registry and message.
    pub fn save(&self, conn: &Connection) -> PlResult<()> {
        conn.execute(
            "INSERT INTO destruction_timers (registry, message_id, kind, fire_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(registry, message_id) DO UPDATE SET
                kind = excluded.kind,
                fire_at = excluded.fire_at",
            params![
                self.registry,
                self.message_id,
                self.kind.as_str(),
                self.fire_at.timestamp_millis()
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Remove the owed timer. Returns whether a row existed.
    pub fn delete(conn: &Connection, registry: &str, message_id: i64) -> PlResult<bool> {
        let n = conn
            .execute(
                "DELETE FROM destruction_timers WHERE registry = ?1 AND message_id = ?2",
                params![registry, message_id],
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    /// Remove every owed timer for a message, whatever its registry.
    /// Returns how many rows were removed.
    pub fn delete_for_message(conn: &Connection, message_id: i64) -> PlResult<usize> {
        conn.execute("DELETE FROM destruction_timers WHERE message_id = ?1", [message_id])
            .map_err(db_err)
    }

    /// Owed timers of one registry, soonest first.
    pub fn load_for_registry(conn: &Connection, registry: &str) -> PlResult<Vec<Self>> {
        let mut stmt = conn
            .prepare("SELECT * FROM destruction_timers WHERE registry = ?1 ORDER BY fire_at, message_id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([registry], Self::from_row)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Every owed timer, soonest first.
    pub fn load_all(conn: &Connection) -> PlResult<Vec<Self>> {
        let mut stmt = conn
            .prepare("SELECT * FROM destruction_timers ORDER BY fire_at, message_id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], Self::from_row)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
