//! User entity model.

use pl_core::error::{PlError, PlResult};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::db_err;

/// A participant: message sender, reactor, or call initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub remote_id: String,
    pub name: Option<String>,
}

impl User {
    /// A new, unsaved user with a fresh remote id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            remote_id: uuid::Uuid::new_v4().to_string(),
            name: Some(name.into()),
        }
    }

    /// Construct a User from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            remote_id: row.get("remote_id")?,
            name: row.get("name")?,
        })
    }

    /// Find a user by local id.
    pub fn find_by_id(conn: &Connection, id: i64) -> PlResult<Option<Self>> {
        match conn.query_row("SELECT * FROM users WHERE id = ?1", [id], Self::from_row) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PlError::Database(e.to_string())),
        }
    }

    /// First user with exactly this name, by local id.
    pub fn find_by_name(conn: &Connection, name: &str) -> PlResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM users WHERE name = ?1 ORDER BY id LIMIT 1",
            [name],
            Self::from_row,
        ) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PlError::Database(e.to_string())),
        }
    }

    /// Local id of the user named `name`, creating one if none exists.
    pub fn find_or_create_by_name(conn: &Connection, name: &str) -> PlResult<i64> {
        match Self::find_by_name(conn, name)? {
            Some(User { id: Some(id), .. }) => Ok(id),
            _ => User::new(name).save(conn),
        }
    }

    /// Upsert by remote id. Returns the local id.
    pub fn save(&mut self, conn: &Connection) -> PlResult<i64> {
        conn.execute(
            "INSERT INTO users (remote_id, name) VALUES (?1, ?2)
             ON CONFLICT(remote_id) DO UPDATE SET name = COALESCE(excluded.name, name)",
            params![self.remote_id, self.name],
        )
        .map_err(db_err)?;

        // last_insert_rowid() is not reliable after an upsert that updated
        let id: i64 = conn
            .query_row(
                "SELECT id FROM users WHERE remote_id = ?1",
                [&self.remote_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        self.id = Some(id);
        Ok(id)
    }

    /// Display name, falling back to the remote id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.remote_id)
    }
}
