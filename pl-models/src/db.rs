//! Database initialization, connection pooling, and lifecycle management.
//!
//! SQLite in WAL mode behind an r2d2 pool. Each execution context checks out
//! one connection for its lifetime, so the pool must hold at least two.

use std::path::Path;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{error, info, warn};

use pl_core::config::DatabaseConfig;
use pl_core::error::{PlError, PlResult};

use crate::migrations;
use crate::schema;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// A connection checked out of the pool.
pub type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Database wrapper providing initialization, pooling, and lifecycle management.
#[derive(Clone)]
pub struct Database {
    pool: Arc<DbPool>,
}

impl Database {
    /// Open (or create) the database at `db_path`.
    ///
    /// Creates parent directories, builds the pool with per-connection
    /// pragmas, optionally runs an integrity check, then ensures the schema
    /// and applies pending migrations.
    pub fn init(db_path: &Path, config: &DatabaseConfig) -> PlResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("initializing database at {}", db_path.display());

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_customizer(Box::new(ConnectionCustomizer {
                wal_mode: config.wal_mode,
            }))
            .build(manager)
            .map_err(|e| PlError::Pool(e.to_string()))?;

        let db = Self {
            pool: Arc::new(pool),
        };

        if config.integrity_check_on_startup {
            db.run_integrity_check()?;
        }

        {
            let conn = db.conn()?;
            schema::create_tables(&conn)?;
            migrations::run_migrations(&conn)?;
        }

        info!("database initialized successfully");
        Ok(db)
    }

    /// Get a connection from the pool.
    pub fn conn(&self) -> PlResult<PooledConn> {
        self.pool.get().map_err(|e| PlError::Pool(e.to_string()))
    }

    /// Run a SQLite integrity check.
    pub fn run_integrity_check(&self) -> PlResult<()> {
        let conn = self.conn()?;
        let result: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(|e| PlError::Database(e.to_string()))?;

        if result != "ok" {
            error!("database integrity check failed: {result}");
            return Err(PlError::IntegrityCheck(result));
        }

        info!("database integrity check passed");
        Ok(())
    }

    /// Execute a function within a database transaction.
    ///
    /// The transaction commits only if `f` returns `Ok`; otherwise it rolls
    /// back when dropped.
    pub fn transaction<T, F>(&self, f: F) -> PlResult<T>
    where
        F: FnOnce(&Connection) -> PlResult<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| PlError::Database(e.to_string()))?;

        let result = f(&tx)?;

        tx.commit().map_err(|e| PlError::Database(e.to_string()))?;

        Ok(result)
    }

    /// Row counts for the main tables.
    pub fn stats(&self) -> PlResult<DatabaseStats> {
        let conn = self.conn()?;

        let count = |sql: &str| -> PlResult<i64> {
            conn.query_row(sql, [], |row| row.get(0))
                .map_err(|e| PlError::Database(e.to_string()))
        };

        Ok(DatabaseStats {
            conversations: count("SELECT COUNT(*) FROM conversations")?,
            users: count("SELECT COUNT(*) FROM users")?,
            visible_messages: count(
                "SELECT COUNT(*) FROM messages WHERE visible_in_conversation_id IS NOT NULL",
            )?,
            hidden_messages: count(
                "SELECT COUNT(*) FROM messages WHERE hidden_in_conversation_id IS NOT NULL",
            )?,
            reactions: count("SELECT COUNT(*) FROM reactions")?,
            owed_timers: count("SELECT COUNT(*) FROM destruction_timers")?,
        })
    }

    /// Reset the database by dropping and recreating all tables.
    pub fn reset(&self) -> PlResult<()> {
        warn!("resetting database - all data will be lost");
        let conn = self.conn()?;
        schema::drop_tables(&conn)?;
        schema::create_tables(&conn)?;
        migrations::run_migrations(&conn)?;
        info!("database reset complete");
        Ok(())
    }
}

/// Database row count statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseStats {
    pub conversations: i64,
    pub users: i64,
    pub visible_messages: i64,
    pub hidden_messages: i64,
    pub reactions: i64,
    pub owed_timers: i64,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "conversations={}, users={}, visible_messages={}, hidden_messages={}, reactions={}, owed_timers={}",
            self.conversations,
            self.users,
            self.visible_messages,
            self.hidden_messages,
            self.reactions,
            self.owed_timers
        )
    }
}

/// r2d2 connection customizer that applies PRAGMA settings.
#[derive(Debug)]
struct ConnectionCustomizer {
    wal_mode: bool,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        if self.wal_mode {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }

        conn.execute_batch(
            "PRAGMA synchronous=NORMAL;
             PRAGMA temp_store=MEMORY;
             PRAGMA busy_timeout=5000;
             PRAGMA foreign_keys=ON;",
        )?;

        Ok(())
    }
}
