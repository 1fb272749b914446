//! Parley Models - Database schema, entity models, migrations, and queries.
//!
//! This crate owns all data persistence: SQLite initialization and pooling,
//! the conversation/message/reaction entities, message categories and
//! category filters, owed destruction timers, versioned migrations, and the
//! paged queries the collection scanner runs.

pub mod db;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod schema;

// Re-export key types
pub use db::{Database, DbPool, PooledConn};
pub use models::category::{CategoryMatch, MessageCategory};
pub use models::conversation::Conversation;
pub use models::destruction::{DestructionType, PendingDestruction};
pub use models::message::{DeliveryState, Message, MessageKind, SystemMessageType};
pub use models::user::User;
