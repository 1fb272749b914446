//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "Parley";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Database schema version.
pub const DB_SCHEMA_VERSION: i32 = 1;

/// Default database file name inside the data directory.
pub const DEFAULT_DB_FILE: &str = "parley.db";

/// Number of messages an asset collection scan fetches per page.
pub const DEFAULT_ASSET_FETCH_COUNT: usize = 200;

/// Capacity of the application event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Keys under which per-context singletons are stored in context metadata.
pub mod metadata_keys {
    /// Timer registry that obfuscates ephemeral messages (UI context).
    pub const MESSAGE_OBFUSCATION_TIMER: &str = "MessageObfuscationTimer";
    /// Timer registry that deletes ephemeral messages for everyone (sync context).
    pub const MESSAGE_DELETION_TIMER: &str = "MessageDeletionTimer";
}

/// Characters used to scrub obfuscated text content.
pub const OBFUSCATION_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
