//! CLI command implementations.

pub mod assets;
pub mod conversations;
pub mod db;
pub mod messages;
pub mod timers;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};

use pl_core::config::ConfigHandle;
use pl_core::error::PlResult;
use pl_models::Database;

/// Helper to initialize the database from config.
pub async fn init_database(config: &ConfigHandle) -> PlResult<Database> {
    let config = config.read().await;
    let db_path = config.effective_db_path()?;
    Database::init(&db_path, &config.database)
}

/// A table with the shared CLI styling.
pub fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Truncate a string to at most `max_chars` characters, appending an
/// ellipsis if truncated.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else if max_chars > 3 {
        let kept: String = s.chars().take(max_chars - 3).collect();
        format!("{kept}...")
    } else {
        s.chars().take(max_chars).collect()
    }
}
