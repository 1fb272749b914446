//! Database management commands.

use clap::Subcommand;
use console::style;
use dialoguer::Confirm;

use pl_core::config::ConfigHandle;
use pl_core::error::PlResult;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum DbAction {
    /// Show database statistics.
    Stats,
    /// Run an integrity check.
    Check,
    /// Reset the database (WARNING: destroys all data).
    Reset {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the database file path.
    Path,
}

pub async fn run(config: ConfigHandle, action: DbAction, format: OutputFormat) -> PlResult<()> {
    let db_path = config.read().await.effective_db_path()?;

    match action {
        DbAction::Stats => {
            let db = super::init_database(&config).await?;
            let stats = db.stats()?;
            let file_size = std::fs::metadata(&db_path).ok().map(|m| m.len());

            let conn = db.conn()?;
            let journal_mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .unwrap_or_else(|_| "unknown".to_string());

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({
                        "path": db_path.display().to_string(),
                        "tables": stats,
                        "file_size_bytes": file_size,
                        "journal_mode": journal_mode,
                    }));
                }
                OutputFormat::Text => {
                    println!("{}", style("Database Statistics").bold().underlined());
                    println!("  Path:          {}", db_path.display());
                    println!("  Journal mode:  {}", journal_mode);
                    if let Some(size) = file_size {
                        println!("  Size:          {}", super::format_bytes(size));
                    }
                    println!();

                    let mut table = super::new_table();
                    table.set_header(vec!["Table", "Row Count"]);
                    table.add_row(vec!["conversations".to_string(), stats.conversations.to_string()]);
                    table.add_row(vec!["users".to_string(), stats.users.to_string()]);
                    table.add_row(vec!["visible messages".to_string(), stats.visible_messages.to_string()]);
                    table.add_row(vec!["hidden messages".to_string(), stats.hidden_messages.to_string()]);
                    table.add_row(vec!["reactions".to_string(), stats.reactions.to_string()]);
                    table.add_row(vec!["owed timers".to_string(), stats.owed_timers.to_string()]);
                    println!("{table}");
                }
            }
        }
        DbAction::Check => {
            let db = super::init_database(&config).await?;
            match db.run_integrity_check() {
                Ok(()) => {
                    println!("  {} Integrity check passed.", style("OK").green().bold());
                }
                Err(e) => {
                    println!("  {} Integrity check failed: {}", style("FAIL").red().bold(), e);
                }
            }

            let conn = db.conn()?;
            let orphans: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages
                     WHERE visible_in_conversation_id IS NULL AND hidden_in_conversation_id IS NULL",
                    [],
                    |row| row.get(0),
                )
                .unwrap_or(0);
            if orphans == 0 {
                println!("  {} No orphaned messages.", style("OK").green().bold());
            } else {
                println!(
                    "  {} {} orphaned message(s); they are erased on next startup.",
                    style("WARN").yellow().bold(),
                    orphans
                );
            }
        }
        DbAction::Reset { yes } => {
            println!("  {} This will delete ALL local data.", style("WARNING").red().bold());
            println!("  Database: {}", db_path.display());

            let confirmed = yes
                || Confirm::new()
                    .with_prompt("  Are you sure you want to reset the database?")
                    .default(false)
                    .interact()
                    .unwrap_or(false);

            if !confirmed {
                println!("  Reset cancelled.");
                return Ok(());
            }

            let db = super::init_database(&config).await?;
            db.reset()?;
            println!("  {} Database reset complete.", style("OK").green().bold());
        }
        DbAction::Path => match format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"path": db_path.display().to_string()}));
            }
            OutputFormat::Text => {
                println!("{}", db_path.display());
            }
        },
    }

    Ok(())
}
