//! Conversation commands.

use clap::Subcommand;
use console::style;

use pl_core::config::ConfigHandle;
use pl_core::error::PlResult;
use pl_models::Conversation;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConversationsAction {
    /// List all conversations.
    List,
    /// Create an empty conversation.
    Create {
        /// Display name.
        #[arg(short, long)]
        name: Option<String>,
    },
}

pub async fn run(config: ConfigHandle, action: ConversationsAction, format: OutputFormat) -> PlResult<()> {
    let db = super::init_database(&config).await?;
    let conn = db.conn()?;

    match action {
        ConversationsAction::List => {
            let conversations = pl_models::queries::list_conversations(&conn)?;

            match format {
                OutputFormat::Json => {
                    let mut rows = Vec::with_capacity(conversations.len());
                    for conv in &conversations {
                        rows.push(serde_json::json!({
                            "conversation": conv,
                            "message_count": conv.message_count(&conn)?,
                        }));
                    }
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
                OutputFormat::Text => {
                    if conversations.is_empty() {
                        println!("No conversations.");
                        return Ok(());
                    }

                    let mut table = super::new_table();
                    table.set_header(vec!["ID", "Name", "Messages", "Created"]);
                    for conv in &conversations {
                        table.add_row(vec![
                            conv.id.map(|id| id.to_string()).unwrap_or_default(),
                            super::truncate(conv.display_name.as_deref().unwrap_or("(unnamed)"), 40),
                            conv.message_count(&conn)?.to_string(),
                            conv.created_at.format("%Y-%m-%d %H:%M").to_string(),
                        ]);
                    }
                    println!("{table}");
                    println!("  {} conversation(s)", conversations.len());
                }
            }
        }
        ConversationsAction::Create { name } => {
            let mut conv = Conversation::new(name);
            let id = conv.insert(&conn)?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&conv)?);
                }
                OutputFormat::Text => {
                    println!("  {} Created conversation {}", style("OK").green().bold(), id);
                }
            }
        }
    }

    Ok(())
}
