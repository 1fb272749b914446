//! Message commands.

use std::time::Duration;

use chrono::Utc;
use clap::Subcommand;
use console::style;

use pl_core::config::ConfigHandle;
use pl_core::error::PlResult;
use pl_models::{Conversation, Message, User};
use pl_services::context::ContextStack;
use pl_services::event_bus::EventBus;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum MessagesAction {
    /// List a conversation's messages, newest first.
    List {
        /// Conversation id.
        conversation: i64,
        /// Number of messages to show.
        #[arg(short = 'n', long, default_value = "25")]
        limit: usize,
    },
    /// Append a text message.
    Send {
        /// Conversation id.
        conversation: i64,
        /// Message text.
        text: String,
        /// Sender name. Created on first use.
        #[arg(long = "from", default_value = "me")]
        sender: String,
        /// Scrub the content after this many seconds.
        #[arg(long)]
        obfuscate_after: Option<u64>,
        /// Delete the message for everyone after this many seconds.
        #[arg(long)]
        delete_after: Option<u64>,
    },
    /// Record a call. Without a duration the call was missed.
    Call {
        /// Conversation id.
        conversation: i64,
        /// Caller name. Created on first use.
        #[arg(long = "from", default_value = "me")]
        caller: String,
        /// Call duration in seconds.
        #[arg(short, long)]
        duration: Option<i64>,
    },
}

pub async fn run(config: ConfigHandle, action: MessagesAction, format: OutputFormat) -> PlResult<()> {
    let db = super::init_database(&config).await?;

    match action {
        MessagesAction::List { conversation, limit } => {
            let conn = db.conn()?;
            Conversation::get(&conn, conversation)?;
            let messages =
                pl_models::queries::messages_for_conversation_cursor(&conn, conversation, None, limit)?;

            match format {
                OutputFormat::Json => {
                    let mut rows = Vec::with_capacity(messages.len());
                    for msg in &messages {
                        rows.push(serde_json::json!({
                            "message": msg,
                            "delivery_state": msg.delivery_state(&conn)?,
                        }));
                    }
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
                OutputFormat::Text => {
                    if messages.is_empty() {
                        println!("No messages.");
                        return Ok(());
                    }

                    let mut table = super::new_table();
                    table.set_header(vec!["ID", "Time", "From", "Kind", "Content", "State", "Category"]);
                    for msg in &messages {
                        let sender = match msg.sender_id {
                            Some(id) => User::find_by_id(&conn, id)?
                                .map(|u| u.display_name().to_string())
                                .unwrap_or_else(|| id.to_string()),
                            None => "-".to_string(),
                        };
                        let children = msg.child_messages(&conn)?.len();
                        let mut content = super::truncate(&msg.preview(), 50);
                        if children > 0 {
                            content = format!("{content} (+{children})");
                        }
                        table.add_row(vec![
                            msg.id.map(|id| id.to_string()).unwrap_or_default(),
                            msg.sort_timestamp().format("%Y-%m-%d %H:%M:%S").to_string(),
                            sender,
                            msg.kind.as_str().to_string(),
                            content,
                            msg.delivery_state(&conn)?.to_string(),
                            msg.cached_category
                                .map(|c| c.to_string())
                                .unwrap_or_else(|| "-".to_string()),
                        ]);
                    }
                    println!("{table}");
                }
            }
        }
        MessagesAction::Send {
            conversation,
            text,
            sender,
            obfuscate_after,
            delete_after,
        } => {
            let message = {
                let conn = db.conn()?;
                let sender_id = User::find_or_create_by_name(&conn, &sender)?;
                let mut conv = Conversation::get(&conn, conversation)?;
                conv.append_text(&conn, sender_id, &text)?
            };
            let message_id = message.id.unwrap_or_default();

            if obfuscate_after.is_some() || delete_after.is_some() {
                // Timers are armed on their contexts and persisted; the rows
                // outlive this process and are re-armed by `timers run`.
                let contexts = ContextStack::new(&db, EventBus::default())?;
                if let Some(secs) = obfuscate_after {
                    contexts
                        .ui
                        .perform_async(move |state| {
                            state.message_obfuscation_timer().start_obfuscation_timer(
                                state,
                                message_id,
                                Duration::from_secs(secs),
                            )
                        })
                        .await??;
                }
                if let Some(secs) = delete_after {
                    contexts
                        .sync
                        .perform_async(move |state| {
                            state.message_deletion_timer().start_deletion_timer(
                                state,
                                message_id,
                                Duration::from_secs(secs),
                            )
                        })
                        .await??;
                }
                contexts.shutdown();
            }

            print_appended(&message, format)?;
        }
        MessagesAction::Call {
            conversation,
            caller,
            duration,
        } => {
            let conn = db.conn()?;
            let caller_id = User::find_or_create_by_name(&conn, &caller)?;
            let mut conv = Conversation::get(&conn, conversation)?;
            let message = match duration {
                Some(seconds) => conv.append_performed_call(&conn, seconds, caller_id)?,
                None => conv.append_missed_call(&conn, caller_id, Utc::now())?,
            };

            if let (Some(parent), OutputFormat::Text) = (message.parent_message_id, format) {
                println!("  Merged into call message {}", parent);
            }
            print_appended(&message, format)?;
        }
    }

    Ok(())
}

fn print_appended(message: &Message, format: OutputFormat) -> PlResult<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(message)?);
        }
        OutputFormat::Text => {
            println!(
                "  {} Appended message {}",
                style("OK").green().bold(),
                message.id.map(|id| id.to_string()).unwrap_or_default()
            );
        }
    }
    Ok(())
}
