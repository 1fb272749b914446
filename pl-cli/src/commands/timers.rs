//! Ephemeral message timer commands.

use std::time::Duration;

use chrono::Utc;
use clap::Subcommand;
use console::style;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use pl_core::config::ConfigHandle;
use pl_core::error::PlResult;
use pl_models::PendingDestruction;
use pl_services::event_bus::{AppEvent, EventBus};
use pl_services::lifecycle::LifecycleService;
use pl_services::service::Service;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum TimersAction {
    /// List owed destruction timers.
    List,
    /// Start the data layer and run owed timers until they have all fired.
    Run {
        /// Give up after this many seconds.
        #[arg(short, long, default_value = "60")]
        wait: u64,
    },
}

pub async fn run(config: ConfigHandle, action: TimersAction, format: OutputFormat) -> PlResult<()> {
    let db = super::init_database(&config).await?;

    match action {
        TimersAction::List => {
            let owed = PendingDestruction::load_all(&*db.conn()?)?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&owed)?);
                }
                OutputFormat::Text => {
                    if owed.is_empty() {
                        println!("No owed timers.");
                        return Ok(());
                    }

                    let now = Utc::now();
                    let mut table = super::new_table();
                    table.set_header(vec!["Registry", "Message", "Action", "Fires At", "Due"]);
                    for timer in &owed {
                        let remaining = (timer.fire_at - now).num_seconds();
                        table.add_row(vec![
                            timer.registry.clone(),
                            timer.message_id.to_string(),
                            timer.kind.to_string(),
                            timer.fire_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                            if remaining > 0 {
                                format!("in {remaining}s")
                            } else {
                                "overdue".to_string()
                            },
                        ]);
                    }
                    println!("{table}");
                }
            }
        }
        TimersAction::Run { wait } => {
            let bus = EventBus::default();
            let mut events = bus.subscribe();
            let mut lifecycle = LifecycleService::new(config.clone(), db.clone(), bus);
            lifecycle.init()?;
            let report = lifecycle.startup().await?;

            if let OutputFormat::Text = format {
                println!("{}", style("Startup").bold().underlined());
                println!("  Orphans purged:       {}", report.orphans_purged);
                println!("  Obfuscation timers:   {}", report.obfuscation_timers_restored);
                println!("  Deletion timers:      {}", report.deletion_timers_restored);
                println!();
            }

            // Every restored timer ends in exactly one firing event.
            let expected = report.obfuscation_timers_restored + report.deletion_timers_restored;
            let mut fired = Vec::new();
            let deadline = tokio::time::sleep(Duration::from_secs(wait));
            tokio::pin!(deadline);

            while fired.len() < expected {
                tokio::select! {
                    _ = &mut deadline => {
                        if let OutputFormat::Text = format {
                            println!("  {} Gave up waiting after {}s.", style("WARN").yellow().bold(), wait);
                        }
                        break;
                    }
                    received = events.recv() => match received {
                        Ok(event) => {
                            if let Some(line) = describe(&event) {
                                if let OutputFormat::Text = format {
                                    println!("  {line}");
                                }
                                fired.push(line);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("missed {skipped} timer event(s)");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }

            lifecycle.shutdown()?;
            let remaining = pl_models::queries::pending_destruction_count(&*db.conn()?, None)?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({
                        "orphans_purged": report.orphans_purged,
                        "obfuscation_timers_restored": report.obfuscation_timers_restored,
                        "deletion_timers_restored": report.deletion_timers_restored,
                        "fired": fired,
                        "still_owed": remaining,
                    }));
                }
                OutputFormat::Text => {
                    println!();
                    println!(
                        "  {} {} timer(s) fired, {} still owed.",
                        style("OK").green().bold(),
                        fired.len(),
                        remaining
                    );
                }
            }
        }
    }

    Ok(())
}

/// One line for a timer firing. None for housekeeping events.
fn describe(event: &AppEvent) -> Option<String> {
    match event {
        AppEvent::MessageObfuscated { message_id } => Some(format!("message {message_id} obfuscated")),
        AppEvent::MessageDeletedForEveryone { message_id, conversation_id } => Some(format!(
            "message {message_id} deleted for everyone in conversation {conversation_id}"
        )),
        AppEvent::DestructionTimerDropped { message_id, kind } => {
            Some(format!("{kind} of message {message_id} dropped, message is gone"))
        }
        AppEvent::TimersRestored { .. } | AppEvent::OrphansPurged { .. } => None,
    }
}
