//! Shared test utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

use pl_core::config::{AppConfig, ConfigHandle, DatabaseConfig};
use pl_models::{CategoryMatch, Conversation, Database, Message, User};
use pl_services::asset_collection::CollectionEvent;
use pl_services::context::ContextStack;
use pl_services::event_bus::{AppEvent, EventBus};

/// How long a test waits for an event before giving up.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a temporary database with full schema and migrations applied.
/// Returns the Database and the TempDir (must be held alive for the duration of the test).
pub fn create_test_db() -> (Database, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("test.db");
    let db = Database::init(&path, &DatabaseConfig::default()).expect("failed to init test database");
    (db, dir)
}

pub fn create_test_config_handle() -> ConfigHandle {
    ConfigHandle::new(AppConfig::default())
}

/// Create an EventBus with a small buffer suitable for tests.
pub fn create_test_event_bus() -> EventBus {
    EventBus::new(64)
}

pub fn create_test_stack(db: &Database, bus: &EventBus) -> ContextStack {
    ContextStack::new(db, bus.clone()).expect("failed to start contexts")
}

pub fn seed_user(conn: &Connection, name: &str) -> i64 {
    User::new(name).save(conn).expect("failed to insert user")
}

pub fn seed_conversation(conn: &Connection) -> Conversation {
    let mut conv = Conversation::new(Some("Test Conversation".into()));
    conv.insert(conn).expect("failed to insert conversation");
    conv
}

/// Server time of the `index`th seeded message: one second apart.
pub fn seeded_time(index: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(index as i64)
}

/// The `index`th message of a mixed history: GIF, PNG image, plain text,
/// text with a link, repeating.
pub fn mixed_message(sender_id: i64, index: usize) -> Message {
    let msg = match index % 4 {
        0 => Message::image(sender_id, b"GIF89a-frame".to_vec(), "image/gif"),
        1 => Message::image(sender_id, b"\x89PNG-data".to_vec(), "image/png"),
        2 => Message::text(sender_id, format!("message {index}")),
        _ => Message::text(sender_id, format!("link {index} https://example.com/{index}")),
    };
    msg.with_server_timestamp(seeded_time(index))
}

/// Seed a conversation holding `count` mixed messages. Returns its id.
pub fn seed_mixed_conversation(db: &Database, count: usize) -> i64 {
    let conn = db.conn().expect("failed to get connection for seeding");
    let sender = seed_user(&conn, "Ann");
    let mut conv = seed_conversation(&conn);
    for i in 0..count {
        conv.append_message(&conn, mixed_message(sender, i))
            .expect("failed to append message");
    }
    conv.id.expect("conversation has an id")
}

/// Seed one visible text message. Returns (conversation id, message id).
pub fn seed_single_message(db: &Database, text: &str) -> (i64, i64) {
    let conn = db.conn().expect("failed to get connection for seeding");
    let sender = seed_user(&conn, "Ann");
    let mut conv = seed_conversation(&conn);
    let msg = conv.append_text(&conn, sender, text).expect("failed to append message");
    (conv.id.unwrap(), msg.id.unwrap())
}

/// Drain a scan's channel until it closes.
pub async fn collect_events(mut rx: mpsc::UnboundedReceiver<CollectionEvent>) -> Vec<CollectionEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(EVENT_TIMEOUT, rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => return events,
            Err(_) => panic!("scan channel did not close in time"),
        }
    }
}

/// Fetched matches concatenated per filter, in delivery order.
pub fn accumulate(events: &[CollectionEvent]) -> HashMap<CategoryMatch, Vec<i64>> {
    let mut result: HashMap<CategoryMatch, Vec<i64>> = HashMap::new();
    for event in events {
        if let CollectionEvent::Fetched { matches, .. } = event {
            for (filter, messages) in matches {
                result
                    .entry(*filter)
                    .or_default()
                    .extend(messages.iter().filter_map(|m| m.id));
            }
        }
    }
    result
}

pub fn ids(messages: &[Message]) -> Vec<i64> {
    messages.iter().filter_map(|m| m.id).collect()
}

/// Next event on the bus, or None if nothing arrives within `wait`.
pub async fn next_app_event(rx: &mut broadcast::Receiver<AppEvent>, wait: Duration) -> Option<AppEvent> {
    tokio::time::timeout(wait, rx.recv()).await.ok().and_then(|r| r.ok())
}
