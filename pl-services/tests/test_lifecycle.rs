//! Lifecycle integration tests: startup housekeeping and shutdown.

mod common;

use std::time::Duration;

use chrono::Utc;

use pl_core::config::{AppConfig, ConfigHandle};
use pl_core::constants::metadata_keys::{MESSAGE_DELETION_TIMER, MESSAGE_OBFUSCATION_TIMER};
use pl_core::ContextKind;
use pl_models::{Conversation, DestructionType, Message, MessageKind, PendingDestruction};
use pl_services::event_bus::AppEvent;
use pl_services::lifecycle::{LifecyclePhase, LifecycleService, StartupReport};
use pl_services::service::{Service, ServiceState};

fn owe(conn: &rusqlite::Connection, registry: &str, message_id: i64, kind: DestructionType, in_secs: i64) {
    PendingDestruction {
        registry: registry.to_string(),
        message_id,
        kind,
        fire_at: Utc::now() + chrono::Duration::seconds(in_secs),
    }
    .save(conn)
    .unwrap();
}

#[tokio::test]
async fn test_startup_purges_orphans_and_restores_timers() {
    let (db, _dir) = common::create_test_db();
    let bus = common::create_test_event_bus();
    let mut rx = bus.subscribe();

    let (conversation_id, secret) = common::seed_single_message(&db, "secret");
    let doomed = {
        let conn = db.conn().unwrap();
        let ann = common::seed_user(&conn, "Ann");
        let mut conv = Conversation::get(&conn, conversation_id).unwrap();
        let doomed = conv.append_text(&conn, ann, "doomed").unwrap().id.unwrap();

        let mut orphan = Message::text(ann, "lost");
        orphan.insert(&conn).unwrap();

        owe(&conn, MESSAGE_OBFUSCATION_TIMER, secret, DestructionType::Obfuscation, -1);
        owe(&conn, MESSAGE_DELETION_TIMER, doomed, DestructionType::Deletion, -1);
        doomed
    };

    let mut svc = LifecycleService::new(common::create_test_config_handle(), db.clone(), bus.clone());
    svc.init().unwrap();
    let report = svc.startup().await.unwrap();
    assert_eq!(
        report,
        StartupReport {
            orphans_purged: 1,
            obfuscation_timers_restored: 1,
            deletion_timers_restored: 1,
        }
    );
    assert_eq!(svc.phase(), LifecyclePhase::Running);

    let mut seen = Vec::new();
    while let Some(event) = common::next_app_event(&mut rx, Duration::from_secs(5)).await {
        seen.push(event);
        if seen.len() == 5 {
            break;
        }
    }
    assert!(seen.contains(&AppEvent::OrphansPurged { count: 1 }));
    assert!(seen.contains(&AppEvent::TimersRestored {
        context: ContextKind::Ui,
        count: 1
    }));
    assert!(seen.contains(&AppEvent::TimersRestored {
        context: ContextKind::Sync,
        count: 1
    }));
    assert!(seen.contains(&AppEvent::MessageObfuscated { message_id: secret }));
    assert!(seen.contains(&AppEvent::MessageDeletedForEveryone {
        message_id: doomed,
        conversation_id
    }));

    svc.shutdown().unwrap();
    assert_eq!(svc.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn test_housekeeping_can_be_disabled() {
    let (db, _dir) = common::create_test_db();
    let bus = common::create_test_event_bus();
    let (_, message_id) = common::seed_single_message(&db, "waiting");
    {
        let conn = db.conn().unwrap();
        let mut orphan = Message::new(MessageKind::Text);
        orphan.insert(&conn).unwrap();
        owe(&conn, MESSAGE_OBFUSCATION_TIMER, message_id, DestructionType::Obfuscation, -1);
    }

    let mut config = AppConfig::default();
    config.ephemeral.restore_timers_on_startup = false;
    config.ephemeral.purge_orphans_on_startup = false;

    let mut svc = LifecycleService::new(ConfigHandle::new(config), db.clone(), bus);
    let report = svc.startup().await.unwrap();
    assert_eq!(report, StartupReport::default());
    svc.shutdown_sequence().unwrap();

    let conn = db.conn().unwrap();
    assert_eq!(PendingDestruction::load_all(&conn).unwrap().len(), 1);
    let stats = db.stats().unwrap();
    assert_eq!(stats.visible_messages, 1);
    let orphans: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM messages WHERE visible_in_conversation_id IS NULL AND hidden_in_conversation_id IS NULL",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 1);
}

#[tokio::test]
async fn test_shutdown_keeps_future_timers_owed() {
    let (db, _dir) = common::create_test_db();
    let bus = common::create_test_event_bus();
    let (_, message_id) = common::seed_single_message(&db, "later");
    {
        let conn = db.conn().unwrap();
        owe(&conn, MESSAGE_DELETION_TIMER, message_id, DestructionType::Deletion, 3600);
    }

    let mut svc = LifecycleService::new(common::create_test_config_handle(), db.clone(), bus);
    let report = svc.startup().await.unwrap();
    assert_eq!(report.deletion_timers_restored, 1);

    let running = svc
        .contexts()
        .unwrap()
        .sync
        .perform_async(move |state| state.message_deletion_timer().is_timer_running(message_id))
        .await
        .unwrap();
    assert!(running);

    svc.shutdown_sequence().unwrap();
    assert_eq!(svc.phase(), LifecyclePhase::Stopped);
    assert!(svc.contexts().is_none());

    let conn = db.conn().unwrap();
    let owed = PendingDestruction::load_all(&conn).unwrap();
    assert_eq!(owed.len(), 1);
    assert_eq!(owed[0].message_id, message_id);
}
