//! Call event merging and message state tests against a pooled database.

mod common;

use chrono::Utc;

use pl_models::{Conversation, DeliveryState, Message, SystemMessageType};

#[test]
fn test_consecutive_missed_calls_from_one_user_merge() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let mut conv = common::seed_conversation(&conn);
    let conv_id = conv.id.unwrap();

    let parent = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    let child = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();

    assert_eq!(parent.visible_in_conversation_id, Some(conv_id));
    assert_eq!(parent.hidden_in_conversation_id, None);
    assert_eq!(child.visible_in_conversation_id, None);
    assert_eq!(child.hidden_in_conversation_id, Some(conv_id));
    assert_eq!(child.parent_message_id, parent.id);
    assert_eq!(child.conversation_id(), Some(conv_id));

    let children = parent.child_messages(&conn).unwrap();
    assert_eq!(common::ids(&children), vec![child.id.unwrap()]);
    assert_eq!(conv.message_count(&conn).unwrap(), 1);
    assert_eq!(child.system_users(&conn).unwrap(), vec![ann]);
}

#[test]
fn test_third_missed_call_joins_the_same_parent() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let mut conv = common::seed_conversation(&conn);

    let parent = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    conv.append_missed_call(&conn, ann, Utc::now()).unwrap();

    assert_eq!(parent.child_messages(&conn).unwrap().len(), 2);
}

#[test]
fn test_intervening_message_prevents_merge() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let mut conv = common::seed_conversation(&conn);

    let first = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    conv.append_knock(&conn, ann).unwrap();
    let second = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();

    assert!(second.parent_message_id.is_none());
    assert!(second.visible_in_conversation_id.is_some());
    assert!(first.child_messages(&conn).unwrap().is_empty());
    assert_eq!(conv.message_count(&conn).unwrap(), 3);
}

#[test]
fn test_different_caller_prevents_merge() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let bob = common::seed_user(&conn, "Bob");
    let mut conv = common::seed_conversation(&conn);

    conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    let from_bob = conv.append_missed_call(&conn, bob, Utc::now()).unwrap();

    assert!(from_bob.parent_message_id.is_none());
    assert_eq!(conv.message_count(&conn).unwrap(), 2);
    assert!(conv.hidden_messages(&conn).unwrap().is_empty());
}

#[test]
fn test_performed_calls_merge_and_keep_durations() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let mut conv = common::seed_conversation(&conn);

    let parent = conv.append_performed_call(&conn, 42, ann).unwrap();
    let child = conv.append_performed_call(&conn, 60, ann).unwrap();

    assert_eq!(child.parent_message_id, parent.id);
    let stored_parent = Message::find_by_id(&conn, parent.id.unwrap()).unwrap().unwrap();
    let stored_child = Message::find_by_id(&conn, child.id.unwrap()).unwrap().unwrap();
    assert_eq!(stored_parent.duration, Some(42));
    assert_eq!(stored_child.duration, Some(60));
    assert_eq!(stored_child.system_type, Some(SystemMessageType::PerformedCall));
}

#[test]
fn test_performed_call_does_not_merge_into_missed_call() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let mut conv = common::seed_conversation(&conn);

    conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    let performed = conv.append_performed_call(&conn, 30, ann).unwrap();
    assert!(performed.parent_message_id.is_none());
}

#[test]
fn test_merge_state_survives_reload() {
    let (db, _dir) = common::create_test_db();
    let (conv_id, ann) = {
        let conn = db.conn().unwrap();
        let ann = common::seed_user(&conn, "Ann");
        let mut conv = common::seed_conversation(&conn);
        conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
        (conv.id.unwrap(), ann)
    };

    let conn = db.conn().unwrap();
    let mut conv = Conversation::get(&conn, conv_id).unwrap();
    let child = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    assert!(child.parent_message_id.is_some());
}

#[test]
fn test_deleting_the_parent_starts_a_new_call_group() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let mut conv = common::seed_conversation(&conn);

    let mut parent = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    parent.delete_for_everyone(&conn).unwrap();

    let mut conv = Conversation::get(&conn, conv.id.unwrap()).unwrap();
    let next = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    assert!(next.parent_message_id.is_none());
    assert!(next.visible_in_conversation_id.is_some());
}

#[test]
fn test_deleted_parent_is_not_reused_by_the_same_handle() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let mut conv = common::seed_conversation(&conn);
    let conv_id = conv.id.unwrap();

    let mut parent = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    parent.delete_for_everyone(&conn).unwrap();

    let next = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    assert!(next.parent_message_id.is_none());
    assert_eq!(next.visible_in_conversation_id, Some(conv_id));
    assert!(parent.child_messages(&conn).unwrap().is_empty());
    assert_eq!(conv.last_call.map(|l| l.parent_id), next.id);
}

#[test]
fn test_message_appended_through_another_handle_prevents_merge() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let mut first_handle = common::seed_conversation(&conn);
    let conv_id = first_handle.id.unwrap();

    let first = first_handle.append_missed_call(&conn, ann, Utc::now()).unwrap();

    let mut second_handle = Conversation::get(&conn, conv_id).unwrap();
    second_handle.append_text(&conn, ann, "are you there?").unwrap();

    let second = first_handle.append_missed_call(&conn, ann, Utc::now()).unwrap();
    assert!(second.parent_message_id.is_none());
    assert_eq!(second.visible_in_conversation_id, Some(conv_id));
    assert!(first.child_messages(&conn).unwrap().is_empty());
    assert_eq!(first_handle.message_count(&conn).unwrap(), 3);
}

#[test]
fn test_text_from_a_fresh_handle_clears_stored_merge_state() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let mut conv = common::seed_conversation(&conn);
    let conv_id = conv.id.unwrap();

    conv.append_missed_call(&conn, ann, Utc::now()).unwrap();

    // Loaded before the call, so it holds no merge state of its own.
    let mut stale = Conversation {
        last_call: None,
        ..Conversation::get(&conn, conv_id).unwrap()
    };
    stale.append_text(&conn, ann, "hi").unwrap();

    let reloaded = Conversation::get(&conn, conv_id).unwrap();
    assert!(reloaded.last_call.is_none());
}

#[test]
fn test_message_inserted_outside_the_conversation_api_prevents_merge() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let mut conv = common::seed_conversation(&conn);
    let conv_id = conv.id.unwrap();

    let first = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();

    let mut direct = Message::text(ann, "written by another writer");
    direct.visible_in_conversation_id = Some(conv_id);
    direct.insert(&conn).unwrap();

    let second = conv.append_missed_call(&conn, ann, Utc::now()).unwrap();
    assert!(second.parent_message_id.is_none());
    assert!(first.child_messages(&conn).unwrap().is_empty());
}

#[test]
fn test_delivery_state_follows_confirmations_then_event_id() {
    let (db, _dir) = common::create_test_db();
    let conn = db.conn().unwrap();
    let ann = common::seed_user(&conn, "Ann");
    let bob = common::seed_user(&conn, "Bob");
    let mut conv = common::seed_conversation(&conn);

    let mut msg = conv.append_text(&conn, ann, "hello").unwrap();
    assert_eq!(msg.delivery_state(&conn).unwrap(), DeliveryState::Pending);

    msg.mark_expired(&conn).unwrap();
    assert_eq!(msg.delivery_state(&conn).unwrap(), DeliveryState::FailedToSend);

    msg.mark_sent(&conn, "event-1", Utc::now()).unwrap();
    assert_eq!(msg.delivery_state(&conn).unwrap(), DeliveryState::Sent);

    msg.add_confirmation(&conn, bob).unwrap();
    assert_eq!(msg.delivery_state(&conn).unwrap(), DeliveryState::Delivered);
}
