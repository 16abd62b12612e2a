use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use mingle_chat::chat::{CHAT_SESSIONS, USERS, messages_collection};
use mingle_chat::queries::{ensure_session, find_session};
use mingle_chat::store::{DocumentStore, FieldValue, Fields, MemoryStore, Query};
use mingle_chat::{ChannelPhase, ChatError, ConversationChannel, SessionDirectory};

fn new_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

async fn seed_user(store: &MemoryStore, id: &str, name: &str, surname: &str) {
    let mut fields = Fields::new();
    fields.insert("name".to_string(), FieldValue::Text(name.to_string()));
    fields.insert("surname".to_string(), FieldValue::Text(surname.to_string()));
    store.update_document(USERS, id, fields, true).await.unwrap();
}

async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, mut predicate: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            {
                let state = rx.borrow_and_update();
                if predicate(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("timed out waiting for published state")
}

#[tokio::test]
async fn test_open_and_send_appends_message_and_updates_summary() {
    let store = new_store();
    seed_user(&store, "alice", "Alice", "Anders").await;
    seed_user(&store, "bob", "Bob", "Baker").await;
    let session_id = ensure_session(store.as_ref(), "alice", "bob").await.unwrap();

    let channel = ConversationChannel::new(store.clone(), "alice", "bob").unwrap();
    assert!(channel.open().await.unwrap());
    channel.send("hello").await.unwrap();

    let mut rx = channel.subscribe();
    let state = wait_until(&mut rx, |s| s.messages.len() == 1).await;
    assert_eq!(state.messages[0].content, "hello");
    assert_eq!(state.messages[0].from_user_id, "alice");

    let messages = store
        .get_once(Query::collection(messages_collection(&session_id)))
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text("content"), Some("hello"));
    assert_eq!(messages[0].text("fromUserId"), Some("alice"));

    let sessions = store.get_once(Query::collection(CHAT_SESSIONS)).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].text("lastMessageContent"), Some("hello"));
    // The summary write lands after the message append.
    assert!(
        sessions[0].timestamp("lastMessageTimestamp").unwrap()
            >= messages[0].timestamp("timestamp").unwrap()
    );
}

#[tokio::test]
async fn test_open_resolves_same_session_regardless_of_order() {
    let store = new_store();
    ensure_session(store.as_ref(), "alice", "bob").await.unwrap();

    let forward = ConversationChannel::new(store.clone(), "alice", "bob").unwrap();
    let reverse = ConversationChannel::new(store.clone(), "bob", "alice").unwrap();
    assert!(forward.open().await.unwrap());
    assert!(reverse.open().await.unwrap());

    let forward_id = forward.state().session_id().unwrap().to_string();
    let reverse_id = reverse.state().session_id().unwrap().to_string();
    assert_eq!(forward_id, reverse_id);
}

#[tokio::test]
async fn test_concurrent_ensure_session_creates_single_record() {
    let store = new_store();
    store.set_op_delay(Duration::from_millis(20));

    let (a, b) = tokio::join!(
        ensure_session(store.as_ref(), "alice", "bob"),
        ensure_session(store.as_ref(), "bob", "alice"),
    );
    assert_eq!(a.unwrap(), b.unwrap());

    let sessions = store.get_once(Query::collection(CHAT_SESSIONS)).await.unwrap();
    assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn test_blank_send_is_a_noop() {
    let store = new_store();
    let session_id = ensure_session(store.as_ref(), "alice", "bob").await.unwrap();

    let channel = ConversationChannel::new(store.clone(), "alice", "bob").unwrap();
    assert!(channel.open().await.unwrap());
    channel.send("").await.unwrap();
    channel.send("   ").await.unwrap();

    let messages = store
        .get_once(Query::collection(messages_collection(&session_id)))
        .await
        .unwrap();
    assert!(messages.is_empty());

    let sessions = store.get_once(Query::collection(CHAT_SESSIONS)).await.unwrap();
    assert_eq!(sessions[0].text("lastMessageContent"), Some(""));
}

#[tokio::test]
async fn test_send_without_session_is_a_noop() {
    let store = new_store();
    let channel = ConversationChannel::new(store.clone(), "alice", "bob").unwrap();

    assert!(!channel.open().await.unwrap());
    let state = channel.state();
    assert_eq!(state.phase, ChannelPhase::NoSession);
    assert!(!state.session_exists);

    channel.send("hello?").await.unwrap();
    let sessions = store.get_once(Query::collection(CHAT_SESSIONS)).await.unwrap();
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_reopen_after_session_appears() {
    let store = new_store();
    let channel = ConversationChannel::new(store.clone(), "alice", "bob").unwrap();
    assert!(!channel.open().await.unwrap());

    let session_id = ensure_session(store.as_ref(), "alice", "bob").await.unwrap();
    assert!(channel.open().await.unwrap());
    assert_eq!(channel.state().session_id(), Some(session_id.as_str()));

    channel.send("finally").await.unwrap();
    let messages = store
        .get_once(Query::collection(messages_collection(&session_id)))
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn test_reopen_keeps_one_message_subscription_and_close_clears_all() {
    let store = new_store();
    ensure_session(store.as_ref(), "alice", "bob").await.unwrap();

    let channel = ConversationChannel::new(store.clone(), "alice", "bob").unwrap();
    assert!(channel.open().await.unwrap());
    assert!(channel.open().await.unwrap());

    // One message stream, one recipient profile listener.
    assert_eq!(store.active_query_listeners(), 1);
    assert_eq!(store.active_document_listeners(), 1);

    channel.close().await;
    assert_eq!(channel.state().phase, ChannelPhase::Closed);
    assert_eq!(store.active_query_listeners(), 0);
    assert_eq!(store.active_document_listeners(), 0);

    // Close is idempotent and later commands are no-ops.
    channel.close().await;
    assert!(!channel.open().await.unwrap());
    channel.send("into the void").await.unwrap();
}

#[tokio::test]
async fn test_message_window_keeps_trailing_hundred() {
    let store = new_store();
    ensure_session(store.as_ref(), "alice", "bob").await.unwrap();

    let channel = ConversationChannel::new(store.clone(), "alice", "bob").unwrap();
    assert!(channel.open().await.unwrap());
    for i in 0..105 {
        channel.send(format!("m{i}")).await.unwrap();
    }

    let mut rx = channel.subscribe();
    let state = wait_until(&mut rx, |s| {
        s.messages.len() == 100 && s.messages.last().is_some_and(|m| m.content == "m104")
    })
    .await;
    assert_eq!(state.messages[0].content, "m5");
    // Oldest first within the window.
    assert!(state.messages[0].timestamp < state.messages[99].timestamp);
}

#[tokio::test]
async fn test_send_failure_is_surfaced_not_fatal() {
    let store = new_store();
    let session_id = ensure_session(store.as_ref(), "alice", "bob").await.unwrap();

    let channel = ConversationChannel::new(store.clone(), "alice", "bob").unwrap();
    assert!(channel.open().await.unwrap());

    store.set_failing(&messages_collection(&session_id), true);
    let result = channel.send("hello").await;
    assert!(matches!(result, Err(ChatError::SendFailed(_))));
    assert!(matches!(channel.state().error, Some(ChatError::SendFailed(_))));

    // The channel recovers once the store does.
    store.set_failing(&messages_collection(&session_id), false);
    channel.send("hello again").await.unwrap();
}

#[tokio::test]
async fn test_message_stream_error_keeps_last_messages() {
    let store = new_store();
    let session_id = ensure_session(store.as_ref(), "alice", "bob").await.unwrap();

    let channel = ConversationChannel::new(store.clone(), "alice", "bob").unwrap();
    assert!(channel.open().await.unwrap());
    channel.send("hello").await.unwrap();

    let mut rx = channel.subscribe();
    wait_until(&mut rx, |s| s.messages.len() == 1).await;

    store.inject_query_error(&messages_collection(&session_id));
    let state = wait_until(&mut rx, |s| s.error.is_some()).await;
    assert!(matches!(state.error, Some(ChatError::MessageStreamFailed(_))));
    assert_eq!(state.messages.len(), 1);
}

#[tokio::test]
async fn test_empty_participants_are_rejected() {
    let store = new_store();
    assert_eq!(
        ConversationChannel::new(store.clone(), "", "bob").err(),
        Some(ChatError::InvalidParticipants)
    );
    assert_eq!(
        ConversationChannel::new(store.clone(), "alice", "").err(),
        Some(ChatError::InvalidParticipants)
    );
    assert!(matches!(
        SessionDirectory::start(store.clone(), ""),
        Err(ChatError::NotAuthenticated)
    ));
    assert_eq!(
        ensure_session(store.as_ref(), "", "bob").await.err(),
        Some(ChatError::InvalidParticipants)
    );
}

#[tokio::test]
async fn test_directory_orders_sessions_most_recent_first() {
    let store = new_store();
    for (id, name) in [("bob", "Bob"), ("carol", "Carol"), ("dave", "Dave")] {
        seed_user(&store, id, name, "Example").await;
    }
    let bob_session = ensure_session(store.as_ref(), "alice", "bob").await.unwrap();
    let carol_session = ensure_session(store.as_ref(), "alice", "carol").await.unwrap();
    let dave_session = ensure_session(store.as_ref(), "alice", "dave").await.unwrap();

    // Touch the sessions out of creation order so ordering provably follows
    // the last-message timestamp.
    for session_id in [&carol_session, &dave_session, &bob_session] {
        let mut fields = Fields::new();
        fields.insert(
            "lastMessageTimestamp".to_string(),
            FieldValue::ServerTimestamp,
        );
        store
            .update_document(CHAT_SESSIONS, session_id, fields, false)
            .await
            .unwrap();
    }

    let mut directory = SessionDirectory::start(store.clone(), "alice").unwrap();
    let mut rx = directory.subscribe();
    let state = wait_until(&mut rx, |s| s.sessions.len() == 3).await;
    let order: Vec<&str> = state
        .sessions
        .iter()
        .map(|s| s.other_participant_id.as_str())
        .collect();
    assert_eq!(order, vec!["bob", "dave", "carol"]);

    directory.stop().await;
}

#[tokio::test]
async fn test_directory_joins_profiles_and_refreshes_them() {
    let store = new_store();
    ensure_session(store.as_ref(), "alice", "bob").await.unwrap();

    let mut directory = SessionDirectory::start(store.clone(), "alice").unwrap();
    let mut rx = directory.subscribe();

    // No profile document yet: the entry degrades instead of failing.
    let state = wait_until(&mut rx, |s| {
        s.sessions.len() == 1 && s.sessions[0].other_name == "Unknown"
    })
    .await;
    assert_eq!(state.sessions[0].other_surname, "User");

    seed_user(&store, "bob", "Bob", "Baker").await;
    let state = wait_until(&mut rx, |s| {
        s.sessions.first().is_some_and(|e| e.other_name == "Bob")
    })
    .await;
    assert_eq!(state.sessions[0].display_name(), "Bob Baker");

    directory.stop().await;
}

#[tokio::test]
async fn test_directory_suppresses_unchanged_republish() {
    let store = new_store();
    seed_user(&store, "bob", "Bob", "Baker").await;
    let session_id = ensure_session(store.as_ref(), "alice", "bob").await.unwrap();

    let mut directory = SessionDirectory::start(store.clone(), "alice").unwrap();
    let mut rx = directory.subscribe();
    let state = wait_until(&mut rx, |s| {
        s.sessions.len() == 1 && s.sessions[0].other_name == "Bob"
    })
    .await;
    let content_before = state.sessions[0].last_message_content.clone();
    let count_before = directory.update_count();

    // Change a field outside the (session id, last message timestamp)
    // identity: the delivery must not become an observable update.
    let mut fields = Fields::new();
    fields.insert(
        "lastMessageContent".to_string(),
        FieldValue::Text("something else".to_string()),
    );
    store
        .update_document(CHAT_SESSIONS, &session_id, fields, false)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(directory.update_count(), count_before);
    assert_eq!(directory.state().sessions[0].last_message_content, content_before);

    directory.stop().await;
}

#[tokio::test]
async fn test_directory_keeps_list_on_error_and_clears_on_empty_snapshot() {
    let store = new_store();
    seed_user(&store, "bob", "Bob", "Baker").await;
    let session_id = ensure_session(store.as_ref(), "alice", "bob").await.unwrap();

    let mut directory = SessionDirectory::start(store.clone(), "alice").unwrap();
    let mut rx = directory.subscribe();
    wait_until(&mut rx, |s| s.sessions.len() == 1).await;

    store.inject_query_error(CHAT_SESSIONS);
    let state = wait_until(&mut rx, |s| s.error.is_some()).await;
    assert!(matches!(state.error, Some(ChatError::DirectoryUnavailable(_))));
    // Stale-but-present beats empty.
    assert_eq!(state.sessions.len(), 1);

    // An explicit zero-document snapshot does clear the list, and the
    // profile listeners are reconciled away with it.
    assert!(store.delete_document(CHAT_SESSIONS, &session_id));
    let state = wait_until(&mut rx, |s| s.sessions.is_empty() && s.error.is_none()).await;
    assert!(state.sessions.is_empty());
    assert_eq!(store.active_document_listeners(), 0);

    directory.stop().await;
}

#[tokio::test]
async fn test_directory_stop_cancels_every_subscription() {
    let store = new_store();
    seed_user(&store, "bob", "Bob", "Baker").await;
    ensure_session(store.as_ref(), "alice", "bob").await.unwrap();

    let mut directory = SessionDirectory::start(store.clone(), "alice").unwrap();
    let mut rx = directory.subscribe();
    wait_until(&mut rx, |s| s.sessions.len() == 1 && s.sessions[0].other_name == "Bob").await;
    assert_eq!(store.active_query_listeners(), 1);
    assert_eq!(store.active_document_listeners(), 1);

    directory.stop().await;
    assert_eq!(store.active_query_listeners(), 0);
    assert_eq!(store.active_document_listeners(), 0);

    // Stop is idempotent.
    directory.stop().await;
}

#[tokio::test]
async fn test_find_session_returns_none_without_session() {
    let store = new_store();
    assert_eq!(find_session(store.as_ref(), "alice", "bob").await.unwrap(), None);

    let id = ensure_session(store.as_ref(), "alice", "bob").await.unwrap();
    assert_eq!(
        find_session(store.as_ref(), "bob", "alice").await.unwrap(),
        Some(id)
    );
}
