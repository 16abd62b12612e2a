use std::sync::Arc;
use std::time::Duration;

use mingle_chat::chat::USERS;
use mingle_chat::queries::ensure_session;
use mingle_chat::store::{DocumentStore, FieldValue, Fields, MemoryStore};
use mingle_chat::{ConversationChannel, SessionDirectory};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(MemoryStore::new());
    seed_user(store.as_ref(), "alice", "Alice", "Anders").await;
    seed_user(store.as_ref(), "bob", "Bob", "Baker").await;

    let session_id = ensure_session(store.as_ref(), "alice", "bob")
        .await
        .expect("session creation failed");
    tracing::info!("Session ready: {}", session_id);

    let store: Arc<dyn DocumentStore> = store;
    let mut directory =
        SessionDirectory::start(store.clone(), "alice").expect("directory start failed");

    let alice = ConversationChannel::new(store.clone(), "alice", "bob").unwrap();
    let bob = ConversationChannel::new(store.clone(), "bob", "alice").unwrap();
    alice.open().await.expect("open failed");
    bob.open().await.expect("open failed");

    alice
        .send("Hey Bob, up for the climbing meetup tonight?")
        .await
        .expect("send failed");
    bob.send("Count me in, see you at 7.").await.expect("send failed");

    // Let the subscriptions fan the writes back out.
    tokio::time::sleep(Duration::from_millis(100)).await;

    for message in &bob.state().messages {
        tracing::info!(
            "[{}] {}: {}",
            message.timestamp.format("%H:%M:%S"),
            message.from_user_id,
            message.content
        );
    }
    for summary in &directory.state().sessions {
        tracing::info!(
            "Chat with {} — last message: {}",
            summary.display_name(),
            summary.last_message_content.as_deref().unwrap_or("<none>")
        );
    }

    alice.close().await;
    bob.close().await;
    directory.stop().await;
}

async fn seed_user(store: &MemoryStore, id: &str, name: &str, surname: &str) {
    let mut fields = Fields::new();
    fields.insert("name".to_string(), FieldValue::Text(name.to_string()));
    fields.insert("surname".to_string(), FieldValue::Text(surname.to_string()));
    store
        .update_document(USERS, id, fields, true)
        .await
        .expect("seeding user failed");
}
