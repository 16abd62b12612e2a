//! One-shot lookups against the session collection, shared by the
//! conversation channel and the request-acceptance flow.

use tracing::{debug, info};

use crate::chat::{CHAT_SESSIONS, conversation_id, conversation_key};
use crate::error::ChatError;
use crate::store::{DocumentStore, FieldValue, Fields, Filter, Query, StoreError};

/// Resolves the session id for an unordered participant pair, if a session
/// exists.
pub async fn find_session(
    store: &dyn DocumentStore,
    user_a: &str,
    user_b: &str,
) -> Result<Option<String>, StoreError> {
    let (user1, user2) = conversation_key(user_a, user_b);
    let docs = store
        .get_once(
            Query::collection(CHAT_SESSIONS)
                .filter(Filter::new().eq("user1", user1).eq("user2", user2))
                .limit(1),
        )
        .await?;
    Ok(docs.first().map(|doc| doc.id.clone()))
}

/// Finds the session for the pair, creating it when missing.
///
/// The created document's id is derived from the canonical pair key and the
/// write is an upsert, so two callers racing through the check-then-create
/// path converge on the same record.
pub async fn ensure_session(
    store: &dyn DocumentStore,
    user_a: &str,
    user_b: &str,
) -> Result<String, ChatError> {
    if user_a.is_empty() || user_b.is_empty() {
        return Err(ChatError::InvalidParticipants);
    }

    match find_session(store, user_a, user_b).await {
        Ok(Some(id)) => {
            debug!("Session already exists: {}", id);
            return Ok(id);
        }
        Ok(None) => {}
        Err(e) => return Err(ChatError::SessionLookupFailed(e.to_string())),
    }

    let (user1, user2) = conversation_key(user_a, user_b);
    let id = conversation_id(user_a, user_b);

    let mut fields = Fields::new();
    fields.insert("user1".to_string(), FieldValue::Text(user1.clone()));
    fields.insert("user2".to_string(), FieldValue::Text(user2.clone()));
    fields.insert(
        "participants".to_string(),
        FieldValue::TextArray(vec![user1, user2]),
    );
    fields.insert("createdAt".to_string(), FieldValue::ServerTimestamp);
    fields.insert(
        "lastMessageContent".to_string(),
        FieldValue::Text(String::new()),
    );
    fields.insert(
        "lastMessageTimestamp".to_string(),
        FieldValue::ServerTimestamp,
    );

    store
        .update_document(CHAT_SESSIONS, &id, fields, true)
        .await
        .map_err(|e| ChatError::SessionCreateFailed(e.to_string()))?;

    info!("Created chat session {}", id);
    Ok(id)
}
