use tracing::{debug, warn};

use super::ChannelPhase;
use super::channel::ChannelActor;
use super::messages::ChannelMessage;
use crate::chat::{CHAT_SESSIONS, ChatMessage, UserProfile, messages_collection};
use crate::error::ChatError;
use crate::queries;
use crate::store::{DocumentSnapshot, FieldValue, Fields, Query, QuerySnapshot};

impl ChannelActor {
    pub(super) async fn handle_open(&mut self) -> Result<bool, ChatError> {
        if self.is_closed() {
            debug!("Open ignored: channel towards {} is closed", self.other_user_id);
            return Ok(false);
        }

        let previous_phase = self.state.phase.clone();
        self.state.phase = ChannelPhase::ResolvingSession;
        self.publish();

        let found = queries::find_session(
            self.store.as_ref(),
            &self.current_user_id,
            &self.other_user_id,
        )
        .await;

        match found {
            Ok(Some(session_id)) => {
                self.state.session_exists = true;
                self.state.error = None;
                if self.session_id.as_deref() == Some(session_id.as_str())
                    && self.messages_guard.is_some()
                {
                    // Same session as before: the existing stream stays up.
                    self.state.phase = ChannelPhase::Active(session_id);
                    self.publish();
                    return Ok(true);
                }
                if let Some(guard) = self.messages_guard.take() {
                    guard.cancel();
                }
                self.observe_messages(&session_id);
                self.session_id = Some(session_id.clone());
                self.state.phase = ChannelPhase::Active(session_id);
                self.publish();
                Ok(true)
            }
            Ok(None) => {
                debug!(
                    "No session between {} and {}",
                    self.current_user_id, self.other_user_id
                );
                if let Some(guard) = self.messages_guard.take() {
                    guard.cancel();
                }
                self.session_id = None;
                self.state.session_exists = false;
                self.state.phase = ChannelPhase::NoSession;
                self.state.messages.clear();
                self.state.error = None;
                self.publish();
                Ok(false)
            }
            Err(e) => {
                warn!("Session lookup failed towards {}: {}", self.other_user_id, e);
                let error = ChatError::SessionLookupFailed(e.to_string());
                self.state.session_exists = false;
                self.state.phase = previous_phase;
                self.state.error = Some(error.clone());
                self.publish();
                Err(error)
            }
        }
    }

    /// Attaches to the trailing window of the session's message stream and
    /// forwards its snapshots back into the actor loop.
    fn observe_messages(&mut self, session_id: &str) {
        let query = Query::collection(messages_collection(session_id))
            .order_by("timestamp", false)
            .limit_to_last(100);
        let mut subscription = self.store.subscribe_query(query);
        self.messages_guard = Some(subscription.guard());

        let commands = self.commands.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            while let Some(snapshot) = subscription.recv().await {
                let event = ChannelMessage::Messages {
                    session_id: session_id.clone(),
                    snapshot,
                };
                if commands.send(event).is_err() {
                    break;
                }
            }
        });
    }

    pub(super) async fn handle_send(&mut self, content: String) -> Result<(), ChatError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let Some(session_id) = self.state.session_id().map(str::to_string) else {
            debug!("Send dropped: no active session with {}", self.other_user_id);
            return Ok(());
        };

        let mut fields = Fields::new();
        fields.insert(
            "fromUserId".to_string(),
            FieldValue::Text(self.current_user_id.clone()),
        );
        fields.insert("content".to_string(), FieldValue::Text(trimmed.to_string()));
        fields.insert("timestamp".to_string(), FieldValue::ServerTimestamp);

        if let Err(e) = self
            .store
            .add_document(&messages_collection(&session_id), fields)
            .await
        {
            warn!("Failed to send message to session {}: {}", session_id, e);
            let error = ChatError::SendFailed(e.to_string());
            self.state.error = Some(error.clone());
            self.publish();
            return Err(error);
        }

        // Second, non-atomic write: the summary is a cache over the message
        // list, so a failure here leaves it stale rather than losing data.
        let mut summary = Fields::new();
        summary.insert(
            "lastMessageContent".to_string(),
            FieldValue::Text(trimmed.to_string()),
        );
        summary.insert(
            "lastMessageTimestamp".to_string(),
            FieldValue::ServerTimestamp,
        );
        if let Err(e) = self
            .store
            .update_document(CHAT_SESSIONS, &session_id, summary, false)
            .await
        {
            warn!(
                "Failed to update last message for session {}: {}",
                session_id, e
            );
        }
        Ok(())
    }

    pub(super) fn handle_messages(&mut self, session_id: String, snapshot: QuerySnapshot) {
        if self.is_closed() || self.session_id.as_deref() != Some(session_id.as_str()) {
            debug!("Dropping stale message snapshot for session {}", session_id);
            return;
        }
        match snapshot {
            Ok(docs) => {
                let messages: Vec<ChatMessage> =
                    docs.iter().filter_map(ChatMessage::from_document).collect();
                if messages != self.state.messages {
                    self.state.messages = messages;
                    self.publish();
                }
            }
            Err(e) => {
                warn!("Message stream failed for session {}: {}", session_id, e);
                self.state.error = Some(ChatError::MessageStreamFailed(e.to_string()));
                self.publish();
            }
        }
    }

    pub(super) fn handle_recipient_profile(&mut self, snapshot: DocumentSnapshot) {
        if self.is_closed() {
            return;
        }
        let profile = match snapshot {
            Ok(Some(doc)) => UserProfile::from_document(&doc),
            Ok(None) => {
                debug!("Recipient document not found for {}", self.other_user_id);
                UserProfile::unknown()
            }
            Err(e) => {
                warn!(
                    "Recipient profile subscription failed for {}: {}",
                    self.other_user_id, e
                );
                self.state.error = Some(ChatError::ProfileLookupFailed(e.to_string()));
                self.state.recipient_name = "Unknown".to_string();
                self.state.recipient_surname = String::new();
                self.state.recipient_avatar_url = None;
                self.publish();
                return;
            }
        };

        if self.state.recipient_name != profile.name
            || self.state.recipient_surname != profile.surname
            || self.state.recipient_avatar_url != profile.avatar_url
        {
            self.state.recipient_name = profile.name;
            self.state.recipient_surname = profile.surname;
            self.state.recipient_avatar_url = profile.avatar_url;
            self.publish();
        }
    }

    pub(super) fn handle_close(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Some(guard) = self.messages_guard.take() {
            guard.cancel();
        }
        self.profile_guard.cancel();
        self.session_id = None;
        self.state.phase = ChannelPhase::Closed;
        self.state.session_exists = false;
        self.publish();
        debug!("Conversation channel towards {} closed", self.other_user_id);
    }
}
