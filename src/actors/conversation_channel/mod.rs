mod channel;
mod handlers;
mod messages;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::chat::{ChatMessage, USERS};
use crate::error::ChatError;
use crate::store::DocumentStore;

use channel::ChannelActor;
use messages::ChannelMessage;

/// Lifecycle of a two-party conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ChannelPhase {
    #[default]
    Uninitialized,
    ResolvingSession,
    /// No session exists for the pair yet; nothing is streamed.
    NoSession,
    Active(String),
    Closed,
}

/// Snapshot of one conversation as published to consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelState {
    pub phase: ChannelPhase,
    pub session_exists: bool,
    /// Trailing window of the session's messages, oldest first.
    pub messages: Vec<ChatMessage>,
    pub recipient_name: String,
    pub recipient_surname: String,
    pub recipient_avatar_url: Option<String>,
    pub error: Option<ChatError>,
}

impl ChannelState {
    pub fn session_id(&self) -> Option<&str> {
        match &self.phase {
            ChannelPhase::Active(id) => Some(id),
            _ => None,
        }
    }
}

/// One two-party conversation: session resolution, message streaming, and
/// send.
///
/// The channel owns at most one message subscription at a time; re-opening
/// against an unchanged session keeps the existing stream. All operations
/// are serialized through a background task that is the sole writer of the
/// published [`ChannelState`].
pub struct ConversationChannel {
    commands: mpsc::UnboundedSender<ChannelMessage>,
    state_rx: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl ConversationChannel {
    /// Validates the pair and starts watching the other participant's
    /// profile. The session itself is not resolved until [`open`].
    ///
    /// [`open`]: ConversationChannel::open
    pub fn new(
        store: Arc<dyn DocumentStore>,
        current_user_id: impl Into<String>,
        other_user_id: impl Into<String>,
    ) -> Result<Self, ChatError> {
        let current_user_id = current_user_id.into();
        let other_user_id = other_user_id.into();
        if current_user_id.is_empty() || other_user_id.is_empty() {
            return Err(ChatError::InvalidParticipants);
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::default());

        let mut profile_sub = store.subscribe_document(USERS, &other_user_id);
        let profile_guard = profile_sub.guard();
        let pump = commands_tx.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = profile_sub.recv().await {
                if pump.send(ChannelMessage::RecipientProfile(snapshot)).is_err() {
                    break;
                }
            }
        });

        let actor = ChannelActor::new(
            store,
            current_user_id,
            other_user_id,
            commands_rx,
            commands_tx.clone(),
            state_tx,
            profile_guard,
        );
        let task = tokio::spawn(actor.run());

        Ok(Self {
            commands: commands_tx,
            state_rx,
            task,
        })
    }

    /// Resolves the session for the pair; when one exists, attaches to its
    /// message stream and returns `true`. Safe to call again later, e.g.
    /// after the counterpart accepted a request and the session appeared.
    pub async fn open(&self) -> Result<bool, ChatError> {
        let (respond_to, response) = oneshot::channel();
        if self
            .commands
            .send(ChannelMessage::Open { respond_to })
            .is_err()
        {
            return Err(ChatError::SessionLookupFailed(
                "channel task is gone".to_string(),
            ));
        }
        response.await.unwrap_or_else(|_| {
            Err(ChatError::SessionLookupFailed(
                "channel task is gone".to_string(),
            ))
        })
    }

    /// Appends a message to the active session, then refreshes the session's
    /// last-message summary. Whitespace-only content and a missing session
    /// are silent no-ops.
    pub async fn send(&self, content: impl Into<String>) -> Result<(), ChatError> {
        let (respond_to, response) = oneshot::channel();
        let message = ChannelMessage::Send {
            content: content.into(),
            respond_to,
        };
        if self.commands.send(message).is_err() {
            return Err(ChatError::SendFailed("channel task is gone".to_string()));
        }
        response
            .await
            .unwrap_or_else(|_| Err(ChatError::SendFailed("channel task is gone".to_string())))
    }

    /// Cancels the message subscription and the recipient profile
    /// subscription. Idempotent; commands arriving afterwards are no-ops.
    pub async fn close(&self) {
        let (respond_to, response) = oneshot::channel();
        if self
            .commands
            .send(ChannelMessage::Close { respond_to })
            .is_ok()
        {
            let _ = response.await;
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    pub fn state(&self) -> ChannelState {
        self.state_rx.borrow().clone()
    }
}

impl Drop for ConversationChannel {
    fn drop(&mut self) {
        // Unwinds the actor without a handshake; its subscriptions cancel on
        // drop.
        self.task.abort();
    }
}
