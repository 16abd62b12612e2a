use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::info;

use super::messages::ChannelMessage;
use super::{ChannelPhase, ChannelState};
use crate::store::{DocumentStore, SubscriptionGuard};

pub(super) struct ChannelActor {
    pub receiver: mpsc::UnboundedReceiver<ChannelMessage>,
    /// Handed to message-stream forwarder tasks so snapshots come back
    /// through the same loop.
    pub commands: mpsc::UnboundedSender<ChannelMessage>,
    pub store: Arc<dyn DocumentStore>,
    pub current_user_id: String,
    pub other_user_id: String,
    pub state: ChannelState,
    pub state_tx: watch::Sender<ChannelState>,
    pub session_id: Option<String>,
    pub messages_guard: Option<SubscriptionGuard>,
    pub profile_guard: SubscriptionGuard,
}

impl ChannelActor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        current_user_id: String,
        other_user_id: String,
        receiver: mpsc::UnboundedReceiver<ChannelMessage>,
        commands: mpsc::UnboundedSender<ChannelMessage>,
        state_tx: watch::Sender<ChannelState>,
        profile_guard: SubscriptionGuard,
    ) -> Self {
        let state = state_tx.borrow().clone();
        Self {
            receiver,
            commands,
            store,
            current_user_id,
            other_user_id,
            state,
            state_tx,
            session_id: None,
            messages_guard: None,
            profile_guard,
        }
    }

    pub async fn run(mut self) {
        info!("Conversation channel opened towards {}", self.other_user_id);

        while let Some(message) = self.receiver.recv().await {
            match message {
                ChannelMessage::Open { respond_to } => {
                    let result = self.handle_open().await;
                    let _ = respond_to.send(result);
                }
                ChannelMessage::Send {
                    content,
                    respond_to,
                } => {
                    let result = self.handle_send(content).await;
                    let _ = respond_to.send(result);
                }
                ChannelMessage::Close { respond_to } => {
                    self.handle_close();
                    let _ = respond_to.send(());
                }
                ChannelMessage::Messages {
                    session_id,
                    snapshot,
                } => self.handle_messages(session_id, snapshot),
                ChannelMessage::RecipientProfile(snapshot) => {
                    self.handle_recipient_profile(snapshot);
                }
            }
        }

        info!("Conversation channel towards {} shut down", self.other_user_id);
    }

    pub(super) fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    pub(super) fn is_closed(&self) -> bool {
        matches!(self.state.phase, ChannelPhase::Closed)
    }
}
