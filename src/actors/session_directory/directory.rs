use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tracing::info;

use super::DirectoryState;
use super::messages::DirectoryEvent;
use crate::chat::UserProfile;
use crate::store::{DocumentStore, SubscriptionGuard};

pub(super) struct DirectoryActor {
    pub receiver: mpsc::UnboundedReceiver<DirectoryEvent>,
    /// Handed to profile forwarder tasks so their snapshots come back
    /// through the same loop.
    pub events: mpsc::UnboundedSender<DirectoryEvent>,
    pub store: Arc<dyn DocumentStore>,
    pub current_user_id: String,
    pub state: DirectoryState,
    pub state_tx: watch::Sender<DirectoryState>,
    /// Continuously-refreshed profile cache, keyed by user id.
    pub profiles: HashMap<String, UserProfile>,
    pub profile_subs: HashMap<String, SubscriptionGuard>,
    pub session_guard: SubscriptionGuard,
    pub update_count: Arc<AtomicU64>,
}

impl DirectoryActor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        current_user_id: String,
        receiver: mpsc::UnboundedReceiver<DirectoryEvent>,
        events: mpsc::UnboundedSender<DirectoryEvent>,
        state_tx: watch::Sender<DirectoryState>,
        session_guard: SubscriptionGuard,
        update_count: Arc<AtomicU64>,
    ) -> Self {
        let state = state_tx.borrow().clone();
        Self {
            receiver,
            events,
            store,
            current_user_id,
            state,
            state_tx,
            profiles: HashMap::new(),
            profile_subs: HashMap::new(),
            session_guard,
            update_count,
        }
    }

    pub async fn run(mut self) {
        info!("Session directory started for user {}", self.current_user_id);

        while let Some(event) = self.receiver.recv().await {
            match event {
                DirectoryEvent::Sessions(Ok(docs)) => self.handle_sessions_snapshot(docs),
                DirectoryEvent::Sessions(Err(e)) => self.handle_sessions_error(e),
                DirectoryEvent::Profile { user_id, snapshot } => {
                    self.handle_profile(user_id, snapshot);
                }
                DirectoryEvent::Stop { respond_to } => {
                    self.handle_stop();
                    let _ = respond_to.send(());
                    break;
                }
            }
        }

        info!("Session directory stopped for user {}", self.current_user_id);
    }

    pub(super) fn publish(&mut self) {
        self.state_tx.send_replace(self.state.clone());
        self.update_count.fetch_add(1, Ordering::SeqCst);
    }
}
