mod directory;
mod handlers;
mod messages;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::chat::{CHAT_SESSIONS, SessionSummary};
use crate::error::ChatError;
use crate::store::{DocumentStore, Filter, Query};

use directory::DirectoryActor;
use messages::DirectoryEvent;

/// Snapshot of the directory as published to consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryState {
    /// Sessions the user participates in, most recent message first.
    pub sessions: Vec<SessionSummary>,
    pub is_loading: bool,
    pub error: Option<ChatError>,
}

/// Live list of the chat sessions a user participates in, each joined with
/// the other participant's profile.
///
/// `start` opens the single session-list subscription for the instance;
/// per-user profile subscriptions are reconciled against the visible set on
/// every delivery. Consumers observe [`DirectoryState`] through a watch
/// channel; redundant snapshots are suppressed.
pub struct SessionDirectory {
    events: mpsc::UnboundedSender<DirectoryEvent>,
    state_rx: watch::Receiver<DirectoryState>,
    update_count: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl SessionDirectory {
    /// Subscribes to all sessions containing `current_user_id`, ordered by
    /// most recent message, and starts the directory's background task.
    pub fn start(
        store: Arc<dyn DocumentStore>,
        current_user_id: impl Into<String>,
    ) -> Result<Self, ChatError> {
        let current_user_id = current_user_id.into();
        if current_user_id.is_empty() {
            return Err(ChatError::NotAuthenticated);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(DirectoryState {
            is_loading: true,
            ..DirectoryState::default()
        });
        let update_count = Arc::new(AtomicU64::new(0));

        let query = Query::collection(CHAT_SESSIONS)
            .filter(Filter::new().array_contains("participants", &current_user_id))
            .order_by("lastMessageTimestamp", true);
        let mut subscription = store.subscribe_query(query);
        let session_guard = subscription.guard();

        let pump = events_tx.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = subscription.recv().await {
                if pump.send(DirectoryEvent::Sessions(snapshot)).is_err() {
                    break;
                }
            }
        });

        let actor = DirectoryActor::new(
            store,
            current_user_id,
            events_rx,
            events_tx.clone(),
            state_tx,
            session_guard,
            Arc::clone(&update_count),
        );
        let task = tokio::spawn(actor.run());

        Ok(Self {
            events: events_tx,
            state_rx,
            update_count,
            task: Some(task),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<DirectoryState> {
        self.state_rx.clone()
    }

    pub fn state(&self) -> DirectoryState {
        self.state_rx.borrow().clone()
    }

    /// Number of snapshots published so far. Redundant deliveries are
    /// suppressed, so this only moves when something visible changed.
    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::SeqCst)
    }

    /// Cancels the session subscription and every per-user profile
    /// subscription. Idempotent; once this returns no further snapshot is
    /// published.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let (respond_to, ack) = oneshot::channel();
        if self.events.send(DirectoryEvent::Stop { respond_to }).is_ok() {
            let _ = ack.await;
        }
        if let Err(e) = task.await {
            warn!("Session directory task ended abnormally: {}", e);
        }
    }
}

impl Drop for SessionDirectory {
    fn drop(&mut self) {
        // Unwinds the actor without a handshake; its subscriptions cancel on
        // drop.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
