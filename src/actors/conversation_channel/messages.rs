use tokio::sync::oneshot;

use crate::error::ChatError;
use crate::store::{DocumentSnapshot, QuerySnapshot};

#[derive(Debug)]
pub enum ChannelMessage {
    /// Resolve the session for the pair and attach to its message stream.
    /// Responds with whether a session exists.
    Open {
        respond_to: oneshot::Sender<Result<bool, ChatError>>,
    },
    /// Append a message to the active session.
    Send {
        content: String,
        respond_to: oneshot::Sender<Result<(), ChatError>>,
    },
    Close {
        respond_to: oneshot::Sender<()>,
    },
    /// Snapshot (or fault) from a session's message stream, tagged with the
    /// session it belongs to so replaced subscriptions cannot leak stale
    /// data in.
    Messages {
        session_id: String,
        snapshot: QuerySnapshot,
    },
    /// Snapshot (or fault) of the other participant's profile document.
    RecipientProfile(DocumentSnapshot),
}
