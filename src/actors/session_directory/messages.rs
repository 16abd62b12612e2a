use tokio::sync::oneshot;

use crate::store::{DocumentSnapshot, QuerySnapshot};

#[derive(Debug)]
pub enum DirectoryEvent {
    /// New result set (or transport fault) from the session-list
    /// subscription.
    Sessions(QuerySnapshot),
    /// Profile snapshot (or fault) for one visible participant.
    Profile {
        user_id: String,
        snapshot: DocumentSnapshot,
    },
    Stop {
        respond_to: oneshot::Sender<()>,
    },
}
