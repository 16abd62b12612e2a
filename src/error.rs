use thiserror::Error;

/// Failures surfaced by the chat components.
///
/// None of these are fatal: they end up in the owning component's published
/// state (and in the logs) instead of tearing the component down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("no authenticated user")]
    NotAuthenticated,

    #[error("participant id must not be empty")]
    InvalidParticipants,

    #[error("session list subscription failed: {0}")]
    DirectoryUnavailable(String),

    #[error("session lookup failed: {0}")]
    SessionLookupFailed(String),

    #[error("session create failed: {0}")]
    SessionCreateFailed(String),

    #[error("message stream failed: {0}")]
    MessageStreamFailed(String),

    #[error("profile lookup failed: {0}")]
    ProfileLookupFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),
}
