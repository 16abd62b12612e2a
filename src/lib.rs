//! Chat session and message synchronization core: a live session directory
//! and per-conversation channels over an abstract remote document store.

pub mod actors;
pub mod chat;
pub mod error;
pub mod queries;
pub mod store;

pub use actors::conversation_channel::{ChannelPhase, ChannelState, ConversationChannel};
pub use actors::session_directory::{DirectoryState, SessionDirectory};
pub use chat::{ChatMessage, SessionSummary, UserProfile};
pub use error::ChatError;
