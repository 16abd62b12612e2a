pub mod conversation_channel;
pub mod session_directory;
