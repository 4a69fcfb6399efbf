pub mod commands;
pub mod events;
pub mod types;

pub use commands::ClientCommand;
pub use events::{ClientEvent, CloseReason};
pub use types::{ChatMessage, Direction, ReceivedFile};
