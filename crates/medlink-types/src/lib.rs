pub mod api;
pub mod events;
pub mod models;

pub use events::{ClientCommand, ServerEvent};
pub use models::{Conversation, ConversationStatus, Message, SenderRef, UserRef, preferred_id};
