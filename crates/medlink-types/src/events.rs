use serde::{Deserialize, Serialize};

use crate::models::{Message, SenderRef};

/// Events pushed by the server over the real-time channel.
///
/// Frames look like `{"event": "newMessage", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message was posted to a conversation this user belongs to
    #[serde(rename_all = "camelCase")]
    NewMessage {
        conversation_id: String,
        message: Message,
    },

    /// The other participant started typing
    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: String,
        #[serde(default)]
        from: Option<SenderRef>,
    },

    /// The other participant stopped typing
    #[serde(rename_all = "camelCase")]
    StopTyping { conversation_id: String },

    /// The other participant has read this conversation
    #[serde(rename_all = "camelCase")]
    MessageSeen {
        #[serde(alias = "conversationId")]
        chat_id: String,
    },

    /// Free-form notification (connection requests, job updates, ...)
    Notification(serde_json::Value),
}

impl ServerEvent {
    /// Returns the conversation this event is scoped to, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::NewMessage { conversation_id, .. }
            | Self::Typing { conversation_id, .. }
            | Self::StopTyping { conversation_id } => Some(conversation_id),
            Self::MessageSeen { chat_id } => Some(chat_id),
            Self::Notification(_) => None,
        }
    }
}

/// Commands sent FROM client TO server over the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Announce the user id so per-user events get routed here
    RegisterUser(String),

    /// Subscribe to a conversation's message stream
    JoinConversation(String),

    /// Unsubscribe from a conversation's message stream
    LeaveConversation(String),

    /// Indicate typing in a conversation
    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: String,
        user_id: String,
    },

    /// Typing went quiet
    #[serde(rename_all = "camelCase")]
    StopTyping { conversation_id: String },

    /// Everything in the conversation has been read
    #[serde(rename_all = "camelCase")]
    MessageSeen { conversation_id: String },
}
