use serde::{Deserialize, Serialize};

use crate::models::{Conversation, Message, UserRef, lenient};

// Every response carries `success`; failures usually add a human-readable
// `message`. Fields are defaulted so a bare `{ "success": false }` decodes.

// -- Conversations --

#[derive(Debug, Deserialize)]
pub struct ConversationsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenConversationRequest {
    pub other_user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ConversationResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub conversation: Option<Conversation>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageRequest {
    pub text: String,
}

/// `message` is the stored message on success and an error string otherwise.
#[derive(Debug, Deserialize)]
pub struct SentMessageResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<SentPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SentPayload {
    Stored(Message),
    Reason(String),
}

// -- Requests / session --

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CurrentUserResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub user: Option<UserRef>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
}
