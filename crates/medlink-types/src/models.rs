use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Pick a record id from the two spellings the backend uses.
/// `_id` wins when both are present; empty strings count as absent.
pub fn preferred_id<'a>(object_id: Option<&'a str>, id: Option<&'a str>) -> Option<&'a str> {
    object_id
        .filter(|s| !s.is_empty())
        .or_else(|| id.filter(|s| !s.is_empty()))
}

/// Decode an optional field, treating anything that does not fit `T` as absent.
/// Used for denormalized references the backend may or may not populate.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

// -- Users --

/// A participant or sender as the backend embeds it.
///
/// Both id spellings are kept raw; callers resolve them through the client's
/// identity module rather than picking a field themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl UserRef {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            object_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("User")
    }

    /// Role with its first letter upper-cased, "User" when unknown.
    pub fn display_role(&self) -> String {
        let role = self.role.as_deref().filter(|r| !r.is_empty()).unwrap_or("User");
        let mut chars = role.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

/// Message senders arrive either populated or as a bare id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SenderRef {
    Id(String),
    User(UserRef),
}

impl SenderRef {
    pub fn user(&self) -> Option<&UserRef> {
        match self {
            Self::Id(_) => None,
            Self::User(user) => Some(user),
        }
    }
}

// -- Messages --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MessageRecord", rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderRef>,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub seen: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    #[serde(rename = "_id", default)]
    object_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "chat")]
    conversation_id: Option<String>,
    #[serde(default)]
    sender: Option<SenderRef>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    seen: bool,
}

impl TryFrom<MessageRecord> for Message {
    type Error = String;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let id = preferred_id(record.object_id.as_deref(), record.id.as_deref())
            .ok_or_else(|| "message has neither `_id` nor `id`".to_string())?
            .to_string();

        Ok(Self {
            id,
            conversation_id: record.conversation_id,
            sender: record.sender,
            text: record.text,
            created_at: record.created_at.unwrap_or_default(),
            seen: record.seen,
        })
    }
}

// -- Conversations --

/// Request gate on a conversation. Pending ones need accept/ignore first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Pending,
    Active,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConversationRecord", rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id")]
    pub id: String,
    pub participants: Vec<UserRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationRecord {
    #[serde(rename = "_id", default)]
    object_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    participants: Option<Vec<UserRef>>,
    #[serde(default, deserialize_with = "lenient")]
    last_message: Option<Message>,
    #[serde(default, deserialize_with = "lenient")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient")]
    status: Option<ConversationStatus>,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = String;

    fn try_from(record: ConversationRecord) -> Result<Self, Self::Error> {
        let id = preferred_id(record.object_id.as_deref(), record.id.as_deref())
            .ok_or_else(|| "conversation has neither `_id` nor `id`".to_string())?
            .to_string();

        Ok(Self {
            id,
            participants: record.participants.unwrap_or_default(),
            last_message: record.last_message,
            updated_at: record.updated_at,
            status: record.status,
        })
    }
}

impl Conversation {
    /// Timestamp the directory orders by: `updatedAt`, else the last
    /// message's `createdAt`, else the epoch.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.updated_at
            .or_else(|| self.last_message.as_ref().map(|m| m.created_at))
            .unwrap_or_default()
    }

    /// Whether new messages may be sent. Conversations without a status
    /// come from the plain direct-message flow and are always open.
    pub fn accepts_messages(&self) -> bool {
        matches!(self.status, None | Some(ConversationStatus::Active))
    }
}
