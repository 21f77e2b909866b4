//! Who is "me" and who is "the other participant".
//!
//! Records spell their id as `_id` or `id` depending on which endpoint
//! produced them. All resolution goes through this module.

use medlink_types::{Conversation, Message, SenderRef, UserRef, preferred_id};

/// The signed-in user, with the id already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub self_id: String,
    pub user: UserRef,
}

impl Identity {
    /// `None` when the session user carries no usable id yet.
    pub fn from_user(user: UserRef) -> Option<Self> {
        let self_id = resolve_self_id(&user)?.to_string();
        Some(Self { self_id, user })
    }

    pub fn other_in<'a>(&self, conversation: &'a Conversation) -> Option<&'a UserRef> {
        resolve_other(conversation, &self.self_id)
    }

    pub fn is_own(&self, message: &Message) -> bool {
        is_own(message, &self.self_id)
    }
}

/// Session user id, preferring `_id` and falling back to `id`.
pub fn resolve_self_id(session_user: &UserRef) -> Option<&str> {
    user_id(session_user)
}

pub fn user_id(user: &UserRef) -> Option<&str> {
    preferred_id(user.object_id.as_deref(), user.id.as_deref())
}

pub fn sender_id(sender: &SenderRef) -> Option<&str> {
    match sender {
        SenderRef::Id(id) => Some(id.as_str()).filter(|s| !s.is_empty()),
        SenderRef::User(user) => user_id(user),
    }
}

/// The participant whose id differs from `self_id`.
///
/// Never fails: missing participants, or a list where only this user
/// resolves, give `None` and the caller shows a placeholder.
pub fn resolve_other<'a>(conversation: &'a Conversation, self_id: &str) -> Option<&'a UserRef> {
    conversation
        .participants
        .iter()
        .find(|p| user_id(p).is_some_and(|id| id != self_id))
}

pub fn is_own(message: &Message, self_id: &str) -> bool {
    message
        .sender
        .as_ref()
        .and_then(sender_id)
        .is_some_and(|id| id == self_id)
}
