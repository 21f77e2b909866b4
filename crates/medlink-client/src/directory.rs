use tracing::debug;

use medlink_types::{Conversation, Message};

use crate::identity;

/// Result of folding a live message into the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryUpdate {
    Updated,
    /// The conversation is not in the local list; reload to pick it up
    Unknown,
}

/// Conversation previews, newest activity first.
///
/// Server order is never trusted; every mutation re-sorts by
/// [`Conversation::activity_at`].
#[derive(Debug, Default)]
pub struct Directory {
    conversations: Vec<Conversation>,
    loaded: bool,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    /// Install a freshly fetched list.
    pub fn replace(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        self.loaded = true;
        self.sort();
    }

    /// Insert or overwrite one conversation, e.g. one just created.
    pub fn upsert(&mut self, conversation: Conversation) {
        match self.conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.conversations.push(conversation),
        }
        self.sort();
    }

    /// Fold a `newMessage` event into the matching preview.
    ///
    /// A message older than the preview already shown (late delivery) keeps
    /// the newer preview in place.
    pub fn apply_incoming_message(&mut self, conversation_id: &str, message: &Message) -> DirectoryUpdate {
        let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == conversation_id) else {
            debug!("Message for unlisted conversation {}", conversation_id);
            return DirectoryUpdate::Unknown;
        };

        let is_newer = conversation
            .last_message
            .as_ref()
            .is_none_or(|last| message.created_at >= last.created_at);
        if is_newer {
            conversation.last_message = Some(message.clone());
        }
        if message.created_at > conversation.activity_at() {
            conversation.updated_at = Some(message.created_at);
        }

        self.sort();
        DirectoryUpdate::Updated
    }

    /// Case-insensitive match on the other participant's name.
    /// Conversations whose other participant cannot be resolved are hidden.
    pub fn filter<'a>(&'a self, query: &str, self_id: &str) -> Vec<&'a Conversation> {
        let needle = query.to_lowercase();
        self.conversations
            .iter()
            .filter(|c| {
                identity::resolve_other(c, self_id).is_some_and(|other| match &other.name {
                    Some(name) => name.to_lowercase().contains(&needle),
                    None => needle.is_empty(),
                })
            })
            .collect()
    }

    fn sort(&mut self) {
        // stable: equal timestamps keep their relative order
        self.conversations
            .sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use medlink_types::{SenderRef, UserRef};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap()
    }

    fn convo(id: &str, other_name: &str, updated: u32) -> Conversation {
        Conversation {
            id: id.into(),
            participants: vec![
                UserRef::with_id("me"),
                UserRef {
                    object_id: Some(format!("peer-{id}")),
                    name: Some(other_name.into()),
                    ..UserRef::default()
                },
            ],
            last_message: None,
            updated_at: Some(at(updated)),
            status: None,
        }
    }

    fn msg(id: &str, minute: u32) -> Message {
        Message {
            id: id.into(),
            conversation_id: None,
            sender: Some(SenderRef::Id("someone".into())),
            text: format!("text {id}"),
            created_at: at(minute),
            seen: false,
        }
    }

    fn is_sorted(dir: &Directory) -> bool {
        dir.conversations()
            .windows(2)
            .all(|w| w[0].activity_at() >= w[1].activity_at())
    }

    #[test]
    fn test_replace_sorts_descending() {
        let mut dir = Directory::new();
        assert!(!dir.is_loaded());
        dir.replace(vec![convo("a", "Ana", 1), convo("b", "Ben", 5), convo("c", "Cy", 3)]);
        let ids: Vec<_> = dir.conversations().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert!(dir.is_loaded());
    }

    #[test]
    fn test_incoming_out_of_order_keeps_sorted() {
        let mut dir = Directory::new();
        dir.replace(vec![convo("a", "Ana", 1), convo("b", "Ben", 2), convo("c", "Cy", 3)]);

        for (cid, minute) in [("a", 30), ("c", 10), ("b", 20), ("c", 5), ("a", 40)] {
            assert_eq!(dir.apply_incoming_message(cid, &msg(&format!("{cid}{minute}"), minute)), DirectoryUpdate::Updated);
            assert!(is_sorted(&dir));
        }

        let ids: Vec<_> = dir.conversations().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        // the late "c5" did not overwrite the newer "c10" preview
        assert_eq!(dir.get("c").unwrap().last_message.as_ref().unwrap().id, "c10");
    }

    #[test]
    fn test_unknown_conversation_requests_reload() {
        let mut dir = Directory::new();
        dir.replace(vec![convo("a", "Ana", 1)]);
        assert_eq!(dir.apply_incoming_message("zz", &msg("m", 9)), DirectoryUpdate::Unknown);
        assert_eq!(dir.conversations().len(), 1);
    }

    #[test]
    fn test_filter_case_insensitive() {
        let mut dir = Directory::new();
        dir.replace(vec![
            convo("a", "Dr. Meredith Grey", 1),
            convo("b", "Dr. Derek Shepherd", 2),
        ]);

        let hits: Vec<_> = dir.filter("GREY", "me").iter().map(|c| c.id.clone()).collect();
        assert_eq!(hits, vec!["a"]);
        assert_eq!(dir.filter("", "me").len(), 2);
        assert!(dir.filter("house", "me").is_empty());
    }

    #[test]
    fn test_filter_hides_unresolvable() {
        let mut broken = convo("x", "Ghost", 9);
        broken.participants.truncate(1);
        let mut dir = Directory::new();
        dir.replace(vec![broken, convo("a", "Ana", 1)]);
        assert_eq!(dir.filter("", "me").len(), 1);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut dir = Directory::new();
        dir.replace(vec![convo("a", "Ana", 1), convo("b", "Ben", 2)]);
        dir.upsert(convo("a", "Ana", 9));
        assert_eq!(dir.conversations().len(), 2);
        assert_eq!(dir.conversations()[0].id, "a");
    }
}
