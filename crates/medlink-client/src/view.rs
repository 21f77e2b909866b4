//! The one open conversation: its history, live appends, optimistic echoes
//! and the peer's typing and seen state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use medlink_types::{Conversation, Message, SenderRef, UserRef};

use crate::identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Shown optimistically, send request in flight
    Pending,
    Sent,
    /// Send request failed; can be retried
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewMessage {
    pub message: Message,
    pub delivery: Delivery,
    /// Set on messages this client composed (`local-<uuid>`)
    pub client_ref: Option<String>,
}

impl ViewMessage {
    fn confirmed(message: Message) -> Self {
        Self {
            message,
            delivery: Delivery::Sent,
            client_ref: None,
        }
    }

    fn is_unconfirmed(&self) -> bool {
        self.delivery != Delivery::Sent
    }
}

/// What happened to a live message offered to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Belongs to another conversation
    Ignored,
    /// History still loading; held until it resolves
    Buffered,
    Appended { from_other: bool },
    /// Replaced one of our pending optimistic echoes
    Reconciled,
    Duplicate,
}

#[derive(Debug)]
enum History {
    Loading { buffer: Vec<Message> },
    Ready,
    Failed(String),
}

#[derive(Debug)]
pub struct ConversationView {
    conversation: Conversation,
    self_id: String,
    messages: Vec<ViewMessage>,
    history: History,
    typing_until: Option<Instant>,
    typing_display: Duration,
}

impl ConversationView {
    /// A fresh view, waiting for its history.
    pub fn open(conversation: Conversation, self_id: impl Into<String>, typing_display: Duration) -> Self {
        Self {
            conversation,
            self_id: self_id.into(),
            messages: Vec::new(),
            history: History::Loading { buffer: Vec::new() },
            typing_until: None,
            typing_display,
        }
    }

    pub fn id(&self) -> &str {
        &self.conversation.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Refresh metadata (status, participants) after a directory reload.
    pub fn set_conversation(&mut self, conversation: Conversation) {
        if conversation.id == self.conversation.id {
            self.conversation = conversation;
        }
    }

    /// `None` while participant data is incomplete; show a placeholder.
    pub fn other(&self) -> Option<&UserRef> {
        identity::resolve_other(&self.conversation, &self.self_id)
    }

    pub fn messages(&self) -> &[ViewMessage] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.history, History::Loading { .. })
    }

    pub fn load_error(&self) -> Option<&str> {
        match &self.history {
            History::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Re-fetch after a reconnect. Current messages stay visible and live
    /// traffic is buffered again until [`Self::apply_history`].
    pub fn begin_refresh(&mut self) {
        if !self.is_loading() {
            self.history = History::Loading { buffer: Vec::new() };
        }
    }

    /// Install fetched history. Returns false when the result belongs to a
    /// different conversation and was discarded.
    ///
    /// Live messages received meanwhile are appended only when newer than
    /// the last historical message and not already part of it. Unconfirmed
    /// optimistic echoes stay at the tail.
    pub fn apply_history(&mut self, conversation_id: &str, history: Vec<Message>) -> bool {
        if conversation_id != self.conversation.id {
            debug!("Discarding history for {} while {} is open", conversation_id, self.id());
            return false;
        }

        let buffered = match std::mem::replace(&mut self.history, History::Ready) {
            History::Loading { buffer } => buffer,
            _ => Vec::new(),
        };
        let previous = std::mem::take(&mut self.messages);
        let (unconfirmed, shown): (Vec<_>, Vec<_>) =
            previous.into_iter().partition(ViewMessage::is_unconfirmed);

        let cutoff = history.last().map(|m| m.created_at);
        self.messages = history.into_iter().map(ViewMessage::confirmed).collect();

        let late = shown.into_iter().map(|vm| vm.message).chain(buffered);
        for message in late {
            let is_newer = cutoff.is_none_or(|cutoff| message.created_at > cutoff);
            if is_newer && !self.contains(&message.id) {
                self.messages.push(ViewMessage::confirmed(message));
            }
        }
        self.messages.extend(unconfirmed);
        true
    }

    /// The history request failed. Whatever is already shown stays, along
    /// with anything buffered.
    pub fn history_failed(&mut self, conversation_id: &str, reason: impl Into<String>) -> bool {
        if conversation_id != self.conversation.id {
            return false;
        }
        if let History::Loading { buffer } = std::mem::replace(&mut self.history, History::Failed(reason.into())) {
            for message in buffer {
                if !self.contains(&message.id) {
                    self.messages.push(ViewMessage::confirmed(message));
                }
            }
        }
        true
    }

    /// Offer a live `newMessage` to the view.
    pub fn receive(&mut self, conversation_id: &str, message: Message) -> Inbound {
        if conversation_id != self.conversation.id {
            return Inbound::Ignored;
        }
        if self.contains(&message.id) {
            return Inbound::Duplicate;
        }

        let own = identity::is_own(&message, &self.self_id);
        if own {
            // Our own echo arriving before the send response.
            let pending = self.messages.iter_mut().find(|vm| {
                vm.delivery == Delivery::Pending && vm.client_ref.is_some() && vm.message.text == message.text
            });
            if let Some(entry) = pending {
                entry.message = message;
                entry.delivery = Delivery::Sent;
                return Inbound::Reconciled;
            }
        } else {
            self.typing_until = None;
        }

        if let History::Loading { buffer } = &mut self.history {
            if buffer.iter().any(|m| m.id == message.id) {
                return Inbound::Duplicate;
            }
            buffer.push(message);
            return Inbound::Buffered;
        }

        self.messages.push(ViewMessage::confirmed(message));
        Inbound::Appended { from_other: !own }
    }

    /// Append an optimistic echo of our own text. Returns its client ref.
    pub fn push_provisional(&mut self, text: &str, now: DateTime<Utc>) -> String {
        let client_ref = format!("local-{}", Uuid::new_v4());
        let message = Message {
            id: client_ref.clone(),
            conversation_id: Some(self.conversation.id.clone()),
            sender: Some(SenderRef::Id(self.self_id.clone())),
            text: text.to_string(),
            created_at: now,
            seen: false,
        };
        self.messages.push(ViewMessage {
            message,
            delivery: Delivery::Pending,
            client_ref: Some(client_ref.clone()),
        });
        client_ref
    }

    /// Swap the echo for the stored message. If the stored copy is already
    /// on screen (live echo or refreshed history won) the echo is removed.
    pub fn confirm_sent(&mut self, client_ref: &str, message: Message) -> bool {
        let Some(index) = self.position(client_ref) else {
            return false;
        };
        let already_shown = self
            .messages
            .iter()
            .enumerate()
            .any(|(i, vm)| i != index && vm.message.id == message.id);

        if already_shown {
            self.messages.remove(index);
        } else {
            let entry = &mut self.messages[index];
            entry.message = message;
            entry.delivery = Delivery::Sent;
        }
        true
    }

    pub fn mark_failed(&mut self, client_ref: &str) -> bool {
        match self.position(client_ref) {
            Some(index) if self.messages[index].delivery == Delivery::Pending => {
                self.messages[index].delivery = Delivery::Failed;
                true
            }
            _ => false,
        }
    }

    /// Flip a failed echo back to pending and hand back its text to resend.
    pub fn retry(&mut self, client_ref: &str) -> Option<String> {
        let index = self.position(client_ref)?;
        let entry = &mut self.messages[index];
        if entry.delivery != Delivery::Failed {
            return None;
        }
        entry.delivery = Delivery::Pending;
        Some(entry.message.text.clone())
    }

    /// Whether anything from the other participant is still marked unread.
    pub fn has_unread_from_peer(&self) -> bool {
        self.messages
            .iter()
            .any(|vm| !vm.message.seen && !identity::is_own(&vm.message, &self.self_id))
    }

    /// The peer has read the conversation: every message we sent is seen.
    pub fn mark_seen_by_peer(&mut self) -> bool {
        let mut changed = false;
        for vm in &mut self.messages {
            if !vm.message.seen && identity::is_own(&vm.message, &self.self_id) {
                vm.message.seen = true;
                changed = true;
            }
        }
        changed
    }

    /// A `typing` signal arrived. Signals that resolve to ourselves are
    /// ignored. Returns true when the indicator was off.
    pub fn typing_started(&mut self, from: Option<&SenderRef>, now: Instant) -> bool {
        if from
            .and_then(identity::sender_id)
            .is_some_and(|id| id == self.self_id)
        {
            return false;
        }
        let was_typing = self.is_peer_typing(now);
        self.typing_until = Some(now + self.typing_display);
        !was_typing
    }

    pub fn typing_stopped(&mut self) -> bool {
        self.typing_until.take().is_some()
    }

    /// Drop the indicator once its display window passed.
    pub fn expire_typing(&mut self, now: Instant) -> bool {
        match self.typing_until {
            Some(until) if now >= until => {
                self.typing_until = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_peer_typing(&self, now: Instant) -> bool {
        self.typing_until.is_some_and(|until| now < until)
    }

    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing_until
    }

    pub fn typing_label(&self) -> String {
        let name = self.other().map(UserRef::display_name).unwrap_or("User");
        format!("{name} is typing...")
    }

    fn contains(&self, message_id: &str) -> bool {
        self.messages.iter().any(|vm| vm.message.id == message_id)
    }

    fn position(&self, client_ref: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|vm| vm.client_ref.as_deref() == Some(client_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ME: &str = "u-me";
    const PEER: &str = "u-peer";

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, second).unwrap()
    }

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: id.into(),
            participants: vec![
                UserRef::with_id(ME),
                UserRef {
                    object_id: Some(PEER.into()),
                    name: Some("Dr. Ana Ruiz".into()),
                    ..UserRef::default()
                },
            ],
            last_message: None,
            updated_at: None,
            status: None,
        }
    }

    fn msg(id: &str, from: &str, text: &str, second: u32) -> Message {
        Message {
            id: id.into(),
            conversation_id: Some("c1".into()),
            sender: Some(SenderRef::Id(from.into())),
            text: text.into(),
            created_at: at(second),
            seen: false,
        }
    }

    fn ready_view() -> ConversationView {
        let mut view = ConversationView::open(conversation("c1"), ME, Duration::from_secs(2));
        assert!(view.apply_history("c1", Vec::new()));
        view
    }

    fn ids(view: &ConversationView) -> Vec<&str> {
        view.messages().iter().map(|vm| vm.message.id.as_str()).collect()
    }

    #[test]
    fn test_receive_other_conversation_ignored() {
        let mut view = ready_view();
        assert_eq!(view.receive("c2", msg("m1", PEER, "hi", 1)), Inbound::Ignored);
        assert!(view.messages().is_empty());
    }

    #[test]
    fn test_receive_appends_in_arrival_order() {
        let mut view = ready_view();
        assert_eq!(view.receive("c1", msg("m2", PEER, "b", 9)), Inbound::Appended { from_other: true });
        assert_eq!(view.receive("c1", msg("m1", PEER, "a", 3)), Inbound::Appended { from_other: true });
        assert_eq!(view.receive("c1", msg("m1", PEER, "a", 3)), Inbound::Duplicate);
        assert_eq!(ids(&view), vec!["m2", "m1"]);
    }

    #[test]
    fn test_live_buffered_until_history() {
        let mut view = ConversationView::open(conversation("c1"), ME, Duration::from_secs(2));
        assert!(view.is_loading());

        // one overlaps history, one is older than it, one is genuinely new
        assert_eq!(view.receive("c1", msg("h2", PEER, "two", 2)), Inbound::Buffered);
        assert_eq!(view.receive("c1", msg("old", PEER, "zero", 0)), Inbound::Buffered);
        assert_eq!(view.receive("c1", msg("n1", PEER, "three", 3)), Inbound::Buffered);
        assert!(view.messages().is_empty());

        let history = vec![msg("h1", ME, "one", 1), msg("h2", PEER, "two", 2)];
        assert!(view.apply_history("c1", history));
        assert!(!view.is_loading());
        assert_eq!(ids(&view), vec!["h1", "h2", "n1"]);
    }

    #[test]
    fn test_history_for_other_conversation_discarded() {
        let mut view = ConversationView::open(conversation("c1"), ME, Duration::from_secs(2));
        assert!(!view.apply_history("c0", vec![msg("x", PEER, "stale", 1)]));
        assert!(view.is_loading());
        assert!(view.messages().is_empty());
    }

    #[test]
    fn test_history_failure_keeps_view_usable() {
        let mut view = ConversationView::open(conversation("c1"), ME, Duration::from_secs(2));
        view.receive("c1", msg("n1", PEER, "hello", 3));
        assert!(view.history_failed("c1", "server error"));
        assert_eq!(view.load_error(), Some("server error"));
        assert_eq!(ids(&view), vec!["n1"]);
        assert_eq!(view.receive("c1", msg("n2", PEER, "again", 4)), Inbound::Appended { from_other: true });
    }

    #[test]
    fn test_provisional_confirmed_by_response() {
        let mut view = ready_view();
        let client_ref = view.push_provisional("hello", at(5));
        assert!(client_ref.starts_with("local-"));
        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.messages()[0].delivery, Delivery::Pending);

        assert!(view.confirm_sent(&client_ref, msg("s1", ME, "hello", 5)));
        assert_eq!(ids(&view), vec!["s1"]);
        assert_eq!(view.messages()[0].delivery, Delivery::Sent);

        // the live echo that follows is not a second copy
        assert_eq!(view.receive("c1", msg("s1", ME, "hello", 5)), Inbound::Duplicate);
        assert_eq!(view.messages().len(), 1);
    }

    #[test]
    fn test_live_echo_before_response() {
        let mut view = ready_view();
        let first = view.push_provisional("same", at(1));
        let second = view.push_provisional("same", at(2));

        assert_eq!(view.receive("c1", msg("s1", ME, "same", 1)), Inbound::Reconciled);
        assert_eq!(view.messages()[0].message.id, "s1");
        assert_eq!(view.messages()[1].delivery, Delivery::Pending);

        // response for the first arrives after its echo: nothing changes
        assert!(view.confirm_sent(&first, msg("s1", ME, "same", 1)));
        assert_eq!(view.messages().len(), 2);

        assert!(view.confirm_sent(&second, msg("s2", ME, "same", 2)));
        assert_eq!(ids(&view), vec!["s1", "s2"]);
    }

    #[test]
    fn test_failed_send_retry() {
        let mut view = ready_view();
        let client_ref = view.push_provisional("lost", at(1));
        assert!(view.mark_failed(&client_ref));
        assert_eq!(view.messages()[0].delivery, Delivery::Failed);
        // a failed echo does not absorb a live message
        assert_eq!(view.receive("c1", msg("s9", ME, "lost", 1)), Inbound::Appended { from_other: false });

        assert_eq!(view.retry(&client_ref).as_deref(), Some("lost"));
        assert_eq!(view.messages()[0].delivery, Delivery::Pending);
        assert_eq!(view.retry(&client_ref), None);
        assert_eq!(view.retry("local-missing"), None);
    }

    #[test]
    fn test_refresh_keeps_unconfirmed_tail() {
        let mut view = ready_view();
        view.receive("c1", msg("m1", PEER, "a", 1));
        let client_ref = view.push_provisional("in flight", at(2));

        view.begin_refresh();
        assert!(view.is_loading());
        view.receive("c1", msg("m3", PEER, "c", 4));
        assert!(view.apply_history("c1", vec![msg("m1", PEER, "a", 1), msg("m2", PEER, "b", 3)]));

        assert_eq!(ids(&view), vec!["m1", "m2", "m3", client_ref.as_str()]);
    }

    #[test]
    fn test_peer_seen_marks_own_messages() {
        let mut view = ready_view();
        view.apply_history("c1", vec![msg("a", ME, "mine", 1), msg("b", PEER, "theirs", 2)]);
        assert!(view.has_unread_from_peer());
        assert!(view.mark_seen_by_peer());
        assert!(view.messages()[0].message.seen);
        assert!(!view.messages()[1].message.seen);
        assert!(!view.mark_seen_by_peer());
    }

    #[test]
    fn test_typing_indicator_window() {
        let mut view = ready_view();
        let now = Instant::now();
        let peer = SenderRef::Id(PEER.into());

        assert!(view.typing_started(Some(&peer), now));
        assert!(!view.typing_started(Some(&peer), now + Duration::from_millis(500)));
        assert!(view.is_peer_typing(now + Duration::from_millis(2400)));
        assert!(!view.is_peer_typing(now + Duration::from_millis(2500)));
        assert_eq!(view.typing_label(), "Dr. Ana Ruiz is typing...");

        assert!(!view.expire_typing(now + Duration::from_millis(1000)));
        assert!(view.expire_typing(now + Duration::from_millis(2500)));
        assert_eq!(view.typing_deadline(), None);
    }

    #[test]
    fn test_typing_cleared_by_stop_or_message() {
        let mut view = ready_view();
        let now = Instant::now();
        assert!(!view.typing_started(Some(&SenderRef::Id(ME.into())), now));

        view.typing_started(None, now);
        assert!(view.typing_stopped());
        assert!(!view.typing_stopped());

        view.typing_started(None, now);
        view.receive("c1", msg("m1", PEER, "done typing", 1));
        assert!(!view.is_peer_typing(now));
    }
}
