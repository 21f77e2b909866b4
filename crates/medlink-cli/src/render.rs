use chrono::Local;

use medlink_client::{
    ChannelStatus, ChatApi, ConversationView, Delivery, Identity, NoticeLevel, Session,
    SessionUpdate, ViewMessage,
};
use medlink_types::{Conversation, ConversationStatus};

const PREVIEW_CHARS: usize = 40;

/// Prints session updates incrementally: only messages not yet on screen.
#[derive(Default)]
pub struct Printer {
    conversation_id: Option<String>,
    shown: Vec<(String, Delivery, bool)>,
}

impl Printer {
    pub fn update<A: ChatApi>(&mut self, session: &Session<A>, update: SessionUpdate) {
        match update {
            SessionUpdate::DirectoryChanged => {}
            SessionUpdate::ViewChanged => self.view(session.view(), session.identity()),
            SessionUpdate::TypingChanged { label, .. } => {
                if let Some(label) = label {
                    println!("  {label}");
                }
            }
            SessionUpdate::Notification(payload) => println!("* notification: {payload}"),
            SessionUpdate::ChannelStatus(status) => println!("* {}", status_line(status)),
            SessionUpdate::Notice(notice) => match notice.level {
                NoticeLevel::Info => println!("* {}", notice.text),
                NoticeLevel::Error => println!("! {}", notice.text),
            },
            SessionUpdate::SessionExpired => {
                println!("! Session expired. Sign in again and restart with a fresh MEDLINK_TOKEN.")
            }
        }
    }

    fn view(&mut self, view: Option<&ConversationView>, identity: &Identity) {
        let Some(view) = view else {
            if self.conversation_id.take().is_some() {
                println!("-- closed --");
            }
            self.shown.clear();
            return;
        };

        if self.conversation_id.as_deref() != Some(view.id()) {
            self.conversation_id = Some(view.id().to_string());
            self.shown.clear();
            let name = view.other().map(|u| u.display_name()).unwrap_or("Loading...");
            println!("-- {} ({}) --", name, view.id());
        }
        if let Some(reason) = view.load_error() {
            println!("! could not load history: {reason}");
        }

        let messages = view.messages();
        // History replaced what was shown: start over rather than guess.
        let diverged = self
            .shown
            .iter()
            .zip(messages)
            .any(|((id, _, _), vm)| *id != vm.message.id && vm.client_ref.is_none());
        if diverged || self.shown.len() > messages.len() {
            self.shown.clear();
        }

        for (i, vm) in messages.iter().enumerate() {
            let state = (vm.message.id.clone(), vm.delivery, vm.message.seen);
            match self.shown.get(i) {
                None => println!("{}", message_line(vm, view, identity)),
                Some((_, delivery, seen)) if *delivery != vm.delivery || *seen != vm.message.seen => {
                    println!("{}", message_line(vm, view, identity))
                }
                Some(_) => {}
            }
            if i < self.shown.len() {
                self.shown[i] = state;
            } else {
                self.shown.push(state);
            }
        }
    }
}

pub fn directory<A: ChatApi>(session: &Session<A>) {
    let conversations = session.visible_conversations();
    if conversations.is_empty() {
        println!("  (no conversations)");
    }
    for (i, conversation) in conversations.iter().enumerate() {
        println!("{:>3}. {}", i + 1, directory_line(conversation, session.identity()));
    }
}

fn directory_line(conversation: &Conversation, identity: &Identity) -> String {
    let (name, role) = match identity.other_in(conversation) {
        Some(other) => (other.display_name().to_string(), other.display_role()),
        None => ("Loading...".to_string(), String::new()),
    };
    let marker = match conversation.status {
        Some(ConversationStatus::Pending) => " [request]",
        Some(ConversationStatus::Ignored) => " [ignored]",
        _ => "",
    };
    let preview = conversation
        .last_message
        .as_ref()
        .map(|m| truncate(&m.text, PREVIEW_CHARS))
        .unwrap_or_else(|| "No messages yet".to_string());
    let when = conversation
        .activity_at()
        .with_timezone(&Local)
        .format("%b %d %H:%M");

    format!("{name} ({role}){marker}  {when}  {preview}")
}

fn message_line(vm: &ViewMessage, view: &ConversationView, identity: &Identity) -> String {
    let who = if identity.is_own(&vm.message) {
        "You"
    } else {
        view.other().map(|u| u.display_name()).unwrap_or("User")
    };
    let when = vm.message.created_at.with_timezone(&Local).format("%H:%M");
    let state = match (vm.delivery, &vm.client_ref) {
        (Delivery::Pending, _) => " (sending)".to_string(),
        (Delivery::Failed, Some(client_ref)) => format!(" (failed, /retry {client_ref})"),
        (Delivery::Failed, None) => " (failed)".to_string(),
        (Delivery::Sent, _) if vm.message.seen && identity.is_own(&vm.message) => " (seen)".to_string(),
        (Delivery::Sent, _) => String::new(),
    };
    format!("[{when}] {who}: {}{state}", vm.message.text)
}

fn status_line(status: ChannelStatus) -> String {
    match status {
        ChannelStatus::Connecting => "connecting...".into(),
        ChannelStatus::Connected => "connected".into(),
        ChannelStatus::Reconnecting { attempt } => format!("reconnecting (attempt {attempt})..."),
        ChannelStatus::Offline => "offline, type /reconnect to try again".into(),
        ChannelStatus::Closed => "disconnected".into(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
