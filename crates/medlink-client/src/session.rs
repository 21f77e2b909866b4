//! One signed-in user's messaging state and the loop that drives it.
//!
//! All state is mutated on the session task. Network calls run on spawned
//! tasks and report back as completions, so a slow request never blocks
//! live events and a late one can be recognised as stale.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use medlink_types::{ClientCommand, Conversation, Message, ServerEvent};

use crate::api::ChatApi;
use crate::composer::{Composer, ComposerInput};
use crate::config::ClientConfig;
use crate::directory::{Directory, DirectoryUpdate};
use crate::error::{ApiError, SendError};
use crate::identity::Identity;
use crate::transport::{Channel, ChannelStatus};
use crate::view::{ConversationView, Inbound};

/// Requests from the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reload,
    Open(String),
    Close,
    /// Create or fetch the direct conversation with a user, then open it
    StartConversation(String),
    Edit(String),
    Enter { modifier: bool },
    SendButton,
    Send(String),
    /// Resend a failed message by its client ref
    Retry(String),
    Accept(String),
    Ignore(String),
    Filter(String),
    Reconnect,
    Logout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A short user-facing message, e.g. a toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// Pushed to the front end whenever something it renders changed.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    DirectoryChanged,
    ViewChanged,
    /// `label` is `None` once the indicator is gone
    TypingChanged {
        conversation_id: String,
        label: Option<String>,
    },
    Notification(serde_json::Value),
    ChannelStatus(ChannelStatus),
    Notice(Notice),
    /// Authorization failed; the session stopped and needs a new login
    SessionExpired,
}

enum Completion {
    Conversations(Result<Vec<Conversation>, ApiError>),
    Opened(Result<Conversation, ApiError>),
    History {
        conversation_id: String,
        generation: u64,
        result: Result<Vec<Message>, ApiError>,
    },
    Sent {
        conversation_id: String,
        client_ref: String,
        result: Result<Message, ApiError>,
    },
    StatusChanged {
        conversation_id: String,
        accepted: bool,
        result: Result<(), ApiError>,
    },
}

pub struct Session<A> {
    api: Arc<A>,
    channel: Channel,
    identity: Identity,
    typing_display: Duration,
    directory: Directory,
    filter: String,
    view: Option<ConversationView>,
    composer: Composer,
    /// Bumped on every open/close/refresh; history results carry it
    generation: u64,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    events: broadcast::Receiver<ServerEvent>,
    status: watch::Receiver<ChannelStatus>,
    connected_before: bool,
    updates: broadcast::Sender<SessionUpdate>,
    halted: bool,
}

impl<A: ChatApi> Session<A> {
    pub fn new(api: A, channel: Channel, identity: Identity, config: &ClientConfig) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(256);
        let events = channel.subscribe();
        let mut status = channel.watch_status();
        let connected_before = *status.borrow_and_update() == ChannelStatus::Connected;
        let composer = Composer::new(identity.self_id.clone(), config.typing_quiet);

        Self {
            api: Arc::new(api),
            channel,
            identity,
            typing_display: config.typing_display,
            directory: Directory::new(),
            filter: String::new(),
            view: None,
            composer,
            generation: 0,
            completions_tx,
            completions_rx,
            events,
            status,
            connected_before,
            updates,
            halted: false,
        }
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Directory entries matching the current filter.
    pub fn visible_conversations(&self) -> Vec<&Conversation> {
        self.directory.filter(&self.filter, &self.identity.self_id)
    }

    pub fn view(&self) -> Option<&ConversationView> {
        self.view.as_ref()
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Drive the session until logout, session expiry or the command
    /// sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.reload();

        while !self.halted {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                alive = self.step() => {
                    if !alive {
                        break;
                    }
                }
            }
        }

        info!("Session for {} finished", self.identity.self_id);
    }

    /// Wait for the next server event, finished request, status change or
    /// timer and apply it. Cancel safe. Returns false once the channel is
    /// gone for good.
    pub async fn step(&mut self) -> bool {
        let deadline = self.next_deadline();
        tokio::select! {
            event = self.events.recv() => match event {
                Ok(event) => self.handle_server_event(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Session lagged {} server events, refreshing", n);
                    self.reload();
                    self.refresh_view();
                }
                Err(broadcast::error::RecvError::Closed) => return false,
            },
            Some(completion) = self.completions_rx.recv() => self.apply(completion),
            changed = self.status.changed() => {
                if changed.is_err() {
                    return false;
                }
                let status = *self.status.borrow_and_update();
                self.handle_status_change(status);
            }
            _ = sleep_until(deadline) => self.poll_timers(Instant::now()),
        }
        true
    }

    pub fn handle_command(&mut self, command: Command) {
        if self.halted {
            debug!("Session halted, ignoring {:?}", command);
            return;
        }

        match command {
            Command::Reload => self.reload(),
            Command::Open(conversation_id) => self.open(&conversation_id),
            Command::Close => self.close(),
            Command::StartConversation(other_user_id) => self.start_conversation(&other_user_id),
            Command::Edit(text) => self.compose(ComposerInput::Edit(text)),
            Command::Enter { modifier } => self.compose(ComposerInput::Enter { modifier }),
            Command::SendButton => self.compose(ComposerInput::SendButton),
            Command::Send(text) => {
                if let Err(e) = self.send(&text) {
                    self.refuse(e);
                }
            }
            Command::Retry(client_ref) => {
                if let Err(e) = self.retry(&client_ref) {
                    self.refuse(e);
                }
            }
            Command::Accept(conversation_id) => self.set_request_status(&conversation_id, true),
            Command::Ignore(conversation_id) => self.set_request_status(&conversation_id, false),
            Command::Filter(query) => {
                self.filter = query;
                self.publish(SessionUpdate::DirectoryChanged);
            }
            Command::Reconnect => self.channel.reconnect(),
            Command::Logout => self.logout(),
        }
    }

    /// Re-fetch the conversation list.
    pub fn reload(&mut self) {
        let api = self.api.clone();
        self.spawn(async move { Completion::Conversations(api.list_conversations().await) });
    }

    /// Open a listed conversation, replacing whatever was open.
    pub fn open(&mut self, conversation_id: &str) {
        if self.view.as_ref().is_some_and(|v| v.id() == conversation_id) {
            return;
        }
        let Some(conversation) = self.directory.get(conversation_id).cloned() else {
            warn!("Cannot open unlisted conversation {}", conversation_id);
            self.notice(NoticeLevel::Error, format!("Conversation {conversation_id} is not in your list"));
            return;
        };

        info!("Opening conversation {}", conversation_id);
        self.view = Some(ConversationView::open(
            conversation,
            self.identity.self_id.clone(),
            self.typing_display,
        ));
        self.channel.join(conversation_id);
        if let Some(stop) = self.composer.set_conversation(Some(conversation_id.to_string())) {
            self.channel.emit(stop);
        }
        self.fetch_history(conversation_id);
        self.publish(SessionUpdate::ViewChanged);
    }

    pub fn close(&mut self) {
        let Some(view) = self.view.take() else {
            return;
        };
        info!("Closing conversation {}", view.id());
        self.generation += 1;
        self.channel.leave();
        if let Some(stop) = self.composer.set_conversation(None) {
            self.channel.emit(stop);
        }
        self.publish(SessionUpdate::ViewChanged);
    }

    pub fn start_conversation(&mut self, other_user_id: &str) {
        let api = self.api.clone();
        let other_user_id = other_user_id.to_string();
        self.spawn(async move { Completion::Opened(api.open_conversation(&other_user_id).await) });
    }

    /// Show `text` in the open conversation right away and send it.
    /// Returns the client ref of the optimistic echo.
    pub fn send(&mut self, text: &str) -> Result<String, SendError> {
        if self.halted {
            return Err(SendError::SessionEnded);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SendError::Empty);
        }
        let view = self.view.as_mut().ok_or(SendError::NoConversation)?;
        if !view.conversation().accepts_messages() {
            return Err(SendError::NotAccepted);
        }

        let client_ref = view.push_provisional(text, Utc::now());
        let conversation_id = view.id().to_string();
        self.publish(SessionUpdate::ViewChanged);
        self.dispatch_send(conversation_id, client_ref.clone(), text.to_string());
        Ok(client_ref)
    }

    /// Resend a message whose first attempt failed.
    pub fn retry(&mut self, client_ref: &str) -> Result<(), SendError> {
        if self.halted {
            return Err(SendError::SessionEnded);
        }
        let view = self.view.as_mut().ok_or(SendError::NoConversation)?;
        let text = view
            .retry(client_ref)
            .ok_or_else(|| SendError::UnknownMessage(client_ref.to_string()))?;
        let conversation_id = view.id().to_string();
        self.publish(SessionUpdate::ViewChanged);
        self.dispatch_send(conversation_id, client_ref.to_string(), text);
        Ok(())
    }

    pub fn accept(&mut self, conversation_id: &str) {
        self.set_request_status(conversation_id, true);
    }

    pub fn ignore(&mut self, conversation_id: &str) {
        self.set_request_status(conversation_id, false);
    }

    pub fn handle_server_event(&mut self, event: ServerEvent) {
        if self.halted {
            return;
        }

        match event {
            ServerEvent::NewMessage {
                conversation_id,
                message,
            } => self.on_new_message(conversation_id, message),
            ServerEvent::Typing {
                conversation_id,
                from,
            } => {
                let now = Instant::now();
                let Some(view) = self.open_view_mut(&conversation_id) else {
                    return;
                };
                if view.typing_started(from.as_ref(), now) {
                    let label = Some(view.typing_label());
                    self.publish(SessionUpdate::TypingChanged { conversation_id, label });
                }
            }
            ServerEvent::StopTyping { conversation_id } => {
                let Some(view) = self.open_view_mut(&conversation_id) else {
                    return;
                };
                if view.typing_stopped() {
                    self.publish(SessionUpdate::TypingChanged {
                        conversation_id,
                        label: None,
                    });
                }
            }
            ServerEvent::MessageSeen { chat_id } => {
                let Some(view) = self.open_view_mut(&chat_id) else {
                    return;
                };
                if view.mark_seen_by_peer() {
                    self.publish(SessionUpdate::ViewChanged);
                }
            }
            ServerEvent::Notification(payload) => {
                debug!("Notification: {}", payload);
                self.publish(SessionUpdate::Notification(payload));
            }
        }
    }

    /// React to the channel's status. A return to `Connected` after a drop
    /// re-fetches what may have been missed.
    pub fn handle_status_change(&mut self, status: ChannelStatus) {
        self.publish(SessionUpdate::ChannelStatus(status));
        match status {
            ChannelStatus::Connected if self.connected_before => {
                info!("Channel reconnected, refreshing conversations");
                self.reload();
                self.refresh_view();
            }
            ChannelStatus::Connected => self.connected_before = true,
            ChannelStatus::Offline => {
                self.notice(NoticeLevel::Error, "Offline: could not reach the messaging server".into())
            }
            _ => {}
        }
    }

    /// Wait for the next finished network call and apply it.
    /// Returns false if no call can finish anymore.
    pub async fn complete_next(&mut self) -> bool {
        match self.completions_rx.recv().await {
            Some(completion) => {
                self.apply(completion);
                true
            }
            None => false,
        }
    }

    /// Fire whatever timers are due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        if let Some(stop) = self.composer.poll_quiet(now) {
            self.channel.emit(stop);
        }
        let mut expired = None;
        if let Some(view) = self.view.as_mut() {
            if view.expire_typing(now) {
                expired = Some(view.id().to_string());
            }
        }
        if let Some(conversation_id) = expired {
            self.publish(SessionUpdate::TypingChanged {
                conversation_id,
                label: None,
            });
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let typing = self.view.as_ref().and_then(ConversationView::typing_deadline);
        match (self.composer.next_deadline(), typing) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn on_new_message(&mut self, conversation_id: String, message: Message) {
        debug!("New message {} in {}", message.id, conversation_id);

        match self.directory.apply_incoming_message(&conversation_id, &message) {
            DirectoryUpdate::Updated => self.publish(SessionUpdate::DirectoryChanged),
            DirectoryUpdate::Unknown => self.reload(),
        }

        let Some(view) = self.view.as_mut() else {
            return;
        };
        let was_typing = view.typing_deadline().is_some();
        let outcome = view.receive(&conversation_id, message);
        let typing_cleared = was_typing && view.typing_deadline().is_none();

        match outcome {
            Inbound::Appended { from_other } => {
                if from_other {
                    self.channel.emit(ClientCommand::MessageSeen {
                        conversation_id: conversation_id.clone(),
                    });
                }
                self.publish(SessionUpdate::ViewChanged);
            }
            Inbound::Reconciled => self.publish(SessionUpdate::ViewChanged),
            Inbound::Buffered | Inbound::Ignored | Inbound::Duplicate => {}
        }
        if typing_cleared {
            self.publish(SessionUpdate::TypingChanged {
                conversation_id,
                label: None,
            });
        }
    }

    fn apply(&mut self, completion: Completion) {
        if self.halted {
            return;
        }

        match completion {
            Completion::Conversations(Ok(conversations)) => {
                self.directory.replace(conversations);
                if let Some(view) = self.view.as_mut() {
                    if let Some(current) = self.directory.get(view.id()) {
                        view.set_conversation(current.clone());
                        self.publish(SessionUpdate::ViewChanged);
                    }
                }
                self.publish(SessionUpdate::DirectoryChanged);
            }
            Completion::Conversations(Err(e)) => self.fail(e, "Could not load conversations"),

            Completion::Opened(Ok(conversation)) => {
                let conversation_id = conversation.id.clone();
                self.directory.upsert(conversation);
                self.publish(SessionUpdate::DirectoryChanged);
                self.open(&conversation_id);
            }
            Completion::Opened(Err(e)) => self.fail(e, "Could not start conversation"),

            Completion::History {
                conversation_id,
                generation,
                result,
            } => self.apply_history(conversation_id, generation, result),

            Completion::Sent {
                conversation_id,
                client_ref,
                result,
            } => self.apply_sent(conversation_id, client_ref, result),

            Completion::StatusChanged {
                conversation_id,
                accepted,
                result,
            } => match result {
                Ok(()) => {
                    info!(
                        "Request {} {}",
                        conversation_id,
                        if accepted { "accepted" } else { "ignored" }
                    );
                    let text = if accepted { "Request accepted" } else { "Request ignored" };
                    self.notice(NoticeLevel::Info, text.into());
                    self.reload();
                }
                Err(e) if accepted => self.fail(e, "Failed to accept request"),
                Err(e) => self.fail(e, "Failed to ignore request"),
            },
        }
    }

    fn apply_history(&mut self, conversation_id: String, generation: u64, result: Result<Vec<Message>, ApiError>) {
        if generation != self.generation {
            debug!("Discarding stale history for {}", conversation_id);
            return;
        }
        let Some(view) = self.view.as_mut() else {
            return;
        };

        match result {
            Ok(messages) => {
                if view.apply_history(&conversation_id, messages) {
                    // covers live messages that were buffered during the load
                    if view.has_unread_from_peer() {
                        self.channel.emit(ClientCommand::MessageSeen { conversation_id });
                    }
                    self.publish(SessionUpdate::ViewChanged);
                }
            }
            Err(e) => {
                if view.history_failed(&conversation_id, e.to_string()) {
                    if view.has_unread_from_peer() {
                        self.channel.emit(ClientCommand::MessageSeen {
                            conversation_id: conversation_id.clone(),
                        });
                    }
                    self.publish(SessionUpdate::ViewChanged);
                }
                self.fail(e, "Could not load messages");
            }
        }
    }

    fn apply_sent(&mut self, conversation_id: String, client_ref: String, result: Result<Message, ApiError>) {
        match result {
            Ok(message) => {
                debug!("Message {} stored as {}", client_ref, message.id);
                match self.directory.apply_incoming_message(&conversation_id, &message) {
                    DirectoryUpdate::Updated => self.publish(SessionUpdate::DirectoryChanged),
                    DirectoryUpdate::Unknown => self.reload(),
                }
                let confirmed = self
                    .open_view_mut(&conversation_id)
                    .is_some_and(|view| view.confirm_sent(&client_ref, message));
                if confirmed {
                    self.publish(SessionUpdate::ViewChanged);
                }
            }
            Err(e) => {
                error!("Failed to send message in {}: {}", conversation_id, e);
                let failed = self
                    .open_view_mut(&conversation_id)
                    .is_some_and(|view| view.mark_failed(&client_ref));
                if failed {
                    self.publish(SessionUpdate::ViewChanged);
                }
                self.fail(e, "Message not sent");
            }
        }
    }

    fn compose(&mut self, input: ComposerInput) {
        let output = self.composer.handle(input, Instant::now());
        if let Some(command) = output.typing {
            self.channel.emit(command);
        }
        if let Some(text) = output.submit {
            if let Err(e) = self.send(&text) {
                self.refuse(e);
            }
        }
    }

    fn set_request_status(&mut self, conversation_id: &str, accepted: bool) {
        let api = self.api.clone();
        let conversation_id = conversation_id.to_string();
        self.spawn(async move {
            let result = if accepted {
                api.accept(&conversation_id).await
            } else {
                api.ignore(&conversation_id).await
            };
            Completion::StatusChanged {
                conversation_id,
                accepted,
                result,
            }
        });
    }

    fn fetch_history(&mut self, conversation_id: &str) {
        self.generation += 1;
        let generation = self.generation;
        let api = self.api.clone();
        let conversation_id = conversation_id.to_string();
        self.spawn(async move {
            let result = api.fetch_messages(&conversation_id).await;
            Completion::History {
                conversation_id,
                generation,
                result,
            }
        });
    }

    fn refresh_view(&mut self) {
        let Some(view) = self.view.as_mut() else {
            return;
        };
        view.begin_refresh();
        let conversation_id = view.id().to_string();
        self.fetch_history(&conversation_id);
    }

    fn dispatch_send(&self, conversation_id: String, client_ref: String, text: String) {
        let api = self.api.clone();
        self.spawn(async move {
            let result = api.send_message(&conversation_id, &text).await;
            Completion::Sent {
                conversation_id,
                client_ref,
                result,
            }
        });
    }

    fn logout(&mut self) {
        info!("Logging out {}", self.identity.self_id);
        self.close();
        self.channel.disconnect();
        self.halted = true;
    }

    fn expire(&mut self) {
        if self.halted {
            return;
        }
        warn!("Session expired, stopping messaging");
        self.halted = true;
        self.view = None;
        self.channel.disconnect();
        self.publish(SessionUpdate::SessionExpired);
    }

    fn fail(&mut self, e: ApiError, context: &str) {
        if e.is_unauthorized() {
            self.expire();
            return;
        }
        warn!("{}: {}", context, e);
        self.notice(NoticeLevel::Error, format!("{context}: {e}"));
    }

    fn refuse(&self, e: SendError) {
        debug!("Send refused: {}", e);
        self.notice(NoticeLevel::Error, e.to_string());
    }

    fn open_view_mut(&mut self, conversation_id: &str) -> Option<&mut ConversationView> {
        self.view.as_mut().filter(|v| v.id() == conversation_id)
    }

    fn spawn<F>(&self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            // Receiver gone means the session ended; nothing to report to.
            let _ = tx.send(work.await);
        });
    }

    fn notice(&self, level: NoticeLevel, text: String) {
        self.publish(SessionUpdate::Notice(Notice { level, text }));
    }

    fn publish(&self, update: SessionUpdate) {
        // No front end listening is fine.
        let _ = self.updates.send(update);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
