//! In-memory stand-ins for the backend and the messaging server.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use medlink_client::{
    ApiError, Channel, ChannelStatus, ChatApi, ClientConfig, Connector, Identity, Link,
    ReconnectPolicy, Session, TransportError,
};
use medlink_types::{
    ClientCommand, Conversation, ConversationStatus, Message, SenderRef, ServerEvent, UserRef,
};

pub const ME: &str = "u-me";

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap()
}

pub fn conversation(id: &str, other_name: &str, minute: u32) -> Conversation {
    Conversation {
        id: id.into(),
        participants: vec![
            UserRef::with_id(ME),
            UserRef {
                object_id: Some(format!("u-{id}")),
                name: Some(other_name.into()),
                role: Some("doctor".into()),
                ..UserRef::default()
            },
        ],
        last_message: None,
        updated_at: Some(at(minute)),
        status: Some(ConversationStatus::Active),
    }
}

pub fn message(id: &str, sender: &str, text: &str, minute: u32) -> Message {
    Message {
        id: id.into(),
        conversation_id: None,
        sender: Some(SenderRef::Id(sender.into())),
        text: text.into(),
        created_at: at(minute),
        seen: false,
    }
}

#[derive(Default)]
pub struct FakeState {
    pub conversations: Vec<Conversation>,
    pub history: HashMap<String, Vec<Message>>,
    /// (conversation id, text) per accepted send
    pub sent: Vec<(String, String)>,
    pub fail_sends: bool,
    pub unauthorized: bool,
    next_id: u64,
}

/// Backend double. Clones share state, so a test keeps one to inspect and
/// mutate what the session sees.
#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeApi {
    pub fn with_conversations(conversations: Vec<Conversation>) -> Self {
        let api = Self::default();
        api.state().conversations = conversations;
        api
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn guard(&self) -> Result<MutexGuard<'_, FakeState>, ApiError> {
        let state = self.state();
        if state.unauthorized {
            return Err(ApiError::Unauthorized);
        }
        Ok(state)
    }
}

impl ChatApi for FakeApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        Ok(self.guard()?.conversations.clone())
    }

    async fn open_conversation(&self, other_user_id: &str) -> Result<Conversation, ApiError> {
        let mut state = self.guard()?;
        let existing = state.conversations.iter().find(|c| {
            c.participants
                .iter()
                .any(|p| p.object_id.as_deref() == Some(other_user_id))
        });
        if let Some(found) = existing {
            return Ok(found.clone());
        }

        let created = Conversation {
            id: format!("c-{other_user_id}"),
            participants: vec![UserRef::with_id(ME), UserRef::with_id(other_user_id)],
            last_message: None,
            updated_at: Some(Utc::now()),
            status: Some(ConversationStatus::Active),
        };
        state.conversations.push(created.clone());
        Ok(created)
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        Ok(self
            .guard()?
            .history
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<Message, ApiError> {
        let mut state = self.guard()?;
        if state.fail_sends {
            return Err(ApiError::Rejected("storage unavailable".into()));
        }
        state.next_id += 1;
        let stored = Message {
            id: format!("srv-{}", state.next_id),
            conversation_id: Some(conversation_id.into()),
            sender: Some(SenderRef::Id(ME.into())),
            text: text.into(),
            created_at: Utc::now(),
            seen: false,
        };
        state
            .history
            .entry(conversation_id.into())
            .or_default()
            .push(stored.clone());
        state.sent.push((conversation_id.into(), text.into()));
        Ok(stored)
    }

    async fn accept(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.set_status(conversation_id, ConversationStatus::Active)
    }

    async fn ignore(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.set_status(conversation_id, ConversationStatus::Ignored)
    }
}

impl FakeApi {
    fn set_status(&self, conversation_id: &str, status: ConversationStatus) -> Result<(), ApiError> {
        let mut state = self.guard()?;
        match state.conversations.iter_mut().find(|c| c.id == conversation_id) {
            Some(conversation) => {
                conversation.status = Some(status);
                Ok(())
            }
            None => Err(ApiError::Rejected("Chat not found".into())),
        }
    }
}

/// Server end of one fake link.
pub struct FakeServer {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<String>,
}

impl FakeServer {
    /// Next command the client sent; `None` once the client let go.
    pub async fn next_command(&mut self) -> Option<ClientCommand> {
        let frame = self.from_client.recv().await?;
        Some(serde_json::from_str(&frame).expect("client sent an invalid frame"))
    }

    pub async fn push(&self, event: &ServerEvent) {
        let frame = serde_json::to_string(event).unwrap();
        self.to_client.send(frame).await.unwrap();
    }

    pub async fn push_raw(&self, frame: &str) {
        self.to_client.send(frame.to_string()).await.unwrap();
    }
}

/// Hands out pre-registered links in order; fails once none are left.
#[derive(Clone, Default)]
pub struct FakeConnector {
    links: Arc<Mutex<VecDeque<Link>>>,
    connects: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&self) -> FakeServer {
        let (client_tx, from_client) = mpsc::channel(64);
        let (to_client, client_rx) = mpsc::channel(64);
        self.links.lock().unwrap().push_back(Link {
            outbound: client_tx,
            inbound: client_rx,
        });
        FakeServer {
            from_client,
            to_client,
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.links
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Connect("connection refused".into()))
    }
}

pub fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        delay: Duration::from_millis(100),
    }
}

pub async fn wait_for_status(channel: &Channel, wanted: ChannelStatus) {
    let mut status = channel.watch_status();
    status
        .wait_for(|s| *s == wanted)
        .await
        .expect("channel status sender dropped");
}

pub fn config() -> ClientConfig {
    ClientConfig::for_backend("http://localhost:5000")
}

/// A session connected to one fake server, with the directory loaded and
/// the server's `registerUser` already consumed.
pub async fn connected_session(api: &FakeApi) -> (Session<FakeApi>, FakeServer, FakeConnector) {
    let connector = FakeConnector::new();
    let mut server = connector.add_server();
    let channel = Channel::connect(connector.clone(), ME, fast_policy(3));
    let identity = Identity::from_user(UserRef::with_id(ME)).unwrap();

    let mut session = Session::new(api.clone(), channel, identity, &config());
    assert_eq!(
        server.next_command().await,
        Some(ClientCommand::RegisterUser(ME.into()))
    );

    session.reload();
    assert!(session.complete_next().await);
    (session, server, connector)
}
