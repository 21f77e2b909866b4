//! The single real-time channel of a session.
//!
//! A [`Channel`] is a cheap handle to one driver task that owns the
//! connection, reconnects with a bounded policy, and fans inbound events
//! out to subscribers.

mod driver;
mod ws;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, broadcast, mpsc, watch};
use tracing::{debug, info};

use medlink_types::{ClientCommand, ServerEvent};

use crate::config::ReconnectPolicy;
use crate::error::TransportError;

pub use ws::WsConnector;

/// One established connection, seen as two queues of JSON text frames.
/// The connection is gone once `inbound` yields `None`.
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Opens links to the messaging server.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<Link, TransportError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Retries exhausted; waits for [`Channel::reconnect`]
    Offline,
    /// Disconnected on purpose
    Closed,
}

/// What the driver reads from its queue. `Shutdown` sits behind every
/// command queued before it, so those still go out.
#[derive(Debug)]
enum Request {
    Send(ClientCommand),
    Shutdown,
}

#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    requests: mpsc::UnboundedSender<Request>,
    events: broadcast::Sender<ServerEvent>,
    status: Arc<watch::Sender<ChannelStatus>>,
    /// Conversation currently joined; at most one
    room: Arc<Mutex<Option<String>>>,
    reconnect: Arc<Notify>,
    stopped: watch::Receiver<bool>,
}

impl Channel {
    /// Spawn the driver and start connecting as `user_id`.
    pub fn connect<C: Connector>(connector: C, user_id: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(256);
        let status = Arc::new(watch::Sender::new(ChannelStatus::Connecting));
        let room = Arc::new(Mutex::new(None));
        let reconnect = Arc::new(Notify::new());
        let (stopped_tx, stopped) = watch::channel(false);

        let driver = driver::Driver {
            connector,
            user_id: user_id.into(),
            policy,
            requests: requests_rx,
            events: events_tx.clone(),
            status: status.clone(),
            room: room.clone(),
            reconnect: reconnect.clone(),
            stopped: stopped_tx,
        };
        // Ends on shutdown or once every handle is dropped.
        tokio::spawn(driver.run());

        Self {
            inner: Arc::new(ChannelInner {
                requests: requests_tx,
                events: events_tx,
                status,
                room,
                reconnect,
                stopped,
            }),
        }
    }

    pub fn emit(&self, command: ClientCommand) {
        if self.inner.requests.send(Request::Send(command)).is_err() {
            debug!("Channel driver gone, command dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> ChannelStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status.subscribe()
    }

    /// Join a conversation's stream, leaving the previous one first.
    pub fn join(&self, conversation_id: &str) {
        let mut room = self.lock_room();
        if room.as_deref() == Some(conversation_id) {
            return;
        }
        if let Some(previous) = room.take() {
            self.emit(ClientCommand::LeaveConversation(previous));
        }
        info!("Joining conversation {}", conversation_id);
        *room = Some(conversation_id.to_string());
        self.emit(ClientCommand::JoinConversation(conversation_id.to_string()));
    }

    pub fn leave(&self) {
        let mut room = self.lock_room();
        if let Some(previous) = room.take() {
            info!("Leaving conversation {}", previous);
            self.emit(ClientCommand::LeaveConversation(previous));
        }
    }

    pub fn joined(&self) -> Option<String> {
        self.lock_room().clone()
    }

    /// Start a fresh retry cycle after the channel went offline.
    pub fn reconnect(&self) {
        if self.status() == ChannelStatus::Offline {
            info!("Manual reconnect requested");
            self.inner.reconnect.notify_one();
        }
    }

    /// Close the connection once commands already emitted are written.
    /// Every handle sees `Closed` right away; later emits are dropped.
    pub fn disconnect(&self) {
        self.lock_room().take();
        self.inner.status.send_replace(ChannelStatus::Closed);
        if self.inner.requests.send(Request::Shutdown).is_err() {
            debug!("Channel driver already gone");
        }
        info!("Messaging channel closed");
    }

    /// Resolves once the driver has released the connection, after a
    /// [`Channel::disconnect`] has flushed what was queued before it.
    pub async fn stopped(&self) {
        let mut stopped = self.inner.stopped.clone();
        // A dropped sender means the driver is gone as well.
        let _ = stopped.wait_for(|done| *done).await;
    }

    // Join/leave hold this lock while enqueueing, and the driver holds it
    // while announcing, so a room is never announced twice.
    fn lock_room(&self) -> MutexGuard<'_, Option<String>> {
        self.inner.room.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
