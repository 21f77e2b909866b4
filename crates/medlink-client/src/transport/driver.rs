use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use medlink_types::{ClientCommand, ServerEvent};

use super::{ChannelStatus, Connector, Link, Request};
use crate::config::ReconnectPolicy;
use crate::error::TransportError;

enum LinkEnd {
    Dropped,
    Shutdown,
}

/// Owns the connection for one [`super::Channel`].
pub(super) struct Driver<C> {
    pub(super) connector: C,
    pub(super) user_id: String,
    pub(super) policy: ReconnectPolicy,
    pub(super) requests: mpsc::UnboundedReceiver<Request>,
    pub(super) events: broadcast::Sender<ServerEvent>,
    pub(super) status: Arc<watch::Sender<ChannelStatus>>,
    pub(super) room: Arc<Mutex<Option<String>>>,
    pub(super) reconnect: Arc<Notify>,
    pub(super) stopped: watch::Sender<bool>,
}

impl<C: Connector> Driver<C> {
    pub(super) async fn run(mut self) {
        self.serve().await;
        self.set_status(ChannelStatus::Closed);
        self.stopped.send_replace(true);
        debug!("Channel driver for {} stopped", self.user_id);
    }

    async fn serve(&mut self) {
        let mut attempt: u32 = 0;

        loop {
            match self.connect().await {
                None => return,
                Some(Ok(link)) => {
                    attempt = 0;
                    info!("{} connected to messaging server", self.user_id);
                    self.set_status(ChannelStatus::Connected);

                    match self.run_link(link).await {
                        LinkEnd::Dropped => warn!("Messaging connection dropped"),
                        LinkEnd::Shutdown => return,
                    }
                }
                Some(Err(e)) => warn!("Messaging connect attempt failed: {}", e),
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                warn!(
                    "Giving up after {} reconnect attempts, channel offline",
                    self.policy.max_attempts
                );
                self.set_status(ChannelStatus::Offline);
                if !self.idle(None).await {
                    return;
                }
                attempt = 0;
                self.set_status(ChannelStatus::Connecting);
                continue;
            }

            self.set_status(ChannelStatus::Reconnecting { attempt });
            if !self.idle(Some(self.policy.delay)).await {
                return;
            }
        }
    }

    /// One connect attempt. `None` means the channel shut down meanwhile.
    async fn connect(&mut self) -> Option<Result<Link, TransportError>> {
        let connecting = self.connector.connect();
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => return Some(result),
                request = self.requests.recv() => match request {
                    Some(Request::Send(command)) => debug!("Dropping {:?} while connecting", command),
                    Some(Request::Shutdown) | None => return None,
                },
            }
        }
    }

    /// Pump one link until it drops or the channel shuts down. Commands
    /// queued ahead of a shutdown are written before the link is released.
    async fn run_link(&mut self, link: Link) -> LinkEnd {
        let Link { outbound, mut inbound } = link;

        let Some(announcement) = self.announcement() else {
            return LinkEnd::Shutdown;
        };
        for command in announcement {
            if !send_command(&outbound, &command).await {
                return LinkEnd::Dropped;
            }
        }

        loop {
            tokio::select! {
                frame = inbound.recv() => {
                    let Some(text) = frame else {
                        return LinkEnd::Dropped;
                    };
                    self.dispatch(&text);
                }
                request = self.requests.recv() => {
                    let command = match request {
                        Some(Request::Send(command)) => command,
                        Some(Request::Shutdown) | None => return LinkEnd::Shutdown,
                    };
                    if !send_command(&outbound, &command).await {
                        return LinkEnd::Dropped;
                    }
                }
            }
        }
    }

    /// Registration plus the current room, replacing anything queued while
    /// the link was down. `None` if a shutdown was queued meanwhile.
    fn announcement(&mut self) -> Option<Vec<ClientCommand>> {
        let room = self.room.lock().unwrap_or_else(PoisonError::into_inner);

        while let Ok(stale) = self.requests.try_recv() {
            match stale {
                Request::Send(command) => debug!("Dropping {:?} queued while disconnected", command),
                Request::Shutdown => return None,
            }
        }

        let mut commands = vec![ClientCommand::RegisterUser(self.user_id.clone())];
        if let Some(conversation_id) = room.as_ref() {
            commands.push(ClientCommand::JoinConversation(conversation_id.clone()));
        }
        Some(commands)
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => {
                debug!("Inbound {:?}", event);
                // No subscribers is fine: nobody is looking at chat right now.
                let _ = self.events.send(event);
            }
            Err(e) => {
                let raw: String = text.chars().take(200).collect();
                warn!("Unrecognized server event: {} -- raw: {}", e, raw);
            }
        }
    }

    /// Sit out a disconnected period, discarding commands. `None` waits for
    /// a manual reconnect. Returns false once the channel is shut down.
    async fn idle(&mut self, wait: Option<Duration>) -> bool {
        let sleep = async {
            match wait {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                _ = self.reconnect.notified(), if wait.is_none() => return true,
                request = self.requests.recv() => match request {
                    Some(Request::Send(command)) => debug!("Dropping {:?} while disconnected", command),
                    Some(Request::Shutdown) | None => return false,
                },
            }
        }
    }

    /// `Closed` is final: a late transition never reopens the channel.
    fn set_status(&self, next: ChannelStatus) {
        self.status.send_if_modified(|current| {
            if *current == ChannelStatus::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn send_command(outbound: &mpsc::Sender<String>, command: &ClientCommand) -> bool {
    let text = match serde_json::to_string(command) {
        Ok(text) => text,
        Err(e) => {
            warn!("Could not encode {:?}: {}", command, e);
            return true;
        }
    };
    outbound.send(text).await.is_ok()
}
