use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Connector, Link};
use crate::config::ClientConfig;
use crate::error::{ConfigError, TransportError};

/// Link frames buffered in each direction.
const FRAME_BUFFER: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector. The bearer token travels as a `token` query pair.
pub struct WsConnector {
    url: Url,
    heartbeat: Duration,
}

impl WsConnector {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let mut url = Url::parse(&config.socket_url).map_err(|_| ConfigError::Invalid {
            name: "MEDLINK_SOCKET_URL",
            value: config.socket_url.clone(),
        })?;
        if let Some(token) = &config.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(Self {
            url,
            // interval() rejects a zero period
            heartbeat: config.heartbeat_interval.max(Duration::from_secs(1)),
        })
    }
}

impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(FRAME_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(FRAME_BUFFER);
        tokio::spawn(pump(ws_stream, outbound_rx, inbound_tx, self.heartbeat));

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Bridge the socket and the link queues. Sends a Ping every `heartbeat`;
/// two consecutive missed Pongs drop the connection.
async fn pump(
    ws_stream: Socket,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<String>,
    heartbeat: Duration,
) {
    let (mut sender, mut receiver) = ws_stream.split();

    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if inbound.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => pong_received = true,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Messaging server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {}", e);
                        break;
                    }
                }
            }
            text = outbound.recv() => {
                let Some(text) = text else {
                    debug!("Link released, closing socket");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    use super::*;

    fn config_with(socket_url: &str, token: Option<&str>) -> ClientConfig {
        let mut config = ClientConfig::for_backend("http://localhost:5000");
        config.socket_url = socket_url.into();
        config.token = token.map(String::from);
        config
    }

    #[test]
    fn test_token_is_query_encoded() {
        let connector = WsConnector::new(&config_with("wss://rt.medlink.test/socket?v=2", Some("a b&c"))).unwrap();
        assert_eq!(connector.url.as_str(), "wss://rt.medlink.test/socket?v=2&token=a+b%26c");

        let connector = WsConnector::new(&config_with("ws://localhost:5000", None)).unwrap();
        assert_eq!(connector.url.query(), None);
    }

    #[test]
    fn test_bad_socket_url() {
        assert!(matches!(
            WsConnector::new(&config_with("not a url", Some("t"))),
            Err(ConfigError::Invalid { name: "MEDLINK_SOCKET_URL", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_dropped_after_two_missed_pongs() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Never polled again, so pings are never answered.
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut config = config_with(&format!("ws://{addr}"), None);
        config.heartbeat_interval = Duration::from_secs(15);
        let mut link = WsConnector::new(&config).unwrap().connect().await.unwrap();
        let started = Instant::now();

        assert_eq!(link.inbound.recv().await, None);
        // pings at 15 s and 30 s go unanswered, the 45 s tick gives up
        assert!(started.elapsed() >= Duration::from_secs(45));
        peer.abort();
    }
}
