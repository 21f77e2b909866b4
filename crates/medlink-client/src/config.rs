use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";

/// Bounded retry policy for the real-time channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after a drop (or a failed first connect) before going offline
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend origin without trailing slash, e.g. `http://localhost:5000`
    pub backend_url: String,
    /// Real-time endpoint, `ws://` or `wss://`
    pub socket_url: String,
    /// Bearer token, attached to every REST call and the socket handshake
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
    /// Quiet period after the last keystroke before `stopTyping` goes out
    pub typing_quiet: Duration,
    /// Lifetime of a peer typing indicator without a stop signal
    pub typing_display: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_backend(DEFAULT_BACKEND_URL)
    }
}

impl ClientConfig {
    /// Defaults pointed at one backend, socket on the same origin.
    pub fn for_backend(backend_url: &str) -> Self {
        let backend_url = backend_url.trim_end_matches('/').to_string();
        Self {
            socket_url: to_ws_url(&backend_url),
            backend_url,
            token: None,
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(15),
            typing_quiet: Duration::from_millis(2000),
            typing_display: Duration::from_millis(2000),
        }
    }

    /// Read `MEDLINK_*` variables. Unset values take defaults, malformed
    /// ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`] over any source of variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend_url = lookup("MEDLINK_BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.into());
        let mut config = Self::for_backend(&backend_url);

        if let Some(socket_url) = lookup("MEDLINK_SOCKET_URL") {
            config.socket_url = to_ws_url(socket_url.trim_end_matches('/'));
        }
        config.token = lookup("MEDLINK_TOKEN").filter(|t| !t.is_empty());

        if let Some(attempts) = parse_var::<u32>(&lookup, "MEDLINK_RECONNECT_ATTEMPTS")? {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "MEDLINK_RECONNECT_DELAY_MS")? {
            config.reconnect.delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "MEDLINK_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "MEDLINK_TYPING_QUIET_MS")? {
            config.typing_quiet = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "MEDLINK_TYPING_DISPLAY_MS")? {
            config.typing_display = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "MEDLINK_HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// REST base: `<backend>/api`.
    pub fn api_base(&self) -> String {
        format!("{}/api", self.backend_url)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(None),
    }
}

fn to_ws_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
