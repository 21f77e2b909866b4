//! Real-time messaging core for the MedLink client.
//!
//! One [`Session`] per signed-in user owns the shared [`Channel`], the
//! conversation [`Directory`], the open [`ConversationView`] and the
//! [`Composer`]. Network calls go through a [`ChatApi`] implementation.

pub mod api;
pub mod composer;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod session;
pub mod transport;
pub mod view;

pub use api::{ChatApi, RestClient};
pub use composer::{Composer, ComposerInput, ComposerOutput};
pub use config::{ClientConfig, ReconnectPolicy};
pub use directory::{Directory, DirectoryUpdate};
pub use error::{ApiError, ConfigError, SendError, TransportError};
pub use identity::Identity;
pub use session::{Command, Notice, NoticeLevel, Session, SessionUpdate};
pub use transport::{Channel, ChannelStatus, Connector, Link, WsConnector};
pub use view::{ConversationView, Delivery, Inbound, ViewMessage};
