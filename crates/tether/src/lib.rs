//! Tether: a minimal remote shell server core
//!
//! Each accepted `session` channel gets its own PTY and shell. The secure
//! transport (key exchange, encryption, framing) is supplied from outside
//! through the traits in [`channel`].

pub mod auth;
pub mod channel;
pub mod config;
pub mod logging;
pub mod request;
pub mod server;
pub mod session;

pub use auth::AuthorizedKeys;
pub use channel::{
    AcceptedChannel, ChannelCloser, ControlRequest, IncomingChannel, RejectReason,
    SESSION_CHANNEL_TYPE,
};
pub use config::{LogLevel, ServerConfig};
pub use request::{RequestError, RequestKind};
pub use server::Server;
pub use session::{run_session, SessionOutcome, SessionSpec};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to load host key from {path}: {source}")]
    HostKeyLoad {
        path: PathBuf,
        source: ssh_key::Error,
    },

    #[error("Host key {0} is encrypted")]
    EncryptedHostKey(PathBuf),

    #[error("Failed to generate host key: {0}")]
    HostKeyGenerate(ssh_key::Error),

    #[error("Failed to read authorized keys from {path}: {source}")]
    AuthorizedKeysRead {
        path: PathBuf,
        source: std::io::Error,
    },
}
