//! Seam between the secure transport and the session code
//!
//! The transport owns key exchange, encryption and framing. It hands each
//! channel the peer opens to the server as an [`IncomingChannel`].

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

/// The only channel type that gets a terminal
pub const SESSION_CHANNEL_TYPE: &str = "session";

/// Channel open failure codes (RFC 4254, section 5.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RejectReason {
    AdministrativelyProhibited = 1,
    ConnectFailed = 2,
    UnknownChannelType = 3,
    ResourceShortage = 4,
}

impl RejectReason {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// A typed in-band request received on a channel
#[derive(Debug)]
pub struct ControlRequest {
    kind: String,
    payload: Vec<u8>,
    reply: Option<oneshot::Sender<bool>>,
}

impl ControlRequest {
    /// Build a request as a transport would deliver it.
    ///
    /// When `want_reply` is set, the returned receiver resolves to the
    /// server's answer, or errors if the request is dropped unanswered.
    pub fn new(
        kind: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        want_reply: bool,
    ) -> (Self, Option<oneshot::Receiver<bool>>) {
        let (reply, rx) = if want_reply {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        (
            Self {
                kind: kind.into(),
                payload: payload.into(),
                reply,
            },
            rx,
        )
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn want_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answer the request. Does nothing if no reply was asked for.
    pub fn reply(&mut self, ok: bool) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(ok);
        }
    }
}

/// Closes the transport channel (sends EOF/close to the remote side)
#[async_trait]
pub trait ChannelCloser: Send + Sync {
    async fn close(&self) -> io::Result<()>;
}

/// Everything the session needs from an accepted channel
pub struct AcceptedChannel<S> {
    /// Duplex byte stream to and from the remote peer
    pub stream: S,

    /// Control requests, in arrival order
    pub requests: mpsc::Receiver<ControlRequest>,

    pub closer: Arc<dyn ChannelCloser>,
}

/// A channel the remote side asked to open, not yet accepted or rejected
#[async_trait]
pub trait IncomingChannel: Send + Sized + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn channel_type(&self) -> &str;

    async fn reject(self, reason: RejectReason, message: &str) -> io::Result<()>;

    async fn accept(self) -> io::Result<AcceptedChannel<Self::Stream>>;
}
