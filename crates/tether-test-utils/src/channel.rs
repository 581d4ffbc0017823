//! In-memory transport channel
//!
//! [`MockChannel`] is what the server sees; [`RemotePeer`] plays the client
//! on the other end of a `tokio::io::duplex` pipe.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether::{AcceptedChannel, ChannelCloser, ControlRequest, IncomingChannel, RejectReason};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

const DUPLEX_CAPACITY: usize = 64 * 1024;
const REQUEST_QUEUE: usize = 16;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct ChannelState {
    accepted: AtomicBool,
    fail_accept: AtomicBool,
    closes: AtomicUsize,
    rejection: Mutex<Option<(RejectReason, String)>>,
}

pub struct MockChannel {
    channel_type: String,
    stream: DuplexStream,
    requests: mpsc::Receiver<ControlRequest>,
    state: Arc<ChannelState>,
}

pub struct RemotePeer {
    stream: DuplexStream,
    requests: Option<mpsc::Sender<ControlRequest>>,
    state: Arc<ChannelState>,
    raw_output: Vec<u8>,
}

/// Create a channel of `channel_type` and the peer that opened it
pub fn mock_channel(channel_type: &str) -> (MockChannel, RemotePeer) {
    let (server_side, remote_side) = tokio::io::duplex(DUPLEX_CAPACITY);
    let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
    let state = Arc::new(ChannelState::default());

    let channel = MockChannel {
        channel_type: channel_type.to_string(),
        stream: server_side,
        requests: rx,
        state: Arc::clone(&state),
    };
    let peer = RemotePeer {
        stream: remote_side,
        requests: Some(tx),
        state,
        raw_output: Vec::new(),
    };
    (channel, peer)
}

struct MockCloser(Arc<ChannelState>);

#[async_trait]
impl ChannelCloser for MockCloser {
    async fn close(&self) -> io::Result<()> {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl IncomingChannel for MockChannel {
    type Stream = DuplexStream;

    fn channel_type(&self) -> &str {
        &self.channel_type
    }

    async fn reject(self, reason: RejectReason, message: &str) -> io::Result<()> {
        let mut rejection = self
            .state
            .rejection
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "state poisoned"))?;
        *rejection = Some((reason, message.to_string()));
        Ok(())
    }

    async fn accept(self) -> io::Result<AcceptedChannel<DuplexStream>> {
        if self.state.fail_accept.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "peer went away before accept",
            ));
        }
        self.state.accepted.store(true, Ordering::SeqCst);
        Ok(AcceptedChannel {
            stream: self.stream,
            requests: self.requests,
            closer: Arc::new(MockCloser(self.state)),
        })
    }
}

impl RemotePeer {
    /// Make the server's accept call fail
    pub fn fail_accept(&self) {
        self.state.fail_accept.store(true, Ordering::SeqCst);
    }

    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    /// Send EOF on the input direction
    pub async fn hang_up(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    /// Send a control request, waiting for the reply when one is wanted.
    ///
    /// Returns `None` if no reply was wanted or the server dropped the
    /// request without answering.
    pub async fn request(
        &self,
        kind: &str,
        payload: impl Into<Vec<u8>>,
        want_reply: bool,
    ) -> Result<Option<bool>> {
        let sender = self
            .requests
            .as_ref()
            .ok_or_else(|| anyhow!("request stream already ended"))?;
        let (request, reply) = ControlRequest::new(kind, payload, want_reply);
        sender
            .send(request)
            .await
            .map_err(|_| anyhow!("server stopped reading requests"))?;

        match reply {
            Some(rx) => Ok(tokio::time::timeout(REPLY_TIMEOUT, rx).await?.ok()),
            None => Ok(None),
        }
    }

    /// Stop sending control requests
    pub fn end_requests(&mut self) {
        self.requests.take();
    }

    /// Read until the ANSI-stripped output contains `pattern`
    pub async fn read_until(&mut self, pattern: &str, timeout: Duration) -> Result<String> {
        let mut buffer = vec![0u8; 4096];
        let result = tokio::time::timeout(timeout, async {
            loop {
                let text = self.transcript();
                if text.contains(pattern) {
                    return Ok::<_, anyhow::Error>(text);
                }
                let n = self.stream.read(&mut buffer).await?;
                if n == 0 {
                    return Err(anyhow!("channel closed before {pattern:?} appeared: {text:?}"));
                }
                self.raw_output.extend_from_slice(&buffer[..n]);
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(anyhow!(
                "timed out waiting for {pattern:?}, got {:?}",
                self.transcript()
            )),
        }
    }

    /// Read until the server side of the channel goes away
    pub async fn read_to_end(&mut self, timeout: Duration) -> Result<String> {
        let mut rest = Vec::new();
        tokio::time::timeout(timeout, self.stream.read_to_end(&mut rest)).await??;
        self.raw_output.extend_from_slice(&rest);
        Ok(self.transcript())
    }

    /// Everything received so far, escape sequences removed
    pub fn transcript(&self) -> String {
        let stripped = strip_ansi_escapes::strip(&self.raw_output);
        String::from_utf8_lossy(&stripped).into_owned()
    }

    pub fn was_accepted(&self) -> bool {
        self.state.accepted.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn rejection(&self) -> Option<(RejectReason, String)> {
        self.state
            .rejection
            .lock()
            .ok()
            .and_then(|rejection| rejection.clone())
    }
}
