//! Session multiplexer
//!
//! Binds one accepted channel to one shell running on a fresh PTY. Two copy
//! tasks move bytes in each direction while a third task applies control
//! requests. The first copy task to finish triggers the close sequence.

use crate::channel::{
    AcceptedChannel, ChannelCloser, ControlRequest, IncomingChannel, RejectReason,
    SESSION_CHANNEL_TYPE,
};
use crate::request::{parse_pty_request, parse_window_change, RequestKind};
use std::fmt;
use std::io;
use std::sync::{Arc, Weak};
use tether_pty::{PtyController, PtyLauncher, ShellCommand, WindowSize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// Buffer size for each copy direction
const COPY_BUFFER_SIZE: usize = 4096;

/// What every session launches
#[derive(Debug, Clone, Default)]
pub struct SessionSpec {
    launcher: PtyLauncher,
    command: ShellCommand,
}

impl SessionSpec {
    pub fn new(launcher: PtyLauncher, command: ShellCommand) -> Self {
        Self { launcher, command }
    }

    pub fn launcher(&self) -> &PtyLauncher {
        &self.launcher
    }

    pub fn command(&self) -> &ShellCommand {
        &self.command
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Not a `session` channel; nothing was allocated
    Rejected { channel_type: String },

    /// The transport failed to accept the channel
    AcceptFailed,

    /// PTY allocation or process start failed; the channel was closed
    LaunchFailed,

    /// Close sequence ran. `exit_code` is `None` if the shell was killed by
    /// a signal or could not be reaped.
    Closed { exit_code: Option<i32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// PTY to channel
    Output,
    /// Channel to PTY
    Input,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Output => write!(f, "output"),
            Direction::Input => write!(f, "input"),
        }
    }
}

/// Drive one offered channel to completion
pub async fn run_session<C: IncomingChannel>(incoming: C, spec: &SessionSpec) -> SessionOutcome {
    let channel_type = incoming.channel_type().to_string();
    if channel_type != SESSION_CHANNEL_TYPE {
        let message = format!("unknown channel type: {channel_type}");
        info!("Rejecting channel: {}", message);
        if let Err(e) = incoming
            .reject(RejectReason::UnknownChannelType, &message)
            .await
        {
            warn!("Failed to reject channel: {}", e);
        }
        return SessionOutcome::Rejected { channel_type };
    }

    let AcceptedChannel {
        stream,
        requests,
        closer,
    } = match incoming.accept().await {
        Ok(channel) => channel,
        Err(e) => {
            warn!("Could not accept channel ({})", e);
            return SessionOutcome::AcceptFailed;
        }
    };

    debug!("Creating pty...");
    let process = match spec.launcher.launch(&spec.command) {
        Ok(process) => process,
        Err(e) => {
            error!("Could not start pty ({})", e);
            close_channel(closer.as_ref()).await;
            return SessionOutcome::LaunchFailed;
        }
    };
    let (controller, child) = process.into_parts();
    let controller = Arc::new(controller);
    info!(
        "Session started on pty {} (pid {:?})",
        controller.number(),
        child.id()
    );

    tokio::spawn(handle_requests(requests, Arc::downgrade(&controller)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (reader, writer) = tokio::io::split(stream);
    let mut output = tokio::spawn(pump_output(
        Arc::clone(&controller),
        writer,
        shutdown_rx.clone(),
    ));
    let mut input = tokio::spawn(pump_input(reader, controller, shutdown_rx));

    // select! resolves exactly one branch, so the close sequence below runs
    // once even when both directions finish together.
    let first = tokio::select! {
        res = &mut output => {
            log_copy_result(Direction::Output, res);
            Direction::Output
        }
        res = &mut input => {
            log_copy_result(Direction::Input, res);
            Direction::Input
        }
    };
    let remaining = match first {
        Direction::Output => input,
        Direction::Input => output,
    };
    debug!("{} finished first, closing session", first);

    close_channel(closer.as_ref()).await;

    // Stopping the other direction drops the last strong controller
    // reference, which hangs up the child's terminal.
    // Only fails when the remaining task has already exited.
    if shutdown_tx.send(true).is_err() {
        debug!("Both copy directions already stopped");
    }
    if let Err(e) = remaining.await {
        warn!("Copy task failed: {}", e);
    }

    let exit_code = reap(child).await;
    info!("Session closed");
    SessionOutcome::Closed { exit_code }
}

async fn close_channel(closer: &dyn ChannelCloser) {
    if let Err(e) = closer.close().await {
        debug!("Failed to close channel: {}", e);
    }
}

async fn reap(mut child: Child) -> Option<i32> {
    match child.wait().await {
        Ok(status) => {
            debug!("Shell exited: {}", status);
            status.code()
        }
        Err(e) => {
            warn!("Failed to exit command ({})", e);
            None
        }
    }
}

fn log_copy_result(direction: Direction, result: Result<io::Result<u64>, JoinError>) {
    match result {
        Ok(Ok(bytes)) => debug!("{} copy done after {} bytes", direction, bytes),
        Ok(Err(e)) => debug!("{} copy ended with error: {}", direction, e),
        Err(e) => warn!("{} copy task failed: {}", direction, e),
    }
}

/// Process output to the remote peer
async fn pump_output<W>(
    controller: Arc<PtyController>,
    mut writer: W,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let copy = async {
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = controller.read(&mut buffer).await?;
            if n == 0 {
                debug!("PTY closed");
                break;
            }
            writer.write_all(&buffer[..n]).await?;
            writer.flush().await?;
            total += n as u64;
        }
        Ok::<u64, io::Error>(total)
    };

    tokio::select! {
        res = copy => res,
        _ = shutdown.changed() => Ok(0),
    }
}

/// Remote peer input to the process
async fn pump_input<R>(
    mut reader: R,
    controller: Arc<PtyController>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let copy = async {
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                debug!("Channel input closed");
                break;
            }
            controller.write_all(&buffer[..n]).await?;
            total += n as u64;
        }
        Ok::<u64, io::Error>(total)
    };

    tokio::select! {
        res = copy => res,
        _ = shutdown.changed() => Ok(0),
    }
}

/// What the remote side has negotiated so far
#[derive(Debug, Default)]
struct TerminalState {
    pty_requested: bool,
    term: Option<String>,
    size: Option<WindowSize>,
}

/// Apply control requests in arrival order until the channel stops sending
/// them. Only holds a weak controller reference so it never keeps the
/// terminal open after the close sequence.
async fn handle_requests(
    mut requests: mpsc::Receiver<ControlRequest>,
    controller: Weak<PtyController>,
) {
    let mut state = TerminalState::default();

    while let Some(mut request) = requests.recv().await {
        debug!("Req: {}", request.kind());
        match RequestKind::parse(request.kind()) {
            RequestKind::Shell => request.reply(true),
            RequestKind::PtyReq => {
                state.pty_requested = true;
                match parse_pty_request(request.payload()) {
                    Ok(pty) => {
                        apply_size(&controller, pty.size);
                        state.size = Some(pty.size);
                        state.term = Some(pty.term);
                    }
                    Err(e) => debug!("Ignoring pty-req parameters: {}", e),
                }
                request.reply(true);
            }
            RequestKind::WindowChange => match parse_window_change(request.payload()) {
                Ok(size) => {
                    apply_size(&controller, size);
                    state.size = Some(size);
                    request.reply(true);
                }
                Err(e) => {
                    warn!("Bad window-change request: {}", e);
                    request.reply(false);
                }
            },
            // The shell is already running with its fixed environment.
            RequestKind::Env => {}
            RequestKind::Other => {
                info!("cannot handle request: {}", request.kind());
                request.reply(false);
            }
        }
    }

    debug!(
        "Control requests done (pty requested: {}, term: {:?}, size: {:?})",
        state.pty_requested, state.term, state.size
    );
}

/// Best effort: failures are logged and never reported to the peer
fn apply_size(controller: &Weak<PtyController>, size: WindowSize) {
    let Some(controller) = controller.upgrade() else {
        return;
    };
    if let Err(e) = controller.resize(size) {
        debug!("Failed to resize pty {}: {}", controller.number(), e);
    }
}
