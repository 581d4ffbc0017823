//! Launching processes on the peer side of a PTY

use crate::pty::{PtyAllocator, PtyController, PtyPair};
use crate::PtyError;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// A fixed command together with its complete environment.
///
/// Nothing is inherited from the server's environment; only the variables
/// added through [`ShellCommand::env`] reach the child.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    program: PathBuf,
    args: Vec<String>,
    env_vars: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env_vars
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .envs(self.env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl Default for ShellCommand {
    fn default() -> Self {
        Self::new("/bin/sh")
    }
}

/// Starts commands with a freshly allocated PTY as controlling terminal
#[derive(Debug, Clone, Default)]
pub struct PtyLauncher {
    allocator: PtyAllocator,
}

impl PtyLauncher {
    pub fn new(allocator: PtyAllocator) -> Self {
        Self { allocator }
    }

    pub fn allocator(&self) -> &PtyAllocator {
        &self.allocator
    }

    /// Spawn `command` as a session leader on a new PTY.
    ///
    /// Must run inside a tokio runtime; without one this returns an error
    /// before any process is started.
    ///
    /// The peer becomes stdin, stdout, stderr and the controlling terminal in
    /// the same fork that execs the command. The launcher's own peer copies
    /// are closed before returning, on success and on failure.
    pub fn launch(&self, command: &ShellCommand) -> Result<PtyProcess, PtyError> {
        let PtyPair {
            controller,
            peer,
            number,
        } = self.allocator.allocate()?;
        let controller = PtyController::new(controller, number)?;

        let mut cmd = command.to_command();
        cmd.stdin(Stdio::from(peer.try_clone()?))
            .stdout(Stdio::from(peer.try_clone()?))
            .stderr(Stdio::from(peer))
            .kill_on_drop(true);

        // Only async-signal-safe calls between fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(io::Error::from)?;
                if libc::ioctl(0, libc::TIOCSCTTY, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let spawned = cmd.spawn();
        drop(cmd);
        let child = spawned.map_err(|e| {
            PtyError::SpawnFailed(format!("{}: {}", command.program().display(), e))
        })?;

        debug!(
            "Spawned {} (pid {:?}) on pty {}",
            command.program().display(),
            child.id(),
            number
        );

        Ok(PtyProcess { controller, child })
    }
}

/// A process running in a PTY
pub struct PtyProcess {
    controller: PtyController,
    child: Child,
}

impl PtyProcess {
    /// Get the process ID, `None` once it has been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Get the controller side of the PTY
    pub fn controller(&self) -> &PtyController {
        &self.controller
    }

    pub fn into_parts(self) -> (PtyController, Child) {
        (self.controller, self.child)
    }

    /// Wait for the process to exit and reap it
    pub async fn wait(&mut self) -> Result<Option<i32>, PtyError> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }
}
