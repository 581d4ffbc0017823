//! Server configuration

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tether_pty::{PtyAllocator, PtyLauncher, ShellCommand, DEFAULT_PTMX};

use crate::session::SessionSpec;

pub const DEFAULT_SHELL: &str = "/bin/sh";
pub const DEFAULT_PATH: &str = "/bin:/usr/bin";
pub const DEFAULT_PROMPT: &str = r"(ssh) \u@\h \w# ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Tether - minimal remote shell server")]
pub struct ServerConfig {
    /// Allowed public key in authorized_keys format (repeatable)
    #[arg(short = 'k', long = "authorized-key", value_name = "ENTRY")]
    pub authorized_keys: Vec<String>,

    /// authorized_keys file to load in addition to --authorized-key
    #[arg(long, value_name = "PATH")]
    pub authorized_keys_file: Option<PathBuf>,

    /// OpenSSH private host key (a fresh Ed25519 key is generated if omitted)
    #[arg(long, value_name = "PATH")]
    pub host_key: Option<PathBuf>,

    /// Shell started for every session
    #[arg(long, default_value = DEFAULT_SHELL)]
    pub shell: PathBuf,

    /// Extra argument passed to the shell (repeatable)
    #[arg(long = "shell-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub shell_args: Vec<String>,

    /// PATH given to the shell
    #[arg(long, default_value = DEFAULT_PATH)]
    pub path: String,

    /// PS1 given to the shell
    #[arg(long, default_value = DEFAULT_PROMPT)]
    pub prompt: String,

    /// Working directory of the shell
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Terminal multiplexer device
    #[arg(long, default_value = DEFAULT_PTMX)]
    pub ptmx: PathBuf,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Path to log file (stderr if not specified)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl ServerConfig {
    /// The fixed command with its explicit environment
    pub fn shell_command(&self) -> ShellCommand {
        let mut command = ShellCommand::new(&self.shell)
            .args(self.shell_args.iter().cloned())
            .env("PATH", &self.path)
            .env("PS1", &self.prompt);
        if let Some(dir) = &self.workdir {
            command = command.current_dir(dir);
        }
        command
    }

    pub fn session_spec(&self) -> SessionSpec {
        let launcher = PtyLauncher::new(PtyAllocator::with_device(&self.ptmx));
        SessionSpec::new(launcher, self.shell_command())
    }
}
