//! PTY (Pseudo-Terminal) handling for Tether
//!
//! Allocates controller/peer terminal pairs through the Linux multiplexer
//! device and launches processes that use the peer as their controlling
//! terminal.

pub mod process;
pub mod pty;

pub use process::{PtyLauncher, PtyProcess, ShellCommand};
pub use pty::{PtyAllocator, PtyController, PtyPair, WindowSize, DEFAULT_PTMX};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to allocate PTY: {0}")]
    AllocationFailed(String),

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("PTY I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
