//! Low-level PTY allocation and management
//!
//! Opens the terminal multiplexer device, unlocks the peer slot and resolves
//! the peer through `TIOCGPTPEER` instead of going through `/dev/pts`.

use crate::PtyError;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::Winsize;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use tokio::io::unix::AsyncFd;
use tracing::debug;

/// Default terminal multiplexer device
pub const DEFAULT_PTMX: &str = "/dev/ptmx";

mod ioctl {
    #[cfg(any(
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "powerpc",
        target_arch = "powerpc64",
        target_arch = "sparc64"
    ))]
    const TIOCGPTPEER: u32 = 0x2000_5441;
    #[cfg(not(any(
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "powerpc",
        target_arch = "powerpc64",
        target_arch = "sparc64"
    )))]
    const TIOCGPTPEER: u32 = 0x5441;

    nix::ioctl_write_ptr_bad!(tiocsptlck, libc::TIOCSPTLCK, libc::c_int);
    nix::ioctl_read_bad!(tiocgptn, libc::TIOCGPTN, libc::c_uint);
    nix::ioctl_write_int_bad!(tiocgptpeer, TIOCGPTPEER);
}

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl WindowSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn to_winsize(self) -> Winsize {
        Winsize {
            ws_row: saturate(self.height),
            ws_col: saturate(self.width),
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }
}

fn saturate(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// Opens controller/peer pairs from a multiplexer device
#[derive(Debug, Clone)]
pub struct PtyAllocator {
    device: PathBuf,
}

/// A freshly allocated pseudo-terminal pair
#[derive(Debug)]
pub struct PtyPair {
    /// Controller side, kept by the server
    pub controller: File,

    /// Peer side, handed to the child process
    pub peer: File,

    /// Index of the peer under `/dev/pts`
    pub number: u32,
}

impl PtyAllocator {
    pub fn new() -> Self {
        Self::with_device(DEFAULT_PTMX)
    }

    /// Use a different multiplexer device node
    pub fn with_device(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
        }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Allocate a new PTY pair.
    ///
    /// The controller is closed again (by drop) if unlocking or peer
    /// resolution fails, so a partial allocation never leaks a descriptor.
    pub fn allocate(&self) -> Result<PtyPair, PtyError> {
        let controller = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&self.device)
            .map_err(|e| {
                PtyError::AllocationFailed(format!("open {}: {}", self.device.display(), e))
            })?;
        let fd = controller.as_raw_fd();

        let unlock: libc::c_int = 0;
        unsafe { ioctl::tiocsptlck(fd, &unlock) }
            .map_err(|e| PtyError::AllocationFailed(format!("unlockpt failed: {}", e)))?;

        let mut number: libc::c_uint = 0;
        unsafe { ioctl::tiocgptn(fd, &mut number) }
            .map_err(|e| PtyError::AllocationFailed(format!("ptsname failed: {}", e)))?;

        let peer_fd = unsafe {
            ioctl::tiocgptpeer(fd, libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC)
        }
        .map_err(|e| {
            PtyError::IoError(io::Error::new(
                io::Error::from(e).kind(),
                format!("could not create a file from the peer descriptor: {}", e),
            ))
        })?;
        let peer = unsafe { File::from_raw_fd(peer_fd) };

        debug!("Allocated pty {} from {}", number, self.device.display());
        Ok(PtyPair {
            controller,
            peer,
            number,
        })
    }
}

impl Default for PtyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Async controller side of a PTY.
///
/// Read, write and resize all take `&self`, so one controller can be shared
/// by both copy directions and the request handler.
pub struct PtyController {
    inner: AsyncFd<File>,
    number: u32,
}

impl PtyController {
    /// Wrap a controller descriptor.
    ///
    /// Fails with an error, rather than panicking, when no tokio runtime is
    /// running on the current thread.
    pub fn new(controller: File, number: u32) -> io::Result<Self> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        fcntl(controller.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
        Ok(Self {
            inner: AsyncFd::new(controller)?,
            number,
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Read output produced on the peer side.
    ///
    /// Returns `Ok(0)` once every peer reference is closed; Linux reports
    /// that as `EIO` on the controller.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => return Ok(0),
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Resize the PTY
    pub fn resize(&self, size: WindowSize) -> Result<(), PtyError> {
        let winsize = size.to_winsize();

        unsafe {
            let ret = libc::ioctl(self.as_raw_fd(), libc::TIOCSWINSZ, &winsize as *const _);
            if ret < 0 {
                return Err(PtyError::IoError(io::Error::last_os_error()));
            }
        }

        Ok(())
    }

    /// Current size as seen by the peer
    pub fn window_size(&self) -> Result<WindowSize, PtyError> {
        let mut winsize = Winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        unsafe {
            let ret = libc::ioctl(self.as_raw_fd(), libc::TIOCGWINSZ, &mut winsize as *mut _);
            if ret < 0 {
                return Err(PtyError::IoError(io::Error::last_os_error()));
            }
        }

        Ok(WindowSize::new(
            u32::from(winsize.ws_col),
            u32::from(winsize.ws_row),
        ))
    }
}

impl AsRawFd for PtyController {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
