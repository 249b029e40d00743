//! Raw HID report reader
//!
//! Some remotes only expose their interesting buttons through a vendor
//! report on a hidraw node. This module opens that node, cuts the byte
//! stream into reports according to the device's framing, and hands each
//! report to the device runtime.
//!
//! The read loop runs on a dedicated OS thread blocking in `poll(2)` with a
//! short timeout so a stop request is noticed within one timeout period.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};

/// Upper bound a `poll(2)` call may block before re-checking the stop flag
pub const POLL_TIMEOUT_MS: i32 = 100;

/// Largest single read issued against a hidraw node
const READ_CHUNK: usize = 64;

/// How a device's byte stream is cut into reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Bytes accumulate until `terminator`; only reports of exactly `len`
    /// bytes (terminator included) are kept
    Sentinel { terminator: u8, len: usize },
    /// Every read is one report of exactly this many bytes
    Fixed(usize),
}

impl Framing {
    /// Size of a single `read(2)` for this framing
    fn read_size(self) -> usize {
        match self {
            Framing::Sentinel { .. } => READ_CHUNK,
            Framing::Fixed(len) => len,
        }
    }
}

/// Reassembles reports from raw reads
#[derive(Debug)]
pub struct Framer {
    framing: Framing,
    pending: Vec<u8>,
}

impl Framer {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            pending: Vec::new(),
        }
    }

    /// Feed one chunk of bytes and collect every complete report
    ///
    /// Malformed reports are dropped here; callers only see well-sized ones.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<Vec<u8>>) {
        match self.framing {
            Framing::Fixed(len) => {
                if chunk.len() == len {
                    out.push(chunk.to_vec());
                } else {
                    tracing::trace!(got = chunk.len(), want = len, "Dropping short hidraw read");
                }
            }
            Framing::Sentinel { terminator, len } => {
                for &byte in chunk {
                    self.pending.push(byte);
                    if byte == terminator {
                        if self.pending.len() == len {
                            out.push(std::mem::take(&mut self.pending));
                        } else {
                            tracing::trace!(
                                got = self.pending.len(),
                                want = len,
                                "Dropping malformed hidraw report"
                            );
                            self.pending.clear();
                        }
                    } else if self.pending.len() > len {
                        // Lost sync, wait for the next terminator
                        self.pending.clear();
                    }
                }
            }
        }
    }
}

/// Open a hidraw node for non-blocking reads
pub fn open_node(path: &Path) -> Result<File, HidrawError> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => {
                tracing::error!(
                    path = %path.display(),
                    "Permission denied opening hidraw node. Make sure udev rules are installed."
                );
                HidrawError::PermissionDenied(path.to_path_buf())
            }
            io::ErrorKind::NotFound => HidrawError::DeviceGone(path.to_path_buf()),
            _ => HidrawError::IoError(e),
        })
}

/// Wait until `file` is readable or the timeout elapses
///
/// Returns `Ok(false)` on timeout.
fn wait_readable(file: &File, timeout_ms: i32) -> io::Result<bool> {
    let mut fds = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: `fds` is a valid pollfd for the duration of the call and the
    // count matches the single element passed.
    let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if rc > 0 && fds.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        return Err(io::Error::from_raw_os_error(libc::ENODEV));
    }
    Ok(rc > 0)
}

/// Blocking read loop for one hidraw node
pub struct HidrawReader {
    path: PathBuf,
    framing: Framing,
}

impl HidrawReader {
    pub fn new(path: impl Into<PathBuf>, framing: Framing) -> Self {
        Self {
            path: path.into(),
            framing,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read reports until stopped, the node disappears, or the receiver is
    /// dropped
    ///
    /// Each complete report is sent through `reports`. Blocks the calling
    /// thread.
    pub fn run(
        &self,
        reports: mpsc::UnboundedSender<Vec<u8>>,
        stop: watch::Receiver<bool>,
    ) -> Result<(), HidrawError> {
        let mut file = open_node(&self.path)?;
        let mut framer = Framer::new(self.framing);
        let mut buf = vec![0u8; self.framing.read_size()];
        let mut frames = Vec::new();

        tracing::info!(path = %self.path.display(), "Listening for raw reports");

        while !*stop.borrow() {
            match wait_readable(&file, POLL_TIMEOUT_MS) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => return Err(self.classify(e)),
            }

            match file.read(&mut buf) {
                Ok(0) => {
                    // EOF: the kernel tore the node down
                    return Err(HidrawError::DeviceGone(self.path.clone()));
                }
                Ok(len) => {
                    framer.push(&buf[..len], &mut frames);
                    for frame in frames.drain(..) {
                        if reports.send(frame).is_err() {
                            return Ok(());
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.classify(e)),
            }
        }

        tracing::debug!(path = %self.path.display(), "Raw reader stopped");
        Ok(())
    }

    fn classify(&self, e: io::Error) -> HidrawError {
        if e.raw_os_error() == Some(libc::ENODEV) {
            HidrawError::DeviceGone(self.path.clone())
        } else {
            HidrawError::IoError(e)
        }
    }
}

/// Hidraw error type
#[derive(Debug)]
pub enum HidrawError {
    /// Node could not be opened for lack of permissions
    PermissionDenied(PathBuf),
    /// Node vanished while open or before it could be opened
    DeviceGone(PathBuf),
    /// I/O error
    IoError(std::io::Error),
}

impl std::fmt::Display for HidrawError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HidrawError::PermissionDenied(path) => write!(
                f,
                "Permission denied for {}. Ensure udev rules are installed.",
                path.display()
            ),
            HidrawError::DeviceGone(path) => write!(f, "Device {} is gone", path.display()),
            HidrawError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for HidrawError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HidrawError::IoError(e) => Some(e),
            _ => None,
        }
    }
}
