//! Unix-socket session discipline.
//!
//! Every request opens a fresh connection, writes the whole payload, then
//! accumulates the reply until one of the two sentinels shows up:
//!
//! ```text
//!   connect ──► write payload ──► read 512B ──┬─ "...MICA-FAILED"  ──► OperationRejected
//!                                   ▲         ├─ "...MICA-SUCCESS" ──► Ok(diagnostics)
//!                                   └─────────┴─ neither           ──► keep reading
//!   EOF before a sentinel ──► Protocol        deadline expired ──► Timeout
//! ```
//!
//! The connection is owned by the request future and closed when it returns,
//! on every path.

use crate::constants::{
    CREATE_SOCKET_NAME, DEFAULT_SOCKET_TIMEOUT, DEFAULT_STATE_DIR, FAILURE_SENTINEL,
    MAX_REPLY_SIZE, READ_CHUNK_SIZE, SUCCESS_SENTINEL, WORKLOAD_SOCKET_SUFFIX,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Which daemon socket a request goes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// The well-known creation socket.
    Create,
    /// The socket of one workload.
    Workload(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create socket"),
            Self::Workload(id) => write!(f, "socket of {}", id),
        }
    }
}

/// Socket locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketPaths {
    pub state_dir: PathBuf,
    pub create_socket: PathBuf,
}

impl Default for SocketPaths {
    fn default() -> Self {
        Self::under(DEFAULT_STATE_DIR)
    }
}

impl SocketPaths {
    /// Paths rooted at `state_dir`.
    #[must_use]
    pub fn under(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            create_socket: state_dir.join(CREATE_SOCKET_NAME),
            state_dir,
        }
    }

    #[must_use]
    pub fn workload_socket(&self, id: &str) -> PathBuf {
        self.state_dir
            .join(format!("{}{}", id, WORKLOAD_SOCKET_SUFFIX))
    }

    #[must_use]
    pub fn resolve(&self, endpoint: &Endpoint) -> PathBuf {
        match endpoint {
            Endpoint::Create => self.create_socket.clone(),
            Endpoint::Workload(id) => self.workload_socket(id),
        }
    }
}

/// Returns true if `path` exists and is a Unix socket.
pub fn is_socket(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.file_type().is_socket())
        .unwrap_or(false)
}

/// Request/response exchange with the daemon.
#[async_trait]
pub trait DaemonTransport: Send + Sync {
    /// Sends `payload` to `endpoint` and waits for a sentinel.
    ///
    /// Returns the diagnostic text preceding the success sentinel. `label`
    /// names the request in errors and logs.
    async fn transact(&self, endpoint: &Endpoint, payload: &[u8], label: &str) -> Result<String>;

    /// Returns true if the endpoint's socket is present.
    fn endpoint_available(&self, endpoint: &Endpoint) -> bool;
}

/// Outcome of scanning an accumulated reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyScan {
    Success(String),
    Failure(String),
    Incomplete,
}

/// Scans a reply buffer for sentinels. The failure sentinel wins when both
/// are present.
#[must_use]
pub fn scan_reply(buf: &[u8]) -> ReplyScan {
    let text = String::from_utf8_lossy(buf);
    if let Some(pos) = text.find(FAILURE_SENTINEL) {
        return ReplyScan::Failure(text[..pos].trim().to_string());
    }
    if let Some(pos) = text.find(SUCCESS_SENTINEL) {
        return ReplyScan::Success(text[..pos].trim().to_string());
    }
    ReplyScan::Incomplete
}

/// Transport over real Unix-domain sockets.
#[derive(Debug, Clone)]
pub struct UnixTransport {
    paths: SocketPaths,
    timeout: Duration,
}

impl Default for UnixTransport {
    fn default() -> Self {
        Self::new(SocketPaths::default())
    }
}

impl UnixTransport {
    #[must_use]
    pub fn new(paths: SocketPaths) -> Self {
        Self {
            paths,
            timeout: DEFAULT_SOCKET_TIMEOUT,
        }
    }

    /// Sets the read deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn paths(&self) -> &SocketPaths {
        &self.paths
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect(&self, path: &Path) -> Result<UnixStream> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.file_type().is_socket() => {}
            Ok(_) => {
                return Err(Error::DaemonDown {
                    path: path.to_path_buf(),
                    reason: "not a socket".to_string(),
                });
            }
            Err(e) => {
                return Err(Error::DaemonDown {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }

        timeout(self.timeout, UnixStream::connect(path))
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("connect {}", path.display()),
                duration: self.timeout,
            })?
            .map_err(|e| Error::ConnectFailed {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

async fn read_reply(stream: &mut UnixStream, label: &str) -> Result<String> {
    let mut reply = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::Protocol {
                command: label.to_string(),
                reply: String::from_utf8_lossy(&reply).into_owned(),
            });
        }
        reply.extend_from_slice(&chunk[..n]);

        match scan_reply(&reply) {
            ReplyScan::Failure(message) => {
                if !message.is_empty() {
                    warn!("daemon: {}", message);
                }
                return Err(Error::OperationRejected {
                    command: label.to_string(),
                    message,
                });
            }
            ReplyScan::Success(message) => {
                if !message.is_empty() {
                    info!("daemon: {}", message);
                }
                return Ok(message);
            }
            ReplyScan::Incomplete if reply.len() > MAX_REPLY_SIZE => {
                return Err(Error::Protocol {
                    command: label.to_string(),
                    reply: format!("reply exceeded {} bytes without a sentinel", MAX_REPLY_SIZE),
                });
            }
            ReplyScan::Incomplete => {}
        }
    }
}

#[async_trait]
impl DaemonTransport for UnixTransport {
    async fn transact(&self, endpoint: &Endpoint, payload: &[u8], label: &str) -> Result<String> {
        let path = self.paths.resolve(endpoint);
        debug!("sending '{}' ({} bytes) to {}", label, payload.len(), path.display());

        let mut stream = self.connect(&path).await?;
        stream.write_all(payload).await?;
        stream.flush().await?;

        timeout(self.timeout, read_reply(&mut stream, label))
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("waiting for daemon reply to '{}'", label),
                duration: self.timeout,
            })?
    }

    fn endpoint_available(&self, endpoint: &Endpoint) -> bool {
        is_socket(&self.paths.resolve(endpoint))
    }
}
