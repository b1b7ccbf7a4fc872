//! Shared fixtures for integration tests.
//!
//! - [`FakeTransport`]: records every request and replays scripted replies
//! - [`ScriptedRunner`]: records command lines and answers from a table
//! - [`MockDaemon`]: a real Unix-socket listener answering with a handler

#![allow(dead_code)]

use async_trait::async_trait;
use rtosrun::error::{Error, Result};
use rtosrun::host::{CommandOutput, CommandRunner, HostCpuCounts, HostInventory, PedestalKind, Xl};
use rtosrun::protocol::{DaemonTransport, Endpoint};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;

// =============================================================================
// Fake Transport
// =============================================================================

/// Scripted daemon reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Success(String),
    Rejected(String),
    Down,
}

/// Transport that records requests instead of touching sockets.
#[derive(Default)]
pub struct FakeTransport {
    requests: Mutex<Vec<(Endpoint, Vec<u8>)>>,
    replies: Mutex<VecDeque<Reply>>,
    missing: Mutex<HashSet<String>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a reply. Requests beyond the queue succeed with no text.
    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Marks a workload socket as absent.
    pub fn remove_socket(&self, id: &str) {
        self.missing.lock().unwrap().insert(id.to_string());
    }

    /// Text of every request sent, in order. Binary payloads show as
    /// `<create NAME>`.
    pub fn sent(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(endpoint, payload)| match endpoint {
                Endpoint::Create if payload.len() > 64 => {
                    let name: Vec<u8> = payload[..66].iter().copied().take_while(|b| *b != 0).collect();
                    format!("<create {}>", String::from_utf8_lossy(&name))
                }
                _ => String::from_utf8_lossy(payload).into_owned(),
            })
            .collect()
    }

    pub fn requests(&self) -> Vec<(Endpoint, Vec<u8>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DaemonTransport for FakeTransport {
    async fn transact(&self, endpoint: &Endpoint, payload: &[u8], label: &str) -> Result<String> {
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.clone(), payload.to_vec()));
        let reply = self.replies.lock().unwrap().pop_front();
        match reply.unwrap_or(Reply::Success(String::new())) {
            Reply::Success(text) => Ok(text),
            Reply::Rejected(message) => Err(Error::OperationRejected {
                command: label.to_string(),
                message,
            }),
            Reply::Down => Err(Error::DaemonDown {
                path: PathBuf::from("/nonexistent"),
                reason: "scripted".to_string(),
            }),
        }
    }

    fn endpoint_available(&self, endpoint: &Endpoint) -> bool {
        match endpoint {
            Endpoint::Create => true,
            Endpoint::Workload(id) => !self.missing.lock().unwrap().contains(id),
        }
    }
}

// =============================================================================
// Scripted Command Runner
// =============================================================================

/// Command runner answering from a table keyed by the full command line.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<String>>,
    outputs: Mutex<HashMap<String, CommandOutput>>,
    installed: Mutex<HashSet<String>>,
    fail_all: Mutex<bool>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Scripts the output of `line` (program and args joined by spaces).
    pub fn on(&self, line: &str, output: CommandOutput) {
        self.outputs.lock().unwrap().insert(line.to_string(), output);
    }

    pub fn install(&self, program: &str) {
        self.installed.lock().unwrap().insert(program.to_string());
    }

    /// Makes every unscripted command exit with status 1.
    pub fn fail_unscripted(&self) {
        *self.fail_all.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _limit: Option<Duration>,
    ) -> Result<CommandOutput> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line.clone());
        if let Some(output) = self.outputs.lock().unwrap().get(&line) {
            return Ok(output.clone());
        }
        if *self.fail_all.lock().unwrap() {
            return Ok(CommandOutput::failed(1, format!("{}: scripted failure", program)));
        }
        Ok(CommandOutput::ok(""))
    }

    fn is_installed(&self, program: &str) -> bool {
        self.installed.lock().unwrap().contains(program)
    }
}

// =============================================================================
// Host Fixtures
// =============================================================================

/// Host with `physical` CPUs, all visible to Linux.
pub fn host(pedestal: PedestalKind, physical: u32, runner: Arc<ScriptedRunner>) -> Arc<HostInventory> {
    Arc::new(HostInventory::with_facts(
        pedestal,
        HostCpuCounts {
            physical,
            linux_visible: physical,
        },
        Xl::new(runner),
    ))
}

// =============================================================================
// Mock Daemon
// =============================================================================

/// Handler deciding the reply to one request. `None` never answers.
pub type Handler = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Listener on a real Unix socket that answers each connection once.
pub struct MockDaemon {
    pub path: PathBuf,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    task: tokio::task::JoinHandle<()>,
}

impl MockDaemon {
    /// Binds `path` and serves until dropped.
    pub fn serve(path: &Path, handler: Handler) -> Self {
        let listener = UnixListener::bind(path).unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&received);
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let handler = Arc::clone(&handler);
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let Ok(n) = stream.read(&mut buf).await else {
                        return;
                    };
                    buf.truncate(n);
                    seen.lock().unwrap().push(buf.clone());
                    match handler(&buf) {
                        Some(reply) => {
                            let _ = stream.write_all(&reply).await;
                            let _ = stream.shutdown().await;
                        }
                        None => {
                            tokio::time::sleep(Duration::from_secs(3600)).await;
                        }
                    }
                });
            }
        });
        Self {
            path: path.to_path_buf(),
            received,
            task,
        }
    }

    /// Daemon that answers every request with `reply`.
    pub fn replying(path: &Path, reply: &'static str) -> Self {
        Self::serve(path, Arc::new(move |_| Some(reply.as_bytes().to_vec())))
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}
