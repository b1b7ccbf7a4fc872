//! Daemon wire protocol.
//!
//! - [`message`]: fixed-layout binary create message
//! - [`command`]: text commands and update directives
//! - [`status`]: status reply parsing
//! - [`transport`]: Unix-socket sessions and sentinel handling
//! - [`client`]: workload operations on top of a transport

pub mod client;
pub mod command;
pub mod message;
pub mod status;
pub mod transport;

pub use client::DaemonClient;
pub use command::{ControlCommand, UpdateDirective};
pub use message::{CreateMessage, CreateOptions};
pub use status::{
    DaemonClientState, ServiceTag, WorkloadStatus, filter_statuses, parse_status,
    parse_status_listing,
};
pub use transport::{DaemonTransport, Endpoint, SocketPaths, UnixTransport};
