//! Status reply parsing.
//!
//! The daemon answers `status` with one line per workload:
//!
//! ```text
//! zephyr            0-3         Running     pty rpc umt
//! uniproton         5           Stopped
//! ```
//!
//! Fields are whitespace separated: `name cpu state [service...]`. A blank
//! CPU column means "every host CPU".

use crate::constants::FAILURE_SENTINEL;
use crate::cpuset::CpuSet;
use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Workload state as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DaemonClientState {
    Offline,
    Configured,
    Ready,
    Running,
    Suspended,
    Stopped,
    Error,
}

impl DaemonClientState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "Offline",
            Self::Configured => "Configured",
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::Suspended => "Suspended",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        }
    }
}

impl FromStr for DaemonClientState {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "Offline" => Ok(Self::Offline),
            "Configured" => Ok(Self::Configured),
            "Ready" => Ok(Self::Ready),
            "Running" => Ok(Self::Running),
            "Suspended" => Ok(Self::Suspended),
            "Stopped" => Ok(Self::Stopped),
            "Error" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DaemonClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Auxiliary service exposed by a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTag {
    Pty,
    Rpc,
    Umt,
    Debug,
}

impl ServiceTag {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pty => "pty",
            Self::Rpc => "rpc",
            Self::Umt => "umt",
            Self::Debug => "debug",
        }
    }

    /// Matches a raw service token (case-insensitive substring).
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.to_ascii_lowercase();
        if token.contains("pty") {
            Some(Self::Pty)
        } else if token.contains("rpc") {
            Some(Self::Rpc)
        } else if token.contains("umt") {
            Some(Self::Umt)
        } else if token.contains("debug") {
            Some(Self::Debug)
        } else {
            None
        }
    }
}

/// Parsed status of one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadStatus {
    pub name: String,
    /// CPU range in range-list form.
    pub cpu: String,
    pub state: DaemonClientState,
    pub services: Vec<ServiceTag>,
    /// Line the status was parsed from.
    pub raw: String,
}

impl WorkloadStatus {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == DaemonClientState::Running
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state == DaemonClientState::Stopped
    }

    #[must_use]
    pub fn has_service(&self, service: ServiceTag) -> bool {
        self.services.contains(&service)
    }

    /// Name present and CPU field well formed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && CpuSet::parse(&self.cpu).is_ok()
    }
}

/// Parses one status line.
///
/// `host_cpus` supplies the fallback range for a blank CPU column.
pub fn parse_status(text: &str, host_cpus: u32) -> Result<WorkloadStatus> {
    let line = text.trim();
    if line.is_empty() {
        return Err(Error::EmptyResponse);
    }
    if line.contains(FAILURE_SENTINEL) {
        return Err(Error::ErrorResponse(line.to_string()));
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(invalid(line, "invalid status format"));
    }

    // A blank CPU column collapses under whitespace splitting, leaving the
    // state keyword in second position.
    let (cpu, state_field, rest) = if fields[1].parse::<DaemonClientState>().is_ok()
        && fields[2].parse::<DaemonClientState>().is_err()
    {
        ("", fields[1], &fields[2..])
    } else {
        (fields[1], fields[2], &fields[3..])
    };

    let cpu = if cpu.is_empty() {
        if host_cpus == 0 {
            return Err(invalid(line, "no host CPU count for blank CPU field"));
        }
        format!("0-{}", host_cpus - 1)
    } else {
        CpuSet::parse(cpu).map_err(|_| invalid(line, &format!("invalid CPU field format: {}", cpu)))?;
        cpu.to_string()
    };

    let state = state_field
        .parse::<DaemonClientState>()
        .map_err(|()| invalid(line, &format!("unknown state: {}", state_field)))?;

    let services = rest
        .iter()
        .filter_map(|token| ServiceTag::from_token(token))
        .collect();

    Ok(WorkloadStatus {
        name: fields[0].to_string(),
        cpu,
        state,
        services,
        raw: line.to_string(),
    })
}

/// Parses every recognisable line of a status listing.
///
/// Lines that do not parse (headers, banners) are skipped.
pub fn parse_status_listing(text: &str, host_cpus: u32) -> Result<Vec<WorkloadStatus>> {
    if text.trim().is_empty() {
        return Err(Error::EmptyResponse);
    }
    if text.contains(FAILURE_SENTINEL) {
        return Err(Error::ErrorResponse(text.trim().to_string()));
    }
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match parse_status(l, host_cpus) {
            Ok(status) => Some(status),
            Err(e) => {
                debug!("skipping status line {:?}: {}", l, e);
                None
            }
        })
        .collect())
}

/// Finds and parses the line for workload `id` in a status listing.
pub fn find_status(text: &str, id: &str, host_cpus: u32) -> Result<WorkloadStatus> {
    if text.trim().is_empty() {
        return Err(Error::EmptyResponse);
    }
    if text.contains(FAILURE_SENTINEL) {
        return Err(Error::ErrorResponse(text.trim().to_string()));
    }
    let line = text
        .lines()
        .find(|l| l.split_whitespace().next() == Some(id))
        .ok_or_else(|| Error::WorkloadNotFound(id.to_string()))?;
    parse_status(line, host_cpus)
}

/// Filters statuses by name substring, state and service. `None` and empty
/// filters match everything.
#[must_use]
pub fn filter_statuses<'a>(
    statuses: &'a [WorkloadStatus],
    name: &str,
    state: Option<DaemonClientState>,
    service: Option<ServiceTag>,
) -> Vec<&'a WorkloadStatus> {
    statuses
        .iter()
        .filter(|s| name.is_empty() || s.name.contains(name))
        .filter(|s| state.is_none_or(|st| s.state == st))
        .filter(|s| service.is_none_or(|svc| s.has_service(svc)))
        .collect()
}

fn invalid(text: &str, reason: &str) -> Error {
    Error::InvalidStatus {
        text: text.to_string(),
        reason: reason.to_string(),
    }
}
