//! Text commands sent to the daemon.
//!
//! The daemon has no suspend verb; pause and resume are resolved per pedestal
//! by [`crate::protocol::DaemonClient`].

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Short text commands understood by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Remove,
    Status,
    Update(UpdateDirective),
}

impl ControlCommand {
    /// Wire verb of the command.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Remove => "rm",
            Self::Status => "status",
            Self::Update(_) => "set",
        }
    }

    /// Full wire text.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update(directive) => write!(f, "{} {}", self.verb(), directive),
            _ => write!(f, "{}", self.verb()),
        }
    }
}

/// One resource change carried by an update command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDirective {
    /// vCPU count.
    Vcpus(u32),
    /// Physical CPU affinity, range-list form.
    CpuSet(String),
    /// Capacity percentage.
    CpuCapacity(u32),
    /// Scheduler weight.
    CpuWeight(u32),
    /// Memory size in MiB.
    Memory(u32),
    /// Memory threshold (ceiling) in MiB.
    MaxMemory(u32),
}

impl UpdateDirective {
    /// Key token on the wire.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::Vcpus(_) => "VCPU",
            Self::CpuSet(_) => "CPU",
            Self::CpuCapacity(_) => "CPUCapacity",
            Self::CpuWeight(_) => "CPUWeight",
            Self::Memory(_) => "Memory",
            Self::MaxMemory(_) => "MaxMem",
        }
    }
}

impl fmt::Display for UpdateDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vcpus(v)
            | Self::CpuCapacity(v)
            | Self::CpuWeight(v)
            | Self::Memory(v)
            | Self::MaxMemory(v) => write!(f, "{} {}", self.key(), v),
            Self::CpuSet(cpus) => write!(f, "{} {}", self.key(), cpus),
        }
    }
}

impl FromStr for UpdateDirective {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let key = parts.next().unwrap_or_default();
        let value = parts.collect::<Vec<_>>().join(" ");
        let invalid = |reason: String| Error::Serialization(format!("update '{}': {}", s, reason));
        let number = || {
            value
                .parse::<u32>()
                .map_err(|e| invalid(format!("bad value '{}': {}", value, e)))
        };
        match key {
            "VCPU" => Ok(Self::Vcpus(number()?)),
            "CPU" => Ok(Self::CpuSet(value.clone())),
            "CPUCapacity" => Ok(Self::CpuCapacity(number()?)),
            "CPUWeight" => Ok(Self::CpuWeight(number()?)),
            "Memory" => Ok(Self::Memory(number()?)),
            "MaxMem" => Ok(Self::MaxMemory(number()?)),
            other => Err(invalid(format!("unknown key '{}'", other))),
        }
    }
}
