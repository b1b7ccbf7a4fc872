//! OCI `linux.resources` subset consumed by the planner.
//!
//! Only the fields that influence RTOS placement are modelled; anything else
//! in the OCI runtime config is ignored during deserialization.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// OCI resource limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<OciMemory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<OciCpu>,
}

/// OCI memory limits, in bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciMemory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<i64>,
}

/// OCI CPU limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciCpu {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    /// CPU mask in range-list form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mems: Option<String>,
}

impl OciResources {
    /// Parses a `linux.resources` JSON object.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
