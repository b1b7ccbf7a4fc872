//! Hypervisor CLI wrapper.
//!
//! Wraps the `xl` toolstack and `xenstore-read`. Parsing is kept in free
//! functions so it can be tested against captured output without a host.
//!
//! # `xl info` format
//!
//! ```text
//! host                   : qemu-aarch64
//! nr_cpus                : 4
//! total_memory           : 2048
//! free_memory            : 1427
//! xen_scheduler          : credit2
//! ```
//!
//! # `xl vcpu-list` format
//!
//! ```text
//! Name                                ID  VCPU   CPU State   Time(s) Affinity (Hard / Soft)
//! Domain-0                             0     0    1   -b-     271.1  all / all
//! Domain-0                             0     2    -   --p       0.0  0-1 / all
//! ```

use super::command::{CommandRunner, args, run_checked};
use crate::constants::{
    CONTROL_DOMAIN_NAME, HYPERVISOR_CLI, MIN_SCHED_WEIGHT, VERIFY_COMMAND_TIMEOUT,
    XENSTORE_READ_CLI,
};
use crate::cpuset::CpuSet;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Parsed Output
// =============================================================================

/// Subset of `xl info` this crate consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XlInfo {
    pub host: String,
    pub machine: String,
    /// Physical CPUs the hypervisor manages.
    pub nr_cpus: u32,
    pub max_cpu_id: u32,
    pub cores_per_socket: u32,
    pub threads_per_core: u32,
    pub free_cpus: u32,
    pub total_memory_mib: u32,
    pub free_memory_mib: u32,
    /// `major.minor` plus extra, e.g. `4.18.2`.
    pub version: String,
    pub scheduler: String,
    /// Every key/value pair, including ones not mapped above.
    pub raw: HashMap<String, String>,
}

/// One row of `xl vcpu-list`.
#[derive(Debug, Clone, PartialEq)]
pub struct VcpuEntry {
    pub domain: String,
    pub domid: u32,
    pub vcpu: u32,
    /// Physical CPU the vCPU is running on, `None` when offline.
    pub cpu: Option<u32>,
    pub state: String,
    pub time_secs: f64,
    pub hard_affinity: String,
    pub soft_affinity: String,
}

/// Parses `xl info` output.
pub fn parse_xl_info(output: &str) -> Result<XlInfo> {
    let mut info = XlInfo::default();
    let mut extra = String::new();
    let mut minor = String::new();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            continue;
        }
        info.raw.insert(key.to_string(), value.to_string());

        match key {
            "host" => info.host = value.to_string(),
            "machine" => info.machine = value.to_string(),
            "nr_cpus" => info.nr_cpus = parse_field(key, value)?,
            "max_cpu_id" => info.max_cpu_id = parse_field(key, value)?,
            "cores_per_socket" => info.cores_per_socket = parse_field(key, value)?,
            "threads_per_core" => info.threads_per_core = parse_field(key, value)?,
            "free_cpus" => info.free_cpus = parse_field(key, value)?,
            "total_memory" => info.total_memory_mib = parse_field(key, value)?,
            "free_memory" => info.free_memory_mib = parse_field(key, value)?,
            "xen_scheduler" => info.scheduler = value.to_string(),
            "xen_major" => info.version = value.to_string(),
            "xen_minor" => minor = value.to_string(),
            "xen_extra" => extra = value.to_string(),
            _ => {}
        }
    }

    if !info.version.is_empty() && !minor.is_empty() {
        info.version = format!("{}.{}{}", info.version, minor, extra);
    }
    Ok(info)
}

fn parse_field(key: &str, value: &str) -> Result<u32> {
    value.parse().map_err(|e| Error::CommandFailed {
        command: format!("{} info", HYPERVISOR_CLI),
        reason: format!("failed to parse {} '{}': {}", key, value, e),
    })
}

/// Parses `xl vcpu-list` output.
///
/// Rows are located after the header line; the affinity column is split on
/// ` / ` into hard and soft masks.
pub fn parse_vcpu_list(output: &str) -> Result<Vec<VcpuEntry>> {
    let mut lines = output.lines();
    let header = lines.by_ref().find(|l| l.contains("Name") && l.contains("Affinity"));
    if header.is_none() {
        return Err(vcpu_parse_error("could not find vcpu-list header"));
    }

    let mut entries = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        entries.push(parse_vcpu_line(line)?);
    }
    Ok(entries)
}

fn parse_vcpu_line(line: &str) -> Result<VcpuEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 7 {
        return Err(vcpu_parse_error(&format!("short vcpu-list row '{}'", line)));
    }
    let number = |s: &str| -> Result<u32> {
        s.parse()
            .map_err(|_| vcpu_parse_error(&format!("bad number '{}' in '{}'", s, line)))
    };

    let affinity = fields[6..].join(" ");
    let (hard, soft) = match affinity.split_once(" / ") {
        Some((hard, soft)) => (hard.trim().to_string(), soft.trim().to_string()),
        None => (affinity.trim().to_string(), String::new()),
    };

    Ok(VcpuEntry {
        domain: fields[0].to_string(),
        domid: number(fields[1])?,
        vcpu: number(fields[2])?,
        cpu: if fields[3] == "-" {
            None
        } else {
            Some(number(fields[3])?)
        },
        state: fields[4].to_string(),
        time_secs: fields[5]
            .parse()
            .map_err(|_| vcpu_parse_error(&format!("bad time '{}' in '{}'", fields[5], line)))?,
        hard_affinity: hard,
        soft_affinity: soft,
    })
}

fn vcpu_parse_error(reason: &str) -> Error {
    Error::CommandFailed {
        command: format!("{} vcpu-list", HYPERVISOR_CLI),
        reason: reason.to_string(),
    }
}

/// Union of the hard affinities of every vCPU of `domain`.
///
/// `all` expands to `0..physical_cpus`. Unparsable masks are skipped. An
/// empty result falls back to CPU 0, where the control domain always runs.
pub fn domain_affinity(entries: &[VcpuEntry], domain: &str, physical_cpus: u32) -> CpuSet {
    let mut set = CpuSet::new();
    for entry in entries.iter().filter(|e| e.domain == domain) {
        let mask = if entry.hard_affinity == "all" {
            Ok(CpuSet::first_n(physical_cpus))
        } else {
            CpuSet::parse(&entry.hard_affinity)
        };
        match mask {
            Ok(mask) => set = set.union(&mask),
            Err(e) => debug!("skipping affinity of {} vcpu {}: {}", domain, entry.vcpu, e),
        }
    }
    if set.is_empty() {
        return [0].into_iter().collect();
    }
    set
}

// =============================================================================
// Toolstack Client
// =============================================================================

/// Thin async wrapper over the hypervisor toolstack.
#[derive(Clone)]
pub struct Xl {
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for Xl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Xl").finish_non_exhaustive()
    }
}

impl Xl {
    /// Creates a wrapper that executes through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Returns the underlying runner.
    #[must_use]
    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    async fn xl(&self, argv: Vec<String>) -> Result<String> {
        run_checked(self.runner.as_ref(), HYPERVISOR_CLI, &argv, None).await
    }

    /// Checks that the toolstack answers a `vcpu-list` within the
    /// verification timeout.
    pub async fn verify(&self) -> Result<()> {
        if !self.runner.is_installed(HYPERVISOR_CLI) {
            return Err(Error::CommandFailed {
                command: HYPERVISOR_CLI.to_string(),
                reason: "not found in PATH".to_string(),
            });
        }
        let out = run_checked(
            self.runner.as_ref(),
            HYPERVISOR_CLI,
            &args(["vcpu-list"]),
            Some(VERIFY_COMMAND_TIMEOUT),
        )
        .await?;
        if out.trim().is_empty() {
            return Err(Error::CommandFailed {
                command: format!("{} vcpu-list", HYPERVISOR_CLI),
                reason: "command produced no output".to_string(),
            });
        }
        Ok(())
    }

    /// Runs `xl info`.
    pub async fn info(&self) -> Result<XlInfo> {
        parse_xl_info(&self.xl(args(["info"])).await?)
    }

    /// Runs `xl vcpu-list`.
    pub async fn vcpu_list(&self) -> Result<Vec<VcpuEntry>> {
        parse_vcpu_list(&self.xl(args(["vcpu-list"])).await?)
    }

    /// CPUs the control domain is pinned to.
    pub async fn control_os_cpuset(&self, physical_cpus: u32) -> Result<CpuSet> {
        let entries = self.vcpu_list().await?;
        Ok(domain_affinity(&entries, CONTROL_DOMAIN_NAME, physical_cpus))
    }

    /// Domain id of `name`, falling back to scanning `xl list`.
    pub async fn domid(&self, name: &str) -> Result<u32> {
        match self.xl(args(["domid", name])).await {
            Ok(out) => {
                let out = out.trim();
                out.parse().map_err(|_| Error::CommandFailed {
                    command: format!("{} domid {}", HYPERVISOR_CLI, name),
                    reason: format!("invalid output {:?}", out),
                })
            }
            Err(e) => {
                debug!("xl domid failed for {}, scanning xl list: {}", name, e);
                let listing = self.xl(args(["list"])).await?;
                find_domid_in_list(&listing, name).ok_or_else(|| Error::CommandFailed {
                    command: format!("{} list", HYPERVISOR_CLI),
                    reason: format!("domain {} not found", name),
                })
            }
        }
    }

    /// Reads `/local/domain/<domid>/<key>` for domain `name`.
    pub async fn xenstore_read(&self, name: &str, key: &str) -> Result<String> {
        let domid = self.domid(name).await?;
        let path = format!("/local/domain/{}/{}", domid, key);
        let out = run_checked(
            self.runner.as_ref(),
            XENSTORE_READ_CLI,
            &args([path.as_str()]),
            None,
        )
        .await?;
        let out = out.trim();
        if out.is_empty() {
            return Err(Error::CommandFailed {
                command: format!("{} {}", XENSTORE_READ_CLI, path),
                reason: "returned empty output".to_string(),
            });
        }
        Ok(out.to_string())
    }

    pub async fn mem_set(&self, domain: &str, mib: u32) -> Result<()> {
        self.xl(args(["mem-set".to_string(), domain.to_string(), mib.to_string()]))
            .await
            .map(drop)
    }

    pub async fn mem_max(&self, domain: &str, mib: u32) -> Result<()> {
        self.xl(args(["mem-max".to_string(), domain.to_string(), mib.to_string()]))
            .await
            .map(drop)
    }

    pub async fn vcpu_set(&self, domain: &str, count: u32) -> Result<()> {
        self.xl(args(["vcpu-set".to_string(), domain.to_string(), count.to_string()]))
            .await
            .map(drop)
    }

    /// Sets credit2 weight and/or cap. `None` leaves the parameter unchanged;
    /// a cap of 0 removes the cap.
    pub async fn sched_credit2(
        &self,
        domain: &str,
        weight: Option<u32>,
        cap: Option<u32>,
    ) -> Result<()> {
        let mut argv = args(["sched-credit2", "-d", domain]);
        if let Some(weight) = weight {
            if weight < MIN_SCHED_WEIGHT {
                return Err(Error::CommandFailed {
                    command: format!("{} sched-credit2", HYPERVISOR_CLI),
                    reason: format!("CPU weight must be >= {}, got {}", MIN_SCHED_WEIGHT, weight),
                });
            }
            argv.extend(args(["-w".to_string(), weight.to_string()]));
        }
        if let Some(cap) = cap {
            argv.extend(args(["-c".to_string(), cap.to_string()]));
        }
        self.xl(argv).await.map(drop)
    }

    pub async fn pause(&self, domain: &str) -> Result<()> {
        self.xl(args(["pause", domain])).await.map(drop)
    }

    pub async fn unpause(&self, domain: &str) -> Result<()> {
        self.xl(args(["unpause", domain])).await.map(drop)
    }
}

fn find_domid_in_list(listing: &str, name: &str) -> Option<u32> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("Name"))
        .map(|l| l.split_whitespace().collect::<Vec<_>>())
        .find(|f| f.len() >= 2 && f[0] == name)
        .and_then(|f| f[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &str = "host                   : qemu-aarch64
machine                : aarch64
nr_cpus                : 4
max_cpu_id             : 3
total_memory           : 2048
free_memory            : 1427
xen_major              : 4
xen_minor              : 18
xen_extra              : .2
xen_scheduler          : credit2
xen_changeset          :
";

    const VCPU_LIST: &str = "Name                                ID  VCPU   CPU State   Time(s) Affinity (Hard / Soft)
Domain-0                             0     0    1   -b-     271.1  all / all
Domain-0                             0     1    0   r--     257.5  0-1 / all
zephyr                               3     0    -   --p       0.0  2-3 / all
";

    #[test]
    fn test_parse_xl_info() {
        let info = parse_xl_info(INFO).unwrap();
        assert_eq!(info.nr_cpus, 4);
        assert_eq!(info.total_memory_mib, 2048);
        assert_eq!(info.free_memory_mib, 1427);
        assert_eq!(info.version, "4.18.2");
        assert_eq!(info.scheduler, "credit2");
        assert_eq!(info.raw.get("xen_changeset").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_xl_info_bad_number() {
        assert!(parse_xl_info("nr_cpus : four\n").is_err());
    }

    #[test]
    fn test_parse_vcpu_list() {
        let entries = parse_vcpu_list(VCPU_LIST).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].cpu, Some(1));
        assert_eq!(entries[0].hard_affinity, "all");
        assert_eq!(entries[2].domain, "zephyr");
        assert_eq!(entries[2].cpu, None);
        assert_eq!(entries[2].soft_affinity, "all");
    }

    #[test]
    fn test_parse_vcpu_list_requires_header() {
        assert!(parse_vcpu_list("Domain-0 0 0 1 -b- 1.0 all / all").is_err());
    }

    #[test]
    fn test_domain_affinity() {
        let entries = parse_vcpu_list(VCPU_LIST).unwrap();
        assert_eq!(domain_affinity(&entries, "Domain-0", 4).format(), "0-3");
        assert_eq!(domain_affinity(&entries, "zephyr", 4).format(), "2-3");
        assert_eq!(domain_affinity(&entries, "missing", 4).format(), "0");
    }

    #[test]
    fn test_find_domid_in_list() {
        let listing = "Name    ID   Mem VCPUs State Time(s)\nDomain-0 0 512 2 r----- 10.0\nzephyr 7 64 1 -b---- 1.0\n";
        assert_eq!(find_domid_in_list(listing, "zephyr"), Some(7));
        assert_eq!(find_domid_in_list(listing, "nope"), None);
    }
}
