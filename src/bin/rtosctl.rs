//! rtosctl - RTOS control plane operator CLI
//!
//! Inspects the host pedestal and talks to the control daemon directly.
//!
//! ## Usage
//!
//! ```sh
//! rtosctl [--config <file>] host
//! rtosctl [--config <file>] daemon
//! rtosctl [--config <file>] status <workload-id>
//! rtosctl [--config <file>] list
//! rtosctl [--config <file>] plan <resources.json>
//! rtosctl [--config <file>] pack <workload-id> <image-path>
//! rtosctl [--config <file>] update <workload-id> <Key> <value>
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::{Context, bail};
use rtosrun::constants::CREATE_MESSAGE_LEN;
use rtosrun::protocol::message::FIELD_OFFSETS;
use rtosrun::{
    CreateMessage, CreateOptions, DaemonClient, DaemonSupervisor, HostInventory, OciResources,
    ResourceExecutor, RuntimeConfig, SuspendMode, SystemCommandRunner, UnixTransport,
    UpdateDirective, UpdatePath, WorkloadRecord,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Host,
    Daemon,
    Status { id: String },
    List,
    Plan { resources: PathBuf },
    Pack { id: String, image: String },
    Update { id: String, directive: String },
    Version,
    Help,
}

#[derive(Debug)]
struct Invocation {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut config = None;
    let mut rest = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    return Err("--config requires a path".to_string());
                };
                config = Some(PathBuf::from(path));
                i += 2;
            }
            _ => {
                rest.push(args[i].clone());
                i += 1;
            }
        }
    }

    let command = match rest.first().map(String::as_str) {
        None | Some("help" | "--help" | "-h") => Command::Help,
        Some("version" | "--version" | "-v") => Command::Version,
        Some("host") => Command::Host,
        Some("daemon") => Command::Daemon,
        Some("list") => Command::List,
        Some("status") => {
            let id = rest.get(1).ok_or("status requires <workload-id>")?;
            Command::Status { id: id.clone() }
        }
        Some("plan") => {
            let path = rest.get(1).ok_or("plan requires <resources.json>")?;
            Command::Plan {
                resources: PathBuf::from(path),
            }
        }
        Some("pack") => {
            if rest.len() < 3 {
                return Err("pack requires <workload-id> <image-path>".to_string());
            }
            Command::Pack {
                id: rest[1].clone(),
                image: rest[2].clone(),
            }
        }
        Some("update") => {
            if rest.len() < 4 {
                return Err("update requires <workload-id> <Key> <value>".to_string());
            }
            Command::Update {
                id: rest[1].clone(),
                directive: rest[2..].join(" "),
            }
        }
        Some(unknown) => return Err(format!("unknown command: {}", unknown)),
    };
    Ok(Invocation { config, command })
}

// =============================================================================
// Commands
// =============================================================================

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RuntimeConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            RuntimeConfig::from_json(&text)
                .with_context(|| format!("invalid configuration in {}", path.display()))?
        }
        None => RuntimeConfig::default(),
    };
    Ok(config.with_env_overrides())
}

async fn detect_host(config: &RuntimeConfig) -> Arc<HostInventory> {
    let host = Arc::new(HostInventory::detect(&config.pedestal_probe()).await);
    config.apply(&host);
    host
}

fn daemon_client(config: &RuntimeConfig, host: &HostInventory) -> DaemonClient {
    let transport =
        UnixTransport::new(config.socket_paths()).with_timeout(config.socket_timeout());
    let client = DaemonClient::new(Arc::new(transport)).with_host_cpus(host.physical_cpus());
    if host.pedestal().capabilities().suspend == SuspendMode::Hypervisor {
        client.with_hypervisor_suspend(host.xl().clone())
    } else {
        client
    }
}

async fn cmd_host(config: &RuntimeConfig) -> anyhow::Result<()> {
    let host = detect_host(config).await;
    let counts = host.cpu_counts();
    let memory = host.memory().await;
    println!("pedestal:          {}", host.pedestal());
    println!("physical cpus:     {}", counts.physical);
    println!("linux-visible:     {}", counts.linux_visible);
    println!("client capacity:   {}", host.client_cpu_capacity());
    println!("max cpu capacity:  {}%", host.max_cpu_capacity());
    println!("memory total/free: {} / {} MiB", memory.total_mib, memory.free_mib);
    match host.client_cpuset().await {
        Ok(cpus) => println!("client cpuset:     {}", cpus),
        Err(e) => println!("client cpuset:     unavailable ({})", e),
    }
    Ok(())
}

async fn cmd_daemon(config: &RuntimeConfig) -> anyhow::Result<()> {
    let supervisor = DaemonSupervisor::new(Arc::new(SystemCommandRunner))
        .with_pid_file(&config.pid_file)
        .with_service(&config.daemon_service)
        .with_create_socket(config.create_socket_path());
    let status = supervisor.ensure_running().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_status(config: &RuntimeConfig, id: Option<&str>) -> anyhow::Result<()> {
    let host = detect_host(config).await;
    let client = daemon_client(config, &host);
    let statuses = match id {
        Some(id) => vec![client.status(id).await?],
        None => client.list().await?,
    };
    println!("{:<24} {:<12} {:<12} SERVICES", "NAME", "CPU", "STATE");
    for status in statuses {
        let services: Vec<&str> = status.services.iter().map(|s| s.as_str()).collect();
        println!(
            "{:<24} {:<12} {:<12} {}",
            status.name,
            status.cpu,
            status.state,
            services.join(",")
        );
    }
    Ok(())
}

async fn cmd_plan(config: &RuntimeConfig, path: &PathBuf) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let resources = OciResources::from_json(&text)?;
    let host = detect_host(config).await;
    let plan = config.planner(host.pedestal()).plan(Some(&resources));
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn cmd_pack(config: &RuntimeConfig, id: &str, image: &str) -> anyhow::Result<()> {
    let options = CreateOptions::new(id, image).with_max_vcpus(config.default_max_vcpus);
    let message = CreateMessage::resolve(options, config.min_memory_mib);
    let packed = message.pack();
    if packed.len() != CREATE_MESSAGE_LEN {
        bail!("packed {} bytes, expected {}", packed.len(), CREATE_MESSAGE_LEN);
    }
    println!("length: {}", packed.len());
    for (name, offset) in FIELD_OFFSETS {
        println!("{:>6}  {}", offset, name);
    }
    for (row, chunk) in packed.chunks(16).enumerate() {
        if chunk.iter().all(|b| *b == 0) {
            continue;
        }
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("{:06x}  {}", row * 16, hex.join(" "));
    }
    Ok(())
}

async fn cmd_update(config: &RuntimeConfig, id: &str, directive: &str) -> anyhow::Result<()> {
    let directive: UpdateDirective = directive.parse()?;
    let host = detect_host(config).await;
    let client = daemon_client(config, &host);
    let label = directive.to_string();
    let mut executor = ResourceExecutor::new(id, WorkloadRecord::default(), client, host)
        .with_toolstack_updates(config.hypervisor_cli_updates);
    let path = executor
        .apply_directive(directive)
        .await
        .with_context(|| format!("failed to apply '{}' to {}", label, id))?;
    match path {
        UpdatePath::Daemon => println!("{}: {}", id, label),
        UpdatePath::Toolstack => println!("{}: {} (xl)", id, label),
        UpdatePath::Skipped => println!("{}: {} skipped, no xl path", id, label),
    }
    Ok(())
}

fn cmd_help() {
    println!(
        "rtosctl {}

Usage: rtosctl [--config <file>] <command>

Commands:
  host                            Show pedestal and CPU/memory facts
  daemon                          Probe (and if needed start) the control daemon
  status <workload-id>            Query one workload's status
  list                            Query every workload's status
  plan <resources.json>           Plan resources from OCI LinuxResources JSON
  pack <workload-id> <image>      Dump the create message layout
  update <workload-id> <Key> <v>  Send a resource update (VCPU, CPU, CPUCapacity,
                                  CPUWeight, Memory, MaxMem)
  version                         Print version",
        env!("CARGO_PKG_VERSION")
    );
}

async fn run(invocation: Invocation) -> anyhow::Result<()> {
    let config = load_config(invocation.config.as_ref())?;
    match invocation.command {
        Command::Host => cmd_host(&config).await,
        Command::Daemon => cmd_daemon(&config).await,
        Command::Status { id } => cmd_status(&config, Some(&id)).await,
        Command::List => cmd_status(&config, None).await,
        Command::Plan { resources } => cmd_plan(&config, &resources).await,
        Command::Pack { id, image } => cmd_pack(&config, &id, &image),
        Command::Update { id, directive } => cmd_update(&config, &id, &directive).await,
        Command::Version => {
            println!("rtosctl {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Help => {
            cmd_help();
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse_args(&args) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(invocation)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_update() {
        let inv = parse_args(&argv(&["update", "zephyr", "MaxMem", "128"])).unwrap();
        match inv.command {
            Command::Update { id, directive } => {
                assert_eq!(id, "zephyr");
                assert_eq!(directive, "MaxMem 128");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_anywhere() {
        let inv = parse_args(&argv(&["status", "z", "--config", "/etc/rtos.json"])).unwrap();
        assert_eq!(inv.config, Some(PathBuf::from("/etc/rtos.json")));
        assert!(matches!(inv.command, Command::Status { .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&argv(&["status"])).is_err());
        assert!(parse_args(&argv(&["pack", "z"])).is_err());
        assert!(parse_args(&argv(&["--config"])).is_err());
        assert!(parse_args(&argv(&["frobnicate"])).is_err());
        assert!(matches!(parse_args(&[]).unwrap().command, Command::Help));
    }
}
