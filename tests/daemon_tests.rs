//! Tests for control daemon supervision.

mod common;

use common::ScriptedRunner;
use rtosrun::daemon::{DaemonState, DaemonSupervisor};
use rtosrun::error::Error;
use rtosrun::host::CommandOutput;
use std::os::unix::net::UnixListener;
use std::time::Duration;
use tempfile::TempDir;

fn supervisor(dir: &TempDir, runner: std::sync::Arc<ScriptedRunner>) -> DaemonSupervisor {
    DaemonSupervisor::new(runner)
        .with_pid_file(dir.path().join("micad.pid"))
        .with_create_socket(dir.path().join("mica-create.socket"))
        .with_settle(Duration::ZERO)
}

fn write_own_pid(dir: &TempDir) {
    std::fs::write(dir.path().join("micad.pid"), std::process::id().to_string()).unwrap();
}

// =============================================================================
// Running Daemon
// =============================================================================

#[tokio::test]
async fn test_running_and_listening() {
    let dir = TempDir::new().unwrap();
    write_own_pid(&dir);
    let _listener = UnixListener::bind(dir.path().join("mica-create.socket")).unwrap();
    let runner = ScriptedRunner::new();

    let status = supervisor(&dir, runner.clone()).state().await;
    assert_eq!(status.state, DaemonState::RunningReady);
    assert_eq!(status.pid, Some(std::process::id() as i32));
    assert!(status.is_active());
    assert!(status.listening());
    assert!(runner.calls().is_empty(), "live daemon must not be restarted");
}

#[tokio::test]
async fn test_running_without_socket() {
    let dir = TempDir::new().unwrap();
    write_own_pid(&dir);

    let status = supervisor(&dir, ScriptedRunner::new()).state().await;
    assert_eq!(status.state, DaemonState::RunningNotListening);
    assert!(status.is_active());
    assert!(!status.listening());
}

#[tokio::test]
async fn test_regular_file_is_not_listening() {
    let dir = TempDir::new().unwrap();
    write_own_pid(&dir);
    std::fs::write(dir.path().join("mica-create.socket"), b"").unwrap();

    let status = supervisor(&dir, ScriptedRunner::new()).state().await;
    assert_eq!(status.state, DaemonState::RunningNotListening);
}

// =============================================================================
// Auto-start
// =============================================================================

#[tokio::test]
async fn test_single_start_attempt_then_not_running() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();
    runner.install("systemctl");
    runner.install("service");

    let sup = supervisor(&dir, runner.clone());
    let status = sup.state().await;
    assert_eq!(status.state, DaemonState::NotRunning);
    assert_eq!(status.pid, None);
    assert_eq!(
        runner.calls(),
        vec!["systemctl start micad"],
        "exactly one attempt through the first available manager"
    );

    let err = sup.ensure_running().await.unwrap_err();
    assert!(matches!(err, Error::DaemonNotRunning(_)));
    assert!(err.is_daemon_unreachable());
}

#[tokio::test]
async fn test_service_fallback_when_no_systemctl() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();
    runner.install("service");

    let status = supervisor(&dir, runner.clone())
        .with_service("mica")
        .state()
        .await;
    assert_eq!(status.state, DaemonState::NotRunning);
    assert_eq!(runner.calls(), vec!["service mica start"]);
}

#[tokio::test]
async fn test_start_failure_still_reprobes() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();
    runner.install("systemctl");
    runner.on(
        "systemctl start micad",
        CommandOutput::failed(5, "Unit micad.service not found."),
    );

    let status = supervisor(&dir, runner.clone()).state().await;
    assert_eq!(status.state, DaemonState::NotRunning);
    assert_eq!(runner.calls().len(), 1);
}

#[tokio::test]
async fn test_no_service_manager() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();
    let sup = supervisor(&dir, runner.clone());

    assert!(matches!(sup.launch().await, Err(Error::DaemonNotRunning(_))));
    assert!(runner.calls().is_empty());
}

#[test]
fn test_stale_pid_is_not_alive() {
    let dir = TempDir::new().unwrap();
    // PIDs are capped well below i32::MAX on Linux.
    std::fs::write(dir.path().join("micad.pid"), "2147483646").unwrap();
    assert_eq!(supervisor(&dir, ScriptedRunner::new()).probe(), None);
}
