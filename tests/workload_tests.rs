//! Tests for the workload registry and its lifecycle bookkeeping.

mod common;

use common::{FakeTransport, Reply, ScriptedRunner, host};
use rtosrun::config::{HYPERVISOR_CLI_UPDATE_ENV, RuntimeConfig};
use rtosrun::constants::CREATE_MESSAGE_LEN;
use rtosrun::error::Error;
use rtosrun::host::PedestalKind;
use rtosrun::protocol::{CreateMessage, CreateOptions, DaemonClient, Endpoint};
use rtosrun::state::LifecycleState;
use rtosrun::workload::WorkloadRegistry;
use std::sync::Arc;

fn registry(fake: &Arc<FakeTransport>) -> WorkloadRegistry {
    WorkloadRegistry::new(
        DaemonClient::new(fake.clone()),
        host(PedestalKind::OpenAmp, 4, ScriptedRunner::new()),
    )
}

// =============================================================================
// Create / Delete
// =============================================================================

#[tokio::test]
async fn test_create_registers_stopped_workload() {
    let fake = FakeTransport::new();
    let reg = registry(&fake).with_default_max_vcpus(4);

    let workload = reg
        .create(CreateOptions {
            memory_mib: 32,
            ..CreateOptions::new("zephyr", "/img")
        })
        .await
        .unwrap();

    assert_eq!(workload.state().await, LifecycleState::Stopped);
    assert_eq!(reg.ids().unwrap(), vec!["zephyr".to_string()]);
    assert_eq!(fake.sent(), vec!["<create zephyr>"]);

    let exec = workload.executor().lock().await;
    assert_eq!(exec.record().memory_mib, 32);
    assert_eq!(exec.record().memory_threshold_mib, 64);
    assert_eq!(exec.record().max_vcpu_count, 4);
}

#[tokio::test]
async fn test_create_duplicate_rejected() {
    let fake = FakeTransport::new();
    let reg = registry(&fake);
    reg.create(CreateOptions::new("zephyr", "/img")).await.unwrap();

    let err = reg
        .create(CreateOptions::new("zephyr", "/img"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WorkloadAlreadyExists(_)));
    assert_eq!(fake.sent().len(), 1, "duplicate must not reach the daemon");
}

#[tokio::test]
async fn test_rejected_create_is_not_registered() {
    let fake = FakeTransport::new();
    fake.push(Reply::Rejected("bad image".to_string()));
    let reg = registry(&fake);

    assert!(reg.create(CreateOptions::new("zephyr", "/img")).await.is_err());
    assert!(reg.is_empty().unwrap());
    assert!(matches!(reg.get("zephyr"), Err(Error::WorkloadNotFound(_))));
}

#[tokio::test]
async fn test_invalid_id_rejected() {
    let fake = FakeTransport::new();
    let reg = registry(&fake);
    let err = reg
        .create(CreateOptions::new("a/b", "/img"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidWorkloadId { .. }));
    assert!(fake.sent().is_empty());
}

#[tokio::test]
async fn test_delete_drops_record() {
    let fake = FakeTransport::new();
    let reg = registry(&fake);
    reg.create(CreateOptions::new("zephyr", "/img")).await.unwrap();

    reg.delete("zephyr").await.unwrap();
    assert!(reg.is_empty().unwrap());
    assert_eq!(fake.sent(), vec!["<create zephyr>", "rm"]);

    // Socket gone and record gone: still fine.
    fake.remove_socket("zephyr");
    reg.delete("zephyr").await.unwrap();
}

#[tokio::test]
async fn test_failed_delete_keeps_record() {
    let fake = FakeTransport::new();
    let reg = registry(&fake);
    reg.create(CreateOptions::new("zephyr", "/img")).await.unwrap();

    fake.push(Reply::Rejected("busy".to_string()));
    assert!(reg.delete("zephyr").await.is_err());
    assert_eq!(reg.len().unwrap(), 1);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_lifecycle_sequence() {
    let fake = FakeTransport::new();
    let reg = registry(&fake);
    let workload = reg.create(CreateOptions::new("zephyr", "/img")).await.unwrap();

    reg.start("zephyr").await.unwrap();
    assert_eq!(workload.state().await, LifecycleState::Running);
    reg.pause("zephyr").await.unwrap();
    assert_eq!(workload.state().await, LifecycleState::Paused);
    reg.resume("zephyr").await.unwrap();
    assert_eq!(workload.state().await, LifecycleState::Running);
    reg.stop("zephyr").await.unwrap();
    assert_eq!(workload.state().await, LifecycleState::Stopped);

    assert_eq!(
        fake.sent(),
        vec!["<create zephyr>", "start", "stop", "start", "stop"]
    );
}

#[tokio::test]
async fn test_out_of_order_operations_rejected() {
    let fake = FakeTransport::new();
    let reg = registry(&fake);
    let workload = reg.create(CreateOptions::new("zephyr", "/img")).await.unwrap();

    assert!(matches!(
        reg.pause("zephyr").await,
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(
        reg.stop("zephyr").await,
        Err(Error::InvalidTransition { .. })
    ));
    assert_eq!(workload.state().await, LifecycleState::Stopped);
    assert_eq!(fake.sent().len(), 1, "nothing but the create was sent");
}

#[tokio::test]
async fn test_failed_start_keeps_state() {
    let fake = FakeTransport::new();
    let reg = registry(&fake);
    let workload = reg.create(CreateOptions::new("zephyr", "/img")).await.unwrap();

    fake.push(Reply::Rejected("boot failed".to_string()));
    assert!(reg.start("zephyr").await.is_err());
    assert_eq!(workload.state().await, LifecycleState::Stopped);
}

#[tokio::test]
async fn test_unknown_workload() {
    let fake = FakeTransport::new();
    let reg = registry(&fake);
    assert!(matches!(
        reg.start("ghost").await,
        Err(Error::WorkloadNotFound(_))
    ));
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_env_switch_routes_updates_to_toolstack() {
    // SAFETY: no other test in this binary reads or writes this variable.
    unsafe { std::env::set_var(HYPERVISOR_CLI_UPDATE_ENV, "1") };
    let config = RuntimeConfig::default().with_env_overrides();
    // SAFETY: see above.
    unsafe { std::env::remove_var(HYPERVISOR_CLI_UPDATE_ENV) };

    let fake = FakeTransport::new();
    let runner = ScriptedRunner::new();
    let reg = WorkloadRegistry::from_config(
        &config,
        DaemonClient::new(fake.clone()),
        host(PedestalKind::Xen, 4, runner.clone()),
    );
    let workload = reg.create(CreateOptions::new("zephyr", "/img")).await.unwrap();
    workload
        .executor()
        .lock()
        .await
        .update_memory(64)
        .await
        .unwrap();

    assert_eq!(runner.calls(), vec!["xl mem-set zephyr 64"]);
    assert_eq!(
        fake.sent(),
        vec!["<create zephyr>"],
        "update must bypass the daemon"
    );
}

#[tokio::test]
async fn test_config_memory_floor_reaches_create_message() {
    let config = RuntimeConfig {
        min_memory_mib: 64,
        default_max_vcpus: 2,
        ..RuntimeConfig::default()
    };
    let fake = FakeTransport::new();
    let reg = WorkloadRegistry::from_config(
        &config,
        DaemonClient::new(fake.clone()),
        host(PedestalKind::OpenAmp, 4, ScriptedRunner::new()),
    );
    assert_eq!(reg.planner().plan(None).memory_max_mib, Some(64));

    let workload = reg.create(CreateOptions::new("zephyr", "/img")).await.unwrap();
    assert_eq!(workload.executor().lock().await.memory_threshold_mib(), 128);

    let requests = fake.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, Endpoint::Create);
    assert_eq!(requests[0].1.len(), CREATE_MESSAGE_LEN);
    let message = CreateMessage::unpack(&requests[0].1).unwrap();
    assert_eq!(message.memory_threshold_mib, 128);
    assert_eq!(message.max_vcpus, 2);
}
