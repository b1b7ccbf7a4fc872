//! Tests for constants module.
//!
//! Checks that wire widths agree with each other and that resource limits
//! stay in ranges the daemon and the credit scheduler accept.

use rtosrun::constants::*;
use rtosrun::protocol::message::FIELD_OFFSETS;
use std::time::Duration;

// =============================================================================
// Wire Layout Tests
// =============================================================================

#[test]
fn test_field_offsets_ascending_and_in_bounds() {
    let mut last = None;
    for (name, offset) in FIELD_OFFSETS {
        if let Some(prev) = last {
            assert!(*offset > prev, "field '{}' is not after its predecessor", name);
        }
        assert!(*offset < CREATE_MESSAGE_LEN, "field '{}' lies past the message end", name);
        last = Some(*offset);
    }
}

#[test]
fn test_trailing_fields_fill_message() {
    let (_, network) = FIELD_OFFSETS
        .iter()
        .find(|(name, _)| *name == "network")
        .copied()
        .unwrap();
    assert_eq!(
        network + NETWORK_FIELD_LEN,
        CREATE_MESSAGE_LEN,
        "network field must end the create message"
    );
}

#[test]
fn test_workload_id_fits_name_field() {
    assert_eq!(MAX_WORKLOAD_ID_LEN, NAME_FIELD_LEN);
    let longest = "z".repeat(MAX_WORKLOAD_ID_LEN);
    assert!(validate_workload_id(&longest).is_ok());
}

#[test]
fn test_sentinels_distinct() {
    assert_ne!(SUCCESS_SENTINEL, FAILURE_SENTINEL);
    assert!(!SUCCESS_SENTINEL.contains(FAILURE_SENTINEL));
    assert!(!FAILURE_SENTINEL.contains(SUCCESS_SENTINEL));
}

// =============================================================================
// Socket Limit Tests
// =============================================================================

#[test]
fn test_reply_cap_covers_chunks() {
    assert!(
        MAX_REPLY_SIZE >= 64 * READ_CHUNK_SIZE,
        "reply cap too small for a full status listing"
    );
    assert!(MAX_REPLY_SIZE <= 16 * 1024 * 1024, "reply cap too permissive");
}

#[test]
fn test_timeouts_reasonable() {
    assert!(DEFAULT_SOCKET_TIMEOUT >= Duration::from_secs(1), "socket timeout too short");
    assert!(DEFAULT_SOCKET_TIMEOUT <= Duration::from_secs(60), "socket timeout too long");
    assert!(DAEMON_START_SETTLE < DEFAULT_SOCKET_TIMEOUT);
    assert!(VERIFY_COMMAND_TIMEOUT <= DEFAULT_SOCKET_TIMEOUT);
}

// =============================================================================
// Resource Default Tests
// =============================================================================

#[test]
fn test_default_weight_within_scheduler_range() {
    assert!(DEFAULT_SCHED_WEIGHT >= MIN_SCHED_WEIGHT);
    assert!(DEFAULT_SCHED_WEIGHT <= MAX_SCHED_WEIGHT);
    assert_eq!(
        DEFAULT_CPU_SHARES,
        u64::from(DEFAULT_SCHED_WEIGHT) * SHARES_PER_WEIGHT,
        "default shares must map onto the default weight"
    );
}

#[test]
fn test_vcpu_defaults_consistent() {
    assert!(DEFAULT_VCPU_COUNT >= 1);
    assert!(DEFAULT_VCPU_COUNT <= DEFAULT_MAX_VCPUS, "initial vCPUs exceed the cap");
}

#[test]
fn test_memory_shift_no_overflow() {
    let bytes = u64::from(u32::MAX).checked_shl(MIB_SHIFT);
    assert!(bytes.is_some(), "MiB to bytes conversion overflows u64");
    assert_eq!(1u64 << MIB_SHIFT, 1024 * 1024);
}

#[test]
fn test_cpu_index_limit_keeps_capacity_in_range() {
    let largest_set = u64::from(MAX_CPU_INDEX) + 1;
    assert!(
        largest_set * u64::from(CAPACITY_PER_CPU) <= u64::from(u32::MAX),
        "capacity of the largest CPU set overflows u32"
    );
}
