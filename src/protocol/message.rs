//! Fixed-layout create message.
//!
//! Mirrors the daemon's native create struct byte for byte:
//!
//! ```text
//! offset  width  field
//! ------  -----  ------------------------------
//!      0     66  name
//!     66    256  image path
//!    322     16  pedestal name
//!    338    256  pedestal config path
//!    594      1  debug flag
//!    595    128  cpu set string
//!    723      1  (padding, aligns next field to 4)
//!    724      4  vcpu count            (u32 LE)
//!    728      4  max vcpu count        (u32 LE)
//!    732      4  cpu weight            (u32 LE)
//!    736      4  cpu capacity percent  (u32 LE)
//!    740      4  memory MiB            (u32 LE)
//!    744      4  memory threshold MiB  (u32 LE)
//!    748    512  reserved iomem
//!   1260    512  network
//!   1772         end
//! ```
//!
//! Strings are left-justified and zero-padded. A string longer than its field
//! is truncated with a warning.

use crate::constants::{
    CPU_STRING_FIELD_LEN, CREATE_MESSAGE_LEN, DEBUG_FIELD_LEN, DEFAULT_MAX_VCPUS,
    DEFAULT_MIN_MEMORY_MIB, IOMEM_FIELD_LEN, NAME_FIELD_LEN, NETWORK_FIELD_LEN,
    PATH_FIELD_LEN, PEDESTAL_CONFIG_FIELD_LEN, PEDESTAL_FIELD_LEN,
};
use crate::error::{Error, Result};
use crate::host::PedestalKind;
use crate::resources::EssentialResource;
use tracing::warn;

pub const NAME_OFFSET: usize = 0;
pub const PATH_OFFSET: usize = NAME_OFFSET + NAME_FIELD_LEN;
pub const PEDESTAL_OFFSET: usize = PATH_OFFSET + PATH_FIELD_LEN;
pub const PEDESTAL_CONFIG_OFFSET: usize = PEDESTAL_OFFSET + PEDESTAL_FIELD_LEN;
pub const DEBUG_OFFSET: usize = PEDESTAL_CONFIG_OFFSET + PEDESTAL_CONFIG_FIELD_LEN;
pub const CPU_STRING_OFFSET: usize = DEBUG_OFFSET + DEBUG_FIELD_LEN;
pub const VCPU_OFFSET: usize = (CPU_STRING_OFFSET + CPU_STRING_FIELD_LEN).next_multiple_of(4);
pub const MAX_VCPU_OFFSET: usize = VCPU_OFFSET + 4;
pub const CPU_WEIGHT_OFFSET: usize = MAX_VCPU_OFFSET + 4;
pub const CPU_CAPACITY_OFFSET: usize = CPU_WEIGHT_OFFSET + 4;
pub const MEMORY_OFFSET: usize = CPU_CAPACITY_OFFSET + 4;
pub const MEMORY_THRESHOLD_OFFSET: usize = MEMORY_OFFSET + 4;
pub const IOMEM_OFFSET: usize = MEMORY_THRESHOLD_OFFSET + 4;
pub const NETWORK_OFFSET: usize = IOMEM_OFFSET + IOMEM_FIELD_LEN;

const _: () = assert!(NETWORK_OFFSET + NETWORK_FIELD_LEN == CREATE_MESSAGE_LEN);

/// Field names and offsets, in wire order.
pub const FIELD_OFFSETS: &[(&str, usize)] = &[
    ("name", NAME_OFFSET),
    ("path", PATH_OFFSET),
    ("pedestal", PEDESTAL_OFFSET),
    ("pedestal_config", PEDESTAL_CONFIG_OFFSET),
    ("debug", DEBUG_OFFSET),
    ("cpu_string", CPU_STRING_OFFSET),
    ("vcpu", VCPU_OFFSET),
    ("max_vcpu", MAX_VCPU_OFFSET),
    ("cpu_weight", CPU_WEIGHT_OFFSET),
    ("cpu_capacity", CPU_CAPACITY_OFFSET),
    ("memory", MEMORY_OFFSET),
    ("memory_threshold", MEMORY_THRESHOLD_OFFSET),
    ("iomem", IOMEM_OFFSET),
    ("network", NETWORK_OFFSET),
];

/// Caller-facing options for a new workload.
///
/// Zero values for `max_vcpus` and `memory_threshold_mib` select defaults
/// when the message is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    pub name: String,
    pub image_path: String,
    pub pedestal: String,
    pub pedestal_config: String,
    pub debug: bool,
    pub cpu_set: String,
    pub vcpus: u32,
    pub max_vcpus: u32,
    pub cpu_weight: u32,
    pub cpu_capacity: u32,
    pub memory_mib: u32,
    pub memory_threshold_mib: u32,
    pub iomem: String,
    pub network: String,
}

impl CreateOptions {
    #[must_use]
    pub fn new(name: impl Into<String>, image_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_path: image_path.into(),
            ..Self::default()
        }
    }

    /// Options carrying a planned resource shape.
    #[must_use]
    pub fn from_plan(
        name: impl Into<String>,
        image_path: impl Into<String>,
        pedestal: PedestalKind,
        plan: &EssentialResource,
    ) -> Self {
        Self {
            pedestal: pedestal.as_str().to_string(),
            cpu_set: plan.client_cpuset.clone(),
            vcpus: plan.vcpus(),
            cpu_weight: plan.cpu_weight.unwrap_or(0),
            cpu_capacity: plan.cpu_capacity_percent.unwrap_or(0),
            memory_mib: plan.memory_max_mib.unwrap_or(0),
            network: plan.network_interfaces.join(","),
            ..Self::new(name, image_path)
        }
    }

    #[must_use]
    pub fn with_pedestal_config(mut self, path: impl Into<String>) -> Self {
        self.pedestal_config = path.into();
        self
    }

    #[must_use]
    pub fn with_max_vcpus(mut self, max_vcpus: u32) -> Self {
        self.max_vcpus = max_vcpus;
        self
    }

    #[must_use]
    pub fn with_memory_threshold(mut self, mib: u32) -> Self {
        self.memory_threshold_mib = mib;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_iomem(mut self, iomem: impl Into<String>) -> Self {
        self.iomem = iomem.into();
        self
    }
}

/// Create message with defaults resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMessage {
    pub name: String,
    pub image_path: String,
    pub pedestal: String,
    pub pedestal_config: String,
    pub debug: bool,
    pub cpu_set: String,
    pub vcpus: u32,
    pub max_vcpus: u32,
    pub cpu_weight: u32,
    pub cpu_capacity: u32,
    pub memory_mib: u32,
    pub memory_threshold_mib: u32,
    pub iomem: String,
    pub network: String,
}

impl From<CreateOptions> for CreateMessage {
    fn from(opts: CreateOptions) -> Self {
        Self::resolve(opts, DEFAULT_MIN_MEMORY_MIB)
    }
}

impl CreateMessage {
    /// Resolves defaults against a configured memory floor.
    ///
    /// A zero threshold becomes twice the memory size, or twice
    /// `min_memory_mib` when no memory size is given either.
    #[must_use]
    pub fn resolve(opts: CreateOptions, min_memory_mib: u32) -> Self {
        let max_vcpus = if opts.max_vcpus > 0 {
            opts.max_vcpus
        } else {
            DEFAULT_MAX_VCPUS
        };
        let memory_threshold_mib = match (opts.memory_threshold_mib, opts.memory_mib) {
            (0, 0) => min_memory_mib.saturating_mul(2),
            (0, memory) => memory.saturating_mul(2),
            (threshold, _) => threshold,
        };
        Self {
            name: opts.name,
            image_path: opts.image_path,
            pedestal: opts.pedestal,
            pedestal_config: opts.pedestal_config,
            debug: opts.debug,
            cpu_set: opts.cpu_set,
            vcpus: opts.vcpus,
            max_vcpus,
            cpu_weight: opts.cpu_weight,
            cpu_capacity: opts.cpu_capacity,
            memory_mib: opts.memory_mib,
            memory_threshold_mib,
            iomem: opts.iomem,
            network: opts.network,
        }
    }

    /// Serializes to the daemon's wire layout.
    #[must_use]
    pub fn pack(&self) -> [u8; CREATE_MESSAGE_LEN] {
        let mut buf = [0u8; CREATE_MESSAGE_LEN];
        put_str(&mut buf, NAME_OFFSET, NAME_FIELD_LEN, &self.name, "name");
        put_str(&mut buf, PATH_OFFSET, PATH_FIELD_LEN, &self.image_path, "path");
        put_str(&mut buf, PEDESTAL_OFFSET, PEDESTAL_FIELD_LEN, &self.pedestal, "pedestal");
        put_str(
            &mut buf,
            PEDESTAL_CONFIG_OFFSET,
            PEDESTAL_CONFIG_FIELD_LEN,
            &self.pedestal_config,
            "pedestal config",
        );
        buf[DEBUG_OFFSET] = u8::from(self.debug);
        put_str(&mut buf, CPU_STRING_OFFSET, CPU_STRING_FIELD_LEN, &self.cpu_set, "cpu");
        put_u32(&mut buf, VCPU_OFFSET, self.vcpus);
        put_u32(&mut buf, MAX_VCPU_OFFSET, self.max_vcpus);
        put_u32(&mut buf, CPU_WEIGHT_OFFSET, self.cpu_weight);
        put_u32(&mut buf, CPU_CAPACITY_OFFSET, self.cpu_capacity);
        put_u32(&mut buf, MEMORY_OFFSET, self.memory_mib);
        put_u32(&mut buf, MEMORY_THRESHOLD_OFFSET, self.memory_threshold_mib);
        put_str(&mut buf, IOMEM_OFFSET, IOMEM_FIELD_LEN, &self.iomem, "iomem");
        put_str(&mut buf, NETWORK_OFFSET, NETWORK_FIELD_LEN, &self.network, "network");
        buf
    }

    /// Decodes a packed message, as the daemon would see it.
    pub fn unpack(buf: &[u8]) -> Result<Self> {
        if buf.len() != CREATE_MESSAGE_LEN {
            return Err(Error::Serialization(format!(
                "create message must be {} bytes, got {}",
                CREATE_MESSAGE_LEN,
                buf.len()
            )));
        }
        Ok(Self {
            name: get_str(buf, NAME_OFFSET, NAME_FIELD_LEN),
            image_path: get_str(buf, PATH_OFFSET, PATH_FIELD_LEN),
            pedestal: get_str(buf, PEDESTAL_OFFSET, PEDESTAL_FIELD_LEN),
            pedestal_config: get_str(buf, PEDESTAL_CONFIG_OFFSET, PEDESTAL_CONFIG_FIELD_LEN),
            debug: buf[DEBUG_OFFSET] != 0,
            cpu_set: get_str(buf, CPU_STRING_OFFSET, CPU_STRING_FIELD_LEN),
            vcpus: get_u32(buf, VCPU_OFFSET),
            max_vcpus: get_u32(buf, MAX_VCPU_OFFSET),
            cpu_weight: get_u32(buf, CPU_WEIGHT_OFFSET),
            cpu_capacity: get_u32(buf, CPU_CAPACITY_OFFSET),
            memory_mib: get_u32(buf, MEMORY_OFFSET),
            memory_threshold_mib: get_u32(buf, MEMORY_THRESHOLD_OFFSET),
            iomem: get_str(buf, IOMEM_OFFSET, IOMEM_FIELD_LEN),
            network: get_str(buf, NETWORK_OFFSET, NETWORK_FIELD_LEN),
        })
    }
}

fn put_str(buf: &mut [u8], offset: usize, width: usize, value: &str, field: &str) {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        warn!(
            "{} {:?} exceeds {} bytes; truncating in create message",
            field, value, width
        );
    }
    let len = bytes.len().min(width);
    buf[offset..offset + len].copy_from_slice(&bytes[..len]);
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_str(buf: &[u8], offset: usize, width: usize) -> String {
    let field = &buf[offset..offset + width];
    let end = field.iter().position(|b| *b == 0).unwrap_or(width);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets() {
        assert_eq!(PATH_OFFSET, 66);
        assert_eq!(CPU_STRING_OFFSET, 595);
        assert_eq!(VCPU_OFFSET, 724);
        assert_eq!(IOMEM_OFFSET, 748);
        assert_eq!(NETWORK_OFFSET, 1260);
    }

    #[test]
    fn test_defaults_resolved() {
        let msg = CreateMessage::from(CreateOptions::new("zephyr", "/lib/firmware/zephyr.elf"));
        assert_eq!(msg.max_vcpus, 8);
        assert_eq!(msg.memory_threshold_mib, 32);

        let mut opts = CreateOptions::new("zephyr", "");
        opts.memory_mib = 48;
        assert_eq!(CreateMessage::from(opts.clone()).memory_threshold_mib, 96);
        let msg = CreateMessage::from(opts.with_memory_threshold(200).with_max_vcpus(2));
        assert_eq!(msg.memory_threshold_mib, 200);
        assert_eq!(msg.max_vcpus, 2);
    }

    #[test]
    fn test_integer_fields_little_endian() {
        let mut opts = CreateOptions::new("uniproton", "/tmp/u.elf");
        opts.vcpus = 2;
        opts.cpu_weight = 0x0102_0304;
        opts.cpu_capacity = 150;
        opts.memory_mib = 64;
        let buf = CreateMessage::from(opts).pack();
        assert_eq!(buf.len(), CREATE_MESSAGE_LEN);
        assert_eq!(&buf[CPU_WEIGHT_OFFSET..CPU_WEIGHT_OFFSET + 4], &[4, 3, 2, 1]);
        assert_eq!(get_u32(&buf, VCPU_OFFSET), 2);
        assert_eq!(get_u32(&buf, MAX_VCPU_OFFSET), 8);
        assert_eq!(get_u32(&buf, CPU_CAPACITY_OFFSET), 150);
        assert_eq!(get_u32(&buf, MEMORY_OFFSET), 64);
        assert_eq!(get_u32(&buf, MEMORY_THRESHOLD_OFFSET), 128);
        assert_eq!(buf[723], 0, "padding byte must stay zero");
    }

    #[test]
    fn test_overlong_strings_truncated() {
        let mut opts = CreateOptions::new("n".repeat(200), "p".repeat(300));
        opts.pedestal = "a-very-long-pedestal-name".to_string();
        opts.cpu_set = "0,".repeat(100);
        let buf = CreateMessage::from(opts).pack();
        assert_eq!(buf.len(), CREATE_MESSAGE_LEN);
        let back = CreateMessage::unpack(&buf).unwrap();
        assert_eq!(back.name.len(), NAME_FIELD_LEN);
        assert_eq!(back.image_path.len(), PATH_FIELD_LEN);
        assert_eq!(back.pedestal, "a-very-long-pede");
        // Neighbouring integer fields are untouched by the overflow.
        assert_eq!(back.vcpus, 0);
        assert_eq!(back.max_vcpus, 8);
    }

    #[test]
    fn test_from_plan() {
        let plan = EssentialResource {
            cpu_capacity_percent: Some(200),
            cpu_weight: Some(512),
            client_cpuset: "2-3".to_string(),
            vcpu_count: Some(2),
            memory_max_mib: Some(64),
            memory_min_mib: 0,
            network_interfaces: vec!["vif0".into(), "vif1".into()],
        };
        let opts = CreateOptions::from_plan("z", "/img", PedestalKind::Xen, &plan);
        assert_eq!(opts.pedestal, "xen");
        assert_eq!(opts.cpu_set, "2-3");
        assert_eq!(opts.network, "vif0,vif1");
        let msg = CreateMessage::from(opts);
        assert_eq!(msg.memory_threshold_mib, 128);
    }

    #[test]
    fn test_unpack_rejects_wrong_length() {
        assert!(CreateMessage::unpack(&[0u8; 10]).is_err());
    }
}
