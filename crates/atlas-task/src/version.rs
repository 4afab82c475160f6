//! Kernel Versions and the Device Boundary
//!
//! A [`Version`] is one compiled variant of a task's kernel, keyed by device
//! type, workgroup size and a free-form detail string. Code generators
//! implement [`Skeleton`]; the device runtime implements [`DeviceEnv`] and
//! [`DeviceQueue`]. Argument marshalling uses [`KernelArg`], one shape per
//! hold type.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use atlas_core::meta::GroupSize;
use atlas_core::runtime::Runtime;
use atlas_core::value::Value;
use atlas_fusion::cluster::Cluster;

use crate::block::EntryId;
use crate::error::Result;

// =============================================================================
// Device Types
// =============================================================================

/// Class of device a version targets. `All` acts as a wildcard in lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Matches any device.
    All,
    /// Host CPU.
    Cpu,
    /// Discrete or integrated GPU.
    Gpu,
    /// Other accelerator.
    Accelerator,
}

// =============================================================================
// Version
// =============================================================================

/// One compiled kernel variant of a task.
#[derive(Debug, Clone)]
pub struct Version {
    /// Targeted device class.
    pub device: DeviceType,
    /// Workgroup extent per dimension.
    pub group_size: GroupSize,
    /// Free-form variant tag; empty for the default variant.
    pub detail: String,
    /// Emitted kernel source.
    pub source: String,
    /// Device shared-memory bytes the kernel requires.
    pub shared_size: usize,
    /// Version-specific trailing kernel arguments.
    pub extra_args: Vec<i32>,
    /// Compiled kernel handle, once the device runtime built one.
    pub kernel: Option<u64>,
}

impl Version {
    /// Whether this version satisfies a lookup with wildcard semantics:
    /// `All` matches any device, an empty group or detail matches anything.
    pub fn matches(&self, device: DeviceType, group: &[i32], detail: &str) -> bool {
        let device_ok = device == DeviceType::All || self.device == device;
        let group_ok = group.is_empty() || self.group_size == group;
        let detail_ok = detail.is_empty() || self.detail == detail;
        device_ok && group_ok && detail_ok
    }
}

// =============================================================================
// Code Generation and Device Boundary
// =============================================================================

/// What a skeleton emits for one version.
#[derive(Debug, Clone, Default)]
pub struct KernelSource {
    /// Kernel source text.
    pub source: String,
    /// Device shared-memory bytes.
    pub shared_size: usize,
    /// Version-specific trailing arguments.
    pub extra_args: Vec<i32>,
}

/// A kernel code generator, chosen per cluster pattern by the embedder.
pub trait Skeleton {
    /// Emits kernel code for `cluster` targeting `device`.
    fn emit(&mut self, runtime: &Runtime, cluster: &Cluster, device: DeviceType) -> KernelSource;
}

/// The devices available to the engine.
pub trait DeviceEnv {
    /// Device classes versions should be generated for.
    fn devices(&self) -> Vec<DeviceType>;
}

/// One kernel argument, shaped by the hold type of its block.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelArg {
    /// A device buffer, or null for out-of-range blocks.
    Mem(Option<EntryId>),
    /// A scalar cell value.
    Scalar(Value),
    /// A fixed-value flag.
    Flag(bool),
    /// A byte offset into a reduction page.
    Offset(i32),
    /// A trailing integer argument (sizes, coordinates, extras).
    Int(i32),
}

/// The device runtime's kernel queue.
pub trait DeviceQueue {
    /// Enqueues one kernel invocation.
    fn enqueue(
        &self,
        version: &Version,
        global_work: &[usize],
        local_work: &[usize],
        args: &[KernelArg],
    ) -> Result<()>;

    /// Blocks until all enqueued kernels completed.
    fn finish(&self) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn version(device: DeviceType, group: &[i32], detail: &str) -> Version {
        Version {
            device,
            group_size: group.to_vec(),
            detail: detail.to_owned(),
            source: String::new(),
            shared_size: 0,
            extra_args: Vec::new(),
            kernel: None,
        }
    }

    #[test]
    fn test_wildcard_matching() {
        let v = version(DeviceType::Gpu, &[16, 16], "vectorized");
        assert!(v.matches(DeviceType::All, &[], ""));
        assert!(v.matches(DeviceType::Gpu, &[16, 16], "vectorized"));
        assert!(!v.matches(DeviceType::Cpu, &[], ""));
        assert!(!v.matches(DeviceType::Gpu, &[8, 8], ""));
        assert!(!v.matches(DeviceType::Gpu, &[], "scalarized"));
    }
}
