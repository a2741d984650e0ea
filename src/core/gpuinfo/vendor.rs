use serde::{Deserialize, Serialize};

use super::types::{DynamicInfo, GpuProcess, StaticInfo};
use crate::error::Result;

/// Trait implemented by every hardware backend.
///
/// A vendor is registered once in a [`VendorRegistry`](super::VendorRegistry)
/// and asked to enumerate its devices at startup. Device-level operations go
/// through the [`DeviceBackend`] objects it hands back.
pub trait GpuVendor {
    /// Stable vendor name, also used to make registration idempotent
    fn name(&self) -> &'static str;

    /// Load the driver interface. Failing here disables the vendor.
    fn init(&mut self) -> Result<()>;

    /// Release everything acquired by `init`. Must be safe to call more than once.
    fn shutdown(&mut self);

    /// Human readable description of the last failure, for diagnostics
    fn last_error_string(&self) -> String;

    /// Discover this vendor's devices.
    ///
    /// One bit of `mask` is consumed per device matching this vendor, before
    /// any attempt to open it; a cleared bit excludes the device.
    fn enumerate_devices(&mut self, mask: &mut DeviceMask) -> Result<Vec<Box<dyn DeviceBackend>>>;
}

/// Vendor-private side of one device handle.
///
/// Owns the resources opened for the device (file descriptors, sensor files,
/// driver contexts) and releases them on drop.
pub trait DeviceBackend {
    fn populate_static_info(&mut self, info: &mut StaticInfo);

    fn refresh_dynamic_info(&mut self, info: &mut DynamicInfo);

    /// Called once per cycle after the fdinfo sweep.
    ///
    /// Backends fed by the sweep use it to rotate their caches; others fill
    /// `processes` directly.
    fn refresh_running_processes(&mut self, processes: &mut Vec<GpuProcess>);

    /// Whether [`DeviceBackend::parse_fdinfo`] should be offered fdinfo files
    fn has_fdinfo_parser(&self) -> bool {
        false
    }

    /// Parse one DRM fdinfo text into `process`.
    ///
    /// Returns `false` when the descriptor belongs to another device.
    fn parse_fdinfo(&mut self, _fdinfo: &str, _process: &mut GpuProcess) -> bool {
        false
    }
}

/// Index of a vendor inside its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VendorId(pub usize);

/// Bitmask selecting which matched devices get opened.
///
/// Shared across vendors: bit `i` gates the `i`-th matched device of the
/// whole enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMask(i64);

impl DeviceMask {
    pub const fn all() -> Self {
        DeviceMask(-1)
    }

    pub const fn from_bits(bits: i64) -> Self {
        DeviceMask(bits)
    }

    pub const fn bits(&self) -> i64 {
        self.0
    }

    /// Consume the next bit and report whether it was set.
    pub fn take(&mut self) -> bool {
        let selected = self.0 & 1 == 1;
        self.0 >>= 1;
        selected
    }
}

impl Default for DeviceMask {
    fn default() -> Self {
        Self::all()
    }
}

/// In-memory handle for one discovered GPU.
pub struct GpuDevice {
    pub vendor: VendorId,
    pub static_info: StaticInfo,
    pub dynamic_info: DynamicInfo,
    pub processes: Vec<GpuProcess>,
    backend: Box<dyn DeviceBackend>,
}

impl GpuDevice {
    pub fn new(vendor: VendorId, backend: Box<dyn DeviceBackend>) -> Self {
        Self {
            vendor,
            static_info: StaticInfo::default(),
            dynamic_info: DynamicInfo::default(),
            processes: Vec::new(),
            backend,
        }
    }

    pub fn populate_static_info(&mut self) {
        self.static_info = StaticInfo::default();
        self.backend.populate_static_info(&mut self.static_info);
    }

    pub fn refresh_dynamic_info(&mut self) {
        self.dynamic_info.reset();
        self.backend.refresh_dynamic_info(&mut self.dynamic_info);
    }

    pub fn refresh_running_processes(&mut self) {
        self.backend.refresh_running_processes(&mut self.processes);
    }

    pub fn has_fdinfo_parser(&self) -> bool {
        self.backend.has_fdinfo_parser()
    }

    pub fn parse_fdinfo(&mut self, fdinfo: &str, process: &mut GpuProcess) -> bool {
        self.backend.parse_fdinfo(fdinfo, process)
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice")
            .field("vendor", &self.vendor)
            .field("static_info", &self.static_info)
            .field("dynamic_info", &self.dynamic_info)
            .field("processes", &self.processes)
            .finish_non_exhaustive()
    }
}
