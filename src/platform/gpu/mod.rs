//! GPU-specific platform code.
//!
//! Provides the vendor backends known to this build.
//! Supports AMD (via libdrm, Linux only) and NVIDIA (via NVML, `nvml` feature).

#[cfg(target_os = "linux")]
pub mod amd;
#[cfg(feature = "nvml")]
pub mod nvidia;

#[cfg(target_os = "linux")]
pub use amd::AmdGpuVendor;
#[cfg(feature = "nvml")]
pub use nvidia::NvidiaGpuVendor;

use crate::core::gpuinfo::VendorRegistry;

/// Registry with every vendor backend compiled into this build
///
/// Vendors are enumerated in registration order, which also decides how the
/// device mask bits map to devices:
/// 1. AMD
/// 2. NVIDIA
pub fn default_registry() -> VendorRegistry {
    #[allow(unused_mut)]
    let mut registry = VendorRegistry::new();

    #[cfg(target_os = "linux")]
    registry.register(Box::new(AmdGpuVendor::new()));

    #[cfg(feature = "nvml")]
    registry.register(Box::new(NvidiaGpuVendor::new()));

    registry
}
