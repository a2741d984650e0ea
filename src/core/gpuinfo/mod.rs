//! GPU information extraction.
//!
//! This module holds the vendor-independent half of the collector: the
//! validity-tagged device and process records, the vendor plugin traits and
//! their registry, the cross-cycle process cache and the aggregate backfill.
//! Hardware backends live in the platform layer.

pub mod backfill;
mod collector;
pub mod field;
pub mod process_cache;
mod registry;
mod snapshot;
mod types;
mod vendor;

pub use collector::{CollectorConfig, GpuCollector};
pub use field::Field;
pub use process_cache::{CpuSample, ProcessInfoCache, ProcessInfoSource};
pub use registry::VendorRegistry;
pub use snapshot::{DeviceSnapshot, GpuSnapshot};
pub use types::{DynamicInfo, GpuProcess, ProcessType, StaticInfo};
pub use vendor::{DeviceBackend, DeviceMask, GpuDevice, GpuVendor, VendorId};
