// Core business logic module

pub mod gpuinfo;

// Re-export commonly used items
pub use gpuinfo::{CollectorConfig, GpuCollector, GpuSnapshot, VendorRegistry};
