use serde::{Deserialize, Serialize};

use super::types::{DynamicInfo, GpuProcess, StaticInfo};

/// Everything gathered during one polling cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub timestamp: i64, // Unix timestamp
    pub devices: Vec<DeviceSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub vendor: String,
    pub static_info: StaticInfo,
    pub dynamic_info: DynamicInfo,
    pub processes: Vec<GpuProcess>,
}
