use serde::{Deserialize, Serialize};

use super::field::Field;

/// Metrics queried once per device, assumed constant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticInfo {
    pub device_name: Field<String>,
    pub max_pcie_gen: Field<u32>,
    pub max_pcie_link_width: Field<u32>,
    /// Celsius
    pub temperature_shutdown_threshold: Field<u32>,
    /// Celsius
    pub temperature_slowdown_threshold: Field<u32>,
}

/// Metrics re-queried on every polling cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicInfo {
    /// MHz
    pub gpu_clock_speed: Field<u32>,
    pub gpu_clock_speed_max: Field<u32>,
    pub mem_clock_speed: Field<u32>,
    pub mem_clock_speed_max: Field<u32>,
    /// Percent
    pub gpu_util_rate: Field<u32>,
    pub mem_util_rate: Field<u32>,
    pub encoder_rate: Field<u32>,
    pub decoder_rate: Field<u32>,
    /// Bytes
    pub total_memory: Field<u64>,
    pub used_memory: Field<u64>,
    pub free_memory: Field<u64>,
    pub pcie_link_gen: Field<u32>,
    pub pcie_link_width: Field<u32>,
    /// Bytes transferred during the last sampling second
    pub pcie_rx: Field<u64>,
    pub pcie_tx: Field<u64>,
    /// Percent of the maximum fan speed
    pub fan_speed: Field<u32>,
    /// Celsius
    pub gpu_temp: Field<u32>,
    /// Milliwatts
    pub power_draw: Field<u32>,
    pub power_draw_max: Field<u32>,
}

impl DynamicInfo {
    /// Mark every field absent before a refresh.
    pub fn reset(&mut self) {
        *self = DynamicInfo::default();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessType {
    #[default]
    Graphical,
    Compute,
}

/// One process using one device during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuProcess {
    pub pid: u32,
    pub process_type: ProcessType,
    /// Bytes
    pub gpu_memory_usage: Field<u64>,
    pub gpu_memory_percentage: Field<u32>,
    /// Graphics and compute engines, percent
    pub gpu_usage: Field<u32>,
    pub encode_usage: Field<u32>,
    pub decode_usage: Field<u32>,
    /// Cumulative engine busy time in nanoseconds, as reported by the driver
    pub gfx_engine_used: Field<u64>,
    pub compute_engine_used: Field<u64>,
    pub enc_engine_used: Field<u64>,
    pub dec_engine_used: Field<u64>,
    pub cpu_usage: Field<u32>,
    /// Bytes
    pub cpu_memory_res: Field<u64>,
    pub cpu_memory_virt: Field<u64>,
    pub cmdline: Field<String>,
    pub user_name: Field<String>,
}

impl GpuProcess {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }

    /// Add the usage fields present in `other` onto this record.
    ///
    /// Used when several file descriptors of one process report on the same
    /// device. The process type is taken from `other`.
    pub fn accumulate(&mut self, other: &GpuProcess) {
        self.process_type = other.process_type;
        add_into(&mut self.gpu_memory_usage, &other.gpu_memory_usage);
        add_into(&mut self.gpu_usage, &other.gpu_usage);
        add_into(&mut self.encode_usage, &other.encode_usage);
        add_into(&mut self.decode_usage, &other.decode_usage);
        add_into(&mut self.gfx_engine_used, &other.gfx_engine_used);
        add_into(&mut self.compute_engine_used, &other.compute_engine_used);
        add_into(&mut self.enc_engine_used, &other.enc_engine_used);
        add_into(&mut self.dec_engine_used, &other.dec_engine_used);
    }
}

fn add_into<T>(target: &mut Field<T>, addend: &Field<T>)
where
    T: Copy + Default + std::ops::Add<Output = T>,
{
    if let Some(value) = addend.get() {
        let base = target.get().unwrap_or_default();
        target.set(base + value);
    }
}
