use std::rc::Rc;

use nvml_wrapper::enum_wrappers::device::{Clock, PcieUtilCounter, TemperatureSensor, TemperatureThreshold};
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::struct_wrappers::device::ProcessInfo;
use nvml_wrapper::{Device, Nvml};

use crate::core::gpuinfo::{
    DeviceBackend, DeviceMask, DynamicInfo, GpuProcess, GpuVendor, ProcessType, StaticInfo,
};
use crate::error::{GpuscopeError, Result};

/// NVIDIA GPUs through NVML
pub struct NvidiaGpuVendor {
    nvml: Option<Rc<Nvml>>,
    last_error: Option<String>,
}

impl NvidiaGpuVendor {
    pub fn new() -> Self {
        Self {
            nvml: None,
            last_error: Some("NVIDIA backend was not initialized".to_string()),
        }
    }
}

impl Default for NvidiaGpuVendor {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuVendor for NvidiaGpuVendor {
    fn name(&self) -> &'static str {
        "NVIDIA"
    }

    fn init(&mut self) -> Result<()> {
        let nvml = Nvml::init().inspect_err(|e| self.last_error = Some(e.to_string()))?;
        self.nvml = Some(Rc::new(nvml));
        self.last_error = None;
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.nvml.take().is_some() {
            self.last_error = Some("NVIDIA backend was not initialized".to_string());
        }
    }

    fn last_error_string(&self) -> String {
        self.last_error
            .clone()
            .unwrap_or_else(|| "An unanticipated error occurred while accessing NVML".to_string())
    }

    fn enumerate_devices(&mut self, mask: &mut DeviceMask) -> Result<Vec<Box<dyn DeviceBackend>>> {
        let nvml = self
            .nvml
            .clone()
            .ok_or_else(|| GpuscopeError::vendor_init("NVML is not loaded"))?;
        let count = nvml
            .device_count()
            .inspect_err(|e| self.last_error = Some(e.to_string()))?;

        let mut backends: Vec<Box<dyn DeviceBackend>> = Vec::new();
        for index in 0..count {
            if !mask.take() {
                log::debug!("NVIDIA GPU {} excluded by device mask", index);
                continue;
            }
            match nvml.device_by_index(index) {
                Ok(_) => backends.push(Box::new(NvidiaDevice {
                    nvml: Rc::clone(&nvml),
                    index,
                    last_sample_timestamp: 0,
                })),
                Err(e) => log::debug!("Skipping NVIDIA GPU {}: {}", index, e),
            }
        }
        Ok(backends)
    }
}

pub struct NvidiaDevice {
    nvml: Rc<Nvml>,
    index: u32,
    last_sample_timestamp: u64,
}

impl NvidiaDevice {
    fn device(&self) -> Option<Device<'_>> {
        self.nvml.device_by_index(self.index).ok()
    }
}

fn push_processes(processes: &mut Vec<GpuProcess>, infos: Vec<ProcessInfo>, process_type: ProcessType) {
    for info in infos {
        if processes.iter().any(|p| p.pid == info.pid) {
            continue;
        }
        let mut process = GpuProcess::new(info.pid);
        process.process_type = process_type;
        if let UsedGpuMemory::Used(bytes) = info.used_gpu_memory {
            process.gpu_memory_usage.set(bytes);
        }
        processes.push(process);
    }
}

impl DeviceBackend for NvidiaDevice {
    fn populate_static_info(&mut self, info: &mut StaticInfo) {
        let Some(device) = self.device() else {
            return;
        };

        if let Ok(name) = device.name() {
            info.device_name.set(name);
        }
        if let Ok(generation) = device.max_pcie_link_gen() {
            info.max_pcie_gen.set(generation);
        }
        if let Ok(width) = device.max_pcie_link_width() {
            info.max_pcie_link_width.set(width);
        }
        if let Ok(slowdown) = device.temperature_threshold(TemperatureThreshold::Slowdown) {
            info.temperature_slowdown_threshold.set(slowdown);
        }
        if let Ok(shutdown) = device.temperature_threshold(TemperatureThreshold::Shutdown) {
            info.temperature_shutdown_threshold.set(shutdown);
        }
    }

    fn refresh_dynamic_info(&mut self, info: &mut DynamicInfo) {
        let Some(device) = self.device() else {
            return;
        };

        if let Ok(clock) = device.clock_info(Clock::Graphics) {
            info.gpu_clock_speed.set(clock);
        }
        if let Ok(clock) = device.max_clock_info(Clock::Graphics) {
            info.gpu_clock_speed_max.set(clock);
        }
        if let Ok(clock) = device.clock_info(Clock::Memory) {
            info.mem_clock_speed.set(clock);
        }
        if let Ok(clock) = device.max_clock_info(Clock::Memory) {
            info.mem_clock_speed_max.set(clock);
        }

        if let Ok(utilization) = device.utilization_rates() {
            info.gpu_util_rate.set(utilization.gpu);
            info.mem_util_rate.set(utilization.memory);
        }
        if let Ok(encoder) = device.encoder_utilization() {
            info.encoder_rate.set(encoder.utilization);
        }
        if let Ok(decoder) = device.decoder_utilization() {
            info.decoder_rate.set(decoder.utilization);
        }

        if let Ok(memory) = device.memory_info() {
            info.total_memory.set(memory.total);
            info.used_memory.set(memory.used);
            info.free_memory.set(memory.free);
        }

        if let Ok(generation) = device.current_pcie_link_gen() {
            info.pcie_link_gen.set(generation);
        }
        if let Ok(width) = device.current_pcie_link_width() {
            info.pcie_link_width.set(width);
        }
        // KB/s
        if let Ok(rx) = device.pcie_throughput(PcieUtilCounter::Receive) {
            info.pcie_rx.set(rx as u64 * 1024);
        }
        if let Ok(tx) = device.pcie_throughput(PcieUtilCounter::Send) {
            info.pcie_tx.set(tx as u64 * 1024);
        }

        if let Ok(fan) = device.fan_speed(0) {
            info.fan_speed.set(fan);
        }
        if let Ok(temperature) = device.temperature(TemperatureSensor::Gpu) {
            info.gpu_temp.set(temperature);
        }
        if let Ok(power) = device.power_usage() {
            info.power_draw.set(power);
        }
        if let Ok(limit) = device.enforced_power_limit() {
            info.power_draw_max.set(limit);
        }
    }

    fn refresh_running_processes(&mut self, processes: &mut Vec<GpuProcess>) {
        let nvml = Rc::clone(&self.nvml);
        let Ok(device) = nvml.device_by_index(self.index) else {
            return;
        };

        if let Ok(compute) = device.running_compute_processes() {
            push_processes(processes, compute, ProcessType::Compute);
        }
        if let Ok(graphics) = device.running_graphics_processes() {
            push_processes(processes, graphics, ProcessType::Graphical);
        }

        // Samples taken since the previous refresh
        let Ok(samples) = device.process_utilization_stats(self.last_sample_timestamp) else {
            return;
        };
        for sample in samples {
            self.last_sample_timestamp = self.last_sample_timestamp.max(sample.timestamp);
            if let Some(process) = processes.iter_mut().find(|p| p.pid == sample.pid) {
                process.gpu_usage.set(sample.sm_util.min(100));
                process.encode_usage.set(sample.enc_util.min(100));
                process.decode_usage.set(sample.dec_util.min(100));
            }
        }
    }
}
