use std::path::PathBuf;

use crate::platform::fdinfo::FdinfoSweeper;
use crate::platform::process_info::SysinfoProcessSource;

use super::backfill;
use super::process_cache::{ProcessInfoCache, ProcessInfoSource};
use super::registry::VendorRegistry;
use super::snapshot::{DeviceSnapshot, GpuSnapshot};
use super::vendor::{DeviceMask, GpuDevice};

/// Configuration for GPU metrics collection
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub device_mask: DeviceMask,
    pub collect_processes: bool,
    pub proc_root: PathBuf,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            device_mask: DeviceMask::all(),
            collect_processes: true,
            proc_root: PathBuf::from("/proc"),
        }
    }
}

/// Owns the vendor registry, the device handles and the process cache, and
/// runs the polling cycle over them.
pub struct GpuCollector {
    registry: VendorRegistry,
    devices: Vec<GpuDevice>,
    process_cache: ProcessInfoCache,
    sweeper: FdinfoSweeper,
    config: CollectorConfig,
}

impl GpuCollector {
    /// Enumerate devices from every vendor in `registry`
    pub fn new(registry: VendorRegistry, config: CollectorConfig) -> Self {
        Self::with_process_source(registry, config, Box::new(SysinfoProcessSource::new()))
    }

    pub fn with_process_source(
        mut registry: VendorRegistry,
        config: CollectorConfig,
        source: Box<dyn ProcessInfoSource>,
    ) -> Self {
        let devices = registry.init_info_extraction(config.device_mask);
        let sweeper = FdinfoSweeper::new(config.proc_root.clone());

        Self {
            registry,
            devices,
            process_cache: ProcessInfoCache::new(source),
            sweeper,
            config,
        }
    }

    pub fn devices(&self) -> &[GpuDevice] {
        &self.devices
    }

    pub fn registry(&self) -> &VendorRegistry {
        &self.registry
    }

    pub fn process_cache(&self) -> &ProcessInfoCache {
        &self.process_cache
    }

    /// Query the per-device constants. Called once after construction.
    pub fn populate_static_infos(&mut self) {
        for device in self.devices.iter_mut() {
            device.populate_static_info();
        }
    }

    pub fn refresh_dynamic_info(&mut self) {
        for device in self.devices.iter_mut() {
            device.refresh_dynamic_info();
        }
    }

    /// Rebuild every device's process list and reconcile the process cache.
    pub fn refresh_processes(&mut self) {
        for device in self.devices.iter_mut() {
            device.processes.clear();
        }
        if !self.config.collect_processes {
            return;
        }

        // One walk of /proc serves every device
        self.sweeper.sweep(&mut self.devices);

        for device in self.devices.iter_mut() {
            device.refresh_running_processes();
            let total_memory = device.dynamic_info.total_memory.get();
            self.process_cache
                .populate_process_info(&mut device.processes, total_memory);
        }
        self.process_cache.end_cycle();
    }

    pub fn fix_dynamic_info_from_process_info(&mut self) {
        backfill::fix_dynamic_info_from_process_info(&mut self.devices);
    }

    /// Run one complete polling cycle
    pub fn refresh(&mut self) {
        self.refresh_dynamic_info();
        self.refresh_processes();
        self.fix_dynamic_info_from_process_info();
    }

    pub fn snapshot(&self) -> GpuSnapshot {
        GpuSnapshot {
            timestamp: chrono::Utc::now().timestamp(),
            devices: self
                .devices
                .iter()
                .map(|device| DeviceSnapshot {
                    vendor: self.registry.vendor_name(device.vendor).to_string(),
                    static_info: device.static_info.clone(),
                    dynamic_info: device.dynamic_info.clone(),
                    processes: device.processes.clone(),
                })
                .collect(),
        }
    }

    /// Messages from vendors that could not be used, for diagnostics
    pub fn vendor_errors(&self) -> Vec<(&'static str, String)> {
        self.registry
            .iter()
            .map(|vendor| (vendor.name(), vendor.last_error_string()))
            .collect()
    }

    /// Release devices and vendor resources. Safe to call more than once.
    pub fn shutdown(&mut self) {
        let devices = std::mem::take(&mut self.devices);
        self.registry
            .shutdown_info_extraction(devices, &mut self.process_cache);
    }
}

impl Drop for GpuCollector {
    fn drop(&mut self) {
        self.shutdown();
    }
}
