//! AMD GPUs through the amdgpu kernel driver.
//!
//! Device discovery and sensor queries go through libdrm / libdrm_amdgpu,
//! which are loaded at runtime. Fan, PCIe and power-cap readings come from
//! sysfs, per-process usage from DRM fdinfo.

mod fdinfo;
mod libdrm;
mod sysfs;

pub use fdinfo::{busy_percent, AmdFdinfoParser, ClientKey};
pub use sysfs::{parse_pcie_bw, parse_pp_dpm_pcie, pcie_gen_from_link_speed, SysfsSensors};

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::rc::Rc;

use crate::core::gpuinfo::{DeviceBackend, DeviceMask, DynamicInfo, GpuProcess, GpuVendor, StaticInfo};
use crate::error::{GpuscopeError, Result};

use libdrm::{
    AmdgpuContext, LibDrm, LibDrmAmdgpu, PciDrmDevice, AMDGPU_INFO_SENSOR_GFX_MCLK,
    AMDGPU_INFO_SENSOR_GFX_SCLK, AMDGPU_INFO_SENSOR_GPU_AVG_POWER, AMDGPU_INFO_SENSOR_GPU_LOAD,
    AMDGPU_INFO_SENSOR_GPU_TEMP,
};

const VENDOR_AMD: u16 = 0x1002;
const PCI_DEVICES_DIR: &str = "/sys/bus/pci/devices";

/// Marketing-style suffix for a `family_id` from `amdgpu_gpu_info`
pub fn family_suffix(family_id: u32) -> Option<&'static str> {
    let suffix = match family_id {
        110 => " (Hainan / Oland / Verde / Pitcairn / Tahiti)",
        120 => " (Bonaire / Hawaii)",
        125 => " (Kaveri / Kabini / Mullins)",
        130 => " (Iceland / Tonga)",
        135 => " (Carrizo / Stoney)",
        141 => " (Vega10)",
        142 => " (Raven)",
        143 => " (Navi10)",
        144 => " (Van Gogh)",
        146 => " (Yellow Carp)",
        _ => return None,
    };
    Some(suffix)
}

pub struct AmdGpuVendor {
    libdrm: Option<Rc<LibDrm>>,
    libdrm_amdgpu: Option<Rc<LibDrmAmdgpu>>,
    last_error: Option<String>,
}

impl AmdGpuVendor {
    pub fn new() -> Self {
        Self {
            libdrm: None,
            libdrm_amdgpu: None,
            last_error: Some("AMD backend was not initialized".to_string()),
        }
    }

    fn open_device(&self, libdrm: &Rc<LibDrm>, device: &PciDrmDevice) -> Result<AmdDevice> {
        let file = [&device.render_node, &device.primary_node]
            .into_iter()
            .flatten()
            .find_map(|node| open_node(node))
            .ok_or_else(|| GpuscopeError::drm("no usable DRM node"))?;
        let fd = file.as_raw_fd();

        let version = libdrm
            .driver_version(fd)
            .ok_or_else(|| GpuscopeError::drm("drmGetVersion failed"))?;
        if version.name != "amdgpu" {
            return Err(GpuscopeError::drm(format!("unsupported driver {}", version.name)));
        }

        libdrm.authenticate(fd);

        let amdgpu = self
            .libdrm_amdgpu
            .as_ref()
            .ok_or_else(|| GpuscopeError::library_load("libdrm_amdgpu is not available"))?;
        let context = AmdgpuContext::initialize(amdgpu, fd)?;

        let pdev = device.pci_address();
        let sysfs = SysfsSensors::new(Path::new(PCI_DEVICES_DIR).join(&pdev));
        log::debug!("Opened AMD GPU {} ({})", pdev, version.description);

        Ok(AmdDevice {
            fdinfo: AmdFdinfoParser::new(pdev),
            sysfs,
            context,
            _file: file,
            driver_description: version.description,
            _libdrm: Rc::clone(libdrm),
        })
    }
}

impl Default for AmdGpuVendor {
    fn default() -> Self {
        Self::new()
    }
}

fn open_node(node: &Path) -> Option<File> {
    match OpenOptions::new().read(true).write(true).open(node) {
        Ok(file) => Some(file),
        Err(e) => {
            log::debug!("Cannot open {}: {}", node.display(), e);
            None
        }
    }
}

impl GpuVendor for AmdGpuVendor {
    fn name(&self) -> &'static str {
        "AMD"
    }

    fn init(&mut self) -> Result<()> {
        let libdrm = LibDrm::load().inspect_err(|e| self.last_error = Some(e.to_string()))?;

        match LibDrmAmdgpu::load() {
            Ok(lib) => self.libdrm_amdgpu = Some(lib),
            Err(e) => log::info!("libdrm_amdgpu unavailable, AMD devices cannot be opened: {}", e),
        }

        self.libdrm = Some(libdrm);
        self.last_error = None;
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.libdrm.take().is_some() {
            self.last_error = Some("AMD backend was not initialized".to_string());
        }
        self.libdrm_amdgpu = None;
    }

    fn last_error_string(&self) -> String {
        self.last_error.clone().unwrap_or_else(|| {
            "An unanticipated error occurred while accessing AMDGPU information".to_string()
        })
    }

    fn enumerate_devices(&mut self, mask: &mut DeviceMask) -> Result<Vec<Box<dyn DeviceBackend>>> {
        let libdrm = self
            .libdrm
            .clone()
            .ok_or_else(|| GpuscopeError::vendor_init("libdrm is not loaded"))?;

        let devices = libdrm
            .pci_devices()
            .inspect_err(|e| self.last_error = Some(e.to_string()))?;

        let mut backends: Vec<Box<dyn DeviceBackend>> = Vec::new();
        for device in devices.iter().filter(|d| d.vendor_id == VENDOR_AMD) {
            if !mask.take() {
                log::debug!("AMD GPU {} excluded by device mask", device.pci_address());
                continue;
            }
            match self.open_device(&libdrm, device) {
                Ok(amd) => backends.push(Box::new(amd)),
                Err(e) => log::debug!("Skipping AMD GPU {}: {}", device.pci_address(), e),
            }
        }

        Ok(backends)
    }
}

/// One opened amdgpu device.
///
/// Field order matters: the amdgpu context is torn down before the DRM file
/// descriptor is closed.
pub struct AmdDevice {
    fdinfo: AmdFdinfoParser,
    sysfs: SysfsSensors,
    context: AmdgpuContext,
    _file: File,
    driver_description: String,
    _libdrm: Rc<LibDrm>,
}

impl AmdDevice {
    fn device_name(&self) -> Option<String> {
        if let Some(name) = self.context.marketing_name().filter(|n| !n.is_empty()) {
            return Some(name);
        }
        if self.driver_description.is_empty() {
            return None;
        }

        let mut name = self.driver_description.clone();
        if let Some(suffix) = self.context.gpu_info().and_then(|info| family_suffix(info.family_id)) {
            name.push_str(suffix);
        }
        Some(name)
    }
}

impl DeviceBackend for AmdDevice {
    fn populate_static_info(&mut self, info: &mut StaticInfo) {
        if let Some(name) = self.device_name() {
            info.device_name.set(name);
        }
        self.sysfs.populate_static_info(info);
    }

    fn refresh_dynamic_info(&mut self, info: &mut DynamicInfo) {
        let ctx = &self.context;

        if let Some(sclk) = ctx.sensor(AMDGPU_INFO_SENSOR_GFX_SCLK) {
            info.gpu_clock_speed.set(sclk);
        }
        if let Some(mclk) = ctx.sensor(AMDGPU_INFO_SENSOR_GFX_MCLK) {
            info.mem_clock_speed.set(mclk);
        }
        if let Some(gpu_info) = ctx.gpu_info() {
            info.gpu_clock_speed_max.set((gpu_info.max_engine_clk / 1000) as u32);
            info.mem_clock_speed_max.set((gpu_info.max_memory_clk / 1000) as u32);
        }
        if let Some(load) = ctx.sensor(AMDGPU_INFO_SENSOR_GPU_LOAD) {
            info.gpu_util_rate.set(load);
        }

        if let Some(memory) = ctx.memory_info() {
            let vram = memory.vram;
            let free = vram.usable_heap_size.saturating_sub(vram.heap_usage);
            info.total_memory.set(vram.total_heap_size);
            info.used_memory.set(vram.heap_usage);
            info.free_memory.set(free);
            if vram.total_heap_size > 0 {
                let used = vram.total_heap_size.saturating_sub(free);
                info.mem_util_rate.set((used * 100 / vram.total_heap_size) as u32);
            }
        }

        if let Some(millidegrees) = ctx.sensor(AMDGPU_INFO_SENSOR_GPU_TEMP) {
            info.gpu_temp.set(millidegrees / 1000);
        }
        // Watts
        if let Some(power) = ctx.sensor(AMDGPU_INFO_SENSOR_GPU_AVG_POWER) {
            info.power_draw.set(power.saturating_mul(1000));
        }

        self.sysfs.refresh_dynamic_info(info);
    }

    fn refresh_running_processes(&mut self, _processes: &mut Vec<GpuProcess>) {
        // Processes were already filled in by the fdinfo sweep
        self.fdinfo.rotate();
    }

    fn has_fdinfo_parser(&self) -> bool {
        true
    }

    fn parse_fdinfo(&mut self, fdinfo: &str, process: &mut GpuProcess) -> bool {
        self.fdinfo.parse(fdinfo, process)
    }
}
