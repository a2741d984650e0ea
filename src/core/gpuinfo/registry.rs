//! Vendor registration and device enumeration.

use super::process_cache::ProcessInfoCache;
use super::vendor::{DeviceMask, GpuDevice, GpuVendor, VendorId};

/// Holds every registered vendor backend.
///
/// Built once at startup and passed by reference to enumeration and shutdown.
#[derive(Default)]
pub struct VendorRegistry {
    vendors: Vec<Box<dyn GpuVendor>>,
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vendor. A second vendor with the same name is ignored.
    pub fn register(&mut self, vendor: Box<dyn GpuVendor>) -> VendorId {
        if let Some(index) = self.vendors.iter().position(|v| v.name() == vendor.name()) {
            log::debug!("Vendor {} already registered", vendor.name());
            return VendorId(index);
        }
        self.vendors.push(vendor);
        VendorId(self.vendors.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.vendors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }

    pub fn vendor(&self, id: VendorId) -> Option<&dyn GpuVendor> {
        self.vendors.get(id.0).map(|v| v.as_ref())
    }

    pub fn vendor_name(&self, id: VendorId) -> &'static str {
        self.vendor(id).map(|v| v.name()).unwrap_or("unknown")
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn GpuVendor> {
        self.vendors.iter().map(|v| v.as_ref())
    }

    /// Initialize every vendor and collect their devices.
    ///
    /// A vendor whose init fails, or that finds no device, is shut down again
    /// and contributes nothing; the others are unaffected.
    pub fn init_info_extraction(&mut self, mask: DeviceMask) -> Vec<GpuDevice> {
        let mut mask = mask;
        let mut devices = Vec::new();

        for (index, vendor) in self.vendors.iter_mut().enumerate() {
            if let Err(e) = vendor.init() {
                log::warn!("{} backend unavailable: {}", vendor.name(), e);
                vendor.shutdown();
                continue;
            }

            match vendor.enumerate_devices(&mut mask) {
                Ok(backends) if !backends.is_empty() => {
                    log::info!("{} backend found {} device(s)", vendor.name(), backends.len());
                    devices.extend(
                        backends
                            .into_iter()
                            .map(|backend| GpuDevice::new(VendorId(index), backend)),
                    );
                }
                Ok(_) => {
                    log::info!("{} backend found no device", vendor.name());
                    vendor.shutdown();
                }
                Err(e) => {
                    log::warn!("{} device enumeration failed: {}", vendor.name(), e);
                    vendor.shutdown();
                }
            }
        }

        devices
    }

    /// Release every device, shut down every vendor and clear the process cache.
    pub fn shutdown_info_extraction(&mut self, devices: Vec<GpuDevice>, cache: &mut ProcessInfoCache) {
        drop(devices);
        for vendor in self.vendors.iter_mut() {
            vendor.shutdown();
        }
        cache.clear();
    }
}
