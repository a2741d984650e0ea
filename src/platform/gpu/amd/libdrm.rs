//! Runtime-loaded bindings to libdrm and libdrm_amdgpu.
//!
//! Both libraries are opened at runtime so the binary runs on machines
//! without them. A load step either resolves every symbol it needs or fails.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::ptr;
use std::rc::Rc;

use libloading::Library;

use crate::error::{GpuscopeError, Result};

const DRM_NODE_PRIMARY: usize = 0;
const DRM_NODE_RENDER: usize = 2;
const DRM_NODE_MAX: usize = 3;
const DRM_BUS_PCI: c_int = 0;

pub const AMDGPU_INFO_MEMORY: c_uint = 0x19;

pub const AMDGPU_INFO_SENSOR_GFX_SCLK: c_uint = 0x1;
pub const AMDGPU_INFO_SENSOR_GFX_MCLK: c_uint = 0x2;
pub const AMDGPU_INFO_SENSOR_GPU_TEMP: c_uint = 0x3;
pub const AMDGPU_INFO_SENSOR_GPU_LOAD: c_uint = 0x4;
pub const AMDGPU_INFO_SENSOR_GPU_AVG_POWER: c_uint = 0x5;

#[repr(C)]
struct DrmPciBusInfo {
    domain: u16,
    bus: u8,
    dev: u8,
    func: u8,
}

#[repr(C)]
struct DrmPciDeviceInfo {
    vendor_id: u16,
    device_id: u16,
    subvendor_id: u16,
    subdevice_id: u16,
    revision_id: u8,
}

#[repr(C)]
struct DrmDevice {
    nodes: *mut *mut c_char,
    available_nodes: c_int,
    bustype: c_int,
    businfo: *mut DrmPciBusInfo,
    deviceinfo: *mut DrmPciDeviceInfo,
}

#[repr(C)]
struct DrmVersion {
    version_major: c_int,
    version_minor: c_int,
    version_patchlevel: c_int,
    name_len: c_int,
    name: *mut c_char,
    date_len: c_int,
    date: *mut c_char,
    desc_len: c_int,
    desc: *mut c_char,
}

/// Leading part of `struct amdgpu_gpu_info`; the tail is left as padding.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AmdgpuGpuInfo {
    pub asic_id: u32,
    pub chip_rev: u32,
    pub chip_external_rev: u32,
    pub family_id: u32,
    pub ids_flags: u64,
    /// kHz
    pub max_engine_clk: u64,
    /// kHz
    pub max_memory_clk: u64,
    _reserved: [u32; 256],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct AmdgpuHeapInfo {
    pub total_heap_size: u64,
    pub usable_heap_size: u64,
    pub heap_usage: u64,
    pub max_allocation: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct AmdgpuMemoryInfo {
    pub vram: AmdgpuHeapInfo,
    pub cpu_accessible_vram: AmdgpuHeapInfo,
    pub gtt: AmdgpuHeapInfo,
}

type DrmDevicePtr = *mut DrmDevice;
type DrmGetDevices2Fn = unsafe extern "C" fn(u32, *mut DrmDevicePtr, c_int) -> c_int;
type DrmGetDevicesFn = unsafe extern "C" fn(*mut DrmDevicePtr, c_int) -> c_int;
type DrmFreeDevicesFn = unsafe extern "C" fn(*mut DrmDevicePtr, c_int);
type DrmGetVersionFn = unsafe extern "C" fn(c_int) -> *mut DrmVersion;
type DrmFreeVersionFn = unsafe extern "C" fn(*mut DrmVersion);
type DrmGetMagicFn = unsafe extern "C" fn(c_int, *mut c_uint) -> c_int;
type DrmAuthMagicFn = unsafe extern "C" fn(c_int, c_uint) -> c_int;
type DrmDropMasterFn = unsafe extern "C" fn(c_int) -> c_int;

type AmdgpuDeviceHandle = *mut c_void;
type AmdgpuDeviceInitializeFn =
    unsafe extern "C" fn(c_int, *mut u32, *mut u32, *mut AmdgpuDeviceHandle) -> c_int;
type AmdgpuDeviceDeinitializeFn = unsafe extern "C" fn(AmdgpuDeviceHandle) -> c_int;
type AmdgpuGetMarketingNameFn = unsafe extern "C" fn(AmdgpuDeviceHandle) -> *const c_char;
type AmdgpuQueryGpuInfoFn = unsafe extern "C" fn(AmdgpuDeviceHandle, *mut AmdgpuGpuInfo) -> c_int;
type AmdgpuQueryInfoFn = unsafe extern "C" fn(AmdgpuDeviceHandle, c_uint, c_uint, *mut c_void) -> c_int;
type AmdgpuQuerySensorInfoFn =
    unsafe extern "C" fn(AmdgpuDeviceHandle, c_uint, c_uint, *mut c_void) -> c_int;

/// Open the first of `names` that loads.
fn open_first(label: &'static str, names: &[&str]) -> Result<Library> {
    let mut last_error = format!("{} not found", label);
    for name in names {
        // SAFETY: libdrm and libdrm_amdgpu run no unsound initializers
        match unsafe { Library::new(*name) } {
            Ok(library) => {
                log::debug!("Loaded {}", name);
                return Ok(library);
            }
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(GpuscopeError::library_load(last_error))
}

/// Resolve `name` in `library` and copy out the function pointer.
///
/// # Safety
///
/// `T` must be a function pointer type matching the symbol's C signature, and
/// the pointer must not outlive `library`.
unsafe fn symbol<T: Copy>(library: &Library, label: &'static str, name: &'static str) -> Result<T> {
    library
        .get::<T>(name.as_bytes())
        .map(|found| *found)
        .map_err(|e| {
            log::debug!("{}: {}", label, e);
            GpuscopeError::missing_symbol(label, name)
        })
}

/// # Safety
///
/// `ptr` must be NULL or point to a NUL-terminated string.
unsafe fn owned_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

#[derive(Clone, Copy)]
enum DeviceLister {
    V2(DrmGetDevices2Fn),
    V1(DrmGetDevicesFn),
}

/// A PCI device listed by libdrm
#[derive(Debug, Clone)]
pub struct PciDrmDevice {
    pub render_node: Option<PathBuf>,
    pub primary_node: Option<PathBuf>,
    pub domain: u16,
    pub bus: u8,
    pub dev: u8,
    pub func: u8,
    pub vendor_id: u16,
    pub device_id: u16,
}

impl PciDrmDevice {
    /// `dddd:bb:dd.f`, as used by sysfs and DRM fdinfo
    pub fn pci_address(&self) -> String {
        format!("{:04x}:{:02x}:{:02x}.{}", self.domain, self.bus, self.dev, self.func)
    }
}

/// Name and description reported by the kernel driver behind a DRM fd
#[derive(Debug, Clone)]
pub struct DriverVersion {
    pub name: String,
    pub description: String,
}

pub struct LibDrm {
    lister: DeviceLister,
    free_devices: DrmFreeDevicesFn,
    get_version: DrmGetVersionFn,
    free_version: DrmFreeVersionFn,
    get_magic: DrmGetMagicFn,
    auth_magic: DrmAuthMagicFn,
    drop_master: DrmDropMasterFn,
    _library: Library,
}

impl LibDrm {
    pub fn load() -> Result<Rc<Self>> {
        const LABEL: &str = "libdrm";
        let library = open_first(LABEL, &["libdrm.so", "libdrm.so.2", "libdrm.so.1"])?;

        // SAFETY: every type alias above mirrors the libdrm prototype
        unsafe {
            let lister = match symbol::<DrmGetDevices2Fn>(&library, LABEL, "drmGetDevices2") {
                Ok(f) => DeviceLister::V2(f),
                Err(_) => DeviceLister::V1(symbol::<DrmGetDevicesFn>(&library, LABEL, "drmGetDevices")?),
            };

            Ok(Rc::new(Self {
                lister,
                free_devices: symbol(&library, LABEL, "drmFreeDevices")?,
                get_version: symbol(&library, LABEL, "drmGetVersion")?,
                free_version: symbol(&library, LABEL, "drmFreeVersion")?,
                get_magic: symbol(&library, LABEL, "drmGetMagic")?,
                auth_magic: symbol(&library, LABEL, "drmAuthMagic")?,
                drop_master: symbol(&library, LABEL, "drmDropMaster")?,
                _library: library,
            }))
        }
    }

    fn call_lister(&self, devices: *mut DrmDevicePtr, max: c_int) -> c_int {
        // SAFETY: devices is NULL with max 0, or points to `max` writable slots
        unsafe {
            match self.lister {
                DeviceLister::V2(f) => f(0, devices, max),
                DeviceLister::V1(f) => f(devices, max),
            }
        }
    }

    /// List the PCI DRM devices of the system.
    pub fn pci_devices(&self) -> Result<Vec<PciDrmDevice>> {
        let count = self.call_lister(ptr::null_mut(), 0);
        if count < 0 {
            return Err(GpuscopeError::drm(drm_status_message(count)));
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut raw: Vec<DrmDevicePtr> = vec![ptr::null_mut(); count as usize];
        let filled = self.call_lister(raw.as_mut_ptr(), count);
        if filled < 0 {
            return Err(GpuscopeError::drm(drm_status_message(filled)));
        }

        let devices = raw
            .iter()
            .take(filled as usize)
            // SAFETY: libdrm filled the first `filled` slots with valid devices
            .filter_map(|&device| unsafe { read_pci_device(device) })
            .collect();

        // SAFETY: releases exactly what the lister allocated
        unsafe { (self.free_devices)(raw.as_mut_ptr(), filled) };
        Ok(devices)
    }

    pub fn driver_version(&self, fd: RawFd) -> Option<DriverVersion> {
        // SAFETY: fd is an open DRM descriptor; the version is freed before returning
        unsafe {
            let version = (self.get_version)(fd);
            if version.is_null() {
                return None;
            }
            let info = DriverVersion {
                name: owned_string((*version).name).unwrap_or_default(),
                description: owned_string((*version).desc).unwrap_or_default(),
            };
            (self.free_version)(version);
            Some(info)
        }
    }

    /// Authenticate to the DRM device and give up master if that made us master.
    pub fn authenticate(&self, fd: RawFd) {
        let mut magic: c_uint = 0;
        // SAFETY: fd is an open DRM descriptor and magic is a valid out pointer
        unsafe {
            if (self.get_magic)(fd, &mut magic) < 0 {
                return;
            }
            if (self.auth_magic)(fd, magic) == 0 {
                if (self.drop_master)(fd) != 0 {
                    log::warn!("Failed to drop DRM master; other DRM clients may misbehave on VT switch");
                }
                return;
            }
        }
        log::debug!("Failed to authenticate to DRM");
    }
}

/// # Safety
///
/// `device` must point to a device returned by drmGetDevices(2).
unsafe fn read_pci_device(device: DrmDevicePtr) -> Option<PciDrmDevice> {
    let device = device.as_ref()?;
    if device.bustype != DRM_BUS_PCI {
        return None;
    }
    let bus = device.businfo.as_ref()?;
    let info = device.deviceinfo.as_ref()?;

    let node = |index: usize| -> Option<PathBuf> {
        if index >= DRM_NODE_MAX || device.available_nodes & (1 << index) == 0 {
            return None;
        }
        // SAFETY: libdrm fills one entry per bit set in available_nodes
        unsafe { owned_string(*device.nodes.add(index)) }.map(PathBuf::from)
    };

    Some(PciDrmDevice {
        render_node: node(DRM_NODE_RENDER),
        primary_node: node(DRM_NODE_PRIMARY),
        domain: bus.domain,
        bus: bus.bus,
        dev: bus.dev,
        func: bus.func,
        vendor_id: info.vendor_id,
        device_id: info.device_id,
    })
}

fn drm_status_message(status: c_int) -> String {
    let reason = match status {
        -1001 => "no device",
        -1002 => "no access",
        -1003 => "not root",
        -1004 => "invalid args",
        -1005 => "no fd",
        _ => return std::io::Error::from_raw_os_error(-status).to_string(),
    };
    reason.to_string()
}

pub struct LibDrmAmdgpu {
    device_initialize: AmdgpuDeviceInitializeFn,
    device_deinitialize: AmdgpuDeviceDeinitializeFn,
    get_marketing_name: AmdgpuGetMarketingNameFn,
    query_gpu_info: AmdgpuQueryGpuInfoFn,
    query_info: AmdgpuQueryInfoFn,
    query_sensor_info: AmdgpuQuerySensorInfoFn,
    _library: Library,
}

impl LibDrmAmdgpu {
    pub fn load() -> Result<Rc<Self>> {
        const LABEL: &str = "libdrm_amdgpu";
        let library = open_first(LABEL, &["libdrm_amdgpu.so", "libdrm_amdgpu.so.1"])?;

        // SAFETY: every type alias above mirrors the libdrm_amdgpu prototype
        unsafe {
            Ok(Rc::new(Self {
                device_initialize: symbol(&library, LABEL, "amdgpu_device_initialize")?,
                device_deinitialize: symbol(&library, LABEL, "amdgpu_device_deinitialize")?,
                get_marketing_name: symbol(&library, LABEL, "amdgpu_get_marketing_name")?,
                query_gpu_info: symbol(&library, LABEL, "amdgpu_query_gpu_info")?,
                query_info: symbol(&library, LABEL, "amdgpu_query_info")?,
                query_sensor_info: symbol(&library, LABEL, "amdgpu_query_sensor_info")?,
                _library: library,
            }))
        }
    }
}

/// An initialized amdgpu device context.
///
/// Keeps the library loaded for as long as the context lives.
pub struct AmdgpuContext {
    lib: Rc<LibDrmAmdgpu>,
    handle: AmdgpuDeviceHandle,
}

impl AmdgpuContext {
    pub fn initialize(lib: &Rc<LibDrmAmdgpu>, fd: RawFd) -> Result<Self> {
        let mut major = 0u32;
        let mut minor = 0u32;
        let mut handle: AmdgpuDeviceHandle = ptr::null_mut();
        // SAFETY: out pointers are valid; fd is an open amdgpu DRM descriptor
        let status = unsafe { (lib.device_initialize)(fd, &mut major, &mut minor, &mut handle) };
        if status != 0 || handle.is_null() {
            return Err(GpuscopeError::drm(format!(
                "amdgpu_device_initialize failed: {}",
                drm_status_message(status)
            )));
        }
        log::debug!("amdgpu DRM interface {}.{}", major, minor);

        Ok(Self {
            lib: Rc::clone(lib),
            handle,
        })
    }

    pub fn marketing_name(&self) -> Option<String> {
        // SAFETY: the returned string is static data inside libdrm_amdgpu
        unsafe { owned_string((self.lib.get_marketing_name)(self.handle)) }
    }

    pub fn gpu_info(&self) -> Option<AmdgpuGpuInfo> {
        // SAFETY: AmdgpuGpuInfo is plain old data and large enough for the driver struct
        let mut info: AmdgpuGpuInfo = unsafe { std::mem::zeroed() };
        let status = unsafe { (self.lib.query_gpu_info)(self.handle, &mut info) };
        (status == 0).then_some(info)
    }

    pub fn memory_info(&self) -> Option<AmdgpuMemoryInfo> {
        let mut info = AmdgpuMemoryInfo::default();
        // SAFETY: the buffer size passed matches the buffer
        let status = unsafe {
            (self.lib.query_info)(
                self.handle,
                AMDGPU_INFO_MEMORY,
                std::mem::size_of::<AmdgpuMemoryInfo>() as c_uint,
                &mut info as *mut AmdgpuMemoryInfo as *mut c_void,
            )
        };
        (status == 0).then_some(info)
    }

    /// Read one 32-bit sensor value.
    pub fn sensor(&self, sensor: c_uint) -> Option<u32> {
        let mut value = 0u32;
        // SAFETY: the buffer size passed matches the buffer
        let status = unsafe {
            (self.lib.query_sensor_info)(
                self.handle,
                sensor,
                std::mem::size_of::<u32>() as c_uint,
                &mut value as *mut u32 as *mut c_void,
            )
        };
        (status == 0).then_some(value)
    }
}

impl Drop for AmdgpuContext {
    fn drop(&mut self) {
        // SAFETY: handle came from a successful amdgpu_device_initialize
        unsafe {
            (self.lib.device_deinitialize)(self.handle);
        }
    }
}
