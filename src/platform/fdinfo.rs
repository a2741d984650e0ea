//! Walk of `/proc/<pid>/fdinfo` for DRM file descriptors.
//!
//! The kernel exposes per-client GPU usage in the fdinfo file of every open
//! DRM descriptor. A single pass over `/proc` per cycle feeds every device
//! that registered an fdinfo parser.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::gpuinfo::{GpuDevice, GpuProcess};

/// Major number of DRM character devices
const DRM_MAJOR: u64 = 226;

/// Kernel-side checks the sweep makes on each descriptor.
pub trait DescriptorCheck {
    /// Whether `fd_path` (`/proc/<pid>/fd/<n>`) is an open DRM device.
    fn is_drm(&self, fd_path: &Path) -> bool;

    /// Whether two descriptors of `pid` refer to one open file.
    fn same_open_file(&self, pid: u32, fd: i32, other_fd: i32) -> bool;
}

/// Answers from `stat` and `kcmp`
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelDescriptors;

impl DescriptorCheck for KernelDescriptors {
    fn is_drm(&self, fd_path: &Path) -> bool {
        is_drm_fd(fd_path)
    }

    fn same_open_file(&self, pid: u32, fd: i32, other_fd: i32) -> bool {
        same_open_file(pid, fd, other_fd)
    }
}

pub struct FdinfoSweeper {
    proc_root: PathBuf,
    check: Box<dyn DescriptorCheck>,
}

impl FdinfoSweeper {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self::with_descriptor_check(proc_root, Box::new(KernelDescriptors))
    }

    pub fn with_descriptor_check(proc_root: impl Into<PathBuf>, check: Box<dyn DescriptorCheck>) -> Self {
        Self {
            proc_root: proc_root.into(),
            check,
        }
    }

    /// Append the processes found on each device to `device.processes`.
    pub fn sweep(&self, devices: &mut [GpuDevice]) {
        if !devices.iter().any(|device| device.has_fdinfo_parser()) {
            return;
        }

        let entries = match fs::read_dir(&self.proc_root) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Cannot read {}: {}", self.proc_root.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
                .filter(|&pid| pid != 0)
            else {
                continue;
            };
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            sweep_process(self.check.as_ref(), pid, &entry.path(), devices);
        }
    }
}

fn sweep_process(check: &dyn DescriptorCheck, pid: u32, pid_dir: &Path, devices: &mut [GpuDevice]) {
    let fd_dir = pid_dir.join("fd");
    let Ok(fdinfo_entries) = fs::read_dir(pid_dir.join("fdinfo")) else {
        return;
    };

    let mut seen_fds: Vec<i32> = Vec::new();
    for entry in fdinfo_entries.flatten() {
        let name = entry.file_name();
        let Some(fd) = name.to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if !check.is_drm(&fd_dir.join(&name)) {
            continue;
        }

        // Only unique opens count: dup'ed descriptors share one client
        if seen_fds.iter().any(|&seen| check.same_open_file(pid, fd, seen)) {
            continue;
        }
        seen_fds.push(fd);

        let Ok(text) = fs::read_to_string(entry.path()) else {
            continue;
        };
        dispatch_fdinfo(devices, pid, &text);
    }
}

/// Offer one fdinfo text to each device parser until one accepts it.
///
/// Returns whether a device claimed the descriptor.
pub fn dispatch_fdinfo(devices: &mut [GpuDevice], pid: u32, fdinfo: &str) -> bool {
    for device in devices.iter_mut().filter(|d| d.has_fdinfo_parser()) {
        let mut record = GpuProcess::new(pid);
        if device.parse_fdinfo(fdinfo, &mut record) {
            merge_process_record(&mut device.processes, record);
            return true;
        }
    }
    false
}

/// Merge a parsed record into a device's process list.
///
/// Descriptors of one process are visited back to back, so only the last
/// entry can share its pid.
pub fn merge_process_record(processes: &mut Vec<GpuProcess>, record: GpuProcess) {
    match processes.last_mut() {
        Some(last) if last.pid == record.pid => last.accumulate(&record),
        _ => processes.push(record),
    }
}

#[cfg(unix)]
fn is_drm_fd(fd_path: &Path) -> bool {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    match fs::metadata(fd_path) {
        Ok(metadata) => metadata.file_type().is_char_device() && dev_major(metadata.rdev()) == DRM_MAJOR,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_drm_fd(_fd_path: &Path) -> bool {
    false
}

/// Major number of a Linux `dev_t`
pub fn dev_major(rdev: u64) -> u64 {
    ((rdev >> 8) & 0xfff) | ((rdev >> 32) & !0xfff)
}

#[cfg(target_os = "linux")]
fn same_open_file(pid: u32, fd: i32, other_fd: i32) -> bool {
    const KCMP_FILE: libc::c_long = 0;

    // SAFETY: kcmp only compares kernel objects and takes no pointers
    let ret = unsafe {
        libc::syscall(
            libc::SYS_kcmp,
            pid as libc::c_long,
            pid as libc::c_long,
            KCMP_FILE,
            fd as libc::c_long,
            other_fd as libc::c_long,
        )
    };
    ret <= 0
}

#[cfg(not(target_os = "linux"))]
fn same_open_file(_pid: u32, fd: i32, other_fd: i32) -> bool {
    fd == other_fd
}
