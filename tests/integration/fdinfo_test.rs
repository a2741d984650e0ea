// fdinfo dispatch to amdgpu parsers and merging per device

use std::path::Path;
use std::time::{Duration, Instant};

use gpuscope::core::gpuinfo::{
    DeviceBackend, DynamicInfo, GpuDevice, GpuProcess, ProcessType, StaticInfo, VendorId,
};
use gpuscope::platform::fdinfo::{dispatch_fdinfo, DescriptorCheck, FdinfoSweeper};
use gpuscope::platform::gpu::amd::AmdFdinfoParser;

/// Device whose only capability is its fdinfo parser
struct ParserOnly(AmdFdinfoParser);

impl DeviceBackend for ParserOnly {
    fn populate_static_info(&mut self, _info: &mut StaticInfo) {}

    fn refresh_dynamic_info(&mut self, _info: &mut DynamicInfo) {}

    fn refresh_running_processes(&mut self, _processes: &mut Vec<GpuProcess>) {
        self.0.rotate();
    }

    fn has_fdinfo_parser(&self) -> bool {
        true
    }

    fn parse_fdinfo(&mut self, fdinfo: &str, process: &mut GpuProcess) -> bool {
        self.0.parse(fdinfo, process)
    }
}

fn device(pdev: &str) -> GpuDevice {
    GpuDevice::new(VendorId(0), Box::new(ParserOnly(AmdFdinfoParser::new(pdev))))
}

fn fdinfo(pdev: &str, client_id: u32, vram_kib: u64) -> String {
    format!(
        "pos:\t0\nflags:\t02100002\nmnt_id:\t24\ndrm-driver:\tamdgpu\ndrm-pdev:\t{}\n\
         drm-client-id:\t{}\ndrm-memory-vram:\t{} KiB\ndrm-memory-gtt:\t2048 KiB\n\
         drm-engine-gfx:\t5000 ns\ndrm-engine-compute:\t0 ns\n",
        pdev, client_id, vram_kib
    )
}

#[test]
fn test_descriptor_goes_to_matching_device() {
    let mut devices = vec![device("0000:03:00.0"), device("0000:0b:00.0")];

    assert!(dispatch_fdinfo(&mut devices, 500, &fdinfo("0000:0b:00.0", 1, 1024)));

    assert!(devices[0].processes.is_empty());
    assert_eq!(devices[1].processes.len(), 1);
    assert_eq!(devices[1].processes[0].pid, 500);
    assert_eq!(devices[1].processes[0].process_type, ProcessType::Compute);
}

#[test]
fn test_unknown_device_is_not_claimed() {
    let mut devices = vec![device("0000:03:00.0")];
    assert!(!dispatch_fdinfo(&mut devices, 500, &fdinfo("0000:0c:00.0", 1, 1024)));
    assert!(devices[0].processes.is_empty());
}

#[test]
fn test_two_clients_of_one_process_are_merged() {
    let mut devices = vec![device("0000:0b:00.0")];

    dispatch_fdinfo(&mut devices, 77, &fdinfo("0000:0b:00.0", 1, 1024));
    dispatch_fdinfo(&mut devices, 77, &fdinfo("0000:0b:00.0", 2, 512));
    dispatch_fdinfo(&mut devices, 78, &fdinfo("0000:0b:00.0", 3, 256));

    let processes = &devices[0].processes;
    assert_eq!(processes.len(), 2);
    assert_eq!(processes[0].gpu_memory_usage.get(), Some(1536 * 1024));
    assert_eq!(processes[0].gfx_engine_used.get(), Some(10_000));
    assert_eq!(processes[1].pid, 78);
}

#[test]
fn test_busy_rate_across_cycles_through_device() {
    let mut parser = AmdFdinfoParser::new("0000:0b:00.0");
    let start = Instant::now();
    let text = |gfx_ns: u64, dec_ns: u64| {
        format!(
            "drm-pdev:\t0000:0b:00.0\ndrm-client-id:\t9\ndrm-engine-gfx:\t{} ns\ndrm-engine-dec:\t{} ns\n",
            gfx_ns, dec_ns
        )
    };

    let mut first = GpuProcess::new(1);
    assert!(parser.parse_at(&text(2_000_000_000, 0), &mut first, start));
    parser.rotate();

    let mut second = GpuProcess::new(1);
    let later = start + Duration::from_millis(500);
    assert!(parser.parse_at(&text(2_250_000_000, 100_000_000), &mut second, later));

    assert_eq!(second.gpu_usage.get(), Some(50));
    assert_eq!(second.decode_usage.get(), Some(20));
    assert!(!second.encode_usage.is_valid());
}

#[test]
fn test_sweep_without_parsers_does_nothing() {
    let proc_root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(proc_root.path().join("1").join("fdinfo")).unwrap();

    let sweeper = FdinfoSweeper::new(proc_root.path());
    let mut devices: Vec<GpuDevice> = Vec::new();
    sweeper.sweep(&mut devices);
    assert!(devices.is_empty());
}

#[test]
fn test_sweep_skips_non_drm_descriptors() {
    let proc_root = tempfile::tempdir().unwrap();
    let pid_dir = proc_root.path().join("321");
    std::fs::create_dir_all(pid_dir.join("fdinfo")).unwrap();
    std::fs::create_dir_all(pid_dir.join("fd")).unwrap();
    // A regular file standing in for the descriptor target
    std::fs::write(pid_dir.join("fd").join("5"), "").unwrap();
    std::fs::write(pid_dir.join("fdinfo").join("5"), fdinfo("0000:0b:00.0", 1, 1024)).unwrap();
    std::fs::create_dir_all(proc_root.path().join("self")).unwrap();

    let sweeper = FdinfoSweeper::new(proc_root.path());
    let mut devices = vec![device("0000:0b:00.0")];
    sweeper.sweep(&mut devices);
    assert!(devices[0].processes.is_empty());
}

/// Descriptors whose `fd/<n>` file starts with "drm" count as DRM; pairs in
/// `dups` share one open file.
struct ScriptedDescriptors {
    dups: Vec<(i32, i32)>,
}

impl DescriptorCheck for ScriptedDescriptors {
    fn is_drm(&self, fd_path: &Path) -> bool {
        std::fs::read_to_string(fd_path)
            .map(|target| target.starts_with("drm"))
            .unwrap_or(false)
    }

    fn same_open_file(&self, _pid: u32, fd: i32, other_fd: i32) -> bool {
        fd == other_fd || self.dups.iter().any(|&pair| pair == (fd, other_fd) || pair == (other_fd, fd))
    }
}

fn add_descriptor(pid_dir: &Path, fd: i32, target: &str, fdinfo_text: &str) {
    std::fs::write(pid_dir.join("fd").join(fd.to_string()), target).unwrap();
    std::fs::write(pid_dir.join("fdinfo").join(fd.to_string()), fdinfo_text).unwrap();
}

#[test]
fn test_sweep_dispatches_and_merges_drm_descriptors() {
    let proc_root = tempfile::tempdir().unwrap();
    let first = proc_root.path().join("100");
    let second = proc_root.path().join("200");
    for pid_dir in [&first, &second] {
        std::fs::create_dir_all(pid_dir.join("fd")).unwrap();
        std::fs::create_dir_all(pid_dir.join("fdinfo")).unwrap();
    }

    // Two clients of one process, a dup of the first, and a non-DRM file
    add_descriptor(&first, 3, "drm", &fdinfo("0000:0b:00.0", 1, 1024));
    add_descriptor(&first, 4, "drm", &fdinfo("0000:0b:00.0", 2, 512));
    add_descriptor(&first, 5, "drm", &fdinfo("0000:0b:00.0", 1, 1024));
    add_descriptor(&first, 6, "regular", &fdinfo("0000:0b:00.0", 7, 4096));
    // Another process on the other device
    add_descriptor(&second, 3, "drm", &fdinfo("0000:03:00.0", 8, 256));

    let sweeper = FdinfoSweeper::with_descriptor_check(
        proc_root.path(),
        Box::new(ScriptedDescriptors { dups: vec![(5, 3)] }),
    );
    let mut devices = vec![device("0000:03:00.0"), device("0000:0b:00.0")];
    sweeper.sweep(&mut devices);

    assert_eq!(devices[0].processes.len(), 1);
    assert_eq!(devices[0].processes[0].pid, 200);
    assert_eq!(devices[0].processes[0].gpu_memory_usage.get(), Some(256 * 1024));

    assert_eq!(devices[1].processes.len(), 1);
    let merged = &devices[1].processes[0];
    assert_eq!(merged.pid, 100);
    assert_eq!(merged.gpu_memory_usage.get(), Some(1536 * 1024));
    assert_eq!(merged.gfx_engine_used.get(), Some(10_000));
}
