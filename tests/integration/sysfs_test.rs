// AMD sysfs sensors over a fake device directory

use std::fs;
use std::path::Path;

use gpuscope::core::gpuinfo::{DynamicInfo, StaticInfo};
use gpuscope::platform::gpu::amd::SysfsSensors;

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

/// Device directory shaped like /sys/bus/pci/devices/0000:0b:00.0
fn fake_device(dir: &Path, pwm: bool) -> std::path::PathBuf {
    let hwmon = dir.join("hwmon").join("hwmon3");
    fs::create_dir_all(&hwmon).unwrap();

    write(dir, "max_link_width", "16\n");
    write(dir, "max_link_speed", "16.0 GT/s PCIe\n");
    write(dir, "pp_dpm_pcie", "0: 2.5GT/s, x1 97Mhz\n1: 16.0GT/s, x16 619Mhz *\n");
    write(dir, "pcie_bw", "4096 1024 128\n");

    write(&hwmon, "temp1_crit", "100000\n");
    write(&hwmon, "temp1_emergency", "105000\n");
    write(&hwmon, "power1_cap", "203000000\n");
    if pwm {
        write(&hwmon, "pwm1_enable", "2\n");
        write(&hwmon, "pwm1_max", "255\n");
        write(&hwmon, "pwm1", "51\n");
    } else {
        write(&hwmon, "pwm1_enable", "0\n");
        write(&hwmon, "fan1_enable", "1\n");
        write(&hwmon, "fan1_max", "3000\n");
        write(&hwmon, "fan1_input", "1500\n");
    }
    hwmon
}

#[test]
fn test_static_info_from_sysfs() {
    let dir = tempfile::tempdir().unwrap();
    fake_device(dir.path(), true);

    let mut sensors = SysfsSensors::new(dir.path());
    assert!(sensors.hwmon_dir().is_some());

    let mut info = StaticInfo::default();
    sensors.populate_static_info(&mut info);

    assert_eq!(info.temperature_slowdown_threshold.get(), Some(100));
    assert_eq!(info.temperature_shutdown_threshold.get(), Some(105));
    assert_eq!(info.max_pcie_link_width.get(), Some(16));
    assert_eq!(info.max_pcie_gen.get(), Some(4));
}

#[test]
fn test_dynamic_info_from_sysfs() {
    let dir = tempfile::tempdir().unwrap();
    fake_device(dir.path(), true);

    let mut sensors = SysfsSensors::new(dir.path());
    sensors.populate_static_info(&mut StaticInfo::default());

    let mut info = DynamicInfo::default();
    sensors.refresh_dynamic_info(&mut info);

    assert_eq!(info.fan_speed.get(), Some(20));
    assert_eq!(info.pcie_link_width.get(), Some(16));
    assert_eq!(info.pcie_link_gen.get(), Some(4));
    assert_eq!(info.pcie_rx.get(), Some(4096 * 128));
    assert_eq!(info.pcie_tx.get(), Some(1024 * 128));
    assert_eq!(info.power_draw_max.get(), Some(203_000));
}

#[test]
fn test_rpm_fan_and_rereading_open_files() {
    let dir = tempfile::tempdir().unwrap();
    let hwmon = fake_device(dir.path(), false);

    let mut sensors = SysfsSensors::new(dir.path());
    sensors.populate_static_info(&mut StaticInfo::default());

    let mut info = DynamicInfo::default();
    sensors.refresh_dynamic_info(&mut info);
    assert_eq!(info.fan_speed.get(), Some(50));

    // Same file rewritten in place, as the kernel does
    write(&hwmon, "fan1_input", "3000\n");
    let mut info = DynamicInfo::default();
    sensors.refresh_dynamic_info(&mut info);
    assert_eq!(info.fan_speed.get(), Some(100));
}

#[test]
fn test_zero_fan_max_leaves_fan_absent() {
    let dir = tempfile::tempdir().unwrap();
    let hwmon = fake_device(dir.path(), true);
    write(&hwmon, "pwm1_max", "0\n");

    let mut sensors = SysfsSensors::new(dir.path());
    sensors.populate_static_info(&mut StaticInfo::default());
    let mut info = DynamicInfo::default();
    sensors.refresh_dynamic_info(&mut info);
    assert!(!info.fan_speed.is_valid());
}

#[test]
fn test_missing_files_leave_fields_absent() {
    let dir = tempfile::tempdir().unwrap();

    let mut sensors = SysfsSensors::new(dir.path());
    assert!(sensors.hwmon_dir().is_none());

    let mut static_info = StaticInfo::default();
    sensors.populate_static_info(&mut static_info);
    let mut info = DynamicInfo::default();
    sensors.refresh_dynamic_info(&mut info);

    assert_eq!(static_info, StaticInfo::default());
    assert_eq!(info, DynamicInfo::default());
}
