//! Metrics read from the PCI device directory in sysfs and its hwmon child.

use std::fs::{self, File};
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::gpuinfo::{DynamicInfo, StaticInfo};

/// Active line of `pp_dpm_pcie`, e.g. `1: 8.0GT/s, x16 619Mhz *`
static PCIE_DPM_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+:\s*(\d+)\.\d+GT/s,\s*x(\d+)").expect("valid regex"));

/// PCIe generation for a link speed in GT/s (integer part).
pub fn pcie_gen_from_link_speed(speed: u32) -> Option<u32> {
    match speed {
        2 => Some(1),
        5 => Some(2),
        8 => Some(3),
        16 => Some(4),
        32 => Some(5),
        64 => Some(6),
        _ => None,
    }
}

/// Current `(speed GT/s, width)` from the contents of `pp_dpm_pcie`.
pub fn parse_pp_dpm_pcie(contents: &str) -> Option<(u32, u32)> {
    contents
        .lines()
        .filter(|line| line.trim_end().ends_with('*'))
        .find_map(|line| {
            let caps = PCIE_DPM_LINE.captures(line)?;
            let speed = caps.get(1)?.as_str().parse().ok()?;
            let width = caps.get(2)?.as_str().parse().ok()?;
            Some((speed, width))
        })
}

/// `(received, transmitted)` bytes from the contents of `pcie_bw`.
pub fn parse_pcie_bw(contents: &str) -> Option<(u64, u64)> {
    let mut fields = contents.split_whitespace();
    let received: u64 = fields.next()?.parse().ok()?;
    let transmitted: u64 = fields.next()?.parse().ok()?;
    let max_payload: u64 = fields.next()?.parse().ok()?;
    Some((
        received.saturating_mul(max_payload),
        transmitted.saturating_mul(max_payload),
    ))
}

/// Generation from `max_link_speed`, shaped `x.y GT/s PCIe`.
pub fn parse_max_link_speed(contents: &str) -> Option<u32> {
    let speed = contents.split_whitespace().next()?;
    let speed: f64 = speed.strip_suffix("GT/s").unwrap_or(speed).parse().ok()?;
    pcie_gen_from_link_speed(speed.floor() as u32)
}

fn read_value<T: FromStr>(path: &Path) -> Option<T> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn reread(file: &mut File) -> Option<String> {
    file.rewind().ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    Some(contents)
}

/// First `hwmon/hwmonN` directory of a device.
pub fn find_hwmon_dir(device_dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(device_dir.join("hwmon"))
        .ok()?
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("hwmon"))
        .map(|entry| entry.path())
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

struct FanSensor {
    file: File,
    max: u32,
}

/// Sysfs sensor files of one AMD device.
///
/// Files read every cycle are opened once by `populate_static_info` and kept
/// open until the device is dropped.
pub struct SysfsSensors {
    device_dir: PathBuf,
    hwmon_dir: Option<PathBuf>,
    fan: Option<FanSensor>,
    pcie_dpm: Option<File>,
    pcie_bw: Option<File>,
    power_cap: Option<File>,
}

impl SysfsSensors {
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        let device_dir = device_dir.into();
        let hwmon_dir = find_hwmon_dir(&device_dir);
        if hwmon_dir.is_none() {
            log::debug!("No hwmon directory under {}", device_dir.display());
        }

        Self {
            device_dir,
            hwmon_dir,
            fan: None,
            pcie_dpm: None,
            pcie_bw: None,
            power_cap: None,
        }
    }

    pub fn hwmon_dir(&self) -> Option<&Path> {
        self.hwmon_dir.as_deref()
    }

    fn hwmon_value<T: FromStr>(&self, name: &str) -> Option<T> {
        read_value(&self.hwmon_dir.as_ref()?.join(name))
    }

    fn open_fan_sensor(&self) -> Option<FanSensor> {
        let hwmon = self.hwmon_dir.as_ref()?;
        let (sensor, max_file) = if self.hwmon_value::<u32>("pwm1_enable").is_some_and(|v| v > 0) {
            ("pwm1", "pwm1_max")
        } else if self.hwmon_value::<u32>("fan1_enable").is_some_and(|v| v > 0) {
            ("fan1_input", "fan1_max")
        } else {
            return None;
        };

        let max = read_value(&hwmon.join(max_file))?;
        let file = File::open(hwmon.join(sensor)).ok()?;
        Some(FanSensor { file, max })
    }

    pub fn populate_static_info(&mut self, info: &mut StaticInfo) {
        self.fan = self.open_fan_sensor();

        // temp1 is the GPU die, in millidegrees
        if let Some(crit) = self.hwmon_value::<u32>("temp1_crit") {
            info.temperature_slowdown_threshold.set(crit / 1000);
        }
        if let Some(emergency) = self.hwmon_value::<u32>("temp1_emergency") {
            info.temperature_shutdown_threshold.set(emergency / 1000);
        }

        if let Some(width) = read_value::<u32>(&self.device_dir.join("max_link_width")) {
            info.max_pcie_link_width.set(width);
            let speed = fs::read_to_string(self.device_dir.join("max_link_speed")).ok();
            if let Some(generation) = speed.as_deref().and_then(parse_max_link_speed) {
                info.max_pcie_gen.set(generation);
            }
        }

        self.pcie_dpm = File::open(self.device_dir.join("pp_dpm_pcie")).ok();
        self.pcie_bw = File::open(self.device_dir.join("pcie_bw")).ok();
        self.power_cap = self
            .hwmon_dir
            .as_ref()
            .and_then(|hwmon| File::open(hwmon.join("power1_cap")).ok());
    }

    pub fn refresh_dynamic_info(&mut self, info: &mut DynamicInfo) {
        if let Some(fan) = self.fan.as_mut() {
            let reading = reread(&mut fan.file).and_then(|s| s.trim().parse::<u32>().ok());
            if let Some(reading) = reading.filter(|_| fan.max > 0) {
                info.fan_speed.set((reading as u64 * 100 / fan.max as u64) as u32);
            }
        }

        let pcie_dpm = self.pcie_dpm.as_mut().and_then(reread);
        if let Some((speed, width)) = pcie_dpm.as_deref().and_then(parse_pp_dpm_pcie) {
            info.pcie_link_width.set(width);
            if let Some(generation) = pcie_gen_from_link_speed(speed) {
                info.pcie_link_gen.set(generation);
            }
        }

        let pcie_bw = self.pcie_bw.as_mut().and_then(reread);
        if let Some((rx, tx)) = pcie_bw.as_deref().and_then(parse_pcie_bw) {
            info.pcie_rx.set(rx);
            info.pcie_tx.set(tx);
        }

        // Microwatts
        if let Some(cap) = self
            .power_cap
            .as_mut()
            .and_then(reread)
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            info.power_draw_max.set((cap / 1000) as u32);
        }
    }
}
