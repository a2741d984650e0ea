//! amdgpu fdinfo parsing and per-client engine busy time.
//!
//! Kernels since 5.19 report cumulative engine time in nanoseconds
//! (`drm-engine-*`); busy percentages come from the difference between two
//! consecutive readings of the same DRM client. Older kernels report a
//! percentage directly (`gfx0`, `enc0`, ...).

use std::collections::HashMap;
use std::time::Instant;

use crate::core::gpuinfo::{Field, GpuProcess, ProcessType};

/// One DRM client of one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub client_id: u64,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy)]
struct EngineUsageEntry {
    gfx: Option<u64>,
    compute: Option<u64>,
    enc: Option<u64>,
    dec: Option<u64>,
    timestamp: Instant,
}

#[derive(Clone, Copy, PartialEq)]
enum Engine {
    Gfx,
    Compute,
    Enc,
    Dec,
}

const LEGACY_ENGINES: [(&str, Engine); 4] = [
    ("gfx", Engine::Gfx),
    ("compute", Engine::Compute),
    ("enc", Engine::Enc),
    ("dec", Engine::Dec),
];

const ENGINE_KEYS: [(&str, Engine); 4] = [
    ("drm-engine-gfx", Engine::Gfx),
    ("drm-engine-compute", Engine::Compute),
    ("drm-engine-enc", Engine::Enc),
    ("drm-engine-dec", Engine::Dec),
];

/// Busy percentage of an engine between two cumulative readings, rounded
/// half up.
///
/// `None` when the counter went backwards or advanced by more than the
/// elapsed time.
pub fn busy_percent(previous_ns: u64, current_ns: u64, elapsed_ns: u128) -> Option<u32> {
    let delta = current_ns.checked_sub(previous_ns)? as u128;
    if elapsed_ns == 0 || delta > elapsed_ns {
        return None;
    }
    Some(((delta * 100 + elapsed_ns / 2) / elapsed_ns) as u32)
}

/// Split `key: value`, with leading whitespace removed from the value.
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let value = value.trim_start();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

fn parse_kib(value: &str) -> Option<u64> {
    let amount = value
        .strip_suffix(" kB")
        .or_else(|| value.strip_suffix(" KiB"))?;
    amount.parse::<u64>().ok()?.checked_mul(1024)
}

fn parse_legacy_key(key: &str) -> Option<Engine> {
    LEGACY_ENGINES.iter().find_map(|&(prefix, engine)| {
        let index = key.strip_prefix(prefix)?;
        (!index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())).then_some(engine)
    })
}

fn parse_percent(value: &str) -> Option<u32> {
    let percent: f64 = value.strip_suffix('%')?.parse().ok()?;
    Some(percent.round().max(0.0) as u32)
}

/// Legacy keys of one engine add up; clamping is left to backfill.
fn add_percent(field: &mut Field<u32>, value: u32) {
    field.set(field.get().unwrap_or(0).saturating_add(value));
}

/// Engine-time cache and fdinfo parser for one AMD device.
pub struct AmdFdinfoParser {
    pdev: String,
    previous: HashMap<ClientKey, EngineUsageEntry>,
    current: HashMap<ClientKey, EngineUsageEntry>,
}

impl AmdFdinfoParser {
    /// `pdev` is the PCI address of the device, `dddd:bb:dd.f`.
    pub fn new(pdev: impl Into<String>) -> Self {
        Self {
            pdev: pdev.into(),
            previous: HashMap::new(),
            current: HashMap::new(),
        }
    }

    pub fn parse(&mut self, fdinfo: &str, process: &mut GpuProcess) -> bool {
        self.parse_at(fdinfo, process, Instant::now())
    }

    /// Parse with an explicit sampling time.
    ///
    /// Returns `false` when the descriptor belongs to another device.
    pub fn parse_at(&mut self, fdinfo: &str, process: &mut GpuProcess, now: Instant) -> bool {
        let mut client_id = None;

        for (key, value) in fdinfo.lines().filter_map(split_key_value) {
            match key {
                "pdev" | "drm-pdev" => {
                    if value != self.pdev {
                        return false;
                    }
                }
                "drm-client-id" => {
                    if let Ok(id) = value.parse::<u64>() {
                        client_id = Some(id);
                    }
                }
                "vram mem" | "drm-memory-vram" => {
                    if let Some(bytes) = parse_kib(value) {
                        process.gpu_memory_usage.set(bytes);
                    }
                }
                _ => {
                    if let Some(&(_, engine)) = ENGINE_KEYS.iter().find(|(k, _)| *k == key) {
                        if let Some(ns) = value.strip_suffix(" ns").and_then(|v| v.parse().ok()) {
                            record_engine_time(process, engine, ns);
                        }
                    } else if let Some(engine) = parse_legacy_key(key) {
                        if let Some(percent) = parse_percent(value) {
                            record_legacy_percent(process, engine, percent);
                        }
                    }
                }
            }
        }

        if let Some(client_id) = client_id {
            let key = ClientKey {
                client_id,
                pid: process.pid,
            };
            if let Some(last) = self.previous.remove(&key) {
                apply_busy_rates(process, &last, now);
            }

            debug_assert!(
                !self.current.contains_key(&key),
                "DRM client {:?} parsed twice in one cycle",
                key
            );
            self.current.insert(
                key,
                EngineUsageEntry {
                    gfx: process.gfx_engine_used.get(),
                    compute: process.compute_engine_used.get(),
                    enc: process.enc_engine_used.get(),
                    dec: process.dec_engine_used.get(),
                    timestamp: now,
                },
            );
        }

        true
    }

    /// Start a new cycle, forgetting clients not seen in the last one.
    pub fn rotate(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }

    /// Clients whose counters are kept for the next cycle
    pub fn tracked_clients(&self) -> usize {
        self.previous.len() + self.current.len()
    }
}

fn record_engine_time(process: &mut GpuProcess, engine: Engine, ns: u64) {
    match engine {
        Engine::Gfx => process.gfx_engine_used.set(ns),
        Engine::Compute => {
            process.process_type = ProcessType::Compute;
            process.compute_engine_used.set(ns);
        }
        Engine::Enc => process.enc_engine_used.set(ns),
        Engine::Dec => process.dec_engine_used.set(ns),
    }
}

fn record_legacy_percent(process: &mut GpuProcess, engine: Engine, percent: u32) {
    match engine {
        Engine::Gfx => add_percent(&mut process.gpu_usage, percent),
        Engine::Compute => {
            process.process_type = ProcessType::Compute;
            add_percent(&mut process.gpu_usage, percent);
        }
        Engine::Enc => add_percent(&mut process.encode_usage, percent),
        Engine::Dec => add_percent(&mut process.decode_usage, percent),
    }
}

fn apply_busy_rates(process: &mut GpuProcess, last: &EngineUsageEntry, now: Instant) {
    let elapsed = now.saturating_duration_since(last.timestamp).as_nanos();
    let busy = |old: Option<u64>, new: Option<u64>| busy_percent(old?, new?, elapsed);

    // gfx and compute share gpu_usage; the compute rate wins when both exist
    if let Some(rate) = busy(last.gfx, process.gfx_engine_used.get()) {
        process.gpu_usage.set(rate);
    }
    if let Some(rate) = busy(last.compute, process.compute_engine_used.get()) {
        process.gpu_usage.set(rate);
    }
    if let Some(rate) = busy(last.dec, process.dec_engine_used.get()) {
        process.decode_usage.set(rate);
    }
    if let Some(rate) = busy(last.enc, process.enc_engine_used.get()) {
        process.encode_usage.set(rate);
    }
}
