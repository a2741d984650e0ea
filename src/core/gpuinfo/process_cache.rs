//! Cross-cycle cache of operating-system process information.
//!
//! User name and command line are resolved once per process and carried from
//! cycle to cycle. CPU usage is a rate, so the last CPU-time sample is kept as
//! well. Entries live in two generations: the one being built during the
//! current cycle and the one left over from the previous cycle. Whatever is
//! still in the previous generation when the cycle ends belongs to a process
//! that stopped using the GPU and is dropped.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::types::GpuProcess;

/// One CPU accounting reading for a process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuSample {
    /// User plus kernel time consumed since the process started
    pub total_cpu_time: Duration,
    pub resident_memory: u64,
    pub virtual_memory: u64,
    pub timestamp: Instant,
}

/// Operating-system lookups needed to describe a GPU process.
///
/// Every method returns `None` when the information cannot be obtained; the
/// corresponding process fields are then left absent.
pub trait ProcessInfoSource {
    fn user_name(&mut self, pid: u32) -> Option<String>;

    fn command_line(&mut self, pid: u32) -> Option<String>;

    fn cpu_sample(&mut self, pid: u32) -> Option<CpuSample>;
}

#[derive(Debug, Clone, Copy)]
struct CpuReading {
    usage: Option<u32>,
    resident_memory: u64,
    virtual_memory: u64,
}

#[derive(Debug)]
struct CachedProcessInfo {
    cmdline: Option<String>,
    user_name: Option<String>,
    last_sample: Option<(Duration, Instant)>,
    // Reading taken this cycle, reused when the process shows up on another device
    reading: Option<CpuReading>,
}

impl CachedProcessInfo {
    fn resolve(source: &mut dyn ProcessInfoSource, pid: u32) -> Self {
        Self {
            cmdline: source.command_line(pid),
            user_name: source.user_name(pid),
            last_sample: None,
            reading: None,
        }
    }

    fn take_reading(&mut self, source: &mut dyn ProcessInfoSource, pid: u32) -> Option<CpuReading> {
        if self.reading.is_some() {
            return self.reading;
        }

        let Some(sample) = source.cpu_sample(pid) else {
            self.last_sample = None;
            return None;
        };

        let usage = self.last_sample.and_then(|(last_cpu_time, last_timestamp)| {
            let wall = sample.timestamp.saturating_duration_since(last_timestamp).as_secs_f64();
            if wall <= 0.0 {
                return None;
            }
            let cpu = sample.total_cpu_time.saturating_sub(last_cpu_time).as_secs_f64();
            Some((100.0 * cpu / wall).round() as u32)
        });

        self.last_sample = Some((sample.total_cpu_time, sample.timestamp));
        self.reading = Some(CpuReading {
            usage,
            resident_memory: sample.resident_memory,
            virtual_memory: sample.virtual_memory,
        });
        self.reading
    }
}

/// Two-generation, pid-keyed process information cache.
pub struct ProcessInfoCache {
    source: Box<dyn ProcessInfoSource>,
    previous: HashMap<u32, CachedProcessInfo>,
    current: HashMap<u32, CachedProcessInfo>,
}

impl ProcessInfoCache {
    pub fn new(source: Box<dyn ProcessInfoSource>) -> Self {
        Self {
            source,
            previous: HashMap::new(),
            current: HashMap::new(),
        }
    }

    /// Fill the OS-level fields of a device's processes for this cycle.
    ///
    /// `total_memory` is the device memory used for the per-process memory
    /// percentage, when the device reports it.
    pub fn populate_process_info(&mut self, processes: &mut [GpuProcess], total_memory: Option<u64>) {
        for process in processes.iter_mut() {
            let pid = process.pid;
            let source = &mut self.source;

            let entry = match self.previous.remove(&pid) {
                Some(entry) => self.current.entry(pid).or_insert(entry),
                None => self
                    .current
                    .entry(pid)
                    .or_insert_with(|| CachedProcessInfo::resolve(&mut **source, pid)),
            };

            if let Some(cmdline) = &entry.cmdline {
                process.cmdline.set(cmdline.clone());
            }
            if let Some(user_name) = &entry.user_name {
                process.user_name.set(user_name.clone());
            }

            if let Some(reading) = entry.take_reading(&mut **source, pid) {
                if let Some(usage) = reading.usage {
                    process.cpu_usage.set(usage);
                }
                process.cpu_memory_res.set(reading.resident_memory);
                process.cpu_memory_virt.set(reading.virtual_memory);
            }

            if let (Some(total), Some(used)) = (total_memory, process.gpu_memory_usage.get()) {
                if total > 0 {
                    let percentage = (100.0 * used as f64 / total as f64).round().min(100.0);
                    process.gpu_memory_percentage.set(percentage as u32);
                }
            }
        }
    }

    /// Drop entries not seen this cycle and start a new generation.
    pub fn end_cycle(&mut self) {
        let evicted = std::mem::replace(&mut self.previous, std::mem::take(&mut self.current));
        if !evicted.is_empty() {
            log::trace!("Evicting {} exited process(es) from the cache", evicted.len());
        }
        for entry in self.previous.values_mut() {
            entry.reading = None;
        }
    }

    pub fn clear(&mut self) {
        self.previous.clear();
        self.current.clear();
    }

    /// Whether `pid` has an entry in either generation
    pub fn contains(&self, pid: u32) -> bool {
        self.previous.contains_key(&pid) || self.current.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.previous.len() + self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
