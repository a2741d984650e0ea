// Scriptable vendor, device and process-source doubles shared by the tests

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use gpuscope::core::gpuinfo::{
    CpuSample, DeviceBackend, DeviceMask, DynamicInfo, GpuProcess, GpuVendor, ProcessInfoSource,
    StaticInfo,
};
use gpuscope::{GpuscopeError, Result};

#[derive(Debug, Default)]
pub struct VendorCalls {
    pub inits: usize,
    pub shutdowns: usize,
    pub enumerations: usize,
    pub dropped_devices: usize,
}

/// Processes a fake device reports: `(pid, gpu usage)`
pub type ProcessScript = Rc<RefCell<Vec<(u32, Option<u32>)>>>;

#[derive(Clone, Default)]
pub struct FakeDeviceSetup {
    pub name: String,
    pub gpu_util: Option<u32>,
    pub total_memory: Option<u64>,
    pub processes: ProcessScript,
}

impl FakeDeviceSetup {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

pub struct FakeVendor {
    name: &'static str,
    fail_init: bool,
    fail_enumeration: bool,
    devices: Vec<FakeDeviceSetup>,
    calls: Rc<RefCell<VendorCalls>>,
}

impl FakeVendor {
    pub fn new(name: &'static str, devices: Vec<FakeDeviceSetup>) -> (Self, Rc<RefCell<VendorCalls>>) {
        let calls = Rc::new(RefCell::new(VendorCalls::default()));
        let vendor = Self {
            name,
            fail_init: false,
            fail_enumeration: false,
            devices,
            calls: calls.clone(),
        };
        (vendor, calls)
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_enumeration(mut self) -> Self {
        self.fail_enumeration = true;
        self
    }
}

impl GpuVendor for FakeVendor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self) -> Result<()> {
        self.calls.borrow_mut().inits += 1;
        if self.fail_init {
            return Err(GpuscopeError::library_load("libfake.so: cannot open shared object file"));
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.calls.borrow_mut().shutdowns += 1;
    }

    fn last_error_string(&self) -> String {
        if self.fail_init {
            "libfake.so: cannot open shared object file".to_string()
        } else {
            "no error".to_string()
        }
    }

    fn enumerate_devices(&mut self, mask: &mut DeviceMask) -> Result<Vec<Box<dyn DeviceBackend>>> {
        self.calls.borrow_mut().enumerations += 1;
        if self.fail_enumeration {
            return Err(GpuscopeError::drm("no access"));
        }

        let mut backends: Vec<Box<dyn DeviceBackend>> = Vec::new();
        for setup in &self.devices {
            if mask.take() {
                backends.push(Box::new(FakeBackend {
                    setup: setup.clone(),
                    calls: self.calls.clone(),
                }));
            }
        }
        Ok(backends)
    }
}

pub struct FakeBackend {
    setup: FakeDeviceSetup,
    calls: Rc<RefCell<VendorCalls>>,
}

impl DeviceBackend for FakeBackend {
    fn populate_static_info(&mut self, info: &mut StaticInfo) {
        info.device_name.set(self.setup.name.clone());
    }

    fn refresh_dynamic_info(&mut self, info: &mut DynamicInfo) {
        if let Some(util) = self.setup.gpu_util {
            info.gpu_util_rate.set(util);
        }
        if let Some(total) = self.setup.total_memory {
            info.total_memory.set(total);
        }
    }

    fn refresh_running_processes(&mut self, processes: &mut Vec<GpuProcess>) {
        for &(pid, usage) in self.setup.processes.borrow().iter() {
            let mut process = GpuProcess::new(pid);
            process.gpu_usage = usage.into();
            process.gpu_memory_usage.set(64 * 1024 * 1024);
            processes.push(process);
        }
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.calls.borrow_mut().dropped_devices += 1;
    }
}

/// Process source with fixed answers; CPU time grows by a fixed step per sample.
pub struct FakeProcessSource {
    pub cpu_step: Option<Duration>,
    samples: Vec<(u32, Duration, Instant)>,
    pub resolutions: Rc<RefCell<usize>>,
}

impl FakeProcessSource {
    pub fn new(cpu_step: Option<Duration>) -> (Self, Rc<RefCell<usize>>) {
        let resolutions = Rc::new(RefCell::new(0));
        let source = Self {
            cpu_step,
            samples: Vec::new(),
            resolutions: resolutions.clone(),
        };
        (source, resolutions)
    }
}

impl ProcessInfoSource for FakeProcessSource {
    fn user_name(&mut self, _pid: u32) -> Option<String> {
        *self.resolutions.borrow_mut() += 1;
        Some("render".to_string())
    }

    fn command_line(&mut self, pid: u32) -> Option<String> {
        Some(format!("/usr/bin/game --pid {}", pid))
    }

    fn cpu_sample(&mut self, pid: u32) -> Option<CpuSample> {
        let step = self.cpu_step?;
        let (cpu, at) = match self.samples.iter().position(|(p, _, _)| *p == pid) {
            Some(index) => {
                let entry = &mut self.samples[index];
                entry.1 += step;
                entry.2 += Duration::from_secs(1);
                (entry.1, entry.2)
            }
            None => {
                let start = (pid, Duration::from_secs(1), Instant::now());
                self.samples.push(start);
                (start.1, start.2)
            }
        };
        Some(CpuSample {
            total_cpu_time: cpu,
            resident_memory: 1 << 20,
            virtual_memory: 1 << 30,
            timestamp: at,
        })
    }
}
