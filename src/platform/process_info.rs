use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};

use crate::core::gpuinfo::{CpuSample, ProcessInfoSource};

/// Process lookups backed by `sysinfo`.
///
/// Only the pids asked about are refreshed, never the whole process table.
pub struct SysinfoProcessSource {
    system: System,
    users: Users,
}

impl SysinfoProcessSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            users: Users::new_with_refreshed_list(),
        }
    }

    fn refresh(&mut self, pid: u32) -> Option<&sysinfo::Process> {
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing()
                .with_cpu()
                .with_memory()
                .with_user(UpdateKind::OnlyIfNotSet)
                .with_cmd(UpdateKind::OnlyIfNotSet),
        );
        self.system.process(pid)
    }
}

impl Default for SysinfoProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInfoSource for SysinfoProcessSource {
    fn user_name(&mut self, pid: u32) -> Option<String> {
        let uid = self.refresh(pid)?.user_id()?.clone();
        if self.users.get_user_by_id(&uid).is_none() {
            // Accounts created after startup
            self.users.refresh();
        }
        self.users.get_user_by_id(&uid).map(|user| user.name().to_string())
    }

    fn command_line(&mut self, pid: u32) -> Option<String> {
        let process = self.refresh(pid)?;
        let argv: Vec<String> = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        if argv.is_empty() {
            Some(process.name().to_string_lossy().into_owned())
        } else {
            Some(argv.join(" "))
        }
    }

    fn cpu_sample(&mut self, pid: u32) -> Option<CpuSample> {
        let process = self.refresh(pid)?;
        Some(CpuSample {
            total_cpu_time: Duration::from_millis(process.accumulated_cpu_time()),
            resident_memory: process.memory(),
            virtual_memory: process.virtual_memory(),
            timestamp: Instant::now(),
        })
    }
}
