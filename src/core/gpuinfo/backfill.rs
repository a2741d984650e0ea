//! Derive missing device aggregates from per-process usage.

use super::field::Field;
use super::types::GpuProcess;
use super::vendor::GpuDevice;

/// Fill absent device utilization, encode and decode rates by summing the
/// matching per-process values, clamped to 100.
///
/// Aggregates the device already reported are left untouched.
pub fn fix_dynamic_info_from_process_info(devices: &mut [GpuDevice]) {
    for device in devices.iter_mut() {
        let processes = &device.processes;
        let info = &mut device.dynamic_info;

        backfill_rate(&mut info.gpu_util_rate, processes, |p| &p.gpu_usage);
        backfill_rate(&mut info.encoder_rate, processes, |p| &p.encode_usage);
        backfill_rate(&mut info.decoder_rate, processes, |p| &p.decode_usage);
    }
}

fn backfill_rate<F>(aggregate: &mut Field<u32>, processes: &[GpuProcess], per_process: F)
where
    F: Fn(&GpuProcess) -> &Field<u32>,
{
    if aggregate.is_valid() {
        return;
    }
    for usage in processes.iter().filter_map(|p| per_process(p).get()) {
        let sum = aggregate.get().unwrap_or(0).saturating_add(usage);
        aggregate.set(sum.min(100));
    }
}
