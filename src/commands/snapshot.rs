//! Polling loop printing one JSON snapshot per cycle.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::ArgMatches;

use crate::core::gpuinfo::{CollectorConfig, DeviceMask, GpuCollector};
use crate::error::GpuscopeError;
use crate::platform::default_registry;

/// Granularity at which the sleep between cycles notices Ctrl+C
const STOP_POLL: Duration = Duration::from_millis(50);

/// Execute the snapshot loop
pub fn execute(matches: &ArgMatches) -> Result<()> {
    let interval = matches.get_one::<u64>("interval").copied().unwrap_or(1000);
    let count = matches.get_one::<u64>("count").copied().unwrap_or(0);
    let pretty = matches.get_flag("pretty");

    let config = CollectorConfig {
        device_mask: matches
            .get_one::<i64>("mask")
            .map(|&bits| DeviceMask::from_bits(bits))
            .unwrap_or_default(),
        collect_processes: !matches.get_flag("no-processes"),
        proc_root: matches
            .get_one::<PathBuf>("proc-root")
            .cloned()
            .unwrap_or_else(|| PathBuf::from("/proc")),
    };

    if config.collect_processes && !config.proc_root.is_dir() {
        return Err(GpuscopeError::config(format!(
            "{} is not a directory",
            config.proc_root.display()
        ))
        .into());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::Relaxed);
    })
    .map_err(|e| anyhow::anyhow!("Failed to set Ctrl+C handler: {}", e))?;

    let mut collector = GpuCollector::new(default_registry(), config);
    if collector.devices().is_empty() {
        for (vendor, error) in collector.vendor_errors() {
            eprintln!("{}: {}", vendor, error.trim_end());
        }
        collector.shutdown();
        return Err(GpuscopeError::no_devices("no GPU to monitor was found").into());
    }
    log::info!("Monitoring {} device(s)", collector.devices().len());

    collector.populate_static_infos();

    let stdout = std::io::stdout();
    let mut printed = 0u64;
    while !stop.load(Ordering::Relaxed) {
        let started = Instant::now();
        collector.refresh();

        let snapshot = collector.snapshot();
        let line = if pretty {
            serde_json::to_string_pretty(&snapshot)
        } else {
            serde_json::to_string(&snapshot)
        }
        .context("Failed to serialize snapshot")?;

        let mut out = stdout.lock();
        writeln!(out, "{}", line).context("Failed to write snapshot")?;
        out.flush().context("Failed to write snapshot")?;
        drop(out);

        printed += 1;
        if count > 0 && printed >= count {
            break;
        }

        let deadline = started + Duration::from_millis(interval);
        while !stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(STOP_POLL.min(deadline - now));
        }
    }

    collector.shutdown();
    Ok(())
}
