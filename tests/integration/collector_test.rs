// Polling cycles through GpuCollector with fake vendors

use std::time::Duration;

use gpuscope::core::gpuinfo::{CollectorConfig, GpuCollector, VendorRegistry};

use super::fakes::{FakeDeviceSetup, FakeProcessSource, FakeVendor, ProcessScript};

fn collector_with(setups: Vec<FakeDeviceSetup>, cpu_step: Option<Duration>) -> GpuCollector {
    let (vendor, _) = FakeVendor::new("fake", setups);
    let mut registry = VendorRegistry::new();
    registry.register(Box::new(vendor));

    let (source, _) = FakeProcessSource::new(cpu_step);
    let mut collector =
        GpuCollector::with_process_source(registry, CollectorConfig::default(), Box::new(source));
    collector.populate_static_infos();
    collector
}

fn scripted(processes: &[(u32, Option<u32>)]) -> ProcessScript {
    let script = ProcessScript::default();
    script.borrow_mut().extend_from_slice(processes);
    script
}

#[test]
fn test_missing_utilization_is_backfilled_from_processes() {
    let setup = FakeDeviceSetup {
        processes: scripted(&[(100, Some(40)), (101, Some(70)), (102, None)]),
        ..FakeDeviceSetup::named("gpu0")
    };
    let mut collector = collector_with(vec![setup], None);

    collector.refresh();

    let device = &collector.devices()[0];
    assert_eq!(device.processes.len(), 3);
    assert_eq!(device.dynamic_info.gpu_util_rate.get(), Some(100));
    assert!(!device.dynamic_info.encoder_rate.is_valid());
}

#[test]
fn test_reported_utilization_is_kept() {
    let setup = FakeDeviceSetup {
        gpu_util: Some(12),
        processes: scripted(&[(100, Some(40))]),
        ..FakeDeviceSetup::named("gpu0")
    };
    let mut collector = collector_with(vec![setup], None);

    collector.refresh();
    assert_eq!(collector.devices()[0].dynamic_info.gpu_util_rate.get(), Some(12));
}

#[test]
fn test_processes_get_os_information() {
    let setup = FakeDeviceSetup {
        total_memory: Some(256 * 1024 * 1024),
        processes: scripted(&[(4242, Some(5))]),
        ..FakeDeviceSetup::named("gpu0")
    };
    let mut collector = collector_with(vec![setup], Some(Duration::from_millis(250)));

    collector.refresh();
    let process = &collector.devices()[0].processes[0];
    assert_eq!(process.user_name.as_ref().map(String::as_str), Some("render"));
    assert_eq!(
        process.cmdline.as_ref().map(String::as_str),
        Some("/usr/bin/game --pid 4242")
    );
    assert_eq!(process.gpu_memory_percentage.get(), Some(25));
    assert!(!process.cpu_usage.is_valid());

    collector.refresh();
    let process = &collector.devices()[0].processes[0];
    assert_eq!(process.cpu_usage.get(), Some(25));
    assert_eq!(process.cpu_memory_res.get(), Some(1 << 20));
}

#[test]
fn test_exited_process_is_evicted() {
    let script = scripted(&[(1, Some(1)), (2, Some(2))]);
    let setup = FakeDeviceSetup {
        processes: script.clone(),
        ..FakeDeviceSetup::named("gpu0")
    };
    let mut collector = collector_with(vec![setup], Some(Duration::from_millis(100)));

    collector.refresh();
    assert!(collector.process_cache().contains(2));

    script.borrow_mut().retain(|&(pid, _)| pid != 2);
    collector.refresh();
    assert!(!collector.process_cache().contains(2));
    assert!(collector.process_cache().contains(1));

    // Comes back as a new process: no CPU usage until the next sample
    script.borrow_mut().push((2, Some(2)));
    collector.refresh();
    let process = collector.devices()[0]
        .processes
        .iter()
        .find(|p| p.pid == 2)
        .unwrap();
    assert!(!process.cpu_usage.is_valid());
}

#[test]
fn test_unchanged_state_gives_identical_snapshots() {
    let setup = FakeDeviceSetup {
        gpu_util: Some(30),
        total_memory: Some(1 << 30),
        processes: scripted(&[(7, Some(10)), (8, None)]),
        ..FakeDeviceSetup::named("gpu0")
    };
    let mut collector = collector_with(vec![setup, FakeDeviceSetup::named("gpu1")], None);

    collector.refresh();
    collector.refresh();
    let second = collector.snapshot();
    collector.refresh();
    let third = collector.snapshot();

    assert_eq!(second.devices, third.devices);
    assert_eq!(second.devices.len(), 2);
    assert_eq!(second.devices[0].vendor, "fake");
}

#[test]
fn test_process_collection_can_be_disabled() {
    let setup = FakeDeviceSetup {
        processes: scripted(&[(1, Some(50))]),
        ..FakeDeviceSetup::named("gpu0")
    };
    let (vendor, _) = FakeVendor::new("fake", vec![setup]);
    let mut registry = VendorRegistry::new();
    registry.register(Box::new(vendor));
    let (source, resolutions) = FakeProcessSource::new(None);
    let config = CollectorConfig {
        collect_processes: false,
        ..Default::default()
    };

    let mut collector = GpuCollector::with_process_source(registry, config, Box::new(source));
    collector.refresh();

    assert!(collector.devices()[0].processes.is_empty());
    assert!(!collector.devices()[0].dynamic_info.gpu_util_rate.is_valid());
    assert_eq!(*resolutions.borrow(), 0);
}

#[test]
fn test_snapshot_serializes_absent_fields_as_null() {
    let mut collector = collector_with(vec![FakeDeviceSetup::named("gpu0")], None);
    collector.refresh();

    let json = serde_json::to_value(collector.snapshot()).unwrap();
    let device = &json["devices"][0];
    assert_eq!(device["static_info"]["device_name"], "gpu0");
    assert!(device["dynamic_info"]["gpu_temp"].is_null());
}

#[test]
fn test_shutdown_is_idempotent() {
    let (vendor, calls) = FakeVendor::new("fake", vec![FakeDeviceSetup::named("gpu0")]);
    let mut registry = VendorRegistry::new();
    registry.register(Box::new(vendor));
    let (source, _) = FakeProcessSource::new(None);

    let mut collector = GpuCollector::with_process_source(registry, CollectorConfig::default(), Box::new(source));
    collector.shutdown();
    collector.shutdown();
    drop(collector);

    let calls = calls.borrow();
    assert_eq!(calls.dropped_devices, 1);
    // twice explicitly, once more on drop
    assert_eq!(calls.shutdowns, 3);
}
