use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

fn main() -> Result<()> {
    let matches = Command::new("gpuscope")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Print GPU device and process telemetry as JSON")
        .long_about(
            "Print GPU device and process telemetry as JSON\n\n\
             One snapshot is printed per line on stdout. Logs go to stderr and are\n\
             controlled with RUST_LOG (default: warn).",
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .long("interval")
                .value_name("MS")
                .help("Milliseconds between two snapshots")
                .value_parser(value_parser!(u64).range(1..))
                .default_value("1000"),
        )
        .arg(
            Arg::new("count")
                .short('n')
                .long("count")
                .value_name("N")
                .help("Stop after N snapshots (0 = run until Ctrl+C)")
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            Arg::new("mask")
                .short('m')
                .long("mask")
                .value_name("BITS")
                .help("Bitmask of the devices to monitor, bit i selecting the i-th GPU found")
                .value_parser(value_parser!(i64))
                .allow_negative_numbers(true),
        )
        .arg(
            Arg::new("no-processes")
                .long("no-processes")
                .help("Do not collect per-process usage")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("pretty")
                .short('p')
                .long("pretty")
                .help("Pretty-print each snapshot")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("proc-root")
                .long("proc-root")
                .value_name("DIR")
                .help("procfs mount point to scan for GPU clients")
                .value_parser(value_parser!(PathBuf))
                .default_value("/proc"),
        )
        .get_matches();

    gpuscope::init_logging();

    gpuscope::commands::snapshot(&matches)
}
