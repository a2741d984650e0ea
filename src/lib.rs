// gpuscope Library - Public API

// Re-export error types
pub mod error;
pub use error::{GpuscopeError, Result};

// Module declarations
pub mod commands;
pub mod core;
pub mod platform;

// Re-export commonly used types
pub use core::{CollectorConfig, GpuCollector, GpuSnapshot, VendorRegistry};

// Initialize logging
//
// Defaults to warnings only; RUST_LOG overrides. Output goes to stderr so
// snapshots on stdout stay machine readable.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();
}
