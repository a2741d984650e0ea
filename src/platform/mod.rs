// Platform-specific code module

pub mod fdinfo;
pub mod gpu;
pub mod process_info;

// Re-exports para imports limpios
pub use fdinfo::FdinfoSweeper;
pub use gpu::default_registry;
pub use process_info::SysinfoProcessSource;
