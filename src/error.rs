use thiserror::Error;

/// Custom error type for gpuscope
#[derive(Error, Debug)]
pub enum GpuscopeError {
    #[error("Failed to load library: {0}")]
    LibraryLoad(String),

    #[error("Missing symbol {symbol} in {library}")]
    MissingSymbol {
        library: &'static str,
        symbol: &'static str,
    },

    #[error("DRM error: {0}")]
    Drm(String),

    #[error("No devices found: {0}")]
    NoDevices(String),

    #[error("Vendor initialization failed: {0}")]
    VendorInit(String),

    #[cfg(feature = "nvml")]
    #[error("NVML error: {0}")]
    Nvml(#[from] nvml_wrapper::error::NvmlError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for gpuscope
pub type Result<T> = std::result::Result<T, GpuscopeError>;

impl GpuscopeError {
    /// Create a library load error
    pub fn library_load<S: Into<String>>(msg: S) -> Self {
        GpuscopeError::LibraryLoad(msg.into())
    }

    pub fn missing_symbol(library: &'static str, symbol: &'static str) -> Self {
        GpuscopeError::MissingSymbol { library, symbol }
    }

    pub fn drm<S: Into<String>>(msg: S) -> Self {
        GpuscopeError::Drm(msg.into())
    }

    pub fn no_devices<S: Into<String>>(msg: S) -> Self {
        GpuscopeError::NoDevices(msg.into())
    }

    pub fn vendor_init<S: Into<String>>(msg: S) -> Self {
        GpuscopeError::VendorInit(msg.into())
    }

    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GpuscopeError::Config(msg.into())
    }
}
