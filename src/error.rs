//! Error types for the scan orchestrator.
//!
//! `ScanError` is the single error type returned by device adapters, the
//! controllers and the orchestrator. It is built with `thiserror` so that
//! underlying I/O and serialization failures convert with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: an adapter failed to establish, or lost, its hardware link.
//!   Never retried; the run is aborted after a best-effort safe teardown.
//! - **`Configuration`**: invalid descriptor, acquisition parameter or unit string.
//!   Always raised before any hardware command is issued.
//! - **`OutOfRange`**: a requested position or power lies outside the device's
//!   physical or configured bounds. Rejected before issuance, so hardware state
//!   is unchanged.
//! - **`HardwareIo`**: a command was issued but the device reported an error or
//!   timed out. Device state must be treated as unknown and a safe-state reset
//!   forced before any further operation.
//! - **`Io`**, **`Serialization`**, **`Config`**: plumbing around result files and
//!   configuration loading.
//! - **`TeardownFailed`**: one or more devices could not be released cleanly.

use thiserror::Error;

/// Convenience alias for results using the scan error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Coarse classification of a [`ScanError`], used for reporting and policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// [`ScanError::Connection`]
    Connection,
    /// [`ScanError::Configuration`] and [`ScanError::Config`]
    Configuration,
    /// [`ScanError::OutOfRange`]
    OutOfRange,
    /// [`ScanError::HardwareIo`]
    HardwareIo,
    /// [`ScanError::Io`]
    Io,
    /// [`ScanError::Serialization`]
    Serialization,
    /// [`ScanError::TeardownFailed`]
    Teardown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Configuration => "configuration",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::HardwareIo => "hardware_io",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Teardown => "teardown",
        };
        write!(f, "{}", label)
    }
}

/// Every failure a scan can report
#[derive(Error, Debug)]
pub enum ScanError {
    /// A device could not be opened or was lost
    #[error("Connection error ({device}): {message}")]
    Connection {
        /// Device name
        device: String,
        /// Driver or transport detail
        message: String,
    },

    /// Invalid configuration, caught before any hardware access where possible
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A commanded value outside the device's accepted range
    #[error("{quantity} {value} out of range [{min}, {max}]")]
    OutOfRange {
        /// What was commanded, e.g. `x position`
        quantity: String,
        /// Rejected value
        value: f64,
        /// Lowest accepted value
        min: f64,
        /// Highest accepted value
        max: f64,
    },

    /// A command or read failed on an open device
    #[error("Hardware I/O error ({device}): {message}")]
    HardwareIo {
        /// Device name
        device: String,
        /// Driver or transport detail
        message: String,
    },

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Result file encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be loaded or merged
    #[error("Configuration load error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// One or more devices failed to release
    #[error("Teardown failed with {} error(s)", .0.len())]
    TeardownFailed(Vec<ScanError>),
}

impl ScanError {
    /// Connection error for `device`.
    pub fn connection(device: impl Into<String>, message: impl Into<String>) -> Self {
        ScanError::Connection {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        ScanError::Configuration(message.into())
    }

    /// Range error for `quantity`, naming the accepted bounds.
    pub fn out_of_range(quantity: impl Into<String>, value: f64, min: f64, max: f64) -> Self {
        ScanError::OutOfRange {
            quantity: quantity.into(),
            value,
            min,
            max,
        }
    }

    /// I/O error on an open `device`.
    pub fn hardware_io(device: impl Into<String>, message: impl Into<String>) -> Self {
        ScanError::HardwareIo {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::Connection { .. } => ErrorKind::Connection,
            ScanError::Configuration(_) | ScanError::Config(_) => ErrorKind::Configuration,
            ScanError::OutOfRange { .. } => ErrorKind::OutOfRange,
            ScanError::HardwareIo { .. } => ErrorKind::HardwareIo,
            ScanError::Io(_) => ErrorKind::Io,
            ScanError::Serialization(_) => ErrorKind::Serialization,
            ScanError::TeardownFailed(_) => ErrorKind::Teardown,
        }
    }

    /// True when the device state can no longer be trusted and the trigger
    /// lines must be driven safe before anything else happens.
    pub fn requires_safe_reset(&self) -> bool {
        matches!(
            self,
            ScanError::HardwareIo { .. } | ScanError::Connection { .. }
        )
    }
}

impl From<figment::Error> for ScanError {
    fn from(value: figment::Error) -> Self {
        ScanError::Config(Box::new(value))
    }
}
