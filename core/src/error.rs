//! # HSAC Error Handling
//!
//! Error type shared by every layer of the driver.
//!
//! Errors fall into two groups:
//! - start-up errors (`ConfigurationError`, `InsufficientResources`) abort
//!   device initialization
//! - per-request errors complete the offending request and leave the device
//!   and its queues usable

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// HSAC Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// HSAC unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Request exceeds the maximum transfer length or a buffer bound
    InvalidSize,
    /// Unrecognized operation code or argument value
    InvalidRequest,
    /// Required hardware resource absent at start-up
    ConfigurationError,
    /// Buffer or transaction allocation failed
    InsufficientResources,
    /// Operation needs a resource this device does not have (e.g. SRAM)
    NotSupported,
    /// Request was cancelled before completion
    Cancelled,
    /// Hardware reported an invalid state; fatal to the in-flight transfer
    DeviceState,
    /// Transaction object has not been released by its previous request
    ResourceBusy,
    /// Input or output payload is shorter than the operation requires
    BufferTooSmall,
    /// User-space mapping of a buffer failed
    MappingFailed,
}

impl Error {
    /// Whether the error aborts device start-up rather than a single request
    pub const fn is_startup_fatal(&self) -> bool {
        matches!(self, Self::ConfigurationError | Self::InsufficientResources)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize => write!(f, "invalid transfer or buffer size"),
            Self::InvalidRequest => write!(f, "invalid request"),
            Self::ConfigurationError => write!(f, "required hardware resource missing"),
            Self::InsufficientResources => write!(f, "insufficient resources"),
            Self::NotSupported => write!(f, "operation not supported by this device"),
            Self::Cancelled => write!(f, "request cancelled"),
            Self::DeviceState => write!(f, "device reported an invalid state"),
            Self::ResourceBusy => write!(f, "transaction still in use"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::MappingFailed => write!(f, "user-space mapping failed"),
        }
    }
}
