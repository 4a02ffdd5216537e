//! # HSAC Core
//!
//! Shared foundations for the HSAC PCIe DMA driver: the error type, strongly
//! typed addresses and transfer parameters, and the device register layout.
//!
//! Nothing in this crate touches hardware. The register layout is pure data;
//! access to it lives in `hsac-hal`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        hsac-core                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Error     │  │   Types     │  │    Register File    │  │
//! │  │  (Result)   │  │ (PhysAddr,  │  │ (layout, DmaControl │  │
//! │  │             │  │  Direction) │  │  ChannelState)      │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod error;
pub mod registers;
pub mod types;

// Re-exports for convenience
pub use error::{Error, Result};
pub use registers::{ChannelState, DmaControl, InterruptState, Register, RegisterFile};
pub use types::*;

// =============================================================================
// DEVICE CONSTANTS
// =============================================================================

/// PCI vendor ID of the HSAC device
pub const VENDOR_ID: u16 = 0x9408;

/// PCI device ID of the HSAC device
pub const DEVICE_ID: u16 = 0x2801;

/// Number of DMA channels on the device
pub const DMA_CHANNELS: usize = 2;

/// Host page size used for descriptor sizing
pub const PAGE_SIZE: usize = 4096;

/// Size of the physical buffer window the device can address
pub const PHYS_BUFFER_WINDOW: usize = 1024 * 1024 * 1024;

/// Default maximum length of a single transfer
pub const DEFAULT_MAX_TRANSFER_LENGTH: usize = 8 * 1024 * 1024;

/// Default number of buffer slots per direction
pub const DEFAULT_SLOT_COUNT: usize = 64;
