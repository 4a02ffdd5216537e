//! # HSAC PCIe DMA Driver
//!
//! The per-device driver object. [`Hsac`] owns the register windows, the
//! buffer pool and one request dispatcher per direction, and exposes
//! transfers, interrupt servicing and the control operations.
//!
//! ## Architecture
//!
//! ```text
//!                          ┌──────────────────────────┐
//!   write() / read() ────▶ │           Hsac           │ ◀──── device_control()
//!                          │  ┌────────┐  ┌────────┐  │
//!                          │  │ write  │  │  read  │  │
//!                          │  │ queue  │  │ queue  │  │
//!                          │  └───┬────┘  └───┬────┘  │
//!                          │      ▼           ▼       │
//!                          │  TransactionEngine × 2   │
//!                          │      │                   │
//!                          │  BufferPool  RegisterAccess
//!                          └──────┼───────────┼───────┘
//!                                 ▼           ▼
//!                           common buffers   BAR0 / BAR2
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let device = Hsac::start(platform, &resources, DeviceConfig::default())?;
//! let handle = device.write(buffer, &[]);
//! // from the interrupt path
//! device.service_interrupt();
//! let bytes = handle.wait()?;
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

pub mod config;
pub mod control;
pub mod device;
pub mod interrupt;

pub use config::DeviceConfig;
pub use control::ControlCode;
pub use device::Hsac;

pub use hsac_core::{Direction, Error, RequestId, Result, TransferProfile};
pub use hsac_dma::RequestHandle;
pub use hsac_hal::{DmaPlatform, HostBuffer, RawResource};
pub use hsac_memory::BufferingMode;

#[cfg(feature = "testing")]
pub use hsac_hal::testing;
