//! # HSAC Hardware Abstraction Layer
//!
//! Everything that touches the device or the host platform:
//!
//! - [`mmio`]: bounded MMIO windows and barriers
//! - [`access`]: lock-protected register and SRAM access
//! - [`irq`]: interrupt-state decoding and the ISR to DPC latch
//! - [`resources`]: assignment of memory resources to BAR windows
//! - [`sg`]: host buffers and scatter/gather lists
//! - [`platform`]: the [`DmaPlatform`] trait the host implements
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      hsac-hal                            │
//! │  ┌────────────────┐   ┌───────────┐   ┌───────────────┐  │
//! │  │ RegisterAccess │──▶│ MmioRegion│   │  DmaPlatform  │  │
//! │  │ (device lock)  │   │ BAR0/BAR2 │   │ buffers, MDLs │  │
//! │  └────────────────┘   └───────────┘   │ SG mapping    │  │
//! │                                       └───────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

pub mod access;
pub mod irq;
pub mod mmio;
pub mod platform;
pub mod resources;
pub mod sg;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use access::{LockedRegisters, RegisterAccess, RejectedWindows};
pub use irq::{InterruptStatus, PendingLatch};
pub use mmio::MmioRegion;
pub use platform::{CommonBuffer, DescriptorListHandle, DmaPlatform};
pub use resources::{assign_bars, AssignedBars, RawResource, ResourceKind};
pub use sg::{HostBuffer, ScatterGatherList, SgElement};
