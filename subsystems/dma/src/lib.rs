//! # HSAC DMA Subsystem
//!
//! The transfer path of the driver: per-direction request queues, the
//! transaction state machine that programs the channel registers, and the
//! scatter/gather descriptor chain builder.
//!
//! ```text
//!  submit ──▶ RequestDispatcher ──▶ TransactionEngine ──▶ channel registers
//!                 ▲  (queue)            │   │
//!                 │                     │   └──▶ descriptor chain (SG)
//!                 └──── on_interrupt ◀──┘
//! ```
//!
//! Each direction owns one dispatcher and one transaction; the two directions
//! share nothing but the device lock.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

pub mod descriptor;
pub mod dispatcher;
pub mod request;
pub mod transaction;

pub use descriptor::{build_chain, ChainSummary, DescriptorElement, DESCRIPTOR_SIZE};
pub use dispatcher::{DispatchStats, RequestDispatcher};
pub use request::{Completion, Outcome, PacketParams, RequestHandle, TransferRequest};
pub use transaction::{EngineStats, ProgramContext, Progress, TransactionEngine, TransactionState};
