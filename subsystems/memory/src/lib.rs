//! # HSAC Memory Subsystem
//!
//! DMA buffer management: the runtime-selected [`BufferingMode`], the
//! per-direction [`DirectionPool`]s that own every common buffer, and the
//! user-space mapping set built over them.
//!
//! ```text
//!                 BufferPool
//!        ┌──────────────┴──────────────┐
//!   DirectionPool (write)        DirectionPool (read)
//!   ├─ slot 0..N  (mode layout)  ├─ slot 0..N
//!   └─ descriptor region         └─ descriptor region
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

pub mod mapping;
pub mod mode;
pub mod pool;

pub use mode::BufferingMode;
pub use pool::{BufferPool, BufferSlot, DirectionPool};
