//! # HSAC Core Types
//!
//! Strongly typed addresses and transfer parameters used across the driver.

use core::fmt;
use core::ops::Add;

use crate::error::{Error, Result};

// =============================================================================
// PHYSICAL ADDRESS
// =============================================================================

/// Bus-logical address of host memory as seen by the device
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Create a new physical address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Low 32 bits, as programmed into an address-low register
    #[inline]
    pub const fn low(self) -> u32 {
        self.0 as u32
    }

    /// High 32 bits, as programmed into an address-high register
    #[inline]
    pub const fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Rebuild an address from its register halves
    #[inline]
    pub const fn from_parts(low: u32, high: u32) -> Self {
        Self(((high as u64) << 32) | low as u64)
    }

    /// Check alignment
    #[inline]
    pub const fn is_aligned(self, alignment: u64) -> bool {
        self.0 & (alignment - 1) == 0
    }

    /// Offset by bytes
    #[inline]
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl Add<u64> for PhysAddr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        self.offset(rhs)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr(0x{:016x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

// =============================================================================
// TRANSFER DIRECTION
// =============================================================================

/// Direction of a DMA transfer
///
/// Each direction owns one DMA channel, one request queue and one
/// transaction object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host memory to device (write requests, DMA0)
    ToDevice,
    /// Device to host memory (read requests, DMA1)
    FromDevice,
}

impl Direction {
    /// Both directions, in channel order
    pub const ALL: [Direction; 2] = [Direction::ToDevice, Direction::FromDevice];

    /// DMA channel number serving this direction
    #[inline]
    pub const fn channel(self) -> usize {
        match self {
            Self::ToDevice => 0,
            Self::FromDevice => 1,
        }
    }

    /// Decode the control-interface direction value (0 = read, 1 = write)
    pub const fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Self::FromDevice),
            1 => Ok(Self::ToDevice),
            _ => Err(Error::InvalidRequest),
        }
    }

    /// Short name used in log messages
    pub const fn name(self) -> &'static str {
        match self {
            Self::ToDevice => "write",
            Self::FromDevice => "read",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// TRANSFER PROFILE
// =============================================================================

/// How a transaction programs the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TransferProfile {
    /// Descriptor chain built from the request's scatter/gather list
    #[default]
    ScatterGather = 0,
    /// Single-shot transfer of a fixed buffer slot
    Packet = 1,
}

impl TransferProfile {
    /// Decode the control-interface profile value
    pub const fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Self::ScatterGather),
            1 => Ok(Self::Packet),
            _ => Err(Error::InvalidRequest),
        }
    }

    /// Encoding used by the control interface
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Rebuild from the value stored in an atomic
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Packet,
            _ => Self::ScatterGather,
        }
    }
}

// =============================================================================
// REQUEST ID
// =============================================================================

/// Unique identity of a transfer request within one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Create from a raw id (0 is reserved for "no request")
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
