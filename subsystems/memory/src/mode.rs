//! # Buffering Modes
//!
//! How the buffers of one direction are laid out. The mode is chosen once at
//! device start; everything outside the pool addresses buffers by slot index.

use core::fmt;

use hsac_core::{Error, Result};

/// Buffer layout of one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferingMode {
    /// One shared buffer
    Single,
    /// One large buffer split into `slots` fixed-size slots
    PingPong {
        /// Number of slots
        slots: usize,
    },
    /// `slots` independently allocated buffers
    MultiDiscrete {
        /// Number of buffers
        slots: usize,
    },
}

impl BufferingMode {
    /// Number of addressable slots
    pub const fn slot_count(&self) -> usize {
        match *self {
            Self::Single => 1,
            Self::PingPong { slots } | Self::MultiDiscrete { slots } => slots,
        }
    }

    /// Number of separate common-buffer allocations
    pub const fn allocation_count(&self) -> usize {
        match *self {
            Self::Single | Self::PingPong { .. } => 1,
            Self::MultiDiscrete { slots } => slots,
        }
    }

    /// Slots carried by each allocation
    pub const fn slots_per_allocation(&self) -> usize {
        match *self {
            Self::PingPong { slots } => slots,
            Self::Single | Self::MultiDiscrete { .. } => 1,
        }
    }

    /// Byte length of each allocation for a given slot length
    pub fn allocation_len(&self, slot_len: usize) -> Result<usize> {
        slot_len
            .checked_mul(self.slots_per_allocation())
            .ok_or(Error::InsufficientResources)
    }

    /// Check the mode describes at least one slot
    pub fn validate(&self) -> Result<()> {
        if self.slot_count() == 0 {
            return Err(Error::ConfigurationError);
        }
        Ok(())
    }
}

impl fmt::Display for BufferingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::PingPong { slots } => write!(f, "ping-pong x{}", slots),
            Self::MultiDiscrete { slots } => write!(f, "multi-discrete x{}", slots),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_and_allocation_counts() {
        assert_eq!(BufferingMode::Single.slot_count(), 1);
        assert_eq!(BufferingMode::Single.allocation_count(), 1);

        let ping_pong = BufferingMode::PingPong { slots: 4 };
        assert_eq!(ping_pong.slot_count(), 4);
        assert_eq!(ping_pong.allocation_count(), 1);
        assert_eq!(ping_pong.allocation_len(4096), Ok(16384));

        let discrete = BufferingMode::MultiDiscrete { slots: 4 };
        assert_eq!(discrete.slot_count(), 4);
        assert_eq!(discrete.allocation_count(), 4);
        assert_eq!(discrete.allocation_len(4096), Ok(4096));
    }

    #[test]
    fn test_validate() {
        assert!(BufferingMode::Single.validate().is_ok());
        assert_eq!(BufferingMode::PingPong { slots: 0 }.validate(), Err(Error::ConfigurationError));
        assert_eq!(
            BufferingMode::MultiDiscrete { slots: 0 }.validate(),
            Err(Error::ConfigurationError)
        );
        assert_eq!(
            BufferingMode::PingPong { slots: 2 }.allocation_len(usize::MAX),
            Err(Error::InsufficientResources)
        );
    }
}
