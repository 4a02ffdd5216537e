//! # Interrupt Handling
//!
//! Decoding and acknowledgement of the interrupt-state register, plus the
//! latch that hands serviced bits from the interrupt service routine to the
//! deferred completion routine.

use core::sync::atomic::{AtomicU32, Ordering};

use hsac_core::{Direction, InterruptState, Register};

use crate::access::LockedRegisters;

// =============================================================================
// INTERRUPT STATUS
// =============================================================================

/// Interrupt status read from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptStatus {
    /// Pending channel bits
    pub pending: InterruptState,
}

impl InterruptStatus {
    /// Check if any channel interrupt is pending
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Check if the channel serving `direction` is pending
    pub fn is_pending(&self, direction: Direction) -> bool {
        self.pending.contains(InterruptState::for_direction(direction))
    }

    /// Directions with a pending completion, in channel order
    pub fn directions(&self) -> impl Iterator<Item = Direction> + '_ {
        Direction::ALL.into_iter().filter(move |d| self.is_pending(*d))
    }
}

/// Read the interrupt-state register and clear the bits being serviced
///
/// Must run with the device lock held; it is the body of the interrupt
/// service routine. Bits the driver does not know about are left untouched.
pub fn read_and_acknowledge(regs: &mut LockedRegisters<'_>) -> InterruptStatus {
    let raw = regs.read(Register::InterruptState);
    let pending = InterruptState::from_bits_truncate(raw);
    if !pending.is_empty() {
        regs.write(Register::InterruptState, raw & !pending.bits());
    }
    InterruptStatus { pending }
}

// =============================================================================
// DEFERRED LATCH
// =============================================================================

/// Bits serviced by the ISR and not yet processed by the deferred routine
#[derive(Debug, Default)]
pub struct PendingLatch {
    bits: AtomicU32,
}

impl PendingLatch {
    /// Create an empty latch
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Record serviced bits
    pub fn latch(&self, status: InterruptStatus) {
        self.bits.fetch_or(status.pending.bits(), Ordering::AcqRel);
    }

    /// Take every latched bit, leaving the latch empty
    pub fn take(&self) -> InterruptStatus {
        let bits = self.bits.swap(0, Ordering::AcqRel);
        InterruptStatus {
            pending: InterruptState::from_bits_truncate(bits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_status_directions() {
        let status = InterruptStatus {
            pending: InterruptState::DMA0 | InterruptState::DMA1,
        };
        let dirs: Vec<_> = status.directions().collect();
        assert_eq!(dirs, [Direction::ToDevice, Direction::FromDevice]);

        let read_only = InterruptStatus {
            pending: InterruptState::DMA1,
        };
        assert!(read_only.is_pending(Direction::FromDevice));
        assert!(!read_only.is_pending(Direction::ToDevice));
        assert!(!InterruptStatus::default().has_pending());
    }

    #[test]
    fn test_latch_accumulates_and_drains() {
        let latch = PendingLatch::new();
        latch.latch(InterruptStatus {
            pending: InterruptState::DMA0,
        });
        latch.latch(InterruptStatus {
            pending: InterruptState::DMA1,
        });
        assert_eq!(latch.take().pending, InterruptState::all());
        assert!(!latch.take().has_pending());
    }
}
