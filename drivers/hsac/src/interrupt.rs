//! # Interrupt Servicing
//!
//! Split the way the host delivers interrupts:
//!
//! ```text
//!  ISR  handle_interrupt()   read + acknowledge INT_STATE under the device
//!                            lock, latch the serviced bits
//!  DPC  run_deferred()       drain the latch, drive transaction completion
//!                            for each pending channel
//! ```

use hsac_core::Direction;
use hsac_hal::irq::read_and_acknowledge;
use hsac_hal::DmaPlatform;

use crate::device::Hsac;

impl<P: DmaPlatform> Hsac<P> {
    /// Interrupt service routine
    ///
    /// Returns `false` when no channel of this device was pending, so a
    /// shared line can be passed on.
    pub fn handle_interrupt(&self) -> bool {
        let status = self.regs.with_locked(read_and_acknowledge);
        if !status.has_pending() {
            return false;
        }
        log::trace!("HSAC: interrupt {:?}", status.pending);
        self.latch.latch(status);
        true
    }

    /// Deferred completion routine
    ///
    /// Returns the number of channels serviced.
    pub fn run_deferred(&self) -> usize {
        let status = self.latch.take();
        let mut serviced = 0;
        for direction in status.directions() {
            self.complete_channel(direction);
            serviced += 1;
        }
        serviced
    }

    /// Run the service routine and, if it claimed the interrupt, the
    /// deferred routine
    pub fn service_interrupt(&self) -> bool {
        let claimed = self.handle_interrupt();
        if claimed {
            self.run_deferred();
        }
        claimed
    }

    fn complete_channel(&self, direction: Direction) {
        let progress = self.dispatcher(direction).on_interrupt(&self.context(direction));
        log::trace!("HSAC DMA[{}]: completion {:?}", direction, progress);
    }
}
