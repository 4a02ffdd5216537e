//! # Register and SRAM Access
//!
//! Bounds-checked access to the register file (BAR0) and the optional SRAM
//! window (BAR2). A single device-wide lock serializes every access; the
//! transfer path, the control path and the interrupt handler all take it.
//!
//! Bulk reads and writes clip their count to the window instead of failing,
//! so a request running past the end returns only the words that exist.

use alloc::vec;
use alloc::vec::Vec;

use hsac_core::registers::REGISTER_COUNT;
use hsac_core::{Error, Register, RegisterFile, Result};
use spin::Mutex;

use crate::mmio::{clip_range, fence, MmioRegion};

// =============================================================================
// DEVICE WINDOWS
// =============================================================================

/// The mapped windows guarded by the device lock
#[derive(Debug)]
struct Windows {
    registers: MmioRegion,
    sram: Option<MmioRegion>,
}

/// Windows handed back by a failed [`RegisterAccess::new`], so the caller
/// can unmap them
#[derive(Debug)]
pub struct RejectedWindows {
    /// Why the windows were refused
    pub error: Error,
    /// Register window
    pub registers: MmioRegion,
    /// SRAM window, when one was given
    pub sram: Option<MmioRegion>,
}

impl From<RejectedWindows> for Error {
    fn from(rejected: RejectedWindows) -> Self {
        rejected.error
    }
}

/// Lock-protected access to device registers and SRAM
#[derive(Debug)]
pub struct RegisterAccess {
    lock: Mutex<Windows>,
    sram_words: Option<usize>,
}

impl RegisterAccess {
    /// Take ownership of the mapped windows
    ///
    /// Fails with `ConfigurationError` when the register window is too small
    /// to hold the register file.
    pub fn new(registers: MmioRegion, sram: Option<MmioRegion>) -> core::result::Result<Self, RejectedWindows> {
        if registers.words() < REGISTER_COUNT {
            log::error!(
                "HSAC: register window holds {} words, need {}",
                registers.words(),
                REGISTER_COUNT
            );
            return Err(RejectedWindows {
                error: Error::ConfigurationError,
                registers,
                sram,
            });
        }
        let sram_words = sram.as_ref().map(MmioRegion::words);
        Ok(Self {
            lock: Mutex::new(Windows { registers, sram }),
            sram_words,
        })
    }

    /// Give the windows back, for unmapping at shutdown
    pub fn into_windows(self) -> (MmioRegion, Option<MmioRegion>) {
        let windows = self.lock.into_inner();
        (windows.registers, windows.sram)
    }

    /// Number of addressable registers
    #[inline]
    pub const fn register_count(&self) -> usize {
        REGISTER_COUNT
    }

    /// SRAM length in words, if the device has SRAM
    #[inline]
    pub fn sram_words(&self) -> Option<usize> {
        self.sram_words
    }

    // =========================================================================
    // REGISTERS
    // =========================================================================

    /// Bulk register read, clipped to the register file
    ///
    /// A zero effective count returns an empty vector without touching the
    /// device.
    pub fn read_registers(&self, start: usize, count: usize) -> Vec<u32> {
        let count = clip_range(start, count, REGISTER_COUNT);
        if count == 0 {
            return Vec::new();
        }
        let mut out = vec![0u32; count];
        let windows = self.lock.lock();
        for (i, word) in out.iter_mut().enumerate() {
            // SAFETY: start + count <= REGISTER_COUNT <= window size (checked in new)
            *word = unsafe { windows.registers.read32_unchecked(start + i) };
        }
        fence::mmio_read_barrier();
        out
    }

    /// Single register read
    pub fn read_register(&self, index: usize) -> Result<u32> {
        if index >= REGISTER_COUNT {
            return Err(Error::InvalidSize);
        }
        let windows = self.lock.lock();
        windows.registers.read32(index)
    }

    /// Single register write, bounded to the register file
    pub fn write_register(&self, index: usize, value: u32) -> Result<()> {
        if index >= REGISTER_COUNT {
            log::warn!("HSAC: rejected register write at index {}", index);
            return Err(Error::InvalidSize);
        }
        let mut windows = self.lock.lock();
        windows.registers.write32(index, value)
    }

    /// Copy of the whole register file, taken atomically
    pub fn snapshot(&self) -> RegisterFile {
        RegisterFile::from_words(&self.read_registers(0, REGISTER_COUNT))
    }

    /// Run `f` with the device lock held
    ///
    /// Used for multi-register sequences (arming or aborting a channel,
    /// acknowledging interrupts) that must not interleave with other access.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut LockedRegisters<'_>) -> R) -> R {
        let mut windows = self.lock.lock();
        let mut locked = LockedRegisters {
            region: &mut windows.registers,
        };
        f(&mut locked)
    }

    // =========================================================================
    // SRAM
    // =========================================================================

    /// Bulk SRAM read, clipped to the SRAM window
    pub fn read_sram(&self, start: usize, count: usize) -> Result<Vec<u32>> {
        let extent = self.sram_words.ok_or(Error::NotSupported)?;
        let count = clip_range(start, count, extent);
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut out = vec![0u32; count];
        let windows = self.lock.lock();
        let sram = windows.sram.as_ref().ok_or(Error::NotSupported)?;
        sram.read_block(start, &mut out)?;
        Ok(out)
    }

    /// Bulk SRAM write of up to `count` words from `data`, clipped to the window
    ///
    /// Returns the number of words written.
    pub fn write_sram(&self, start: usize, count: usize, data: &[u32]) -> Result<usize> {
        let extent = self.sram_words.ok_or(Error::NotSupported)?;
        let count = clip_range(start, count.min(data.len()), extent);
        if count == 0 {
            return Ok(0);
        }
        let mut windows = self.lock.lock();
        let sram = windows.sram.as_mut().ok_or(Error::NotSupported)?;
        sram.write_block(start, &data[..count])?;
        Ok(count)
    }
}

// =============================================================================
// LOCKED REGISTERS
// =============================================================================

/// Register file view available while the device lock is held
#[derive(Debug)]
pub struct LockedRegisters<'a> {
    region: &'a mut MmioRegion,
}

impl LockedRegisters<'_> {
    /// Read a register
    #[inline]
    pub fn read(&self, register: Register) -> u32 {
        // SAFETY: Register indices are below REGISTER_COUNT, which the window
        // was checked to hold when the RegisterAccess was created
        unsafe { self.region.read32_unchecked(register.index()) }
    }

    /// Write a register
    #[inline]
    pub fn write(&mut self, register: Register, value: u32) {
        // SAFETY: See `read`
        unsafe { self.region.write32_unchecked(register.index(), value) }
    }

    /// Order all previous writes before the next one
    #[inline]
    pub fn barrier(&self) {
        fence::mmio_write_barrier();
    }
}
