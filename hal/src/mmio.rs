//! # Memory-Mapped I/O Windows
//!
//! Bounded 32-bit access to a mapped BAR. Every checked accessor validates the
//! word index against the window; the unchecked variants exist for callers
//! that validated the extent once at construction.

use core::fmt;
use core::ptr::NonNull;

use hsac_core::{Error, PhysAddr, Result};

// =============================================================================
// MMIO REGION
// =============================================================================

/// A mapped MMIO window, addressed in 32-bit words
pub struct MmioRegion {
    /// Virtual base of the mapping
    base: NonNull<u32>,
    /// Window length in words
    words: usize,
    /// Bus address of the BAR, kept for diagnostics
    phys: PhysAddr,
}

// SAFETY: The window is plain device memory; all access goes through
// volatile reads/writes and callers serialize through the device lock.
unsafe impl Send for MmioRegion {}

impl MmioRegion {
    /// Wrap a mapped window
    ///
    /// # Safety
    /// `base` must point to a mapping of at least `len_bytes` bytes that stays
    /// valid for volatile 32-bit access until the region is handed back to
    /// the platform.
    pub unsafe fn from_raw(base: *mut u32, len_bytes: usize, phys: PhysAddr) -> Result<Self> {
        let base = NonNull::new(base).ok_or(Error::ConfigurationError)?;
        if base.as_ptr() as usize % core::mem::align_of::<u32>() != 0 {
            return Err(Error::ConfigurationError);
        }
        Ok(Self {
            base,
            words: len_bytes / core::mem::size_of::<u32>(),
            phys,
        })
    }

    /// Window length in 32-bit words
    #[inline]
    pub fn words(&self) -> usize {
        self.words
    }

    /// Window length in bytes
    #[inline]
    pub fn len_bytes(&self) -> usize {
        self.words * core::mem::size_of::<u32>()
    }

    /// Bus address of the underlying BAR
    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    /// Virtual base pointer, for handing the window back to the platform
    #[inline]
    pub fn as_ptr(&self) -> *mut u32 {
        self.base.as_ptr()
    }

    /// Read one word
    pub fn read32(&self, index: usize) -> Result<u32> {
        if index >= self.words {
            return Err(Error::InvalidSize);
        }
        // SAFETY: Index checked against the window above
        Ok(unsafe { self.read32_unchecked(index) })
    }

    /// Write one word
    pub fn write32(&mut self, index: usize, value: u32) -> Result<()> {
        if index >= self.words {
            return Err(Error::InvalidSize);
        }
        // SAFETY: Index checked against the window above
        unsafe { self.write32_unchecked(index, value) };
        Ok(())
    }

    /// Read one word without a bounds check
    ///
    /// # Safety
    /// `index` must be below [`MmioRegion::words`].
    #[inline]
    pub unsafe fn read32_unchecked(&self, index: usize) -> u32 {
        // SAFETY: Caller guarantees the index is inside the mapping
        unsafe { core::ptr::read_volatile(self.base.as_ptr().add(index)) }
    }

    /// Write one word without a bounds check
    ///
    /// # Safety
    /// `index` must be below [`MmioRegion::words`].
    #[inline]
    pub unsafe fn write32_unchecked(&mut self, index: usize, value: u32) {
        // SAFETY: Caller guarantees the index is inside the mapping
        unsafe { core::ptr::write_volatile(self.base.as_ptr().add(index), value) }
    }

    /// Read consecutive words starting at `start` into `out`
    pub fn read_block(&self, start: usize, out: &mut [u32]) -> Result<()> {
        let end = start.checked_add(out.len()).ok_or(Error::InvalidSize)?;
        if end > self.words {
            return Err(Error::InvalidSize);
        }
        for (i, word) in out.iter_mut().enumerate() {
            // SAFETY: start + i < end <= words
            *word = unsafe { self.read32_unchecked(start + i) };
        }
        fence::mmio_read_barrier();
        Ok(())
    }

    /// Write consecutive words starting at `start`
    pub fn write_block(&mut self, start: usize, data: &[u32]) -> Result<()> {
        let end = start.checked_add(data.len()).ok_or(Error::InvalidSize)?;
        if end > self.words {
            return Err(Error::InvalidSize);
        }
        fence::mmio_write_barrier();
        for (i, &word) in data.iter().enumerate() {
            // SAFETY: start + i < end <= words
            unsafe { self.write32_unchecked(start + i, word) };
        }
        Ok(())
    }
}

impl fmt::Debug for MmioRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmioRegion")
            .field("phys", &self.phys)
            .field("words", &self.words)
            .finish()
    }
}

// =============================================================================
// RANGE CLIPPING
// =============================================================================

/// Clip a `(start, count)` word range to a window of `extent` words
///
/// Returns the number of words that can be accessed: `count` when the range
/// fits, `extent - start` when it overruns, and 0 when `start` is past the end.
#[inline]
pub const fn clip_range(start: usize, count: usize, extent: usize) -> usize {
    if start >= extent {
        return 0;
    }
    let available = extent - start;
    if count < available {
        count
    } else {
        available
    }
}

// =============================================================================
// MEMORY FENCE OPERATIONS
// =============================================================================

/// Memory barriers around MMIO sequences
pub mod fence {
    //! Memory barrier operations

    /// Compiler fence (prevents reordering)
    #[inline(always)]
    pub fn compiler() {
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }

    /// Order descriptor and register writes before the doorbell write
    #[inline(always)]
    pub fn mmio_write_barrier() {
        #[cfg(target_arch = "aarch64")]
        {
            // SAFETY: This is a memory barrier instruction
            unsafe {
                core::arch::asm!("dmb st", options(nostack, preserves_flags));
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }

    /// Order MMIO reads before later memory reads
    #[inline(always)]
    pub fn mmio_read_barrier() {
        #[cfg(target_arch = "aarch64")]
        {
            // SAFETY: This is a memory barrier instruction
            unsafe {
                core::arch::asm!("dmb ld", options(nostack, preserves_flags));
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        compiler();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_range() {
        assert_eq!(clip_range(14, 10, 16), 2);
        assert_eq!(clip_range(0, 16, 16), 16);
        assert_eq!(clip_range(3, 4, 16), 4);
        assert_eq!(clip_range(16, 1, 16), 0);
        assert_eq!(clip_range(40, 1, 16), 0);
        assert_eq!(clip_range(5, 0, 16), 0);
        assert_eq!(clip_range(1, usize::MAX, 16), 15);
    }

    #[test]
    fn test_checked_access_bounds() {
        let mut backing = [0u32; 4];
        // SAFETY: `backing` outlives the region and is 4 words long
        let mut region =
            unsafe { MmioRegion::from_raw(backing.as_mut_ptr(), 16, PhysAddr::new(0xF000_0000)) }
                .unwrap();

        region.write32(3, 0xDEAD_BEEF).unwrap();
        assert_eq!(region.read32(3), Ok(0xDEAD_BEEF));
        assert_eq!(region.read32(4), Err(Error::InvalidSize));
        assert_eq!(region.write32(4, 1), Err(Error::InvalidSize));

        region.write_block(0, &[1, 2]).unwrap();
        let mut out = [0u32; 3];
        region.read_block(1, &mut out).unwrap();
        assert_eq!(out, [2, 0, 0xDEAD_BEEF]);
        assert_eq!(region.read_block(2, &mut out), Err(Error::InvalidSize));
        assert_eq!(region.write_block(usize::MAX, &[1]), Err(Error::InvalidSize));
    }

    #[test]
    fn test_null_window_rejected() {
        // SAFETY: A null base is rejected before any access
        let region = unsafe { MmioRegion::from_raw(core::ptr::null_mut(), 64, PhysAddr::new(0)) };
        assert_eq!(region.err(), Some(Error::ConfigurationError));
    }
}
