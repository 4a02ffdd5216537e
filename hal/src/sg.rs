//! # Scatter/Gather Lists
//!
//! A request's host buffer is a list of physically contiguous runs (what an
//! OS memory-descriptor list describes). The DMA adapter hands the driver a
//! scatter/gather list for a sub-range of that buffer at a time.

use alloc::vec::Vec;

use hsac_core::{Error, PhysAddr, Result};

// =============================================================================
// SG ELEMENT
// =============================================================================

/// One physically contiguous run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgElement {
    /// Bus address of the run
    pub addr: PhysAddr,
    /// Run length in bytes
    pub len: u32,
}

impl SgElement {
    /// Create a run
    pub const fn new(addr: PhysAddr, len: u32) -> Self {
        Self { addr, len }
    }
}

// =============================================================================
// HOST BUFFER
// =============================================================================

/// Locked host memory of a transfer request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostBuffer {
    runs: Vec<SgElement>,
    len: usize,
}

impl HostBuffer {
    /// Empty buffer (packet-profile requests carry no host memory)
    pub const fn empty() -> Self {
        Self {
            runs: Vec::new(),
            len: 0,
        }
    }

    /// Build from physical runs
    pub fn from_runs(runs: Vec<SgElement>) -> Self {
        let len = runs.iter().map(|r| r.len as usize).sum();
        Self { runs, len }
    }

    /// Physically contiguous buffer split into page-sized runs
    ///
    /// `page_size` must be nonzero and fit a run length, otherwise
    /// [`Error::InvalidSize`].
    pub fn contiguous(addr: PhysAddr, len: usize, page_size: usize) -> Result<Self> {
        if page_size == 0 || page_size > u32::MAX as usize {
            return Err(Error::InvalidSize);
        }
        let mut runs = Vec::new();
        let mut offset = 0usize;
        while offset < len {
            let page_left = page_size - ((addr.raw() as usize + offset) % page_size);
            let chunk = page_left.min(len - offset);
            runs.push(SgElement::new(addr.offset(offset as u64), chunk as u32));
            offset += chunk;
        }
        Ok(Self { runs, len })
    }

    /// Total length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Physical runs
    #[inline]
    pub fn runs(&self) -> &[SgElement] {
        &self.runs
    }
}

// =============================================================================
// SCATTER/GATHER LIST
// =============================================================================

/// Runs covering one mapped sub-range of a host buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScatterGatherList {
    elements: Vec<SgElement>,
}

impl ScatterGatherList {
    /// Build from runs
    pub fn new(elements: Vec<SgElement>) -> Self {
        Self { elements }
    }

    /// Runs of `buffer` covering `[offset, offset + max_len)`, clipped to the
    /// end of the buffer
    ///
    /// Runs crossing either boundary are split. An offset at or past the end
    /// of the buffer is an error.
    pub fn slice_of(buffer: &HostBuffer, offset: usize, max_len: usize) -> Result<Self> {
        if offset >= buffer.len() || max_len == 0 {
            return Err(Error::InvalidSize);
        }
        let mut elements = Vec::new();
        let mut skip = offset;
        let mut want = max_len.min(buffer.len() - offset);
        for run in buffer.runs() {
            if want == 0 {
                break;
            }
            let run_len = run.len as usize;
            if skip >= run_len {
                skip -= run_len;
                continue;
            }
            let take = (run_len - skip).min(want);
            elements.push(SgElement::new(run.addr.offset(skip as u64), take as u32));
            want -= take;
            skip = 0;
        }
        Ok(Self { elements })
    }

    /// Runs of the list
    #[inline]
    pub fn elements(&self) -> &[SgElement] {
        &self.elements
    }

    /// Number of runs
    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the list has no runs
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Sum of run lengths
    pub fn total_len(&self) -> usize {
        self.elements.iter().map(|e| e.len as usize).sum()
    }
}
