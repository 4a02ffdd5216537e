//! # Descriptor Chains
//!
//! The device walks a singly linked list of 20-byte descriptors, one per
//! physically contiguous run. Each element names its run and the bus address
//! of the next element; the final element carries the last-element flag.
//!
//! ```text
//!  descriptor region (per direction)
//!  ┌────────────┬────────────┬────────────┐
//!  │ run 0      │ run 1      │ run 2      │
//!  │ next ──────┼▶ next ─────┼▶ LAST      │
//!  └────────────┴────────────┴────────────┘
//! ```

use alloc::vec::Vec;

use bytemuck::{Pod, Zeroable};
use hsac_core::{Error, PhysAddr, Result, PAGE_SIZE};
use hsac_hal::SgElement;
use static_assertions::const_assert_eq;

// =============================================================================
// DESCRIPTOR ELEMENT
// =============================================================================

/// Size of one descriptor element in bytes
pub const DESCRIPTOR_SIZE: usize = 20;

/// Required alignment of descriptor addresses
pub const DESCRIPTOR_ALIGN: u64 = 4;

/// Last-element flag in `next_low`
pub const LAST_ELEMENT: u32 = 1 << 0;

/// Shift applied to the next-descriptor address before storage
pub const NEXT_ADDR_SHIFT: u32 = 2;

/// Address bits of `next_low`
const NEXT_ADDR_MASK: u32 = !((1 << NEXT_ADDR_SHIFT) - 1);

/// One hardware descriptor
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DescriptorElement {
    /// Run address, low 32 bits
    pub page_addr_low: u32,
    /// Run address, high 32 bits
    pub page_addr_high: u32,
    /// Run length in bytes
    pub transfer_size: u32,
    /// Next element address bits 31..2, plus flags in bits 1..0
    pub next_low: u32,
    /// Next element address, high 32 bits
    pub next_high: u32,
}

const_assert_eq!(core::mem::size_of::<DescriptorElement>(), DESCRIPTOR_SIZE);

impl DescriptorElement {
    /// Element for `run`, linked to `next` (or marked last when `None`)
    pub fn new(run: &SgElement, next: Option<PhysAddr>) -> Self {
        let (next_low, next_high) = match next {
            Some(addr) => (((addr.low() >> NEXT_ADDR_SHIFT) << NEXT_ADDR_SHIFT), addr.high()),
            None => (LAST_ELEMENT, 0),
        };
        Self {
            page_addr_low: run.addr.low(),
            page_addr_high: run.addr.high(),
            transfer_size: run.len,
            next_low,
            next_high,
        }
    }

    /// Whether this element ends the chain
    #[inline]
    pub fn is_last(&self) -> bool {
        self.next_low & LAST_ELEMENT != 0
    }

    /// Address of the run
    #[inline]
    pub fn page_addr(&self) -> PhysAddr {
        PhysAddr::from_parts(self.page_addr_low, self.page_addr_high)
    }

    /// Address of the next element
    #[inline]
    pub fn next_addr(&self) -> PhysAddr {
        PhysAddr::from_parts(self.next_low & NEXT_ADDR_MASK, self.next_high)
    }
}

// =============================================================================
// CHAIN BUILDER
// =============================================================================

/// Result of writing a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSummary {
    /// Bus address of the first element
    pub head: PhysAddr,
    /// Number of elements written
    pub descriptors: usize,
    /// Sum of the run lengths; the value programmed into the size register
    pub total_bytes: u32,
}

/// Bytes of descriptor storage needed for transfers up to `max_transfer`
///
/// A transfer of `n` pages can start mid-page and touch `n + 1` pages.
pub const fn storage_len(max_transfer: usize) -> usize {
    (max_transfer.div_ceil(PAGE_SIZE) + 1) * DESCRIPTOR_SIZE
}

/// Number of descriptors that fit in `storage_len` bytes
pub const fn capacity(storage_len: usize) -> usize {
    storage_len / DESCRIPTOR_SIZE
}

/// Write the chain for `runs` into `storage`, located at `storage_phys`
pub fn build_chain(runs: &[SgElement], storage: &mut [u8], storage_phys: PhysAddr) -> Result<ChainSummary> {
    if runs.is_empty() {
        return Err(Error::InvalidSize);
    }
    if !storage_phys.is_aligned(DESCRIPTOR_ALIGN) {
        return Err(Error::ConfigurationError);
    }
    if runs.len() > capacity(storage.len()) {
        log::warn!(
            "HSAC DMA: {} runs exceed descriptor capacity {}",
            runs.len(),
            capacity(storage.len())
        );
        return Err(Error::InsufficientResources);
    }

    let total: u64 = runs.iter().map(|r| r.len as u64).sum();
    let total_bytes = u32::try_from(total).map_err(|_| Error::InvalidSize)?;

    for (i, run) in runs.iter().enumerate() {
        let next = (i + 1 < runs.len()).then(|| storage_phys.offset(((i + 1) * DESCRIPTOR_SIZE) as u64));
        let element = DescriptorElement::new(run, next);
        let at = i * DESCRIPTOR_SIZE;
        storage[at..at + DESCRIPTOR_SIZE].copy_from_slice(bytemuck::bytes_of(&element));

        log::trace!(
            "HSAC DMA: dte[{}] page {} len {} next {}{}",
            i,
            run.addr,
            run.len,
            element.next_addr(),
            if element.is_last() { " (last)" } else { "" }
        );
    }

    Ok(ChainSummary {
        head: storage_phys,
        descriptors: runs.len(),
        total_bytes,
    })
}

/// Decode the first `count` elements of a stored chain
pub fn read_chain(storage: &[u8], count: usize) -> Vec<DescriptorElement> {
    storage
        .chunks_exact(DESCRIPTOR_SIZE)
        .take(count)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}
