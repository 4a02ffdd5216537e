//! # Platform Abstraction
//!
//! The host environment supplies MMIO mappings, DMA-capable memory,
//! user-space exposure of that memory, and scatter/gather mapping of request
//! buffers. The driver core only talks to the host through [`DmaPlatform`].

use core::fmt;
use core::ptr::NonNull;

use hsac_core::{PhysAddr, Result};

use crate::mmio::MmioRegion;
use crate::resources::RawResource;
use crate::sg::{HostBuffer, ScatterGatherList};

// =============================================================================
// COMMON BUFFER
// =============================================================================

/// Physically contiguous memory shared with the device
pub struct CommonBuffer {
    virt: NonNull<u8>,
    phys: PhysAddr,
    len: usize,
}

// SAFETY: The buffer is owned memory handed out by the platform; the driver
// serializes CPU access to it and the device accesses it only by DMA.
unsafe impl Send for CommonBuffer {}
// SAFETY: Shared references only expose addresses; mutation goes through
// the unsafe `bytes_mut`, whose callers guarantee exclusivity.
unsafe impl Sync for CommonBuffer {}

impl CommonBuffer {
    /// Wrap memory returned by a platform allocator
    ///
    /// # Safety
    /// `virt` must be valid for reads and writes of `len` bytes until the
    /// buffer is handed back with [`DmaPlatform::free_common_buffer`], and
    /// `phys` must be the device-visible address of the same memory.
    pub unsafe fn from_raw(virt: NonNull<u8>, phys: PhysAddr, len: usize) -> Self {
        Self { virt, phys, len }
    }

    /// Kernel virtual address
    #[inline]
    pub fn virt(&self) -> NonNull<u8> {
        self.virt
    }

    /// Device-visible address
    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is zero-sized
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fill the buffer with zeroes
    pub fn zero(&mut self) {
        // SAFETY: `virt` is valid for `len` bytes (from_raw contract) and
        // `&mut self` excludes other CPU access
        unsafe { core::ptr::write_bytes(self.virt.as_ptr(), 0, self.len) }
    }

    /// Mutable view of the buffer contents
    ///
    /// # Safety
    /// The caller must be the only party touching these bytes from the CPU
    /// for the lifetime of the returned slice, and the device must not be
    /// reading or writing them.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self) -> &mut [u8] {
        // SAFETY: Validity from the from_raw contract, exclusivity from the caller
        unsafe { core::slice::from_raw_parts_mut(self.virt.as_ptr(), self.len) }
    }

    /// Shared view of the buffer contents
    ///
    /// # Safety
    /// No one may write the bytes (CPU or device) while the slice is alive.
    pub unsafe fn bytes(&self) -> &[u8] {
        // SAFETY: Validity from the from_raw contract, no writers per caller
        unsafe { core::slice::from_raw_parts(self.virt.as_ptr(), self.len) }
    }
}

impl fmt::Debug for CommonBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommonBuffer")
            .field("phys", &self.phys)
            .field("len", &self.len)
            .finish()
    }
}

// =============================================================================
// USER MAPPING HANDLES
// =============================================================================

/// Opaque handle of a memory-descriptor list built over a common buffer
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DescriptorListHandle(u64);

impl DescriptorListHandle {
    /// Wrap a platform handle value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Platform handle value
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

// =============================================================================
// PLATFORM TRAIT
// =============================================================================

/// Host services needed by the driver core
///
/// # Safety
/// Implementors must return MMIO windows and common buffers that satisfy the
/// contracts of [`MmioRegion::from_raw`] and [`CommonBuffer::from_raw`], and
/// keep them valid until they are handed back.
pub unsafe trait DmaPlatform: Send + Sync {
    /// Map a memory resource into the kernel address space
    fn map_io_space(&self, resource: &RawResource) -> Result<MmioRegion>;

    /// Release a window returned by `map_io_space`
    fn unmap_io_space(&self, region: MmioRegion);

    /// Allocate a physically contiguous, device-visible buffer
    fn alloc_common_buffer(&self, len: usize) -> Result<CommonBuffer>;

    /// Free a buffer returned by `alloc_common_buffer`
    fn free_common_buffer(&self, buffer: CommonBuffer);

    /// Build a memory-descriptor list describing `buffer`
    fn alloc_descriptor_list(&self, buffer: &CommonBuffer) -> Result<DescriptorListHandle>;

    /// Map the pages of a descriptor list into the calling process
    ///
    /// Returns the user-space address of the first byte.
    fn map_user_pages(&self, list: &DescriptorListHandle) -> Result<usize>;

    /// Undo `map_user_pages`
    fn unmap_user_pages(&self, user_addr: usize, list: &DescriptorListHandle);

    /// Free a descriptor list (its pages must no longer be mapped)
    fn free_descriptor_list(&self, list: DescriptorListHandle);

    /// Longest sub-range the adapter maps in one pass
    fn max_map_length(&self) -> usize {
        usize::MAX
    }

    /// Scatter/gather list for `[offset, offset + max_len)` of a request buffer
    fn map_transfer(
        &self,
        buffer: &HostBuffer,
        offset: usize,
        max_len: usize,
    ) -> Result<ScatterGatherList> {
        ScatterGatherList::slice_of(buffer, offset, max_len.min(self.max_map_length()))
    }
}

// SAFETY: Forwards to `T`, which upholds the contract.
unsafe impl<T: DmaPlatform + ?Sized> DmaPlatform for &T {
    fn map_io_space(&self, resource: &RawResource) -> Result<MmioRegion> {
        (**self).map_io_space(resource)
    }

    fn unmap_io_space(&self, region: MmioRegion) {
        (**self).unmap_io_space(region)
    }

    fn alloc_common_buffer(&self, len: usize) -> Result<CommonBuffer> {
        (**self).alloc_common_buffer(len)
    }

    fn free_common_buffer(&self, buffer: CommonBuffer) {
        (**self).free_common_buffer(buffer)
    }

    fn alloc_descriptor_list(&self, buffer: &CommonBuffer) -> Result<DescriptorListHandle> {
        (**self).alloc_descriptor_list(buffer)
    }

    fn map_user_pages(&self, list: &DescriptorListHandle) -> Result<usize> {
        (**self).map_user_pages(list)
    }

    fn unmap_user_pages(&self, user_addr: usize, list: &DescriptorListHandle) {
        (**self).unmap_user_pages(user_addr, list)
    }

    fn free_descriptor_list(&self, list: DescriptorListHandle) {
        (**self).free_descriptor_list(list)
    }

    fn max_map_length(&self) -> usize {
        (**self).max_map_length()
    }

    fn map_transfer(&self, buffer: &HostBuffer, offset: usize, max_len: usize) -> Result<ScatterGatherList> {
        (**self).map_transfer(buffer, offset, max_len)
    }
}
