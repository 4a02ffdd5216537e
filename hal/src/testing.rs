//! # Mock Platform
//!
//! Deterministic in-memory [`DmaPlatform`] for tests: fake BARs backed by
//! heap words, common buffers filled with a poison byte, bookkeeping of every
//! live allocation and mapping, and failure injection.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ptr::NonNull;

use hsac_core::registers::{with_channel_state, ChannelRegisters};
use hsac_core::{ChannelState, Direction, DmaControl, Error, InterruptState, PhysAddr, Register, Result};
use spin::Mutex;

use crate::mmio::MmioRegion;
use crate::platform::{CommonBuffer, DescriptorListHandle, DmaPlatform};
use crate::resources::RawResource;

/// Byte every fresh common buffer is filled with
pub const POISON: u8 = 0xA5;

/// Bus address of the fake register BAR
pub const REGISTER_BAR: PhysAddr = PhysAddr::new(0xF000_0000);

/// Bus address of the fake SRAM BAR
pub const SRAM_BAR: PhysAddr = PhysAddr::new(0xF100_0000);

/// Length of the fake SRAM BAR in bytes
pub const SRAM_LEN: usize = 0x1000;

const FIRST_BUFFER_PHYS: u64 = 0x1_0000_0000;
const FIRST_USER_ADDR: usize = 0x7F00_0000_0000;

struct FakeWindow {
    phys: PhysAddr,
    base: NonNull<u32>,
    words: usize,
}

struct FakeBuffer {
    base: NonNull<u64>,
    words: usize,
}

#[derive(Default)]
struct MockState {
    resources: Vec<RawResource>,
    windows: Vec<FakeWindow>,
    buffers: BTreeMap<u64, FakeBuffer>,
    next_phys: u64,
    allocations: usize,
    fail_alloc_after: Option<usize>,
    lists: BTreeMap<u64, Option<usize>>,
    next_list: u64,
    next_user: usize,
    user_maps: usize,
    fail_user_map_after: Option<usize>,
    order_violations: usize,
    max_map_length: Option<usize>,
}

// SAFETY: The raw pointers are owned heap allocations only reachable through
// the mutex.
unsafe impl Send for MockState {}

fn free_words<T>(base: NonNull<T>, words: usize) {
    // SAFETY: `base`/`words` came from Box::into_raw of a boxed slice of
    // exactly this length and are freed once
    drop(unsafe { Box::from_raw(core::ptr::slice_from_raw_parts_mut(base.as_ptr(), words)) });
}

/// In-memory platform
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl core::fmt::Debug for MockPlatform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MockPlatform")
            .field("live_buffers", &self.live_buffers())
            .field("live_descriptor_lists", &self.live_descriptor_lists())
            .finish()
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    /// Platform with a register BAR and an SRAM BAR
    pub fn new() -> Self {
        let state = MockState {
            resources: alloc::vec![
                RawResource::memory(REGISTER_BAR, 0x40),
                RawResource::memory(SRAM_BAR, SRAM_LEN),
            ],
            next_phys: FIRST_BUFFER_PHYS,
            next_list: 1,
            next_user: FIRST_USER_ADDR,
            ..MockState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Platform whose device has no SRAM BAR
    pub fn without_sram() -> Self {
        let platform = Self::new();
        platform.state.lock().resources.truncate(1);
        platform
    }

    /// Translated resource list the fake device reports
    pub fn resources(&self) -> Vec<RawResource> {
        self.state.lock().resources.clone()
    }

    /// Limit each scatter/gather mapping pass to `len` bytes
    pub fn set_max_map_length(&self, len: usize) {
        self.state.lock().max_map_length = Some(len);
    }

    /// Let `count` more common-buffer allocations succeed, then fail
    pub fn fail_alloc_after(&self, count: usize) {
        let mut state = self.state.lock();
        state.fail_alloc_after = Some(state.allocations + count);
    }

    /// Let `count` more user mappings succeed, then fail
    pub fn fail_user_map_after(&self, count: usize) {
        let mut state = self.state.lock();
        state.fail_user_map_after = Some(state.user_maps + count);
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_alloc_after = None;
        state.fail_user_map_after = None;
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    /// Common buffers not yet freed
    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Descriptor lists not yet freed
    pub fn live_descriptor_lists(&self) -> usize {
        self.state.lock().lists.len()
    }

    /// Descriptor lists currently mapped to user space
    pub fn live_user_mappings(&self) -> usize {
        self.state.lock().lists.values().filter(|m| m.is_some()).count()
    }

    /// Descriptor lists freed while still mapped, or unmapped twice
    pub fn order_violations(&self) -> usize {
        self.state.lock().order_violations
    }

    /// MMIO windows still mapped
    pub fn live_windows(&self) -> usize {
        self.state.lock().windows.len()
    }

    /// Copy `len` bytes of the common buffer starting at `phys`
    pub fn read_memory(&self, phys: PhysAddr, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        let (&base_phys, buffer) = state
            .buffers
            .range(..=phys.raw())
            .next_back()
            .expect("address outside every common buffer");
        let offset = (phys.raw() - base_phys) as usize;
        assert!(offset + len <= buffer.words * 8, "read past the end of a common buffer");
        // SAFETY: Range checked against the allocation above
        let bytes = unsafe { core::slice::from_raw_parts(buffer.base.as_ptr() as *const u8, buffer.words * 8) };
        bytes[offset..offset + len].to_vec()
    }

    /// Read a word of a mapped fake BAR
    pub fn read_bar(&self, bar: PhysAddr, index: usize) -> u32 {
        let state = self.state.lock();
        let window = state.windows.iter().find(|w| w.phys == bar).expect("BAR not mapped");
        assert!(index < window.words);
        // SAFETY: Index checked against the window
        unsafe { core::ptr::read_volatile(window.base.as_ptr().add(index)) }
    }

    /// Write a word of a mapped fake BAR
    pub fn write_bar(&self, bar: PhysAddr, index: usize, value: u32) {
        let state = self.state.lock();
        let window = state.windows.iter().find(|w| w.phys == bar).expect("BAR not mapped");
        assert!(index < window.words);
        // SAFETY: Index checked against the window
        unsafe { core::ptr::write_volatile(window.base.as_ptr().add(index), value) }
    }

    /// Read a device register
    pub fn register(&self, register: Register) -> u32 {
        self.read_bar(REGISTER_BAR, register.index())
    }

    /// Write a device register as the hardware would
    pub fn set_register(&self, register: Register, value: u32) {
        self.write_bar(REGISTER_BAR, register.index(), value);
    }

    /// Act as the hardware finishing a transfer on the channel serving
    /// `direction`: clear START, report `state` and raise the channel's
    /// interrupt bit
    pub fn finish_channel(&self, direction: Direction, state: ChannelState) {
        let control_reg = ChannelRegisters::for_direction(direction).control;
        let control = self.register(control_reg) & !DmaControl::START.bits();
        self.set_register(control_reg, with_channel_state(control, state));
        let pending = self.register(Register::InterruptState) | InterruptState::for_direction(direction).bits();
        self.set_register(Register::InterruptState, pending);
    }
}

impl Drop for MockPlatform {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for window in state.windows.drain(..) {
            free_words(window.base, window.words);
        }
        for (_, buffer) in core::mem::take(&mut state.buffers) {
            free_words(buffer.base, buffer.words);
        }
    }
}

// SAFETY: Windows and buffers are heap allocations that stay alive until they
// are handed back or the platform is dropped.
unsafe impl DmaPlatform for MockPlatform {
    fn map_io_space(&self, resource: &RawResource) -> Result<MmioRegion> {
        let words = resource.len / 4;
        let storage: Box<[u32]> = alloc::vec![0u32; words].into_boxed_slice();
        let base = NonNull::new(Box::into_raw(storage) as *mut u32).ok_or(Error::InsufficientResources)?;
        self.state.lock().windows.push(FakeWindow {
            phys: resource.start,
            base,
            words,
        });
        // SAFETY: `base` points to `words` live words owned by this platform
        unsafe { MmioRegion::from_raw(base.as_ptr(), words * 4, resource.start) }
    }

    fn unmap_io_space(&self, region: MmioRegion) {
        let mut state = self.state.lock();
        if let Some(pos) = state.windows.iter().position(|w| w.base.as_ptr() == region.as_ptr()) {
            let window = state.windows.remove(pos);
            free_words(window.base, window.words);
        }
    }

    fn alloc_common_buffer(&self, len: usize) -> Result<CommonBuffer> {
        let mut state = self.state.lock();
        if state.fail_alloc_after.is_some_and(|limit| state.allocations >= limit) {
            return Err(Error::InsufficientResources);
        }
        state.allocations += 1;

        let words = len.div_ceil(8).max(1);
        let poison = u64::from_ne_bytes([POISON; 8]);
        let storage: Box<[u64]> = alloc::vec![poison; words].into_boxed_slice();
        let base = NonNull::new(Box::into_raw(storage) as *mut u64).ok_or(Error::InsufficientResources)?;

        let phys = state.next_phys;
        state.next_phys += (words as u64 * 8).next_multiple_of(0x1000);
        state.buffers.insert(phys, FakeBuffer { base, words });
        // SAFETY: `base` owns at least `len` bytes until freed
        Ok(unsafe { CommonBuffer::from_raw(base.cast(), PhysAddr::new(phys), len) })
    }

    fn free_common_buffer(&self, buffer: CommonBuffer) {
        let mut state = self.state.lock();
        if let Some(fake) = state.buffers.remove(&buffer.phys().raw()) {
            free_words(fake.base, fake.words);
        } else {
            state.order_violations += 1;
        }
    }

    fn alloc_descriptor_list(&self, _buffer: &CommonBuffer) -> Result<DescriptorListHandle> {
        let mut state = self.state.lock();
        let id = state.next_list;
        state.next_list += 1;
        state.lists.insert(id, None);
        Ok(DescriptorListHandle::new(id))
    }

    fn map_user_pages(&self, list: &DescriptorListHandle) -> Result<usize> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.fail_user_map_after.is_some_and(|limit| state.user_maps >= limit) {
            return Err(Error::MappingFailed);
        }
        let Some(entry) = state.lists.get_mut(&list.raw()) else {
            state.order_violations += 1;
            return Err(Error::MappingFailed);
        };
        if entry.is_some() {
            state.order_violations += 1;
            return Err(Error::MappingFailed);
        }
        let addr = state.next_user;
        *entry = Some(addr);
        state.next_user += 0x100_0000;
        state.user_maps += 1;
        Ok(addr)
    }

    fn unmap_user_pages(&self, user_addr: usize, list: &DescriptorListHandle) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.lists.get_mut(&list.raw()) {
            Some(entry) if *entry == Some(user_addr) => *entry = None,
            _ => state.order_violations += 1,
        }
    }

    fn free_descriptor_list(&self, list: DescriptorListHandle) {
        let mut state = self.state.lock();
        match state.lists.remove(&list.raw()) {
            Some(None) => {}
            _ => state.order_violations += 1,
        }
    }

    fn max_map_length(&self) -> usize {
        self.state.lock().max_map_length.unwrap_or(usize::MAX)
    }
}
