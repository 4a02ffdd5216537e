//! # Buffer Pool
//!
//! Physically contiguous buffers for both transfer directions, allocated at
//! device start and freed at shutdown. The pool is the single owner of every
//! common buffer and of the user-space mappings built over them.

use alloc::vec::Vec;

use hsac_core::{Direction, Error, PhysAddr, Result};
use hsac_hal::{CommonBuffer, DmaPlatform};
use spin::Mutex;

use crate::mapping::MappingSet;
use crate::mode::BufferingMode;

// =============================================================================
// BUFFER SLOT
// =============================================================================

/// Location of one addressable slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSlot {
    /// Slot index
    pub index: usize,
    /// Device-visible address of the first byte
    pub phys: PhysAddr,
    /// Slot length in bytes
    pub len: usize,
    /// Allocation holding the slot
    pub allocation: usize,
    /// Byte offset of the slot inside its allocation
    pub offset: usize,
}

// =============================================================================
// DIRECTION POOL
// =============================================================================

/// Buffers of one transfer direction
#[derive(Debug)]
pub struct DirectionPool {
    direction: Direction,
    mode: BufferingMode,
    slot_len: usize,
    allocations: Vec<CommonBuffer>,
    descriptors: CommonBuffer,
}

impl DirectionPool {
    /// Allocate and zero every buffer of one direction
    ///
    /// On failure everything allocated so far is freed again.
    pub fn allocate(
        platform: &dyn DmaPlatform,
        direction: Direction,
        mode: BufferingMode,
        slot_len: usize,
        descriptor_len: usize,
    ) -> Result<Self> {
        mode.validate()?;
        if slot_len == 0 || descriptor_len == 0 {
            return Err(Error::ConfigurationError);
        }
        let allocation_len = mode.allocation_len(slot_len)?;

        let mut allocations = Vec::new();
        allocations
            .try_reserve_exact(mode.allocation_count())
            .map_err(|_| Error::InsufficientResources)?;

        for i in 0..mode.allocation_count() {
            match platform.alloc_common_buffer(allocation_len) {
                Ok(mut buffer) => {
                    buffer.zero();
                    allocations.push(buffer);
                }
                Err(err) => {
                    log::error!(
                        "HSAC pool[{}]: allocation {} of {} bytes failed: {}",
                        direction,
                        i,
                        allocation_len,
                        err
                    );
                    free_all(platform, allocations);
                    return Err(Error::InsufficientResources);
                }
            }
        }

        let descriptors = match platform.alloc_common_buffer(descriptor_len) {
            Ok(mut buffer) => {
                buffer.zero();
                buffer
            }
            Err(err) => {
                log::error!("HSAC pool[{}]: descriptor region allocation failed: {}", direction, err);
                free_all(platform, allocations);
                return Err(Error::InsufficientResources);
            }
        };

        log::debug!(
            "HSAC pool[{}]: {} slots of {} bytes ({}), descriptors at {}",
            direction,
            mode.slot_count(),
            slot_len,
            mode,
            descriptors.phys()
        );

        Ok(Self {
            direction,
            mode,
            slot_len,
            allocations,
            descriptors,
        })
    }

    /// Direction served by this pool
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Buffering mode
    #[inline]
    pub fn mode(&self) -> BufferingMode {
        self.mode
    }

    /// Number of addressable slots
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.mode.slot_count()
    }

    /// Length of each slot in bytes
    #[inline]
    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    /// Location of slot `index`
    ///
    /// Indices outside the allocated slots are rejected with `InvalidSize`.
    pub fn slot(&self, index: usize) -> Result<BufferSlot> {
        if index >= self.slot_count() {
            return Err(Error::InvalidSize);
        }
        let per_allocation = self.mode.slots_per_allocation();
        let allocation = index / per_allocation;
        let offset = (index % per_allocation) * self.slot_len;
        let buffer = self.allocations.get(allocation).ok_or(Error::InvalidSize)?;
        Ok(BufferSlot {
            index,
            phys: buffer.phys().offset(offset as u64),
            len: self.slot_len,
            allocation,
            offset,
        })
    }

    /// Common buffers backing the slots
    #[inline]
    pub fn allocations(&self) -> &[CommonBuffer] {
        &self.allocations
    }

    /// Region reserved for descriptor chains of this direction
    #[inline]
    pub fn descriptor_storage(&self) -> &CommonBuffer {
        &self.descriptors
    }

    fn release(self, platform: &dyn DmaPlatform) {
        free_all(platform, self.allocations);
        platform.free_common_buffer(self.descriptors);
    }
}

fn free_all(platform: &dyn DmaPlatform, buffers: Vec<CommonBuffer>) {
    for buffer in buffers {
        platform.free_common_buffer(buffer);
    }
}

// =============================================================================
// BUFFER POOL
// =============================================================================

/// Buffers of both directions plus their user-space mapping set
#[derive(Debug)]
pub struct BufferPool {
    write: DirectionPool,
    read: DirectionPool,
    pub(crate) mappings: Mutex<Option<MappingSet>>,
}

impl BufferPool {
    /// Allocate both directions
    ///
    /// `slot_len` is the maximum transfer length; `descriptor_len` the size of
    /// each direction's descriptor region. Nothing stays allocated on failure.
    pub fn allocate(
        platform: &dyn DmaPlatform,
        mode: BufferingMode,
        slot_len: usize,
        descriptor_len: usize,
    ) -> Result<Self> {
        let write = DirectionPool::allocate(platform, Direction::ToDevice, mode, slot_len, descriptor_len)?;
        let read = match DirectionPool::allocate(platform, Direction::FromDevice, mode, slot_len, descriptor_len) {
            Ok(read) => read,
            Err(err) => {
                write.release(platform);
                return Err(err);
            }
        };

        log::info!(
            "HSAC pool: {} mode, {} slot(s) of {} bytes per direction",
            mode,
            mode.slot_count(),
            slot_len
        );

        Ok(Self {
            write,
            read,
            mappings: Mutex::new(None),
        })
    }

    /// Buffers of one direction
    #[inline]
    pub fn direction(&self, direction: Direction) -> &DirectionPool {
        match direction {
            Direction::ToDevice => &self.write,
            Direction::FromDevice => &self.read,
        }
    }

    /// Location of slot `index` of one direction
    pub fn slot(&self, direction: Direction, index: usize) -> Result<BufferSlot> {
        self.direction(direction).slot(index)
    }

    /// Buffering mode
    #[inline]
    pub fn mode(&self) -> BufferingMode {
        self.write.mode
    }

    /// Tear down user mappings and free every buffer
    pub fn release(self, platform: &dyn DmaPlatform) {
        self.unmap(platform);
        self.write.release(platform);
        self.read.release(platform);
        log::info!("HSAC pool: released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsac_hal::testing::{MockPlatform, POISON};

    const SLOT: usize = 8192;
    const DESC: usize = 512;

    #[test]
    fn test_single_mode() {
        let platform = MockPlatform::new();
        let pool = BufferPool::allocate(&platform, BufferingMode::Single, SLOT, DESC).unwrap();
        let slot = pool.slot(Direction::ToDevice, 0).unwrap();
        assert_eq!(slot.len, SLOT);
        assert_eq!(slot.phys, pool.direction(Direction::ToDevice).allocations()[0].phys());
        assert_eq!(pool.slot(Direction::ToDevice, 1), Err(Error::InvalidSize));
        // two data buffers and two descriptor regions
        assert_eq!(platform.live_buffers(), 4);
        pool.release(&platform);
        assert_eq!(platform.live_buffers(), 0);
    }

    #[test]
    fn test_ping_pong_slots_are_offsets() {
        let platform = MockPlatform::new();
        let pool = BufferPool::allocate(&platform, BufferingMode::PingPong { slots: 3 }, SLOT, DESC).unwrap();
        let reads = pool.direction(Direction::FromDevice);
        assert_eq!(reads.allocations().len(), 1);
        assert_eq!(reads.allocations()[0].len(), 3 * SLOT);

        let base = reads.allocations()[0].phys();
        for i in 0..3 {
            let slot = reads.slot(i).unwrap();
            assert_eq!(slot.phys, base.offset((i * SLOT) as u64));
            assert_eq!(slot.allocation, 0);
            assert_eq!(slot.offset, i * SLOT);
        }
        assert_eq!(reads.slot(3), Err(Error::InvalidSize));
        pool.release(&platform);
    }

    #[test]
    fn test_multi_discrete_rejects_out_of_range_index() {
        let platform = MockPlatform::new();
        let pool =
            BufferPool::allocate(&platform, BufferingMode::MultiDiscrete { slots: 4 }, SLOT, DESC).unwrap();
        let writes = pool.direction(Direction::ToDevice);
        assert_eq!(writes.allocations().len(), 4);
        for i in 0..4 {
            let slot = writes.slot(i).unwrap();
            assert_eq!(slot.phys, writes.allocations()[i].phys());
            assert_eq!(slot.allocation, i);
        }
        assert_eq!(writes.slot(5), Err(Error::InvalidSize));
        assert_eq!(writes.slot(4), Err(Error::InvalidSize));
        pool.release(&platform);
    }

    #[test]
    fn test_buffers_are_zeroed() {
        let platform = MockPlatform::new();
        let pool = BufferPool::allocate(&platform, BufferingMode::PingPong { slots: 2 }, SLOT, DESC).unwrap();
        for direction in Direction::ALL {
            let dir = pool.direction(direction);
            let bytes = platform.read_memory(dir.allocations()[0].phys(), 2 * SLOT);
            assert!(bytes.iter().all(|&b| b == 0));
            assert!(!bytes.contains(&POISON));
            let desc = platform.read_memory(dir.descriptor_storage().phys(), DESC);
            assert!(desc.iter().all(|&b| b == 0));
        }
        pool.release(&platform);
    }

    #[test]
    fn test_partial_allocation_failure_frees_everything() {
        let platform = MockPlatform::new();
        // write direction: 4 slots + descriptors succeed, read fails midway
        platform.fail_alloc_after(7);
        let result = BufferPool::allocate(&platform, BufferingMode::MultiDiscrete { slots: 4 }, SLOT, DESC);
        assert_eq!(result.err(), Some(Error::InsufficientResources));
        assert_eq!(platform.live_buffers(), 0);
    }

    #[test]
    fn test_invalid_configuration() {
        let platform = MockPlatform::new();
        let zero_slots = BufferPool::allocate(&platform, BufferingMode::MultiDiscrete { slots: 0 }, SLOT, DESC);
        assert_eq!(zero_slots.err(), Some(Error::ConfigurationError));
        let zero_len = BufferPool::allocate(&platform, BufferingMode::Single, 0, DESC);
        assert_eq!(zero_len.err(), Some(Error::ConfigurationError));
        assert_eq!(platform.live_buffers(), 0);
    }
}
