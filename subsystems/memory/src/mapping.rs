//! # User-Space Mapping
//!
//! Zero-copy exposure of the pool's buffers to the calling process. Every
//! allocation of both directions gets a descriptor list and a user mapping.
//! At most one mapping set exists; mapping again tears the old set down first.
//!
//! Teardown always unmaps the pages before freeing the descriptor list, and
//! always does both.

use alloc::vec::Vec;

use hsac_core::{Direction, Error, Result};
use hsac_hal::{DescriptorListHandle, DmaPlatform};

use crate::pool::{BufferPool, DirectionPool};

/// One mapped allocation
#[derive(Debug)]
struct UserMapping {
    direction: Direction,
    allocation: usize,
    user_addr: usize,
    list: DescriptorListHandle,
}

impl UserMapping {
    fn release(self, platform: &dyn DmaPlatform) {
        platform.unmap_user_pages(self.user_addr, &self.list);
        platform.free_descriptor_list(self.list);
    }
}

/// The active mapping set of a pool
#[derive(Debug, Default)]
pub(crate) struct MappingSet {
    entries: Vec<UserMapping>,
}

impl MappingSet {
    fn release(self, platform: &dyn DmaPlatform) {
        for entry in self.entries {
            entry.release(platform);
        }
    }

    fn map_direction(&mut self, platform: &dyn DmaPlatform, pool: &DirectionPool) -> Result<()> {
        for (allocation, buffer) in pool.allocations().iter().enumerate() {
            let list = platform.alloc_descriptor_list(buffer).map_err(|err| {
                log::warn!("HSAC map[{}]: descriptor list for buffer {} failed: {}", pool.direction(), allocation, err);
                Error::MappingFailed
            })?;
            let user_addr = match platform.map_user_pages(&list) {
                Ok(addr) => addr,
                Err(err) => {
                    log::warn!("HSAC map[{}]: mapping buffer {} failed: {}", pool.direction(), allocation, err);
                    platform.free_descriptor_list(list);
                    return Err(Error::MappingFailed);
                }
            };
            self.entries.push(UserMapping {
                direction: pool.direction(),
                allocation,
                user_addr,
                list,
            });
        }
        Ok(())
    }
}

impl BufferPool {
    /// Map every buffer of both directions into the calling process
    ///
    /// An existing mapping set is torn down first. A failure part-way rolls
    /// back what was mapped and leaves the pool unmapped.
    pub fn map_to_user(&self, platform: &dyn DmaPlatform) -> Result<()> {
        let mut mappings = self.mappings.lock();
        if let Some(old) = mappings.take() {
            log::debug!("HSAC map: replacing existing user mapping");
            old.release(platform);
        }

        let mut set = MappingSet::default();
        for direction in Direction::ALL {
            if let Err(err) = set.map_direction(platform, self.direction(direction)) {
                set.release(platform);
                return Err(err);
            }
        }

        log::info!("HSAC map: {} buffer(s) mapped to user space", set.entries.len());
        *mappings = Some(set);
        Ok(())
    }

    /// Tear down the user mapping set; does nothing when unmapped
    pub fn unmap(&self, platform: &dyn DmaPlatform) {
        if let Some(set) = self.mappings.lock().take() {
            let count = set.entries.len();
            set.release(platform);
            log::info!("HSAC map: {} buffer(s) unmapped", count);
        }
    }

    /// Whether a mapping set is active
    pub fn is_mapped(&self) -> bool {
        self.mappings.lock().is_some()
    }

    /// User addresses of one direction's allocations, in allocation order
    ///
    /// One address for single and ping-pong modes (slot `i` sits at
    /// `i * slot_len` from it), one per buffer for multi-discrete mode.
    pub fn user_addresses(&self, direction: Direction) -> Result<Vec<usize>> {
        let mappings = self.mappings.lock();
        let set = mappings.as_ref().ok_or(Error::InvalidRequest)?;
        let mut entries: Vec<_> = set.entries.iter().filter(|e| e.direction == direction).collect();
        entries.sort_by_key(|e| e.allocation);
        Ok(entries.into_iter().map(|e| e.user_addr).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::BufferingMode;
    use hsac_hal::testing::MockPlatform;

    fn pool(platform: &MockPlatform, mode: BufferingMode) -> BufferPool {
        BufferPool::allocate(platform, mode, 4096, 256).unwrap()
    }

    #[test]
    fn test_map_unmap_map_round_trip() {
        let platform = MockPlatform::new();
        let pool = pool(&platform, BufferingMode::MultiDiscrete { slots: 4 });

        pool.map_to_user(&platform).unwrap();
        assert!(pool.is_mapped());
        assert_eq!(platform.live_descriptor_lists(), 8);
        assert_eq!(platform.live_user_mappings(), 8);
        let first = pool.user_addresses(Direction::ToDevice).unwrap();
        assert_eq!(first.len(), 4);

        pool.unmap(&platform);
        assert!(!pool.is_mapped());
        assert_eq!(platform.live_descriptor_lists(), 0);

        pool.map_to_user(&platform).unwrap();
        let second = pool.user_addresses(Direction::ToDevice).unwrap();
        assert_eq!(second.len(), 4);
        assert_ne!(first, second);
        assert_eq!(platform.live_descriptor_lists(), 8);
        assert_eq!(platform.order_violations(), 0);

        pool.release(&platform);
        assert_eq!(platform.live_descriptor_lists(), 0);
        assert_eq!(platform.live_buffers(), 0);
    }

    #[test]
    fn test_remap_replaces_existing_set() {
        let platform = MockPlatform::new();
        let pool = pool(&platform, BufferingMode::PingPong { slots: 2 });
        pool.map_to_user(&platform).unwrap();
        pool.map_to_user(&platform).unwrap();
        assert_eq!(platform.live_descriptor_lists(), 2);
        assert_eq!(pool.user_addresses(Direction::FromDevice).unwrap().len(), 1);
        assert_eq!(platform.order_violations(), 0);
        pool.release(&platform);
    }

    #[test]
    fn test_unmap_is_idempotent() {
        let platform = MockPlatform::new();
        let pool = pool(&platform, BufferingMode::Single);
        pool.unmap(&platform);
        pool.map_to_user(&platform).unwrap();
        pool.unmap(&platform);
        pool.unmap(&platform);
        assert_eq!(platform.live_descriptor_lists(), 0);
        assert_eq!(platform.order_violations(), 0);
        assert_eq!(pool.user_addresses(Direction::ToDevice), Err(Error::InvalidRequest));
        pool.release(&platform);
    }

    #[test]
    fn test_mapping_failure_rolls_back() {
        let platform = MockPlatform::new();
        let pool = pool(&platform, BufferingMode::MultiDiscrete { slots: 3 });
        platform.fail_user_map_after(4);
        assert_eq!(pool.map_to_user(&platform), Err(Error::MappingFailed));
        assert!(!pool.is_mapped());
        assert_eq!(platform.live_descriptor_lists(), 0);
        assert_eq!(platform.order_violations(), 0);

        platform.clear_failures();
        pool.map_to_user(&platform).unwrap();
        assert_eq!(platform.live_user_mappings(), 6);
        pool.release(&platform);
    }
}
