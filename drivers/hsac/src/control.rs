//! # Control Operations
//!
//! The device-control interface: a numeric operation code, an input payload
//! and an output buffer. Payload words are little-endian `u32`s; mapped
//! buffer addresses are returned as little-endian `u64`s.
//!
//! | Code  | Operation          | Input                  | Output          |
//! |-------|--------------------|------------------------|-----------------|
//! | 0x800 | GetVersion         |                        | u32             |
//! | 0x801 | Reset              |                        | u32 status      |
//! | 0x802 | GetRegisters       | start, count           | count × u32     |
//! | 0x803 | GetRegister        | index                  | u32             |
//! | 0x804 | SetRegister        | index, value           |                 |
//! | 0x805 | GetSram            | start, count           | count × u32     |
//! | 0x806 | SetSram            | start, count, data...  |                 |
//! | 0x807 | MapBuffer          | direction (0=rd, 1=wr) | u64 per buffer  |
//! | 0x808 | UnmapBuffer        |                        |                 |
//! | 0x809 | SetTransferProfile | profile (0=SG, 1=pkt)  |                 |

use alloc::vec::Vec;
use core::mem::size_of;

use hsac_core::{Direction, Error, Register, Result, TransferProfile};
use hsac_hal::mmio::clip_range;
use hsac_hal::DmaPlatform;

use crate::device::Hsac;

// =============================================================================
// OPERATION CODES
// =============================================================================

/// Control operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ControlCode {
    /// Read the version register
    GetVersion = 0x800,
    /// Full hardware reset
    Reset = 0x801,
    /// Bulk register read
    GetRegisters = 0x802,
    /// Single register read
    GetRegister = 0x803,
    /// Single register write
    SetRegister = 0x804,
    /// Bulk SRAM read
    GetSram = 0x805,
    /// Bulk SRAM write
    SetSram = 0x806,
    /// Map the buffers into the caller's address space
    MapBuffer = 0x807,
    /// Tear down the user mapping
    UnmapBuffer = 0x808,
    /// Select the transfer profile
    SetTransferProfile = 0x809,
}

impl TryFrom<u32> for ControlCode {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self> {
        Ok(match code {
            0x800 => Self::GetVersion,
            0x801 => Self::Reset,
            0x802 => Self::GetRegisters,
            0x803 => Self::GetRegister,
            0x804 => Self::SetRegister,
            0x805 => Self::GetSram,
            0x806 => Self::SetSram,
            0x807 => Self::MapBuffer,
            0x808 => Self::UnmapBuffer,
            0x809 => Self::SetTransferProfile,
            _ => return Err(Error::InvalidRequest),
        })
    }
}

// =============================================================================
// PAYLOAD CODEC
// =============================================================================

/// Fixed leading argument words of an input payload
fn args<const N: usize>(input: &[u8]) -> Result<[u32; N]>
where
    [u32; N]: bytemuck::Pod,
{
    let bytes = input.get(..N * size_of::<u32>()).ok_or(Error::BufferTooSmall)?;
    let raw: [u32; N] = bytemuck::pod_read_unaligned(bytes);
    Ok(raw.map(u32::from_le))
}

/// Trailing data words of an input payload after `skip` argument words
fn data_words(input: &[u8], skip: usize, count: usize) -> Result<Vec<u32>> {
    let start = skip * size_of::<u32>();
    let end = start + count * size_of::<u32>();
    let bytes = input.get(start..end).ok_or(Error::BufferTooSmall)?;
    Ok(bytes
        .chunks_exact(size_of::<u32>())
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn ensure_output(output: &[u8], len: usize) -> Result<()> {
    if output.len() < len {
        return Err(Error::BufferTooSmall);
    }
    Ok(())
}

fn put_words(output: &mut [u8], words: &[u32]) -> Result<usize> {
    let len = words.len() * size_of::<u32>();
    ensure_output(output, len)?;
    for (chunk, word) in output.chunks_exact_mut(size_of::<u32>()).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    Ok(len)
}

fn put_addresses(output: &mut [u8], addresses: &[usize]) -> Result<usize> {
    let len = addresses.len() * size_of::<u64>();
    ensure_output(output, len)?;
    for (chunk, addr) in output.chunks_exact_mut(size_of::<u64>()).zip(addresses) {
        chunk.copy_from_slice(&(*addr as u64).to_le_bytes());
    }
    Ok(len)
}

// =============================================================================
// DISPATCH
// =============================================================================

impl<P: DmaPlatform> Hsac<P> {
    /// Execute a control operation
    ///
    /// Returns the number of output bytes written.
    pub fn device_control(&self, code: u32, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let code = ControlCode::try_from(code).inspect_err(|_| {
            log::warn!("HSAC control: unknown code {:#x}", code);
        })?;
        log::trace!("HSAC control: {:?}, {} byte(s) in", code, input.len());

        match code {
            ControlCode::GetVersion => {
                let version = self.regs.read_register(Register::Version.index())?;
                put_words(output, &[version])
            }
            ControlCode::Reset => {
                ensure_output(output, size_of::<u32>())?;
                let status = self.reset();
                put_words(output, &[status])
            }
            ControlCode::GetRegisters => {
                let [start, count] = args::<2>(input)?;
                let words = self.regs.read_registers(start as usize, count as usize);
                put_words(output, &words)
            }
            ControlCode::GetRegister => {
                let [index] = args::<1>(input)?;
                let value = self.regs.read_register(index as usize)?;
                put_words(output, &[value])
            }
            ControlCode::SetRegister => {
                let [index, value] = args::<2>(input)?;
                self.regs.write_register(index as usize, value)?;
                Ok(0)
            }
            ControlCode::GetSram => {
                let [start, count] = args::<2>(input)?;
                let words = self.regs.read_sram(start as usize, count as usize)?;
                put_words(output, &words)
            }
            ControlCode::SetSram => {
                let [start, count] = args::<2>(input)?;
                let extent = self.regs.sram_words().ok_or(Error::NotSupported)?;
                let count = clip_range(start as usize, count as usize, extent);
                let data = data_words(input, 2, count)?;
                self.regs.write_sram(start as usize, count, &data)?;
                Ok(0)
            }
            ControlCode::MapBuffer => {
                let [code] = args::<1>(input)?;
                let direction = Direction::from_code(code)?;
                let buffers = self.pool.direction(direction).allocations().len();
                ensure_output(output, buffers * size_of::<u64>())?;
                self.pool.map_to_user(&self.platform)?;
                let addresses = self.pool.user_addresses(direction)?;
                put_addresses(output, &addresses)
            }
            ControlCode::UnmapBuffer => {
                self.pool.unmap(&self.platform);
                Ok(0)
            }
            ControlCode::SetTransferProfile => {
                let [code] = args::<1>(input)?;
                self.set_profile(TransferProfile::from_code(code)?);
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceConfig;
    use alloc::vec;
    use hsac_hal::testing::MockPlatform;
    use hsac_memory::BufferingMode;

    fn start(platform: &MockPlatform, buffering: BufferingMode) -> Hsac<&MockPlatform> {
        let config = DeviceConfig::default()
            .with_max_transfer_length(8192)
            .with_buffering(buffering);
        Hsac::start(platform, &platform.resources(), config).unwrap()
    }

    fn words(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn decode(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_unknown_code() {
        let platform = MockPlatform::new();
        let device = start(&platform, BufferingMode::Single);
        assert_eq!(device.device_control(0x7FF, &[], &mut []), Err(Error::InvalidRequest));
        assert_eq!(device.device_control(0x80A, &[], &mut []), Err(Error::InvalidRequest));
        device.shutdown();
    }

    #[test]
    fn test_get_registers_clips_to_register_file() {
        let platform = MockPlatform::new();
        let device = start(&platform, BufferingMode::Single);
        platform.set_register(Register::Id, 0x2801_9408);
        platform.set_register(Register::ControlStatus, 0x5);

        let mut out = [0u8; 64];
        let n = device.device_control(0x802, &words(&[14, 10]), &mut out).unwrap();
        assert_eq!(n, 8);
        assert_eq!(decode(&out[..n]), [0x2801_9408, 0x5]);

        assert_eq!(device.device_control(0x802, &words(&[16, 4]), &mut out), Ok(0));
        assert_eq!(device.device_control(0x802, &words(&[3, 0]), &mut out), Ok(0));
        assert_eq!(device.device_control(0x802, &words(&[0]), &mut out), Err(Error::BufferTooSmall));
        assert_eq!(
            device.device_control(0x802, &words(&[0, 16]), &mut out[..60]),
            Err(Error::BufferTooSmall)
        );
        device.shutdown();
    }

    #[test]
    fn test_single_register_access() {
        let platform = MockPlatform::new();
        let device = start(&platform, BufferingMode::Single);
        platform.set_register(Register::Version, 0x0102_0304);

        let mut out = [0u8; 4];
        assert_eq!(device.device_control(0x800, &[], &mut out), Ok(4));
        assert_eq!(u32::from_le_bytes(out), 0x0102_0304);

        assert_eq!(device.device_control(0x804, &words(&[9, 0xCAFE]), &mut []), Ok(0));
        assert_eq!(platform.register(Register::Mailbox), 0xCAFE);
        assert_eq!(device.device_control(0x803, &words(&[9]), &mut out), Ok(4));
        assert_eq!(u32::from_le_bytes(out), 0xCAFE);

        assert_eq!(device.device_control(0x804, &words(&[16, 1]), &mut []), Err(Error::InvalidSize));
        assert_eq!(device.device_control(0x803, &words(&[99]), &mut out), Err(Error::InvalidSize));
        device.shutdown();
    }

    #[test]
    fn test_sram_round_trip_and_clipping() {
        let platform = MockPlatform::new();
        let device = start(&platform, BufferingMode::Single);

        let input = words(&[1020, 4, 1, 2, 3, 4]);
        assert_eq!(device.device_control(0x806, &input, &mut []), Ok(0));

        let mut out = [0u8; 64];
        let n = device.device_control(0x805, &words(&[1020, 10]), &mut out).unwrap();
        assert_eq!(decode(&out[..n]), [1, 2, 3, 4]);

        // count past the end is clipped; only the words that fit are needed
        let input = words(&[1022, 8, 7, 8]);
        assert_eq!(device.device_control(0x806, &input, &mut []), Ok(0));
        let n = device.device_control(0x805, &words(&[1022, 2]), &mut out).unwrap();
        assert_eq!(decode(&out[..n]), [7, 8]);

        let short = words(&[0, 3, 1]);
        assert_eq!(device.device_control(0x806, &short, &mut []), Err(Error::BufferTooSmall));
        assert_eq!(device.device_control(0x805, &words(&[2000, 1]), &mut out), Ok(0));
        device.shutdown();
    }

    #[test]
    fn test_sram_not_supported_without_window() {
        let platform = MockPlatform::without_sram();
        let device = start(&platform, BufferingMode::Single);
        let mut out = [0u8; 16];
        assert_eq!(device.device_control(0x805, &words(&[0, 1]), &mut out), Err(Error::NotSupported));
        assert_eq!(
            device.device_control(0x806, &words(&[0, 1, 5]), &mut out),
            Err(Error::NotSupported)
        );
        device.shutdown();
    }

    #[test]
    fn test_map_unmap_map() {
        let platform = MockPlatform::new();
        let device = start(&platform, BufferingMode::MultiDiscrete { slots: 4 });

        let mut out = vec![0u8; 4 * 8];
        assert_eq!(device.device_control(0x807, &words(&[1]), &mut out), Ok(32));
        let first: Vec<u64> = out.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect();
        assert!(first.iter().all(|&a| a != 0));
        assert_eq!(platform.live_descriptor_lists(), 8);

        assert_eq!(device.device_control(0x808, &[], &mut []), Ok(0));
        assert_eq!(device.device_control(0x808, &[], &mut []), Ok(0));
        assert_eq!(platform.live_descriptor_lists(), 0);

        assert_eq!(device.device_control(0x807, &words(&[0]), &mut out), Ok(32));
        assert_eq!(platform.live_descriptor_lists(), 8);
        assert_eq!(platform.live_user_mappings(), 8);
        assert_eq!(platform.order_violations(), 0);

        assert_eq!(device.device_control(0x807, &words(&[2]), &mut out), Err(Error::InvalidRequest));
        assert_eq!(
            device.device_control(0x807, &words(&[1]), &mut out[..8]),
            Err(Error::BufferTooSmall)
        );
        device.shutdown();
        assert_eq!(platform.live_descriptor_lists(), 0);
    }

    #[test]
    fn test_ping_pong_maps_one_address() {
        let platform = MockPlatform::new();
        let device = start(&platform, BufferingMode::PingPong { slots: 3 });
        let mut out = [0u8; 8];
        assert_eq!(device.device_control(0x807, &words(&[0]), &mut out), Ok(8));
        device.shutdown();
    }

    #[test]
    fn test_set_transfer_profile_and_reset() {
        let platform = MockPlatform::new();
        let device = start(&platform, BufferingMode::Single);

        assert_eq!(device.device_control(0x809, &words(&[1]), &mut []), Ok(0));
        assert_eq!(device.profile(), TransferProfile::Packet);
        assert_eq!(device.device_control(0x809, &words(&[2]), &mut []), Err(Error::InvalidRequest));
        assert_eq!(device.device_control(0x809, &words(&[0]), &mut []), Ok(0));
        assert_eq!(device.profile(), TransferProfile::ScatterGather);

        platform.set_register(Register::ControlStatus, 0xABCD);
        platform.set_register(Register::Dma1Control, 0x4);
        let mut out = [0u8; 4];
        assert_eq!(device.device_control(0x801, &[], &mut out[..3]), Err(Error::BufferTooSmall));
        assert_eq!(platform.register(Register::Dma1Control), 0x4);
        assert_eq!(device.device_control(0x801, &[], &mut out), Ok(4));
        assert_eq!(u32::from_le_bytes(out), 0xABCD);
        assert_eq!(platform.register(Register::Dma1Control), 0);
        device.shutdown();
    }
}
