//! # Register File Layout
//!
//! The device exposes sixteen 32-bit registers in BAR0: one control block per
//! DMA channel, identification and flash registers, the interrupt-state
//! register and a control/status register.
//!
//! Bit fields are described with masks and accessor functions instead of
//! relying on any particular bit-field layout.

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::types::{Direction, PhysAddr};

// =============================================================================
// REGISTER INDICES
// =============================================================================

/// Number of registers in the register file
pub const REGISTER_COUNT: usize = 16;

/// Size of the register file in bytes
pub const REGISTER_FILE_SIZE: usize = REGISTER_COUNT * core::mem::size_of::<u32>();

/// Device registers, by word index into BAR0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Register {
    /// DMA0 address, low 32 bits
    Dma0AddrLow = 0,
    /// DMA0 address, high 32 bits
    Dma0AddrHigh = 1,
    /// DMA0 transfer size in bytes
    Dma0Size = 2,
    /// DMA0 control/status
    Dma0Control = 3,
    /// DMA1 address, low 32 bits
    Dma1AddrLow = 4,
    /// DMA1 address, high 32 bits
    Dma1AddrHigh = 5,
    /// DMA1 transfer size in bytes
    Dma1Size = 6,
    /// DMA1 control/status
    Dma1Control = 7,
    /// Hardware/firmware version
    Version = 8,
    /// Mailbox
    Mailbox = 9,
    /// Flash control 0
    FlashControl0 = 10,
    /// Flash control 1
    FlashControl1 = 11,
    /// Link retrain counter
    RetrainCount = 12,
    /// Per-channel interrupt pending bits
    InterruptState = 13,
    /// Device identifier
    Id = 14,
    /// Control/status
    ControlStatus = 15,
}

const_assert_eq!(Register::ControlStatus as usize + 1, REGISTER_COUNT);
const_assert_eq!(REGISTER_FILE_SIZE, 0x40);

impl Register {
    /// Word index into the register file
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Byte offset from the start of BAR0
    #[inline]
    pub const fn offset(self) -> usize {
        self.index() * core::mem::size_of::<u32>()
    }
}

// =============================================================================
// CHANNEL CONTROL BLOCKS
// =============================================================================

/// The four registers that drive one DMA channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRegisters {
    /// Address low register
    pub addr_low: Register,
    /// Address high register
    pub addr_high: Register,
    /// Size register
    pub size: Register,
    /// Control/status register
    pub control: Register,
}

impl ChannelRegisters {
    /// Control block of the channel serving `direction`
    pub const fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::ToDevice => Self {
                addr_low: Register::Dma0AddrLow,
                addr_high: Register::Dma0AddrHigh,
                size: Register::Dma0Size,
                control: Register::Dma0Control,
            },
            Direction::FromDevice => Self {
                addr_low: Register::Dma1AddrLow,
                addr_high: Register::Dma1AddrHigh,
                size: Register::Dma1Size,
                control: Register::Dma1Control,
            },
        }
    }
}

// =============================================================================
// DMA CONTROL BITS
// =============================================================================

bitflags! {
    /// DMA channel control bits
    ///
    /// The channel state field (bits 11..8) is not a flag; read it with
    /// [`channel_state`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaControl: u32 {
        /// Raise an interrupt when the channel finishes
        const INT_ENABLE = 1 << 0;
        /// Device demo/loopback mode
        const DEMO_ENABLE = 1 << 1;
        /// Start the transfer
        const START = 1 << 2;
        /// Abort the running transfer
        const ABORT = 1 << 3;
        /// Address register points at a descriptor chain
        const SG_ENABLE = 1 << 4;
    }
}

/// Channel state field mask
pub const CHANNEL_STATE_MASK: u32 = 0x0000_0F00;

/// Channel state field shift
pub const CHANNEL_STATE_SHIFT: u32 = 8;

/// Decode the channel state field of a control register value
#[inline]
pub const fn channel_state(control: u32) -> ChannelState {
    ChannelState::from_bits(((control & CHANNEL_STATE_MASK) >> CHANNEL_STATE_SHIFT) as u8)
}

/// Replace the channel state field of a control register value
#[inline]
pub const fn with_channel_state(control: u32, state: ChannelState) -> u32 {
    (control & !CHANNEL_STATE_MASK) | (((state.bits() as u32) << CHANNEL_STATE_SHIFT) & CHANNEL_STATE_MASK)
}

/// Channel state reported in bits 11..8 of a channel control register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Last transfer completed successfully
    Success,
    /// Channel stopped (aborted or never started)
    Stopped,
    /// PCIe completion timeout
    CompletionTimeout,
    /// Completion with unsupported-request status
    CompletionUnsupported,
    /// Completion with completer-abort status
    CompletionAbort,
    /// Completion with configuration-retry status
    CompletionRetry,
    /// Channel busy
    Busy,
    /// Issuing requests
    Requesting,
    /// Waiting for completions
    WaitingCompletion,
    /// Waiting for data
    WaitingData,
    /// Encoding not defined by the hardware
    Unknown(u8),
}

impl ChannelState {
    /// Decode a 4-bit state value
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0xF {
            0b0000 => Self::Success,
            0b0001 => Self::Stopped,
            0b0010 => Self::CompletionTimeout,
            0b0011 => Self::CompletionUnsupported,
            0b0100 => Self::CompletionAbort,
            0b0101 => Self::CompletionRetry,
            0b1000 => Self::Busy,
            0b1001 => Self::Requesting,
            0b1010 => Self::WaitingCompletion,
            0b1011 => Self::WaitingData,
            other => Self::Unknown(other),
        }
    }

    /// 4-bit encoding
    pub const fn bits(self) -> u8 {
        match self {
            Self::Success => 0b0000,
            Self::Stopped => 0b0001,
            Self::CompletionTimeout => 0b0010,
            Self::CompletionUnsupported => 0b0011,
            Self::CompletionAbort => 0b0100,
            Self::CompletionRetry => 0b0101,
            Self::Busy => 0b1000,
            Self::Requesting => 0b1001,
            Self::WaitingCompletion => 0b1010,
            Self::WaitingData => 0b1011,
            Self::Unknown(bits) => bits & 0xF,
        }
    }

    /// The channel is still moving data
    pub const fn is_running(self) -> bool {
        matches!(
            self,
            Self::Busy | Self::Requesting | Self::WaitingCompletion | Self::WaitingData
        )
    }

    /// The last transfer ended with a PCIe completion error
    pub const fn is_error(self) -> bool {
        matches!(
            self,
            Self::CompletionTimeout
                | Self::CompletionUnsupported
                | Self::CompletionAbort
                | Self::CompletionRetry
                | Self::Unknown(_)
        )
    }
}

// =============================================================================
// INTERRUPT STATE
// =============================================================================

bitflags! {
    /// Interrupt-state register: one pending bit per DMA channel
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterruptState: u32 {
        /// DMA0 (write channel) finished
        const DMA0 = 1 << 0;
        /// DMA1 (read channel) finished
        const DMA1 = 1 << 1;
    }
}

impl InterruptState {
    /// Pending bit of the channel serving `direction`
    pub const fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::ToDevice => Self::DMA0,
            Direction::FromDevice => Self::DMA1,
        }
    }
}

// =============================================================================
// REGISTER FILE SNAPSHOT
// =============================================================================

/// Typed copy of the whole register file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterFile {
    words: [u32; REGISTER_COUNT],
}

impl RegisterFile {
    /// Build from raw words (missing words read as zero)
    pub fn from_words(words: &[u32]) -> Self {
        let mut file = Self::default();
        let count = words.len().min(REGISTER_COUNT);
        file.words[..count].copy_from_slice(&words[..count]);
        file
    }

    /// Raw value of a register
    #[inline]
    pub const fn get(&self, register: Register) -> u32 {
        self.words[register.index()]
    }

    /// Control bits of the channel serving `direction`
    pub const fn control(&self, direction: Direction) -> DmaControl {
        DmaControl::from_bits_retain(self.get(ChannelRegisters::for_direction(direction).control))
    }

    /// Channel state of the channel serving `direction`
    pub const fn channel_state(&self, direction: Direction) -> ChannelState {
        channel_state(self.get(ChannelRegisters::for_direction(direction).control))
    }

    /// Programmed address of the channel serving `direction`
    pub const fn address(&self, direction: Direction) -> PhysAddr {
        let regs = ChannelRegisters::for_direction(direction);
        PhysAddr::from_parts(self.get(regs.addr_low), self.get(regs.addr_high))
    }

    /// Programmed size of the channel serving `direction`
    pub const fn size(&self, direction: Direction) -> u32 {
        self.get(ChannelRegisters::for_direction(direction).size)
    }

    /// Pending interrupt bits
    pub const fn interrupt_state(&self) -> InterruptState {
        InterruptState::from_bits_truncate(self.get(Register::InterruptState))
    }

    /// Version register
    pub const fn version(&self) -> u32 {
        self.get(Register::Version)
    }
}
