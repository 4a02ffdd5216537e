//! # Transaction Engine
//!
//! One reusable transaction object per direction drives a request through
//!
//! ```text
//! Idle ─▶ Initialized ─▶ Programming ─▶ Executing ─▶ Completed
//!              │              │  ▲           │
//!              │              │  └───────────┘ (next sub-range)
//!              └──────────────┴──────────────┴──▶ Cancelled | Failed
//! ```
//!
//! and back to Idle once the request has been completed.
//!
//! The state lives in one atomic word together with a generation number that
//! is bumped for every new request. Every transition is a compare-and-swap on
//! that word, so when cancellation races the hardware completion exactly one
//! of them reaches the terminal state; the other sees the CAS fail and
//! returns without touching the request.
//!
//! Register programming and every transition out of `Programming` happen with
//! the binding lock held. A party that wins a terminal CAS takes the binding
//! lock before releasing, so it never tears down a transfer that is still
//! being armed.

use core::sync::atomic::{AtomicU64, Ordering};

use hsac_core::registers::{channel_state, ChannelRegisters};
use hsac_core::{Direction, DmaControl, Error, PhysAddr, RequestId, Result, TransferProfile};
use hsac_hal::{DmaPlatform, RegisterAccess};
use hsac_memory::DirectionPool;
use spin::Mutex;

use crate::descriptor::build_chain;
use crate::request::TransferRequest;

// =============================================================================
// STATE
// =============================================================================

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    /// No request bound
    Idle = 0,
    /// Bound to a request, hardware untouched
    Initialized = 1,
    /// Registers being written for a sub-range
    Programming = 2,
    /// Hardware running a sub-range
    Executing = 3,
    /// All bytes transferred
    Completed = 4,
    /// Cancelled by the originator or the driver
    Cancelled = 5,
    /// Programming or hardware error
    Failed = 6,
}

impl TransactionState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Initialized,
            2 => Self::Programming,
            3 => Self::Executing,
            4 => Self::Completed,
            5 => Self::Cancelled,
            6 => Self::Failed,
            _ => Self::Idle,
        }
    }

    /// States in which a request is bound and may be cancelled
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Initialized | Self::Programming | Self::Executing)
    }
}

const STATE_BITS: u32 = 8;

const fn pack(generation: u64, state: TransactionState) -> u64 {
    (generation << STATE_BITS) | state as u64
}

const fn unpack(word: u64) -> (u64, TransactionState) {
    (word >> STATE_BITS, TransactionState::from_raw(word as u8))
}

// =============================================================================
// CONTEXT AND PROGRESS
// =============================================================================

/// Device resources a transaction needs to program the hardware
#[derive(Clone, Copy)]
pub struct ProgramContext<'a> {
    /// Register access (device lock)
    pub regs: &'a RegisterAccess,
    /// Buffers of the transaction's direction
    pub pool: &'a DirectionPool,
    /// Scatter/gather mapping
    pub platform: &'a dyn DmaPlatform,
    /// Profile for newly initialized transactions
    pub profile: TransferProfile,
}

impl core::fmt::Debug for ProgramContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgramContext")
            .field("direction", &self.pool.direction())
            .field("profile", &self.profile)
            .finish()
    }
}

/// What an engine call did to the bound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Hardware armed; completion arrives by interrupt
    Armed,
    /// The request reached its terminal state and was completed
    Finished(RequestId),
    /// Nothing to do: no matching request, or another path got there first
    Ignored,
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Transaction statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Requests bound to the transaction
    pub started: u64,
    /// Hardware passes programmed
    pub passes: u64,
    /// Requests completed successfully
    pub completed: u64,
    /// Requests failed
    pub failed: u64,
    /// Requests cancelled
    pub cancelled: u64,
    /// Bytes reported for successful requests
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct AtomicStats {
    started: AtomicU64,
    passes: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    bytes: AtomicU64,
}

// =============================================================================
// BINDING
// =============================================================================

/// Per-request data of the bound transaction
#[derive(Debug)]
struct Binding {
    request: TransferRequest,
    profile: TransferProfile,
    slot: usize,
    /// Bytes the request asks for
    total: usize,
    /// Bytes handed to the hardware so far
    cursor: usize,
    /// Bytes of the pass currently armed
    in_flight: usize,
    /// Bytes of finished passes
    transferred: usize,
}

// =============================================================================
// TRANSACTION ENGINE
// =============================================================================

/// DMA transaction of one direction
#[derive(Debug)]
pub struct TransactionEngine {
    direction: Direction,
    channel: ChannelRegisters,
    state: AtomicU64,
    active: AtomicU64,
    binding: Mutex<Option<Binding>>,
    stats: AtomicStats,
}

impl TransactionEngine {
    /// Idle transaction for `direction`
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            channel: ChannelRegisters::for_direction(direction),
            state: AtomicU64::new(pack(0, TransactionState::Idle)),
            active: AtomicU64::new(0),
            binding: Mutex::new(None),
            stats: AtomicStats::default(),
        }
    }

    /// Direction served
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        unpack(self.state.load(Ordering::Acquire)).1
    }

    /// Number of requests bound so far
    pub fn generation(&self) -> u64 {
        unpack(self.state.load(Ordering::Acquire)).0
    }

    /// Statistics snapshot
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            started: self.stats.started.load(Ordering::Relaxed),
            passes: self.stats.passes.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
            bytes: self.stats.bytes.load(Ordering::Relaxed),
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Bind the transaction to `request`, targeting buffer slot `slot`
    ///
    /// Fails with `ResourceBusy`, completing the request with that error, when
    /// the previous request has not released the transaction.
    pub fn initialize(&self, request: TransferRequest, slot: usize, profile: TransferProfile) -> Result<()> {
        let mut binding = self.binding.lock();
        let word = self.state.load(Ordering::Acquire);
        let (generation, state) = unpack(word);
        if state != TransactionState::Idle || binding.is_some() {
            log::warn!(
                "HSAC DMA[{}]: transaction busy ({:?}), rejecting request {}",
                self.direction,
                state,
                request.id()
            );
            drop(binding);
            request.complete(Err(Error::ResourceBusy));
            return Err(Error::ResourceBusy);
        }

        let id = request.id();
        self.active.store(id.raw(), Ordering::Release);
        let next = pack(generation.wrapping_add(1), TransactionState::Initialized);
        if self
            .state
            .compare_exchange(word, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.active.store(0, Ordering::Release);
            drop(binding);
            request.complete(Err(Error::ResourceBusy));
            return Err(Error::ResourceBusy);
        }

        let total = request.length();
        *binding = Some(Binding {
            request,
            profile,
            slot,
            total,
            cursor: 0,
            in_flight: 0,
            transferred: 0,
        });
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "HSAC DMA[{}]: request {} bound ({} bytes, {:?}, slot {})",
            self.direction,
            id,
            total,
            profile,
            slot
        );
        Ok(())
    }

    /// Program the first sub-range and start the hardware
    pub fn execute(&self, ctx: &ProgramContext<'_>) -> Progress {
        let mut guard = self.binding.lock();
        let word = self.state.load(Ordering::Acquire);
        let (generation, state) = unpack(word);
        if state != TransactionState::Initialized {
            return Progress::Ignored;
        }
        let Some(binding) = guard.as_mut() else {
            return Progress::Ignored;
        };

        if binding.request.completion().cancel_requested() {
            drop(guard);
            return self.terminate(
                generation,
                TransactionState::Initialized,
                TransactionState::Cancelled,
                Err(Error::Cancelled),
                ctx.regs,
            );
        }

        if !self.transition(generation, TransactionState::Initialized, TransactionState::Programming) {
            return Progress::Ignored;
        }

        match self.program(ctx, binding) {
            Ok(()) => self.armed(generation),
            Err(err) => {
                drop(guard);
                self.terminate(
                    generation,
                    TransactionState::Programming,
                    TransactionState::Failed,
                    Err(err),
                    ctx.regs,
                )
            }
        }
    }

    /// Handle the channel's completion interrupt
    ///
    /// Either programs the next sub-range or completes the request with the
    /// total bytes transferred. A channel error fails the request with
    /// `DeviceState`.
    pub fn on_dma_complete(&self, ctx: &ProgramContext<'_>) -> Progress {
        let (generation, state) = unpack(self.state.load(Ordering::Acquire));
        if state != TransactionState::Executing {
            log::debug!("HSAC DMA[{}]: completion with transaction {:?}, ignored", self.direction, state);
            return Progress::Ignored;
        }

        let control = ctx.regs.with_locked(|regs| regs.read(self.channel.control));
        let hw_state = channel_state(control);
        if hw_state.is_error() {
            log::warn!("HSAC DMA[{}]: channel reported {:?}", self.direction, hw_state);
            return self.terminate(
                generation,
                TransactionState::Executing,
                TransactionState::Failed,
                Err(Error::DeviceState),
                ctx.regs,
            );
        }
        if hw_state.is_running() || DmaControl::from_bits_truncate(control).contains(DmaControl::START) {
            log::debug!("HSAC DMA[{}]: channel still running ({:?}), ignored", self.direction, hw_state);
            return Progress::Ignored;
        }

        let mut guard = self.binding.lock();
        if unpack(self.state.load(Ordering::Acquire)) != (generation, TransactionState::Executing) {
            return Progress::Ignored;
        }
        let Some(binding) = guard.as_mut() else {
            return Progress::Ignored;
        };

        if binding.cursor >= binding.total {
            binding.transferred += binding.in_flight;
            binding.in_flight = 0;
            drop(guard);
            return self.terminate(
                generation,
                TransactionState::Executing,
                TransactionState::Completed,
                Ok(()),
                ctx.regs,
            );
        }

        if !self.transition(generation, TransactionState::Executing, TransactionState::Programming) {
            return Progress::Ignored;
        }
        binding.transferred += binding.in_flight;
        binding.in_flight = 0;

        match self.program(ctx, binding) {
            Ok(()) => self.armed(generation),
            Err(err) => {
                drop(guard);
                self.terminate(
                    generation,
                    TransactionState::Programming,
                    TransactionState::Failed,
                    Err(err),
                    ctx.regs,
                )
            }
        }
    }

    /// Cancel request `id` if it is bound to this transaction
    ///
    /// Aborts the channel when the hardware was touched and completes the
    /// request with `Cancelled`. Returns `Ignored` when the request is not
    /// bound or has already reached a terminal state.
    pub fn cancel(&self, id: RequestId, regs: &RegisterAccess) -> Progress {
        self.terminate_active(Some(id), Error::Cancelled, regs)
    }

    /// Terminate whatever request is bound, completing it with `error`
    pub fn abort_active(&self, error: Error, regs: &RegisterAccess) -> Progress {
        self.terminate_active(None, error, regs)
    }

    fn terminate_active(&self, id: Option<RequestId>, error: Error, regs: &RegisterAccess) -> Progress {
        let terminal = if error == Error::Cancelled {
            TransactionState::Cancelled
        } else {
            TransactionState::Failed
        };
        loop {
            let word = self.state.load(Ordering::Acquire);
            let (generation, state) = unpack(word);
            if !state.is_active() {
                return Progress::Ignored;
            }
            if let Some(id) = id {
                if self.active.load(Ordering::Acquire) != id.raw() {
                    return Progress::Ignored;
                }
            }
            if self
                .state
                .compare_exchange(word, pack(generation, terminal), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                log::debug!("HSAC DMA[{}]: {:?} from {:?}", self.direction, terminal, state);
                return self.release(generation, Err(error), state != TransactionState::Initialized, regs);
            }
            core::hint::spin_loop();
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn transition(&self, generation: u64, from: TransactionState, to: TransactionState) -> bool {
        self.state
            .compare_exchange(
                pack(generation, from),
                pack(generation, to),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn armed(&self, generation: u64) -> Progress {
        if self.transition(generation, TransactionState::Programming, TransactionState::Executing) {
            Progress::Armed
        } else {
            // Cancelled while programming; the canceller aborts once we unlock
            Progress::Ignored
        }
    }

    fn terminate(
        &self,
        generation: u64,
        from: TransactionState,
        to: TransactionState,
        outcome: Result<()>,
        regs: &RegisterAccess,
    ) -> Progress {
        if !self.transition(generation, from, to) {
            return Progress::Ignored;
        }
        let abort = to != TransactionState::Completed && from != TransactionState::Initialized;
        self.release(generation, outcome, abort, regs)
    }

    /// Tear down after winning a terminal transition
    fn release(&self, generation: u64, outcome: Result<()>, abort: bool, regs: &RegisterAccess) -> Progress {
        let binding = self.binding.lock().take();
        if abort {
            self.abort_channel(regs);
        }
        self.active.store(0, Ordering::Release);
        self.state.store(pack(generation, TransactionState::Idle), Ordering::Release);

        let Some(binding) = binding else {
            return Progress::Ignored;
        };
        let id = binding.request.id();
        let outcome = match outcome {
            Ok(()) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes.fetch_add(binding.transferred as u64, Ordering::Relaxed);
                Ok(binding.transferred)
            }
            Err(Error::Cancelled) => {
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                Err(Error::Cancelled)
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        };
        binding.request.complete(outcome);
        Progress::Finished(id)
    }

    /// Write the registers for the next sub-range of `binding`
    fn program(&self, ctx: &ProgramContext<'_>, binding: &mut Binding) -> Result<()> {
        match binding.profile {
            TransferProfile::ScatterGather => self.program_chain(ctx, binding),
            TransferProfile::Packet => self.program_packet(ctx, binding),
        }
    }

    fn program_chain(&self, ctx: &ProgramContext<'_>, binding: &mut Binding) -> Result<()> {
        self.ensure_idle(ctx.regs)?;

        let remaining = binding.total - binding.cursor;
        let sg = ctx.platform.map_transfer(binding.request.buffer(), binding.cursor, remaining)?;
        let storage = ctx.pool.descriptor_storage();
        // SAFETY: Only this direction's transaction writes its descriptor
        // region, with the binding lock held, while the channel is idle
        let bytes = unsafe { storage.bytes_mut() };
        let chain = build_chain(sg.elements(), bytes, storage.phys())?;

        self.arm(
            ctx.regs,
            chain.head,
            chain.total_bytes,
            DmaControl::START | DmaControl::INT_ENABLE | DmaControl::SG_ENABLE,
        )?;

        binding.in_flight = chain.total_bytes as usize;
        binding.cursor += chain.total_bytes as usize;
        self.stats.passes.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "HSAC DMA[{}]: request {} pass {}..{} of {} ({} descriptors)",
            self.direction,
            binding.request.id(),
            binding.cursor - binding.in_flight,
            binding.cursor,
            binding.total,
            chain.descriptors
        );
        Ok(())
    }

    fn program_packet(&self, ctx: &ProgramContext<'_>, binding: &mut Binding) -> Result<()> {
        let packet = binding.request.packet().ok_or(Error::InvalidRequest)?;
        let slot = ctx.pool.slot(binding.slot)?;
        let count = packet.byte_count as usize;
        if count == 0 || count > slot.len {
            return Err(Error::InvalidSize);
        }

        self.arm(ctx.regs, slot.phys, packet.byte_count, DmaControl::START | DmaControl::INT_ENABLE)?;

        binding.in_flight = count;
        binding.cursor = binding.total;
        self.stats.passes.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "HSAC DMA[{}]: request {} packet {} bytes at slot {} ({})",
            self.direction,
            binding.request.id(),
            count,
            slot.index,
            slot.phys
        );
        Ok(())
    }

    fn ensure_idle(&self, regs: &RegisterAccess) -> Result<()> {
        let control = regs.with_locked(|r| r.read(self.channel.control));
        check_idle(self.direction, control)
    }

    /// Program address, size and control under the device lock
    fn arm(&self, regs: &RegisterAccess, addr: PhysAddr, size: u32, control: DmaControl) -> Result<()> {
        let channel = self.channel;
        let direction = self.direction;
        regs.with_locked(|r| {
            check_idle(direction, r.read(channel.control))?;
            r.write(channel.addr_low, addr.low());
            r.write(channel.addr_high, addr.high());
            r.write(channel.size, size);
            r.barrier();
            r.write(channel.control, control.bits());
            Ok(())
        })
    }

    fn abort_channel(&self, regs: &RegisterAccess) {
        let channel = self.channel;
        regs.with_locked(|r| r.write(channel.control, DmaControl::ABORT.bits()));
        log::debug!("HSAC DMA[{}]: channel aborted", self.direction);
    }
}

fn check_idle(direction: Direction, control: u32) -> Result<()> {
    let state = channel_state(control);
    if state.is_running() || DmaControl::from_bits_truncate(control).contains(DmaControl::START) {
        log::warn!("HSAC DMA[{}]: channel busy ({:?}) while programming", direction, state);
        return Err(Error::DeviceState);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{read_chain, storage_len, DESCRIPTOR_SIZE};
    use crate::request::{PacketParams, RequestHandle};
    use hsac_core::registers::with_channel_state;
    use hsac_core::{ChannelState, Register};
    use hsac_hal::testing::MockPlatform;
    use hsac_hal::{HostBuffer, RawResource};
    use hsac_memory::{BufferPool, BufferingMode};
    use std::sync::Arc;
    use std::thread;

    const MAX: usize = 64 * 1024;

    struct Rig {
        platform: MockPlatform,
        regs: RegisterAccess,
        pool: BufferPool,
    }

    impl Rig {
        fn new(mode: BufferingMode) -> Self {
            let platform = MockPlatform::without_sram();
            let resources: std::vec::Vec<RawResource> = platform.resources();
            let window = platform.map_io_space(&resources[0]).unwrap();
            let regs = RegisterAccess::new(window, None).unwrap();
            let pool = BufferPool::allocate(&platform, mode, MAX, storage_len(MAX)).unwrap();
            Self { platform, regs, pool }
        }

        fn ctx(&self, direction: Direction, profile: TransferProfile) -> ProgramContext<'_> {
            ProgramContext {
                regs: &self.regs,
                pool: self.pool.direction(direction),
                platform: &self.platform,
                profile,
            }
        }
    }

    fn request(id: u64, direction: Direction, len: usize) -> (TransferRequest, RequestHandle) {
        let buffer = HostBuffer::contiguous(PhysAddr::new(0x4000_0800), len, 4096).unwrap();
        let request = TransferRequest::new(RequestId::new(id), direction, buffer);
        let handle = request.handle();
        (request, handle)
    }

    #[test]
    fn test_scatter_gather_transfer() {
        let rig = Rig::new(BufferingMode::Single);
        let ctx = rig.ctx(Direction::ToDevice, TransferProfile::ScatterGather);
        let engine = TransactionEngine::new(Direction::ToDevice);
        let (req, handle) = request(1, Direction::ToDevice, 10_000);

        engine.initialize(req, 0, TransferProfile::ScatterGather).unwrap();
        assert_eq!(engine.state(), TransactionState::Initialized);
        assert_eq!(engine.execute(&ctx), Progress::Armed);
        assert_eq!(engine.state(), TransactionState::Executing);

        let file = rig.regs.snapshot();
        let head = ctx.pool.descriptor_storage().phys();
        assert_eq!(file.address(Direction::ToDevice), head);
        assert_eq!(file.size(Direction::ToDevice), 10_000);
        assert_eq!(
            file.control(Direction::ToDevice),
            DmaControl::START | DmaControl::INT_ENABLE | DmaControl::SG_ENABLE
        );

        // 0x4000_0800 + 10_000 bytes touches three pages
        let stored = rig.platform.read_memory(head, 3 * DESCRIPTOR_SIZE);
        let chain = read_chain(&stored, 3);
        assert_eq!(chain.iter().map(|d| d.transfer_size).sum::<u32>(), 10_000);
        assert!(chain[2].is_last() && !chain[0].is_last() && !chain[1].is_last());

        rig.platform.finish_channel(Direction::ToDevice, ChannelState::Success);
        assert_eq!(engine.on_dma_complete(&ctx), Progress::Finished(RequestId::new(1)));
        assert_eq!(handle.poll(), Some(Ok(10_000)));
        assert_eq!(engine.state(), TransactionState::Idle);
        assert_eq!(engine.stats().completed, 1);
        assert_eq!(engine.stats().bytes, 10_000);
    }

    #[test]
    fn test_multi_pass_when_mapping_is_limited() {
        let rig = Rig::new(BufferingMode::Single);
        rig.platform.set_max_map_length(4096);
        let ctx = rig.ctx(Direction::FromDevice, TransferProfile::ScatterGather);
        let engine = TransactionEngine::new(Direction::FromDevice);
        let (req, handle) = request(7, Direction::FromDevice, 10_000);

        engine.initialize(req, 0, TransferProfile::ScatterGather).unwrap();
        assert_eq!(engine.execute(&ctx), Progress::Armed);
        assert_eq!(rig.regs.snapshot().size(Direction::FromDevice), 4096);

        rig.platform.finish_channel(Direction::FromDevice, ChannelState::Success);
        assert_eq!(engine.on_dma_complete(&ctx), Progress::Armed);
        assert_eq!(rig.regs.snapshot().size(Direction::FromDevice), 4096);

        rig.platform.finish_channel(Direction::FromDevice, ChannelState::Success);
        assert_eq!(engine.on_dma_complete(&ctx), Progress::Armed);
        assert_eq!(rig.regs.snapshot().size(Direction::FromDevice), 10_000 - 8192);

        rig.platform.finish_channel(Direction::FromDevice, ChannelState::Success);
        assert_eq!(engine.on_dma_complete(&ctx), Progress::Finished(RequestId::new(7)));
        assert_eq!(handle.poll(), Some(Ok(10_000)));
        assert_eq!(engine.stats().passes, 3);
    }

    #[test]
    fn test_packet_profile_programs_slot() {
        let rig = Rig::new(BufferingMode::MultiDiscrete { slots: 4 });
        let ctx = rig.ctx(Direction::ToDevice, TransferProfile::Packet);
        let engine = TransactionEngine::new(Direction::ToDevice);
        let req = TransferRequest::new(RequestId::new(3), Direction::ToDevice, HostBuffer::empty())
            .with_packet(PacketParams { byte_count: 2048, slot: 2 });
        let handle = req.handle();

        engine.initialize(req, 2, TransferProfile::Packet).unwrap();
        assert_eq!(engine.execute(&ctx), Progress::Armed);
        let file = rig.regs.snapshot();
        assert_eq!(file.address(Direction::ToDevice), ctx.pool.slot(2).unwrap().phys);
        assert_eq!(file.size(Direction::ToDevice), 2048);
        assert_eq!(file.control(Direction::ToDevice), DmaControl::START | DmaControl::INT_ENABLE);

        rig.platform.finish_channel(Direction::ToDevice, ChannelState::Success);
        assert_eq!(engine.on_dma_complete(&ctx), Progress::Finished(RequestId::new(3)));
        assert_eq!(handle.poll(), Some(Ok(2048)));
    }

    #[test]
    fn test_packet_slot_out_of_range_fails() {
        let rig = Rig::new(BufferingMode::MultiDiscrete { slots: 4 });
        let ctx = rig.ctx(Direction::ToDevice, TransferProfile::Packet);
        let engine = TransactionEngine::new(Direction::ToDevice);
        let req = TransferRequest::new(RequestId::new(4), Direction::ToDevice, HostBuffer::empty())
            .with_packet(PacketParams { byte_count: 16, slot: 5 });
        let handle = req.handle();

        engine.initialize(req, 5, TransferProfile::Packet).unwrap();
        assert_eq!(engine.execute(&ctx), Progress::Finished(RequestId::new(4)));
        assert_eq!(handle.poll(), Some(Err(Error::InvalidSize)));
        assert_eq!(rig.regs.snapshot().size(Direction::ToDevice), 0);
        assert_eq!(engine.state(), TransactionState::Idle);
    }

    #[test]
    fn test_busy_channel_fails_with_device_state() {
        let rig = Rig::new(BufferingMode::Single);
        let ctx = rig.ctx(Direction::ToDevice, TransferProfile::ScatterGather);
        rig.platform.set_register(
            Register::Dma0Control,
            with_channel_state(0, ChannelState::WaitingData),
        );
        let engine = TransactionEngine::new(Direction::ToDevice);
        let (req, handle) = request(5, Direction::ToDevice, 512);

        engine.initialize(req, 0, TransferProfile::ScatterGather).unwrap();
        assert_eq!(engine.execute(&ctx), Progress::Finished(RequestId::new(5)));
        assert_eq!(handle.poll(), Some(Err(Error::DeviceState)));
        assert_eq!(rig.platform.register(Register::Dma0Control), DmaControl::ABORT.bits());
        assert_eq!(engine.stats().failed, 1);

        // the transaction is reusable
        rig.platform.set_register(Register::Dma0Control, 0);
        let (req, _handle) = request(6, Direction::ToDevice, 512);
        engine.initialize(req, 0, TransferProfile::ScatterGather).unwrap();
        assert_eq!(engine.execute(&ctx), Progress::Armed);
    }

    #[test]
    fn test_channel_error_on_completion() {
        let rig = Rig::new(BufferingMode::Single);
        let ctx = rig.ctx(Direction::FromDevice, TransferProfile::ScatterGather);
        let engine = TransactionEngine::new(Direction::FromDevice);
        let (req, handle) = request(8, Direction::FromDevice, 100);

        engine.initialize(req, 0, TransferProfile::ScatterGather).unwrap();
        engine.execute(&ctx);
        rig.platform.finish_channel(Direction::FromDevice, ChannelState::CompletionTimeout);
        assert_eq!(engine.on_dma_complete(&ctx), Progress::Finished(RequestId::new(8)));
        assert_eq!(handle.poll(), Some(Err(Error::DeviceState)));
    }

    #[test]
    fn test_initialize_while_bound_is_busy() {
        let engine = TransactionEngine::new(Direction::ToDevice);
        let (first, _h1) = request(1, Direction::ToDevice, 64);
        let (second, h2) = request(2, Direction::ToDevice, 64);
        engine.initialize(first, 0, TransferProfile::ScatterGather).unwrap();
        assert_eq!(
            engine.initialize(second, 0, TransferProfile::ScatterGather),
            Err(Error::ResourceBusy)
        );
        assert_eq!(h2.poll(), Some(Err(Error::ResourceBusy)));
    }

    #[test]
    fn test_cancel_in_flight_aborts_and_reports_zero_bytes() {
        let rig = Rig::new(BufferingMode::Single);
        let ctx = rig.ctx(Direction::ToDevice, TransferProfile::ScatterGather);
        let engine = TransactionEngine::new(Direction::ToDevice);
        let (req, handle) = request(9, Direction::ToDevice, 4096);

        engine.initialize(req, 0, TransferProfile::ScatterGather).unwrap();
        engine.execute(&ctx);
        assert_eq!(engine.cancel(RequestId::new(99), &rig.regs), Progress::Ignored);
        assert_eq!(engine.cancel(RequestId::new(9), &rig.regs), Progress::Finished(RequestId::new(9)));
        assert_eq!(handle.poll(), Some(Err(Error::Cancelled)));
        assert_eq!(rig.platform.register(Register::Dma0Control), DmaControl::ABORT.bits());

        // a late hardware completion is ignored
        rig.platform.finish_channel(Direction::ToDevice, ChannelState::Success);
        assert_eq!(engine.on_dma_complete(&ctx), Progress::Ignored);
        assert_eq!(handle.signals(), 1);
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let rig = Rig::new(BufferingMode::Single);
        let ctx = rig.ctx(Direction::ToDevice, TransferProfile::ScatterGather);
        let engine = TransactionEngine::new(Direction::ToDevice);
        let (req, handle) = request(10, Direction::ToDevice, 256);

        engine.initialize(req, 0, TransferProfile::ScatterGather).unwrap();
        engine.execute(&ctx);
        rig.platform.finish_channel(Direction::ToDevice, ChannelState::Success);
        engine.on_dma_complete(&ctx);
        assert_eq!(engine.cancel(RequestId::new(10), &rig.regs), Progress::Ignored);
        assert_eq!(handle.poll(), Some(Ok(256)));
        assert_eq!(handle.signals(), 1);
    }

    #[test]
    fn test_cancel_before_execute() {
        let rig = Rig::new(BufferingMode::Single);
        let ctx = rig.ctx(Direction::ToDevice, TransferProfile::ScatterGather);
        let engine = TransactionEngine::new(Direction::ToDevice);
        let (req, handle) = request(11, Direction::ToDevice, 256);

        engine.initialize(req, 0, TransferProfile::ScatterGather).unwrap();
        assert_eq!(engine.cancel(RequestId::new(11), &rig.regs), Progress::Finished(RequestId::new(11)));
        assert_eq!(engine.execute(&ctx), Progress::Ignored);
        assert_eq!(handle.poll(), Some(Err(Error::Cancelled)));
        // hardware never touched
        assert_eq!(rig.platform.register(Register::Dma0Control), 0);
    }

    #[test]
    fn test_cancel_flag_raised_before_binding() {
        let rig = Rig::new(BufferingMode::Single);
        let ctx = rig.ctx(Direction::ToDevice, TransferProfile::ScatterGather);
        let engine = TransactionEngine::new(Direction::ToDevice);
        let (req, handle) = request(12, Direction::ToDevice, 256);

        handle.completion().request_cancel();
        engine.initialize(req, 0, TransferProfile::ScatterGather).unwrap();
        assert_eq!(engine.execute(&ctx), Progress::Finished(RequestId::new(12)));
        assert_eq!(handle.poll(), Some(Err(Error::Cancelled)));
        assert_eq!(handle.signals(), 1);
        assert_eq!(rig.platform.register(Register::Dma0Control), 0);
        assert_eq!(engine.state(), TransactionState::Idle);
        assert_eq!(engine.stats().cancelled, 1);
        assert_eq!(engine.stats().passes, 0);

        // the transaction is free for the next request
        let (req, handle) = request(13, Direction::ToDevice, 256);
        engine.initialize(req, 0, TransferProfile::ScatterGather).unwrap();
        assert_eq!(engine.execute(&ctx), Progress::Armed);
        assert_eq!(handle.poll(), None);
    }

    #[test]
    fn test_cancel_races_completion_exactly_once() {
        let rig = Arc::new(Rig::new(BufferingMode::Single));
        let engine = Arc::new(TransactionEngine::new(Direction::ToDevice));

        for round in 0..200u64 {
            let id = round + 1;
            let (req, handle) = request(id, Direction::ToDevice, 1024);
            engine.initialize(req, 0, TransferProfile::ScatterGather).unwrap();
            {
                let ctx = rig.ctx(Direction::ToDevice, TransferProfile::ScatterGather);
                assert_eq!(engine.execute(&ctx), Progress::Armed);
            }
            rig.platform.finish_channel(Direction::ToDevice, ChannelState::Success);

            let completer = {
                let rig = Arc::clone(&rig);
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    let ctx = rig.ctx(Direction::ToDevice, TransferProfile::ScatterGather);
                    engine.on_dma_complete(&ctx)
                })
            };
            let cancelled = engine.cancel(RequestId::new(id), &rig.regs);
            let completed = completer.join().unwrap();

            let winners = [cancelled, completed]
                .iter()
                .filter(|p| matches!(p, Progress::Finished(_)))
                .count();
            assert_eq!(winners, 1, "round {}", round);
            assert_eq!(handle.signals(), 1);
            match handle.poll() {
                Some(Ok(bytes)) => assert_eq!(bytes, 1024),
                Some(Err(err)) => assert_eq!(err, Error::Cancelled),
                None => panic!("request {} not completed", id),
            }
            assert_eq!(engine.state(), TransactionState::Idle);
            rig.platform.set_register(Register::Dma0Control, 0);
            rig.platform.set_register(Register::InterruptState, 0);
        }
    }
}
