//! # Device Context
//!
//! [`Hsac`] owns one instance of every driver component for a physical
//! device: the register windows, the buffer pool, and a request dispatcher
//! per direction. It runs start-up and shutdown and routes transfers to the
//! right dispatcher.

use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use hsac_core::{Direction, DmaControl, Error, Register, RequestId, Result, TransferProfile};
use hsac_dma::descriptor::storage_len;
use hsac_dma::{PacketParams, ProgramContext, RequestDispatcher, RequestHandle, TransferRequest};
use hsac_hal::{assign_bars, DmaPlatform, HostBuffer, MmioRegion, PendingLatch, RawResource, RegisterAccess};
use hsac_memory::BufferPool;

use crate::config::DeviceConfig;

/// A started HSAC device
#[derive(Debug)]
pub struct Hsac<P: DmaPlatform> {
    pub(crate) platform: P,
    pub(crate) regs: RegisterAccess,
    pub(crate) pool: BufferPool,
    write: RequestDispatcher,
    read: RequestDispatcher,
    profile: AtomicU8,
    config: DeviceConfig,
    next_id: AtomicU64,
    pub(crate) latch: PendingLatch,
}

impl<P: DmaPlatform> Hsac<P> {
    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Bring up the device
    ///
    /// Maps the register window (first memory resource) and the optional SRAM
    /// window (second), allocates the buffer pool, and resets the hardware.
    /// Everything acquired is released again if a step fails.
    pub fn start(platform: P, resources: &[RawResource], config: DeviceConfig) -> Result<Self> {
        let config = config.validate()?;
        let bars = assign_bars(resources)?;

        let registers = platform.map_io_space(&bars.registers)?;
        let sram = match bars.sram.map(|bar| platform.map_io_space(&bar)).transpose() {
            Ok(sram) => sram,
            Err(err) => {
                log::error!("HSAC: mapping SRAM failed: {}", err);
                platform.unmap_io_space(registers);
                return Err(err);
            }
        };
        let regs = match RegisterAccess::new(registers, sram) {
            Ok(regs) => regs,
            Err(rejected) => {
                platform.unmap_io_space(rejected.registers);
                if let Some(sram) = rejected.sram {
                    platform.unmap_io_space(sram);
                }
                return Err(rejected.error);
            }
        };

        let pool = match BufferPool::allocate(
            &platform,
            config.buffering,
            config.max_transfer_length,
            storage_len(config.max_transfer_length),
        ) {
            Ok(pool) => pool,
            Err(err) => {
                log::error!("HSAC: buffer pool allocation failed: {}", err);
                release_windows(&platform, regs);
                return Err(err);
            }
        };

        reset_hardware(&regs);

        log::info!(
            "HSAC: started, version {:#010x}, {}",
            regs.read_register(Register::Version.index()).unwrap_or(0),
            config
        );

        Ok(Self {
            write: RequestDispatcher::new(Direction::ToDevice, config.max_transfer_length),
            read: RequestDispatcher::new(Direction::FromDevice, config.max_transfer_length),
            profile: AtomicU8::new(config.profile as u8),
            next_id: AtomicU64::new(1),
            latch: PendingLatch::new(),
            platform,
            regs,
            pool,
            config,
        })
    }

    /// Stop the device and hand the platform back
    ///
    /// Active transfers are aborted and queued ones cancelled, user mappings
    /// are torn down, the hardware is reset, and every buffer and window is
    /// released.
    pub fn shutdown(self) -> P {
        for direction in Direction::ALL {
            self.dispatcher(direction).abort_all(Error::Cancelled, &self.context(direction));
        }
        self.pool.unmap(&self.platform);
        reset_hardware(&self.regs);

        let Self {
            platform, regs, pool, ..
        } = self;
        pool.release(&platform);
        release_windows(&platform, regs);
        log::info!("HSAC: stopped");
        platform
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Host platform
    #[inline]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Effective configuration
    #[inline]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Register and SRAM access
    #[inline]
    pub fn registers(&self) -> &RegisterAccess {
        &self.regs
    }

    /// Buffer pool
    #[inline]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Dispatcher of one direction
    #[inline]
    pub fn dispatcher(&self, direction: Direction) -> &RequestDispatcher {
        match direction {
            Direction::ToDevice => &self.write,
            Direction::FromDevice => &self.read,
        }
    }

    /// Transfer profile used for newly started transactions
    pub fn profile(&self) -> TransferProfile {
        TransferProfile::from_raw(self.profile.load(Ordering::Acquire))
    }

    /// Select the transfer profile; in-flight transfers keep theirs
    pub fn set_profile(&self, profile: TransferProfile) {
        let old = self.profile.swap(profile as u8, Ordering::AcqRel);
        if old != profile as u8 {
            log::info!("HSAC: transfer profile {:?}", profile);
        }
    }

    pub(crate) fn context(&self, direction: Direction) -> ProgramContext<'_> {
        ProgramContext {
            regs: &self.regs,
            pool: self.pool.direction(direction),
            platform: &self.platform,
            profile: self.profile(),
        }
    }

    // =========================================================================
    // TRANSFERS
    // =========================================================================

    /// Submit a transfer
    ///
    /// Under the packet profile `payload` must carry the byte count and slot
    /// index; otherwise it is ignored and the length of `buffer` is used.
    /// Failures are reported through the returned handle.
    pub fn submit(&self, direction: Direction, buffer: HostBuffer, payload: &[u8]) -> RequestHandle {
        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut request = TransferRequest::new(id, direction, buffer);

        if self.profile() == TransferProfile::Packet {
            match PacketParams::decode(payload) {
                Ok(params) => request = request.with_packet(params),
                Err(err) => {
                    log::warn!("HSAC DMA[{}]: request {} without packet parameters", direction, id);
                    let handle = request.handle();
                    request.complete(Err(err));
                    return handle;
                }
            }
        }

        log::debug!("HSAC DMA[{}]: request {} submitted ({} bytes)", direction, id, request.length());
        self.dispatcher(direction).submit(request, &self.context(direction))
    }

    /// Submit a host-to-device transfer
    pub fn write(&self, buffer: HostBuffer, payload: &[u8]) -> RequestHandle {
        self.submit(Direction::ToDevice, buffer, payload)
    }

    /// Submit a device-to-host transfer
    pub fn read(&self, buffer: HostBuffer, payload: &[u8]) -> RequestHandle {
        self.submit(Direction::FromDevice, buffer, payload)
    }

    /// Cancel a submitted request; `true` when this call completed it
    pub fn cancel(&self, handle: &RequestHandle) -> bool {
        let direction = handle.direction();
        self.dispatcher(direction).cancel(handle, &self.context(direction))
    }

    /// Full hardware reset
    ///
    /// Active transfers complete with `Cancelled`, both channels are aborted
    /// and cleared, pending interrupts are dropped, and queued requests are
    /// started afresh. Returns the control/status register.
    ///
    /// Both queues stay paused until the hardware is clean, so a request
    /// submitted meanwhile waits instead of being armed on a channel that is
    /// about to be cleared.
    pub fn reset(&self) -> u32 {
        for direction in Direction::ALL {
            let dispatcher = self.dispatcher(direction);
            dispatcher.pause();
            dispatcher.abort_active(Error::Cancelled, &self.context(direction));
        }
        let status = reset_hardware(&self.regs);
        self.latch.take();
        log::info!("HSAC: reset, status {:#010x}", status);

        for direction in Direction::ALL {
            self.dispatcher(direction).resume(&self.context(direction));
        }
        status
    }
}

/// Abort both channels, clear their control registers and pending interrupts
fn reset_hardware(regs: &RegisterAccess) -> u32 {
    regs.with_locked(|r| {
        r.write(Register::Dma0Control, DmaControl::ABORT.bits());
        r.write(Register::Dma1Control, DmaControl::ABORT.bits());
        r.barrier();
        r.write(Register::Dma0Control, 0);
        r.write(Register::Dma1Control, 0);
        r.write(Register::InterruptState, 0);
        r.read(Register::ControlStatus)
    })
}

fn release_windows(platform: &dyn DmaPlatform, regs: RegisterAccess) {
    let (registers, sram): (MmioRegion, Option<MmioRegion>) = regs.into_windows();
    platform.unmap_io_space(registers);
    if let Some(sram) = sram {
        platform.unmap_io_space(sram);
    }
}
