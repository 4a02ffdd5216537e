//! # Request Dispatcher
//!
//! One sequential queue per direction. Requests are validated on entry,
//! queued, and handed to the direction's [`TransactionEngine`] one at a time;
//! the next request is started as soon as the previous one completes.
//!
//! Starting a request (pop, bind, program) happens with the queue lock held,
//! so a request is always either queued or owned by the transaction as seen
//! by [`pause`](RequestDispatcher::pause) and
//! [`abort_all`](RequestDispatcher::abort_all).

use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicU64, Ordering};

use hsac_core::{Direction, Error, RequestId};
use spin::Mutex;

use crate::request::{RequestHandle, TransferRequest};
use crate::transaction::{EngineStats, ProgramContext, Progress, TransactionEngine};

/// Dispatcher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Requests accepted into the queue
    pub submitted: u64,
    /// Requests rejected before reaching the queue
    pub rejected: u64,
    /// Requests cancelled while still queued
    pub dequeued: u64,
    /// Transaction statistics
    pub engine: EngineStats,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<TransferRequest>,
    active: Option<RequestId>,
    paused: bool,
}

/// Sequential request queue of one direction
#[derive(Debug)]
pub struct RequestDispatcher {
    direction: Direction,
    max_transfer: usize,
    queue: Mutex<QueueState>,
    engine: TransactionEngine,
    submitted: AtomicU64,
    rejected: AtomicU64,
    dequeued: AtomicU64,
}

impl RequestDispatcher {
    /// Queue for `direction` accepting requests up to `max_transfer` bytes
    pub fn new(direction: Direction, max_transfer: usize) -> Self {
        Self {
            direction,
            max_transfer,
            queue: Mutex::new(QueueState::default()),
            engine: TransactionEngine::new(direction),
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        }
    }

    /// Direction served
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Largest accepted request length
    #[inline]
    pub fn max_transfer(&self) -> usize {
        self.max_transfer
    }

    /// Transaction of this direction
    #[inline]
    pub fn engine(&self) -> &TransactionEngine {
        &self.engine
    }

    /// Requests waiting behind the active one
    pub fn pending(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// Request currently owned by the transaction
    pub fn active(&self) -> Option<RequestId> {
        self.queue.lock().active
    }

    /// Statistics snapshot
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            engine: self.engine.stats(),
        }
    }

    /// Accept a request
    ///
    /// Requests longer than the maximum transfer length complete with
    /// `InvalidSize` and zero bytes without touching the hardware; empty
    /// requests complete immediately with zero bytes.
    pub fn submit(&self, request: TransferRequest, ctx: &ProgramContext<'_>) -> RequestHandle {
        let handle = request.handle();

        if request.direction() != self.direction {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            request.complete(Err(Error::InvalidRequest));
            return handle;
        }

        let length = request.length();
        if length > self.max_transfer {
            log::warn!(
                "HSAC DMA[{}]: request {} of {} bytes exceeds maximum {}",
                self.direction,
                request.id(),
                length,
                self.max_transfer
            );
            self.rejected.fetch_add(1, Ordering::Relaxed);
            request.complete(Err(Error::InvalidSize));
            return handle;
        }
        if length == 0 {
            request.complete(Ok(0));
            return handle;
        }

        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.queue.lock().pending.push_back(request);
        self.pump(ctx);
        handle
    }

    /// Start queued requests while the transaction is free
    ///
    /// Does nothing while the queue is paused.
    pub fn pump(&self, ctx: &ProgramContext<'_>) {
        let mut queue = self.queue.lock();
        while queue.active.is_none() && !queue.paused {
            let Some(request) = queue.pending.pop_front() else {
                return;
            };
            let id = request.id();
            queue.active = Some(id);

            let slot = request.packet().map_or(0, |p| p.slot as usize);
            if self.engine.initialize(request, slot, ctx.profile).is_err() {
                queue.active = None;
                continue;
            }
            match self.engine.execute(ctx) {
                Progress::Finished(done) => {
                    if queue.active == Some(done) {
                        queue.active = None;
                    }
                }
                Progress::Armed | Progress::Ignored => return,
            }
        }
    }

    /// Stop starting queued requests
    ///
    /// Once this returns no request is being started, and none will be until
    /// [`resume`](Self::resume). Submission and cancellation keep working.
    pub fn pause(&self) {
        self.queue.lock().paused = true;
    }

    /// Undo [`pause`](Self::pause) and start whatever is queued
    pub fn resume(&self, ctx: &ProgramContext<'_>) {
        self.queue.lock().paused = false;
        self.pump(ctx);
    }

    /// Whether the queue is paused
    pub fn is_paused(&self) -> bool {
        self.queue.lock().paused
    }

    /// Completion interrupt for this direction's channel
    pub fn on_interrupt(&self, ctx: &ProgramContext<'_>) -> Progress {
        let progress = self.engine.on_dma_complete(ctx);
        if let Progress::Finished(id) = progress {
            self.clear_active(id);
            self.pump(ctx);
        }
        progress
    }

    /// Cancel a request; returns `true` when this call completed it
    ///
    /// A request still queued is removed and completed with `Cancelled`. A
    /// request owned by the transaction is cancelled there, unless its
    /// completion already won. A request between queue and transaction is
    /// flagged and cancelled as soon as the transaction sees it.
    pub fn cancel(&self, handle: &RequestHandle, ctx: &ProgramContext<'_>) -> bool {
        let id = handle.id();
        handle.completion().request_cancel();

        let queued = {
            let mut queue = self.queue.lock();
            queue
                .pending
                .iter()
                .position(|r| r.id() == id)
                .and_then(|pos| queue.pending.remove(pos))
        };
        if let Some(request) = queued {
            self.dequeued.fetch_add(1, Ordering::Relaxed);
            request.complete(Err(Error::Cancelled));
            return true;
        }

        match self.engine.cancel(id, ctx.regs) {
            Progress::Finished(done) => {
                self.clear_active(done);
                self.pump(ctx);
                true
            }
            Progress::Armed | Progress::Ignored => false,
        }
    }

    /// Fail the active request and everything queued with `error`
    ///
    /// A request being started when this is called is bound by the time the
    /// queue is drained, so it is aborted as the active request. Requests
    /// submitted afterwards are accepted as usual; pause first to keep the
    /// channel quiet.
    pub fn abort_all(&self, error: Error, ctx: &ProgramContext<'_>) {
        let drained: VecDeque<TransferRequest> = core::mem::take(&mut self.queue.lock().pending);
        for request in drained {
            request.complete(Err(error));
        }
        if let Progress::Finished(id) = self.engine.abort_active(error, ctx.regs) {
            self.clear_active(id);
        }
    }

    /// Fail only the active request
    ///
    /// Queued requests stay queued; call [`pump`](Self::pump) to resume.
    pub fn abort_active(&self, error: Error, ctx: &ProgramContext<'_>) {
        if let Progress::Finished(id) = self.engine.abort_active(error, ctx.regs) {
            self.clear_active(id);
        }
    }

    fn clear_active(&self, id: RequestId) {
        let mut queue = self.queue.lock();
        if queue.active == Some(id) {
            queue.active = None;
        }
    }
}
