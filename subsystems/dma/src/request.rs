//! # Transfer Requests
//!
//! A transfer request travels from the submitter through the dispatcher queue
//! into the transaction engine and ends in exactly one completion. The
//! originator keeps a [`RequestHandle`] sharing the request's [`Completion`].

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};
use hsac_core::{Direction, Error, RequestId, Result};
use hsac_hal::HostBuffer;
use spin::Mutex;

// =============================================================================
// PACKET PARAMETERS
// =============================================================================

/// Explicit size and slot of a packet-profile transfer
///
/// Carried in the request payload as two little-endian words.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PacketParams {
    /// Bytes to transfer
    pub byte_count: u32,
    /// Buffer slot index
    pub slot: u32,
}

impl PacketParams {
    /// Decode from a request payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let bytes = payload
            .get(..core::mem::size_of::<Self>())
            .ok_or(Error::BufferTooSmall)?;
        let raw: Self = bytemuck::pod_read_unaligned(bytes);
        Ok(Self {
            byte_count: u32::from_le(raw.byte_count),
            slot: u32::from_le(raw.slot),
        })
    }
}

// =============================================================================
// COMPLETION
// =============================================================================

/// Terminal outcome of a request: bytes transferred, or the error
pub type Outcome = Result<usize>;

/// Completion slot shared by a request and its handle
#[derive(Debug, Default)]
pub struct Completion {
    done: AtomicBool,
    outcome: Mutex<Option<Outcome>>,
    cancel_requested: AtomicBool,
    signals: AtomicU32,
}

impl Completion {
    /// Record the terminal outcome
    ///
    /// Only the first call takes effect; later calls return `false`.
    pub fn complete(&self, outcome: Outcome) -> bool {
        self.signals.fetch_add(1, Ordering::AcqRel);
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            log::warn!("HSAC DMA: request completed twice, ignoring {:?}", outcome);
            return false;
        }
        *slot = Some(outcome);
        self.done.store(true, Ordering::Release);
        true
    }

    /// Outcome, if the request has completed
    pub fn poll(&self) -> Option<Outcome> {
        if !self.done.load(Ordering::Acquire) {
            return None;
        }
        *self.outcome.lock()
    }

    /// Whether the request has completed
    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Number of times completion was signalled (1 for a well-behaved request)
    pub fn signals(&self) -> u32 {
        self.signals.load(Ordering::Acquire)
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }
}

// =============================================================================
// TRANSFER REQUEST
// =============================================================================

/// A read or write request owned by the driver until completion
#[derive(Debug)]
pub struct TransferRequest {
    id: RequestId,
    direction: Direction,
    buffer: HostBuffer,
    packet: Option<PacketParams>,
    completion: Arc<Completion>,
}

impl TransferRequest {
    /// Scatter/gather request over `buffer`
    pub fn new(id: RequestId, direction: Direction, buffer: HostBuffer) -> Self {
        Self {
            id,
            direction,
            buffer,
            packet: None,
            completion: Arc::new(Completion::default()),
        }
    }

    /// Attach packet-profile parameters
    pub fn with_packet(mut self, packet: PacketParams) -> Self {
        self.packet = Some(packet);
        self
    }

    /// Request identity
    #[inline]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Transfer direction
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Host memory of the transfer
    #[inline]
    pub fn buffer(&self) -> &HostBuffer {
        &self.buffer
    }

    /// Packet-profile parameters, if supplied
    #[inline]
    pub fn packet(&self) -> Option<PacketParams> {
        self.packet
    }

    /// Length validated against the maximum transfer size
    ///
    /// The explicit byte count for packet requests, the buffer length
    /// otherwise.
    pub fn length(&self) -> usize {
        match self.packet {
            Some(packet) => packet.byte_count as usize,
            None => self.buffer.len(),
        }
    }

    /// Handle for the originator
    pub fn handle(&self) -> RequestHandle {
        RequestHandle {
            id: self.id,
            direction: self.direction,
            completion: Arc::clone(&self.completion),
        }
    }

    pub(crate) fn completion(&self) -> &Completion {
        &self.completion
    }

    /// Complete the request, consuming it
    pub fn complete(self, outcome: Outcome) {
        match &outcome {
            Ok(bytes) => log::debug!("HSAC DMA[{}]: request {} done, {} bytes", self.direction, self.id, bytes),
            Err(err) => log::debug!("HSAC DMA[{}]: request {} failed: {}", self.direction, self.id, err),
        }
        self.completion.complete(outcome);
    }
}

// =============================================================================
// REQUEST HANDLE
// =============================================================================

/// Originator's view of a submitted request
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: RequestId,
    direction: Direction,
    completion: Arc<Completion>,
}

impl RequestHandle {
    /// Request identity
    #[inline]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Transfer direction
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Outcome, if the request has completed
    pub fn poll(&self) -> Option<Outcome> {
        self.completion.poll()
    }

    /// Whether the request has completed
    pub fn is_complete(&self) -> bool {
        self.completion.is_complete()
    }

    /// Spin until the request completes
    pub fn wait(&self) -> Outcome {
        loop {
            if let Some(outcome) = self.completion.poll() {
                return outcome;
            }
            core::hint::spin_loop();
        }
    }

    /// Number of completion signals the request received
    pub fn signals(&self) -> u32 {
        self.completion.signals()
    }

    pub(crate) fn completion(&self) -> &Completion {
        &self.completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsac_core::PhysAddr;

    #[test]
    fn test_packet_decode() {
        let mut payload = [0u8; 12];
        payload[..4].copy_from_slice(&4096u32.to_le_bytes());
        payload[4..8].copy_from_slice(&3u32.to_le_bytes());
        let params = PacketParams::decode(&payload).unwrap();
        assert_eq!(params, PacketParams { byte_count: 4096, slot: 3 });
        assert_eq!(PacketParams::decode(&payload[..7]), Err(Error::BufferTooSmall));
    }

    #[test]
    fn test_completion_is_single_shot() {
        let request = TransferRequest::new(
            RequestId::new(1),
            Direction::ToDevice,
            HostBuffer::contiguous(PhysAddr::new(0x1000), 64, 4096).unwrap(),
        );
        let handle = request.handle();
        assert_eq!(handle.poll(), None);
        assert_eq!(request.length(), 64);

        let completion = Arc::clone(&request.completion);
        request.complete(Ok(64));
        assert_eq!(handle.poll(), Some(Ok(64)));
        assert!(!completion.complete(Err(Error::Cancelled)));
        assert_eq!(handle.wait(), Ok(64));
        assert_eq!(handle.signals(), 2);
    }

    #[test]
    fn test_packet_length_overrides_buffer() {
        let request = TransferRequest::new(RequestId::new(2), Direction::FromDevice, HostBuffer::empty())
            .with_packet(PacketParams { byte_count: 256, slot: 1 });
        assert_eq!(request.length(), 256);
        assert_eq!(request.packet().map(|p| p.slot), Some(1));
    }
}
