use crate::error::DriverError;
use crate::event::Event;
use crate::mutex::UnsafeMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of packets in every pin's transfer ring.
pub const PACKET_RING_SIZE: usize = 4;

pub type PacketRef = Arc<DataPacket>;

/// One hardware transfer unit. The I/O thread owns the bytes while the packet
/// is not queued on a pin; the pin owns them from enqueue until it signals
/// completion.
#[derive(Debug)]
pub struct DataPacket {
    data: UnsafeMutex<Box<[u8]>>,
    bytes_used: AtomicUsize,
    slot: usize,
    signal: Event,
}

impl DataPacket {
    pub fn new(extent: usize, slot: usize, signal: Event) -> Result<Self, DriverError> {
        let mut data = Vec::new();
        data.try_reserve_exact(extent)
            .map_err(|_| DriverError::NoMemory)?;
        data.resize(extent, 0_u8);
        Ok(Self {
            data: UnsafeMutex::new(data.into_boxed_slice()),
            bytes_used: AtomicUsize::new(0),
            slot,
            signal,
        })
    }

    pub fn extent(&self) -> usize {
        self.data.lock().len()
    }

    #[allow(clippy::mut_from_ref)]
    pub fn data(&self) -> &mut [u8] {
        self.data.lock()
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used.load(Ordering::Acquire)
    }

    pub fn set_bytes_used(&self, bytes: usize) {
        self.bytes_used
            .store(bytes.min(self.extent()), Ordering::Release);
    }

    /// Index of this packet in its pin's ring.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn zero(&self) {
        self.data.lock().fill(0);
        self.bytes_used.store(0, Ordering::Release);
    }

    /// Marks the transfer done and wakes the I/O thread.
    pub fn complete(&self, bytes: usize) {
        self.set_bytes_used(bytes);
        self.signal.signal();
    }

    pub fn signal(&self) -> &Event {
        &self.signal
    }
}
