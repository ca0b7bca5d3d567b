use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use critical_section::Mutex;
use portable_atomic::AtomicU64;

use crate::dma::TransferStatus;

/// Receiver of stream position updates.
///
/// Called from the DMA completion context, so implementations must be
/// `Sync` and must not block.
pub trait StreamConsumer: Sync {
    /// How many completion notifications one pass over the buffer raises.
    fn notifications_per_buffer(&self) -> u32;

    /// Bytes in one interleaved sample frame.
    fn bytes_per_frame(&self) -> u32;

    /// The stream advanced to absolute frame `position`.
    fn position_changed(&self, position: u64);
}

/// The part of a stream that the DMA completion context may touch.
///
/// One endpoint per stream, living in a `static`. It is handed to the
/// adapter at map time as the completion context:
///
/// ```ignore
/// static TX_ENDPOINT: StreamEndpoint = StreamEndpoint::new();
///
/// // DMA completion interrupt
/// TX_ENDPOINT.on_transfer_complete(TransferStatus::Success);
/// ```
///
/// The consumer reference is swapped under a critical section. The
/// position counter and thresholds are atomics.
pub struct StreamEndpoint {
    consumer: Mutex<Cell<Option<&'static dyn StreamConsumer>>>,
    transferred: AtomicU64,
    notification_bytes: AtomicU32,
    bytes_per_frame: AtomicU32,
}

impl StreamEndpoint {
    /// An endpoint with no consumer attached.
    pub const fn new() -> Self {
        Self {
            consumer: Mutex::new(Cell::new(None)),
            transferred: AtomicU64::new(0),
            notification_bytes: AtomicU32::new(0),
            bytes_per_frame: AtomicU32::new(0),
        }
    }

    /// Frames transferred since the consumer was attached.
    pub fn transferred_sample_count(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    /// Whether a consumer is attached.
    pub fn is_attached(&self) -> bool {
        critical_section::with(|cs| self.consumer.borrow(cs).get().is_some())
    }

    /// Completion of one notification period.
    ///
    /// On success the position advances by one period's worth of frames
    /// and the consumer hears about it. Without a consumer (the stream is
    /// being torn down) this does nothing. Failed periods do not advance
    /// the position.
    pub fn on_transfer_complete(&self, status: TransferStatus) {
        if status != TransferStatus::Success {
            warn!("DMA period completed with {:?}", status);
            return;
        }

        // The consumer runs inside the critical section so that once
        // `detach` returns it is never called again.
        critical_section::with(|cs| {
            let Some(consumer) = self.consumer.borrow(cs).get() else {
                return;
            };
            let bytes_per_frame = self.bytes_per_frame.load(Ordering::Relaxed);
            if bytes_per_frame == 0 {
                return;
            }
            let frames = u64::from(self.notification_bytes.load(Ordering::Relaxed) / bytes_per_frame);
            let position = self.transferred.fetch_add(frames, Ordering::AcqRel) + frames;
            trace!("position {}", position);
            consumer.position_changed(position);
        });
    }

    pub(crate) fn attach(
        &self,
        consumer: &'static dyn StreamConsumer,
        notification_bytes: u32,
        bytes_per_frame: u32,
    ) {
        critical_section::with(|cs| {
            self.notification_bytes.store(notification_bytes, Ordering::Relaxed);
            self.bytes_per_frame.store(bytes_per_frame, Ordering::Relaxed);
            self.transferred.store(0, Ordering::Release);
            self.consumer.borrow(cs).set(Some(consumer));
        });
    }

    pub(crate) fn detach(&self) {
        critical_section::with(|cs| self.consumer.borrow(cs).set(None));
    }
}

impl Default for StreamEndpoint {
    fn default() -> Self {
        Self::new()
    }
}
