use crate::dma::{BufferHandle, StreamConsumer};
use crate::properties::PropertySource;
use crate::Result;

/// Data direction of an interface half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Memory to interface (playback).
    Transmit,
    /// Interface to memory (capture).
    Receive,
}

impl Direction {
    /// Both directions, transmit first.
    pub const ALL: [Direction; 2] = [Direction::Transmit, Direction::Receive];

    /// The other direction.
    pub const fn peer(self) -> Direction {
        match self {
            Direction::Transmit => Direction::Receive,
            Direction::Receive => Direction::Transmit,
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Direction::Transmit => 0,
            Direction::Receive => 1,
        }
    }
}

/// Sample format negotiated by the upper audio stack for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Container width of one sample in memory, in bits (8, 16 or 32).
    pub bits_per_sample: u32,
    /// Interleaved channels per frame.
    pub channels: u32,
}

impl StreamFormat {
    /// Bytes occupied by one sample in memory.
    pub const fn bytes_per_sample(&self) -> u32 {
        self.bits_per_sample / 8
    }

    /// Bytes occupied by one interleaved frame in memory.
    pub const fn bytes_per_frame(&self) -> u32 {
        self.bytes_per_sample() * self.channels
    }

    pub(crate) const fn is_valid(&self) -> bool {
        self.sample_rate != 0
            && self.channels != 0
            && matches!(self.bits_per_sample, 8 | 16 | 32)
    }
}

/// Capability set shared by every audio interface variant.
///
/// Implemented by the full-duplex [`Sai`](crate::Sai) and the transmit-only
/// [`TxPort`](crate::TxPort). The variant is chosen once, when the driver
/// is constructed.
pub trait AudioInterface {
    /// One-time initialization from platform properties.
    fn init(&mut self, properties: &dyn PropertySource) -> Result<()>;

    /// Whether this interface can stream in `direction`.
    fn supports(&self, direction: Direction) -> bool;

    /// Allocate the circular DMA buffer for `direction`.
    ///
    /// The size is rounded up to the buffer alignment before allocation;
    /// the handle reports the real size.
    fn allocate_buffer(&mut self, direction: Direction, size: u32) -> Result<BufferHandle>;

    /// Release a buffer returned by [`allocate_buffer`](Self::allocate_buffer).
    fn free_buffer(&mut self, direction: Direction, handle: BufferHandle);

    /// Attach `consumer` to `direction` and prepare clocking for `format`.
    fn register_stream(
        &mut self,
        direction: Direction,
        format: StreamFormat,
        consumer: &'static dyn StreamConsumer,
    ) -> Result<()>;

    /// Detach the consumer previously registered on `direction`.
    fn unregister_stream(
        &mut self,
        direction: Direction,
        consumer: &'static dyn StreamConsumer,
    ) -> Result<()>;

    /// Start (or resume) streaming on `direction`.
    fn start_dma(&mut self, direction: Direction) -> Result<()>;

    /// Stop streaming on `direction`; the next start re-maps the buffer.
    fn stop_dma(&mut self, direction: Direction) -> Result<()>;

    /// Pause streaming on `direction`; resume with [`start_dma`](Self::start_dma).
    fn pause_dma(&mut self, direction: Direction) -> Result<()>;
}
