//! DMA streaming engine.
//!
//! Each direction of an interface owns one [`DmaStream`]. The stream holds
//! a circular buffer, an adapter channel and the notification threshold,
//! and maps the whole buffer as one auto-initializing scatter-gather
//! transfer:
//!
//! ```text
//!          ┌──────────── buffer (S bytes) ────────────┐
//!          │  S/N  │  S/N  │  S/N  │  ...  │  S/N  │
//!          └───┬───────┬───────┬───────────────┬───┘
//!              ▼       ▼       ▼               ▼
//!         completion completion ...        completion ──▶ wraps to start
//!              │
//!              ▼
//!    StreamEndpoint::on_transfer_complete ──▶ consumer.position_changed(pos)
//! ```
//!
//! The DMA hardware itself belongs to the platform. The engine reaches it
//! through two traits: [`DmaProvider`] hands out adapters for a given data
//! register and request line, and [`DmaAdapter`] does everything else
//! (buffers, channels, mapping, cancellation).
//!
//! Completions arrive on the platform's DMA completion context, concurrent
//! with the control path. They only ever touch the `'static`
//! [`StreamEndpoint`] passed at map time, never the stream itself.

mod buffer;
mod endpoint;
mod priority;
mod stream;

pub use buffer::{align_up, BufferHandle, DmaBuffer, PageFragments};
pub use endpoint::{StreamConsumer, StreamEndpoint};
pub use priority::PriorityGuard;
pub use stream::{DmaStream, StreamState};

use crate::interface::Direction;

/// Failure reported by the platform DMA provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaError {
    /// No adapter, channel, map register or memory left.
    ResourceExhausted,
    /// The provider refused the request (bad property, busy channel, ...).
    Rejected,
    /// The provider mapped nothing.
    NothingMapped,
}

impl core::fmt::Display for DmaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DmaError::ResourceExhausted => write!(f, "resources exhausted"),
            DmaError::Rejected => write!(f, "request rejected"),
            DmaError::NothingMapped => write!(f, "transfer mapped zero bytes"),
        }
    }
}

/// Cache policy of a DMA buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CachePolicy {
    /// CPU caches enabled; the caller flushes around transfers.
    Cached,
    /// Uncached / write-combined; coherent with the DMA engine.
    NonCached,
}

/// Channel properties programmed after a channel is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelProperty {
    /// Bytes between two completion notifications.
    NotificationThreshold(u32),
    /// Hardware burst size in bytes.
    WatermarkLevel(u32),
    /// Route the logical request line to the channel.
    AcquireRequestLine(u32),
}

/// Outcome of one completed notification period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferStatus {
    /// The period transferred normally.
    Success,
    /// The controller reported a bus or descriptor error.
    Error,
    /// The transfer was cancelled before the period finished.
    Cancelled,
}

/// What a mapping of a buffer would need from the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferInfo {
    /// Map registers needed to cover the buffer.
    pub map_registers: u32,
    /// Scatter-gather elements in the mapping.
    pub elements: u32,
}

/// Opaque platform handle of the device the adapter serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceHandle(pub u32);

/// Everything a provider needs to hand out an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdapterRequest {
    /// Device the transfers belong to.
    pub device: DeviceHandle,
    /// Physical address of the interface data register.
    pub data_register: u64,
    /// Width of one data-register access in bits.
    pub width_bits: u32,
    /// Logical request line of the interface direction.
    pub request_line: u32,
    /// Controller channel id.
    pub channel: u32,
}

/// Platform DMA resource pool.
pub trait DmaProvider {
    /// Adapter type handed out by this provider.
    type Adapter: DmaAdapter;

    /// Acquire a scatter-gather capable adapter; `None` if none is left.
    fn acquire_adapter(&mut self, request: &AdapterRequest) -> Option<Self::Adapter>;

    /// Return an adapter to the pool.
    fn release_adapter(&mut self, adapter: Self::Adapter);
}

/// One DMA adapter: buffers, a channel and the mapped transfer.
pub trait DmaAdapter {
    /// Upper bound on map registers for a single channel.
    fn max_map_registers(&self) -> u32;

    /// Map registers and elements needed for `fragments`.
    fn transfer_info(&self, fragments: &PageFragments) -> TransferInfo;

    /// Reset the per-transfer context before a new mapping.
    fn init_transfer_context(&mut self);

    /// Allocate `size` bytes of physically contiguous memory.
    fn allocate_buffer(&mut self, size: u32, cache: CachePolicy) -> Option<DmaBuffer>;

    /// Free memory returned by [`allocate_buffer`](Self::allocate_buffer).
    fn free_buffer(&mut self, buffer: DmaBuffer);

    /// Allocate the adapter channel with `map_registers` map registers.
    ///
    /// Called with interrupts masked; must not block.
    fn allocate_channel(&mut self, map_registers: u32) -> Result<(), DmaError>;

    /// Program one channel property.
    fn set_channel_property(&mut self, property: ChannelProperty) -> Result<(), DmaError>;

    /// Map `len` bytes of `buffer` as an auto-initializing transfer.
    ///
    /// Every notification period completes on `endpoint`. Returns the
    /// length actually mapped, which may be shorter than `len`.
    fn map_transfer(
        &mut self,
        buffer: &DmaBuffer,
        len: u32,
        direction: Direction,
        endpoint: &'static StreamEndpoint,
    ) -> Result<u32, DmaError>;

    /// Cancel the mapped transfer. Returns `true` once cancellation is
    /// confirmed and no further completion will arrive.
    fn cancel_transfer(&mut self) -> bool;

    /// Flush buffers after the last transfer in `direction`.
    fn flush_buffers(&mut self, buffer: &DmaBuffer, direction: Direction);

    /// Release the adapter channel.
    fn free_channel(&mut self);
}
