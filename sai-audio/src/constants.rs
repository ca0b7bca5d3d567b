/// DMA buffers are sized and aligned to this many bytes.
pub const BUFFER_ALIGNMENT: u32 = 64;

/// Page size used to describe scatter-gather fragments.
pub const PAGE_SIZE: u32 = 4096;

/// Maximum number of reads while waiting for a hardware ready bit.
pub const POLL_RETRIES: u32 = 1000;

/// Spacing between two ready-bit reads, in microseconds.
pub const POLL_INTERVAL_US: u32 = 1;

/// Maximum number of attempts to confirm a DMA transfer cancellation.
pub const CANCEL_RETRIES: u32 = 100;

/// Capacity of the improved-timing table in a [`ClockConfig`](crate::ClockConfig).
pub const MAX_TIMING_ENTRIES: usize = 8;

/// FIFO depth, in words, for interface versions without a capability
/// register or sizing probe.
pub const FIXED_FIFO_WORDS: u32 = 32;

/// Data-line count for interface versions without geometry discovery.
pub const FIXED_DATA_LINES: u32 = 1;

/// Native frame size, in time-slots, for interface versions without
/// geometry discovery.
pub const FIXED_FRAME_SLOTS: u32 = 32;

/// FIFO size, in bytes, of a transmit-only port without a capability register.
pub const FIXED_TXPORT_FIFO_BYTES: u32 = 128;
