//! # sai-audio
//!
//! A `no_std`, zero-allocation clocking and DMA streaming engine for
//! bidirectional serial audio interfaces (SAI-class peripherals). It programs
//! the transmit and receive halves of the interface, derives bit-clock
//! dividers, and streams sample data through circular scatter-gather DMA
//! supplied by the platform.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Registers | [`registers`] | `read32`/`write32` at base + offset, bounded polling |
//! | Properties | [`properties`] | Named integer properties from the platform |
//! | Clocking | [`clock`] | [`ClockConfig`], protocol defaults, divider arithmetic |
//! | DMA | [`dma`] | Per-direction [`DmaStream`] engine and completion endpoint |
//! | Controller | [`sai`] | Full-duplex interface with cross-sync start/stop rules |
//! | Variant | [`txport`] | Transmit-only port with byte-threshold watermarks |
//! | Trait | [`interface`] | [`AudioInterface`] capability set shared by both |
//! | Debug | [`diagnostics`] | Explicitly invoked register dumps |
//!
//! ## Lifecycle
//!
//! ```ignore
//! static TX_ENDPOINT: StreamEndpoint = StreamEndpoint::new();
//! static RX_ENDPOINT: StreamEndpoint = StreamEndpoint::new();
//!
//! let mut sai = Sai::new(regs, dma, delay, resources, &TX_ENDPOINT, &RX_ENDPOINT);
//! sai.init(&properties)?;
//!
//! let handle = sai.allocate_buffer(Direction::Transmit, 4096)?;
//! sai.register_stream(Direction::Transmit, format, &PLAYBACK)?;
//! sai.start_dma(Direction::Transmit)?;
//!
//! // DMA completion ISR, with the endpoint handed over at map time:
//! TX_ENDPOINT.on_transfer_complete(TransferStatus::Success);
//!
//! sai.stop_dma(Direction::Transmit)?;
//! sai.unregister_stream(Direction::Transmit, &PLAYBACK)?;
//! sai.free_buffer(Direction::Transmit, handle);
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `log` | no | Driver events through the `log` facade |
//! | `defmt` | no | `defmt::Format` on public types |

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod clock;
pub mod constants;
pub mod diagnostics;
pub mod dma;
mod error;
pub mod interface;
pub mod properties;
pub mod registers;
pub mod sai;
pub mod txport;

pub use clock::ClockConfig;
pub use dma::{DmaStream, StreamConsumer, StreamEndpoint};
pub use error::Error;
pub use interface::{AudioInterface, Direction, StreamFormat};
pub use sai::Sai;
pub use txport::TxPort;

/// A driver result
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod testing;
