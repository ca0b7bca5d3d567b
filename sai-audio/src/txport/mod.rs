//! Transmit-only audio port.
//!
//! [`TxPort`] is the one-direction variant of the interface. It shares the
//! DMA engine contract with [`Sai`](crate::Sai) but differs in how it
//! paces the FIFO:
//!
//! | | `Sai` | `TxPort` |
//! |-|-------|----------|
//! | Directions | transmit + receive | transmit |
//! | Watermark | FIFO words / 2 | byte thresholds, FIFO / 4 and FIFO × 3 / 4 |
//! | FIFO interrupts | enables left clear | all masked |
//! | Cross-sync | three modes | independent only |
//!
//! Hardware versions: 1 has a fixed [`FIXED_TXPORT_FIFO_BYTES`] FIFO, 2
//! reports its size in `PARAM`.

pub mod regs;

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::delay::DelayNs;

use self::regs::*;
use crate::clock::{ClockConfig, Mode, Polarity, SyncMode};
use crate::constants::{BUFFER_ALIGNMENT, FIXED_TXPORT_FIFO_BYTES};
use crate::diagnostics::{Diagnostics, RegisterDump};
use crate::dma::{
    align_up, AdapterRequest, BufferHandle, DeviceHandle, DmaProvider, DmaStream, StreamConsumer,
    StreamEndpoint, StreamState,
};
use crate::interface::{AudioInterface, Direction, StreamFormat};
use crate::properties::PropertySource;
use crate::registers::{field, poll_until, RegisterAccess};
use crate::{Error, Result};

/// Platform resources of a transmit-only port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxPortResources {
    pub device: DeviceHandle,
    pub phys_base: u64,
    pub request_line: u32,
    pub channel: u32,
}

/// Low/high FIFO byte thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Thresholds {
    /// DMA requests start below this fill level.
    pub low: u32,
    /// DMA requests stop above this fill level.
    pub high: u32,
}

impl Thresholds {
    pub const fn for_fifo(fifo_bytes: u32) -> Self {
        Self {
            low: fifo_bytes / 4,
            high: fifo_bytes * 3 / 4,
        }
    }

    /// Samples one DMA burst moves: the gap between the thresholds.
    pub const fn burst_samples(&self, bytes_per_sample: u32) -> u32 {
        (self.high - self.low) / bytes_per_sample
    }
}

#[derive(Debug, Clone, Copy)]
struct Configured {
    clock: ClockConfig,
    thresholds: Thresholds,
}

/// Transmit-only port controller.
pub struct TxPort<R, P: DmaProvider, D> {
    regs: R,
    dma: P,
    delay: D,
    resources: TxPortResources,
    stream: DmaStream<P::Adapter>,
    active: AtomicBool,
    config: Option<Configured>,
}

impl<R, P, D> TxPort<R, P, D>
where
    R: RegisterAccess,
    P: DmaProvider,
    D: DelayNs,
{
    pub fn new(
        regs: R,
        dma: P,
        delay: D,
        resources: TxPortResources,
        endpoint: &'static StreamEndpoint,
    ) -> Self {
        Self {
            regs,
            dma,
            delay,
            resources,
            stream: DmaStream::new(Direction::Transmit, endpoint),
            active: AtomicBool::new(false),
            config: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Thresholds programmed at initialization.
    pub fn thresholds(&self) -> Option<Thresholds> {
        self.config.map(|c| c.thresholds)
    }

    pub fn stream(&self) -> &DmaStream<P::Adapter> {
        &self.stream
    }

    /// Stop, release every DMA resource and hand back the peripherals.
    pub fn release(mut self) -> (R, P, D) {
        if self.is_active() {
            self.disable();
        }
        self.stream.release(&mut self.dma);
        (self.regs, self.dma, self.delay)
    }

    fn configured(&self, direction: Direction) -> Result<Configured> {
        if direction != Direction::Transmit {
            return Err(Error::InvalidParameter);
        }
        self.config.ok_or(Error::InvalidState)
    }

    fn fifo_bytes(&mut self, version: u32) -> Result<u32> {
        match version {
            1 => Ok(FIXED_TXPORT_FIFO_BYTES),
            2 => {
                let regs = &self.regs;
                poll_until(&mut self.delay, || regs.read32(PARAM) != 0).inspect_err(|_| {
                    error!("transmit port PARAM never populated");
                })?;
                Ok(self.regs.read32(PARAM))
            }
            _ => {
                warn!("unsupported transmit port version {}", version);
                Err(Error::ConfigurationInvalid)
            }
        }
    }

    fn init_stream(&mut self, thresholds: Thresholds, width_bits: u32) -> Result<()> {
        let request = AdapterRequest {
            device: self.resources.device,
            data_register: self.resources.phys_base + u64::from(DATA),
            width_bits,
            request_line: self.resources.request_line,
            channel: self.resources.channel,
        };
        let burst = thresholds.burst_samples(width_bits / 8);
        self.stream.init(&mut self.dma, request, burst)
    }

    fn disable(&mut self) {
        self.regs.modify32(CTRL, CTRL_DMAEN | CTRL_EN, 0);
        self.active.store(false, Ordering::Release);
    }
}

impl<R, P, D> AudioInterface for TxPort<R, P, D>
where
    R: RegisterAccess,
    P: DmaProvider,
    D: DelayNs,
{
    fn init(&mut self, properties: &dyn PropertySource) -> Result<()> {
        if self.is_active() || self.stream.state() != StreamState::Unregistered {
            return Err(Error::InvalidState);
        }
        let clock = ClockConfig::transmit_only(properties)?;
        if clock.sync_mode != SyncMode::Independent {
            warn!("transmit port cannot follow another clock");
            return Err(Error::ConfigurationInvalid);
        }
        let fifo_bytes = self.fifo_bytes(clock.version)?;
        if fifo_bytes == 0 {
            return Err(Error::ConfigurationInvalid);
        }
        let thresholds = Thresholds::for_fifo(fifo_bytes);
        debug!(
            "transmit port: {} byte FIFO, thresholds {}/{}",
            fifo_bytes,
            thresholds.low,
            thresholds.high
        );

        let tx = clock.tx;
        let format = tx.format;
        if format.frame_sync_width > tx.frame_size_bits {
            return Err(Error::ConfigurationInvalid);
        }

        self.regs.write32(CTRL, 0);
        self.regs.write32(INTMASK, u32::MAX);
        self.regs.write32(
            WMARK,
            field(thresholds.low, WMARK_LOW_SHIFT, WMARK_WIDTH)
                | field(thresholds.high, WMARK_HIGH_SHIFT, WMARK_WIDTH),
        );

        let mut fmt = field(tx.frame_size_bits - 1, FORMAT_WORD_SHIFT, FORMAT_FIELD_WIDTH)
            | field(clock.samples_per_frame - 1, FORMAT_SLOTS_SHIFT, FORMAT_FIELD_WIDTH)
            | field(format.frame_sync_width - 1, FORMAT_SYWD_SHIFT, FORMAT_FIELD_WIDTH);
        if format.bit_clock_polarity == Polarity::ActiveLow {
            fmt |= FORMAT_BCP;
        }
        if format.frame_sync_polarity == Polarity::ActiveLow {
            fmt |= FORMAT_FSP;
        }
        if format.frame_sync_early {
            fmt |= FORMAT_FSE;
        }
        self.regs.write32(FORMAT, fmt);

        let mut ctrl = 0;
        if clock.mode == Mode::Master {
            ctrl |= CTRL_MASTER;
        }
        if format.msb_first {
            ctrl |= CTRL_MSB;
        }
        self.regs.write32(CTRL, ctrl);

        self.config = Some(Configured { clock, thresholds });
        Ok(())
    }

    fn supports(&self, direction: Direction) -> bool {
        direction == Direction::Transmit
    }

    fn allocate_buffer(&mut self, direction: Direction, size: u32) -> Result<BufferHandle> {
        let cfg = self.configured(direction)?;
        let size = align_up(size, BUFFER_ALIGNMENT)
            .filter(|&s| s != 0)
            .ok_or(Error::InvalidParameter)?;
        if self.stream.width_bits().is_none() {
            self.init_stream(cfg.thresholds, cfg.clock.tx.container_bits())?;
        }
        self.stream.allocate_buffer(size)
    }

    fn free_buffer(&mut self, direction: Direction, handle: BufferHandle) {
        assert_eq!(direction, Direction::Transmit, "transmit-only port");
        self.stream.free_buffer(handle);
    }

    fn register_stream(
        &mut self,
        direction: Direction,
        format: StreamFormat,
        consumer: &'static dyn StreamConsumer,
    ) -> Result<()> {
        let cfg = self.configured(direction)?;
        if !format.is_valid() {
            return Err(Error::InvalidParameter);
        }
        if self.is_active() || self.stream.state() != StreamState::Unregistered {
            return Err(Error::InvalidState);
        }

        let plan = cfg.clock.clock_plan(Direction::Transmit, format.sample_rate)?;
        self.init_stream(cfg.thresholds, format.bits_per_sample)?;

        let saved = self.regs.read32(CLKDIV);
        self.regs.write32(CLKDIV, field(plan.divider, CLKDIV_SHIFT, CLKDIV_WIDTH));
        self.stream.register_stream(consumer).inspect_err(|_| {
            self.regs.write32(CLKDIV, saved);
        })
    }

    fn unregister_stream(
        &mut self,
        direction: Direction,
        consumer: &'static dyn StreamConsumer,
    ) -> Result<()> {
        if direction != Direction::Transmit {
            return Err(Error::InvalidParameter);
        }
        if self.is_active() {
            self.disable();
        }
        self.stream.unregister_stream(consumer)
    }

    fn start_dma(&mut self, direction: Direction) -> Result<()> {
        self.configured(direction)?;
        if self.is_active() {
            return self.stream.start();
        }
        self.stream.start()?;

        self.regs.modify32(CTRL, 0, CTRL_FIFO_RST);
        let regs = &self.regs;
        if let Err(e) = poll_until(&mut self.delay, || regs.read32(STATUS) & STATUS_RDY != 0) {
            warn!("transmit FIFO never left reset");
            self.regs.modify32(CTRL, CTRL_FIFO_RST, 0);
            if let Err(rollback) = self.stream.stop() {
                warn!("engine rollback failed: {}", rollback);
            }
            return Err(e);
        }
        self.regs.modify32(CTRL, CTRL_FIFO_RST, CTRL_EN | CTRL_DMAEN);
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_dma(&mut self, direction: Direction) -> Result<()> {
        self.configured(direction)?;
        if self.is_active() {
            self.disable();
        }
        self.stream.stop()
    }

    fn pause_dma(&mut self, direction: Direction) -> Result<()> {
        self.configured(direction)?;
        if self.is_active() {
            self.disable();
        }
        self.stream.pause()
    }
}

impl<R, P, D> Diagnostics for TxPort<R, P, D>
where
    R: RegisterAccess,
    P: DmaProvider,
    D: DelayNs,
{
    fn dump_registers(&self) -> RegisterDump {
        let mut dump = RegisterDump::new();
        for (name, offset) in [
            ("CTRL", CTRL),
            ("CLKDIV", CLKDIV),
            ("FORMAT", FORMAT),
            ("WMARK", WMARK),
            ("INTMASK", INTMASK),
            ("STATUS", STATUS),
            ("PARAM", PARAM),
        ] {
            dump.push(name, offset, self.regs.read32(offset));
        }
        dump
    }
}
