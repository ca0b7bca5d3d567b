//! Full-duplex serial audio interface controller.
//!
//! [`Sai`] programs both halves of the interface and owns one
//! [`DmaStream`] per direction.
//!
//! ## Cross-direction clocking
//!
//! With [`SyncMode::RxFollowsTx`] the receiver runs from the transmitter's
//! bit clock and frame sync (and the other way round for
//! [`SyncMode::TxFollowsRx`]). The clock source must be enabled whenever
//! its follower runs, whether or not it streams itself:
//!
//! ```text
//!  start(RX)   TX idle  ──▶ TX: TE only (clocks, no DMA)   RX: reset, FRDE|TE
//!  start(TX)   RX active ─▶ TX: FRDE|TE, no reset (clocks already shared)
//!  stop(TX)    RX active ─▶ TX: FRDE cleared, TE kept (deferred)
//!  stop(RX)    TX idle  ──▶ RX: disabled, then TX: TE cleared (deferred disable done)
//! ```
//!
//! ## Lifecycle
//!
//! 1. [`init`](AudioInterface::init): geometry detection and frame/format
//!    programming, both directions idle.
//! 2. [`allocate_buffer`](AudioInterface::allocate_buffer), then
//!    [`register_stream`](AudioInterface::register_stream): divider for the
//!    sample rate, DMA engine for the sample width, consumer attached.
//! 3. [`start_dma`](AudioInterface::start_dma) /
//!    [`pause_dma`](AudioInterface::pause_dma) /
//!    [`stop_dma`](AudioInterface::stop_dma).
//! 4. [`unregister_stream`](AudioInterface::unregister_stream), then
//!    [`free_buffer`](AudioInterface::free_buffer).

pub mod geometry;
pub mod regs;

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::delay::DelayNs;

use self::geometry::{FifoGeometry, Layout};
use self::regs::*;
use crate::clock::{ClockConfig, Mode, Polarity, SyncMode};
use crate::constants::BUFFER_ALIGNMENT;
use crate::diagnostics::{Diagnostics, RegisterDump};
use crate::dma::{
    align_up, AdapterRequest, BufferHandle, DeviceHandle, DmaProvider, DmaStream, StreamConsumer,
    StreamEndpoint, StreamState,
};
use crate::interface::{AudioInterface, Direction, StreamFormat};
use crate::properties::PropertySource;
use crate::registers::{field, field_mask, get_field, poll_until, RegisterAccess};
use crate::{Error, Result};

/// Platform resources of one interface instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SaiResources {
    /// Device handle passed to the DMA provider.
    pub device: DeviceHandle,
    /// Bus address of the register block.
    pub phys_base: u64,
    /// DMA request line per direction, indexed transmit first.
    pub request_lines: [u32; 2],
    /// DMA channel per direction, indexed transmit first.
    pub channels: [u32; 2],
}

#[derive(Debug, Clone, Copy)]
struct Configured {
    clock: ClockConfig,
    layout: Layout,
    geometry: FifoGeometry,
}

/// Rate error above which a divider choice is reported.
const RATE_ERROR_WARN_PPM: f32 = 1000.0;

/// Full-duplex interface controller.
pub struct Sai<R, P: DmaProvider, D> {
    regs: R,
    dma: P,
    delay: D,
    resources: SaiResources,
    streams: [DmaStream<P::Adapter>; 2],
    active: [AtomicBool; 2],
    config: Option<Configured>,
}

impl<R, P, D> Sai<R, P, D>
where
    R: RegisterAccess,
    P: DmaProvider,
    D: DelayNs,
{
    /// Create the controller. Nothing is touched until
    /// [`init`](AudioInterface::init).
    pub fn new(
        regs: R,
        dma: P,
        delay: D,
        resources: SaiResources,
        tx_endpoint: &'static StreamEndpoint,
        rx_endpoint: &'static StreamEndpoint,
    ) -> Self {
        Self {
            regs,
            dma,
            delay,
            resources,
            streams: [
                DmaStream::new(Direction::Transmit, tx_endpoint),
                DmaStream::new(Direction::Receive, rx_endpoint),
            ],
            active: [AtomicBool::new(false), AtomicBool::new(false)],
            config: None,
        }
    }

    /// Whether `direction` is running.
    pub fn is_active(&self, direction: Direction) -> bool {
        self.active[direction.index()].load(Ordering::Acquire)
    }

    /// Clock configuration from the last successful initialization.
    pub fn clock_config(&self) -> Option<&ClockConfig> {
        self.config.as_ref().map(|c| &c.clock)
    }

    /// Geometry found at initialization.
    pub fn geometry(&self) -> Option<FifoGeometry> {
        self.config.map(|c| c.geometry)
    }

    /// DMA engine of `direction`.
    pub fn stream(&self, direction: Direction) -> &DmaStream<P::Adapter> {
        &self.streams[direction.index()]
    }

    /// Stop both directions, release every DMA resource and hand back the
    /// peripherals.
    pub fn release(mut self) -> (R, P, D) {
        if let Some(cfg) = self.config {
            for direction in Direction::ALL {
                if self.is_active(direction) {
                    self.stop_hw(&cfg, direction);
                }
            }
        }
        for stream in self.streams.iter_mut() {
            stream.release(&mut self.dma);
        }
        (self.regs, self.dma, self.delay)
    }

    fn configured(&self) -> Result<Configured> {
        self.config.ok_or(Error::InvalidState)
    }

    // ── Register programming ───────────────────────────────────────────

    /// Read-modify-write of a CSR that never clears sticky flags by accident.
    fn csr_update(&mut self, layout: &Layout, direction: Direction, clear: u32, set: u32) {
        let csr = layout.reg(direction, CSR);
        let value = (self.regs.read32(csr) & !CSR_W1C & !clear) | set;
        self.regs.write32(csr, value);
    }

    fn program_direction(&mut self, cfg: &Configured, direction: Direction) {
        let clock = &cfg.clock;
        let dc = clock.direction(direction);
        let format = dc.format;
        let master = clock.mode == Mode::Master;
        let follows = clock.sync_mode.follower() == Some(direction);
        let reg = |offset| cfg.layout.reg(direction, offset);

        // Disabled, sticky flags cleared.
        self.regs.write32(reg(CSR), CSR_W1C);
        self.regs.write32(
            reg(CR1),
            field(cfg.geometry.watermark(), CR1_WATERMARK_SHIFT, CR1_WATERMARK_WIDTH),
        );

        let mut cr2 = field(follows as u32, CR2_SYNC_SHIFT, CR2_SYNC_WIDTH)
            | field(dc.mclk_select, CR2_MSEL_SHIFT, CR2_MSEL_WIDTH);
        if format.bit_clock_polarity == Polarity::ActiveLow {
            cr2 |= CR2_BCP;
        }
        if master {
            cr2 |= CR2_BCD;
        }
        self.regs.write32(reg(CR2), cr2);
        self.regs.write32(reg(CR3), field(1, CR3_CE_SHIFT, CR3_CE_WIDTH));

        let mut cr4 = field(clock.samples_per_frame - 1, CR4_FRSZ_SHIFT, CR4_FRSZ_WIDTH)
            | field(format.frame_sync_width - 1, CR4_SYWD_SHIFT, CR4_SYWD_WIDTH);
        if format.msb_first {
            cr4 |= CR4_MF;
        }
        if format.frame_sync_early {
            cr4 |= CR4_FSE;
        }
        if format.frame_sync_polarity == Polarity::ActiveLow {
            cr4 |= CR4_FSP;
        }
        if master {
            cr4 |= CR4_FSD;
        }
        self.regs.write32(reg(CR4), cr4);

        let word = dc.frame_size_bits - 1;
        let first_bit = if format.msb_first { word } else { 0 };
        self.regs.write32(
            reg(CR5),
            field(word, CR5_WNW_SHIFT, CR5_FIELD_WIDTH)
                | field(word, CR5_W0W_SHIFT, CR5_FIELD_WIDTH)
                | field(first_bit, CR5_FBT_SHIFT, CR5_FIELD_WIDTH),
        );
        self.regs.write32(reg(MASK), dc.slot_mask);
    }

    fn set_divider(&mut self, layout: &Layout, direction: Direction, divider: u32) {
        self.regs.modify32(
            layout.reg(direction, CR2),
            field_mask(CR2_DIV_SHIFT, CR2_DIV_WIDTH),
            field(divider, CR2_DIV_SHIFT, CR2_DIV_WIDTH),
        );
    }

    /// Divider currently programmed for `direction`.
    fn divider(&self, layout: &Layout, direction: Direction) -> u32 {
        get_field(
            self.regs.read32(layout.reg(direction, CR2)),
            CR2_DIV_SHIFT,
            CR2_DIV_WIDTH,
        )
    }

    fn init_stream(&mut self, cfg: &Configured, direction: Direction, width_bits: u32) -> Result<()> {
        let i = direction.index();
        let request = AdapterRequest {
            device: self.resources.device,
            data_register: self.resources.phys_base + u64::from(cfg.layout.reg(direction, DATA)),
            width_bits,
            request_line: self.resources.request_lines[i],
            channel: self.resources.channels[i],
        };
        self.streams[i].init(&mut self.dma, request, cfg.geometry.watermark())
    }

    // ── Enable / disable sequencing ────────────────────────────────────

    fn start_hw(&mut self, cfg: &Configured, direction: Direction) -> Result<()> {
        let layout = &cfg.layout;
        let sync = cfg.clock.sync_mode;
        let peer = direction.peer();
        let csr = layout.reg(direction, CSR);

        let mut enabled_peer = false;
        if sync.depends_on(direction, peer)
            && !self.is_active(peer)
            && self.regs.read32(layout.reg(peer, CSR)) & CSR_TE == 0
        {
            debug!("{:?}: enabling clock source {:?}", direction, peer);
            self.csr_update(layout, peer, 0, CSR_TE);
            enabled_peer = true;
        }

        if sync == SyncMode::Independent || !self.is_active(peer) {
            self.csr_update(layout, direction, 0, CSR_FR | CSR_SR);
            self.csr_update(layout, direction, CSR_SR, 0);
        }

        let value = (self.regs.read32(csr) & !CSR_W1C) | CSR_W1C | CSR_FRDE | CSR_TE;
        self.regs.write32(csr, value);

        let regs = &self.regs;
        if let Err(e) = poll_until(&mut self.delay, || regs.read32(csr) & CSR_TE != 0) {
            warn!("{:?}: logic enable never asserted, rolling back", direction);
            self.csr_update(layout, direction, CSR_FRDE | CSR_TE, 0);
            if enabled_peer {
                self.csr_update(layout, peer, CSR_TE, 0);
            }
            return Err(e);
        }

        self.active[direction.index()].store(true, Ordering::Release);
        Ok(())
    }

    fn stop_hw(&mut self, cfg: &Configured, direction: Direction) {
        let layout = &cfg.layout;
        let sync = cfg.clock.sync_mode;
        let peer = direction.peer();

        self.csr_update(layout, direction, CSR_FRDE, 0);
        if sync.depends_on(peer, direction) && self.is_active(peer) {
            debug!("{:?}: {:?} runs from its clocks, deferring disable", direction, peer);
        } else {
            self.disable_logic(layout, direction);
        }
        self.active[direction.index()].store(false, Ordering::Release);

        if sync.depends_on(direction, peer) && !self.is_active(peer) {
            debug!("{:?}: completing deferred disable of {:?}", direction, peer);
            self.disable_logic(layout, peer);
        }
    }

    fn disable_logic(&mut self, layout: &Layout, direction: Direction) {
        self.csr_update(layout, direction, CSR_TE, 0);
        let csr = layout.reg(direction, CSR);
        let regs = &self.regs;
        if poll_until(&mut self.delay, || regs.read32(csr) & CSR_TE == 0).is_err() {
            warn!("{:?}: logic enable still set after disable", direction);
        }
    }
}

impl<R, P, D> AudioInterface for Sai<R, P, D>
where
    R: RegisterAccess,
    P: DmaProvider,
    D: DelayNs,
{
    fn init(&mut self, properties: &dyn PropertySource) -> Result<()> {
        // Reprogramming CR2 would drop the dividers of registered streams.
        let busy = |d: Direction| {
            self.is_active(d) || self.streams[d.index()].state() != StreamState::Unregistered
        };
        if Direction::ALL.into_iter().any(busy) {
            return Err(Error::InvalidState);
        }

        let clock = ClockConfig::from_properties(properties)?;
        let layout = Layout::for_version(clock.version)?;
        let geometry = FifoGeometry::detect(&mut self.regs, &mut self.delay, &layout)?;

        if clock.samples_per_frame > geometry.frame_slots {
            warn!(
                "{} slots per frame exceed the native {}",
                clock.samples_per_frame,
                geometry.frame_slots
            );
            return Err(Error::ConfigurationInvalid);
        }
        for direction in Direction::ALL {
            let dc = clock.direction(direction);
            if dc.format.frame_sync_width > dc.frame_size_bits {
                return Err(Error::ConfigurationInvalid);
            }
        }

        let cfg = Configured {
            clock,
            layout,
            geometry,
        };
        for direction in Direction::ALL {
            self.program_direction(&cfg, direction);
        }
        self.config = Some(cfg);
        Ok(())
    }

    fn supports(&self, _direction: Direction) -> bool {
        true
    }

    fn allocate_buffer(&mut self, direction: Direction, size: u32) -> Result<BufferHandle> {
        let cfg = self.configured()?;
        let size = align_up(size, BUFFER_ALIGNMENT)
            .filter(|&s| s != 0)
            .ok_or(Error::InvalidParameter)?;
        if self.streams[direction.index()].width_bits().is_none() {
            let width = cfg.clock.direction(direction).container_bits();
            self.init_stream(&cfg, direction, width)?;
        }
        self.streams[direction.index()].allocate_buffer(size)
    }

    fn free_buffer(&mut self, direction: Direction, handle: BufferHandle) {
        self.streams[direction.index()].free_buffer(handle);
    }

    fn register_stream(
        &mut self,
        direction: Direction,
        format: StreamFormat,
        consumer: &'static dyn StreamConsumer,
    ) -> Result<()> {
        let cfg = self.configured()?;
        if !format.is_valid() {
            return Err(Error::InvalidParameter);
        }
        let i = direction.index();
        if self.is_active(direction) || self.streams[i].state() != StreamState::Unregistered {
            return Err(Error::InvalidState);
        }

        let plan = cfg.clock.clock_plan(direction, format.sample_rate)?;
        let ppm = plan.rate_error_ppm();
        if libm::fabsf(ppm) > RATE_ERROR_WARN_PPM {
            warn!(
                "{:?}: divider {} misses {} Hz by {} ppm",
                direction,
                plan.divider,
                format.sample_rate,
                ppm
            );
        }

        let layout = cfg.layout;
        let sync = cfg.clock.sync_mode;
        let peer = direction.peer();
        let source = sync.clock_source(direction);
        if source != direction
            && self.is_active(source)
            && self.divider(&layout, source) != plan.divider
        {
            warn!(
                "{:?}: {} Hz needs divider {}, running {:?} clock uses {}",
                direction,
                format.sample_rate,
                plan.divider,
                source,
                self.divider(&layout, source)
            );
            return Err(Error::ConfigurationInvalid);
        }
        if sync.depends_on(peer, direction)
            && self.is_active(peer)
            && self.divider(&layout, direction) != plan.divider
        {
            warn!("{:?}: clocks in use by running {:?}", direction, peer);
            return Err(Error::InvalidState);
        }

        self.init_stream(&cfg, direction, format.bits_per_sample)?;

        let saved = [
            self.divider(&layout, Direction::Transmit),
            self.divider(&layout, Direction::Receive),
        ];
        self.set_divider(&layout, direction, plan.divider);
        if source != direction && !self.is_active(source) {
            self.set_divider(&layout, source, plan.divider);
        }

        if let Err(e) = self.streams[i].register_stream(consumer) {
            for d in Direction::ALL {
                self.set_divider(&layout, d, saved[d.index()]);
            }
            return Err(e);
        }
        Ok(())
    }

    fn unregister_stream(
        &mut self,
        direction: Direction,
        consumer: &'static dyn StreamConsumer,
    ) -> Result<()> {
        if let Some(cfg) = self.config {
            if self.is_active(direction) {
                self.stop_hw(&cfg, direction);
            }
        }
        self.streams[direction.index()].unregister_stream(consumer)
    }

    fn start_dma(&mut self, direction: Direction) -> Result<()> {
        let cfg = self.configured()?;
        let i = direction.index();
        if self.is_active(direction) {
            return self.streams[i].start();
        }

        self.streams[i].start()?;
        if let Err(e) = self.start_hw(&cfg, direction) {
            if let Err(rollback) = self.streams[i].stop() {
                warn!("{:?}: engine rollback failed: {}", direction, rollback);
            }
            return Err(e);
        }
        Ok(())
    }

    fn stop_dma(&mut self, direction: Direction) -> Result<()> {
        let cfg = self.configured()?;
        if self.is_active(direction) {
            self.stop_hw(&cfg, direction);
        }
        self.streams[direction.index()].stop()
    }

    fn pause_dma(&mut self, direction: Direction) -> Result<()> {
        let cfg = self.configured()?;
        if self.is_active(direction) {
            self.stop_hw(&cfg, direction);
        }
        self.streams[direction.index()].pause()
    }
}

impl<R, P, D> Diagnostics for Sai<R, P, D>
where
    R: RegisterAccess,
    P: DmaProvider,
    D: DelayNs,
{
    fn dump_registers(&self) -> RegisterDump {
        let mut dump = RegisterDump::new();
        let Some(cfg) = self.config else {
            return dump;
        };
        let layout = &cfg.layout;
        if layout.version >= 3 {
            dump.push("VERID", VERID, self.regs.read32(VERID));
            dump.push("PARAM", PARAM, self.regs.read32(PARAM));
        }
        const NAMES: [[&str; 7]; 2] = [
            ["TCSR", "TCR1", "TCR2", "TCR3", "TCR4", "TCR5", "TMR"],
            ["RCSR", "RCR1", "RCR2", "RCR3", "RCR4", "RCR5", "RMR"],
        ];
        const OFFSETS: [u32; 7] = [CSR, CR1, CR2, CR3, CR4, CR5, MASK];
        for direction in Direction::ALL {
            for (name, offset) in NAMES[direction.index()].into_iter().zip(OFFSETS) {
                let offset = layout.reg(direction, offset);
                dump.push(name, offset, self.regs.read32(offset));
            }
        }
        dump
    }
}
