//! Clock and frame configuration.
//!
//! [`ClockConfig`] captures everything the platform says about how the
//! interface is clocked and framed. It is built once, at initialization,
//! from a [`PropertySource`]. Fields the platform leaves unset are filled
//! from the protocol's defaults; explicit values always win.
//!
//! ## Bit-clock divider
//!
//! ```text
//!                       mclk
//! divider = ⌊ ───────────────────────── / 2 ⌋ − 1
//!             rate × frame_bits × slots
//! ```
//!
//! The bit clock is `mclk / ((divider + 1) × 2)`. When one direction
//! follows the other's clock, both use the clock source's master clock as
//! the dividend.

use crate::constants::MAX_TIMING_ENTRIES;
use crate::interface::Direction;
use crate::properties::{PropertyKey, PropertySource};
use crate::{Error, Result};

/// Largest value of the 8-bit divider field.
pub const MAX_DIVIDER: u32 = 0xFF;

/// Who generates bit clock and frame sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// The interface drives bit clock and frame sync.
    Master,
    /// An external device drives bit clock and frame sync.
    Slave,
}

/// Cross-direction clock dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncMode {
    /// Each direction uses its own clocks.
    Independent = 0,
    /// The receiver runs from the transmitter's clocks.
    RxFollowsTx = 1,
    /// The transmitter runs from the receiver's clocks.
    TxFollowsRx = 2,
}

impl SyncMode {
    /// Decode the raw property value.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(SyncMode::Independent),
            1 => Some(SyncMode::RxFollowsTx),
            2 => Some(SyncMode::TxFollowsRx),
            _ => None,
        }
    }

    /// The direction whose clocks drive `direction`.
    pub const fn clock_source(self, direction: Direction) -> Direction {
        match self {
            SyncMode::Independent => direction,
            SyncMode::RxFollowsTx => Direction::Transmit,
            SyncMode::TxFollowsRx => Direction::Receive,
        }
    }

    /// The direction that borrows the other's clocks, if any.
    pub const fn follower(self) -> Option<Direction> {
        match self {
            SyncMode::Independent => None,
            SyncMode::RxFollowsTx => Some(Direction::Receive),
            SyncMode::TxFollowsRx => Some(Direction::Transmit),
        }
    }

    /// Whether `direction` runs from `other`'s clocks.
    pub fn depends_on(self, direction: Direction, other: Direction) -> bool {
        direction != other && self.follower() == Some(direction)
    }
}

/// Serial audio protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    /// Philips I2S: frame sync one bit early, low for the left slot.
    I2s = 0,
    /// Left justified: frame sync aligned with the first bit, high for the left slot.
    LeftJustified = 1,
    /// DSP / PCM short frame: one-bit frame sync pulse ahead of slot 0.
    Dsp = 2,
}

impl Protocol {
    /// Decode the raw property value.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Protocol::I2s),
            1 => Some(Protocol::LeftJustified),
            2 => Some(Protocol::Dsp),
            _ => None,
        }
    }

    /// Frame format this protocol implies for `frame_size_bits`-bit slots.
    pub const fn default_format(self, frame_size_bits: u32) -> FrameFormat {
        match self {
            Protocol::I2s => FrameFormat {
                bit_clock_polarity: Polarity::ActiveLow,
                frame_sync_polarity: Polarity::ActiveLow,
                frame_sync_width: frame_size_bits,
                frame_sync_early: true,
                msb_first: true,
            },
            Protocol::LeftJustified => FrameFormat {
                bit_clock_polarity: Polarity::ActiveLow,
                frame_sync_polarity: Polarity::ActiveHigh,
                frame_sync_width: frame_size_bits,
                frame_sync_early: false,
                msb_first: true,
            },
            Protocol::Dsp => FrameFormat {
                bit_clock_polarity: Polarity::ActiveLow,
                frame_sync_polarity: Polarity::ActiveHigh,
                frame_sync_width: 1,
                frame_sync_early: true,
                msb_first: true,
            },
        }
    }
}

/// Signal polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Asserted high / sampled on the rising edge.
    ActiveHigh,
    /// Asserted low / sampled on the falling edge.
    ActiveLow,
}

impl Polarity {
    const fn from_flag(active_low: bool) -> Self {
        if active_low {
            Polarity::ActiveLow
        } else {
            Polarity::ActiveHigh
        }
    }
}

/// Frame-level signalling of one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameFormat {
    /// Bit-clock polarity.
    pub bit_clock_polarity: Polarity,
    /// Frame-sync polarity.
    pub frame_sync_polarity: Polarity,
    /// Frame-sync width in bit clocks.
    pub frame_sync_width: u32,
    /// Frame sync asserts one bit before the first slot.
    pub frame_sync_early: bool,
    /// Most significant bit first.
    pub msb_first: bool,
}

/// Per-direction clocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DirectionClock {
    /// Master-clock select written to the interface.
    pub mclk_select: u32,
    /// Master-clock frequency in Hz.
    pub mclk_hz: u32,
    /// Bits per time-slot word.
    pub frame_size_bits: u32,
    /// Masked time-slots (bit n set = slot n idle).
    pub slot_mask: u32,
    /// Frame signalling after protocol defaults and overrides.
    pub format: FrameFormat,
}

impl DirectionClock {
    /// Memory container width, in bits, of one slot word.
    pub const fn container_bits(&self) -> u32 {
        match self.frame_size_bits {
            0..=8 => 8,
            9..=16 => 16,
            _ => 32,
        }
    }
}

/// Tuned divider for one sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingEntry {
    /// Sample rate the entry applies to.
    pub sample_rate: u32,
    /// Divider to program instead of the computed one.
    pub divider: u32,
}

/// Where a divider came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DividerSource {
    /// Derived from the divider formula.
    Computed,
    /// Taken from the improved-timing table.
    ImprovedTiming,
}

/// Divider chosen for a direction and sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockPlan {
    /// Value for the divider field.
    pub divider: u32,
    /// Where it came from.
    pub source: DividerSource,
    /// Master clock the divider applies to.
    pub mclk_hz: u32,
    /// Bit clock the interface should produce.
    pub target_bit_clock_hz: u32,
}

impl ClockPlan {
    /// Bit clock the divider actually produces.
    pub fn bit_clock_hz(&self) -> u32 {
        self.mclk_hz / ((self.divider + 1) * 2)
    }

    /// Deviation of the produced bit clock from the target, in ppm.
    pub fn rate_error_ppm(&self) -> f32 {
        if self.target_bit_clock_hz == 0 {
            return 0.0;
        }
        let actual = self.mclk_hz as f32 / ((self.divider + 1) * 2) as f32;
        let target = self.target_bit_clock_hz as f32;
        libm::roundf((actual - target) / target * 1_000_000.0)
    }
}

/// Bit-clock divider for the given clocking, or `None` if the master clock
/// is too slow or an input is zero.
///
/// ```
/// use sai_audio::clock::bit_clock_divider;
///
/// assert_eq!(bit_clock_divider(24_576_000, 48_000, 32, 2), Some(3));
/// ```
pub const fn bit_clock_divider(
    mclk_hz: u32,
    sample_rate: u32,
    frame_size_bits: u32,
    samples_per_frame: u32,
) -> Option<u32> {
    let bit_clock = sample_rate as u64 * frame_size_bits as u64 * samples_per_frame as u64;
    if bit_clock == 0 {
        return None;
    }
    let half = mclk_hz as u64 / bit_clock / 2;
    if half == 0 {
        return None;
    }
    Some((half - 1) as u32)
}

/// Complete clocking description of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockConfig {
    /// Interface hardware/protocol version.
    pub version: u32,
    /// Clock generation mode.
    pub mode: Mode,
    /// Serial protocol.
    pub protocol: Protocol,
    /// Cross-direction clock dependency.
    pub sync_mode: SyncMode,
    /// Time-slots per frame.
    pub samples_per_frame: u32,
    /// Transmit clocking.
    pub tx: DirectionClock,
    /// Receive clocking.
    pub rx: DirectionClock,
    timing: [Option<TimingEntry>; MAX_TIMING_ENTRIES],
}

impl ClockConfig {
    /// Build the configuration from platform properties.
    ///
    /// Missing required properties, unknown protocol or sync mode ids and
    /// out-of-range frame geometry are [`Error::ConfigurationInvalid`].
    pub fn from_properties(properties: &dyn PropertySource) -> Result<Self> {
        Self::build(properties, true)
    }

    /// Like [`from_properties`](Self::from_properties) for hardware that
    /// only transmits. Receive properties are not required; the receive
    /// half mirrors the transmit half.
    pub fn transmit_only(properties: &dyn PropertySource) -> Result<Self> {
        Self::build(properties, false)
    }

    fn build(properties: &dyn PropertySource, duplex: bool) -> Result<Self> {
        let version = required(properties, PropertyKey::ProtocolVersion)?;
        let protocol = Protocol::from_raw(required(properties, PropertyKey::Protocol)?)
            .ok_or(Error::ConfigurationInvalid)?;
        let sync_mode = SyncMode::from_raw(required(properties, PropertyKey::SyncMode)?)
            .ok_or(Error::ConfigurationInvalid)?;
        let mode = match properties.get_flag(PropertyKey::Master) {
            Some(false) => Mode::Slave,
            _ => Mode::Master,
        };
        let samples_per_frame = properties.get(PropertyKey::SamplesPerFrame).unwrap_or(2);
        if !(1..=32).contains(&samples_per_frame) {
            warn!("samples per frame {} out of range", samples_per_frame);
            return Err(Error::ConfigurationInvalid);
        }

        let tx = direction_clock(properties, protocol, Direction::Transmit)?;
        let rx = if duplex {
            direction_clock(properties, protocol, Direction::Receive)?
        } else {
            tx
        };

        let mut timing = [None; MAX_TIMING_ENTRIES];
        for (n, slot) in timing.iter_mut().enumerate() {
            let Some(sample_rate) = properties.get(PropertyKey::TimingRate(n as u8)) else {
                break;
            };
            let divider = properties
                .get(PropertyKey::TimingDivider(n as u8))
                .ok_or(Error::ConfigurationInvalid)?;
            if divider > MAX_DIVIDER || sample_rate == 0 {
                return Err(Error::ConfigurationInvalid);
            }
            *slot = Some(TimingEntry {
                sample_rate,
                divider,
            });
        }

        Ok(Self {
            version,
            mode,
            protocol,
            sync_mode,
            samples_per_frame,
            tx,
            rx,
            timing,
        })
    }

    /// Clocking of `direction`.
    pub fn direction(&self, direction: Direction) -> &DirectionClock {
        match direction {
            Direction::Transmit => &self.tx,
            Direction::Receive => &self.rx,
        }
    }

    /// Master clock that divides down to `direction`'s bit clock.
    ///
    /// A follower shares the dividend of its clock source.
    pub fn divider_dividend(&self, direction: Direction) -> u32 {
        self.direction(self.sync_mode.clock_source(direction)).mclk_hz
    }

    /// Tuned divider for `sample_rate`, if the platform supplied one.
    pub fn improved_divider(&self, sample_rate: u32) -> Option<u32> {
        self.timing
            .iter()
            .flatten()
            .find(|e| e.sample_rate == sample_rate)
            .map(|e| e.divider)
    }

    /// Choose the divider for `direction` at `sample_rate`.
    ///
    /// An improved-timing entry wins; otherwise the computed divider is
    /// used. Dividers outside the register field are
    /// [`Error::ConfigurationInvalid`].
    pub fn clock_plan(&self, direction: Direction, sample_rate: u32) -> Result<ClockPlan> {
        let source = self.direction(self.sync_mode.clock_source(direction));
        let mclk_hz = source.mclk_hz;
        let target_bit_clock_hz = sample_rate
            .checked_mul(source.frame_size_bits)
            .and_then(|v| v.checked_mul(self.samples_per_frame))
            .ok_or(Error::ConfigurationInvalid)?;

        if let Some(divider) = self.improved_divider(sample_rate) {
            return Ok(ClockPlan {
                divider,
                source: DividerSource::ImprovedTiming,
                mclk_hz,
                target_bit_clock_hz,
            });
        }

        debug!(
            "no improved timing for {} Hz, computing divider from {} Hz",
            sample_rate,
            mclk_hz
        );
        let divider = bit_clock_divider(
            mclk_hz,
            sample_rate,
            source.frame_size_bits,
            self.samples_per_frame,
        )
        .filter(|&d| d <= MAX_DIVIDER)
        .ok_or(Error::ConfigurationInvalid)?;

        Ok(ClockPlan {
            divider,
            source: DividerSource::Computed,
            mclk_hz,
            target_bit_clock_hz,
        })
    }
}

fn required(properties: &dyn PropertySource, key: PropertyKey) -> Result<u32> {
    properties.get(key).ok_or_else(|| {
        warn!("missing required property {}", key.name());
        Error::ConfigurationInvalid
    })
}

fn direction_clock(
    properties: &dyn PropertySource,
    protocol: Protocol,
    direction: Direction,
) -> Result<DirectionClock> {
    let mclk_select = required(properties, PropertyKey::ClockSource(direction))?;
    let mclk_hz = required(properties, PropertyKey::ClockFrequency(direction))?;
    let frame_size_bits = required(properties, PropertyKey::FrameSize(direction))?;
    let slot_mask = required(properties, PropertyKey::SlotMask(direction))?;
    if !(8..=32).contains(&frame_size_bits) || mclk_select > 3 {
        return Err(Error::ConfigurationInvalid);
    }

    let mut format = protocol.default_format(frame_size_bits);
    if let Some(low) = properties.get_flag(PropertyKey::BitClockPolarity(direction)) {
        format.bit_clock_polarity = Polarity::from_flag(low);
    }
    if let Some(low) = properties.get_flag(PropertyKey::FrameSyncPolarity(direction)) {
        format.frame_sync_polarity = Polarity::from_flag(low);
    }
    if let Some(width) = properties.get(PropertyKey::FrameSyncWidth(direction)) {
        format.frame_sync_width = width;
    }
    if let Some(early) = properties.get_flag(PropertyKey::FrameSyncEarly(direction)) {
        format.frame_sync_early = early;
    }
    if let Some(msb) = properties.get_flag(PropertyKey::MsbFirst(direction)) {
        format.msb_first = msb;
    }
    if !(1..=32).contains(&format.frame_sync_width) {
        return Err(Error::ConfigurationInvalid);
    }

    Ok(DirectionClock {
        mclk_select,
        mclk_hz,
        frame_size_bits,
        slot_mask,
        format,
    })
}
