//! Configuration supplier.
//!
//! The platform describes clocking and protocol intent as named integer
//! properties. How those are stored (device tree, ACPI, a const table) is
//! the platform's business; the driver only asks for them by
//! [`PropertyKey`] through [`PropertySource`].
//!
//! ```ignore
//! const BOARD: PropertyTable = PropertyTable::new(&[
//!     (PropertyKey::ProtocolVersion, 3),
//!     (PropertyKey::Protocol, 0),
//!     (PropertyKey::SyncMode, 1),
//!     (PropertyKey::ClockSource(Direction::Transmit), 1),
//!     (PropertyKey::ClockFrequency(Direction::Transmit), 24_576_000),
//!     // ...
//! ]);
//! ```

use crate::interface::Direction;

/// Name of an integer property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PropertyKey {
    /// Hardware/protocol version of the interface block (required).
    ProtocolVersion,
    /// Protocol id, see [`Protocol`](crate::clock::Protocol) (required).
    Protocol,
    /// Sync mode, see [`SyncMode`](crate::clock::SyncMode) (required).
    SyncMode,
    /// `1` = the interface generates the clocks (default), `0` = it follows them.
    Master,
    /// Time-slots per frame (default 2).
    SamplesPerFrame,
    /// Master-clock select for a direction (required).
    ClockSource(Direction),
    /// Master-clock frequency in Hz for a direction (required).
    ClockFrequency(Direction),
    /// Bits per time-slot word for a direction (required).
    FrameSize(Direction),
    /// Time-slot mask for a direction; set bits mask a slot (required).
    SlotMask(Direction),
    /// `1` = bit clock active low. Protocol default when absent.
    BitClockPolarity(Direction),
    /// `1` = frame sync active low. Protocol default when absent.
    FrameSyncPolarity(Direction),
    /// Frame-sync width in bit clocks. Protocol default when absent.
    FrameSyncWidth(Direction),
    /// `1` = frame sync asserts one bit early. Protocol default when absent.
    FrameSyncEarly(Direction),
    /// `1` = most significant bit first. Protocol default when absent.
    MsbFirst(Direction),
    /// Sample rate of improved-timing entry `n`.
    TimingRate(u8),
    /// Tuned divider of improved-timing entry `n`.
    TimingDivider(u8),
}

impl PropertyKey {
    /// Human readable property name, for diagnostics.
    pub const fn name(&self) -> &'static str {
        match self {
            PropertyKey::ProtocolVersion => "ProtocolVersion",
            PropertyKey::Protocol => "Protocol",
            PropertyKey::SyncMode => "SyncMode",
            PropertyKey::Master => "Master",
            PropertyKey::SamplesPerFrame => "SamplesPerFrame",
            PropertyKey::ClockSource(_) => "ClockSource",
            PropertyKey::ClockFrequency(_) => "ClockFrequency",
            PropertyKey::FrameSize(_) => "FrameSize",
            PropertyKey::SlotMask(_) => "SlotMask",
            PropertyKey::BitClockPolarity(_) => "BitClockPolarity",
            PropertyKey::FrameSyncPolarity(_) => "FrameSyncPolarity",
            PropertyKey::FrameSyncWidth(_) => "FrameSyncWidth",
            PropertyKey::FrameSyncEarly(_) => "FrameSyncEarly",
            PropertyKey::MsbFirst(_) => "MsbFirst",
            PropertyKey::TimingRate(_) => "TimingRate",
            PropertyKey::TimingDivider(_) => "TimingDivider",
        }
    }
}

/// Supplies integer properties by name.
pub trait PropertySource {
    /// Look up `key`; `None` if the platform doesn't define it.
    fn get(&self, key: PropertyKey) -> Option<u32>;

    /// Look up a boolean property (`0` = false, anything else = true).
    fn get_flag(&self, key: PropertyKey) -> Option<bool> {
        self.get(key).map(|v| v != 0)
    }
}

/// Property source backed by a static slice of key/value pairs.
///
/// When a key appears more than once, the first entry wins.
#[derive(Debug, Clone, Copy)]
pub struct PropertyTable<'a> {
    entries: &'a [(PropertyKey, u32)],
}

impl<'a> PropertyTable<'a> {
    /// Create a table over `entries`.
    pub const fn new(entries: &'a [(PropertyKey, u32)]) -> Self {
        Self { entries }
    }
}

impl PropertySource for PropertyTable<'_> {
    fn get(&self, key: PropertyKey) -> Option<u32> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|&(_, v)| v)
    }
}
