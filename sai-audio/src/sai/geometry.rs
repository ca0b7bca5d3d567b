//! Register layout and FIFO geometry per hardware version.
//!
//! | Version | Transmit block | Geometry source |
//! |---------|----------------|-----------------|
//! | 1 | `0x00` | fixed constants |
//! | 2 | `0x00` | sizing probe on the transmit block |
//! | 3 | `0x08` | `PARAM` capability register |

use embedded_hal::delay::DelayNs;

use super::regs::*;
use crate::constants::{FIXED_DATA_LINES, FIXED_FIFO_WORDS, FIXED_FRAME_SLOTS};
use crate::interface::Direction;
use crate::registers::{field_mask, get_field, poll_until, RegisterAccess};
use crate::{Error, Result};

/// How a hardware version reports its geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Discovery {
    /// Nothing to read; use the fixed constants.
    Fixed,
    /// Write maximum values to the sizing fields and read back what stuck.
    Probed,
    /// Read the `PARAM` capability register.
    Parameterized,
}

/// Register layout of one hardware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    pub version: u32,
    pub discovery: Discovery,
    tx_block: u32,
}

impl Layout {
    /// Layout of `version`; unknown versions are [`Error::ConfigurationInvalid`].
    pub fn for_version(version: u32) -> Result<Self> {
        let (discovery, tx_block) = match version {
            1 => (Discovery::Fixed, 0),
            2 => (Discovery::Probed, 0),
            3 => (Discovery::Parameterized, TX_BLOCK_OFFSET_V3),
            _ => {
                warn!("unsupported interface version {}", version);
                return Err(Error::ConfigurationInvalid);
            }
        };
        Ok(Self {
            version,
            discovery,
            tx_block,
        })
    }

    /// Offset of `direction`'s register block.
    pub const fn block(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Transmit => self.tx_block,
            Direction::Receive => self.tx_block + RX_BLOCK_OFFSET,
        }
    }

    /// Offset of register `offset` in `direction`'s block.
    pub const fn reg(&self, direction: Direction, offset: u32) -> u32 {
        self.block(direction) + offset
    }
}

/// FIFO depth, data lines and native frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FifoGeometry {
    /// FIFO depth in words.
    pub fifo_words: u32,
    /// Data lines per direction.
    pub data_lines: u32,
    /// Maximum frame size in time-slots.
    pub frame_slots: u32,
}

impl FifoGeometry {
    /// Watermark programmed for both directions: half the FIFO.
    pub const fn watermark(&self) -> u32 {
        self.fifo_words / 2
    }

    /// Determine the geometry the way `layout`'s version allows.
    ///
    /// Must run while both directions are idle: the probe rewrites the
    /// transmit sizing registers (and restores them afterwards).
    pub fn detect<R, D>(regs: &mut R, delay: &mut D, layout: &Layout) -> Result<Self>
    where
        R: RegisterAccess,
        D: DelayNs,
    {
        let geometry = match layout.discovery {
            Discovery::Fixed => Self {
                fifo_words: FIXED_FIFO_WORDS,
                data_lines: FIXED_DATA_LINES,
                frame_slots: FIXED_FRAME_SLOTS,
            },
            Discovery::Probed => Self::probe(regs, layout),
            Discovery::Parameterized => Self::from_param(regs, delay)?,
        };
        if geometry.fifo_words == 0 || geometry.data_lines == 0 {
            warn!("interface reports an empty FIFO");
            return Err(Error::ConfigurationInvalid);
        }
        info!(
            "SAI v{}: {} word FIFO, {} data lines, {} slot frames",
            layout.version,
            geometry.fifo_words,
            geometry.data_lines,
            geometry.frame_slots
        );
        Ok(geometry)
    }

    fn probe<R: RegisterAccess>(regs: &mut R, layout: &Layout) -> Self {
        let cr1 = layout.reg(Direction::Transmit, CR1);
        let cr3 = layout.reg(Direction::Transmit, CR3);
        let cr4 = layout.reg(Direction::Transmit, CR4);
        let saved = [regs.read32(cr1), regs.read32(cr3), regs.read32(cr4)];

        regs.write32(cr1, field_mask(CR1_WATERMARK_SHIFT, CR1_WATERMARK_WIDTH));
        let watermark = get_field(regs.read32(cr1), CR1_WATERMARK_SHIFT, CR1_WATERMARK_WIDTH);
        regs.write32(cr3, field_mask(CR3_CE_SHIFT, CR3_CE_WIDTH));
        let lines = get_field(regs.read32(cr3), CR3_CE_SHIFT, CR3_CE_WIDTH).count_ones();
        regs.write32(cr4, field_mask(CR4_FRSZ_SHIFT, CR4_FRSZ_WIDTH));
        let frame = get_field(regs.read32(cr4), CR4_FRSZ_SHIFT, CR4_FRSZ_WIDTH);

        regs.write32(cr1, saved[0]);
        regs.write32(cr3, saved[1]);
        regs.write32(cr4, saved[2]);

        Self {
            // The largest programmable watermark is one short of the depth.
            fifo_words: if watermark == 0 { 0 } else { watermark + 1 },
            data_lines: lines,
            frame_slots: frame + 1,
        }
    }

    fn from_param<R: RegisterAccess, D: DelayNs>(regs: &mut R, delay: &mut D) -> Result<Self> {
        poll_until(delay, || regs.read32(PARAM) != 0).inspect_err(|_| {
            error!("PARAM register never populated");
        })?;
        let param = regs.read32(PARAM);
        Ok(Self {
            fifo_words: 1 << get_field(param, PARAM_WPF_SHIFT, PARAM_FIELD_WIDTH),
            data_lines: get_field(param, PARAM_DLN_SHIFT, PARAM_FIELD_WIDTH),
            frame_slots: 1 << get_field(param, PARAM_SPF_SHIFT, PARAM_FIELD_WIDTH),
        })
    }
}
