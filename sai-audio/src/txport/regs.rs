//! Transmit-only port register offsets and bitfield definitions.

#![allow(dead_code)]

/// Control register.
/// - Bit 4 — MSB (most significant bit first)
/// - Bit 3 — MASTER (drive bit clock and frame sync)
/// - Bit 2 — FIFO_RST (FIFO reset, self-clearing)
/// - Bit 1 — DMAEN (DMA request enable)
/// - Bit 0 — EN (port enable)
pub const CTRL: u32 = 0x00;

pub const CTRL_EN: u32 = 1 << 0;
pub const CTRL_DMAEN: u32 = 1 << 1;
pub const CTRL_FIFO_RST: u32 = 1 << 2;
pub const CTRL_MASTER: u32 = 1 << 3;
pub const CTRL_MSB: u32 = 1 << 4;

/// Clock divider register.
/// - Bits 7:0 — DIV (bit clock divider)
pub const CLKDIV: u32 = 0x04;

pub const CLKDIV_SHIFT: u32 = 0;
pub const CLKDIV_WIDTH: u32 = 8;

/// Frame format register.
/// - Bits 28:24 — SYWD (sync width − 1)
/// - Bit  18    — FSE (frame sync early)
/// - Bit  17    — FSP (frame sync active low)
/// - Bit  16    — BCP (bit clock active low)
/// - Bits 12:8  — SLOTS (slots per frame − 1)
/// - Bits  4:0  — WORD (bits per slot − 1)
pub const FORMAT: u32 = 0x08;

pub const FORMAT_SYWD_SHIFT: u32 = 24;
pub const FORMAT_FSE: u32 = 1 << 18;
pub const FORMAT_FSP: u32 = 1 << 17;
pub const FORMAT_BCP: u32 = 1 << 16;
pub const FORMAT_SLOTS_SHIFT: u32 = 8;
pub const FORMAT_WORD_SHIFT: u32 = 0;
pub const FORMAT_FIELD_WIDTH: u32 = 5;

/// FIFO watermark register, in bytes.
/// - Bits 31:16 — HIGH (stop requesting above)
/// - Bits 15:0  — LOW (request below)
pub const WMARK: u32 = 0x0C;

pub const WMARK_HIGH_SHIFT: u32 = 16;
pub const WMARK_LOW_SHIFT: u32 = 0;
pub const WMARK_WIDTH: u32 = 16;

/// Interrupt mask register; set bits mask a FIFO-state interrupt.
pub const INTMASK: u32 = 0x10;

/// Status register.
/// - Bit 0 — RDY (FIFO out of reset)
pub const STATUS: u32 = 0x14;

pub const STATUS_RDY: u32 = 1 << 0;

/// Transmit data register; the DMA target.
pub const DATA: u32 = 0x20;

/// FIFO size in bytes (read-only, version 2).
pub const PARAM: u32 = 0x24;
