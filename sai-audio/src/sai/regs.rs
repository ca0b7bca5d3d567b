//! SAI register offsets and bitfield definitions.
//!
//! Offsets are relative to the start of a direction's register block. The
//! transmit block starts at a version-dependent offset (see
//! [`Layout`](super::geometry::Layout)); the receive block is the transmit
//! block plus [`RX_BLOCK_OFFSET`].

// Some fields are defined for completeness (interrupt enables, bit-clock
// bypass) but are not driven.
#![allow(dead_code)]

// ── Version and capability (version 3 only) ───────────────────────────────

/// Version ID register (read-only).
pub const VERID: u32 = 0x00;

/// Parameter register (read-only).
/// - Bits 19:16 — SPF (log2 of the frame size in slots)
/// - Bits 11:8  — WPF (log2 of the FIFO depth in words)
/// - Bits  3:0  — DLN (data lines)
pub const PARAM: u32 = 0x04;

pub const PARAM_SPF_SHIFT: u32 = 16;
pub const PARAM_WPF_SHIFT: u32 = 8;
pub const PARAM_DLN_SHIFT: u32 = 0;
pub const PARAM_FIELD_WIDTH: u32 = 4;

/// Transmit block offset on version 3 hardware.
pub const TX_BLOCK_OFFSET_V3: u32 = 0x08;

/// Receive block relative to the transmit block.
pub const RX_BLOCK_OFFSET: u32 = 0x80;

// ── Control/status ─────────────────────────────────────────────────────────

/// Control/status register.
/// - Bit 31 — TE/RE (logic enable)
/// - Bit 25 — FR (FIFO reset, self-clearing)
/// - Bit 24 — SR (software reset)
/// - Bit 20 — WSF (word start, W1C)
/// - Bit 19 — SEF (sync error, W1C)
/// - Bit 18 — FEF (FIFO error, W1C)
/// - Bits 12:8 — interrupt enables
/// - Bit  1 — FWDE (FIFO warning DMA enable)
/// - Bit  0 — FRDE (FIFO request DMA enable)
pub const CSR: u32 = 0x00;

pub const CSR_TE: u32 = 1 << 31;
pub const CSR_FR: u32 = 1 << 25;
pub const CSR_SR: u32 = 1 << 24;
pub const CSR_WSF: u32 = 1 << 20;
pub const CSR_SEF: u32 = 1 << 19;
pub const CSR_FEF: u32 = 1 << 18;
pub const CSR_INTERRUPTS: u32 = 0x1F << 8;
pub const CSR_FWDE: u32 = 1 << 1;
pub const CSR_FRDE: u32 = 1 << 0;

/// Sticky flags, cleared by writing one.
pub const CSR_W1C: u32 = CSR_WSF | CSR_SEF | CSR_FEF;

// ── Configuration ──────────────────────────────────────────────────────────

/// Configuration 1.
/// - Bits 15:0 — FIFO watermark in words
pub const CR1: u32 = 0x04;

pub const CR1_WATERMARK_SHIFT: u32 = 0;
pub const CR1_WATERMARK_WIDTH: u32 = 16;

/// Configuration 2.
/// - Bits 31:30 — SYNC (0 = asynchronous, 1 = synchronous with the other direction)
/// - Bits 27:26 — MSEL (master clock select)
/// - Bit  25    — BCP (bit clock active low)
/// - Bit  24    — BCD (bit clock generated internally)
/// - Bits  7:0  — DIV (bit clock divider)
pub const CR2: u32 = 0x08;

pub const CR2_SYNC_SHIFT: u32 = 30;
pub const CR2_SYNC_WIDTH: u32 = 2;
pub const CR2_MSEL_SHIFT: u32 = 26;
pub const CR2_MSEL_WIDTH: u32 = 2;
pub const CR2_BCP: u32 = 1 << 25;
pub const CR2_BCD: u32 = 1 << 24;
pub const CR2_DIV_SHIFT: u32 = 0;
pub const CR2_DIV_WIDTH: u32 = 8;

/// Configuration 3.
/// - Bits 23:16 — TCE/RCE (data line enables)
pub const CR3: u32 = 0x0C;

pub const CR3_CE_SHIFT: u32 = 16;
pub const CR3_CE_WIDTH: u32 = 8;

/// Configuration 4.
/// - Bits 20:16 — FRSZ (frame size in slots − 1)
/// - Bits 12:8  — SYWD (sync width in bit clocks − 1)
/// - Bit  4     — MF (MSB first)
/// - Bit  3     — FSE (frame sync early)
/// - Bit  1     — FSP (frame sync active low)
/// - Bit  0     — FSD (frame sync generated internally)
pub const CR4: u32 = 0x10;

pub const CR4_FRSZ_SHIFT: u32 = 16;
pub const CR4_FRSZ_WIDTH: u32 = 5;
pub const CR4_SYWD_SHIFT: u32 = 8;
pub const CR4_SYWD_WIDTH: u32 = 5;
pub const CR4_MF: u32 = 1 << 4;
pub const CR4_FSE: u32 = 1 << 3;
pub const CR4_FSP: u32 = 1 << 1;
pub const CR4_FSD: u32 = 1 << 0;

/// Configuration 5.
/// - Bits 28:24 — WNW (word N width − 1)
/// - Bits 20:16 — W0W (word 0 width − 1)
/// - Bits 12:8  — FBT (first bit shifted)
pub const CR5: u32 = 0x14;

pub const CR5_WNW_SHIFT: u32 = 24;
pub const CR5_W0W_SHIFT: u32 = 16;
pub const CR5_FBT_SHIFT: u32 = 8;
pub const CR5_FIELD_WIDTH: u32 = 5;

// ── Data ───────────────────────────────────────────────────────────────────

/// Data register for data line 0; the DMA target.
pub const DATA: u32 = 0x20;

/// Time-slot mask register; set bits mask a slot.
pub const MASK: u32 = 0x60;
