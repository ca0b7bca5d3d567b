//! Register access layer.
//!
//! Controllers never touch memory directly. They go through
//! [`RegisterAccess`], which reads and writes 32-bit registers at
//! `base + offset`. [`Mmio`] is the volatile implementation for real
//! hardware; tests substitute a register file.
//!
//! Offsets are instance and version specific. The layer adds no logic of
//! its own and has no error path: whoever constructs it guarantees that
//! the mapping stays valid for the component's lifetime.

use core::ptr::NonNull;

use embedded_hal::delay::DelayNs;

use crate::constants::{POLL_INTERVAL_US, POLL_RETRIES};
use crate::{Error, Result};

/// 32-bit register access relative to a peripheral base address.
pub trait RegisterAccess {
    /// Read the register at `base + offset`.
    fn read32(&self, offset: u32) -> u32;

    /// Write `value` to the register at `base + offset`.
    fn write32(&mut self, offset: u32, value: u32);

    /// Read-modify-write: `new = (current & !clear) | set`.
    fn modify32(&mut self, offset: u32, clear: u32, set: u32) -> u32 {
        let value = (self.read32(offset) & !clear) | set;
        self.write32(offset, value);
        value
    }
}

/// Volatile memory-mapped register access.
pub struct Mmio {
    base: NonNull<u32>,
}

// Safety: the mapping is a fixed peripheral address; moving the handle
// between contexts doesn't change what it points to.
unsafe impl Send for Mmio {}

impl Mmio {
    /// Wrap the peripheral register block that starts at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a mapped, 4-byte aligned register block that
    /// stays valid for the lifetime of this object, and every offset the
    /// driver uses must fall inside that block. Only one `Mmio` may exist
    /// per block.
    pub const unsafe fn new(base: NonNull<u32>) -> Self {
        Self { base }
    }

    fn register(&self, offset: u32) -> *mut u32 {
        debug_assert!(offset % 4 == 0, "unaligned register offset {offset:#x}");
        // Safety: offset is inside the block per `new`'s contract.
        unsafe { self.base.as_ptr().byte_add(offset as usize) }
    }
}

impl RegisterAccess for Mmio {
    fn read32(&self, offset: u32) -> u32 {
        // Safety: see `new`.
        unsafe { core::ptr::read_volatile(self.register(offset)) }
    }

    fn write32(&mut self, offset: u32, value: u32) {
        // Safety: see `new`.
        unsafe { core::ptr::write_volatile(self.register(offset), value) }
    }
}

/// Busy-wait until `ready` returns `true`.
///
/// Checks at most [`POLL_RETRIES`] times, [`POLL_INTERVAL_US`] apart.
/// Returns [`Error::HardwareNotReady`] if the condition never holds; the
/// caller decides whether that is fatal.
pub fn poll_until<D, F>(delay: &mut D, mut ready: F) -> Result<()>
where
    D: DelayNs,
    F: FnMut() -> bool,
{
    for _ in 0..POLL_RETRIES {
        if ready() {
            return Ok(());
        }
        delay.delay_us(POLL_INTERVAL_US);
    }
    Err(Error::HardwareNotReady)
}

/// Mask covering a `width`-bit field at `shift`.
pub(crate) const fn field_mask(shift: u32, width: u32) -> u32 {
    (((1u64 << width) - 1) as u32) << shift
}

/// Place `value` in the `width`-bit field at `shift`, truncating.
pub(crate) const fn field(value: u32, shift: u32, width: u32) -> u32 {
    (value << shift) & field_mask(shift, width)
}

/// Extract the `width`-bit field at `shift`.
pub(crate) const fn get_field(register: u32, shift: u32, width: u32) -> u32 {
    (register & field_mask(shift, width)) >> shift
}
