use core::ptr::NonNull;

use crate::constants::PAGE_SIZE;
use crate::dma::CachePolicy;
use crate::interface::Direction;

/// Round `value` up to the next multiple of `align` (a power of two).
///
/// Returns `None` on overflow.
pub const fn align_up(value: u32, align: u32) -> Option<u32> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Memory handed out by a [`DmaAdapter`](crate::dma::DmaAdapter).
#[derive(Debug)]
pub struct DmaBuffer {
    cpu: NonNull<u8>,
    phys: u64,
    len: u32,
    cache: CachePolicy,
}

impl DmaBuffer {
    /// Describe an allocation.
    ///
    /// `cpu` and `phys` are the CPU and bus addresses of the same `len`
    /// bytes.
    pub const fn new(cpu: NonNull<u8>, phys: u64, len: u32, cache: CachePolicy) -> Self {
        Self {
            cpu,
            phys,
            len,
            cache,
        }
    }

    /// CPU address of the first byte.
    pub const fn cpu_address(&self) -> NonNull<u8> {
        self.cpu
    }

    /// Bus address of the first byte.
    pub const fn physical_address(&self) -> u64 {
        self.phys
    }

    /// Length in bytes.
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Whether the buffer is empty.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cache policy of the allocation.
    pub const fn cache_policy(&self) -> CachePolicy {
        self.cache
    }
}

/// Page-fragment descriptor of a physically contiguous buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PageFragments {
    /// Bus address of the first byte.
    pub start: u64,
    /// Offset of the first byte inside its page.
    pub first_page_offset: u32,
    /// Length in bytes.
    pub len: u32,
    /// Number of pages the buffer touches.
    pub pages: u32,
}

impl PageFragments {
    /// Describe `len` bytes starting at bus address `start`.
    pub const fn describe(start: u64, len: u32) -> Self {
        let first_page_offset = (start % PAGE_SIZE as u64) as u32;
        let pages = if len == 0 {
            0
        } else {
            ((first_page_offset as u64 + len as u64).div_ceil(PAGE_SIZE as u64)) as u32
        };
        Self {
            start,
            first_page_offset,
            len,
            pages,
        }
    }
}

/// Ownership token of a stream's DMA buffer.
///
/// Returned by `allocate_buffer` and consumed by `free_buffer`. It is not
/// `Clone`, so a buffer can be freed at most once.
#[derive(Debug)]
#[must_use = "the buffer leaks unless the handle is passed to free_buffer"]
pub struct BufferHandle {
    pub(crate) id: u32,
    pub(crate) direction: Direction,
    cpu: NonNull<u8>,
    phys: u64,
    len: u32,
    cache: CachePolicy,
}

impl BufferHandle {
    pub(crate) fn new(id: u32, direction: Direction, buffer: &DmaBuffer) -> Self {
        Self {
            id,
            direction,
            cpu: buffer.cpu_address(),
            phys: buffer.physical_address(),
            len: buffer.len(),
            cache: buffer.cache_policy(),
        }
    }

    /// Direction the buffer was allocated for.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// CPU pointer to the first sample byte.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.cpu.as_ptr()
    }

    /// Bus address of the buffer.
    pub fn physical_address(&self) -> u64 {
        self.phys
    }

    /// Real size in bytes, after alignment rounding.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cache policy the engine chose.
    pub fn cache_policy(&self) -> CachePolicy {
        self.cache
    }
}
