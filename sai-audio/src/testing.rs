//! Test doubles shared by the unit and integration tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Mutex;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::dma::{
    AdapterRequest, CachePolicy, ChannelProperty, DmaAdapter, DmaBuffer, DmaError, DmaProvider,
    PageFragments, PriorityGuard, StreamConsumer, StreamEndpoint, TransferInfo, TransferStatus,
};
use crate::interface::Direction;
use crate::registers::RegisterAccess;

/// Move `value` into a `'static`.
pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

// ── Delay ──────────────────────────────────────────────────────────

/// Delay that returns immediately.
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

// ── Register file ──────────────────────────────────────────────────

#[derive(Default)]
struct RegisterFile {
    values: BTreeMap<u32, u32>,
    writable: BTreeMap<u32, u32>,
    write_one_to_clear: BTreeMap<u32, u32>,
    self_clearing: BTreeMap<u32, u32>,
    stuck_low: BTreeMap<u32, u32>,
    stuck_high: BTreeMap<u32, u32>,
    writes: Vec<(u32, u32)>,
}

/// Register file with per-offset write masks and a write log.
///
/// Clones share the same file, so a test keeps one handle while the
/// driver owns the other.
#[derive(Clone, Default)]
pub struct MockRegisters {
    file: Rc<RefCell<RegisterFile>>,
}

impl MockRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a register without logging a write.
    pub fn set(&self, offset: u32, value: u32) {
        self.file.borrow_mut().values.insert(offset, value);
    }

    /// Raw stored value, ignoring stuck bits.
    pub fn get(&self, offset: u32) -> u32 {
        self.file.borrow().values.get(&offset).copied().unwrap_or(0)
    }

    /// Only bits in `mask` store written values (default: all bits).
    pub fn set_writable(&self, offset: u32, mask: u32) {
        self.file.borrow_mut().writable.insert(offset, mask);
    }

    /// Bits in `mask` are cleared by writing one.
    pub fn set_write_one_to_clear(&self, offset: u32, mask: u32) {
        self.file.borrow_mut().write_one_to_clear.insert(offset, mask);
    }

    /// Bits in `mask` read back as zero right after they are written.
    pub fn set_self_clearing(&self, offset: u32, mask: u32) {
        self.file.borrow_mut().self_clearing.insert(offset, mask);
    }

    /// Bits in `mask` always read as zero.
    pub fn stick_low(&self, offset: u32, mask: u32) {
        self.file.borrow_mut().stuck_low.insert(offset, mask);
    }

    /// Bits in `mask` always read as one.
    pub fn stick_high(&self, offset: u32, mask: u32) {
        self.file.borrow_mut().stuck_high.insert(offset, mask);
    }

    /// Release stuck bits at `offset`.
    pub fn unstick(&self, offset: u32) {
        let mut file = self.file.borrow_mut();
        file.stuck_low.remove(&offset);
        file.stuck_high.remove(&offset);
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.file.borrow().writes.clone()
    }

    /// Values written to `offset`, in order.
    pub fn writes_to(&self, offset: u32) -> Vec<u32> {
        self.file
            .borrow()
            .writes
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|&(_, v)| v)
            .collect()
    }

    pub fn clear_log(&self) {
        self.file.borrow_mut().writes.clear();
    }
}

impl RegisterAccess for MockRegisters {
    fn read32(&self, offset: u32) -> u32 {
        let file = self.file.borrow();
        let value = file.values.get(&offset).copied().unwrap_or(0);
        let high = file.stuck_high.get(&offset).copied().unwrap_or(0);
        let low = file.stuck_low.get(&offset).copied().unwrap_or(0);
        (value | high) & !low
    }

    fn write32(&mut self, offset: u32, value: u32) {
        let mut file = self.file.borrow_mut();
        file.writes.push((offset, value));
        let old = file.values.get(&offset).copied().unwrap_or(0);
        let writable = file.writable.get(&offset).copied().unwrap_or(u32::MAX);
        let w1c = file.write_one_to_clear.get(&offset).copied().unwrap_or(0);
        let self_clearing = file.self_clearing.get(&offset).copied().unwrap_or(0);

        let stored = writable & !w1c;
        let mut new = (old & !stored) | (value & stored);
        new = (new & !w1c) | (old & w1c & !value);
        new &= !self_clearing;
        file.values.insert(offset, new);
    }
}

// ── DMA provider ───────────────────────────────────────────────────

/// One call into the fake DMA provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmaEvent {
    AcquireAdapter { width_bits: u32, request_line: u32 },
    ReleaseAdapter { width_bits: u32 },
    AllocateBuffer { size: u32 },
    FreeBuffer { size: u32 },
    AllocateChannel { map_registers: u32, elevated: bool },
    SetProperty(ChannelProperty),
    InitTransferContext,
    MapTransfer { len: u32, direction: Direction },
    CancelTransfer,
    FlushBuffers,
    FreeChannel,
}

struct FakeDmaState {
    events: Vec<DmaEvent>,
    requests: Vec<AdapterRequest>,
    adapters_available: u32,
    live_adapters: u32,
    live_buffers: u32,
    fail_allocation: bool,
    misalign: bool,
    reject_properties: bool,
    max_map_registers: u32,
    map_limit: Option<u32>,
    cancel_confirms_after: u32,
    cancel_attempts: u32,
    endpoints: [Option<&'static StreamEndpoint>; 2],
}

/// DMA provider double recording every call in order.
#[derive(Clone)]
pub struct FakeDma {
    state: Rc<RefCell<FakeDmaState>>,
}

impl FakeDma {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(FakeDmaState {
                events: Vec::new(),
                requests: Vec::new(),
                adapters_available: 4,
                live_adapters: 0,
                live_buffers: 0,
                fail_allocation: false,
                misalign: false,
                reject_properties: false,
                max_map_registers: 16,
                map_limit: None,
                cancel_confirms_after: 1,
                cancel_attempts: 0,
                endpoints: [None, None],
            })),
        }
    }

    pub fn events(&self) -> Vec<DmaEvent> {
        self.state.borrow().events.clone()
    }

    pub fn count(&self, f: impl Fn(&DmaEvent) -> bool) -> usize {
        self.state.borrow().events.iter().filter(|e| f(e)).count()
    }

    pub fn requests(&self) -> Vec<AdapterRequest> {
        self.state.borrow().requests.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn live_adapters(&self) -> u32 {
        self.state.borrow().live_adapters
    }

    pub fn live_buffers(&self) -> u32 {
        self.state.borrow().live_buffers
    }

    pub fn set_adapters_available(&self, n: u32) {
        self.state.borrow_mut().adapters_available = n;
    }

    pub fn set_fail_allocation(&self, fail: bool) {
        self.state.borrow_mut().fail_allocation = fail;
    }

    pub fn set_misalign(&self, misalign: bool) {
        self.state.borrow_mut().misalign = misalign;
    }

    pub fn set_reject_properties(&self, reject: bool) {
        self.state.borrow_mut().reject_properties = reject;
    }

    pub fn set_max_map_registers(&self, n: u32) {
        self.state.borrow_mut().max_map_registers = n;
    }

    pub fn set_map_limit(&self, limit: Option<u32>) {
        self.state.borrow_mut().map_limit = limit;
    }

    /// Cancellation is confirmed on the `n`th attempt.
    pub fn set_cancel_confirms_after(&self, n: u32) {
        let mut state = self.state.borrow_mut();
        state.cancel_confirms_after = n;
        state.cancel_attempts = 0;
    }

    /// Deliver one completion to the endpoint mapped for `direction`.
    pub fn complete(&self, direction: Direction, status: TransferStatus) {
        let endpoint = self.state.borrow().endpoints[direction.index()];
        if let Some(endpoint) = endpoint {
            endpoint.on_transfer_complete(status);
        }
    }

    fn log(&self, event: DmaEvent) {
        self.state.borrow_mut().events.push(event);
    }
}

impl DmaProvider for FakeDma {
    type Adapter = FakeAdapter;

    fn acquire_adapter(&mut self, request: &AdapterRequest) -> Option<FakeAdapter> {
        {
            let mut state = self.state.borrow_mut();
            if state.adapters_available == 0 {
                return None;
            }
            state.adapters_available -= 1;
            state.live_adapters += 1;
            state.requests.push(*request);
        }
        self.log(DmaEvent::AcquireAdapter {
            width_bits: request.width_bits,
            request_line: request.request_line,
        });
        Some(FakeAdapter {
            dma: self.clone(),
            width_bits: request.width_bits,
            mapped: None,
        })
    }

    fn release_adapter(&mut self, adapter: FakeAdapter) {
        {
            let mut state = self.state.borrow_mut();
            state.adapters_available += 1;
            state.live_adapters -= 1;
        }
        self.log(DmaEvent::ReleaseAdapter {
            width_bits: adapter.width_bits,
        });
    }
}

/// Adapter handed out by [`FakeDma`].
pub struct FakeAdapter {
    dma: FakeDma,
    width_bits: u32,
    mapped: Option<Direction>,
}

impl DmaAdapter for FakeAdapter {
    fn max_map_registers(&self) -> u32 {
        self.dma.state.borrow().max_map_registers
    }

    fn transfer_info(&self, fragments: &PageFragments) -> TransferInfo {
        TransferInfo {
            map_registers: fragments.pages,
            elements: fragments.pages,
        }
    }

    fn init_transfer_context(&mut self) {
        self.dma.log(DmaEvent::InitTransferContext);
    }

    fn allocate_buffer(&mut self, size: u32, cache: CachePolicy) -> Option<DmaBuffer> {
        let (fail, misalign) = {
            let state = self.dma.state.borrow();
            (state.fail_allocation, state.misalign)
        };
        if fail {
            return None;
        }
        self.dma.log(DmaEvent::AllocateBuffer { size });
        self.dma.state.borrow_mut().live_buffers += 1;

        // Page aligned so the fragment count is deterministic.
        let memory: &'static mut [u8] = Vec::leak(vec![0u8; size as usize + 2 * 4096]);
        let base = memory.as_mut_ptr() as usize;
        let mut offset = base.next_multiple_of(4096) - base;
        if misalign {
            offset += 8;
        }
        let cpu = NonNull::new(memory[offset..].as_mut_ptr())?;
        Some(DmaBuffer::new(cpu, cpu.as_ptr() as u64, size, cache))
    }

    fn free_buffer(&mut self, buffer: DmaBuffer) {
        self.dma.state.borrow_mut().live_buffers -= 1;
        self.dma.log(DmaEvent::FreeBuffer { size: buffer.len() });
    }

    fn allocate_channel(&mut self, map_registers: u32) -> Result<(), DmaError> {
        self.dma.log(DmaEvent::AllocateChannel {
            map_registers,
            elevated: PriorityGuard::is_held(),
        });
        Ok(())
    }

    fn set_channel_property(&mut self, property: ChannelProperty) -> Result<(), DmaError> {
        self.dma.log(DmaEvent::SetProperty(property));
        if self.dma.state.borrow().reject_properties {
            return Err(DmaError::Rejected);
        }
        Ok(())
    }

    fn map_transfer(
        &mut self,
        _buffer: &DmaBuffer,
        len: u32,
        direction: Direction,
        endpoint: &'static StreamEndpoint,
    ) -> Result<u32, DmaError> {
        self.dma.log(DmaEvent::MapTransfer { len, direction });
        let mut state = self.dma.state.borrow_mut();
        let mapped = state.map_limit.map_or(len, |limit| limit.min(len));
        if mapped > 0 {
            state.endpoints[direction.index()] = Some(endpoint);
            self.mapped = Some(direction);
        }
        Ok(mapped)
    }

    fn cancel_transfer(&mut self) -> bool {
        self.dma.log(DmaEvent::CancelTransfer);
        let mut state = self.dma.state.borrow_mut();
        state.cancel_attempts += 1;
        if state.cancel_attempts < state.cancel_confirms_after {
            return false;
        }
        state.cancel_attempts = 0;
        if let Some(direction) = self.mapped.take() {
            state.endpoints[direction.index()] = None;
        }
        true
    }

    fn flush_buffers(&mut self, _buffer: &DmaBuffer, _direction: Direction) {
        self.dma.log(DmaEvent::FlushBuffers);
    }

    fn free_channel(&mut self) {
        self.dma.log(DmaEvent::FreeChannel);
    }
}

// ── Consumer ───────────────────────────────────────────────────────

/// Consumer that records every position it is told about.
pub struct RecordingConsumer {
    notifications: u32,
    bytes_per_frame: u32,
    positions: Mutex<Vec<u64>>,
}

impl RecordingConsumer {
    pub fn new(notifications: u32, bytes_per_frame: u32) -> Self {
        Self {
            notifications,
            bytes_per_frame,
            positions: Mutex::new(Vec::new()),
        }
    }

    pub fn positions(&self) -> Vec<u64> {
        self.positions.lock().unwrap().clone()
    }
}

impl StreamConsumer for RecordingConsumer {
    fn notifications_per_buffer(&self) -> u32 {
        self.notifications
    }

    fn bytes_per_frame(&self) -> u32 {
        self.bytes_per_frame
    }

    fn position_changed(&self, position: u64) {
        self.positions.lock().unwrap().push(position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_registers_honour_masks() {
        let mut regs = MockRegisters::new();
        regs.set_writable(0x04, 0xFF);
        regs.write32(0x04, 0xFFFF);
        assert_eq!(regs.read32(0x04), 0xFF);

        regs.set(0x00, 0b110);
        regs.set_write_one_to_clear(0x00, 0b110);
        regs.write32(0x00, 0b011);
        assert_eq!(regs.read32(0x00), 0b101);

        regs.set_self_clearing(0x08, 1 << 3);
        regs.write32(0x08, 1 << 3 | 1);
        assert_eq!(regs.read32(0x08), 1);

        regs.stick_low(0x08, 1);
        assert_eq!(regs.read32(0x08), 0);
        assert_eq!(regs.writes().len(), 3);
    }
}
