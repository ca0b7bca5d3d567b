use crate::constants::{BUFFER_ALIGNMENT, CANCEL_RETRIES};
use crate::dma::{
    AdapterRequest, BufferHandle, CachePolicy, ChannelProperty, DmaAdapter, DmaBuffer, DmaError,
    DmaProvider, PageFragments, PriorityGuard, StreamConsumer, StreamEndpoint,
};
use crate::interface::Direction;
use crate::{Error, Result};

/// Lifecycle state of a [`DmaStream`].
///
/// ```text
///                 register            start
/// Unregistered ─────────────▶ Registered ─────────▶ Started ◀──┐
///      ▲                          │                  │  │      │ start
///      │        unregister        │            pause │  │ stop │
///      └──────────────────────────┴──── Stopped ◀────┼──┘      │
///                                         │          ▼         │
///                                         │        Paused ─────┘
///                                         └─ start (re-map) ──▶ Started
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamState {
    /// No consumer; resources may or may not exist.
    Unregistered,
    /// Channel programmed, consumer attached, nothing mapped.
    Registered,
    /// The buffer is mapped and running.
    Started,
    /// The mapping is kept but the caller stopped feeding the hardware.
    Paused,
    /// The mapping was cancelled; the next start re-maps.
    Stopped,
}

struct OwnedBuffer {
    id: u32,
    buffer: DmaBuffer,
    fragments: PageFragments,
}

/// Per-direction DMA engine.
///
/// Owns an adapter from the platform [`DmaProvider`], the circular buffer
/// and the adapter channel. Completions are routed to the `'static`
/// [`StreamEndpoint`] given at construction.
pub struct DmaStream<A: DmaAdapter> {
    direction: Direction,
    endpoint: &'static StreamEndpoint,
    adapter: Option<A>,
    width_bits: u32,
    watermark_samples: u32,
    request_line: u32,
    buffer: Option<OwnedBuffer>,
    next_buffer_id: u32,
    channel_allocated: bool,
    mapped: bool,
    consumer: Option<&'static dyn StreamConsumer>,
    notification_bytes: u32,
    state: StreamState,
}

impl<A: DmaAdapter> DmaStream<A> {
    /// A stream with no resources yet.
    pub const fn new(direction: Direction, endpoint: &'static StreamEndpoint) -> Self {
        Self {
            direction,
            endpoint,
            adapter: None,
            width_bits: 0,
            watermark_samples: 0,
            request_line: 0,
            buffer: None,
            next_buffer_id: 0,
            channel_allocated: false,
            mapped: false,
            consumer: None,
            notification_bytes: 0,
            state: StreamState::Unregistered,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn endpoint(&self) -> &'static StreamEndpoint {
        self.endpoint
    }

    /// Bytes between two completion notifications, once registered.
    pub fn notification_bytes(&self) -> u32 {
        self.notification_bytes
    }

    /// Data width of the current adapter, or `None` before [`init`](Self::init).
    pub fn width_bits(&self) -> Option<u32> {
        self.adapter.as_ref().map(|_| self.width_bits)
    }

    /// Whether a buffer is currently allocated.
    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Acquire the adapter for `request`.
    ///
    /// An adapter of the same data width is kept and only the watermark and
    /// request line are updated. A different width releases the old adapter
    /// first; that is refused while a buffer from it is still allocated.
    pub fn init<P>(
        &mut self,
        provider: &mut P,
        request: AdapterRequest,
        watermark_samples: u32,
    ) -> Result<()>
    where
        P: DmaProvider<Adapter = A>,
    {
        if self.state != StreamState::Unregistered {
            return Err(Error::InvalidState);
        }
        if request.width_bits == 0 || request.width_bits % 8 != 0 || watermark_samples == 0 {
            return Err(Error::InvalidParameter);
        }

        if self.adapter.is_some() && self.width_bits != request.width_bits {
            if self.buffer.is_some() {
                warn!(
                    "{:?}: width change {} -> {} with a buffer outstanding",
                    self.direction,
                    self.width_bits,
                    request.width_bits
                );
                return Err(Error::InvalidState);
            }
            if let Some(old) = self.adapter.take() {
                debug!("{:?}: releasing {}-bit adapter", self.direction, self.width_bits);
                provider.release_adapter(old);
            }
        }

        if self.adapter.is_none() {
            let adapter = provider.acquire_adapter(&request).ok_or_else(|| {
                warn!("{:?}: no DMA adapter available", self.direction);
                Error::ResourceExhausted
            })?;
            debug!(
                "{:?}: acquired {}-bit adapter, request line {}",
                self.direction,
                request.width_bits,
                request.request_line
            );
            self.adapter = Some(adapter);
        }

        self.width_bits = request.width_bits;
        self.watermark_samples = watermark_samples;
        self.request_line = request.request_line;
        Ok(())
    }

    /// Allocate the circular buffer. `size` must already be aligned.
    pub fn allocate_buffer(&mut self, size: u32) -> Result<BufferHandle> {
        if size == 0 || size % BUFFER_ALIGNMENT != 0 {
            return Err(Error::InvalidParameter);
        }
        if self.buffer.is_some() {
            return Err(Error::InvalidState);
        }
        let adapter = self.adapter.as_mut().ok_or(Error::InvalidState)?;

        let buffer = adapter
            .allocate_buffer(size, CachePolicy::NonCached)
            .ok_or(Error::ResourceExhausted)?;
        if buffer.len() < size
            || buffer.physical_address() % u64::from(BUFFER_ALIGNMENT) != 0
            || buffer.cpu_address().as_ptr() as usize % BUFFER_ALIGNMENT as usize != 0
        {
            warn!(
                "{:?}: unusable DMA buffer at {:#x}, freeing",
                self.direction,
                buffer.physical_address()
            );
            adapter.free_buffer(buffer);
            return Err(Error::ResourceExhausted);
        }

        let id = self.next_buffer_id;
        self.next_buffer_id = self.next_buffer_id.wrapping_add(1);
        let fragments = PageFragments::describe(buffer.physical_address(), size);
        let handle = BufferHandle::new(id, self.direction, &buffer);
        self.buffer = Some(OwnedBuffer {
            id,
            buffer,
            fragments,
        });
        Ok(handle)
    }

    /// Free the buffer behind `handle`.
    ///
    /// # Panics
    ///
    /// If `handle` was not issued by this stream, or the stream still has a
    /// consumer registered.
    pub fn free_buffer(&mut self, handle: BufferHandle) {
        assert_eq!(handle.direction, self.direction, "buffer of the other direction");
        assert!(
            self.consumer.is_none(),
            "buffer freed while a stream is registered"
        );
        match self.buffer.take() {
            Some(owned) => {
                assert_eq!(owned.id, handle.id, "buffer handle does not belong to this stream");
                if let Some(adapter) = self.adapter.as_mut() {
                    adapter.free_buffer(owned.buffer);
                }
            }
            // Released together with the stream already.
            None => assert!(
                handle.id < self.next_buffer_id,
                "buffer handle does not belong to this stream"
            ),
        }
    }

    /// Attach `consumer` and program the channel for its notification rate.
    pub fn register_stream(&mut self, consumer: &'static dyn StreamConsumer) -> Result<()> {
        if self.state != StreamState::Unregistered {
            return Err(Error::InvalidState);
        }
        let (Some(adapter), Some(owned)) = (self.adapter.as_mut(), self.buffer.as_ref()) else {
            return Err(Error::InvalidState);
        };

        let notifications = consumer.notifications_per_buffer();
        let bytes_per_frame = consumer.bytes_per_frame();
        let size = owned.buffer.len();
        if notifications == 0 || bytes_per_frame == 0 || size % notifications != 0 {
            return Err(Error::InvalidParameter);
        }
        let notification_bytes = size / notifications;
        if notification_bytes % bytes_per_frame != 0 {
            return Err(Error::InvalidParameter);
        }
        let burst_bytes = self.watermark_samples * (self.width_bits / 8);
        if notification_bytes < burst_bytes {
            warn!(
                "{:?}: period of {} bytes is below the {}-byte burst",
                self.direction,
                notification_bytes,
                burst_bytes
            );
            return Err(Error::ConfigurationInvalid);
        }

        let info = adapter.transfer_info(&owned.fragments);
        let map_registers = info
            .map_registers
            .max(owned.fragments.pages)
            .min(adapter.max_map_registers());
        if map_registers == 0 {
            return Err(Error::ResourceExhausted);
        }

        {
            let _priority = PriorityGuard::new();
            adapter.allocate_channel(map_registers)?;
        }
        self.channel_allocated = true;

        let programmed = [
            ChannelProperty::NotificationThreshold(notification_bytes),
            ChannelProperty::WatermarkLevel(burst_bytes),
            ChannelProperty::AcquireRequestLine(self.request_line),
        ]
        .into_iter()
        .try_for_each(|property| adapter.set_channel_property(property));
        if let Err(e) = programmed {
            warn!("{:?}: channel setup failed: {}", self.direction, e);
            adapter.free_channel();
            self.channel_allocated = false;
            return Err(e.into());
        }

        self.endpoint.attach(consumer, notification_bytes, bytes_per_frame);
        self.consumer = Some(consumer);
        self.notification_bytes = notification_bytes;
        self.state = StreamState::Registered;
        Ok(())
    }

    /// Detach `consumer`, cancel the transfer and free the channel.
    ///
    /// # Panics
    ///
    /// If `consumer` is not the registered consumer.
    pub fn unregister_stream(&mut self, consumer: &'static dyn StreamConsumer) -> Result<()> {
        let registered = self.consumer.ok_or(Error::InvalidState)?;
        assert!(
            core::ptr::addr_eq(
                registered as *const dyn StreamConsumer,
                consumer as *const dyn StreamConsumer
            ),
            "unregistering a consumer that is not registered"
        );

        self.endpoint.detach();
        if self.mapped {
            self.cancel_and_confirm()?;
        }
        if let (Some(adapter), Some(owned)) = (self.adapter.as_mut(), self.buffer.as_ref()) {
            adapter.flush_buffers(&owned.buffer, self.direction);
        }
        if self.channel_allocated {
            if let Some(adapter) = self.adapter.as_mut() {
                adapter.free_channel();
            }
            self.channel_allocated = false;
        }
        self.consumer = None;
        self.notification_bytes = 0;
        self.state = StreamState::Unregistered;
        Ok(())
    }

    /// Start streaming.
    ///
    /// A second start is a no-op. A paused stream resumes without being
    /// re-mapped. Otherwise the whole buffer is mapped as one
    /// auto-initializing transfer.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            StreamState::Started => return Ok(()),
            StreamState::Paused => {
                self.state = StreamState::Started;
                return Ok(());
            }
            StreamState::Unregistered => return Err(Error::InvalidState),
            StreamState::Registered | StreamState::Stopped => {}
        }
        let (Some(adapter), Some(owned)) = (self.adapter.as_mut(), self.buffer.as_ref()) else {
            return Err(Error::InvalidState);
        };

        adapter.init_transfer_context();
        let requested = owned.buffer.len();
        let mapped = adapter.map_transfer(&owned.buffer, requested, self.direction, self.endpoint)?;
        if mapped == 0 {
            return Err(DmaError::NothingMapped.into());
        }
        if mapped != requested {
            warn!(
                "{:?}: mapped {} of {} buffer bytes",
                self.direction,
                mapped,
                requested
            );
        }
        self.mapped = true;
        self.state = StreamState::Started;
        Ok(())
    }

    /// Cancel the mapped transfer; the next start re-maps.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == StreamState::Unregistered {
            return Err(Error::InvalidState);
        }
        if self.mapped {
            self.cancel_and_confirm()?;
        }
        self.state = StreamState::Stopped;
        Ok(())
    }

    /// Pause a started stream, keeping its mapping.
    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            StreamState::Started => {
                self.state = StreamState::Paused;
                Ok(())
            }
            StreamState::Paused => Ok(()),
            _ => Err(Error::InvalidState),
        }
    }

    /// Tear down whatever resources exist, in reverse order of creation.
    ///
    /// Safe on a partially built stream. Any outstanding [`BufferHandle`]
    /// becomes stale; freeing it afterwards is a no-op.
    pub fn release<P>(&mut self, provider: &mut P)
    where
        P: DmaProvider<Adapter = A>,
    {
        self.endpoint.detach();
        self.consumer = None;
        if self.mapped {
            if let Err(e) = self.cancel_and_confirm() {
                error!("{:?}: releasing with an unconfirmed cancel: {}", self.direction, e);
                self.mapped = false;
            }
        }
        if let Some(mut adapter) = self.adapter.take() {
            if self.channel_allocated {
                adapter.free_channel();
            }
            if let Some(owned) = self.buffer.take() {
                adapter.free_buffer(owned.buffer);
            }
            debug!("{:?}: releasing adapter", self.direction);
            provider.release_adapter(adapter);
        }
        self.channel_allocated = false;
        self.buffer = None;
        self.notification_bytes = 0;
        self.state = StreamState::Unregistered;
    }

    fn cancel_and_confirm(&mut self) -> Result<()> {
        let adapter = self.adapter.as_mut().ok_or(Error::InvalidState)?;
        for _ in 0..CANCEL_RETRIES {
            if adapter.cancel_transfer() {
                self.mapped = false;
                return Ok(());
            }
        }
        warn!("{:?}: transfer cancellation never confirmed", self.direction);
        Err(Error::HardwareNotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::{DeviceHandle, TransferStatus};
    use crate::testing::{leak, DmaEvent, FakeAdapter, FakeDma, RecordingConsumer};

    fn request(width_bits: u32) -> AdapterRequest {
        AdapterRequest {
            device: DeviceHandle(1),
            data_register: 0x4038_4020,
            width_bits,
            request_line: 7,
            channel: 2,
        }
    }

    fn stream(dma: &mut FakeDma) -> DmaStream<FakeAdapter> {
        let mut s = DmaStream::new(Direction::Transmit, leak(StreamEndpoint::new()));
        s.init(dma, request(32), 16).unwrap();
        s
    }

    fn registered(
        dma: &mut FakeDma,
        size: u32,
        consumer: &'static RecordingConsumer,
    ) -> (DmaStream<FakeAdapter>, BufferHandle) {
        let mut s = stream(dma);
        let handle = s.allocate_buffer(size).unwrap();
        s.register_stream(consumer).unwrap();
        (s, handle)
    }

    #[test]
    fn init_without_adapter_is_exhausted() {
        let mut dma = FakeDma::new();
        dma.set_adapters_available(0);
        let mut s: DmaStream<FakeAdapter> =
            DmaStream::new(Direction::Transmit, leak(StreamEndpoint::new()));
        assert_eq!(s.init(&mut dma, request(32), 16), Err(Error::ResourceExhausted));
        assert_eq!(s.width_bits(), None);
    }

    #[test]
    fn same_width_reuses_adapter() {
        let mut dma = FakeDma::new();
        let mut s = stream(&mut dma);
        s.init(&mut dma, request(32), 8).unwrap();
        assert_eq!(dma.count(|e| matches!(e, DmaEvent::AcquireAdapter { .. })), 1);
        assert_eq!(dma.count(|e| matches!(e, DmaEvent::ReleaseAdapter { .. })), 0);
    }

    #[test]
    fn width_change_releases_prior_adapter_first() {
        let mut dma = FakeDma::new();
        let mut s = stream(&mut dma);
        s.init(&mut dma, request(16), 16).unwrap();
        assert_eq!(
            dma.events(),
            [
                DmaEvent::AcquireAdapter { width_bits: 32, request_line: 7 },
                DmaEvent::ReleaseAdapter { width_bits: 32 },
                DmaEvent::AcquireAdapter { width_bits: 16, request_line: 7 },
            ]
        );
        assert_eq!(s.width_bits(), Some(16));
    }

    #[test]
    fn width_change_with_buffer_is_refused() {
        let mut dma = FakeDma::new();
        let mut s = stream(&mut dma);
        let _handle = s.allocate_buffer(4096).unwrap();
        assert_eq!(s.init(&mut dma, request(16), 16), Err(Error::InvalidState));
        assert_eq!(s.width_bits(), Some(32));
    }

    #[test]
    fn buffer_is_non_cached_and_aligned() {
        let mut dma = FakeDma::new();
        let mut s = stream(&mut dma);
        let handle = s.allocate_buffer(4096).unwrap();
        assert_eq!(handle.len(), 4096);
        assert_eq!(handle.cache_policy(), CachePolicy::NonCached);
        assert_eq!(handle.physical_address() % 64, 0);
        s.free_buffer(handle);
        assert_eq!(dma.live_buffers(), 0);
    }

    #[test]
    fn allocation_failure_is_exhausted() {
        let mut dma = FakeDma::new();
        let mut s = stream(&mut dma);
        dma.set_fail_allocation(true);
        assert_eq!(s.allocate_buffer(4096).err(), Some(Error::ResourceExhausted));
        assert!(!s.has_buffer());
    }

    #[test]
    fn misaligned_buffer_is_freed_again() {
        let mut dma = FakeDma::new();
        let mut s = stream(&mut dma);
        dma.set_misalign(true);
        assert_eq!(s.allocate_buffer(4096).err(), Some(Error::ResourceExhausted));
        assert_eq!(dma.live_buffers(), 0);
        assert!(!s.has_buffer());
    }

    #[test]
    #[should_panic(expected = "does not belong")]
    fn foreign_handle_panics() {
        let mut dma = FakeDma::new();
        let mut a = stream(&mut dma);
        let mut b = stream(&mut dma);
        let _mine = a.allocate_buffer(64).unwrap();
        let _first = b.allocate_buffer(64).unwrap();
        b.free_buffer(_first);
        let second = b.allocate_buffer(64).unwrap();
        // `second` has id 1, `a` only ever issued id 0.
        a.free_buffer(second);
    }

    #[test]
    fn notification_bytes_split_the_buffer() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let (s, _handle) = registered(&mut dma, 4096, consumer);
        assert_eq!(s.notification_bytes(), 1024);
        assert_eq!(s.notification_bytes() * 4, 4096);
        assert_eq!(s.state(), StreamState::Registered);
        assert!(dma.events().contains(&DmaEvent::SetProperty(
            ChannelProperty::NotificationThreshold(1024)
        )));
        assert!(dma
            .events()
            .contains(&DmaEvent::SetProperty(ChannelProperty::WatermarkLevel(64))));
        assert!(dma
            .events()
            .contains(&DmaEvent::SetProperty(ChannelProperty::AcquireRequestLine(7))));
    }

    #[test]
    fn uneven_split_is_invalid() {
        let mut dma = FakeDma::new();
        let mut s = stream(&mut dma);
        let _handle = s.allocate_buffer(4096).unwrap();
        let consumer = leak(RecordingConsumer::new(3, 8));
        assert_eq!(s.register_stream(consumer), Err(Error::InvalidParameter));
        assert_eq!(s.state(), StreamState::Unregistered);
        assert_eq!(dma.count(|e| matches!(e, DmaEvent::AllocateChannel { .. })), 0);
    }

    #[test]
    fn period_below_burst_is_invalid() {
        let mut dma = FakeDma::new();
        let mut s = stream(&mut dma);
        let _handle = s.allocate_buffer(256).unwrap();
        // 256 / 8 = 32-byte periods against a 16 × 4 = 64-byte burst.
        let consumer = leak(RecordingConsumer::new(8, 4));
        assert_eq!(s.register_stream(consumer), Err(Error::ConfigurationInvalid));
    }

    #[test]
    fn channel_is_allocated_in_priority_window() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let _ = registered(&mut dma, 8192, consumer);
        assert!(dma.events().contains(&DmaEvent::AllocateChannel {
            map_registers: 2,
            elevated: true
        }));
    }

    #[test]
    fn map_registers_are_bounded_by_adapter() {
        let mut dma = FakeDma::new();
        dma.set_max_map_registers(1);
        let consumer = leak(RecordingConsumer::new(4, 8));
        let _ = registered(&mut dma, 8192, consumer);
        assert!(dma.events().contains(&DmaEvent::AllocateChannel {
            map_registers: 1,
            elevated: true
        }));
    }

    #[test]
    fn property_failure_frees_the_channel() {
        let mut dma = FakeDma::new();
        let mut s = stream(&mut dma);
        let _handle = s.allocate_buffer(4096).unwrap();
        dma.set_reject_properties(true);
        let consumer = leak(RecordingConsumer::new(4, 8));
        assert_eq!(
            s.register_stream(consumer),
            Err(Error::Dma(DmaError::Rejected))
        );
        assert_eq!(dma.events().last(), Some(&DmaEvent::FreeChannel));
        assert_eq!(s.state(), StreamState::Unregistered);
        assert!(!s.endpoint().is_attached());
    }

    #[test]
    fn start_maps_the_whole_buffer_once() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let (mut s, _handle) = registered(&mut dma, 4096, consumer);
        s.start().unwrap();
        s.start().unwrap();
        assert_eq!(s.state(), StreamState::Started);
        assert_eq!(
            dma.count(|e| matches!(e, DmaEvent::MapTransfer { len: 4096, .. })),
            1
        );
    }

    #[test]
    fn start_before_register_is_invalid() {
        let mut dma = FakeDma::new();
        let mut s = stream(&mut dma);
        assert_eq!(s.start(), Err(Error::InvalidState));
    }

    #[test]
    fn short_mapping_is_accepted_and_zero_is_not() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let (mut s, _handle) = registered(&mut dma, 4096, consumer);
        dma.set_map_limit(Some(2048));
        s.start().unwrap();
        s.stop().unwrap();

        dma.set_map_limit(Some(0));
        assert_eq!(s.start(), Err(Error::Dma(DmaError::NothingMapped)));
        assert_eq!(s.state(), StreamState::Stopped);
    }

    #[test]
    fn pause_keeps_mapping_and_stop_drops_it() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let (mut s, _handle) = registered(&mut dma, 4096, consumer);
        s.start().unwrap();
        s.pause().unwrap();
        assert_eq!(s.state(), StreamState::Paused);
        s.start().unwrap();
        assert_eq!(dma.count(|e| matches!(e, DmaEvent::MapTransfer { .. })), 1);

        s.stop().unwrap();
        assert_eq!(s.state(), StreamState::Stopped);
        s.start().unwrap();
        assert_eq!(dma.count(|e| matches!(e, DmaEvent::MapTransfer { .. })), 2);
    }

    #[test]
    fn pause_when_not_started_is_invalid() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let (mut s, _handle) = registered(&mut dma, 4096, consumer);
        assert_eq!(s.pause(), Err(Error::InvalidState));
    }

    #[test]
    fn unconfirmed_cancel_is_not_ready() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let (mut s, _handle) = registered(&mut dma, 4096, consumer);
        s.start().unwrap();
        dma.set_cancel_confirms_after(CANCEL_RETRIES + 1);
        assert_eq!(s.stop(), Err(Error::HardwareNotReady));
        assert_eq!(s.state(), StreamState::Started);
    }

    #[test]
    fn cancel_is_retried_until_confirmed() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let (mut s, _handle) = registered(&mut dma, 4096, consumer);
        s.start().unwrap();
        dma.set_cancel_confirms_after(3);
        s.stop().unwrap();
        assert_eq!(dma.count(|e| matches!(e, DmaEvent::CancelTransfer)), 3);
    }

    #[test]
    fn unregister_cancels_before_free_buffer() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let (mut s, handle) = registered(&mut dma, 4096, consumer);
        s.start().unwrap();
        s.unregister_stream(consumer).unwrap();
        s.free_buffer(handle);

        let events = dma.events();
        let cancel = events.iter().position(|e| *e == DmaEvent::CancelTransfer).unwrap();
        let flush = events.iter().position(|e| *e == DmaEvent::FlushBuffers).unwrap();
        let free_channel = events.iter().position(|e| *e == DmaEvent::FreeChannel).unwrap();
        let free_buffer = events
            .iter()
            .position(|e| matches!(e, DmaEvent::FreeBuffer { .. }))
            .unwrap();
        assert!(cancel < flush);
        assert!(flush < free_channel);
        assert!(free_channel < free_buffer);
        assert_eq!(s.state(), StreamState::Unregistered);
    }

    #[test]
    fn unregister_detaches_before_cancelling() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let (mut s, _handle) = registered(&mut dma, 4096, consumer);
        s.start().unwrap();
        s.unregister_stream(consumer).unwrap();
        // A completion racing the teardown lands on a detached endpoint.
        s.endpoint().on_transfer_complete(TransferStatus::Success);
        assert!(consumer.positions().is_empty());
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn unregister_with_other_consumer_panics() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let other = leak(RecordingConsumer::new(4, 8));
        let (mut s, _handle) = registered(&mut dma, 4096, consumer);
        let _ = s.unregister_stream(other);
    }

    #[test]
    fn completions_advance_position_per_cycle() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let (mut s, _handle) = registered(&mut dma, 4096, consumer);
        s.start().unwrap();
        for _ in 0..4 {
            dma.complete(Direction::Transmit, TransferStatus::Success);
        }
        assert_eq!(s.endpoint().transferred_sample_count(), 4096 / 8);
        assert_eq!(consumer.positions().len(), 4);
    }

    #[test]
    fn release_tears_down_partial_stream() {
        let mut dma = FakeDma::new();
        let mut s = stream(&mut dma);
        let handle = s.allocate_buffer(4096).unwrap();
        s.release(&mut dma);
        assert_eq!(dma.live_buffers(), 0);
        assert_eq!(dma.live_adapters(), 0);
        assert_eq!(s.width_bits(), None);
        // The stale handle is accepted without a second free.
        s.free_buffer(handle);
        assert_eq!(dma.count(|e| matches!(e, DmaEvent::FreeBuffer { .. })), 1);
    }

    #[test]
    fn release_of_running_stream_cancels_first() {
        let mut dma = FakeDma::new();
        let consumer = leak(RecordingConsumer::new(4, 8));
        let (mut s, _handle) = registered(&mut dma, 4096, consumer);
        s.start().unwrap();
        s.release(&mut dma);
        let events = dma.events();
        let cancel = events.iter().position(|e| *e == DmaEvent::CancelTransfer).unwrap();
        let free_channel = events.iter().position(|e| *e == DmaEvent::FreeChannel).unwrap();
        assert!(cancel < free_channel);
        assert_eq!(dma.live_adapters(), 0);
    }
}
