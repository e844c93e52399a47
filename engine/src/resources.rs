use crate::error::{DriverError, DriverResult, PinError};
use crate::event::EventSet;
use crate::hw::caps::{CapabilityTable, DirectionCaps, RateCaps};
use crate::hw::pin::{Direction, HardwarePin, PinFormat, PinState};
use crate::io_thread::CONTROL_EVENT_COUNT;
use crate::mutex::UnsafeMutex;
use crate::packet::{DataPacket, PACKET_RING_SIZE, PacketRef};
use crate::sample::{self, SampleFormat};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const MAX_PINS_PER_DIRECTION: usize = 8;

pub fn packet_event_bit(direction: Direction, pin: usize, slot: usize) -> u32 {
    CONTROL_EVENT_COUNT
        + ((direction.index() * MAX_PINS_PER_DIRECTION + pin) * PACKET_RING_SIZE + slot) as u32
}

pub fn decode_packet_event(bit: u32) -> Option<(Direction, usize, usize)> {
    let idx = bit.checked_sub(CONTROL_EVENT_COUNT)? as usize;
    let slot = idx % PACKET_RING_SIZE;
    let pin = (idx / PACKET_RING_SIZE) % MAX_PINS_PER_DIRECTION;
    let direction = match idx / (PACKET_RING_SIZE * MAX_PINS_PER_DIRECTION) {
        0 => Direction::Render,
        1 => Direction::Capture,
        _ => return None,
    };
    Some((direction, pin, slot))
}

/// One half of a channel's double buffer, shared with the host.
#[derive(Debug)]
pub struct SampleBuffer {
    data: UnsafeMutex<Box<[u8]>>,
}

impl SampleBuffer {
    pub fn new(bytes: usize) -> DriverResult<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| DriverError::NoMemory)?;
        data.resize(bytes, 0_u8);
        Ok(Self {
            data: UnsafeMutex::new(data.into_boxed_slice()),
        })
    }

    #[allow(clippy::mut_from_ref)]
    pub fn bytes(&self) -> &mut [u8] {
        self.data.lock()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn zero(&self) {
        self.data.lock().fill(0);
    }
}

pub struct PinDescriptor {
    pub name: String,
    pin: Box<dyn HardwarePin>,
    pub max_channels: u32,
    pub first_channel: u32,
    pub latency: u32,
    pub usable: bool,
    pub in_use: bool,
    pub active: bool,
    pub active_channels: u32,
    pub buffer_frames: u32,
    state: PinState,
    packets: Vec<PacketRef>,
}

impl std::fmt::Debug for PinDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinDescriptor")
            .field("name", &self.name)
            .field("max_channels", &self.max_channels)
            .field("in_use", &self.in_use)
            .field("active", &self.active)
            .field("active_channels", &self.active_channels)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl PinDescriptor {
    pub fn state(&self) -> PinState {
        self.state
    }

    pub fn packets(&self) -> &[PacketRef] {
        &self.packets
    }

    fn step_to(&mut self, target: PinState) -> Result<(), PinError> {
        while self.state != target {
            let next = self.state.step_towards(target);
            self.pin.set_state(next)?;
            self.state = next;
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.active {
            if let Err(e) = self.step_to(PinState::Stop) {
                warn!("pin {} did not stop cleanly: {}", self.name, e);
                self.state = PinState::Stop;
            }
            self.pin.close();
        }
        self.packets.clear();
        self.in_use = false;
        self.active = false;
        self.active_channels = 0;
        self.buffer_frames = 0;
    }
}

#[derive(Debug)]
pub struct FilterDataRange {
    pub sample_rate: u32,
    pub supported: bool,
    pub max_channels: u32,
    pub latency: u32,
    pub pins: Vec<PinDescriptor>,
    pub active_pins: u32,
}

impl FilterDataRange {
    fn from_caps(direction: Direction, caps: RateCaps) -> Self {
        let rate = caps.sample_rate;
        let mut pins = Vec::with_capacity(caps.pins.len());
        let mut first_channel = 0;
        for (idx, pin) in caps.pins.into_iter().enumerate() {
            if idx >= MAX_PINS_PER_DIRECTION {
                warn!(
                    "{} pin {} at {} Hz ignored: at most {} pins per direction",
                    direction.label(),
                    pin.name,
                    rate,
                    MAX_PINS_PER_DIRECTION
                );
                continue;
            }
            let latency = pin.pin.latency(rate);
            pins.push(PinDescriptor {
                name: pin.name,
                pin: pin.pin,
                max_channels: pin.max_channels,
                first_channel,
                latency,
                usable: pin.max_channels > 0,
                in_use: false,
                active: false,
                active_channels: 0,
                buffer_frames: 0,
                state: PinState::Stop,
                packets: Vec::new(),
            });
            first_channel += pin.max_channels;
        }
        Self {
            sample_rate: rate,
            supported: caps.supported,
            max_channels: first_channel,
            latency: pins.iter().map(|p| p.latency).max().unwrap_or(0),
            pins,
            active_pins: 0,
        }
    }

    /// Pin index and intra-pin index of a logical channel.
    pub fn locate(&self, channel: u32) -> Option<(usize, u32)> {
        self.pins.iter().enumerate().find_map(|(idx, pin)| {
            (pin.usable
                && channel >= pin.first_channel
                && channel < pin.first_channel + pin.max_channels)
                .then(|| (idx, channel - pin.first_channel))
        })
    }
}

#[derive(Debug)]
pub struct ChannelDescriptor {
    pub direction: Direction,
    pub channel: u32,
    pub pin: usize,
    pub index: u32,
    pub offset: usize,
    pub buffers: [Arc<SampleBuffer>; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub frames: u32,
}

#[derive(Debug, Default)]
pub struct ResourceManager {
    ranges: [BTreeMap<u32, FilterDataRange>; 2],
    channels: [Vec<ChannelDescriptor>; 2],
    bound: [Option<Binding>; 2],
}

impl ResourceManager {
    pub fn new(caps: CapabilityTable) -> Self {
        let mut manager = Self::default();
        manager.ranges[Direction::Render.index()] = build_ranges(Direction::Render, caps.render);
        manager.ranges[Direction::Capture.index()] =
            build_ranges(Direction::Capture, caps.capture);
        manager
    }

    pub fn range(&self, direction: Direction, rate: u32) -> Option<&FilterDataRange> {
        self.ranges[direction.index()].get(&rate)
    }

    pub fn has_pins(&self, direction: Direction) -> bool {
        self.ranges[direction.index()]
            .values()
            .any(|r| !r.pins.is_empty())
    }

    pub fn supports_rate(&self, rate: u32) -> bool {
        let mut any = false;
        for direction in Direction::ALL {
            if !self.has_pins(direction) {
                continue;
            }
            any = true;
            match self.range(direction, rate) {
                Some(range) if range.supported => {}
                _ => return false,
            }
        }
        any
    }

    pub fn rates(&self) -> Vec<u32> {
        let mut rates: Vec<u32> = self
            .ranges
            .iter()
            .flat_map(|r| r.keys().copied())
            .filter(|&rate| self.supports_rate(rate))
            .collect();
        rates.sort_unstable();
        rates.dedup();
        rates
    }

    pub fn channel_count(&self, direction: Direction, rate: u32) -> u32 {
        self.range(direction, rate)
            .filter(|r| r.supported)
            .map(|r| r.max_channels)
            .unwrap_or(0)
    }

    /// Hardware latency: the slowest active pin once bound, the slowest pin
    /// of the range before.
    pub fn hw_latency(&self, direction: Direction, rate: u32) -> u32 {
        let Some(range) = self.range(direction, rate) else {
            return 0;
        };
        if self.bound[direction.index()].is_some_and(|b| b.sample_rate == rate) {
            range
                .pins
                .iter()
                .filter(|p| p.active)
                .map(|p| p.latency)
                .max()
                .unwrap_or(0)
        } else {
            range.latency
        }
    }

    pub fn binding(&self, direction: Direction) -> Option<Binding> {
        self.bound[direction.index()]
    }

    pub fn bound_rate(&self) -> Option<u32> {
        self.bound.iter().flatten().map(|b| b.sample_rate).next()
    }

    pub fn channels(&self, direction: Direction) -> &[ChannelDescriptor] {
        &self.channels[direction.index()]
    }

    pub fn has_channels(&self) -> bool {
        self.channels.iter().any(|c| !c.is_empty())
    }

    pub fn is_channel_active(&self, direction: Direction, channel: u32) -> bool {
        self.channels[direction.index()]
            .iter()
            .any(|c| c.channel == channel)
    }

    pub fn is_group_active(&self, direction: Direction, pin: usize) -> bool {
        self.channels[direction.index()].iter().any(|c| c.pin == pin)
    }

    pub fn active_pin_mask(&self, direction: Direction) -> u32 {
        self.bound_range(direction)
            .map(|r| r.active_pins)
            .unwrap_or(0)
    }

    pub fn packet_event_mask(&self) -> u128 {
        let mut mask = 0_u128;
        for direction in Direction::ALL {
            let active = self.active_pin_mask(direction);
            for pin in 0..MAX_PINS_PER_DIRECTION {
                if active & (1 << pin) == 0 {
                    continue;
                }
                for slot in 0..PACKET_RING_SIZE {
                    mask |= 1_u128 << packet_event_bit(direction, pin, slot);
                }
            }
        }
        mask
    }

    pub fn bound_range(&self, direction: Direction) -> Option<&FilterDataRange> {
        let rate = self.bound[direction.index()]?.sample_rate;
        self.range(direction, rate)
    }

    fn bound_range_mut(&mut self, direction: Direction) -> Option<&mut FilterDataRange> {
        let rate = self.bound[direction.index()]?.sample_rate;
        self.ranges[direction.index()].get_mut(&rate)
    }

    pub fn allocate(
        &mut self,
        direction: Direction,
        rate: u32,
        channels: &[u32],
        frames: u32,
        format: SampleFormat,
        events: &EventSet,
    ) -> DriverResult<()> {
        self.free(direction);
        let d = direction.index();
        let range = self.ranges[d]
            .get_mut(&rate)
            .filter(|r| r.supported)
            .ok_or(DriverError::InvalidMode)?;
        self.bound[d] = Some(Binding {
            sample_rate: rate,
            format,
            frames,
        });

        let bytes = format.bytes();
        let buffer_bytes = frames as usize * bytes;
        let mut descriptors = Vec::new();
        descriptors
            .try_reserve_exact(channels.len())
            .map_err(|_| DriverError::NoMemory)?;
        for &channel in channels {
            let (pin_idx, index) = range.locate(channel).ok_or(DriverError::InvalidMode)?;
            let pin = &mut range.pins[pin_idx];
            pin.in_use = true;
            pin.active_channels = pin.active_channels.max(index + 1);
            descriptors.push(ChannelDescriptor {
                direction,
                channel,
                pin: pin_idx,
                index,
                offset: index as usize * bytes,
                buffers: [
                    Arc::new(SampleBuffer::new(buffer_bytes)?),
                    Arc::new(SampleBuffer::new(buffer_bytes)?),
                ],
            });
        }

        for (pin_idx, pin) in range.pins.iter_mut().enumerate() {
            if !pin.in_use {
                continue;
            }
            let mut opened = None;
            for count in pin.active_channels..=pin.max_channels {
                let pin_format = PinFormat {
                    sample_rate: rate,
                    format,
                    channels: count,
                    frames,
                };
                match pin.pin.instantiate(&pin_format) {
                    Ok(()) => {
                        opened = Some(count);
                        break;
                    }
                    Err(e) => debug!(
                        "{} pin {} rejected {} channels: {}",
                        direction.label(),
                        pin.name,
                        count,
                        e
                    ),
                }
            }
            let count = opened.ok_or_else(|| {
                DriverError::HwMalfunction(format!(
                    "{} pin {} accepts no channel count between {} and {}",
                    direction.label(),
                    pin.name,
                    pin.active_channels,
                    pin.max_channels
                ))
            })?;
            pin.active = true;
            pin.active_channels = count;
            pin.buffer_frames = frames;
            pin.state = PinState::Stop;
            range.active_pins |= 1 << pin_idx;

            let extent = count as usize * buffer_bytes;
            let mut ring = Vec::new();
            ring.try_reserve_exact(PACKET_RING_SIZE)
                .map_err(|_| DriverError::NoMemory)?;
            for slot in 0..PACKET_RING_SIZE {
                let signal = events.event(packet_event_bit(direction, pin_idx, slot));
                ring.push(Arc::new(DataPacket::new(extent, slot, signal)?));
            }
            pin.packets = ring;
        }

        self.channels[d] = descriptors;
        Ok(())
    }

    pub fn free(&mut self, direction: Direction) {
        let d = direction.index();
        self.channels[d].clear();
        if let Some(range) = self.bound_range_mut(direction) {
            for pin in &mut range.pins {
                pin.release();
            }
            range.active_pins = 0;
        }
        self.bound[d] = None;
    }

    pub fn free_all(&mut self) {
        for direction in Direction::ALL {
            self.free(direction);
        }
    }

    /// Walks every active pin of both directions to `target`, one state at a
    /// time.
    pub fn step_pins_to(&mut self, target: PinState) -> Result<(), PinError> {
        for direction in Direction::ALL {
            if let Some(range) = self.bound_range_mut(direction) {
                for pin in range.pins.iter_mut().filter(|p| p.active) {
                    pin.step_to(target)?;
                }
            }
        }
        Ok(())
    }

    /// Best-effort return of every active pin to Stop.
    pub fn force_stop(&mut self) {
        for direction in Direction::ALL {
            if let Some(range) = self.bound_range_mut(direction) {
                for pin in range.pins.iter_mut().filter(|p| p.active) {
                    if let Err(e) = pin.step_to(PinState::Stop) {
                        error!("{} pin {} stop failed: {}", direction.label(), pin.name, e);
                        pin.state = PinState::Stop;
                    }
                }
            }
        }
    }

    pub fn pin_states(&self, direction: Direction) -> Vec<PinState> {
        self.bound_range(direction)
            .map(|r| r.pins.iter().filter(|p| p.active).map(|p| p.state).collect())
            .unwrap_or_default()
    }

    /// Queues ring slot `slot` on every active pin of `direction`.
    pub fn enqueue(&mut self, direction: Direction, slot: usize) -> Result<(), PinError> {
        let Some(range) = self.bound_range_mut(direction) else {
            return Ok(());
        };
        for pin in range.pins.iter_mut().filter(|p| p.active) {
            let Some(packet) = pin.packets.get(slot) else {
                continue;
            };
            match direction {
                Direction::Render => {
                    packet.set_bytes_used(packet.extent());
                    pin.pin.enqueue_write(packet)?;
                }
                Direction::Capture => {
                    packet.set_bytes_used(0);
                    pin.pin.enqueue_read(packet)?;
                }
            }
        }
        Ok(())
    }

    pub fn zero_packets(&self, direction: Direction, slot: usize) {
        if let Some(range) = self.bound_range(direction) {
            for pin in range.pins.iter().filter(|p| p.active) {
                if let Some(packet) = pin.packets.get(slot) {
                    packet.zero();
                }
            }
        }
    }

    pub fn zero_channel_buffers(&self) {
        for channel in self.channels.iter().flatten() {
            for buffer in &channel.buffers {
                buffer.zero();
            }
        }
    }

    /// De-interleaves capture slot `slot` into the input buffers of `half`.
    pub fn capture_to_channels(&self, slot: usize, half: usize) {
        let Some(binding) = self.binding(Direction::Capture) else {
            return;
        };
        let Some(range) = self.bound_range(Direction::Capture) else {
            return;
        };
        let bytes = binding.format.bytes();
        for channel in self.channels(Direction::Capture) {
            let pin = &range.pins[channel.pin];
            let Some(packet) = pin.packets.get(slot) else {
                continue;
            };
            let stride = pin.active_channels as usize * bytes;
            let dst = channel.buffers[half & 1].bytes();
            sample::deinterleave(packet.data(), channel.offset, stride, dst, bytes);
        }
    }

    /// Interleaves the output buffers of `half` into render slot `slot`.
    /// Pin channels the host did not bind stay silent.
    pub fn channels_to_render(&self, slot: usize, half: usize) {
        let Some(binding) = self.binding(Direction::Render) else {
            return;
        };
        let Some(range) = self.bound_range(Direction::Render) else {
            return;
        };
        self.zero_packets(Direction::Render, slot);
        let bytes = binding.format.bytes();
        for channel in self.channels(Direction::Render) {
            let pin = &range.pins[channel.pin];
            let Some(packet) = pin.packets.get(slot) else {
                continue;
            };
            let stride = pin.active_channels as usize * bytes;
            let src = channel.buffers[half & 1].bytes();
            sample::interleave(src, channel.offset, stride, packet.data(), bytes);
        }
    }
}

fn build_ranges(direction: Direction, caps: DirectionCaps) -> BTreeMap<u32, FilterDataRange> {
    caps.rates
        .into_iter()
        .map(|rate| (rate.sample_rate, FilterDataRange::from_caps(direction, rate)))
        .collect()
}
