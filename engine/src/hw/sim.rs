use super::caps::{CapabilityTable, ClockSourceCaps, DirectionCaps, PinCaps, RateCaps};
use super::device::{DeviceControl, DeviceDescription, HwNotifier};
use super::pin::{Direction, HardwarePin, PinFormat, PinState};
use crate::error::PinError;
use crate::packet::PacketRef;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const LOOPBACK_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    Tone { frequency: f32, level: f32 },
    Loopback,
    Silence,
}

impl Default for CaptureSource {
    fn default() -> Self {
        CaptureSource::Tone {
            frequency: 440.0,
            level: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimPinConfig {
    pub name: String,
    pub channels: u32,
    /// Channel counts the pin can be opened with; empty means any.
    pub channel_counts: Vec<u32>,
    pub latency_frames: u32,
}

impl Default for SimPinConfig {
    fn default() -> Self {
        Self {
            name: "Analog".to_string(),
            channels: 2,
            channel_counts: Vec::new(),
            latency_frames: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimDeviceConfig {
    pub name: String,
    pub rates: Vec<u32>,
    pub initial_rate: u32,
    pub outputs: Vec<SimPinConfig>,
    pub inputs: Vec<SimPinConfig>,
    pub clock_sources: Vec<String>,
    pub capture: CaptureSource,
}

impl Default for SimDeviceConfig {
    fn default() -> Self {
        Self {
            name: "Simulated USB Audio".to_string(),
            rates: vec![44_100, 48_000, 96_000],
            initial_rate: 48_000,
            outputs: vec![SimPinConfig {
                name: "Out".to_string(),
                ..SimPinConfig::default()
            }],
            inputs: vec![SimPinConfig {
                name: "In".to_string(),
                ..SimPinConfig::default()
            }],
            clock_sources: vec!["Internal".to_string()],
            capture: CaptureSource::default(),
        }
    }
}

/// Render data handed to loopback capture pins.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBus {
    packets: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl LoopbackBus {
    fn push(&self, data: &[u8]) {
        if let Ok(mut q) = self.packets.lock() {
            if q.len() == LOOPBACK_DEPTH {
                q.pop_front();
            }
            q.push_back(data.to_vec());
        }
    }

    fn pop_into(&self, dst: &mut [u8]) {
        dst.fill(0);
        if let Some(data) = self.packets.lock().ok().and_then(|mut q| q.pop_front()) {
            let n = data.len().min(dst.len());
            dst[..n].copy_from_slice(&data[..n]);
        }
    }
}

#[derive(Debug, Default)]
struct ClockState {
    format: Option<PinFormat>,
    state: Option<PinState>,
    queue: VecDeque<PacketRef>,
    shutdown: bool,
}

type ClockShared = Arc<(Mutex<ClockState>, Condvar)>;

pub struct SimulatedPin {
    name: String,
    direction: Direction,
    channel_counts: Vec<u32>,
    latency_frames: u32,
    source: CaptureSource,
    loopback: LoopbackBus,
    clock: ClockShared,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedPin {
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        config: &SimPinConfig,
        source: CaptureSource,
        loopback: LoopbackBus,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            channel_counts: config.channel_counts.clone(),
            latency_frames: config.latency_frames,
            source,
            loopback,
            clock: Arc::new((Mutex::new(ClockState::default()), Condvar::new())),
            handle: None,
        }
    }

    fn with_clock<T>(&self, f: impl FnOnce(&mut ClockState) -> T) -> Result<T, PinError> {
        let (lock, cvar) = &*self.clock;
        let mut st = lock
            .lock()
            .map_err(|_| PinError::Io("clock mutex poisoned".to_string()))?;
        let out = f(&mut st);
        cvar.notify_all();
        Ok(out)
    }

    fn enqueue(&mut self, packet: &PacketRef) -> Result<(), PinError> {
        self.with_clock(|st| {
            if st.format.is_none() {
                return Err(PinError::NotOpen);
            }
            st.queue.push_back(packet.clone());
            Ok(())
        })?
    }

    fn stop_clock(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.with_clock(|st| st.shutdown = true);
            if handle.join().is_err() {
                error!("{} packet clock panicked", self.name);
            }
        }
    }
}

impl HardwarePin for SimulatedPin {
    fn instantiate(&mut self, format: &PinFormat) -> Result<(), PinError> {
        if !self.channel_counts.is_empty() && !self.channel_counts.contains(&format.channels) {
            return Err(PinError::UnsupportedFormat(format!(
                "{} channels",
                format.channels
            )));
        }
        if format.sample_rate == 0 || format.frames == 0 {
            return Err(PinError::UnsupportedFormat(format!("{:?}", format)));
        }
        self.stop_clock();
        self.clock = Arc::new((
            Mutex::new(ClockState {
                format: Some(*format),
                state: Some(PinState::Stop),
                ..ClockState::default()
            }),
            Condvar::new(),
        ));
        let clock = PacketClock {
            name: self.name.clone(),
            direction: self.direction,
            format: *format,
            source: self.source,
            loopback: self.loopback.clone(),
            shared: self.clock.clone(),
            phase: 0.0,
        };
        let handle = thread::Builder::new()
            .name(format!("sim-{}", self.direction.label()))
            .spawn(move || clock.run())
            .map_err(|e| PinError::Io(e.to_string()))?;
        self.handle = Some(handle);
        debug!(
            "{} opened with {} channels at {} Hz",
            self.name, format.channels, format.sample_rate
        );
        Ok(())
    }

    fn reset(&mut self) -> Result<(), PinError> {
        self.with_clock(|st| st.queue.clear())
    }

    fn set_state(&mut self, state: PinState) -> Result<(), PinError> {
        self.with_clock(|st| {
            let from = st.state.ok_or(PinError::NotOpen)?;
            if !from.can_transition_to(state) {
                return Err(PinError::InvalidTransition { from, to: state });
            }
            st.state = Some(state);
            if state == PinState::Stop {
                st.queue.clear();
            }
            Ok(())
        })?
    }

    fn enqueue_read(&mut self, packet: &PacketRef) -> Result<(), PinError> {
        self.enqueue(packet)
    }

    fn enqueue_write(&mut self, packet: &PacketRef) -> Result<(), PinError> {
        self.enqueue(packet)
    }

    fn close(&mut self) {
        self.stop_clock();
        let _ = self.with_clock(|st| {
            st.format = None;
            st.state = None;
            st.queue.clear();
        });
    }

    fn latency(&self, _sample_rate: u32) -> u32 {
        self.latency_frames
    }
}

impl Drop for SimulatedPin {
    fn drop(&mut self) {
        self.stop_clock();
    }
}

struct PacketClock {
    name: String,
    direction: Direction,
    format: PinFormat,
    source: CaptureSource,
    loopback: LoopbackBus,
    shared: ClockShared,
    phase: f32,
}

impl PacketClock {
    fn period(&self) -> Duration {
        Duration::from_nanos(
            self.format.frames as u64 * 1_000_000_000 / self.format.sample_rate as u64,
        )
    }

    fn run(mut self) {
        let period = self.period();
        let shared = self.shared.clone();
        let (lock, cvar) = &*shared;
        let mut next: Option<Instant> = None;
        let Ok(mut st) = lock.lock() else {
            return;
        };
        loop {
            if st.shutdown {
                break;
            }
            if st.state != Some(PinState::Run) {
                next = None;
                st = match cvar.wait(st) {
                    Ok(st) => st,
                    Err(_) => return,
                };
                continue;
            }
            let due = *next.get_or_insert_with(|| Instant::now() + period);
            let now = Instant::now();
            if now < due {
                st = match cvar.wait_timeout(st, due - now) {
                    Ok((st, _)) => st,
                    Err(_) => return,
                };
                continue;
            }
            next = Some(due + period);
            match st.queue.pop_front() {
                Some(packet) => self.transfer(&packet),
                None => warn!("{} {} underrun", self.name, self.direction.label()),
            }
        }
    }

    fn transfer(&mut self, packet: &PacketRef) {
        match self.direction {
            Direction::Render => {
                let used = packet.bytes_used();
                self.loopback.push(&packet.data()[..used]);
                packet.complete(used);
            }
            Direction::Capture => {
                let data = packet.data();
                match self.source {
                    CaptureSource::Tone { frequency, level } => self.tone(data, frequency, level),
                    CaptureSource::Loopback => self.loopback.pop_into(data),
                    CaptureSource::Silence => data.fill(0),
                }
                packet.complete(packet.extent());
            }
        }
    }

    fn tone(&mut self, data: &mut [u8], frequency: f32, level: f32) {
        let bytes = self.format.format.bytes();
        let frame = self.format.frame_bytes();
        let step = std::f32::consts::TAU * frequency / self.format.sample_rate as f32;
        for chunk in data.chunks_exact_mut(frame) {
            let value = self.phase.sin() * level;
            for sample in chunk.chunks_exact_mut(bytes) {
                self.format.format.write_f32(sample, value);
            }
            self.phase = (self.phase + step) % std::f32::consts::TAU;
        }
    }
}

/// Clock and notification side of the simulated device.
pub struct SimulatedDevice {
    rates: Vec<u32>,
    rate: AtomicU32,
    clock_source: AtomicUsize,
    clock_source_count: usize,
    notifier: Mutex<Option<HwNotifier>>,
}

impl SimulatedDevice {
    fn notify(&self, pick: impl FnOnce(&HwNotifier)) {
        match self.notifier.lock() {
            Ok(n) => match n.as_ref() {
                Some(n) => pick(n),
                None => debug!("device notification dropped, no notifier registered"),
            },
            Err(_) => error!("device notifier lock poisoned"),
        }
    }

    /// The device switched rate on its own, e.g. following an external clock.
    pub fn change_rate_externally(&self, rate: u32) {
        self.rate.store(rate, Ordering::Release);
        self.notify(|n| n.clock_rate_changed.signal());
    }

    pub fn change_clock_source_externally(&self, index: usize) {
        self.clock_source.store(index, Ordering::Release);
        self.notify(|n| n.clock_source_changed.signal());
    }

    pub fn request_resync(&self) {
        self.notify(|n| n.resync_requested.signal());
    }
}

impl DeviceControl for SimulatedDevice {
    fn current_sample_rate(&self) -> Result<u32, PinError> {
        Ok(self.rate.load(Ordering::Acquire))
    }

    fn set_sample_rate(&self, rate: u32) -> Result<(), PinError> {
        if !self.rates.contains(&rate) {
            return Err(PinError::UnsupportedFormat(format!("{} Hz", rate)));
        }
        self.rate.store(rate, Ordering::Release);
        Ok(())
    }

    fn current_clock_source(&self) -> usize {
        self.clock_source.load(Ordering::Acquire)
    }

    fn select_clock_source(&self, index: usize) -> Result<(), PinError> {
        if index >= self.clock_source_count.max(1) {
            return Err(PinError::Io(format!("no clock source {}", index)));
        }
        self.clock_source.store(index, Ordering::Release);
        Ok(())
    }

    fn register_notifier(&self, notifier: HwNotifier) {
        if let Ok(mut n) = self.notifier.lock() {
            *n = Some(notifier);
        }
    }
}

/// Builds the capability table of a simulated device. The returned
/// [`SimulatedDevice`] is the same object the driver controls, so callers
/// can inject clock and resync events.
pub fn simulated_device(config: &SimDeviceConfig) -> (DeviceDescription, Arc<SimulatedDevice>) {
    let loopback = LoopbackBus::default();
    let direction_caps = |direction: Direction, pins: &[SimPinConfig]| DirectionCaps {
        rates: config
            .rates
            .iter()
            .map(|&rate| RateCaps {
                sample_rate: rate,
                supported: true,
                pins: pins
                    .iter()
                    .map(|pin| PinCaps {
                        name: pin.name.clone(),
                        max_channels: pin.channels,
                        pin: Box::new(SimulatedPin::new(
                            pin.name.clone(),
                            direction,
                            pin,
                            config.capture,
                            loopback.clone(),
                        )),
                    })
                    .collect(),
            })
            .collect(),
    };
    let caps = CapabilityTable {
        render: direction_caps(Direction::Render, &config.outputs),
        capture: direction_caps(Direction::Capture, &config.inputs),
        clock_sources: config
            .clock_sources
            .iter()
            .enumerate()
            .map(|(idx, name)| ClockSourceCaps {
                name: name.clone(),
                input_group: (idx > 0 && idx <= config.inputs.len()).then(|| idx - 1),
            })
            .collect(),
    };
    let device = Arc::new(SimulatedDevice {
        rates: config.rates.clone(),
        rate: AtomicU32::new(config.initial_rate),
        clock_source: AtomicUsize::new(0),
        clock_source_count: config.clock_sources.len(),
        notifier: Mutex::new(None),
    });
    let description = DeviceDescription {
        name: config.name.clone(),
        caps,
        control: device.clone(),
    };
    (description, device)
}
