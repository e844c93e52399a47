#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uacstream_engine::{
    BufferInfo, BufferRequest, CapabilityTable, ClockSourceCaps, ControlPanel, DeviceControl,
    DeviceDescription, Direction, DirectionCaps, Driver, DriverOptions, HardwarePin, HostCallbacks,
    HostDriver, HostMessage, HwNotifier, MemorySettingsStore, MessageSelector, PacketRef,
    PinCaps, PinError, PinFormat, PinState, RateCaps, Settings, SettingsStore, TimeInfo,
};

pub const CAPTURE_PATTERN: u8 = 0x11;
pub const RENDER_LATENCY: u32 = 24;
pub const CAPTURE_LATENCY: u32 = 40;
pub const DEVICE: &str = "Test Interface";

#[derive(Debug, Default)]
pub struct PinLog {
    pub format: Option<PinFormat>,
    pub state: Option<PinState>,
    pub states: Vec<PinState>,
    pub queued: VecDeque<PacketRef>,
    pub writes: Vec<usize>,
    pub reads: Vec<usize>,
    pub closed: usize,
    pub fail_run: bool,
}

#[derive(Clone, Default)]
pub struct PinHandle(pub Arc<Mutex<PinLog>>);

impl PinHandle {
    pub fn log(&self) -> std::sync::MutexGuard<'_, PinLog> {
        self.0.lock().unwrap()
    }

    /// Completes the oldest queued packet and returns its slot.
    pub fn complete_next(&self, direction: Direction) -> usize {
        let packet = self
            .log()
            .queued
            .pop_front()
            .expect("no packet queued on pin");
        match direction {
            Direction::Render => packet.complete(packet.bytes_used()),
            Direction::Capture => {
                packet.data().fill(CAPTURE_PATTERN);
                packet.complete(packet.extent());
            }
        }
        packet.slot()
    }

    pub fn queued_slots(&self) -> Vec<usize> {
        self.log().queued.iter().map(|p| p.slot()).collect()
    }

    pub fn queued_packet(&self, slot: usize) -> Option<PacketRef> {
        self.log().queued.iter().find(|p| p.slot() == slot).cloned()
    }
}

pub struct ManualPin {
    handle: PinHandle,
    latency: u32,
}

impl HardwarePin for ManualPin {
    fn instantiate(&mut self, format: &PinFormat) -> Result<(), PinError> {
        let mut log = self.handle.log();
        log.format = Some(*format);
        log.state = Some(PinState::Stop);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), PinError> {
        self.handle.log().queued.clear();
        Ok(())
    }

    fn set_state(&mut self, state: PinState) -> Result<(), PinError> {
        let mut log = self.handle.log();
        let from = log.state.ok_or(PinError::NotOpen)?;
        if !from.can_transition_to(state) {
            return Err(PinError::InvalidTransition { from, to: state });
        }
        if state == PinState::Run && log.fail_run {
            return Err(PinError::Io("refusing to run".to_string()));
        }
        log.state = Some(state);
        log.states.push(state);
        if state == PinState::Stop {
            log.queued.clear();
        }
        Ok(())
    }

    fn enqueue_read(&mut self, packet: &PacketRef) -> Result<(), PinError> {
        let mut log = self.handle.log();
        log.reads.push(packet.slot());
        log.queued.push_back(packet.clone());
        Ok(())
    }

    fn enqueue_write(&mut self, packet: &PacketRef) -> Result<(), PinError> {
        let mut log = self.handle.log();
        log.writes.push(packet.slot());
        log.queued.push_back(packet.clone());
        Ok(())
    }

    fn close(&mut self) {
        let mut log = self.handle.log();
        log.closed += 1;
        log.format = None;
        log.state = None;
        log.queued.clear();
    }

    fn latency(&self, _sample_rate: u32) -> u32 {
        self.latency
    }
}

pub struct TestDevice {
    pub rate: AtomicU32,
    pub clock_source: AtomicUsize,
    pub rate_calls: Mutex<Vec<u32>>,
    pub notifier: Mutex<Option<HwNotifier>>,
    /// Raise the clock-rate interrupt when reprogrammed, like a UAC2 clock.
    pub interrupt_on_rate: AtomicBool,
    pub refuse_rates: AtomicBool,
}

impl TestDevice {
    pub fn notifier(&self) -> HwNotifier {
        self.notifier
            .lock()
            .unwrap()
            .clone()
            .expect("driver registered no notifier")
    }
}

impl DeviceControl for TestDevice {
    fn current_sample_rate(&self) -> Result<u32, PinError> {
        Ok(self.rate.load(Ordering::SeqCst))
    }

    fn set_sample_rate(&self, rate: u32) -> Result<(), PinError> {
        self.rate_calls.lock().unwrap().push(rate);
        if self.refuse_rates.load(Ordering::SeqCst) {
            return Err(PinError::Io("clock rejected".to_string()));
        }
        self.rate.store(rate, Ordering::SeqCst);
        if self.interrupt_on_rate.load(Ordering::SeqCst) {
            self.notifier().clock_rate_changed.signal();
            std::thread::sleep(Duration::from_millis(50));
        }
        Ok(())
    }

    fn current_clock_source(&self) -> usize {
        self.clock_source.load(Ordering::SeqCst)
    }

    fn select_clock_source(&self, index: usize) -> Result<(), PinError> {
        self.clock_source.store(index, Ordering::SeqCst);
        Ok(())
    }

    fn register_notifier(&self, notifier: HwNotifier) {
        *self.notifier.lock().unwrap() = Some(notifier);
    }
}

#[derive(Debug, Clone)]
pub struct Switch {
    pub half: usize,
    pub info: Option<TimeInfo>,
    /// Whether any input buffer of the delivered half held non-zero data.
    pub input_nonzero: bool,
}

#[derive(Default)]
pub struct RecordingHost {
    pub time_info: bool,
    pub resync_answer: AtomicI64,
    pub buffers: Mutex<Vec<BufferInfo>>,
    pub switches: Mutex<Vec<Switch>>,
    pub messages: Mutex<Vec<HostMessage>>,
    pub rate_changes: Mutex<Vec<f64>>,
    /// Byte written into every output buffer of the half being handed over.
    pub output_fill: Mutex<u8>,
}

impl RecordingHost {
    pub fn new(time_info: bool) -> Arc<Self> {
        Arc::new(Self {
            time_info,
            ..Self::default()
        })
    }

    pub fn reset_requests(&self) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| **m == HostMessage::ResetRequest)
            .count()
    }

    pub fn switch_count(&self) -> usize {
        self.switches.lock().unwrap().len()
    }

    fn on_switch(&self, half: usize, info: Option<TimeInfo>) {
        let buffers = self.buffers.lock().unwrap();
        let input_nonzero = buffers
            .iter()
            .filter(|b| b.is_input)
            .any(|b| b.buffers[half].bytes().iter().any(|&x| x != 0));
        let fill = *self.output_fill.lock().unwrap();
        for b in buffers.iter().filter(|b| !b.is_input) {
            b.buffers[half].bytes().fill(fill);
        }
        self.switches.lock().unwrap().push(Switch {
            half,
            info,
            input_nonzero,
        });
    }
}

impl HostCallbacks for RecordingHost {
    fn buffer_switch(&self, index: usize, _direct_process: bool) {
        self.on_switch(index, None);
    }

    fn buffer_switch_time_info(&self, info: &TimeInfo, index: usize, _direct_process: bool) {
        self.on_switch(index, Some(*info));
    }

    fn sample_rate_did_change(&self, rate: f64) {
        self.rate_changes.lock().unwrap().push(rate);
    }

    fn message(&self, message: HostMessage) -> i64 {
        if !matches!(message, HostMessage::SelectorSupported(_)) {
            self.messages.lock().unwrap().push(message);
        }
        match message {
            HostMessage::SelectorSupported(MessageSelector::ResetRequest)
            | HostMessage::SelectorSupported(MessageSelector::ResyncRequest)
            | HostMessage::SelectorSupported(MessageSelector::SupportsTimeInfo) => 1,
            HostMessage::SupportsTimeInfo => self.time_info as i64,
            HostMessage::ResetRequest => 1,
            HostMessage::ResyncRequest => self.resync_answer.load(Ordering::SeqCst),
            _ => 0,
        }
    }
}

pub struct Rig {
    pub driver: Driver,
    pub device: Arc<TestDevice>,
    pub render: PinHandle,
    pub capture: PinHandle,
    pub with_capture: bool,
}

pub struct RigOptions {
    pub rates: Vec<u32>,
    pub initial_rate: u32,
    pub settings: Settings,
    pub options: DriverOptions,
    pub with_capture: bool,
    /// Replaces the in-memory store seeded with `settings`.
    pub store: Option<Box<dyn SettingsStore>>,
    pub panel: Option<Box<dyn ControlPanel>>,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            rates: vec![44_100, 48_000],
            initial_rate: 48_000,
            settings: Settings::default(),
            options: DriverOptions {
                realtime: false,
                ..DriverOptions::default()
            },
            with_capture: true,
            store: None,
            panel: None,
        }
    }
}

impl Rig {
    pub fn new() -> Self {
        Self::with(RigOptions::default())
    }

    pub fn with(opts: RigOptions) -> Self {
        let render = PinHandle::default();
        let capture = PinHandle::default();
        let with_capture = opts.with_capture;
        let pins = |handle: &PinHandle, name: &str, latency: u32| {
            DirectionCaps {
                rates: opts
                    .rates
                    .iter()
                    .map(|&rate| RateCaps {
                        sample_rate: rate,
                        supported: true,
                        pins: vec![PinCaps {
                            name: name.to_string(),
                            max_channels: 2,
                            pin: Box::new(ManualPin {
                                handle: handle.clone(),
                                latency,
                            }),
                        }],
                    })
                    .collect(),
            }
        };
        let caps = CapabilityTable {
            render: pins(&render, "Out", RENDER_LATENCY),
            capture: if opts.with_capture {
                pins(&capture, "In", CAPTURE_LATENCY)
            } else {
                DirectionCaps::default()
            },
            clock_sources: vec![
                ClockSourceCaps {
                    name: "Internal".to_string(),
                    input_group: None,
                },
                ClockSourceCaps {
                    name: "S/PDIF".to_string(),
                    input_group: Some(0),
                },
            ],
        };
        let device = Arc::new(TestDevice {
            rate: AtomicU32::new(opts.initial_rate),
            clock_source: AtomicUsize::new(0),
            rate_calls: Mutex::new(Vec::new()),
            notifier: Mutex::new(None),
            interrupt_on_rate: AtomicBool::new(false),
            refuse_rates: AtomicBool::new(false),
        });
        let store = opts.store.unwrap_or_else(|| {
            Box::new(MemorySettingsStore::with_device(DEVICE, opts.settings)) as Box<dyn SettingsStore>
        });
        let mut driver = Driver::new(
            DeviceDescription {
                name: DEVICE.to_string(),
                caps,
                control: device.clone(),
            },
            store,
            opts.options,
        );
        if let Some(panel) = opts.panel {
            driver = driver.with_control_panel(panel);
        }
        Self {
            driver,
            device,
            render,
            capture,
            with_capture,
        }
    }

    /// Init plus buffers for both stereo pairs.
    pub fn prepare(&mut self, frames: u32, host: &Arc<RecordingHost>) -> Vec<BufferInfo> {
        self.driver.init().unwrap();
        let requests = [
            BufferRequest::output(0),
            BufferRequest::output(1),
            BufferRequest::input(0),
            BufferRequest::input(1),
        ];
        let infos = self
            .driver
            .create_buffers(&requests, frames, host.clone())
            .unwrap();
        *host.buffers.lock().unwrap() = infos.clone();
        infos
    }

    /// Completes the next render and capture packet: one full cycle.
    pub fn cycle(&self) -> usize {
        let slot = self.render.complete_next(Direction::Render);
        if self.with_capture {
            let capture_slot = self.capture.complete_next(Direction::Capture);
            assert_eq!(slot, capture_slot);
        }
        slot
    }

    /// Runs `n` cycles, waiting for each buffer switch before the next one.
    pub fn run_cycles(&self, host: &RecordingHost, n: usize) {
        for _ in 0..n {
            let before = host.switch_count();
            self.cycle();
            wait_switches(host, before + 1);
        }
    }
}

pub fn wait_until(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

pub fn wait_switches(host: &RecordingHost, count: usize) {
    wait_until("buffer switches", Duration::from_secs(5), || {
        host.switch_count() >= count
    });
}
