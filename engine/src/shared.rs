use crate::error::{DriverError, DriverResult};
use crate::event::{Event, EventSet};
use crate::host::{HostCallbacks, HostMessage, MessageSelector, SamplePosition, host_supports};
use crate::hw::device::DeviceControl;
use crate::hw::options::DriverOptions;
use crate::resources::ResourceManager;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

pub const ABORT_EVENT: u32 = 0;
pub const START_EVENT: u32 = 1;
pub const STOP_EVENT: u32 = 2;
pub const RESET_EVENT: u32 = 3;

/// Control events of the I/O thread's event set.
#[derive(Debug, Clone)]
pub struct IoControl {
    pub abort: Event,
    pub start: Event,
    pub stop: Event,
    pub reset: Event,
}

impl IoControl {
    pub fn new(events: &EventSet) -> Self {
        Self {
            abort: events.event(ABORT_EVENT),
            start: events.event(START_EVENT),
            stop: events.event(STOP_EVENT),
            reset: events.event(RESET_EVENT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IoState {
    Stopped,
    Acquired,
    Paused,
    Running,
}

impl IoState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => IoState::Acquired,
            2 => IoState::Paused,
            3 => IoState::Running,
            _ => IoState::Stopped,
        }
    }
}

#[derive(Debug, Default)]
pub struct StreamStats {
    buffer_switches: AtomicU64,
    read_slot: AtomicUsize,
    write_slot: AtomicUsize,
    resets: AtomicU64,
    watchdog_resets: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub buffer_switches: u64,
    pub read_slot: usize,
    pub write_slot: usize,
    pub resets: u64,
    pub watchdog_resets: u64,
}

impl StreamStats {
    pub fn record_switch(&self, read_slot: usize, write_slot: usize) {
        self.read_slot.store(read_slot, Ordering::Relaxed);
        self.write_slot.store(write_slot, Ordering::Relaxed);
        self.buffer_switches.fetch_add(1, Ordering::Release);
    }

    pub fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watchdog_reset(&self) {
        self.watchdog_resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Called on every transition into Running.
    pub fn restart(&self, read_slot: usize, write_slot: usize) {
        self.read_slot.store(read_slot, Ordering::Relaxed);
        self.write_slot.store(write_slot, Ordering::Relaxed);
        self.buffer_switches.store(0, Ordering::Release);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            buffer_switches: self.buffer_switches.load(Ordering::Acquire),
            read_slot: self.read_slot.load(Ordering::Relaxed),
            write_slot: self.write_slot.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            watchdog_resets: self.watchdog_resets.load(Ordering::Relaxed),
        }
    }
}

/// State shared by the driver and its threads.
pub struct Shared {
    pub device_name: String,
    pub device: Arc<dyn DeviceControl>,
    pub options: DriverOptions,
    pub stats: StreamStats,
    resources: Mutex<ResourceManager>,
    selected_rate: AtomicU32,
    requested_rate: AtomicU32,
    rate_change_pending: AtomicBool,
    buffers_exist: AtomicBool,
    io_state: AtomicU8,
    io_alive: AtomicBool,
    position: Mutex<SamplePosition>,
    host: Mutex<Option<Arc<dyn HostCallbacks>>>,
    host_time_info: AtomicBool,
    io_control: Mutex<Option<IoControl>>,
}

impl Shared {
    pub fn new(
        device_name: String,
        device: Arc<dyn DeviceControl>,
        resources: ResourceManager,
        options: DriverOptions,
    ) -> Self {
        Self {
            device_name,
            device,
            options,
            stats: StreamStats::default(),
            resources: Mutex::new(resources),
            selected_rate: AtomicU32::new(0),
            requested_rate: AtomicU32::new(0),
            rate_change_pending: AtomicBool::new(false),
            buffers_exist: AtomicBool::new(false),
            io_state: AtomicU8::new(IoState::Stopped as u8),
            io_alive: AtomicBool::new(false),
            position: Mutex::new(SamplePosition::default()),
            host: Mutex::new(None),
            host_time_info: AtomicBool::new(false),
            io_control: Mutex::new(None),
        }
    }

    pub fn resources(&self) -> DriverResult<MutexGuard<'_, ResourceManager>> {
        self.resources
            .lock()
            .map_err(|_| DriverError::HwMalfunction("resource lock poisoned".to_string()))
    }

    /// Currently selected sample rate, `None` when no range is selected.
    pub fn selected_rate(&self) -> Option<u32> {
        match self.selected_rate.load(Ordering::Acquire) {
            0 => None,
            rate => Some(rate),
        }
    }

    pub fn select_rate(&self, rate: Option<u32>) {
        self.selected_rate
            .store(rate.unwrap_or(0), Ordering::Release);
    }

    pub fn request_rate(&self, rate: u32) {
        self.requested_rate.store(rate, Ordering::Release);
    }

    pub fn take_requested_rate(&self) -> Option<u32> {
        match self.requested_rate.swap(0, Ordering::AcqRel) {
            0 => None,
            rate => Some(rate),
        }
    }

    pub fn set_rate_change_pending(&self) {
        self.rate_change_pending.store(true, Ordering::Release);
    }

    pub fn take_rate_change_pending(&self) -> bool {
        self.rate_change_pending.swap(false, Ordering::AcqRel)
    }

    pub fn buffers_exist(&self) -> bool {
        self.buffers_exist.load(Ordering::Acquire)
    }

    pub fn set_buffers_exist(&self, exist: bool) {
        self.buffers_exist.store(exist, Ordering::Release);
    }

    pub fn io_state(&self) -> IoState {
        IoState::from_u8(self.io_state.load(Ordering::Acquire))
    }

    pub fn set_io_state(&self, state: IoState) {
        self.io_state.store(state as u8, Ordering::Release);
    }

    pub fn io_alive(&self) -> bool {
        self.io_alive.load(Ordering::Acquire)
    }

    pub fn set_io_alive(&self, alive: bool) {
        self.io_alive.store(alive, Ordering::Release);
    }

    pub fn position(&self) -> SamplePosition {
        self.position.lock().map(|p| *p).unwrap_or_default()
    }

    pub fn latch_position(&self, samples: u64, timestamp_ns: u64) {
        if let Ok(mut p) = self.position.lock() {
            *p = SamplePosition {
                samples,
                timestamp_ns,
            };
        }
    }

    pub fn host(&self) -> Option<Arc<dyn HostCallbacks>> {
        self.host.lock().ok().and_then(|h| h.clone())
    }

    pub fn set_host(&self, host: Option<Arc<dyn HostCallbacks>>, time_info: bool) {
        if let Ok(mut h) = self.host.lock() {
            *h = host;
        }
        self.host_time_info.store(time_info, Ordering::Release);
    }

    pub fn host_time_info(&self) -> bool {
        self.host_time_info.load(Ordering::Acquire)
    }

    pub fn set_io_control(&self, control: Option<IoControl>) {
        if let Ok(mut c) = self.io_control.lock() {
            *c = control;
        }
    }

    /// Posts a Reset to the I/O thread; false when no I/O thread exists.
    pub fn post_reset(&self) -> bool {
        match self.io_control.lock().ok().and_then(|c| c.clone()) {
            Some(control) => {
                control.reset.signal();
                true
            }
            None => false,
        }
    }

    /// Asks the host to stop and restart the stream.
    pub fn request_host_reset(&self) {
        let Some(host) = self.host() else {
            return;
        };
        if host_supports(host.as_ref(), MessageSelector::ResetRequest) {
            host.message(HostMessage::ResetRequest);
        } else {
            warn!("host does not accept reset requests");
        }
    }
}
