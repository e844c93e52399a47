use crate::error::{DriverError, DriverResult};
use crate::event::{Event, EventSet};
use crate::host::{
    BufferInfo, BufferRequest, ChannelCounts, ChannelInfo, ClockSource, FutureReply,
    FutureSelector, HostCallbacks, HostDriver, HostMessage, IoFormat, SamplePosition,
};
use crate::hw::caps::{CapabilityTable, ClockSourceCaps};
use crate::hw::config;
use crate::hw::device::DeviceDescription;
use crate::hw::latency::{Latencies, stream_latencies};
use crate::hw::options::DriverOptions;
use crate::hw::pin::Direction;
use crate::hw::prefill::output_buffer_depth;
use crate::io_thread::{IoThread, StreamSetup};
use crate::hw_events::HwEventThread;
use crate::resources::ResourceManager;
use crate::settings::{ControlPanel, PanelContext, Settings, SettingsStore};
use crate::shared::{IoControl, IoState, Shared, StatsSnapshot};
use crate::timing::{BufferSizeRange, buffer_ms};
use crate::watchdog::Watchdog;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const TRANSITION_EVENT: u32 = 0;
const TRANSITION_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DriverState {
    Loaded,
    Initialized,
    Prepared,
    Running,
}

struct WorkerThread {
    label: &'static str,
    abort: Event,
    handle: JoinHandle<()>,
}

impl WorkerThread {
    fn spawn(
        label: &'static str,
        abort: Event,
        spawn: impl FnOnce() -> std::io::Result<JoinHandle<()>>,
    ) -> DriverResult<Self> {
        let handle = spawn().map_err(|e| {
            DriverError::HwMalfunction(format!("failed to start {} thread: {}", label, e))
        })?;
        Ok(Self {
            label,
            abort,
            handle,
        })
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn shutdown(self) {
        self.abort.signal();
        if self.handle.join().is_err() {
            error!("{} thread panicked", self.label);
        }
    }
}

pub struct Driver {
    shared: Arc<Shared>,
    state: DriverState,
    caps: Option<CapabilityTable>,
    clock_sources: Vec<ClockSourceCaps>,
    settings_store: Box<dyn SettingsStore>,
    settings: Settings,
    panel: Option<Box<dyn ControlPanel>>,
    application: Option<String>,
    transition_events: EventSet,
    transition: Event,
    io_control: Option<IoControl>,
    io: Option<WorkerThread>,
    watchdog: Option<WorkerThread>,
    hw_events: Option<WorkerThread>,
    setup: Option<StreamSetup>,
    last_error: Mutex<String>,
}

impl Driver {
    pub fn new(
        device: DeviceDescription,
        settings_store: Box<dyn SettingsStore>,
        options: DriverOptions,
    ) -> Self {
        let application = options.application.clone().or_else(current_executable);
        let shared = Shared::new(
            device.name,
            device.control,
            ResourceManager::default(),
            options,
        );
        let transition_events = EventSet::new();
        let transition = transition_events.event(TRANSITION_EVENT);
        Self {
            shared: Arc::new(shared),
            state: DriverState::Loaded,
            caps: Some(device.caps),
            clock_sources: Vec::new(),
            settings_store,
            settings: Settings::default(),
            panel: None,
            application,
            transition_events,
            transition,
            io_control: None,
            io: None,
            watchdog: None,
            hw_events: None,
            setup: None,
            last_error: Mutex::new(String::new()),
        }
    }

    pub fn with_control_panel(mut self, panel: Box<dyn ControlPanel>) -> Self {
        self.panel = Some(panel);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Render buffers kept queued ahead of playback, once buffers exist.
    pub fn output_depth(&self) -> Option<usize> {
        self.setup.map(|s| s.output_depth)
    }

    fn record<T>(&self, result: DriverResult<T>) -> DriverResult<T> {
        if let (Err(e), Ok(mut last)) = (&result, self.last_error.lock()) {
            *last = e.to_string();
        }
        result
    }

    fn require_initialized(&self) -> DriverResult<()> {
        if self.state == DriverState::Loaded {
            Err(DriverError::NotPresent)
        } else {
            Ok(())
        }
    }

    fn selected_rate(&self) -> DriverResult<u32> {
        self.shared.selected_rate().ok_or(DriverError::NoClock)
    }

    /// Rate used for queries before the host picked one.
    fn query_rate(&self) -> DriverResult<u32> {
        if let Some(rate) = self.shared.selected_rate() {
            return Ok(rate);
        }
        self.shared
            .resources()?
            .rates()
            .first()
            .copied()
            .ok_or(DriverError::NoClock)
    }

    fn configured_depth(&self) -> Option<usize> {
        config::env_usize(config::OUTPUT_BUFFERS_ENV)
            .or(self.shared.options.output_buffers)
            .or(self.settings.output_buffers)
    }

    fn application(&self) -> Option<&str> {
        self.application.as_deref()
    }

    fn wait_transition(&self) -> DriverResult<()> {
        loop {
            match self
                .transition_events
                .wait_timeout(self.transition.mask(), TRANSITION_POLL)
            {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => {
                    if self.io.as_ref().is_none_or(WorkerThread::is_finished) {
                        return Err(DriverError::HwMalfunction(
                            "I/O thread is not running".to_string(),
                        ));
                    }
                }
                Err(e) => return Err(DriverError::HwMalfunction(e.to_string())),
            }
        }
    }

    fn initialize(&mut self) -> DriverResult<()> {
        let mut caps = self.caps.take().ok_or(DriverError::InvalidMode)?;
        self.clock_sources = std::mem::take(&mut caps.clock_sources);
        let manager = ResourceManager::new(caps);
        if !manager.has_pins(Direction::Render) && !manager.has_pins(Direction::Capture) {
            warn!("{} exposes no streaming pins", self.shared.device_name);
        }
        *self.shared.resources()? = manager;

        self.settings = self
            .settings_store
            .load(&self.shared.device_name, self.application())
            .unwrap_or_else(|e| {
                warn!("{} settings not loaded: {}", self.shared.device_name, e);
                Settings::default()
            });

        match self.shared.device.current_sample_rate() {
            Ok(rate) if self.shared.resources()?.supports_rate(rate) => {
                self.shared.select_rate(Some(rate));
            }
            Ok(rate) => {
                warn!(
                    "{} runs at unsupported rate {} Hz",
                    self.shared.device_name, rate
                );
                self.shared.select_rate(None);
            }
            Err(e) => {
                warn!("{} clock rate unreadable: {}", self.shared.device_name, e);
                self.shared.select_rate(None);
            }
        }

        let hw_events = HwEventThread::new(self.shared.clone());
        self.shared.device.register_notifier(hw_events.notifier());
        let abort = hw_events.abort_event();
        self.hw_events = Some(WorkerThread::spawn("hardware event", abort, move || {
            hw_events.spawn()
        })?);

        self.state = DriverState::Initialized;
        info!(
            "{} initialized, sample rate {:?}",
            self.shared.device_name,
            self.shared.selected_rate()
        );
        Ok(())
    }

    fn prepare(
        &mut self,
        requests: &[BufferRequest],
        buffer_size: u32,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> DriverResult<Vec<BufferInfo>> {
        let rate = self.shared.selected_rate().ok_or(DriverError::InvalidMode)?;
        let counts = self.channel_counts(rate)?;
        if counts.inputs == 0 && counts.outputs == 0 {
            return Err(DriverError::NotPresent);
        }
        let mut seen = HashSet::new();
        for request in requests {
            let limit = if request.is_input {
                counts.inputs
            } else {
                counts.outputs
            };
            if request.channel >= limit {
                return Err(DriverError::InvalidMode);
            }
            if !seen.insert((request.is_input, request.channel)) {
                return Err(DriverError::InvalidParameter);
            }
        }
        let range = BufferSizeRange::for_rate(rate, self.settings.buffer_size_100ns);
        if !range.contains(buffer_size) {
            return Err(DriverError::InvalidMode);
        }

        let time_info = callbacks.message(HostMessage::SupportsTimeInfo) == 1;
        let format = self.settings.sample_format();
        let output_depth = output_buffer_depth(buffer_ms(rate, buffer_size), self.configured_depth());
        let io_events = EventSet::new();

        let infos = {
            let mut res = self.shared.resources()?;
            for direction in Direction::ALL {
                let channels: Vec<u32> = requests
                    .iter()
                    .filter(|r| r.is_input == direction.is_input())
                    .map(|r| r.channel)
                    .collect();
                if !channels.is_empty() {
                    res.allocate(direction, rate, &channels, buffer_size, format, &io_events)?;
                }
            }
            requests
                .iter()
                .map(|request| {
                    let direction = if request.is_input {
                        Direction::Capture
                    } else {
                        Direction::Render
                    };
                    res.channels(direction)
                        .iter()
                        .find(|c| c.channel == request.channel)
                        .map(|c| BufferInfo {
                            is_input: request.is_input,
                            channel: request.channel,
                            buffers: c.buffers.clone(),
                        })
                        .ok_or(DriverError::InvalidMode)
                })
                .collect::<DriverResult<Vec<_>>>()?
        };

        self.shared.set_host(Some(callbacks), time_info);
        self.shared.set_buffers_exist(true);
        let setup = StreamSetup {
            sample_rate: rate,
            buffer_frames: buffer_size,
            output_depth,
        };
        self.setup = Some(setup);

        let watchdog = Watchdog::new(self.shared.clone());
        let timer = watchdog.timer();
        let abort = watchdog.abort_event();
        self.watchdog = Some(WorkerThread::spawn("watchdog", abort, move || {
            watchdog.spawn()
        })?);

        let control = IoControl::new(&io_events);
        self.transition.reset();
        let io = IoThread::new(
            self.shared.clone(),
            io_events,
            self.transition.clone(),
            timer,
            setup,
        );
        self.io = Some(WorkerThread::spawn("I/O", control.abort.clone(), move || {
            io.spawn()
        })?);
        self.shared.set_io_control(Some(control.clone()));
        self.io_control = Some(control);

        info!(
            "{} buffers created: {} channels, {} frames at {} Hz, {}-bit, {} output buffers",
            self.shared.device_name,
            infos.len(),
            buffer_size,
            rate,
            format.bits(),
            output_depth
        );
        Ok(infos)
    }

    fn release_buffers(&mut self) {
        self.shared.set_io_control(None);
        self.io_control = None;
        if let Some(io) = self.io.take() {
            io.shutdown();
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.shutdown();
        }
        match self.shared.resources() {
            Ok(mut res) => res.free_all(),
            Err(e) => error!("{} buffers not freed: {}", self.shared.device_name, e),
        }
        self.shared.set_host(None, false);
        self.shared.set_buffers_exist(false);
        self.shared.set_io_state(IoState::Stopped);
        self.shared.take_requested_rate();
        self.shared.take_rate_change_pending();
        self.setup = None;
    }

    fn channel_counts(&self, rate: u32) -> DriverResult<ChannelCounts> {
        let res = self.shared.resources()?;
        Ok(ChannelCounts {
            inputs: res.channel_count(Direction::Capture, rate),
            outputs: res.channel_count(Direction::Render, rate),
        })
    }
}

impl HostDriver for Driver {
    fn init(&mut self) -> DriverResult<()> {
        if self.state != DriverState::Loaded {
            return Ok(());
        }
        let result = self.initialize();
        self.record(result)
    }

    fn driver_name(&self) -> String {
        self.shared.device_name.clone()
    }

    fn driver_version(&self) -> u32 {
        let part = |s: &str| s.parse::<u32>().unwrap_or(0);
        part(env!("CARGO_PKG_VERSION_MAJOR")) * 10_000
            + part(env!("CARGO_PKG_VERSION_MINOR")) * 100
            + part(env!("CARGO_PKG_VERSION_PATCH"))
    }

    fn error_message(&self) -> String {
        self.last_error
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    fn start(&mut self) -> DriverResult<()> {
        let result = match self.state {
            DriverState::Running => return Ok(()),
            DriverState::Prepared => self.start_stream(),
            _ => Err(DriverError::InvalidMode),
        };
        self.record(result)
    }

    fn stop(&mut self) -> DriverResult<()> {
        let result = match self.state {
            DriverState::Prepared => return Ok(()),
            DriverState::Running => {
                let result = match &self.io_control {
                    Some(control) => {
                        self.transition.reset();
                        control.stop.signal();
                        self.wait_transition()
                    }
                    None => Err(DriverError::InvalidMode),
                };
                self.state = DriverState::Prepared;
                result
            }
            _ => Err(DriverError::InvalidMode),
        };
        self.record(result)
    }

    fn channels(&self) -> DriverResult<ChannelCounts> {
        self.require_initialized()?;
        self.channel_counts(self.query_rate()?)
    }

    fn latencies(&self) -> DriverResult<Latencies> {
        self.require_initialized()?;
        let rate = self.query_rate()?;
        let (frames, depth) = match self.setup {
            Some(setup) => (setup.buffer_frames, setup.output_depth),
            None => {
                let frames =
                    BufferSizeRange::for_rate(rate, self.settings.buffer_size_100ns).preferred;
                (
                    frames,
                    output_buffer_depth(buffer_ms(rate, frames), self.configured_depth()),
                )
            }
        };
        let res = self.shared.resources()?;
        Ok(stream_latencies(
            frames,
            depth,
            res.hw_latency(Direction::Capture, rate),
            res.hw_latency(Direction::Render, rate),
        ))
    }

    fn buffer_size(&self) -> DriverResult<BufferSizeRange> {
        self.require_initialized()?;
        Ok(BufferSizeRange::for_rate(
            self.query_rate()?,
            self.settings.buffer_size_100ns,
        ))
    }

    fn can_sample_rate(&self, rate: u32) -> DriverResult<()> {
        self.require_initialized()?;
        if self.shared.resources()?.supports_rate(rate) {
            Ok(())
        } else {
            Err(DriverError::NoClock)
        }
    }

    fn sample_rate(&self) -> DriverResult<u32> {
        self.require_initialized()?;
        self.selected_rate()
    }

    fn set_sample_rate(&mut self, rate: u32) -> DriverResult<()> {
        let result = self.change_sample_rate(rate);
        self.record(result)
    }

    fn clock_sources(&self) -> DriverResult<Vec<ClockSource>> {
        self.require_initialized()?;
        let current = self.shared.device.current_clock_source();
        if self.clock_sources.is_empty() {
            return Ok(vec![ClockSource {
                index: 0,
                associated_channel: -1,
                associated_group: -1,
                is_current: true,
                name: "Internal".to_string(),
            }]);
        }
        let res = self.shared.resources()?;
        let range = self
            .query_rate()
            .ok()
            .and_then(|rate| res.range(Direction::Capture, rate));
        Ok(self
            .clock_sources
            .iter()
            .enumerate()
            .map(|(index, source)| {
                let first_channel = source
                    .input_group
                    .and_then(|g| range.and_then(|r| r.pins.get(g)))
                    .map(|pin| pin.first_channel as i32);
                ClockSource {
                    index,
                    associated_channel: first_channel.unwrap_or(-1),
                    associated_group: match (source.input_group, first_channel) {
                        (Some(group), Some(_)) => group as i32,
                        _ => -1,
                    },
                    is_current: index == current,
                    name: source.name.clone(),
                }
            })
            .collect())
    }

    fn set_clock_source(&mut self, index: usize) -> DriverResult<()> {
        let result = self.change_clock_source(index);
        self.record(result)
    }

    fn sample_position(&self) -> DriverResult<SamplePosition> {
        match self.state {
            DriverState::Prepared | DriverState::Running => Ok(self.shared.position()),
            _ => Err(DriverError::NotPresent),
        }
    }

    fn channel_info(&self, channel: u32, is_input: bool) -> DriverResult<ChannelInfo> {
        self.require_initialized()?;
        let rate = self.query_rate()?;
        let direction = if is_input {
            Direction::Capture
        } else {
            Direction::Render
        };
        let res = self.shared.resources()?;
        let range = res
            .range(direction, rate)
            .filter(|r| r.supported)
            .ok_or(DriverError::NotPresent)?;
        let (pin, index) = range.locate(channel).ok_or(DriverError::InvalidParameter)?;
        let format = res
            .binding(direction)
            .map(|b| b.format)
            .unwrap_or_else(|| self.settings.sample_format());
        Ok(ChannelInfo {
            channel,
            is_input,
            is_active: res.is_channel_active(direction, channel),
            group: pin as u32,
            sample_type: format.sample_type(),
            name: format!("{} {}", range.pins[pin].name, index + 1),
        })
    }

    fn create_buffers(
        &mut self,
        requests: &[BufferRequest],
        buffer_size: u32,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> DriverResult<Vec<BufferInfo>> {
        if self.state != DriverState::Initialized {
            return self.record(Err(DriverError::InvalidMode));
        }
        match self.prepare(requests, buffer_size, callbacks) {
            Ok(infos) => {
                self.state = DriverState::Prepared;
                Ok(infos)
            }
            Err(e) => {
                error!("{} buffer creation failed: {}", self.shared.device_name, e);
                self.release_buffers();
                self.record(Err(e))
            }
        }
    }

    fn dispose_buffers(&mut self) -> DriverResult<()> {
        match self.state {
            DriverState::Loaded => return self.record(Err(DriverError::InvalidMode)),
            DriverState::Initialized => return Ok(()),
            DriverState::Running => {
                if let Err(e) = self.stop() {
                    warn!("{} stop before dispose failed: {}", self.shared.device_name, e);
                }
            }
            DriverState::Prepared => {}
        }
        self.release_buffers();
        self.state = DriverState::Initialized;
        debug!("{} buffers disposed", self.shared.device_name);
        Ok(())
    }

    fn control_panel(&mut self) -> DriverResult<()> {
        if self.panel.is_none() {
            return self.record(Err(DriverError::NotPresent));
        }
        let context = PanelContext {
            device: self.shared.device_name.clone(),
            application: self.application.clone(),
            settings: self.settings.clone(),
            sample_rate: self.shared.selected_rate(),
            streaming: self.state == DriverState::Running,
        };
        let Some(updated) = self.panel.as_mut().and_then(|p| p.open(&context)) else {
            return Ok(());
        };
        if updated == self.settings {
            return Ok(());
        }
        let saved = self
            .settings_store
            .save(&self.shared.device_name, self.application.as_deref(), &updated);
        self.record(saved)?;
        let reset = self.settings.requires_reset(&updated) && self.shared.buffers_exist();
        self.settings = updated;
        if reset {
            info!("{} settings changed, requesting reset", self.shared.device_name);
            self.shared.post_reset();
        }
        Ok(())
    }

    fn future(&mut self, selector: FutureSelector) -> DriverResult<FutureReply> {
        match selector {
            FutureSelector::CanTimeInfo
            | FutureSelector::CanDoIoFormat(IoFormat::Pcm)
            | FutureSelector::SetIoFormat(IoFormat::Pcm) => Ok(FutureReply::Success),
            FutureSelector::GetIoFormat => Ok(FutureReply::IoFormat(IoFormat::Pcm)),
            FutureSelector::Unknown(_) => Err(DriverError::InvalidParameter),
            _ => Err(DriverError::NotPresent),
        }
    }

    fn output_ready(&self) -> DriverResult<()> {
        Err(DriverError::NotPresent)
    }
}

impl Driver {
    fn start_stream(&mut self) -> DriverResult<()> {
        if !self.shared.resources()?.has_channels() {
            return Err(DriverError::NotPresent);
        }
        let control = self.io_control.as_ref().ok_or(DriverError::InvalidMode)?;
        self.transition.reset();
        control.start.signal();
        self.wait_transition()?;
        if self.shared.io_state() != IoState::Running {
            return Err(DriverError::HwMalfunction(
                "pins did not reach the run state".to_string(),
            ));
        }
        self.state = DriverState::Running;
        Ok(())
    }

    fn change_sample_rate(&mut self, rate: u32) -> DriverResult<()> {
        if self.state == DriverState::Loaded {
            return Err(DriverError::NotPresent);
        }
        if !self.shared.resources()?.supports_rate(rate) {
            return Err(DriverError::NoClock);
        }
        let previous = self.shared.selected_rate();
        if previous == Some(rate) {
            if let Some(dropped) = self.shared.take_requested_rate() {
                debug!("pending {} Hz request dropped, {} Hz stays", dropped, rate);
            }
            return Ok(());
        }
        if self.shared.buffers_exist() {
            debug!("sample rate {} Hz requested while buffers exist", rate);
            self.shared.request_rate(rate);
            self.shared.post_reset();
        } else {
            self.shared.select_rate(Some(rate));
            if let Err(e) = self.shared.device.set_sample_rate(rate) {
                self.shared.select_rate(previous);
                return Err(e.into());
            }
            info!("{} sample rate set to {} Hz", self.shared.device_name, rate);
        }
        Ok(())
    }

    fn change_clock_source(&mut self, index: usize) -> DriverResult<()> {
        self.require_initialized()?;
        if self.clock_sources.is_empty() && index == 0 {
            return Ok(());
        }
        let source = self
            .clock_sources
            .get(index)
            .ok_or(DriverError::NotPresent)?;
        if self.shared.device.current_clock_source() == index {
            return Ok(());
        }
        if let Some(group) = source.input_group
            && self.shared.buffers_exist()
            && self
                .shared
                .resources()?
                .is_group_active(Direction::Capture, group)
        {
            return Err(DriverError::InvalidMode);
        }
        self.shared.device.select_clock_source(index)?;
        info!(
            "{} clock source set to {}",
            self.shared.device_name, source.name
        );
        Ok(())
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if self.state >= DriverState::Prepared {
            let _ = self.dispose_buffers();
        }
        if let Some(hw_events) = self.hw_events.take() {
            hw_events.shutdown();
        }
    }
}

fn current_executable() -> Option<String> {
    std::env::current_exe()
        .ok()?
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
}
