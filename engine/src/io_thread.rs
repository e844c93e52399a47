use crate::error::DriverResult;
use crate::event::{Event, EventSet, Timer};
use crate::host::{
    SAMPLE_POSITION_VALID, SAMPLE_RATE_CHANGED, SAMPLE_RATE_VALID, SYSTEM_TIME_VALID, TimeInfo,
};
use crate::hw::pin::{Direction, PinState};
use crate::hw::thread::{RT_PRIORITY_IO, promote_current_thread};
use crate::packet::PACKET_RING_SIZE;
use crate::resources::decode_packet_event;
use crate::shared::{ABORT_EVENT, IoState, RESET_EVENT, START_EVENT, STOP_EVENT, Shared};
use crate::timing::system_time_nanos;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

pub const CONTROL_EVENT_COUNT: u32 = RESET_EVENT + 1;
const CONTROL_MASK: u128 = (1 << CONTROL_EVENT_COUNT) - 1;
const THREAD_NAME: &str = "uacstream-io";

/// Stream shape fixed at buffer creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSetup {
    pub sample_rate: u32,
    pub buffer_frames: u32,
    pub output_depth: usize,
}

pub struct IoThread {
    shared: Arc<Shared>,
    events: EventSet,
    transition: Event,
    watchdog: Timer,
    setup: StreamSetup,
    state: IoState,
    pin_masks: [[u32; PACKET_RING_SIZE]; 2],
    signal_masks: [u8; PACKET_RING_SIZE],
    active_pins: [u32; 2],
    active_signals: u8,
    packet_mask: u128,
    switch_count: u64,
    running_position: u64,
}

impl IoThread {
    pub fn new(
        shared: Arc<Shared>,
        events: EventSet,
        transition: Event,
        watchdog: Timer,
        setup: StreamSetup,
    ) -> Self {
        Self {
            shared,
            events,
            transition,
            watchdog,
            setup,
            state: IoState::Stopped,
            pin_masks: [[0; PACKET_RING_SIZE]; 2],
            signal_masks: [0; PACKET_RING_SIZE],
            active_pins: [0; 2],
            active_signals: 0,
            packet_mask: 0,
            switch_count: 0,
            running_position: 0,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        promote_current_thread(THREAD_NAME, RT_PRIORITY_IO, self.shared.options.realtime);
        self.shared.set_io_alive(true);
        loop {
            let mask = if self.state == IoState::Running {
                CONTROL_MASK | self.packet_mask
            } else {
                CONTROL_MASK
            };
            let bit = match self.events.wait(mask) {
                Ok(bit) => bit,
                Err(e) => {
                    error!("{} wait failed: {}", THREAD_NAME, e);
                    break;
                }
            };
            match bit {
                ABORT_EVENT => {
                    self.watchdog.cancel();
                    break;
                }
                START_EVENT => self.on_start(),
                STOP_EVENT => self.on_stop(),
                RESET_EVENT => self.on_reset(),
                bit => match decode_packet_event(bit) {
                    Some((direction, pin, slot)) => self.on_packet(direction, pin, slot),
                    None => warn!("{} woke on unknown event {}", THREAD_NAME, bit),
                },
            }
        }
        if self.state != IoState::Stopped {
            if let Ok(mut res) = self.shared.resources() {
                res.force_stop();
            }
            self.set_state(IoState::Stopped);
        }
        self.shared.set_io_alive(false);
        debug!("{} exited", THREAD_NAME);
    }

    fn set_state(&mut self, state: IoState) {
        self.state = state;
        self.shared.set_io_state(state);
    }

    fn on_start(&mut self) {
        if self.state == IoState::Stopped {
            match self.start_streaming() {
                Ok(()) => info!(
                    "streaming {} frames at {} Hz, {} output buffers",
                    self.setup.buffer_frames, self.setup.sample_rate, self.setup.output_depth
                ),
                Err(e) => {
                    error!("{} start failed: {}", THREAD_NAME, e);
                    if let Ok(mut res) = self.shared.resources() {
                        res.force_stop();
                    }
                    self.set_state(IoState::Stopped);
                }
            }
        }
        self.transition.signal();
        if self.state == IoState::Running {
            self.watchdog.arm(self.shared.options.watchdog_interval());
        }
    }

    fn start_streaming(&mut self) -> DriverResult<()> {
        let depth = self.setup.output_depth;
        let shared = self.shared.clone();
        let mut res = shared.resources()?;

        self.pin_masks = [[0; PACKET_RING_SIZE]; 2];
        self.signal_masks = [0; PACKET_RING_SIZE];
        self.active_signals = 0;
        for direction in Direction::ALL {
            let pins = res.active_pin_mask(direction);
            self.active_pins[direction.index()] = pins;
            if pins != 0 {
                self.active_signals |= direction.signal_bit();
            }
        }
        self.packet_mask = res.packet_event_mask();
        self.events.reset_mask(self.packet_mask);

        res.step_pins_to(PinState::Acquire)?;
        self.set_state(IoState::Acquired);
        res.step_pins_to(PinState::Pause)?;
        self.set_state(IoState::Paused);

        res.zero_channel_buffers();
        for slot in 0..depth {
            res.zero_packets(Direction::Render, slot);
            res.enqueue(Direction::Render, slot)?;
            res.enqueue(Direction::Capture, slot)?;
        }

        self.switch_count = 0;
        self.running_position = 0;
        self.shared.latch_position(0, system_time_nanos());
        self.shared.stats.restart(0, depth % PACKET_RING_SIZE);

        res.step_pins_to(PinState::Run)?;
        self.set_state(IoState::Running);
        Ok(())
    }

    fn on_stop(&mut self) {
        if self.state != IoState::Stopped {
            match self.shared.resources() {
                Ok(mut res) => {
                    if let Err(e) = res.step_pins_to(PinState::Stop) {
                        error!("{} stop failed: {}", THREAD_NAME, e);
                        res.force_stop();
                    }
                }
                Err(e) => error!("{} stop failed: {}", THREAD_NAME, e),
            }
            self.watchdog.cancel();
            self.set_state(IoState::Stopped);
            debug!("streaming stopped after {} buffer switches", self.switch_count);
        }
        self.transition.signal();
    }

    fn on_reset(&mut self) {
        self.shared.stats.record_reset();
        if self.state == IoState::Running {
            self.watchdog.arm(self.shared.options.watchdog_interval());
        } else {
            self.watchdog.cancel();
        }

        if let Some(rate) = self.shared.take_requested_rate() {
            let previous = self.shared.selected_rate();
            self.shared.select_rate(Some(rate));
            match self.shared.device.set_sample_rate(rate) {
                Ok(()) => info!("sample rate set to {} Hz", rate),
                Err(e) => {
                    self.shared.select_rate(previous);
                    error!("failed to set sample rate {} Hz: {}", rate, e);
                }
            }
        }

        let Some(host) = self.shared.host() else {
            return;
        };
        if self.shared.take_rate_change_pending() {
            let rate = self.shared.selected_rate().unwrap_or(self.setup.sample_rate);
            host.sample_rate_did_change(rate as f64);
        }
        self.shared.request_host_reset();
    }

    fn on_packet(&mut self, direction: Direction, pin: usize, slot: usize) {
        if self.state != IoState::Running {
            return;
        }
        let d = direction.index();
        self.pin_masks[d][slot] |= 1 << pin;
        if self.pin_masks[d][slot] == self.active_pins[d] {
            self.signal_masks[slot] |= direction.signal_bit();
        }
        if self.signal_masks[slot] == self.active_signals {
            if let Err(e) = self.buffer_switch(slot) {
                error!("{} buffer switch failed: {}", THREAD_NAME, e);
            }
            self.pin_masks[0][slot] = 0;
            self.pin_masks[1][slot] = 0;
            self.signal_masks[slot] = 0;
        }
        self.watchdog.arm(self.shared.options.watchdog_interval());
    }

    fn buffer_switch(&mut self, slot: usize) -> DriverResult<()> {
        let depth = self.setup.output_depth;
        let half = (self.switch_count % 2) as usize;
        let write_slot = (slot + depth) % PACKET_RING_SIZE;
        {
            let mut res = self.shared.resources()?;
            if self.switch_count >= depth as u64 {
                res.capture_to_channels(slot, half);
            }
            res.channels_to_render(write_slot, 1 - half);
            res.enqueue(Direction::Render, write_slot)?;
            res.enqueue(Direction::Capture, write_slot)?;
        }

        self.switch_count += 1;
        self.running_position += self.setup.buffer_frames as u64;
        let now = system_time_nanos();
        self.shared.latch_position(self.running_position, now);
        self.shared.stats.record_switch(slot, write_slot);

        if let Some(host) = self.shared.host() {
            if self.shared.host_time_info() {
                let mut flags = SYSTEM_TIME_VALID | SAMPLE_POSITION_VALID | SAMPLE_RATE_VALID;
                if self.shared.selected_rate() != Some(self.setup.sample_rate) {
                    flags |= SAMPLE_RATE_CHANGED;
                }
                let info = TimeInfo {
                    speed: 1.0,
                    system_time_ns: now,
                    sample_position: self.running_position,
                    sample_rate: self.setup.sample_rate as f64,
                    flags,
                };
                host.buffer_switch_time_info(&info, half, false);
            } else {
                host.buffer_switch(half, false);
            }
        }
        Ok(())
    }
}
