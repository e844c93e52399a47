use std::f32::consts::TAU;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::{info, warn};
use uacstream_engine::host::ENGINE_VERSION;
use uacstream_engine::{
    BufferInfo, HostCallbacks, HostMessage, MessageSelector, SampleFormat, TimeInfo,
};

struct Session {
    buffers: Vec<BufferInfo>,
    format: SampleFormat,
    sample_rate: f32,
    phase: f32,
}

/// A minimal host: writes a sine into every output channel, meters the
/// inputs, and remembers when the driver asked to be restarted.
pub struct DemoHost {
    tone_hz: f32,
    level: f32,
    session: Mutex<Option<Session>>,
    reset_requested: AtomicBool,
    switches: AtomicU64,
    input_peak: AtomicU32,
}

impl DemoHost {
    pub fn new(tone_hz: f32, level: f32) -> Self {
        Self {
            tone_hz,
            level,
            session: Mutex::new(None),
            reset_requested: AtomicBool::new(false),
            switches: AtomicU64::new(0),
            input_peak: AtomicU32::new(0),
        }
    }

    pub fn attach(&self, buffers: Vec<BufferInfo>, format: SampleFormat, sample_rate: u32) {
        if let Ok(mut session) = self.session.lock() {
            *session = Some(Session {
                buffers,
                format,
                sample_rate: sample_rate as f32,
                phase: 0.0,
            });
        }
    }

    pub fn detach(&self) {
        if let Ok(mut session) = self.session.lock() {
            *session = None;
        }
    }

    pub fn take_reset_request(&self) -> bool {
        self.reset_requested.swap(false, Ordering::AcqRel)
    }

    pub fn switches(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    /// Peak input level since the last call.
    pub fn take_input_peak(&self) -> f32 {
        f32::from_bits(self.input_peak.swap(0, Ordering::Relaxed))
    }

    fn process(&self, index: usize) {
        self.switches.fetch_add(1, Ordering::Relaxed);
        let Ok(mut guard) = self.session.try_lock() else {
            return;
        };
        let Some(session) = guard.as_mut() else {
            return;
        };
        let bytes = session.format.bytes();
        let step = TAU * self.tone_hz / session.sample_rate.max(1.0);

        let mut peak = f32::from_bits(self.input_peak.load(Ordering::Relaxed));
        for info in session.buffers.iter().filter(|b| b.is_input) {
            for sample in info.buffers[index].bytes().chunks_exact(bytes) {
                peak = peak.max(session.format.read_f32(sample).abs());
            }
        }
        self.input_peak.store(peak.to_bits(), Ordering::Relaxed);

        let mut end_phase = session.phase;
        for info in session.buffers.iter().filter(|b| !b.is_input) {
            let mut phase = session.phase;
            for sample in info.buffers[index].bytes().chunks_exact_mut(bytes) {
                session.format.write_f32(sample, phase.sin() * self.level);
                phase = (phase + step) % TAU;
            }
            end_phase = phase;
        }
        session.phase = end_phase;
    }
}

impl HostCallbacks for DemoHost {
    fn buffer_switch(&self, index: usize, _direct_process: bool) {
        self.process(index);
    }

    fn buffer_switch_time_info(&self, _info: &TimeInfo, index: usize, _direct_process: bool) {
        self.process(index);
    }

    fn sample_rate_did_change(&self, rate: f64) {
        info!("device now runs at {} Hz", rate);
        self.reset_requested.store(true, Ordering::Release);
    }

    fn message(&self, message: HostMessage) -> i64 {
        match message {
            HostMessage::SelectorSupported(selector) => matches!(
                selector,
                MessageSelector::EngineVersion
                    | MessageSelector::ResetRequest
                    | MessageSelector::ResyncRequest
                    | MessageSelector::LatenciesChanged
                    | MessageSelector::SupportsTimeInfo
            ) as i64,
            HostMessage::EngineVersion => ENGINE_VERSION,
            HostMessage::SupportsTimeInfo => 1,
            HostMessage::ResetRequest => {
                self.reset_requested.store(true, Ordering::Release);
                1
            }
            HostMessage::ResyncRequest => {
                warn!("driver lost sync, restarting");
                self.reset_requested.store(true, Ordering::Release);
                1
            }
            HostMessage::LatenciesChanged => 1,
            HostMessage::BufferSizeChange(_) | HostMessage::SupportsTimeCode => 0,
        }
    }
}
