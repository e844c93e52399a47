use crate::error::DriverResult;
use crate::hw::latency::Latencies;
use crate::resources::SampleBuffer;
use crate::sample::SampleType;
use crate::timing::BufferSizeRange;
use std::sync::Arc;

pub const SYSTEM_TIME_VALID: u32 = 1;
pub const SAMPLE_POSITION_VALID: u32 = 1 << 1;
pub const SAMPLE_RATE_VALID: u32 = 1 << 2;
pub const SPEED_VALID: u32 = 1 << 3;
pub const SAMPLE_RATE_CHANGED: u32 = 1 << 4;
pub const CLOCK_SOURCE_CHANGED: u32 = 1 << 5;

/// Protocol revision reported for [`MessageSelector::EngineVersion`].
pub const ENGINE_VERSION: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeInfo {
    pub speed: f64,
    pub system_time_ns: u64,
    pub sample_position: u64,
    pub sample_rate: f64,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageSelector {
    SelectorSupported,
    EngineVersion,
    ResetRequest,
    BufferSizeChange,
    ResyncRequest,
    LatenciesChanged,
    SupportsTimeInfo,
    SupportsTimeCode,
}

impl MessageSelector {
    pub fn code(self) -> u32 {
        match self {
            MessageSelector::SelectorSupported => 1,
            MessageSelector::EngineVersion => 2,
            MessageSelector::ResetRequest => 3,
            MessageSelector::BufferSizeChange => 4,
            MessageSelector::ResyncRequest => 5,
            MessageSelector::LatenciesChanged => 6,
            MessageSelector::SupportsTimeInfo => 7,
            MessageSelector::SupportsTimeCode => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMessage {
    SelectorSupported(MessageSelector),
    EngineVersion,
    ResetRequest,
    BufferSizeChange(u32),
    ResyncRequest,
    LatenciesChanged,
    SupportsTimeInfo,
    SupportsTimeCode,
}

impl HostMessage {
    pub fn selector(&self) -> MessageSelector {
        match self {
            HostMessage::SelectorSupported(_) => MessageSelector::SelectorSupported,
            HostMessage::EngineVersion => MessageSelector::EngineVersion,
            HostMessage::ResetRequest => MessageSelector::ResetRequest,
            HostMessage::BufferSizeChange(_) => MessageSelector::BufferSizeChange,
            HostMessage::ResyncRequest => MessageSelector::ResyncRequest,
            HostMessage::LatenciesChanged => MessageSelector::LatenciesChanged,
            HostMessage::SupportsTimeInfo => MessageSelector::SupportsTimeInfo,
            HostMessage::SupportsTimeCode => MessageSelector::SupportsTimeCode,
        }
    }
}

/// Callbacks the host registers at buffer creation. Called from the I/O
/// thread, so implementations must not block for long.
pub trait HostCallbacks: Send + Sync {
    /// Buffer half `index` of every input is filled and every output half
    /// `index` is to be written.
    fn buffer_switch(&self, index: usize, direct_process: bool);

    fn buffer_switch_time_info(&self, info: &TimeInfo, index: usize, direct_process: bool) {
        let _ = info;
        self.buffer_switch(index, direct_process);
    }

    fn sample_rate_did_change(&self, rate: f64);

    /// Returns the host's answer; 0 means "not supported".
    fn message(&self, message: HostMessage) -> i64;
}

/// True when the host answers 1 to a supported-selector query.
pub fn host_supports(host: &dyn HostCallbacks, selector: MessageSelector) -> bool {
    host.message(HostMessage::SelectorSupported(selector)) == 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelCounts {
    pub inputs: u32,
    pub outputs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel: u32,
    pub is_input: bool,
    pub is_active: bool,
    pub group: u32,
    pub sample_type: SampleType,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequest {
    pub is_input: bool,
    pub channel: u32,
}

impl BufferRequest {
    pub fn input(channel: u32) -> Self {
        Self {
            is_input: true,
            channel,
        }
    }

    pub fn output(channel: u32) -> Self {
        Self {
            is_input: false,
            channel,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferInfo {
    pub is_input: bool,
    pub channel: u32,
    pub buffers: [Arc<SampleBuffer>; 2],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockSource {
    pub index: usize,
    /// First channel of the input group carrying the clock, -1 if none.
    pub associated_channel: i32,
    pub associated_group: i32,
    pub is_current: bool,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplePosition {
    pub samples: u64,
    pub timestamp_ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFormat {
    Pcm,
    Dsd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureSelector {
    EnableTimeCodeRead,
    DisableTimeCodeRead,
    SetInputMonitor,
    Transport,
    SetInputGain,
    GetInputMeter,
    SetOutputGain,
    GetOutputMeter,
    CanInputMonitor,
    CanTimeInfo,
    CanTimeCode,
    CanTransport,
    CanInputGain,
    CanInputMeter,
    CanOutputGain,
    CanOutputMeter,
    OptionalOne,
    SetIoFormat(IoFormat),
    GetIoFormat,
    CanDoIoFormat(IoFormat),
    CanReportOverload,
    GetInternalBufferSamples,
    Unknown(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureReply {
    Success,
    IoFormat(IoFormat),
}

/// Operations a host performs on the driver.
pub trait HostDriver {
    fn init(&mut self) -> DriverResult<()>;
    fn driver_name(&self) -> String;
    fn driver_version(&self) -> u32;
    /// Text of the last failed operation, empty if none.
    fn error_message(&self) -> String;
    fn start(&mut self) -> DriverResult<()>;
    fn stop(&mut self) -> DriverResult<()>;
    fn channels(&self) -> DriverResult<ChannelCounts>;
    fn latencies(&self) -> DriverResult<Latencies>;
    fn buffer_size(&self) -> DriverResult<BufferSizeRange>;
    fn can_sample_rate(&self, rate: u32) -> DriverResult<()>;
    fn sample_rate(&self) -> DriverResult<u32>;
    fn set_sample_rate(&mut self, rate: u32) -> DriverResult<()>;
    fn clock_sources(&self) -> DriverResult<Vec<ClockSource>>;
    fn set_clock_source(&mut self, index: usize) -> DriverResult<()>;
    fn sample_position(&self) -> DriverResult<SamplePosition>;
    fn channel_info(&self, channel: u32, is_input: bool) -> DriverResult<ChannelInfo>;
    fn create_buffers(
        &mut self,
        requests: &[BufferRequest],
        buffer_size: u32,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> DriverResult<Vec<BufferInfo>>;
    fn dispose_buffers(&mut self) -> DriverResult<()>;
    fn control_panel(&mut self) -> DriverResult<()>;
    fn future(&mut self, selector: FutureSelector) -> DriverResult<FutureReply>;
    fn output_ready(&self) -> DriverResult<()>;
}
