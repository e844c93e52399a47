pub mod driver;
pub mod error;
pub mod event;
pub mod host;
pub mod hw;
mod hw_events;
mod io_thread;
pub mod mutex;
pub mod packet;
pub mod resources;
pub mod sample;
pub mod settings;
mod shared;
pub mod timing;
mod watchdog;

pub use driver::{Driver, DriverState};
pub use error::{DriverError, DriverResult, PinError};
pub use host::{
    BufferInfo, BufferRequest, ChannelCounts, ChannelInfo, ClockSource, FutureReply,
    FutureSelector, HostCallbacks, HostDriver, HostMessage, IoFormat, MessageSelector,
    SamplePosition, TimeInfo,
};
pub use hw::caps::{CapabilityTable, ClockSourceCaps, DirectionCaps, PinCaps, RateCaps};
pub use hw::device::{DeviceControl, DeviceDescription, HwNotifier};
pub use hw::latency::Latencies;
pub use hw::options::DriverOptions;
pub use hw::pin::{Direction, HardwarePin, PinFormat, PinState};
pub use packet::{DataPacket, PACKET_RING_SIZE, PacketRef};
pub use sample::{SampleFormat, SampleType};
pub use settings::{
    ControlPanel, MemorySettingsStore, PanelContext, Settings, SettingsStore, TomlSettingsStore,
};
pub use shared::StatsSnapshot;
pub use timing::BufferSizeRange;
