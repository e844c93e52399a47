use super::caps::CapabilityTable;
use crate::error::PinError;
use crate::event::Event;
use std::sync::Arc;

/// Events a device raises on its own. Capabilities the device lacks are
/// simply never signaled.
#[derive(Debug, Clone)]
pub struct HwNotifier {
    pub clock_rate_changed: Event,
    pub clock_source_changed: Event,
    pub resync_requested: Event,
}

/// Device-wide controls that do not belong to a single pin.
pub trait DeviceControl: Send + Sync {
    fn current_sample_rate(&self) -> Result<u32, PinError>;
    fn set_sample_rate(&self, rate: u32) -> Result<(), PinError>;
    fn current_clock_source(&self) -> usize;
    fn select_clock_source(&self, index: usize) -> Result<(), PinError>;
    /// Hands the device the events it signals on clock and resync changes.
    fn register_notifier(&self, notifier: HwNotifier);
}

/// Everything the driver needs to know about one enumerated device.
pub struct DeviceDescription {
    pub name: String,
    pub caps: CapabilityTable,
    pub control: Arc<dyn DeviceControl>,
}
