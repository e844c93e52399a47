use super::pin::HardwarePin;

pub struct PinCaps {
    pub name: String,
    pub max_channels: u32,
    pub pin: Box<dyn HardwarePin>,
}

impl std::fmt::Debug for PinCaps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinCaps")
            .field("name", &self.name)
            .field("max_channels", &self.max_channels)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct RateCaps {
    pub sample_rate: u32,
    pub supported: bool,
    pub pins: Vec<PinCaps>,
}

#[derive(Debug, Default)]
pub struct DirectionCaps {
    pub rates: Vec<RateCaps>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockSourceCaps {
    pub name: String,
    /// Input pin (channel group) that carries this clock, if any.
    pub input_group: Option<usize>,
}

#[derive(Debug, Default)]
pub struct CapabilityTable {
    pub render: DirectionCaps,
    pub capture: DirectionCaps,
    pub clock_sources: Vec<ClockSourceCaps>,
}
