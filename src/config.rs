use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uacstream_engine::DriverOptions;
use uacstream_engine::hw::sim::SimDeviceConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// 0 streams until interrupted.
    pub seconds: u64,
    pub buffer_frames: Option<u32>,
    pub sample_rate: Option<u32>,
    pub tone_hz: f32,
    pub level: f32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            seconds: 10,
            buffer_frames: None,
            sample_rate: None,
            tone_hz: 440.0,
            level: 0.2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub device: SimDeviceConfig,
    pub driver: DriverOptions,
    pub stream: StreamConfig,
    pub settings_path: Option<PathBuf>,
}

impl DemoConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}
