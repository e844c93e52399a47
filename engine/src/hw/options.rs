use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    pub watchdog_interval_ms: u64,
    pub output_buffers: Option<usize>,
    pub resync_notify: bool,
    pub application: Option<String>,
    pub realtime: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: 2_000,
            output_buffers: None,
            resync_notify: true,
            application: None,
            realtime: true,
        }
    }
}

impl DriverOptions {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }
}
