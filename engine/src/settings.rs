use crate::error::DriverResult;
use crate::sample::SampleFormat;
use crate::timing::DEFAULT_BUFFER_SIZE_100NS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Preferred buffer duration in 100 ns units.
    pub buffer_size_100ns: u32,
    pub bit_depth: u32,
    pub per_application: bool,
    pub output_buffers: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            buffer_size_100ns: DEFAULT_BUFFER_SIZE_100NS,
            bit_depth: 24,
            per_application: false,
            output_buffers: None,
        }
    }
}

impl Settings {
    pub fn sample_format(&self) -> SampleFormat {
        SampleFormat::from_bits(self.bit_depth).unwrap_or_else(|| {
            warn!("unsupported bit depth {}, using 24", self.bit_depth);
            SampleFormat::Int24
        })
    }

    /// True when a change from `self` to `other` invalidates existing buffers.
    pub fn requires_reset(&self, other: &Settings) -> bool {
        self.buffer_size_100ns != other.buffer_size_100ns
            || self.bit_depth != other.bit_depth
            || self.output_buffers != other.output_buffers
    }
}

pub trait SettingsStore: Send {
    fn load(&self, device: &str, application: Option<&str>) -> DriverResult<Settings>;
    fn save(
        &mut self,
        device: &str,
        application: Option<&str>,
        settings: &Settings,
    ) -> DriverResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct DeviceEntry {
    settings: Settings,
    applications: BTreeMap<String, Settings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct SettingsFile {
    devices: BTreeMap<String, DeviceEntry>,
}

impl SettingsFile {
    fn lookup(&self, device: &str, application: Option<&str>) -> Settings {
        let Some(entry) = self.devices.get(device) else {
            return Settings::default();
        };
        if entry.settings.per_application
            && let Some(app) = application.and_then(|a| entry.applications.get(a))
        {
            return Settings {
                per_application: true,
                ..app.clone()
            };
        }
        entry.settings.clone()
    }

    fn store(&mut self, device: &str, application: Option<&str>, settings: &Settings) {
        let entry = self.devices.entry(device.to_string()).or_default();
        match application {
            Some(app) if settings.per_application => {
                entry.settings.per_application = true;
                entry.applications.insert(app.to_string(), settings.clone());
            }
            _ => entry.settings = settings.clone(),
        }
    }
}

/// Settings kept in a TOML file; a missing file reads as defaults.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> DriverResult<SettingsFile> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SettingsFile::default()),
            Err(e) => Err(e.into()),
        }
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self, device: &str, application: Option<&str>) -> DriverResult<Settings> {
        Ok(self.read()?.lookup(device, application))
    }

    fn save(
        &mut self,
        device: &str,
        application: Option<&str>,
        settings: &Settings,
    ) -> DriverResult<()> {
        let mut file = self.read()?;
        file.store(device, application, settings);
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, toml::to_string_pretty(&file)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    file: SettingsFile,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(device: &str, settings: Settings) -> Self {
        let mut store = Self::default();
        store.file.store(device, None, &settings);
        store
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self, device: &str, application: Option<&str>) -> DriverResult<Settings> {
        Ok(self.file.lookup(device, application))
    }

    fn save(
        &mut self,
        device: &str,
        application: Option<&str>,
        settings: &Settings,
    ) -> DriverResult<()> {
        self.file.store(device, application, settings);
        Ok(())
    }
}

/// What the control panel is shown when it opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelContext {
    pub device: String,
    pub application: Option<String>,
    pub settings: Settings,
    pub sample_rate: Option<u32>,
    pub streaming: bool,
}

/// The external settings dialog. Returns the edited settings, or `None` when
/// the user cancelled.
pub trait ControlPanel: Send {
    fn open(&mut self, context: &PanelContext) -> Option<Settings>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_reads_defaults() {
        let store = MemorySettingsStore::new();
        let s = store.load("Nowhere", Some("host.exe")).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.sample_format(), SampleFormat::Int24);
    }

    #[test]
    fn per_application_entries_shadow_device() {
        let mut store = MemorySettingsStore::with_device(
            "Box",
            Settings {
                buffer_size_100ns: 50_000,
                ..Settings::default()
            },
        );
        let app = Settings {
            buffer_size_100ns: 20_000,
            per_application: true,
            ..Settings::default()
        };
        store.save("Box", Some("daw"), &app).unwrap();
        assert_eq!(store.load("Box", Some("daw")).unwrap().buffer_size_100ns, 20_000);
        assert_eq!(
            store.load("Box", Some("other")).unwrap().buffer_size_100ns,
            50_000
        );
        assert_eq!(store.load("Box", None).unwrap().buffer_size_100ns, 50_000);
    }

    #[test]
    fn bad_bit_depth_falls_back() {
        let s = Settings {
            bit_depth: 20,
            ..Settings::default()
        };
        assert_eq!(s.sample_format(), SampleFormat::Int24);
    }

    #[test]
    fn reset_needed_only_for_stream_shape() {
        let a = Settings::default();
        let b = Settings {
            per_application: true,
            ..a.clone()
        };
        assert!(!a.requires_reset(&b));
        let c = Settings {
            bit_depth: 16,
            ..a.clone()
        };
        assert!(a.requires_reset(&c));
    }
}
