use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("no input or output channels present")]
    NotPresent,

    #[error("sample rate or clock not supported")]
    NoClock,

    #[error("operation not valid in the current driver mode")]
    InvalidMode,

    #[error("out of memory while allocating stream buffers")]
    NoMemory,

    #[error("invalid parameter")]
    InvalidParameter,

    #[error("hardware malfunction: {0}")]
    HwMalfunction(String),

    #[error("settings store error: {0}")]
    Settings(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

pub const ASE_OK: i32 = 0;
pub const ASE_SUCCESS: i32 = 0x3f48_35f1;

impl DriverError {
    pub fn code(&self) -> i32 {
        match self {
            DriverError::NotPresent => -1000,
            DriverError::HwMalfunction(_) | DriverError::Settings(_) => -999,
            DriverError::InvalidParameter => -998,
            DriverError::InvalidMode => -997,
            DriverError::NoClock => -995,
            DriverError::NoMemory => -994,
        }
    }
}

/// Failure reported by a [`HardwarePin`](crate::hw::pin::HardwarePin).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PinError {
    #[error("format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("pin is not open")]
    NotOpen,

    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::hw::pin::PinState,
        to: crate::hw::pin::PinState,
    },

    #[error("pin I/O error: {0}")]
    Io(String),
}

impl From<PinError> for DriverError {
    fn from(e: PinError) -> Self {
        DriverError::HwMalfunction(e.to_string())
    }
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Settings(e.to_string())
    }
}

impl From<toml::de::Error> for DriverError {
    fn from(e: toml::de::Error) -> Self {
        DriverError::Settings(e.to_string())
    }
}

impl From<toml::ser::Error> for DriverError {
    fn from(e: toml::ser::Error) -> Self {
        DriverError::Settings(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_protocol_values() {
        assert_eq!(DriverError::NotPresent.code(), -1000);
        assert_eq!(DriverError::NoClock.code(), -995);
        assert_eq!(DriverError::InvalidMode.code(), -997);
        assert_eq!(DriverError::NoMemory.code(), -994);
        assert_eq!(DriverError::InvalidParameter.code(), -998);
        assert_eq!(DriverError::HwMalfunction("x".into()).code(), -999);
    }

    #[test]
    fn pin_errors_become_malfunctions() {
        let err: DriverError = PinError::NotOpen.into();
        assert!(matches!(err, DriverError::HwMalfunction(msg) if msg.contains("not open")));
    }
}
