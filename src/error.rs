use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LabError>;

#[derive(Error, Debug)]
pub enum LabError {
    /// A bus or camera could not be opened. Callers degrade instead of exiting.
    #[error("device unavailable: {device}: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("ADC channel {channel} out of range (device has {available} channels)")]
    ChannelOutOfRange { channel: u8, available: u8 },

    #[error("session already running")]
    SessionAlreadyActive,

    #[error("no active session")]
    SessionNotActive,

    #[error("calibration undefined for {voltage:.4} V")]
    CalibrationUndefined { voltage: f64 },

    #[error("no record with timestamp '{timestamp}'")]
    RecordNotFound { timestamp: String },

    #[error("no camera frame available")]
    FrameUnavailable,

    #[error("bus transfer failed: {0}")]
    Bus(String),

    #[error("camera error: {0}")]
    Camera(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("settings error: {0}")]
    Settings(String),

    #[error("{0} worker stopped")]
    WorkerStopped(&'static str),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl LabError {
    pub fn device(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
