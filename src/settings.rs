use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use crate::sensors::adc::ADC_CHANNELS;
use crate::sensors::calibration::CalibrationCurve;

pub const OUTPUT_DIR_ENV: &str = "LABWATCH_OUTPUT_DIR";
pub const VIDEO_ENV: &str = "LABWATCH_VIDEO";
pub const CONFIG_ENV: &str = "LABWATCH_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "labwatch.json";
/// One sample a day is the slowest cadence accepted.
pub const MAX_SAMPLE_INTERVAL_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdcSettings {
    pub bus: u8,
    pub slave_select: u8,
    pub clock_hz: u32,
    pub vref: f64,
}

impl Default for AdcSettings {
    fn default() -> Self {
        Self {
            bus: 0,
            slave_select: 0,
            clock_hz: 1_000_000,
            vref: 3.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThermocoupleSettings {
    pub bus: u8,
    pub slave_select: u8,
    pub clock_hz: u32,
    /// BCM number of the manually driven chip-select line.
    pub cs_pin: u8,
    pub conversion_delay_ms: u32,
}

impl Default for ThermocoupleSettings {
    fn default() -> Self {
        Self {
            bus: 0,
            slave_select: 1,
            clock_hz: 500_000,
            cs_pin: 7,
            conversion_delay_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoSettings {
    pub enabled: bool,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub jpeg_quality: u8,
    pub preview_timeout_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 20,
            jpeg_quality: 80,
            preview_timeout_ms: 2_000,
            command_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub sample_interval_secs: f64,
    pub thermistor_channels: u8,
    pub adc: AdcSettings,
    pub thermocouple: ThermocoupleSettings,
    pub calibration: CalibrationCurve,
    pub video: VideoSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            sample_interval_secs: 10.0,
            thermistor_channels: 4,
            adc: AdcSettings::default(),
            thermocouple: ThermocoupleSettings::default(),
            calibration: CalibrationCurve::default(),
            video: VideoSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let interval = self.sample_interval_secs;
        if !interval.is_finite() || interval <= 0.0 || interval > MAX_SAMPLE_INTERVAL_SECS {
            bail!(
                "sample_interval_secs must be within (0, {MAX_SAMPLE_INTERVAL_SECS}], got {interval}"
            );
        }
        if self.thermistor_channels == 0 || self.thermistor_channels > ADC_CHANNELS {
            bail!(
                "thermistor_channels must be within 1..={ADC_CHANNELS}, got {}",
                self.thermistor_channels
            );
        }
        if self.video.fps == 0 {
            bail!("video.fps must be greater than zero");
        }
        if self.video.width == 0 || self.video.height == 0 {
            bail!("video resolution must be non-zero");
        }
        if self.calibration.fixed_resistor_ohms <= 0.0 || self.calibration.vref <= 0.0 {
            bail!("calibration resistor and reference voltage must be positive");
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Result<std::time::Duration> {
        std::time::Duration::try_from_secs_f64(self.sample_interval_secs).with_context(|| {
            format!(
                "sample_interval_secs {} is not a valid duration",
                self.sample_interval_secs
            )
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(OUTPUT_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(value) = std::env::var(VIDEO_ENV) {
            self.video.enabled = value == "1" || value.eq_ignore_ascii_case("true");
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    /// Missing file means defaults; a file that exists but does not parse is an error.
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings in {}", path.display()))?
        } else {
            Settings::default()
        };
        data.apply_env_overrides();
        data.validate()?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> Settings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create settings directory {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
