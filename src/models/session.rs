use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LabError, Result};

const LOG_SUFFIX: &str = "sensor_log.csv";
const VIDEO_SUFFIX: &str = "video.avi";

/// What the operator typed in to start a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub operating_setting: String,
    pub variant_label: String,
    pub duration: Option<String>,
}

impl SessionParams {
    pub fn new(
        operating_setting: impl Into<String>,
        variant_label: impl Into<String>,
        duration: Option<String>,
    ) -> Result<Self> {
        let params = Self {
            operating_setting: operating_setting.into().trim().to_string(),
            variant_label: variant_label.into().trim().to_string(),
            duration: duration
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        };
        check_component("operating_setting", &params.operating_setting)?;
        check_component("variant_label", &params.variant_label)?;
        if let Some(duration) = &params.duration {
            check_component("duration", duration)?;
        }
        Ok(params)
    }

    /// `<setting>_<variant>[_<duration>]`. Identical parameters give identical
    /// names, so a repeated run appends to / replaces the earlier files.
    pub fn stem(&self) -> String {
        match &self.duration {
            Some(duration) => format!(
                "{}_{}_{}",
                self.operating_setting, self.variant_label, duration
            ),
            None => format!("{}_{}", self.operating_setting, self.variant_label),
        }
    }

    pub fn log_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}_{LOG_SUFFIX}", self.stem()))
    }

    pub fn video_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}_{VIDEO_SUFFIX}", self.stem()))
    }
}

fn check_component(name: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LabError::InvalidParameter {
            name,
            reason: "must not be empty".into(),
        });
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(LabError::InvalidParameter {
            name,
            reason: format!("'{value}' is not a plain file name component"),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub params: SessionParams,
    pub log_path: PathBuf,
    pub video_path: PathBuf,
    pub started_at: DateTime<Utc>,
    /// False when video is disabled or the camera could not record.
    pub video_recording: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session: Session,
    pub stopped_at: DateTime<Utc>,
    pub records_written: u64,
    pub frames_recorded: u64,
    /// Failures the sampling or capture loop hit while the session ran.
    pub loop_errors: Vec<String>,
}
