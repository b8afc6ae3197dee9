use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{LabError, Result};
use crate::sensors::Readings;

/// Rendering used in the log and as the comment-patch key.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRecord {
    pub timestamp: NaiveDateTime,
    pub thermistors: Vec<f64>,
    pub thermocouple: f64,
    pub comment: Option<String>,
}

impl SampleRecord {
    pub fn new(timestamp: NaiveDateTime, readings: Readings) -> Self {
        Self {
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
            thermistors: readings.thermistors,
            thermocouple: readings.thermocouple,
            comment: None,
        }
    }

    /// Stamp `readings` with the local wall clock.
    pub fn now(readings: Readings) -> Self {
        Self::new(Local::now().naive_local(), readings)
    }

    pub fn timestamp_key(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommentOutcome {
    Found,
    NotFound,
}

impl CommentOutcome {
    pub fn is_found(self) -> bool {
        self == CommentOutcome::Found
    }

    pub fn into_result(self, timestamp: &str) -> Result<()> {
        match self {
            CommentOutcome::Found => Ok(()),
            CommentOutcome::NotFound => Err(LabError::RecordNotFound {
                timestamp: timestamp.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_drops_subsecond_precision() {
        let ts = NaiveDateTime::parse_from_str("2024-01-01 12:00:00.750", "%Y-%m-%d %H:%M:%S%.3f").unwrap();
        let record = SampleRecord::new(
            ts,
            Readings {
                thermistors: vec![25.0],
                thermocouple: 30.0,
            },
        );
        assert_eq!(record.timestamp_key(), "2024-01-01 12:00:00");
        assert_eq!(
            SampleRecord::parse_timestamp(&record.timestamp_key()),
            Some(record.timestamp)
        );
    }

    #[test]
    fn not_found_converts_to_error() {
        assert!(CommentOutcome::Found.into_result("x").is_ok());
        assert!(matches!(
            CommentOutcome::NotFound.into_result("2024-01-01 12:00:00"),
            Err(LabError::RecordNotFound { .. })
        ));
    }
}
