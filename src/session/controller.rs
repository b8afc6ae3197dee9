use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::error::{LabError, Result};
use crate::models::{CommentOutcome, SampleRecord, Session, SessionParams, SessionSummary};
use crate::sampling::{LogTarget, SampleLogger};
use crate::sensors;
use crate::settings::Settings;
use crate::video::{CameraOpener, VideoSessionManager};

/// Starts and stops a sensor log plus (when a camera is present) a matching
/// recording under one set of operator parameters.
#[derive(Clone)]
pub struct SessionController {
    output_dir: PathBuf,
    state: Arc<Mutex<Option<Session>>>,
    logger: Arc<Mutex<SampleLogger>>,
    video: Option<Arc<VideoSessionManager>>,
}

impl SessionController {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        logger: SampleLogger,
        video: Option<Arc<VideoSessionManager>>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            state: Arc::new(Mutex::new(None)),
            logger: Arc::new(Mutex::new(logger)),
            video,
        }
    }

    /// Wires up the probes and, if enabled, the camera described by
    /// `settings`. Hardware that fails to open is logged and left degraded
    /// instead of aborting.
    pub fn from_settings(
        settings: &Settings,
        camera: Option<Arc<dyn CameraOpener>>,
    ) -> Result<Self> {
        let interval = settings
            .sample_interval()
            .map_err(|err| LabError::Settings(format!("{err:#}")))?;
        let logger = match sensors::open_sensor_array(settings) {
            Ok(array) => SampleLogger::new(array, interval),
            Err(err) => {
                error!("Sensors unavailable: {err}");
                SampleLogger::unavailable(err.to_string(), interval)
            }
        };

        let video = match camera {
            Some(opener) if settings.video.enabled => Some(Arc::new(
                VideoSessionManager::launch(settings.video.clone(), opener),
            )),
            _ => {
                info!("Video disabled; sessions will log sensors only");
                None
            }
        };

        Ok(Self::new(settings.output_dir.clone(), logger, video))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn video(&self) -> Option<&Arc<VideoSessionManager>> {
        self.video.as_ref()
    }

    pub async fn active_session(&self) -> Option<Session> {
        self.state.lock().await.clone()
    }

    pub async fn start(
        &self,
        operating_setting: &str,
        variant_label: &str,
        duration: Option<String>,
    ) -> Result<Session> {
        let params = SessionParams::new(operating_setting, variant_label, duration)?;

        // Held for the whole start so concurrent starts serialize.
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(LabError::SessionAlreadyActive);
        }

        let log_path = params.log_path(&self.output_dir);
        let video_path = params.video_path(&self.output_dir);

        self.logger.lock().await.start(log_path.clone())?;

        let mut video_recording = false;
        if let Some(video) = &self.video {
            match video.start_recording(video_path.clone()).await {
                Ok(()) => video_recording = true,
                Err(err) => warn!(
                    "Recording unavailable, continuing with sensor logging only: {err}"
                ),
            }
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            params,
            log_path,
            video_path,
            started_at: Utc::now(),
            video_recording,
        };
        info!(
            "Session {} started: {} (video: {})",
            session.id,
            session.log_path.display(),
            if video_recording { "recording" } else { "off" }
        );

        *state = Some(session.clone());
        Ok(session)
    }

    /// Ends the active session, finalizing the video before closing the log.
    /// Returns `Ok(None)` when no session was active.
    pub async fn stop(&self) -> Result<Option<SessionSummary>> {
        let mut state = self.state.lock().await;
        let Some(session) = state.take() else {
            return Ok(None);
        };

        let mut loop_errors = Vec::new();
        let mut frames_recorded = 0;

        // Always asked, even when the start was not acknowledged: a start that
        // timed out may still have reached the capture thread.
        if let Some(video) = &self.video {
            match video.stop_recording().await {
                Ok(Some(report)) => frames_recorded = report.frames,
                Ok(None) => {}
                Err(err) if session.video_recording => loop_errors.push(format!("video: {err}")),
                Err(err) => warn!("Stopping unacknowledged recording failed: {err}"),
            }
            if session.video_recording {
                if let Some(err) = video.last_error() {
                    loop_errors.push(format!("video: {err}"));
                }
            }
        }

        let records_written = match self.logger.lock().await.stop().await? {
            Some(report) => {
                if let Some(err) = report.error {
                    loop_errors.push(format!("sampling: {err}"));
                }
                report.records_written
            }
            None => 0,
        };

        let summary = SessionSummary {
            session,
            stopped_at: Utc::now(),
            records_written,
            frames_recorded,
            loop_errors,
        };
        info!(
            "Session {} stopped: {} records, {} frames",
            summary.session.id, summary.records_written, summary.frames_recorded
        );
        Ok(Some(summary))
    }

    /// Up to `n` most recent records from the active (or last) log.
    pub async fn latest_records(&self, n: usize) -> Result<Vec<SampleRecord>> {
        // The guard keeps a concurrent stop from closing the log mid-read.
        let logger = self.logger.lock().await;
        let Some(target) = logger.log_target() else {
            return Ok(Vec::new());
        };
        on_log(target, move |target| target.latest_records(n)).await
    }

    pub async fn add_comment(&self, timestamp: &str, text: &str) -> Result<CommentOutcome> {
        let logger = self.logger.lock().await;
        let Some(target) = logger.log_target() else {
            return Ok(CommentOutcome::NotFound);
        };
        let (timestamp, text) = (timestamp.to_string(), text.to_string());
        on_log(target, move |target| target.add_comment(&timestamp, &text)).await
    }

    /// Latest record per sampling cycle across every session.
    pub async fn subscribe(&self) -> watch::Receiver<Option<SampleRecord>> {
        self.logger.lock().await.subscribe()
    }

    /// Stops any active session and releases the camera.
    pub async fn shutdown(&self) -> Result<Option<SessionSummary>> {
        let summary = self.stop().await?;
        if let Some(video) = self.video.clone() {
            tokio::task::spawn_blocking(move || video.shutdown())
                .await
                .map_err(|_| LabError::WorkerStopped("capture shutdown"))?;
        }
        Ok(summary)
    }
}

/// Runs blocking log I/O off the async runtime.
async fn on_log<T, F>(target: LogTarget, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&LogTarget) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&target))
        .await
        .map_err(|_| LabError::WorkerStopped("log access"))?
}
