use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use log::{info, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{LabError, Result};
use crate::models::{CommentOutcome, SampleRecord};
use crate::sensors::SensorArray;

use super::loop_worker::{lock_log, sampling_loop, LoopContext, SharedLog};
use super::store::{self, LogStore};

/// What a finished logging run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogReport {
    pub path: PathBuf,
    pub records_written: u64,
    /// Set when the loop ended on its own because a cycle failed.
    pub error: Option<String>,
}

struct ActiveLog {
    log: SharedLog,
    handle: JoinHandle<Option<Box<dyn SensorArray>>>,
    cancel_token: CancellationToken,
    records_written: Arc<AtomicU64>,
}

/// Owns the sensor array and at most one running sampling loop.
pub struct SampleLogger {
    sensors: Option<Box<dyn SensorArray>>,
    unavailable: Option<String>,
    interval: Duration,
    active: Option<ActiveLog>,
    last_log: Option<PathBuf>,
    last_error: Arc<Mutex<Option<String>>>,
    progress_tx: watch::Sender<Option<SampleRecord>>,
}

impl SampleLogger {
    pub fn new(sensors: Box<dyn SensorArray>, interval: Duration) -> Self {
        Self::build(Some(sensors), None, interval)
    }

    /// A logger whose probes could not be opened. Every `start` fails with
    /// `DeviceUnavailable` carrying `reason`.
    pub fn unavailable(reason: impl Into<String>, interval: Duration) -> Self {
        Self::build(None, Some(reason.into()), interval)
    }

    fn build(
        sensors: Option<Box<dyn SensorArray>>,
        unavailable: Option<String>,
        interval: Duration,
    ) -> Self {
        let (progress_tx, _) = watch::channel(None);
        Self {
            sensors,
            unavailable,
            interval,
            active: None,
            last_log: None,
            last_error: Arc::new(Mutex::new(None)),
            progress_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Opens (or creates) the log at `path` and spawns the sampling loop.
    /// The first sample is taken as soon as the loop gets scheduled.
    pub fn start(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        if self.active.is_some() {
            return Err(LabError::SessionAlreadyActive);
        }

        let sensors = self.sensors.take().ok_or_else(|| {
            LabError::device(
                "sensor array",
                self.unavailable
                    .as_deref()
                    .unwrap_or("probes are not connected"),
            )
        })?;

        let path = path.into();
        let log = match LogStore::open(&path, sensors.thermistor_count()) {
            Ok(log) => Arc::new(Mutex::new(log)),
            Err(err) => {
                self.sensors = Some(sensors);
                return Err(err);
            }
        };

        self.take_last_error();
        self.progress_tx.send_if_modified(|latest| latest.take().is_some());

        let cancel_token = CancellationToken::new();
        let records_written = Arc::new(AtomicU64::new(0));
        let ctx = LoopContext {
            log: log.clone(),
            interval: self.interval,
            cancel_token: cancel_token.clone(),
            progress: self.progress_tx.clone(),
            records_written: records_written.clone(),
            last_error: self.last_error.clone(),
        };
        let handle = tokio::spawn(sampling_loop(sensors, ctx));

        info!("Logging {} every {:?}", path.display(), self.interval);
        self.last_log = Some(path);
        self.active = Some(ActiveLog {
            log,
            handle,
            cancel_token,
            records_written,
        });
        Ok(())
    }

    /// Cancels the loop, waits for an in-flight cycle, and closes the log.
    /// Returns `Ok(None)` when nothing was running.
    pub async fn stop(&mut self) -> Result<Option<LogReport>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };

        active.cancel_token.cancel();
        match active.handle.await {
            Ok(Some(sensors)) => self.sensors = Some(sensors),
            Ok(None) => {
                self.unavailable = Some("sampling worker panicked".into());
            }
            Err(join_err) => {
                warn!("sampling loop task failed to join: {join_err}");
                self.unavailable = Some(format!("sampling loop failed: {join_err}"));
            }
        }

        let path = {
            let mut log = lock_log(&active.log);
            log.close()?;
            log.path().to_path_buf()
        };

        let report = LogReport {
            path,
            records_written: active.records_written.load(Ordering::SeqCst),
            error: self.take_last_error(),
        };
        info!(
            "Closed {} after {} records",
            report.path.display(),
            report.records_written
        );
        Ok(Some(report))
    }

    /// Records written by the running loop, or zero when idle.
    pub fn records_written(&self) -> u64 {
        self.active
            .as_ref()
            .map(|active| active.records_written.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Latest record per completed cycle; `None` until the first one lands.
    pub fn subscribe(&self) -> watch::Receiver<Option<SampleRecord>> {
        self.progress_tx.subscribe()
    }

    /// Error that ended the running loop early, if any.
    pub fn last_error(&self) -> Option<String> {
        match self.last_error.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn take_last_error(&self) -> Option<String> {
        match self.last_error.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Log of the running session, or of the last one when idle.
    pub fn current_log(&self) -> Option<&Path> {
        self.last_log.as_deref()
    }

    /// Handle on the running log, or the last one when idle. Reads and
    /// patches through it are blocking file I/O.
    pub fn log_target(&self) -> Option<LogTarget> {
        match (&self.active, &self.last_log) {
            (Some(active), _) => Some(LogTarget::Live(active.log.clone())),
            (None, Some(path)) => Some(LogTarget::Closed(path.clone())),
            (None, None) => None,
        }
    }

    /// Up to `n` most recent records, oldest first. Empty when no log has
    /// been opened yet.
    pub fn latest_records(&self, n: usize) -> Result<Vec<SampleRecord>> {
        match self.log_target() {
            Some(target) => target.latest_records(n),
            None => Ok(Vec::new()),
        }
    }

    /// Attaches `text` to the record stamped exactly `timestamp` in the
    /// current (or last) log.
    pub fn add_comment(&self, timestamp: &str, text: &str) -> Result<CommentOutcome> {
        match self.log_target() {
            Some(target) => target.add_comment(timestamp, text),
            None => Ok(CommentOutcome::NotFound),
        }
    }
}

/// A sensor log that can be read or patched off the logger, e.g. from a
/// blocking task.
#[derive(Clone)]
pub enum LogTarget {
    /// Shared with the sampling loop; access serializes with appends.
    Live(SharedLog),
    Closed(PathBuf),
}

impl LogTarget {
    pub fn latest_records(&self, n: usize) -> Result<Vec<SampleRecord>> {
        match self {
            LogTarget::Live(log) => {
                let log = lock_log(log);
                store::latest_records(log.path(), n)
            }
            LogTarget::Closed(path) => store::latest_records(path, n),
        }
    }

    pub fn add_comment(&self, timestamp: &str, text: &str) -> Result<CommentOutcome> {
        match self {
            LogTarget::Live(log) => lock_log(log).patch_comment(timestamp, text),
            LogTarget::Closed(path) => store::patch_comment_file(path, timestamp, text),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::sensors::Readings;
    use pretty_assertions::assert_eq;

    struct CountingSensors {
        samples: Arc<AtomicU64>,
        fail: Arc<AtomicBool>,
    }

    impl SensorArray for CountingSensors {
        fn thermistor_count(&self) -> usize {
            4
        }

        fn sample(&mut self) -> Result<Readings> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(LabError::Bus("spi transfer failed".into()));
            }
            let n = self.samples.fetch_add(1, Ordering::SeqCst) as f64;
            Ok(Readings {
                thermistors: vec![20.0 + n, 21.0, 22.0, 23.0],
                thermocouple: 100.0,
            })
        }
    }

    fn logger(interval: Duration) -> (SampleLogger, Arc<AtomicU64>, Arc<AtomicBool>) {
        let samples = Arc::new(AtomicU64::new(0));
        let fail = Arc::new(AtomicBool::new(false));
        let sensors = CountingSensors {
            samples: samples.clone(),
            fail: fail.clone(),
        };
        (SampleLogger::new(Box::new(sensors), interval), samples, fail)
    }

    #[tokio::test]
    async fn stop_right_after_start_leaves_only_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_sensor_log.csv");
        let (mut logger, samples, _) = logger(Duration::from_secs(10));

        logger.start(&path).unwrap();
        let report = logger.stop().await.unwrap().unwrap();

        assert_eq!(report.records_written, 0);
        assert_eq!(samples.load(Ordering::SeqCst), 0);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents.trim_end(),
            "Timestamp,Thermistor1,Thermistor2,Thermistor3,Thermistor4,Thermocouple,Comment"
        );
        assert!(logger.latest_records(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_sample_is_immediate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_sensor_log.csv");
        let (mut logger, _, _) = logger(Duration::from_secs(10));
        let mut progress = logger.subscribe();

        logger.start(&path).unwrap();
        tokio::time::timeout(Duration::from_secs(5), progress.changed())
            .await
            .unwrap()
            .unwrap();
        let first = progress.borrow().clone().unwrap();
        assert_eq!(first.thermistors.len(), 4);

        let report = logger.stop().await.unwrap().unwrap();
        assert_eq!(report.records_written, 1);
        assert_eq!(logger.latest_records(5).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut logger, _, _) = logger(Duration::from_secs(10));

        logger.start(dir.path().join("a.csv")).unwrap();
        assert!(matches!(
            logger.start(dir.path().join("b.csv")),
            Err(LabError::SessionAlreadyActive)
        ));
        assert!(!dir.path().join("b.csv").exists());
        logger.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_no_op() {
        let (mut logger, _, _) = logger(Duration::from_secs(10));
        assert_eq!(logger.stop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_cycle_ends_loop_and_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (mut logger, _, fail) = logger(Duration::from_millis(20));
        fail.store(true, Ordering::SeqCst);

        logger.start(dir.path().join("broken.csv")).unwrap();
        for _ in 0..100 {
            if logger.last_error().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let report = logger.stop().await.unwrap().unwrap();
        assert_eq!(report.records_written, 0);
        assert!(report.error.unwrap().contains("spi transfer failed"));

        // The sensors came back, so another run can start.
        fail.store(false, Ordering::SeqCst);
        logger.start(dir.path().join("retry.csv")).unwrap();
        logger.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unavailable_probes_refuse_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = SampleLogger::unavailable("no spidev", Duration::from_secs(10));
        let err = logger.start(dir.path().join("x.csv")).unwrap_err();
        assert!(matches!(err, LabError::DeviceUnavailable { .. }));
        assert!(err.to_string().contains("no spidev"));
    }

    #[tokio::test]
    async fn comment_lands_on_the_previous_log_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_sensor_log.csv");
        let (mut logger, _, _) = logger(Duration::from_secs(10));
        let mut progress = logger.subscribe();

        logger.start(&path).unwrap();
        progress.changed().await.unwrap();
        let key = progress.borrow().clone().unwrap().timestamp_key();
        logger.stop().await.unwrap();

        assert!(logger.add_comment(&key, "flame out").unwrap().is_found());
        let records = logger.latest_records(1).unwrap();
        assert_eq!(records[0].comment.as_deref(), Some("flame out"));
        assert_eq!(
            logger.add_comment("1999-01-01 00:00:00", "nope").unwrap(),
            CommentOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn log_target_follows_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_sensor_log.csv");
        let (mut logger, _, _) = logger(Duration::from_secs(10));
        assert!(logger.log_target().is_none());

        logger.start(&path).unwrap();
        assert!(matches!(logger.log_target(), Some(LogTarget::Live(_))));
        logger.stop().await.unwrap();

        match logger.log_target() {
            Some(LogTarget::Closed(closed)) => assert_eq!(closed, path),
            _ => panic!("expected the closed log"),
        }
    }
}
