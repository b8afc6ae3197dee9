use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use chrono::Local;
use tokio::sync::watch;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::SampleRecord;
use crate::sensors::SensorArray;

use super::store::LogStore;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

// Import the logging macros (exported at crate root)
use crate::{log_error, log_info};

pub type SharedLog = Arc<Mutex<LogStore>>;

pub(crate) fn lock_log(log: &SharedLog) -> MutexGuard<'_, LogStore> {
    match log.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Everything the loop shares with its controller.
pub struct LoopContext {
    pub log: SharedLog,
    pub interval: Duration,
    pub cancel_token: CancellationToken,
    pub progress: watch::Sender<Option<SampleRecord>>,
    pub records_written: Arc<AtomicU64>,
    pub last_error: Arc<Mutex<Option<String>>>,
}

/// Samples every `interval` until cancelled, then hands the sensor array
/// back. Cancellation is only observed between cycles. A failed cycle ends
/// the loop and leaves its error in `last_error`. Returns `None` only when a
/// sampling worker panicked and took the array with it.
pub async fn sampling_loop(
    mut sensors: Box<dyn SensorArray>,
    ctx: LoopContext,
) -> Option<Box<dyn SensorArray>> {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let log_path = lock_log(&ctx.log).path().to_path_buf();
    log_info!(
        "sampling loop started: {} every {:?}",
        log_path.display(),
        ctx.interval
    );

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel_token.cancelled() => {
                log_info!("sampling loop shutting down");
                break;
            }
            _ = ticker.tick() => {}
        }

        let log = ctx.log.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let result = sample_once(sensors.as_mut(), &log);
            (sensors, result)
        })
        .await;

        match outcome {
            Ok((returned, Ok(record))) => {
                sensors = returned;
                ctx.records_written.fetch_add(1, Ordering::SeqCst);
                log_info!("{}", describe(&record));
                ctx.progress.send_replace(Some(record));
            }
            Ok((returned, Err(err))) => {
                sensors = returned;
                log_error!("sampling failed, stopping loop for {}: {err}", log_path.display());
                record_error(&ctx.last_error, err.to_string());
                break;
            }
            Err(join_err) => {
                log_error!("sampling worker panicked: {join_err}");
                record_error(&ctx.last_error, format!("sampling worker panicked: {join_err}"));
                return None;
            }
        }
    }

    Some(sensors)
}

fn sample_once(sensors: &mut dyn SensorArray, log: &SharedLog) -> Result<SampleRecord> {
    let timestamp = Local::now().naive_local();
    let readings = sensors.sample()?;
    let record = SampleRecord::new(timestamp, readings);
    lock_log(log).append(&record)?;
    Ok(record)
}

fn record_error(slot: &Mutex<Option<String>>, message: String) {
    let mut guard = match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(message);
}

fn describe(record: &SampleRecord) -> String {
    let thermistors = record
        .thermistors
        .iter()
        .enumerate()
        .map(|(i, value)| format!("Thermistor{}: {value:.2} °C", i + 1))
        .collect::<Vec<_>>()
        .join(" | ");
    format!(
        "{} | {} | Thermocouple: {:.2} °C",
        record.timestamp_key(),
        thermistors,
        record.thermocouple
    )
}
