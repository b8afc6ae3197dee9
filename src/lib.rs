pub mod error;
pub mod models;
pub mod sampling;
pub mod sensors;
pub mod session;
pub mod settings;
pub mod utils;
pub mod video;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

pub use error::LabError;
pub use models::{CommentOutcome, SampleRecord, Session, SessionParams, SessionSummary};
pub use sampling::SampleLogger;
pub use sensors::{voltage_to_temperature, Readings, SensorArray};
pub use session::SessionController;
pub use settings::{Settings, SettingsStore};
pub use utils::init_logging;
pub use video::{CameraOpener, VideoSessionManager};

const USAGE: &str = "usage: labwatch <operating-setting> <variant-label> [duration]";

fn camera_opener() -> Option<Arc<dyn CameraOpener>> {
    #[cfg(target_os = "linux")]
    {
        Some(Arc::new(video::V4lCameraOpener))
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Headless entry point: one session from `args`, stopped on Ctrl-C.
pub async fn run(args: Vec<String>) -> Result<()> {
    init_logging();

    let mut args = args.into_iter();
    let operating_setting = args.next().context(USAGE)?;
    let variant_label = args.next().context(USAGE)?;
    let duration = args.next();

    let config_path = std::env::var(settings::CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(settings::DEFAULT_CONFIG_FILE));
    let store = SettingsStore::new(config_path)?;
    let settings = store.settings();
    info!(
        "labwatch starting up (settings: {}, output: {})",
        store.path().display(),
        settings.output_dir.display()
    );

    let controller = SessionController::from_settings(&settings, camera_opener())?;
    let session = controller
        .start(&operating_setting, &variant_label, duration)
        .await
        .context("failed to start session")?;
    info!(
        "Logging to {}{}; press Ctrl-C to stop",
        session.log_path.display(),
        if session.video_recording {
            format!(" and recording to {}", session.video_path.display())
        } else {
            String::new()
        }
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    match controller.shutdown().await? {
        Some(summary) => {
            for err in &summary.loop_errors {
                warn!("Session ended with error: {err}");
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        None => warn!("No session was active at shutdown"),
    }
    Ok(())
}
