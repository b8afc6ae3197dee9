use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc::{self, TryRecvError},
    Arc, Mutex, MutexGuard,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::{LabError, Result};
use crate::settings::VideoSettings;

use super::avi::MjpegAviWriter;
use super::camera::{encode_jpeg, placeholder_jpeg, Camera, CameraOpener};
use super::frame::{Frame, FrameSlot};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

// Import the logging macros (exported at crate root)
use crate::{log_error, log_info, log_warn};

const WORKER: &str = "capture loop";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingReport {
    pub path: PathBuf,
    pub frames: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatus {
    pub capturing: bool,
    pub recording: bool,
    pub frames_captured: u64,
    pub frames_recorded: u64,
    pub last_error: Option<String>,
}

enum CaptureCommand {
    StartRecording {
        path: PathBuf,
        reply: oneshot::Sender<Result<()>>,
    },
    StopRecording {
        reply: oneshot::Sender<Result<Option<RecordingReport>>>,
    },
    Shutdown,
}

#[derive(Default)]
struct CaptureStatus {
    capturing: AtomicBool,
    recording: AtomicBool,
    frames_captured: AtomicU64,
    frames_recorded: AtomicU64,
    last_error: Mutex<Option<String>>,
    /// Recording the loop finalized on its own (capture failure or exit).
    orphaned: Mutex<Option<RecordingReport>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl CaptureStatus {
    fn set_error(&self, message: String) {
        *lock(&self.last_error) = Some(message);
    }

    fn snapshot(&self) -> VideoStatus {
        VideoStatus {
            capturing: self.capturing.load(Ordering::SeqCst),
            recording: self.recording.load(Ordering::SeqCst),
            frames_captured: self.frames_captured.load(Ordering::SeqCst),
            frames_recorded: self.frames_recorded.load(Ordering::SeqCst),
            last_error: lock(&self.last_error).clone(),
        }
    }
}

struct CaptureWorker {
    commands: mpsc::Sender<CaptureCommand>,
    handle: JoinHandle<()>,
}

/// Owns the camera through a single capture thread. Preview reads come from
/// the shared latest-frame slot; recording is toggled by acknowledged
/// commands to that thread, which writes every captured frame while active.
pub struct VideoSessionManager {
    settings: VideoSettings,
    opener: Arc<dyn CameraOpener>,
    slot: Arc<FrameSlot>,
    status: Arc<CaptureStatus>,
    worker: Mutex<Option<CaptureWorker>>,
}

impl VideoSessionManager {
    /// Starts the capture loop. A camera that fails to open leaves the
    /// manager in a degraded state (no preview, recording refused) until
    /// `reinitialize` succeeds.
    pub fn launch(settings: VideoSettings, opener: Arc<dyn CameraOpener>) -> Self {
        let manager = Self {
            settings,
            opener,
            slot: Arc::new(FrameSlot::new()),
            status: Arc::new(CaptureStatus::default()),
            worker: Mutex::new(None),
        };
        if let Err(err) = manager.spawn_worker() {
            error!("Video capture unavailable: {err}");
        }
        manager
    }

    fn spawn_worker(&self) -> Result<()> {
        let (command_tx, command_rx) = mpsc::channel::<CaptureCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let ctx = LoopContext {
            settings: self.settings.clone(),
            slot: self.slot.clone(),
            status: self.status.clone(),
        };
        let opener = self.opener.clone();
        self.slot.reopen();

        let handle = thread::Builder::new()
            .name("labwatch-capture".into())
            .spawn(move || {
                let camera = match opener.open(&ctx.settings) {
                    Ok(camera) => camera,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                ctx.status.capturing.store(true, Ordering::SeqCst);
                *lock(&ctx.status.last_error) = None;
                if ready_tx.send(Ok(())).is_err() {
                    ctx.status.capturing.store(false, Ordering::SeqCst);
                    return;
                }
                capture_loop(camera, &ctx, &command_rx);
            })
            .map_err(|err| LabError::Camera(format!("failed to spawn capture thread: {err}")))?;

        let ready = ready_rx
            .recv()
            .unwrap_or(Err(LabError::WorkerStopped(WORKER)));
        if let Err(err) = ready {
            let _ = handle.join();
            self.slot.close();
            self.status.set_error(err.to_string());
            return Err(err);
        }

        info!(
            "Capturing {} at {}x{} @ {} fps",
            self.settings.device, self.settings.width, self.settings.height, self.settings.fps
        );
        *lock(&self.worker) = Some(CaptureWorker {
            commands: command_tx,
            handle,
        });
        Ok(())
    }

    pub fn settings(&self) -> &VideoSettings {
        &self.settings
    }

    pub fn status(&self) -> VideoStatus {
        self.status.snapshot()
    }

    pub fn is_capturing(&self) -> bool {
        self.status.capturing.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.status.last_error).clone()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> CaptureCommand,
    ) -> Result<T> {
        let sender = lock(&self.worker)
            .as_ref()
            .map(|worker| worker.commands.clone())
            .ok_or(LabError::WorkerStopped(WORKER))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(command(reply_tx))
            .map_err(|_| LabError::WorkerStopped(WORKER))?;

        let timeout = Duration::from_millis(self.settings.command_timeout_ms);
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LabError::WorkerStopped(WORKER)),
            Err(_) => Err(LabError::Camera(format!(
                "capture loop did not answer within {timeout:?}"
            ))),
        }
    }

    /// Opens a fresh AVI at `path`; returns once the capture thread has it.
    pub async fn start_recording(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        lock(&self.status.orphaned).take();
        self.request(|reply| CaptureCommand::StartRecording { path, reply })
            .await
    }

    /// Finalizes the current recording. `Ok(None)` when nothing was being
    /// recorded. If the loop died mid-recording, reports what it salvaged.
    pub async fn stop_recording(&self) -> Result<Option<RecordingReport>> {
        match self
            .request(|reply| CaptureCommand::StopRecording { reply })
            .await
        {
            Ok(Some(report)) => Ok(Some(report)),
            Ok(None) | Err(LabError::WorkerStopped(_)) => Ok(lock(&self.status.orphaned).take()),
            Err(err) => Err(err),
        }
    }

    /// Latest frame as JPEG, waiting up to the preview timeout for the
    /// first one.
    pub fn preview_frame(&self) -> Result<Vec<u8>> {
        let timeout = Duration::from_millis(self.settings.preview_timeout_ms);
        let frame = self
            .slot
            .wait_newer(None, timeout)
            .ok_or(LabError::FrameUnavailable)?;
        encode_jpeg(&frame.image, self.settings.jpeg_quality)
    }

    /// Like `preview_frame`, but serves the gray placeholder when no live
    /// frame is available.
    pub fn preview_or_placeholder(&self) -> Result<Vec<u8>> {
        match self.preview_frame() {
            Err(LabError::FrameUnavailable) => placeholder_jpeg(
                self.settings.width,
                self.settings.height,
                self.settings.jpeg_quality,
            ),
            other => other,
        }
    }

    /// Independent reader over the live frames. Any number may exist.
    pub fn preview_stream(&self) -> PreviewStream {
        PreviewStream {
            slot: self.slot.clone(),
            last_sequence: None,
            timeout: Duration::from_millis(self.settings.preview_timeout_ms),
            quality: self.settings.jpeg_quality,
        }
    }

    /// Tears down the capture loop (finalizing any recording) and opens the
    /// camera again. There is no automatic retry; callers decide when.
    pub fn reinitialize(&self) -> Result<()> {
        self.shutdown();
        self.status.frames_captured.store(0, Ordering::SeqCst);
        self.spawn_worker()
    }

    /// Stops the capture thread and waits for it. Idempotent.
    pub fn shutdown(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            // Fails only if the loop already exited on its own.
            let _ = worker.commands.send(CaptureCommand::Shutdown);
            if let Err(join_err) = worker.handle.join() {
                error!("Failed to join capture thread: {join_err:?}");
            }
            info!("Video capture stopped");
        }
    }
}

impl Drop for VideoSessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pull-based MJPEG preview: each call yields a frame newer than the last
/// one it returned.
pub struct PreviewStream {
    slot: Arc<FrameSlot>,
    last_sequence: Option<u64>,
    timeout: Duration,
    quality: u8,
}

impl PreviewStream {
    pub fn next_frame(&mut self) -> Option<Arc<Frame>> {
        let frame = self.slot.wait_newer(self.last_sequence, self.timeout)?;
        self.last_sequence = Some(frame.sequence);
        Some(frame)
    }

    pub fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        let frame = self.next_frame().ok_or(LabError::FrameUnavailable)?;
        encode_jpeg(&frame.image, self.quality)
    }
}

impl Iterator for PreviewStream {
    type Item = Vec<u8>;

    /// Ends once no new frame arrives within the timeout.
    fn next(&mut self) -> Option<Vec<u8>> {
        self.next_jpeg().ok()
    }
}

struct LoopContext {
    settings: VideoSettings,
    slot: Arc<FrameSlot>,
    status: Arc<CaptureStatus>,
}

struct Recorder {
    writer: MjpegAviWriter,
    width: u32,
    height: u32,
    quality: u8,
}

impl Recorder {
    fn create(path: PathBuf, settings: &VideoSettings) -> Result<Self> {
        let writer = MjpegAviWriter::create(path, settings.width, settings.height, settings.fps)?;
        Ok(Self {
            writer,
            width: settings.width,
            height: settings.height,
            quality: settings.jpeg_quality,
        })
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let image = if frame.image.dimensions() == (self.width, self.height) {
            Cow::Borrowed(&frame.image)
        } else {
            Cow::Owned(imageops::resize(
                &frame.image,
                self.width,
                self.height,
                FilterType::Triangle,
            ))
        };
        let jpeg = encode_jpeg(&image, self.quality)?;
        self.writer.write_frame(&jpeg)
    }

    fn finish(self) -> Result<RecordingReport> {
        let path = self.writer.path().to_path_buf();
        let bytes = self.writer.bytes_written();
        let frames = self.writer.finish()?;
        log_info!("muxed {bytes} bytes of JPEG into {}", path.display());
        Ok(RecordingReport { path, frames })
    }
}

enum Flow {
    Continue,
    Exit,
}

fn capture_loop(
    mut camera: Box<dyn Camera>,
    ctx: &LoopContext,
    commands: &mpsc::Receiver<CaptureCommand>,
) {
    let mut recorder: Option<Recorder> = None;

    'capture: loop {
        loop {
            match commands.try_recv() {
                Ok(command) => {
                    if let Flow::Exit = handle_command(command, &mut recorder, ctx) {
                        break 'capture;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'capture,
            }
        }

        match camera.capture() {
            Ok(image) => {
                let frame = ctx.slot.publish(image, Instant::now());
                ctx.status.frames_captured.fetch_add(1, Ordering::SeqCst);

                if let Some(active) = recorder.as_mut() {
                    match active.write(&frame) {
                        Ok(()) => {
                            ctx.status.frames_recorded.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => {
                            log_error!("recording write failed, stopping recording: {err}");
                            ctx.status.set_error(format!("recording failed: {err}"));
                            park_recording(recorder.take(), ctx);
                        }
                    }
                }
            }
            Err(err) => {
                log_error!("camera capture failed, stopping capture loop: {err}");
                ctx.status.set_error(err.to_string());
                break;
            }
        }
    }

    park_recording(recorder.take(), ctx);
    ctx.status.capturing.store(false, Ordering::SeqCst);
    ctx.slot.close();

    // Answer anything queued behind the exit so no caller waits on a reply
    // that never comes.
    for command in commands.try_iter() {
        match command {
            CaptureCommand::StartRecording { reply, .. } => {
                let _ = reply.send(Err(LabError::WorkerStopped(WORKER)));
            }
            CaptureCommand::StopRecording { reply } => {
                let _ = reply.send(Ok(lock(&ctx.status.orphaned).take()));
            }
            CaptureCommand::Shutdown => {}
        }
    }
    log_info!("capture loop exited");
}

fn handle_command(
    command: CaptureCommand,
    recorder: &mut Option<Recorder>,
    ctx: &LoopContext,
) -> Flow {
    match command {
        CaptureCommand::StartRecording { path, reply } => {
            // The caller gave up waiting; nobody would ever stop this one.
            if reply.is_closed() {
                log_warn!("dropping stale request to record {}", path.display());
                return Flow::Continue;
            }
            let result = if recorder.is_some() {
                Err(LabError::SessionAlreadyActive)
            } else {
                Recorder::create(path.clone(), &ctx.settings).map(|created| {
                    *recorder = Some(created);
                    ctx.status.frames_recorded.store(0, Ordering::SeqCst);
                    ctx.status.recording.store(true, Ordering::SeqCst);
                    *lock(&ctx.status.last_error) = None;
                    log_info!("recording to {}", path.display());
                })
            };
            if let Err(err) = &result {
                log_warn!("could not start recording to {}: {err}", path.display());
            }
            let started = result.is_ok();
            if reply.send(result).is_err() && started {
                log_warn!("start of {} timed out, discarding it", path.display());
                discard_recording(recorder.take(), ctx);
            }
            Flow::Continue
        }
        CaptureCommand::StopRecording { reply } => {
            let result = match recorder.take() {
                Some(active) => finish_recording(active, ctx).map(Some),
                None => Ok(lock(&ctx.status.orphaned).take()),
            };
            if let Err(Ok(Some(report))) = reply.send(result) {
                // Caller timed out; keep the report for its next stop.
                *lock(&ctx.status.orphaned) = Some(report);
            }
            Flow::Continue
        }
        CaptureCommand::Shutdown => Flow::Exit,
    }
}

fn finish_recording(recorder: Recorder, ctx: &LoopContext) -> Result<RecordingReport> {
    ctx.status.recording.store(false, Ordering::SeqCst);
    let report = recorder.finish()?;
    log_info!(
        "finalized {} with {} frames",
        report.path.display(),
        report.frames
    );
    Ok(report)
}

/// Closes and deletes a recording whose start was never acknowledged.
fn discard_recording(recorder: Option<Recorder>, ctx: &LoopContext) {
    let Some(recorder) = recorder else {
        return;
    };
    match finish_recording(recorder, ctx) {
        Ok(report) => {
            if let Err(err) = std::fs::remove_file(&report.path) {
                warn!("failed to remove {}: {err}", report.path.display());
            }
        }
        Err(err) => warn!("failed to close discarded recording: {err}"),
    }
}

/// Finalizes a recording nobody asked to stop and keeps the report for the
/// next `stop_recording`.
fn park_recording(recorder: Option<Recorder>, ctx: &LoopContext) {
    let Some(recorder) = recorder else {
        return;
    };
    match finish_recording(recorder, ctx) {
        Ok(report) => *lock(&ctx.status.orphaned) = Some(report),
        Err(err) => {
            warn!("failed to finalize recording: {err}");
            ctx.status.set_error(format!("failed to finalize recording: {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::avi::muxer_available;
    use crate::video::avi::tests::avi_total_frames;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::AtomicUsize;

    /// Paced synthetic camera; fails after `fail_after` frames if set.
    struct SyntheticCamera {
        size: (u32, u32),
        period: Duration,
        next_due: Instant,
        produced: usize,
        fail_after: Option<usize>,
        stall: Duration,
    }

    impl Camera for SyntheticCamera {
        fn capture(&mut self) -> Result<RgbImage> {
            if self.fail_after.is_some_and(|limit| self.produced >= limit) {
                return Err(LabError::Camera("device unplugged".into()));
            }
            thread::sleep(self.stall);
            let now = Instant::now();
            if self.next_due > now {
                thread::sleep(self.next_due - now);
            }
            self.next_due += self.period;
            self.produced += 1;
            let shade = (self.produced % 255) as u8;
            Ok(RgbImage::from_pixel(self.size.0, self.size.1, Rgb([shade, 0, 0])))
        }
    }

    struct SyntheticOpener {
        fail_after: Option<usize>,
        stall: Duration,
        opens: AtomicUsize,
        refuse: AtomicBool,
    }

    impl SyntheticOpener {
        fn new(fail_after: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                fail_after,
                stall: Duration::ZERO,
                opens: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
            })
        }

        /// Every capture blocks for `stall` before the frame arrives.
        fn stalling(stall: Duration) -> Arc<Self> {
            Arc::new(Self {
                fail_after: None,
                stall,
                opens: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
            })
        }
    }

    impl CameraOpener for SyntheticOpener {
        fn open(&self, settings: &VideoSettings) -> Result<Box<dyn Camera>> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(LabError::device(&settings.device, "no such device"));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SyntheticCamera {
                size: (settings.width, settings.height),
                period: Duration::from_secs(1) / settings.fps,
                next_due: Instant::now(),
                produced: 0,
                fail_after: self.fail_after,
                stall: self.stall,
            }))
        }
    }

    fn settings() -> VideoSettings {
        VideoSettings {
            device: "synthetic".into(),
            width: 64,
            height: 48,
            fps: 20,
            ..VideoSettings::default()
        }
    }

    #[test]
    fn preview_serves_live_frames() {
        let manager = VideoSessionManager::launch(settings(), SyntheticOpener::new(None));
        assert!(manager.is_capturing());

        let jpeg = manager.preview_frame().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let mut stream = manager.preview_stream();
        let first = stream.next_frame().unwrap();
        let second = stream.next_frame().unwrap();
        assert!(second.sequence > first.sequence);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn five_seconds_at_twenty_fps_records_about_a_hundred_frames() {
        if !muxer_available() {
            eprintln!("avimux not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_video.avi");
        let manager = VideoSessionManager::launch(settings(), SyntheticOpener::new(None));

        manager.start_recording(&path).await.unwrap();

        // A viewer pulls preview frames for the whole recording.
        let mut stream = manager.preview_stream();
        let viewer = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut served = 0u64;
            let mut last = None;
            while Instant::now() < deadline {
                let Some(frame) = stream.next_frame() else {
                    break;
                };
                assert!(last.map_or(true, |seen| frame.sequence > seen));
                last = Some(frame.sequence);
                let jpeg = encode_jpeg(&frame.image, 80).unwrap();
                assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
                served += 1;
            }
            served
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        let report = manager.stop_recording().await.unwrap().unwrap();
        let served = tokio::task::spawn_blocking(move || viewer.join().unwrap())
            .await
            .unwrap();

        assert!(
            (90..=110).contains(&report.frames),
            "recorded {} frames",
            report.frames
        );
        assert!(served > 50, "preview served only {served} frames");
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(u64::from(avi_total_frames(&bytes)), report.frames);
        assert!(!manager.status().recording);
    }

    #[tokio::test]
    async fn timed_out_start_never_leaves_a_recording_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late_video.avi");
        let settings = VideoSettings {
            command_timeout_ms: 100,
            ..settings()
        };
        let opener = SyntheticOpener::stalling(Duration::from_millis(400));
        let manager = VideoSessionManager::launch(settings, opener);

        assert!(matches!(
            manager.start_recording(&path).await,
            Err(LabError::Camera(_))
        ));
        // Give the capture thread time to reach the abandoned command.
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(!manager.status().recording);
        assert!(!path.exists());
        manager.shutdown();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn second_recording_is_refused() {
        if !muxer_available() {
            eprintln!("avimux not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let manager = VideoSessionManager::launch(settings(), SyntheticOpener::new(None));

        manager.start_recording(dir.path().join("a.avi")).await.unwrap();
        assert!(matches!(
            manager.start_recording(dir.path().join("b.avi")).await,
            Err(LabError::SessionAlreadyActive)
        ));
        assert!(manager.stop_recording().await.unwrap().is_some());
        assert_eq!(manager.stop_recording().await.unwrap(), None);
    }

    #[tokio::test]
    async fn camera_failure_finalizes_recording_and_silences_preview() {
        if !muxer_available() {
            eprintln!("avimux not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut_video.avi");
        let manager = VideoSessionManager::launch(settings(), SyntheticOpener::new(Some(10)));

        manager.start_recording(&path).await.unwrap();
        for _ in 0..100 {
            if !manager.is_capturing() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(!manager.is_capturing());
        assert!(manager.last_error().unwrap().contains("device unplugged"));
        assert!(matches!(
            manager.preview_frame(),
            Err(LabError::FrameUnavailable)
        ));

        let report = manager.stop_recording().await.unwrap().unwrap();
        assert!(report.frames <= 10);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(u64::from(avi_total_frames(&bytes)), report.frames);
        assert!(bytes.windows(4).any(|w| w == b"idx1"));
    }

    #[tokio::test]
    async fn unavailable_camera_degrades_until_reinitialized() {
        let opener = SyntheticOpener::new(None);
        opener.refuse.store(true, Ordering::SeqCst);
        let manager = VideoSessionManager::launch(settings(), opener.clone());

        assert!(!manager.is_capturing());
        assert!(manager.last_error().is_some());
        assert!(manager.start_recording("/tmp/never.avi").await.is_err());
        let placeholder = manager.preview_or_placeholder().unwrap();
        assert_eq!(&placeholder[..2], &[0xFF, 0xD8]);

        opener.refuse.store(false, Ordering::SeqCst);
        manager.reinitialize().unwrap();
        assert!(manager.is_capturing());
        assert!(manager.last_error().is_none());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
    }
}
