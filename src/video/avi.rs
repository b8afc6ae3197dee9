//! MJPEG-in-AVI recording through GStreamer.
//!
//! Pipeline: `appsrc(image/jpeg) ! avimux ! filesink`. Frames arrive already
//! JPEG-encoded, so no encoder element is needed. `avimux` runs with OpenDML
//! (AVI 2.0) enabled, so recordings past the 1 GiB RIFF limit continue in
//! `AVIX` extension chunks instead of overflowing the container.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use crate::error::{LabError, Result};

const FINISH_TIMEOUT_SECS: u64 = 30;
const NANOS_PER_SECOND: u128 = 1_000_000_000;

fn gst_error(context: &str, err: impl std::fmt::Display) -> LabError {
    LabError::Camera(format!("{context}: {err}"))
}

/// True when GStreamer initialises and the `avimux` element is installed.
pub fn muxer_available() -> bool {
    gst::init().is_ok() && gst::ElementFactory::find("avimux").is_some()
}

/// Presentation timestamp of frame `index` at a constant `fps`, saturating
/// at `ClockTime::MAX`.
pub fn frame_pts(index: u64, fps: u32) -> gst::ClockTime {
    let nanos = u128::from(index) * NANOS_PER_SECOND / u128::from(fps.max(1));
    let max = gst::ClockTime::MAX.nseconds();
    gst::ClockTime::from_nseconds(u64::try_from(nanos).map_or(max, |n| n.min(max)))
}

pub struct MjpegAviWriter {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    path: PathBuf,
    fps: u32,
    frames: u64,
    bytes: u64,
    finished: bool,
}

impl MjpegAviWriter {
    /// Creates (truncating) `path` and starts the muxing pipeline.
    pub fn create(path: impl Into<PathBuf>, width: u32, height: u32, fps: u32) -> Result<Self> {
        let path = path.into();
        if fps == 0 {
            return Err(LabError::InvalidParameter {
                name: "fps",
                reason: "must be positive".into(),
            });
        }
        let location = path
            .to_str()
            .ok_or_else(|| LabError::InvalidParameter {
                name: "video path",
                reason: format!("{} is not valid UTF-8", path.display()),
            })?
            .to_string();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| LabError::io(parent, err))?;
        }

        gst::init().map_err(|err| gst_error("failed to initialise GStreamer", err))?;

        let caps = gst::Caps::builder("image/jpeg")
            .field("width", i32::try_from(width).unwrap_or(i32::MAX))
            .field("height", i32::try_from(height).unwrap_or(i32::MAX))
            .field(
                "framerate",
                gst::Fraction::new(i32::try_from(fps).unwrap_or(i32::MAX), 1),
            )
            .build();

        let pipeline = gst::Pipeline::new();
        let appsrc = gst_app::AppSrc::builder()
            .name("src")
            .caps(&caps)
            .format(gst::Format::Time)
            .block(true)
            .build();
        let mux = gst::ElementFactory::make("avimux")
            .name("mux")
            .property("bigfile", true)
            .build()
            .map_err(|err| gst_error("failed to create avimux", err))?;
        let sink = gst::ElementFactory::make("filesink")
            .name("sink")
            .property("location", location.as_str())
            .build()
            .map_err(|err| gst_error("failed to create filesink", err))?;

        pipeline
            .add_many([appsrc.upcast_ref(), &mux, &sink])
            .map_err(|err| gst_error("failed to assemble recording pipeline", err))?;
        gst::Element::link_many([appsrc.upcast_ref(), &mux, &sink])
            .map_err(|err| gst_error("failed to link recording pipeline", err))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|err| gst_error("failed to start recording pipeline", err))?;

        Ok(Self {
            pipeline,
            appsrc,
            path,
            fps,
            frames: 0,
            bytes: 0,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// JPEG payload bytes handed to the muxer so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Whether the muxer will switch to OpenDML extension chunks past the
    /// classic RIFF size limit.
    pub fn supports_large_files(&self) -> bool {
        self.pipeline
            .by_name("mux")
            .is_some_and(|mux| mux.property::<bool>("bigfile"))
    }

    /// Appends one JPEG-encoded frame. Blocks while the muxer's input queue
    /// is full.
    pub fn write_frame(&mut self, jpeg: &[u8]) -> Result<()> {
        self.check_bus()?;

        let mut buffer = gst::Buffer::from_slice(jpeg.to_vec());
        {
            let buffer = buffer.make_mut();
            buffer.set_pts(frame_pts(self.frames, self.fps));
            buffer.set_duration(frame_pts(1, self.fps));
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|err| gst_error(&format!("muxer rejected frame {}", self.frames), err))?;

        self.frames += 1;
        self.bytes += jpeg.len() as u64;
        Ok(())
    }

    /// Surfaces an asynchronous pipeline failure (disk full, sink error).
    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        match bus.pop_filtered(&[gst::MessageType::Error]) {
            Some(msg) => match msg.view() {
                gst::MessageView::Error(err) => Err(LabError::Camera(format!(
                    "recording to {} failed: {} ({})",
                    self.path.display(),
                    err.error(),
                    err.debug().unwrap_or_default()
                ))),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Sends end-of-stream, waits for the muxer to rewrite its headers and
    /// index, and syncs the file. Returns the number of frames recorded.
    pub fn finish(mut self) -> Result<u64> {
        self.finalize()
    }

    fn finalize(&mut self) -> Result<u64> {
        if self.finished {
            return Ok(self.frames);
        }
        self.finished = true;
        let result = self.drain();
        let _ = self.pipeline.set_state(gst::State::Null);
        result?;

        File::open(&self.path)
            .and_then(|file| file.sync_all())
            .map_err(|err| LabError::io(&self.path, err))?;
        Ok(self.frames)
    }

    fn drain(&self) -> Result<()> {
        self.appsrc
            .end_of_stream()
            .map_err(|err| gst_error("failed to send end-of-stream", err))?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| LabError::Camera("recording pipeline has no bus".into()))?;
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(FINISH_TIMEOUT_SECS)) {
            match msg.view() {
                gst::MessageView::Eos(..) => return Ok(()),
                gst::MessageView::Error(err) => {
                    return Err(LabError::Camera(format!(
                        "finalizing {} failed: {} ({})",
                        self.path.display(),
                        err.error(),
                        err.debug().unwrap_or_default()
                    )));
                }
                _ => {}
            }
        }
        Err(LabError::Camera(format!(
            "muxer did not finish {} within {FINISH_TIMEOUT_SECS}s",
            self.path.display()
        )))
    }
}

impl Drop for MjpegAviWriter {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.finalize() {
                log::error!("Failed to finalize {}: {err}", self.path.display());
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::video::camera::encode_jpeg;
    use image::{Rgb, RgbImage};

    /// `avih.dwTotalFrames`: RIFF(12) + LIST hdrl(12) + avih header(8) + 16.
    pub(crate) fn avi_total_frames(bytes: &[u8]) -> u32 {
        u32::from_le_bytes([bytes[48], bytes[49], bytes[50], bytes[51]])
    }

    fn jpeg(shade: u8) -> Vec<u8> {
        encode_jpeg(&RgbImage::from_pixel(64, 48, Rgb([shade, 0, 0])), 80).unwrap()
    }

    #[test]
    fn timestamps_stay_exact_past_u32_frame_counts() {
        assert_eq!(frame_pts(0, 20).nseconds(), 0);
        assert_eq!(frame_pts(20, 20).nseconds(), 1_000_000_000);
        assert_eq!(frame_pts(1, 20).nseconds(), 50_000_000);

        // A week at 20 fps is ~12M frames; go far past u32 anyway.
        let frames = u64::from(u32::MAX) + 20;
        assert_eq!(frame_pts(frames, 20).nseconds(), frames * 50_000_000);
        assert!(frame_pts(frames + 1, 20) > frame_pts(frames, 20));
        assert_eq!(frame_pts(u64::MAX, 1), gst::ClockTime::MAX);
    }

    #[test]
    fn writes_a_playable_avi_with_large_file_support() {
        if !muxer_available() {
            eprintln!("avimux not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");

        let mut writer = MjpegAviWriter::create(&path, 64, 48, 20).unwrap();
        assert!(writer.supports_large_files());
        for shade in 0..10u8 {
            writer.write_frame(&jpeg(shade * 20)).unwrap();
        }
        assert_eq!(writer.frame_count(), 10);
        assert!(writer.bytes_written() > 0);
        assert_eq!(writer.finish().unwrap(), 10);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
        assert_eq!(avi_total_frames(&bytes), 10);
        assert!(bytes.windows(4).any(|w| w == b"idx1"));
    }

    #[test]
    fn dropped_writer_still_finalizes() {
        if !muxer_available() {
            eprintln!("avimux not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.avi");
        {
            let mut writer = MjpegAviWriter::create(&path, 64, 48, 10).unwrap();
            writer.write_frame(&jpeg(1)).unwrap();
        }
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(avi_total_frames(&bytes), 1);
    }

    #[test]
    fn zero_fps_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MjpegAviWriter::create(dir.path().join("x.avi"), 8, 8, 0).is_err());
    }
}
