#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use labwatch::error::Result;
use labwatch::settings::VideoSettings;
use labwatch::video::Camera;
use labwatch::{CameraOpener, LabError, Readings, SensorArray};

/// Four thermistors and a thermocouple with slowly rising values.
pub struct FakeSensors {
    pub samples: Arc<AtomicU64>,
    pub fail: Arc<AtomicBool>,
}

impl FakeSensors {
    pub fn new() -> Self {
        Self {
            samples: Arc::new(AtomicU64::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl SensorArray for FakeSensors {
    fn thermistor_count(&self) -> usize {
        4
    }

    fn sample(&mut self) -> Result<Readings> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LabError::Bus("spidev0.0: Other".into()));
        }
        let n = self.samples.fetch_add(1, Ordering::SeqCst) as f64;
        Ok(Readings {
            thermistors: vec![25.0 + n, 26.0 + n, 27.0 + n, 28.0 + n],
            thermocouple: 150.0 + n,
        })
    }
}

/// Delivers frames at the configured rate like a real device would.
pub struct PacedCamera {
    width: u32,
    height: u32,
    period: Duration,
    next_due: Instant,
    frame: u32,
    stall: Duration,
}

impl Camera for PacedCamera {
    fn capture(&mut self) -> Result<RgbImage> {
        thread::sleep(self.stall);
        let now = Instant::now();
        if self.next_due > now {
            thread::sleep(self.next_due - now);
        }
        self.next_due += self.period;
        self.frame = self.frame.wrapping_add(1);
        let shade = (self.frame % 200) as u8;
        Ok(RgbImage::from_pixel(self.width, self.height, Rgb([shade, 80, 160])))
    }
}

pub struct PacedOpener {
    pub available: AtomicBool,
    /// Extra time each capture blocks, on top of the frame period.
    pub stall: Duration,
}

impl PacedOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            stall: Duration::ZERO,
        })
    }

    pub fn missing() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(false),
            stall: Duration::ZERO,
        })
    }

    /// A camera slow enough that recording commands time out.
    pub fn stalling(stall: Duration) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            stall,
        })
    }
}

impl CameraOpener for PacedOpener {
    fn open(&self, settings: &VideoSettings) -> Result<Box<dyn Camera>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(LabError::device(&settings.device, "No such file or directory"));
        }
        Ok(Box::new(PacedCamera {
            width: settings.width,
            height: settings.height,
            period: Duration::from_secs(1) / settings.fps,
            next_due: Instant::now(),
            frame: 0,
            stall: self.stall,
        }))
    }
}

pub fn video_settings() -> VideoSettings {
    VideoSettings {
        device: "fake0".into(),
        width: 80,
        height: 60,
        fps: 20,
        ..VideoSettings::default()
    }
}
