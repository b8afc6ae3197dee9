use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};

use crate::error::{LabError, Result};
use crate::settings::VideoSettings;

/// A video source owned by the capture thread.
pub trait Camera {
    /// Blocks until the next frame is available.
    fn capture(&mut self) -> Result<RgbImage>;
}

/// Opens cameras on the capture thread, so the camera itself never has to
/// cross threads.
pub trait CameraOpener: Send + Sync {
    fn open(&self, settings: &VideoSettings) -> Result<Box<dyn Camera>>;
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(image)?;
    Ok(out)
}

pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    Ok(image::load(Cursor::new(bytes), ImageFormat::Jpeg)?.to_rgb8())
}

/// Flat gray "no signal" frame served when no live frame is available.
pub fn placeholder_jpeg(width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let image = RgbImage::from_pixel(width.max(1), height.max(1), Rgb([64, 64, 64]));
    encode_jpeg(&image, quality)
}

/// Packed YUYV 4:2:2 to RGB (BT.601, studio swing).
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected || width % 2 != 0 {
        return Err(LabError::Camera(format!(
            "YUYV buffer of {} bytes does not fit {width}x{height}",
            yuyv.len()
        )));
    }

    let clamp = |v: i32| v.clamp(0, 255) as u8;
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for px in yuyv[..expected].chunks_exact(4) {
        let u = i32::from(px[1]) - 128;
        let v = i32::from(px[3]) - 128;
        for y in [px[0], px[2]] {
            let c = 298 * (i32::from(y) - 16);
            rgb.push(clamp((c + 409 * v + 128) >> 8));
            rgb.push(clamp((c - 100 * u - 208 * v + 128) >> 8));
            rgb.push(clamp((c + 516 * u + 128) >> 8));
        }
    }

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| LabError::Camera("YUYV conversion produced a short buffer".into()))
}

#[cfg(target_os = "linux")]
pub use v4l_camera::{V4lCamera, V4lCameraOpener};

#[cfg(target_os = "linux")]
mod v4l_camera {
    use image::RgbImage;
    use log::{info, warn};
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream as MmapStream;
    use v4l::io::traits::CaptureStream;
    use v4l::video::capture::Parameters;
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    use super::{decode_jpeg, yuyv_to_rgb, Camera, CameraOpener};
    use crate::error::{LabError, Result};
    use crate::settings::VideoSettings;

    const BUFFER_COUNT: u32 = 4;

    pub struct V4lCamera {
        // Declared before the device so it is dropped first.
        stream: MmapStream<'static>,
        fourcc: FourCC,
        width: u32,
        height: u32,
        _device: Device,
    }

    impl Camera for V4lCamera {
        fn capture(&mut self) -> Result<RgbImage> {
            let (buf, meta) = self
                .stream
                .next()
                .map_err(|err| LabError::Camera(format!("frame dequeue failed: {err}")))?;
            let used = meta.bytesused as usize;
            let data = if used > 0 && used <= buf.len() { &buf[..used] } else { buf };
            if data.is_empty() {
                return Err(LabError::Camera("camera returned an empty buffer".into()));
            }

            if self.fourcc == FourCC::new(b"MJPG") {
                decode_jpeg(data)
            } else {
                yuyv_to_rgb(data, self.width, self.height)
            }
        }
    }

    /// Opens a V4L2 device, asking for MJPG at the configured size and rate.
    pub struct V4lCameraOpener;

    impl CameraOpener for V4lCameraOpener {
        fn open(&self, settings: &VideoSettings) -> Result<Box<dyn Camera>> {
            let device = Device::with_path(&settings.device)
                .map_err(|err| LabError::device(&settings.device, err))?;

            let mut format = device
                .format()
                .map_err(|err| LabError::device(&settings.device, err))?;
            format.width = settings.width;
            format.height = settings.height;
            format.fourcc = FourCC::new(b"MJPG");
            let format = device
                .set_format(&format)
                .map_err(|err| LabError::device(&settings.device, err))?;

            if format.fourcc != FourCC::new(b"MJPG") && format.fourcc != FourCC::new(b"YUYV") {
                return Err(LabError::device(
                    &settings.device,
                    format!("unsupported pixel format {}", format.fourcc),
                ));
            }

            if let Err(err) = device.set_params(&Parameters::with_fps(settings.fps)) {
                warn!("{} ignored frame rate {}: {err}", settings.device, settings.fps);
            }

            let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
                .map_err(|err| LabError::device(&settings.device, err))?;

            info!(
                "Opened {} at {}x{} {} (requested {}x{} @ {} fps)",
                settings.device,
                format.width,
                format.height,
                format.fourcc,
                settings.width,
                settings.height,
                settings.fps
            );

            Ok(Box::new(V4lCamera {
                stream,
                fourcc: format.fourcc,
                width: format.width,
                height: format.height,
                _device: device,
            }))
        }
    }
}
