//! V4L2 capture source with memory-mapped buffers

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::{decoder, Frame, FrameSink, PixelFormat};
use crate::error::CaptureError;
use crate::CaptureConfig;

/// Capture source backed by a V4L2 device
pub struct V4l2Capture {
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl V4l2Capture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn open(config: &CaptureConfig) -> Result<Device> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device)?;
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
            _ => return Err(eyre!("Unsupported pixel format")),
        };
        device.set_format(&fmt)?;
        Ok(device)
    }

    fn run(config: CaptureConfig, device: Device, running: Arc<AtomicBool>, sink: FrameSink) -> Result<()> {
        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)?;
        info!("Capture stream started with {} buffers", config.buffer_count);

        let mut sequence = 0u64;
        while running.load(Ordering::Acquire) {
            let timestamp = Instant::now();
            let (buf, meta) = stream.next()?;

            let image = match decoder::decode_frame(buf, config.format, config.width, config.height) {
                Ok(image) => image,
                Err(e) => {
                    warn!("Dropping undecodable frame: {}", e);
                    continue;
                }
            };

            let mut frame = Frame::new(image, sequence, timestamp);
            frame.meta.source_format = Some(config.format);
            frame.meta.device_timestamp = Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            );
            sink(frame);
            sequence += 1;
        }
        Ok(())
    }
}

impl super::CaptureSource for V4l2Capture {
    fn start(&mut self, sink: FrameSink) -> std::result::Result<(), CaptureError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        // Open synchronously so a missing device fails stream startup.
        let device = match Self::open(&self.config) {
            Ok(device) => device,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(CaptureError::Device(e.to_string()));
            }
        };

        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let worker = std::thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || {
                if let Err(e) = Self::run(config, device, Arc::clone(&running), sink) {
                    error!("Capture error: {}", e);
                }
                running.store(false, Ordering::Release);
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("V4L2 capture thread panicked");
            }
        }
    }
}

impl Drop for V4l2Capture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Fill in the device and pixel format by probing when none is configured.
pub fn resolve_device(mut config: CaptureConfig) -> Result<CaptureConfig> {
    if config.device.is_empty() {
        let (device, format) = auto_detect_device()?;
        config.device = device;
        config.format = format;
    }
    info!("Using capture device: {} ({:?})", config.device, config.format);
    Ok(config)
}

/// Auto-detect best capture device
pub fn auto_detect_device() -> Result<(String, PixelFormat)> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else { continue };
        let Ok(caps) = dev.query_caps() else { continue };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        if let Ok(formats) = dev.enum_formats() {
            for fmt in formats {
                if fmt.fourcc == FourCC::new(b"MJPG") {
                    info!("Found MJPEG device: {} - {}", path, caps.card);
                    return Ok((path, PixelFormat::Mjpeg));
                } else if fmt.fourcc == FourCC::new(b"YUYV") {
                    info!("Found YUYV device: {} - {}", path, caps.card);
                    return Ok((path, PixelFormat::Yuyv4));
                }
            }
        }
    }

    Err(eyre!("No suitable capture device found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_device_skips_probing() {
        let config = CaptureConfig {
            device: "/dev/video7".into(),
            format: PixelFormat::Yuyv4,
            ..CaptureConfig::default()
        };
        let resolved = resolve_device(config).unwrap();
        assert_eq!(resolved.device, "/dev/video7");
        assert_eq!(resolved.format, PixelFormat::Yuyv4);
    }
}
