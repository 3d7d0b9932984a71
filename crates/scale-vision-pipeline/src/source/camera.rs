// crates/scale-vision-pipeline/src/source/camera.rs
//
// Capture-device source with linear reconnect backoff. Two open paths:
// the default opens the device through ffmpeg, `backend = "gstreamer"`
// runs the configured pipeline string through an appsink instead. After a
// read failure the capture is torn down and `open()` keeps returning false
// until `backoff_ms × reconnections` (capped) has passed, which makes the
// runner idle-poll instead of hammering the device.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tracing::warn;

use ffmpeg_the_third as ffmpeg;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use scale_vision_core::config::CameraConfig;
use scale_vision_core::types::BgrImage;

use crate::source::{FrameSource, MediaReader};

enum Capture {
    Ffmpeg(MediaReader),
    Gst(GstCapture),
}

pub struct CameraSource {
    config:        CameraConfig,
    target_fps:    u32,
    capture:       Option<Capture>,
    next_attempt:  Option<Instant>,
    reconnections: u64,
}

impl CameraSource {
    pub fn new(config: CameraConfig, target_fps: u32) -> Self {
        Self {
            config,
            target_fps,
            capture:       None,
            next_attempt:  None,
            reconnections: 0,
        }
    }

    fn backoff(&self, multiplier: u64) -> Duration {
        let ms = self
            .config
            .reconnect
            .max_backoff_ms
            .min(self.config.reconnect.backoff_ms.saturating_mul(multiplier.max(1)));
        Duration::from_millis(ms)
    }

    fn open_capture(&self) -> Result<Capture> {
        if self.config.backend == "gstreamer" && !self.config.gstreamer_pipeline.is_empty() {
            return GstCapture::open(&self.config.gstreamer_pipeline).map(Capture::Gst);
        }
        let mut options = ffmpeg::Dictionary::new();
        if self.target_fps > 0 {
            options.set("framerate", &self.target_fps.to_string());
        }
        MediaReader::open_with(Path::new(&self.config.device), options).map(Capture::Ffmpeg)
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> bool {
        if self.capture.is_some() {
            return true;
        }
        let now = Instant::now();
        if self.config.reconnect.enabled {
            if let Some(next) = self.next_attempt {
                if now < next {
                    return false;
                }
            }
        }
        match self.open_capture() {
            Ok(capture) => {
                self.capture = Some(capture);
                self.next_attempt = None;
                true
            }
            Err(e) => {
                warn!(
                    device = %self.config.device,
                    backend = %self.config.backend,
                    error = %e,
                    "camera open failed"
                );
                if self.config.reconnect.enabled {
                    self.next_attempt = Some(now + self.backoff(1));
                }
                false
            }
        }
    }

    fn read(&mut self) -> Option<BgrImage> {
        if self.capture.is_none() && !self.open() {
            return None;
        }
        let frame = match self.capture.as_mut() {
            Some(Capture::Ffmpeg(reader)) => reader.next_frame().map(|(image, _)| image),
            Some(Capture::Gst(capture)) => capture.next_frame(),
            None => None,
        };
        match frame {
            Some(image) => Some(image),
            None => {
                self.close();
                if self.config.reconnect.enabled {
                    self.reconnections += 1;
                    self.next_attempt = Some(Instant::now() + self.backoff(self.reconnections));
                }
                None
            }
        }
    }

    fn close(&mut self) {
        self.capture = None;
    }

    fn name(&self) -> &'static str {
        "camera"
    }

    fn reconnections(&self) -> u64 {
        self.reconnections
    }
}

// ── GStreamer capture ─────────────────────────────────────────────────────────

/// A user-supplied launch pipeline feeding an appsink named "sink". The
/// appsink caps are forced to packed BGR so the pipeline only needs a
/// videoconvert in front of it.
struct GstCapture {
    pipeline: gst::Pipeline,
    appsink:  gst_app::AppSink,
}

impl GstCapture {
    fn open(description: &str) -> Result<Self> {
        gst::init()?;
        let pipeline = gst::parse::launch(description)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow!("not a pipeline: {description}"))?;
        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.dynamic_cast::<gst_app::AppSink>().ok())
            .ok_or_else(|| anyhow!("pipeline has no appsink named \"sink\""))?;
        appsink.set_caps(Some(
            &gst::Caps::builder("video/x-raw").field("format", "BGR").build(),
        ));
        pipeline.set_state(gst::State::Playing)?;
        Ok(Self { pipeline, appsink })
    }

    fn next_frame(&mut self) -> Option<BgrImage> {
        let sample = self.appsink.try_pull_sample(gst::ClockTime::from_seconds(1))?;
        let caps = sample.caps()?;
        let structure = caps.structure(0)?;
        let width = structure.get::<i32>("width").ok()? as u32;
        let height = structure.get::<i32>("height").ok()? as u32;

        let buffer = sample.buffer()?;
        let map = buffer.map_readable().ok()?;
        let expected = width as usize * height as usize * 3;
        let data = map.as_slice();
        if width == 0 || height == 0 || data.len() < expected {
            return None;
        }
        Some(BgrImage { data: data[..expected].to_vec(), width, height })
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scale_vision_core::config::CameraReconnectConfig;

    #[test]
    fn missing_device_schedules_backoff() {
        let config = CameraConfig {
            device: "/nonexistent/video99".into(),
            reconnect: CameraReconnectConfig {
                enabled: true,
                backoff_ms: 60_000,
                max_backoff_ms: 60_000,
            },
            ..Default::default()
        };
        let mut source = CameraSource::new(config, 15);
        assert!(!source.open());
        // Backoff window open: the next attempt short-circuits.
        assert!(!source.open());
        assert!(source.read().is_none());
    }

    #[test]
    fn invalid_gstreamer_pipeline_fails_open() {
        let config = CameraConfig {
            backend: "gstreamer".into(),
            gstreamer_pipeline: "no-such-element ! appsink name=sink".into(),
            reconnect: CameraReconnectConfig {
                enabled: false,
                backoff_ms: 1000,
                max_backoff_ms: 1000,
            },
            ..Default::default()
        };
        let mut source = CameraSource::new(config, 15);
        assert!(!source.open());
        assert!(source.read().is_none());
    }

    #[test]
    fn empty_gstreamer_pipeline_falls_back_to_device() {
        // backend "gstreamer" with no pipeline string still opens the
        // device path (and fails here because it doesn't exist).
        let config = CameraConfig {
            device: "/nonexistent/video99".into(),
            backend: "gstreamer".into(),
            reconnect: CameraReconnectConfig {
                enabled: false,
                backoff_ms: 1000,
                max_backoff_ms: 1000,
            },
            ..Default::default()
        };
        let mut source = CameraSource::new(config, 15);
        assert!(!source.open());
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let config = CameraConfig {
            reconnect: CameraReconnectConfig {
                enabled: true,
                backoff_ms: 1000,
                max_backoff_ms: 3000,
            },
            ..Default::default()
        };
        let source = CameraSource::new(config, 15);
        assert_eq!(source.backoff(1), Duration::from_millis(1000));
        assert_eq!(source.backoff(2), Duration::from_millis(2000));
        assert_eq!(source.backoff(7), Duration::from_millis(3000));
    }
}
