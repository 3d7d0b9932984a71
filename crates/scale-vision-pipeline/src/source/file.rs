// crates/scale-vision-pipeline/src/source/file.rs
//
// File-backed source: a still image, a video, or — when the path is missing
// and `allow_missing` is set — a synthetic zero frame. `replay_mode =
// "realtime"` paces reads to 1/fps on the monotonic clock.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::warn;

use scale_vision_core::config::FileConfig;
use scale_vision_core::types::BgrImage;

use crate::source::{FrameSource, MediaReader};

const SYNTHETIC_W: u32 = 640;
const SYNTHETIC_H: u32 = 480;

pub struct FileSource {
    config:     FileConfig,
    target_fps: u32,
    opened:     bool,
    synthetic:  bool,
    /// Cached frame for still images and synthetic mode.
    still: Option<BgrImage>,
    video: Option<MediaReader>,
    /// First decoded frame, held until we know whether the input is a
    /// single-frame still (EOF right after frame 1) or a real video.
    first_frame:    Option<BgrImage>,
    frames_decoded: u64,
    /// Set when the configured duration window cut playback short — that is
    /// not a true EOF and must not trigger still-image detection.
    duration_cut: bool,
    last_read:    Option<Instant>,
}

impl FileSource {
    pub fn new(config: FileConfig, target_fps: u32) -> Self {
        Self {
            config,
            target_fps,
            opened:         false,
            synthetic:      false,
            still:          None,
            video:          None,
            first_frame:    None,
            frames_decoded: 0,
            duration_cut:   false,
            last_read:      None,
        }
    }

    /// Sleep the remainder of the frame interval when replaying in realtime.
    fn pace(&mut self) {
        if self.config.replay_mode != "realtime" {
            return;
        }
        let fps = match &self.video {
            Some(v) if v.fps > 0.0 => v.fps,
            _ => self.target_fps as f64,
        };
        if fps <= 0.0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / fps);
        if let Some(last) = self.last_read {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_read = Some(Instant::now());
    }

    fn past_duration_window(&self, pos_secs: f64) -> bool {
        self.config.duration_ms > 0
            && pos_secs * 1000.0 >= (self.config.start_ms + self.config.duration_ms) as f64
    }

    fn read_video_frame(&mut self) -> Option<BgrImage> {
        let reader = self.video.as_mut()?;
        match reader.next_frame() {
            Some((image, pos)) => {
                if self.past_duration_window(pos) {
                    // Window exhausted counts as end-of-stream.
                    self.duration_cut = true;
                    return None;
                }
                self.frames_decoded += 1;
                if self.frames_decoded == 1 {
                    self.first_frame = Some(image.clone());
                } else {
                    self.first_frame = None;
                }
                Some(image)
            }
            None => None,
        }
    }
}

impl FrameSource for FileSource {
    fn open(&mut self) -> bool {
        if self.opened {
            return true;
        }
        let path = Path::new(&self.config.path);
        if !path.exists() {
            if !self.config.allow_missing {
                return false;
            }
            self.synthetic = true;
            self.still = Some(BgrImage::zeroed(SYNTHETIC_W, SYNTHETIC_H));
            self.opened = true;
            return true;
        }
        self.synthetic = false;
        match MediaReader::open(path) {
            Ok(mut reader) => {
                if self.config.start_ms > 0 {
                    reader.seek_ms(self.config.start_ms);
                }
                self.video = Some(reader);
                self.frames_decoded = 0;
                self.first_frame = None;
                self.duration_cut = false;
                self.opened = true;
                true
            }
            Err(e) => {
                warn!(path = %self.config.path, error = %e, "file source open failed");
                false
            }
        }
    }

    fn read(&mut self) -> Option<BgrImage> {
        if !self.opened && !self.open() {
            return None;
        }
        self.pace();

        if let Some(still) = &self.still {
            return Some(still.clone());
        }

        if let Some(image) = self.read_video_frame() {
            return Some(image);
        }

        // EOF directly after the first frame means the input was a still
        // image all along — cache it and serve it from memory.
        if self.frames_decoded == 1 && !self.duration_cut {
            if let Some(first) = self.first_frame.take() {
                self.video = None;
                self.still = Some(first.clone());
                return Some(first);
            }
        }

        if self.config.loop_playback {
            self.close();
            if self.open() {
                return self.read_video_frame();
            }
        }
        None
    }

    fn close(&mut self) {
        self.video = None;
        if !self.synthetic {
            self.still = None;
        }
        self.opened = false;
    }

    fn name(&self) -> &'static str {
        "file"
    }

    fn using_synthetic(&self) -> bool {
        self.synthetic
    }
}
