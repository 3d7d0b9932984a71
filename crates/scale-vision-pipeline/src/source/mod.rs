// crates/scale-vision-pipeline/src/source/mod.rs
//
// Frame sources. The runner only sees the capability surface below; the
// concrete variant is chosen once from config.

pub mod camera;
pub mod file;
pub mod reader;
pub mod rtsp;

use scale_vision_core::config::IngestionConfig;
use scale_vision_core::types::BgrImage;

pub use camera::CameraSource;
pub use file::FileSource;
pub use reader::MediaReader;
pub use rtsp::RtspSource;

pub trait FrameSource: Send {
    /// Idempotent; `false` means "not ready" (missing device, backoff window
    /// still open) and the runner will retry after a pause.
    fn open(&mut self) -> bool;

    /// One raw BGR frame, or `None` on a read failure / EOF.
    fn read(&mut self) -> Option<BgrImage>;

    fn close(&mut self);

    fn name(&self) -> &'static str;

    /// Reconnect attempts performed so far, for sources that reconnect.
    fn reconnections(&self) -> u64 {
        0
    }

    /// True while the file source substitutes synthetic zero frames for a
    /// missing input path.
    fn using_synthetic(&self) -> bool {
        false
    }
}

pub fn build_source(config: &IngestionConfig) -> Box<dyn FrameSource> {
    match config.source.as_str() {
        "camera" => Box::new(CameraSource::new(config.camera.clone(), config.normalize.fps)),
        "rtsp"   => Box::new(RtspSource::new()),
        _        => Box::new(FileSource::new(config.file.clone(), config.normalize.fps)),
    }
}
