// crates/scale-vision-pipeline/src/source/rtsp.rs
//
// Placeholder: rtsp ingestion is not wired up yet. `open` keeps failing so
// the runner reports INGESTION_OPEN_FAILED instead of silently idling.

use scale_vision_core::types::BgrImage;

use crate::source::FrameSource;

#[derive(Default)]
pub struct RtspSource;

impl RtspSource {
    pub fn new() -> Self {
        Self
    }
}

impl FrameSource for RtspSource {
    fn open(&mut self) -> bool {
        false
    }

    fn read(&mut self) -> Option<BgrImage> {
        None
    }

    fn close(&mut self) {}

    fn name(&self) -> &'static str {
        "rtsp"
    }
}
