// crates/scale-vision-pipeline/src/output/hid.rs
//
// HID keyboard-wedge output. Placeholder: logs what would be typed.

use tracing::info;

use scale_vision_core::types::OutputCommand;

use crate::output::{OutputBackend, OutputError};

#[derive(Default)]
pub struct HidOutput;

impl HidOutput {
    pub fn new() -> Self {
        Self
    }
}

impl OutputBackend for HidOutput {
    fn start(&mut self) {}

    fn send(&mut self, command: &OutputCommand) -> Result<(), OutputError> {
        info!(request_id = %command.request_id, code = %command.code, "hid_stub_emit");
        Ok(())
    }

    fn stop(&mut self) {}

    fn name(&self) -> &'static str {
        "hid"
    }
}
