// crates/scale-vision-pipeline/src/output/mod.rs
//
// Output dispatch: best-effort delivery of product codes to a peripheral.
// `send` may fail; the control loop reports OUTPUT_FAILED and moves on.

pub mod hid;
pub mod serial;

use thiserror::Error;

use scale_vision_core::config::OutputConfig;
use scale_vision_core::types::OutputCommand;

pub use hid::HidOutput;
pub use serial::SerialOutput;
pub use test::TestOutput;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output not connected: {0}")]
    NotConnected(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait OutputBackend: Send {
    fn start(&mut self);
    fn send(&mut self, command: &OutputCommand) -> Result<(), OutputError>;
    fn stop(&mut self);
    fn name(&self) -> &'static str;
}

pub fn build_output(config: &OutputConfig) -> Box<dyn OutputBackend> {
    match config.backend.as_str() {
        "serial" => Box::new(SerialOutput::new(config.serial.clone())),
        "hid"    => Box::new(HidOutput::new()),
        _        => Box::new(TestOutput::new()),
    }
}
