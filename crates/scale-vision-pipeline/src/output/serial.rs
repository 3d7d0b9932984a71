// crates/scale-vision-pipeline/src/output/serial.rs
//
// Serial peripheral output. Writes `code + terminator` as ASCII and
// flushes. Connect failures are retried at most every `reconnect_ms`, on
// the next send — never from a background thread.

use std::io::Write;
use std::time::{Duration, Instant};

use serialport::{Parity, SerialPort, StopBits};
use tracing::warn;

use scale_vision_core::config::SerialConfig;
use scale_vision_core::types::OutputCommand;

use crate::output::{OutputBackend, OutputError};

pub struct SerialOutput {
    config:       SerialConfig,
    port:         Option<Box<dyn SerialPort>>,
    last_connect: Option<Instant>,
}

impl SerialOutput {
    pub fn new(config: SerialConfig) -> Self {
        Self { config, port: None, last_connect: None }
    }

    fn connect(&mut self) {
        if self.port.is_some() {
            return;
        }
        let now = Instant::now();
        if let Some(last) = self.last_connect {
            if now.duration_since(last) < Duration::from_millis(self.config.reconnect_ms) {
                return;
            }
        }
        self.last_connect = Some(now);

        let parity = match self.config.parity.to_lowercase().as_str() {
            "even" => Parity::Even,
            "odd"  => Parity::Odd,
            _      => Parity::None,
        };
        let stop_bits = match self.config.stopbits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };
        match serialport::new(self.config.device.clone(), self.config.baudrate)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_secs(1))
            .open()
        {
            Ok(port) => self.port = Some(port),
            Err(e) => {
                warn!(device = %self.config.device, error = %e, "serial_connect_failed");
                self.port = None;
            }
        }
    }
}

impl OutputBackend for SerialOutput {
    fn start(&mut self) {
        self.connect();
    }

    fn send(&mut self, command: &OutputCommand) -> Result<(), OutputError> {
        if self.port.is_none() {
            self.connect();
        }
        let Some(port) = self.port.as_mut() else {
            return Err(OutputError::NotConnected(self.config.device.clone()));
        };

        // The peripheral speaks ASCII; anything else is stripped.
        let payload: Vec<u8> = format!("{}{}", command.code, command.terminator)
            .bytes()
            .filter(u8::is_ascii)
            .collect();

        if let Err(e) = port.write_all(&payload).and_then(|_| port.flush()) {
            // Drop the connection so the next send reconnects.
            self.port = None;
            return Err(OutputError::Io(e));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.port = None;
    }

    fn name(&self) -> &'static str {
        "serial"
    }
}
