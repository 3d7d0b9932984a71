// crates/scale-vision-pipeline/src/pipeline.rs
//
// ControlPipeline: the single consumer loop. Pulls frames from the buffer,
// classifies under the inference lock, runs the decision engine, then the
// mapping / kill-switch / health gates, and dispatches to the output
// backend. One tick consumes at most one frame, which is what the
// integration tests drive directly.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use scale_vision_core::mapping::MapReason;
use scale_vision_core::types::{
    DecisionReason, DegradeReason, InferenceResult, IngestionStatus, OutputCommand,
};
use scale_vision_core::{quality_gate, AppConfig, DecisionEngine, Mapper};

use crate::buffer::FrameBuffer;
use crate::inference::{build_inference, InferenceBackend, StubInference};
use crate::loader::ConfigLoader;
use crate::output::OutputBackend;
use crate::state::RuntimeState;

const GET_TIMEOUT: Duration = Duration::from_secs(1);

pub struct ControlPipeline {
    state:         Arc<RuntimeState>,
    buffer:        Arc<FrameBuffer>,
    runner_status: Arc<Mutex<IngestionStatus>>,
    engine:        DecisionEngine,
    output:        Box<dyn OutputBackend>,
    loader:        ConfigLoader,
    config:        AppConfig,
    stop:          Arc<AtomicBool>,
}

impl ControlPipeline {
    pub fn new(
        state:         Arc<RuntimeState>,
        buffer:        Arc<FrameBuffer>,
        runner_status: Arc<Mutex<IngestionStatus>>,
        output:        Box<dyn OutputBackend>,
        loader:        ConfigLoader,
    ) -> Self {
        let config = state.config();
        let engine = DecisionEngine::new(config.decision);
        Self {
            state,
            buffer,
            runner_status,
            engine,
            output,
            loader,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// One-time model load. A load failure is recoverable only through the
    /// stub fallback; otherwise the reason stays set and the loop runs with
    /// no engine, producing NO_PREDICTION per frame.
    pub fn init_inference(&self) {
        let cfg = &self.config.inference;
        let mut backend = build_inference(cfg);
        match backend.load() {
            Ok(()) => {
                *self.state.inference.lock() = Some(backend);
            }
            Err(e) => {
                self.state.health.set_degraded(DegradeReason::InferenceLoadFailed);
                error!(backend = backend.name(), error = %e, "inference_load_failed");
                if cfg.fallback_to_stub {
                    let mut stub = StubInference::new(&cfg.stub_classes, cfg.top_k);
                    let _ = stub.load();
                    *self.state.inference.lock() = Some(Box::new(stub));
                    self.state.health.clear_reason(DegradeReason::InferenceLoadFailed);
                }
            }
        }
    }

    pub fn run(&mut self) {
        self.output.start();
        while !self.stop.load(Ordering::Relaxed) {
            self.tick();
        }
        self.output.stop();
    }

    /// Consume at most one frame. Returns false when the buffer timed out.
    pub fn tick(&mut self) -> bool {
        let Some(frame) = self.buffer.get(GET_TIMEOUT) else {
            self.state.health.set_degraded(DegradeReason::IngestionTimeout);
            return false;
        };
        self.state.health.clear_reason(DegradeReason::IngestionTimeout);

        self.state.update_ingestion_status(self.runner_status.lock().clone());
        self.state.update_latest_frame(frame.image.clone());

        let result = {
            let mut guard = self.state.inference.lock();
            let outcome = guard.as_mut().map(|b| (b.predict(&frame), b.name()));
            match outcome {
                // No engine loaded at all: every frame is a non-prediction.
                None => InferenceResult::default(),
                Some((Ok(result), _)) => {
                    self.state.health.clear_reason(DegradeReason::InferenceRuntimeFailed);
                    result
                }
                Some((Err(e), name)) => {
                    self.state.health.set_degraded(DegradeReason::InferenceRuntimeFailed);
                    error!(error = %e, "inference_runtime_failed");
                    if self.config.inference.fallback_to_stub && name != "stub" {
                        let cfg = &self.config.inference;
                        let mut stub = StubInference::new(&cfg.stub_classes, cfg.top_k);
                        let _ = stub.load();
                        *guard = Some(Box::new(stub));
                        self.state.health.clear_reason(DegradeReason::InferenceRuntimeFailed);
                    }
                    return true;
                }
            }
        };

        let quality_ok = quality_gate(&result);
        let health = self.state.health.snapshot();
        let ingestion_ok = !health.has_ingestion_reason()
            || !self.config.decision.block_on_ingestion_degraded;

        let mut decision =
            self.engine.process(&result, ingestion_ok, quality_ok, frame.frame_id, frame.timestamp);

        // Mapping gate.
        if decision.emitted {
            if let Some(class_id) = decision.class_id.clone() {
                let map = self.state.mapper().map_class(&class_id);
                match map.code {
                    Some(code) => decision.code = Some(code),
                    None => {
                        decision.emitted = false;
                        decision.reason_code = match map.reason {
                            MapReason::MappingDisabled => DecisionReason::MappingDisabled,
                            _ => DecisionReason::MappingMissing,
                        };
                    }
                }
            }
        }

        // Safety gates, then dispatch.
        if decision.emitted && decision.code.is_some() {
            if Path::new(&self.config.safety.kill_switch_file).exists() {
                decision.emitted = false;
                decision.reason_code = DecisionReason::KillSwitch;
            } else if health.degraded {
                decision.emitted = false;
                decision.reason_code = DecisionReason::HealthDegraded;
            } else {
                let command = OutputCommand {
                    request_id: decision.request_id.clone(),
                    code:       decision.code.clone().unwrap_or_default(),
                    terminator: self.config.output.serial.terminator.clone(),
                };
                match self.output.send(&command) {
                    Ok(()) => {
                        self.state.health.clear_reason(DegradeReason::OutputFailed);
                        self.state.metrics.inc_counter("emit", 1);
                    }
                    Err(e) => {
                        self.state.health.set_degraded(DegradeReason::OutputFailed);
                        decision.emitted = false;
                        decision.reason_code = DecisionReason::OutputFailed;
                        error!(error = %e, "output_failed");
                    }
                }
            }
        }

        info!(
            request_id  = %decision.request_id,
            state       = decision.state.as_str(),
            emitted     = decision.emitted,
            reason_code = decision.reason_code.as_str(),
            class_id    = decision.class_id.as_deref().unwrap_or(""),
            confidence  = decision.confidence,
            margin      = decision.margin,
            code        = decision.code.as_deref().unwrap_or(""),
            source      = %frame.source,
            frame_id    = frame.frame_id,
            "decision_event"
        );
        self.state.update_last_decision(decision);

        match self.loader.reload_if_changed() {
            Ok((loaded, true)) => {
                info!(checksum = %loaded.checksum, "config_reloaded");
                self.state.set_mapper(Arc::new(Mapper::new(loaded.config.mapping.clone())));
                // A config change is an episode boundary: rebuilding the
                // engine discards the current observation window.
                self.engine = DecisionEngine::new(loaded.config.decision);
                self.state.set_config(loaded.config.clone());
                self.config = loaded.config;
            }
            Ok((_, false)) => {}
            Err(e) => warn!(error = %e, "config_reload_failed"),
        }
        true
    }
}
