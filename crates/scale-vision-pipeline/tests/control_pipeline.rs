// crates/scale-vision-pipeline/tests/control_pipeline.rs
//
// End-to-end scenarios through the real ControlPipeline: frames pushed
// straight into the buffer, a scripted inference backend in the state, the
// in-memory output backend, and a tempfile-backed config.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use scale_vision_core::types::{
    BgrImage, ClassProb, DecisionReason, Frame, InferenceResult, IngestionStatus, OutputCommand,
};
use scale_vision_pipeline::inference::{InferenceBackend, InferenceError};
use scale_vision_pipeline::output::TestOutput;
use scale_vision_pipeline::{ConfigLoader, ControlPipeline, FrameBuffer, RuntimeState};

/// Returns results from a fixed script, one per predict call.
struct ScriptedInference {
    script: VecDeque<InferenceResult>,
}

impl ScriptedInference {
    fn repeating(class_id: &str, prob: f32, count: usize) -> Self {
        let result = InferenceResult {
            top_k: vec![ClassProb::new(class_id, prob), ClassProb::new("alt", 0.05)],
            ..Default::default()
        };
        Self { script: std::iter::repeat(result).take(count).collect() }
    }
}

impl InferenceBackend for ScriptedInference {
    fn load(&mut self) -> Result<(), InferenceError> {
        Ok(())
    }
    fn predict(&mut self, _frame: &Frame) -> Result<InferenceResult, InferenceError> {
        Ok(self.script.pop_front().unwrap_or_default())
    }
    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct Harness {
    pipeline: ControlPipeline,
    buffer:   Arc<FrameBuffer>,
    state:    Arc<RuntimeState>,
    sent:     Arc<Mutex<Vec<OutputCommand>>>,
    config_path: PathBuf,
    _dir: tempfile::TempDir,
}

fn write_config(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
}

/// Build a pipeline over a config file with a permissive decision section
/// (emits on the first stable frame) and the given mapping JSON.
fn harness(mapping_json: &str, kill_switch: &Path, inference: ScriptedInference) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    write_config(
        &config_path,
        &format!(
            r#"{{
  "decision": {{
    "window_ms": 500,
    "min_confidence": 0.6,
    "min_margin": 0.1,
    "cooldown_ms": 200,
    "require_stable_frames": 1
  }},
  "mapping": {{"classes": {mapping_json}}},
  "safety": {{"kill_switch_file": {}}}
}}"#,
            serde_json::to_string(kill_switch.to_str().unwrap()).unwrap()
        ),
    );

    let loader = ConfigLoader::new(&config_path);
    let loaded = loader.load().unwrap();
    let state = Arc::new(RuntimeState::new(loaded.config, config_path.clone()));
    *state.inference.lock() = Some(Box::new(inference));

    let buffer = Arc::new(FrameBuffer::new(&state.config().ingestion.buffer));
    let output = TestOutput::new();
    let sent = output.sent();
    let runner_status = Arc::new(Mutex::new(IngestionStatus::new("test")));

    let pipeline = ControlPipeline::new(
        Arc::clone(&state),
        Arc::clone(&buffer),
        runner_status,
        Box::new(output),
        loader,
    );

    Harness { pipeline, buffer, state, sent, config_path, _dir: dir }
}

fn push_frame(buffer: &FrameBuffer, frame_id: u64, timestamp: f64) {
    buffer.put(Frame {
        frame_id,
        timestamp,
        image: BgrImage::zeroed(4, 4),
        source: "test".into(),
    });
}

/// Rewrite the config and bump its mtime past filesystem granularity so the
/// next reload_if_changed notices.
fn rewrite_config(path: &Path, body: &str) {
    write_config(path, body);
    let later = SystemTime::now() + Duration::from_secs(2);
    let file = fs::OpenOptions::new().append(true).open(path).unwrap();
    file.set_times(fs::FileTimes::new().set_modified(later)).unwrap();
}

#[test]
fn emission_maps_to_code_and_dispatches() {
    let mut h = harness(
        r#"{"apple": {"code": "4016"}}"#,
        Path::new("/nonexistent/kill"),
        ScriptedInference::repeating("apple", 0.9, 10),
    );

    push_frame(&h.buffer, 0, 1.0);
    assert!(h.pipeline.tick());

    let decision = h.state.last_decision().unwrap();
    assert!(decision.emitted);
    assert_eq!(decision.reason_code, DecisionReason::Emit);
    assert_eq!(decision.code.as_deref(), Some("4016"));

    let sent = h.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].code, "4016");
    assert_eq!(sent[0].terminator, "\r\n");
    assert_eq!(sent[0].request_id, decision.request_id);
}

#[test]
fn emits_exactly_once_per_episode() {
    let mut h = harness(
        r#"{"apple": {"code": "4016"}}"#,
        Path::new("/nonexistent/kill"),
        ScriptedInference::repeating("apple", 0.9, 10),
    );

    for i in 0..10u64 {
        push_frame(&h.buffer, i, 1.0 + i as f64 * 0.05);
        h.pipeline.tick();
    }
    assert_eq!(h.sent.lock().len(), 1);
}

#[test]
fn missing_mapping_blocks_emission() {
    let mut h = harness(
        r#"{}"#,
        Path::new("/nonexistent/kill"),
        ScriptedInference::repeating("apple", 0.9, 4),
    );

    push_frame(&h.buffer, 0, 1.0);
    h.pipeline.tick();

    let decision = h.state.last_decision().unwrap();
    assert!(!decision.emitted);
    assert_eq!(decision.reason_code, DecisionReason::MappingMissing);
    assert!(h.sent.lock().is_empty());
}

#[test]
fn disabled_mapping_blocks_emission() {
    let mut h = harness(
        r#"{"apple": {"code": "4016", "disabled": true}}"#,
        Path::new("/nonexistent/kill"),
        ScriptedInference::repeating("apple", 0.9, 4),
    );

    push_frame(&h.buffer, 0, 1.0);
    h.pipeline.tick();

    let decision = h.state.last_decision().unwrap();
    assert!(!decision.emitted);
    assert_eq!(decision.reason_code, DecisionReason::MappingDisabled);
    assert!(h.sent.lock().is_empty());
}

#[test]
fn kill_switch_blocks_output() {
    let dir = tempfile::tempdir().unwrap();
    let kill = dir.path().join("disable_output");
    fs::write(&kill, "").unwrap();

    let mut h = harness(
        r#"{"apple": {"code": "4016"}}"#,
        &kill,
        ScriptedInference::repeating("apple", 0.9, 4),
    );

    push_frame(&h.buffer, 0, 1.0);
    h.pipeline.tick();

    let decision = h.state.last_decision().unwrap();
    assert!(!decision.emitted);
    assert_eq!(decision.reason_code, DecisionReason::KillSwitch);
    assert!(h.sent.lock().is_empty());
}

#[test]
fn buffer_timeout_sets_ingestion_timeout() {
    let mut h = harness(
        r#"{}"#,
        Path::new("/nonexistent/kill"),
        ScriptedInference::repeating("apple", 0.9, 1),
    );

    assert!(!h.pipeline.tick());
    assert!(h
        .state
        .health
        .snapshot()
        .reasons
        .contains(&scale_vision_core::types::DegradeReason::IngestionTimeout));

    // A frame arriving clears the reason.
    push_frame(&h.buffer, 0, 1.0);
    h.pipeline.tick();
    assert!(!h
        .state
        .health
        .snapshot()
        .reasons
        .contains(&scale_vision_core::types::DegradeReason::IngestionTimeout));
}

#[test]
fn reload_applies_new_mapping_without_restart() {
    let mut h = harness(
        r#"{"apple": {"code": "111"}}"#,
        Path::new("/nonexistent/kill"),
        ScriptedInference::repeating("apple", 0.9, 10),
    );

    // First episode emits with the old code.
    push_frame(&h.buffer, 0, 1.0);
    h.pipeline.tick();
    assert_eq!(h.state.last_decision().unwrap().code.as_deref(), Some("111"));

    // Rewrite mapping on disk; the tick after the rewrite picks it up
    // (reload runs at the end of each tick).
    rewrite_config(
        &h.config_path,
        r#"{
  "decision": {
    "window_ms": 500,
    "min_confidence": 0.6,
    "min_margin": 0.1,
    "cooldown_ms": 200,
    "require_stable_frames": 1
  },
  "mapping": {"classes": {"apple": {"code": "222"}}},
  "safety": {"kill_switch_file": "/nonexistent/kill"}
}"#,
    );

    // The engine sits in cooldown through this tick; the reload lands at
    // the tick's end and rebuilds the engine (config changes are episode
    // boundaries).
    push_frame(&h.buffer, 1, 2.0);
    h.pipeline.tick();
    assert_eq!(h.state.last_decision().unwrap().reason_code, DecisionReason::Cooldown);

    // Fresh engine, fresh episode: the next emission carries the new code.
    push_frame(&h.buffer, 2, 3.0);
    h.pipeline.tick();
    let decision = h.state.last_decision().unwrap();
    assert!(decision.emitted, "decision was {:?}", decision.reason_code);
    assert_eq!(decision.code.as_deref(), Some("222"));
}

#[test]
fn no_inference_backend_yields_no_prediction() {
    let mut h = harness(
        r#"{}"#,
        Path::new("/nonexistent/kill"),
        ScriptedInference::repeating("apple", 0.9, 1),
    );
    *h.state.inference.lock() = None;

    push_frame(&h.buffer, 0, 1.0);
    h.pipeline.tick();
    let decision = h.state.last_decision().unwrap();
    assert!(!decision.emitted);
    assert_eq!(decision.reason_code, DecisionReason::NoPrediction);
}
