// crates/scale-vision-pipeline/src/inference.rs
//
// The inference contract plus the stub backend. Concrete engines
// (onnx/tf/yolo) live outside the pipeline and plug in behind the trait;
// the loop only ever calls load() once and predict() per frame.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use scale_vision_core::config::InferenceConfig;
use scale_vision_core::types::{ClassProb, Frame, InferenceResult};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model load failed: {0}")]
    Load(String),
    #[error("inference runtime failure: {0}")]
    Runtime(String),
}

pub trait InferenceBackend: Send {
    fn load(&mut self) -> Result<(), InferenceError>;
    fn predict(&mut self, frame: &Frame) -> Result<InferenceResult, InferenceError>;
    fn name(&self) -> &'static str;
}

// ── Stub ──────────────────────────────────────────────────────────────────────

/// Deterministic pseudo-classifier: scores are seeded by `frame_id`, so the
/// same frame always classifies the same way. Used in test mode and as the
/// fallback when a real engine fails to load.
pub struct StubInference {
    classes: Vec<String>,
    top_k:   usize,
}

impl StubInference {
    pub fn new(classes: &[String], top_k: usize) -> Self {
        let classes: Vec<String> = if classes.is_empty() {
            ["apple_red", "banana", "orange"].iter().map(|c| c.to_string()).collect()
        } else {
            classes.to_vec()
        };
        let top_k = top_k.min(classes.len());
        Self { classes, top_k }
    }
}

impl InferenceBackend for StubInference {
    fn load(&mut self) -> Result<(), InferenceError> {
        Ok(())
    }

    fn predict(&mut self, frame: &Frame) -> Result<InferenceResult, InferenceError> {
        let mut rng = StdRng::seed_from_u64(frame.frame_id);
        let scores: Vec<f32> = self.classes.iter().map(|_| rng.gen::<f32>()).collect();
        let sum: f32 = scores.iter().sum();
        let total = if sum > 0.0 { sum } else { 1.0 };

        let mut ranked: Vec<ClassProb> = self
            .classes
            .iter()
            .zip(&scores)
            .map(|(class, score)| ClassProb::new(class.clone(), score / total))
            .collect();
        ranked.sort_by(|a, b| b.prob.partial_cmp(&a.prob).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(self.top_k);

        Ok(InferenceResult {
            top_k:       ranked,
            quality_ok:  true,
            blur_score:  rng.gen::<f32>() * 0.2,
            glare_score: rng.gen::<f32>() * 0.2,
        })
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

// ── External engines ──────────────────────────────────────────────────────────

/// Stand-in for a configured engine this build doesn't carry. `load()`
/// fails, which routes startup through the `fallback_to_stub` path (or
/// leaves INFERENCE_LOAD_FAILED active when fallback is off).
pub struct UnavailableInference {
    backend: String,
}

impl InferenceBackend for UnavailableInference {
    fn load(&mut self) -> Result<(), InferenceError> {
        Err(InferenceError::Load(format!(
            "backend '{}' requires an external inference engine",
            self.backend
        )))
    }

    fn predict(&mut self, _frame: &Frame) -> Result<InferenceResult, InferenceError> {
        Err(InferenceError::Runtime(format!("backend '{}' is not loaded", self.backend)))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

pub fn build_inference(config: &InferenceConfig) -> Box<dyn InferenceBackend> {
    match config.backend.as_str() {
        "stub" => Box::new(StubInference::new(&config.stub_classes, config.top_k)),
        other  => Box::new(UnavailableInference { backend: other.to_string() }),
    }
}
