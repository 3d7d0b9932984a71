// crates/scale-vision-core/src/decision/quality.rs

use crate::types::InferenceResult;

pub const BLUR_THRESHOLD: f32 = 0.5;
pub const GLARE_THRESHOLD: f32 = 0.5;

/// Pure predicate over a classifier result. A frame failing the gate resets
/// the decision engine rather than feeding the observation window.
pub fn quality_gate(result: &InferenceResult) -> bool {
    result.quality_ok
        && result.blur_score <= BLUR_THRESHOLD
        && result.glare_score <= GLARE_THRESHOLD
}
