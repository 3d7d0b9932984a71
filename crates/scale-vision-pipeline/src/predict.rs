// crates/scale-vision-pipeline/src/predict.rs
//
// On-demand classification of an uploaded image or short video, sharing the
// live inference backend (and its lock) with the control loop. An image is
// a one-frame video here — ffmpeg decodes both through the same reader.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use scale_vision_core::types::{ClassProb, DecisionEvent, Frame, InferenceResult};
use scale_vision_core::{quality_gate, DecisionEngine};

use crate::clock::unix_now;
use crate::normalize::Normalizer;
use crate::source::MediaReader;
use crate::state::RuntimeState;

/// Cap on sampled frames per upload, matched by the stride so a short clip
/// covers its full length.
const MAX_SAMPLES: u32 = 30;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("invalid media: {0}")]
    InvalidMedia(String),
    #[error("inference unavailable")]
    InferenceUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct AdhocPrediction {
    /// The last sampled frame's raw result.
    pub result: InferenceResult,
    /// Decision from a throwaway engine fed the sampled frames in order.
    pub decision: DecisionEvent,
    /// Per-class probability sums over all sampled frames, normalized.
    pub aggregated_top_k: Vec<ClassProb>,
    pub frames_sampled: u32,
}

pub fn classify_media(state: &RuntimeState, path: &Path) -> Result<AdhocPrediction, PredictError> {
    let config = state.config();
    let mut reader =
        MediaReader::open(path).map_err(|e| PredictError::InvalidMedia(e.to_string()))?;
    let mut normalizer = Normalizer::new(&config.ingestion.normalize);
    let mut engine = DecisionEngine::new(config.decision);

    let stride = ((reader.fps / 4.0).round() as u64).max(1);
    let mut sums: BTreeMap<String, f32> = BTreeMap::new();
    let mut last: Option<(InferenceResult, DecisionEvent)> = None;
    let mut sampled: u32 = 0;
    let mut index: u64 = 0;

    while sampled < MAX_SAMPLES {
        let Some((image, _pos)) = reader.next_frame() else {
            break;
        };
        let take = index % stride == 0;
        index += 1;
        if !take {
            continue;
        }

        let normalized = normalizer.normalize(&image).map_err(PredictError::Internal)?;
        let frame = Frame {
            frame_id:  sampled as u64,
            timestamp: unix_now(),
            image:     normalized,
            source:    "upload".into(),
        };

        let result = {
            let mut guard = state.inference.lock();
            let Some(backend) = guard.as_mut() else {
                return Err(PredictError::InferenceUnavailable);
            };
            backend.predict(&frame).map_err(|e| PredictError::Internal(e.into()))?
        };

        for item in &result.top_k {
            *sums.entry(item.class_id.clone()).or_insert(0.0) += item.prob;
        }
        let quality_ok = quality_gate(&result);
        let decision = engine.process(&result, true, quality_ok, frame.frame_id, frame.timestamp);
        last = Some((result, decision));
        sampled += 1;
    }

    let Some((result, decision)) = last else {
        return Err(PredictError::InvalidMedia("no decodable frames".into()));
    };

    let total: f32 = sums.values().sum();
    let mut aggregated: Vec<ClassProb> = sums
        .into_iter()
        .map(|(class_id, score)| ClassProb {
            class_id,
            prob: if total > 0.0 { score / total } else { 0.0 },
        })
        .collect();
    aggregated.sort_by(|a, b| b.prob.partial_cmp(&a.prob).unwrap_or(std::cmp::Ordering::Equal));
    aggregated.truncate(config.inference.top_k);

    Ok(AdhocPrediction { result, decision, aggregated_top_k: aggregated, frames_sampled: sampled })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scale_vision_core::AppConfig;
    use std::path::PathBuf;

    #[test]
    fn unreadable_upload_is_invalid_media() {
        let state = RuntimeState::new(AppConfig::default(), PathBuf::from("/tmp/config.json"));
        let err = classify_media(&state, Path::new("/nonexistent/upload.bin")).unwrap_err();
        assert!(matches!(err, PredictError::InvalidMedia(_)));
    }
}
