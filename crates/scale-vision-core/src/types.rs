// crates/scale-vision-core/src/types.rs
//
// Types that flow between the pipeline stages and out through the HTTP
// surface. No ffmpeg, no I/O — just plain data.

use serde::{Deserialize, Serialize};

// ── Pixel data ────────────────────────────────────────────────────────────────

/// A packed 8-bit BGR pixel buffer (H×W×3, row-major, no stride padding).
#[derive(Clone)]
pub struct BgrImage {
    pub data:   Vec<u8>,
    pub width:  u32,
    pub height: u32,
}

impl BgrImage {
    /// All-black frame. The file source emits these when the configured
    /// path is missing and `allow_missing` is set.
    pub fn zeroed(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * 3],
            width,
            height,
        }
    }
}

/// A captured, normalized frame travelling from the ingestion runner to the
/// control pipeline through the frame buffer.
///
/// `frame_id` is monotone per producer from 0; `timestamp` is wall-clock
/// seconds since the epoch — it is compared against `time now` across the
/// HTTP endpoints, so a monotonic clock would be wrong here.
#[derive(Clone)]
pub struct Frame {
    pub frame_id:  u64,
    pub timestamp: f64,
    pub image:     BgrImage,
    pub source:    String,
}

// ── Inference ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassProb {
    pub class_id: String,
    pub prob:     f32,
}

impl ClassProb {
    pub fn new(class_id: impl Into<String>, prob: f32) -> Self {
        Self { class_id: class_id.into(), prob }
    }
}

/// Per-frame classifier output: `top_k` sorted by probability descending.
#[derive(Clone, Debug, Serialize)]
pub struct InferenceResult {
    pub top_k:       Vec<ClassProb>,
    pub quality_ok:  bool,
    pub blur_score:  f32,
    pub glare_score: f32,
}

impl Default for InferenceResult {
    fn default() -> Self {
        Self { top_k: Vec::new(), quality_ok: true, blur_score: 0.0, glare_score: 0.0 }
    }
}

// ── Decision ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionState {
    #[default]
    Idle,
    Observing,
    /// Reported only on the emitting event; internally the engine jumps
    /// straight from OBSERVING to COOLDOWN.
    Locked,
    Cooldown,
}

impl DecisionState {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionState::Idle      => "IDLE",
            DecisionState::Observing => "OBSERVING",
            DecisionState::Locked    => "LOCKED",
            DecisionState::Cooldown  => "COOLDOWN",
        }
    }
}

/// Why a decision event looked the way it did. Set on every event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    Emit,
    Observing,
    WindowExpired,
    Cooldown,
    CooldownComplete,
    Reset,
    NoPrediction,
    QualityGate,
    IngestionDegraded,
    MappingMissing,
    MappingDisabled,
    KillSwitch,
    HealthDegraded,
    OutputFailed,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionReason::Emit              => "EMIT",
            DecisionReason::Observing         => "OBSERVING",
            DecisionReason::WindowExpired     => "WINDOW_EXPIRED",
            DecisionReason::Cooldown          => "COOLDOWN",
            DecisionReason::CooldownComplete  => "COOLDOWN_COMPLETE",
            DecisionReason::Reset             => "RESET",
            DecisionReason::NoPrediction      => "NO_PREDICTION",
            DecisionReason::QualityGate       => "QUALITY_GATE",
            DecisionReason::IngestionDegraded => "INGESTION_DEGRADED",
            DecisionReason::MappingMissing    => "MAPPING_MISSING",
            DecisionReason::MappingDisabled   => "MAPPING_DISABLED",
            DecisionReason::KillSwitch        => "KILL_SWITCH",
            DecisionReason::HealthDegraded    => "HEALTH_DEGRADED",
            DecisionReason::OutputFailed      => "OUTPUT_FAILED",
        }
    }
}

/// Exactly one of these is produced per consumed frame.
#[derive(Clone, Debug, Serialize)]
pub struct DecisionEvent {
    /// `"<ms_timestamp>-<frame_id>"` — frame_id keeps ids unique when the
    /// wall clock moves backward.
    pub request_id:  String,
    pub timestamp:   f64,
    pub state:       DecisionState,
    pub emitted:     bool,
    pub reason_code: DecisionReason,
    pub class_id:    Option<String>,
    pub confidence:  f32,
    pub margin:      f32,
    pub code:        Option<String>,
}

// ── Output ────────────────────────────────────────────────────────────────────

/// Fire-and-forget command handed to the output backend.
#[derive(Clone, Debug)]
pub struct OutputCommand {
    pub request_id: String,
    pub code:       String,
    pub terminator: String,
}

// ── Health ────────────────────────────────────────────────────────────────────

/// Active degradation reasons. Additive set on the health tracker; each
/// failing stage sets its reason and clears it when the operation succeeds
/// again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DegradeReason {
    IngestionOpenFailed,
    IngestionReadFailed,
    IngestionNormalizeFailed,
    IngestionStale,
    IngestionTimeout,
    InferenceLoadFailed,
    InferenceRuntimeFailed,
    OutputFailed,
}

impl DegradeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DegradeReason::IngestionOpenFailed      => "INGESTION_OPEN_FAILED",
            DegradeReason::IngestionReadFailed      => "INGESTION_READ_FAILED",
            DegradeReason::IngestionNormalizeFailed => "INGESTION_NORMALIZE_FAILED",
            DegradeReason::IngestionStale           => "INGESTION_STALE",
            DegradeReason::IngestionTimeout         => "INGESTION_TIMEOUT",
            DegradeReason::InferenceLoadFailed      => "INFERENCE_LOAD_FAILED",
            DegradeReason::InferenceRuntimeFailed   => "INFERENCE_RUNTIME_FAILED",
            DegradeReason::OutputFailed             => "OUTPUT_FAILED",
        }
    }

    /// Ingestion-family reasons feed the decision engine's `ingestion_ok`
    /// input when `block_on_ingestion_degraded` is set.
    pub fn is_ingestion(self) -> bool {
        matches!(
            self,
            DegradeReason::IngestionOpenFailed
                | DegradeReason::IngestionReadFailed
                | DegradeReason::IngestionNormalizeFailed
                | DegradeReason::IngestionStale
                | DegradeReason::IngestionTimeout
        )
    }
}

// ── Ingestion status ──────────────────────────────────────────────────────────

/// Latest producer-side numbers, published once per consumed frame and
/// served raw on `GET /ingestion/status`.
#[derive(Clone, Debug, Serialize)]
pub struct IngestionStatus {
    pub source:          String,
    pub fps_in:          f64,
    pub fps_processed:   f64,
    pub drops:           u64,
    pub queue_ms:        f64,
    pub reconnections:   u64,
    pub stale_events:    u64,
    pub last_frame_ts:   f64,
    pub using_synthetic: bool,
    pub ok:              bool,
}

impl IngestionStatus {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source:          source.into(),
            fps_in:          0.0,
            fps_processed:   0.0,
            drops:           0,
            queue_ms:        0.0,
            reconnections:   0,
            stale_events:    0,
            last_frame_ts:   0.0,
            using_synthetic: false,
            ok:              true,
        }
    }
}
