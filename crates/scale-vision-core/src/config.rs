// crates/scale-vision-core/src/config.rs
//
// The validated config tree. Strict: unknown keys are rejected at every
// level so a typo'd field fails the load instead of silently defaulting.
// Every section is optional and falls back to its Default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub mode:      String,
    pub ingestion: IngestionConfig,
    pub inference: InferenceConfig,
    pub decision:  DecisionConfig,
    pub mapping:   MappingConfig,
    pub output:    OutputConfig,
    pub safety:    SafetyConfig,
    pub http:      HttpConfig,
    pub logging:   LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode:      "test".into(),
            ingestion: IngestionConfig::default(),
            inference: InferenceConfig::default(),
            decision:  DecisionConfig::default(),
            mapping:   MappingConfig::default(),
            output:    OutputConfig::default(),
            safety:    SafetyConfig::default(),
            http:      HttpConfig::default(),
            logging:   LoggingConfig::default(),
        }
    }
}

// ── Ingestion ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestionConfig {
    /// "file" | "camera" | "rtsp"
    pub source:    String,
    pub normalize: NormalizeConfig,
    pub buffer:    BufferConfig,
    pub camera:    CameraConfig,
    pub file:      FileConfig,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            source:    "file".into(),
            normalize: NormalizeConfig::default(),
            buffer:    BufferConfig::default(),
            camera:    CameraConfig::default(),
            file:      FileConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizeConfig {
    pub width:  u32,
    pub height: u32,
    pub fps:    u32,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self { width: 640, height: 640, fps: 15 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    pub max_ms:      u64,
    /// "drop_oldest" evicts the head to make room; anything else drops the
    /// incoming frame instead.
    pub drop_policy: String,
    pub max_frames:  usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { max_ms: 800, drop_policy: "drop_oldest".into(), max_frames: 30 }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraReconnectConfig {
    pub enabled:        bool,
    pub backoff_ms:     u64,
    pub max_backoff_ms: u64,
}

impl Default for CameraReconnectConfig {
    fn default() -> Self {
        Self { enabled: true, backoff_ms: 1000, max_backoff_ms: 10_000 }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FreezeDetectionConfig {
    pub enabled:      bool,
    pub max_stale_ms: u64,
}

impl Default for FreezeDetectionConfig {
    fn default() -> Self {
        Self { enabled: true, max_stale_ms: 1200 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    pub device: String,
    /// "ffmpeg" opens `device` directly; "gstreamer" runs
    /// `gstreamer_pipeline` instead (the pipeline must end in an appsink
    /// named "sink").
    pub backend:            String,
    pub gstreamer_pipeline: String,
    pub reconnect:          CameraReconnectConfig,
    pub freeze_detection:   FreezeDetectionConfig,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device:             "/dev/video0".into(),
            backend:            "ffmpeg".into(),
            gstreamer_pipeline: String::new(),
            reconnect:          CameraReconnectConfig::default(),
            freeze_detection:   FreezeDetectionConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub path:          String,
    /// "realtime" paces reads to 1/fps; anything else reads flat-out.
    pub replay_mode:   String,
    #[serde(rename = "loop")]
    pub loop_playback: bool,
    pub start_ms:      u64,
    pub duration_ms:   u64,
    pub allow_missing: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path:          "/var/lib/scale-vision/samples/sample.ppm".into(),
            replay_mode:   "realtime".into(),
            loop_playback: true,
            start_ms:      0,
            duration_ms:   0,
            allow_missing: true,
        }
    }
}

// ── Inference ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    /// "stub" | "onnx" — concrete engines plug in behind the backend trait.
    pub backend:          String,
    pub model_path:       String,
    pub top_k:            usize,
    pub device:           String,
    pub fallback_to_stub: bool,
    pub stub_classes:     Vec<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend:          "stub".into(),
            model_path:       "/var/lib/scale-vision/models/model.onnx".into(),
            top_k:            5,
            device:           "cpu".into(),
            fallback_to_stub: true,
            stub_classes:     Vec::new(),
        }
    }
}

// ── Decision ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecisionConfig {
    pub window_ms:                   u64,
    pub min_confidence:              f32,
    pub min_margin:                  f32,
    pub cooldown_ms:                 u64,
    pub require_stable_frames:       u32,
    pub scene_change_threshold:      f32,
    pub block_on_ingestion_degraded: bool,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            window_ms:                   800,
            min_confidence:              0.78,
            min_margin:                  0.10,
            cooldown_ms:                 2500,
            require_stable_frames:       8,
            scene_change_threshold:      0.40,
            block_on_ingestion_degraded: true,
        }
    }
}

// ── Mapping ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingEntry {
    #[serde(default = "default_code_type")]
    pub code_type: String,
    pub code:      String,
    #[serde(default)]
    pub aliases:   Vec<String>,
    #[serde(default)]
    pub disabled:  bool,
}

fn default_code_type() -> String {
    "plu".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MappingConfig {
    pub default_action: String,
    /// Canonical class id → entry. BTreeMap keeps iteration in ascending
    /// class order, which is what makes alias-conflict resolution
    /// deterministic (first owning class wins).
    pub classes: BTreeMap<String, MappingEntry>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self { default_action: "block".into(), classes: BTreeMap::new() }
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub device:       String,
    pub baudrate:     u32,
    /// "none" | "even" | "odd"
    pub parity:       String,
    pub stopbits:     u8,
    pub terminator:   String,
    pub reconnect_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device:       "/dev/ttyUSB0".into(),
            baudrate:     9600,
            parity:       "none".into(),
            stopbits:     1,
            terminator:   "\r\n".into(),
            reconnect_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// "test" | "serial" | "hid"
    pub backend: String,
    pub serial:  SerialConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { backend: "test".into(), serial: SerialConfig::default() }
    }
}

// ── Safety / HTTP / Logging ───────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafetyConfig {
    /// Presence of this path on disk unconditionally blocks outputs.
    pub kill_switch_file: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self { kill_switch_file: "/etc/scale-vision/disable_output".into() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind:    String,
    pub port:    u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { enabled: true, bind: "127.0.0.1".into(), port: 8080 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level:         String,
    pub log_dir:       String,
    pub json_log_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level:         "INFO".into(),
            log_dir:       "/var/log/scale-vision".into(),
            json_log_file: "events.jsonl".into(),
        }
    }
}
