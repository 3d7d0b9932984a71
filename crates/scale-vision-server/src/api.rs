// crates/scale-vision-server/src/api.rs
//
// The HTTP surface. Handlers read RuntimeState snapshots; the config
// endpoints rewrite the config file (atomically) and the control loop picks
// the change up through its reload check. Serving runs on a dedicated
// thread hosting its own tokio runtime.

use std::convert::Infallible;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use scale_vision_core::types::BgrImage;
use scale_vision_core::AppConfig;
use scale_vision_pipeline::{classify_media, PredictError, RuntimeState};

use crate::version::{visible_version, BUILD_ID};

type SharedState = Arc<RuntimeState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/last-decision", get(last_decision))
        .route("/ingestion/status", get(ingestion_status))
        .route("/ui/status", get(ui_status))
        .route("/ui/mapping", get(ui_mapping))
        .route("/ui/config", get(ui_config_get).post(ui_config_post))
        .route("/ui/config/raw", get(ui_config_raw_get).post(ui_config_raw_post))
        .route("/ui/service/restart", post(ui_service_restart))
        .route("/ui/camera/devices", get(camera_devices))
        .route("/ui/camera/frame", get(camera_frame))
        .route("/ui/camera/stream", get(camera_stream))
        .route("/ui/predict", post(ui_predict))
        .with_state(state)
}

/// Serve on a dedicated thread until the shutdown receiver fires.
pub fn spawn(
    state: SharedState,
    bind: String,
    port: u16,
    shutdown: tokio::sync::oneshot::Receiver<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "http_runtime_failed");
                return;
            }
        };
        runtime.block_on(async move {
            let listener = match tokio::net::TcpListener::bind((bind.as_str(), port)).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(bind = %bind, port, error = %e, "http_bind_failed");
                    return;
                }
            };
            info!(bind = %bind, port, "http_listening");
            let serve = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
                let _ = shutdown.await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "http_serve_failed");
            }
        });
    })
}

// ── Core endpoints ────────────────────────────────────────────────────────────

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let snapshot = state.health.snapshot();
    let reasons: Vec<&str> = snapshot.reasons.iter().map(|r| r.as_str()).collect();
    let status = if snapshot.ready && !snapshot.degraded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "ready":    snapshot.ready,
        "degraded": snapshot.degraded,
        "reasons":  reasons,
        "details":  snapshot.details,
        "version":  visible_version(),
        "build_id": BUILD_ID,
    });
    (status, Json(body))
}

async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    let text = state.metrics.render(&visible_version(), BUILD_ID);
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text)
}

async fn last_decision(State(state): State<SharedState>) -> Json<Value> {
    let body = state
        .last_decision()
        .and_then(|decision| serde_json::to_value(decision).ok())
        .unwrap_or_else(|| json!({}));
    Json(body)
}

async fn ingestion_status(State(state): State<SharedState>) -> Json<Value> {
    let body = state
        .ingestion_status()
        .and_then(|status| serde_json::to_value(status).ok())
        .unwrap_or_else(|| json!({}));
    Json(body)
}

// ── Console endpoints ─────────────────────────────────────────────────────────

async fn ui_status(State(state): State<SharedState>) -> Json<Value> {
    let config = state.config();
    let inference = state.inference.lock().as_ref().map(|b| b.name()).unwrap_or("none");
    Json(json!({
        "mode":                config.mode,
        "version":             visible_version(),
        "build_id":            BUILD_ID,
        "config_path":         state.config_path,
        "ingestion_source":    config.ingestion.source,
        "inference_backend":   inference,
        "output_backend":      config.output.backend,
        "mapping_classes":     config.mapping.classes.len(),
        "mapping_checksum":    state.mapper().checksum(),
        "kill_switch_present": Path::new(&config.safety.kill_switch_file).exists(),
        "model_path_present":  Path::new(&config.inference.model_path).exists(),
    }))
}

async fn ui_mapping(State(state): State<SharedState>) -> Json<Value> {
    let config = state.config();
    // BTreeMap iteration keeps the list sorted by class id.
    let entries: Vec<Value> = config
        .mapping
        .classes
        .iter()
        .map(|(class_id, entry)| {
            json!({
                "class_id":  class_id,
                "code_type": entry.code_type,
                "code":      entry.code,
                "aliases":   entry.aliases,
                "disabled":  entry.disabled,
            })
        })
        .collect();
    Json(Value::Array(entries))
}

async fn ui_config_get(State(state): State<SharedState>) -> Json<Value> {
    let config = state.config();
    Json(serde_json::to_value(&config.output).unwrap_or_else(|_| json!({})))
}

/// Structured edit of the output section: read-modify-write of the config
/// file, keeping key order and two-space indentation.
async fn ui_config_post(State(state): State<SharedState>, Json(patch): Json<Value>) -> Response {
    let Some(patch) = patch.as_object() else {
        return bad_request("expected a JSON object");
    };
    let raw = match fs::read_to_string(&state.config_path) {
        Ok(raw) => raw,
        Err(e) => return internal_error(&format!("read config: {e}")),
    };
    let mut root: Value = match serde_json::from_str(&raw) {
        Ok(root) => root,
        Err(e) => return internal_error(&format!("parse config: {e}")),
    };
    let Some(root_map) = root.as_object_mut() else {
        return internal_error("config root is not an object");
    };
    let output = root_map.entry("output").or_insert_with(|| json!({}));
    let Some(output_map) = output.as_object_mut() else {
        return internal_error("output section is not an object");
    };
    for (key, value) in patch {
        output_map.insert(key.clone(), value.clone());
    }

    let validated: AppConfig = match serde_json::from_value(root.clone()) {
        Ok(config) => config,
        Err(e) => return bad_request(&format!("invalid config: {e}")),
    };
    if let Err(e) = write_config_atomic(&state.config_path, &root) {
        return internal_error(&format!("write config: {e}"));
    }
    let output = serde_json::to_value(&validated.output).unwrap_or_else(|_| json!({}));
    state.set_config(validated);
    Json(json!({"ok": true, "output": output})).into_response()
}

async fn ui_config_raw_get(State(state): State<SharedState>) -> Response {
    match fs::read_to_string(&state.config_path) {
        Ok(raw) => ([(header::CONTENT_TYPE, "application/json")], raw).into_response(),
        Err(e) => internal_error(&format!("read config: {e}")),
    }
}

/// Whole-file edit, validated by re-parsing. The incoming text is written
/// verbatim (plus a trailing newline), so the caller controls formatting.
async fn ui_config_raw_post(State(state): State<SharedState>, body: String) -> Response {
    let config: AppConfig = match serde_json::from_str(&body) {
        Ok(config) => config,
        Err(e) => return bad_request(&format!("invalid config: {e}")),
    };
    let mut text = body;
    if !text.ends_with('\n') {
        text.push('\n');
    }
    if let Err(e) = write_text_atomic(&state.config_path, &text) {
        return internal_error(&format!("write config: {e}"));
    }
    state.set_config(config);
    Json(json!({"ok": true})).into_response()
}

async fn ui_service_restart() -> Json<Value> {
    let spawned = std::process::Command::new("systemctl")
        .args(["restart", "scale-vision"])
        .spawn();
    if let Err(e) = &spawned {
        warn!(error = %e, "service_restart_failed");
    }
    Json(json!({"ok": spawned.is_ok()}))
}

// ── Camera endpoints ──────────────────────────────────────────────────────────

async fn camera_devices() -> Json<Value> {
    let mut devices: Vec<String> = fs::read_dir("/dev")
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with("video"))
                .map(|e| e.path().display().to_string())
                .collect()
        })
        .unwrap_or_default();
    devices.sort();
    Json(json!({"devices": devices}))
}

async fn camera_frame(State(state): State<SharedState>) -> Response {
    let Some(image) = state.latest_frame() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "no frame captured yet"})),
        )
            .into_response();
    };
    match encode_png(&image) {
        Ok(png) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
        Err(e) => internal_error(&format!("encode frame: {e}")),
    }
}

/// Browser-refreshing snapshot stream (~4 fps), multipart/x-mixed-replace.
async fn camera_stream(State(state): State<SharedState>) -> Response {
    let stream = futures::stream::unfold(state, |state| async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let part = match state.latest_frame().and_then(|image| encode_png(&image).ok()) {
            Some(png) => {
                let mut part =
                    Vec::from(&b"--frame\r\nContent-Type: image/png\r\n\r\n"[..]);
                part.extend_from_slice(&png);
                part.extend_from_slice(b"\r\n");
                part
            }
            None => Vec::new(),
        };
        Some((Ok::<Bytes, Infallible>(Bytes::from(part)), state))
    });
    (
        [(header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")],
        Body::from_stream(stream),
    )
        .into_response()
}

// ── On-demand predict ─────────────────────────────────────────────────────────

async fn ui_predict(State(state): State<SharedState>, mut multipart: Multipart) -> Response {
    let field = match multipart.next_field().await {
        Ok(Some(field)) => field,
        Ok(None) => return bad_request("missing file field"),
        Err(e) => return bad_request(&format!("invalid upload: {e}")),
    };
    let bytes = match field.bytes().await {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => return bad_request("empty upload"),
        Err(e) => return bad_request(&format!("invalid upload: {e}")),
    };

    let mut upload = match tempfile::NamedTempFile::new() {
        Ok(file) => file,
        Err(e) => return internal_error(&format!("spool upload: {e}")),
    };
    if let Err(e) = upload.write_all(&bytes).and_then(|_| upload.flush()) {
        return internal_error(&format!("spool upload: {e}"));
    }

    // Decode + predict are blocking (ffmpeg, inference lock) — keep them off
    // the async workers.
    let path = upload.path().to_path_buf();
    let worker_state = Arc::clone(&state);
    let outcome =
        tokio::task::spawn_blocking(move || classify_media(&worker_state, &path)).await;
    drop(upload);

    match outcome {
        Ok(Ok(prediction)) => Json(prediction).into_response(),
        Ok(Err(PredictError::InvalidMedia(msg))) => bad_request(&msg),
        Ok(Err(PredictError::InferenceUnavailable)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "inference unavailable"})),
        )
            .into_response(),
        Ok(Err(PredictError::Internal(e))) => internal_error(&format!("predict: {e}")),
        Err(e) => internal_error(&format!("predict task: {e}")),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn internal_error(message: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": message}))).into_response()
}

/// Two-space pretty print, trailing newline, atomic rename into place.
/// serde_json's preserve_order keeps the incoming key order intact.
fn write_config_atomic(path: &Path, root: &Value) -> anyhow::Result<()> {
    let mut text = serde_json::to_string_pretty(root)?;
    text.push('\n');
    write_text_atomic(path, &text)
}

fn write_text_atomic(path: &Path, text: &str) -> anyhow::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(parent)?;
    staged.write_all(text.as_bytes())?;
    staged.flush()?;
    staged.persist(path)?;
    Ok(())
}

fn encode_png(image: &BgrImage) -> anyhow::Result<Vec<u8>> {
    let mut rgb = Vec::with_capacity(image.data.len());
    for px in image.data.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, image.width, image.height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&rgb)?;
    }
    Ok(out)
}
