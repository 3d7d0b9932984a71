// crates/scale-vision-pipeline/src/clock.rs

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since the epoch. Frame timestamps and request ids are
/// compared against `time now` across the HTTP endpoints, so this is
/// deliberately NOT a monotonic clock.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
