// crates/scale-vision-pipeline/src/runner.rs
//
// IngestionRunner: the producer task. Owns the frame source, drives
// open→read→normalize→stamp→push, and accounts for fps, drops, queue age,
// reconnects and freeze detection. Sole writer to the frame buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::error;

use scale_vision_core::config::{FreezeDetectionConfig, NormalizeConfig};
use scale_vision_core::types::{DegradeReason, Frame, IngestionStatus};
use scale_vision_core::{HealthTracker, Metrics};

use crate::buffer::FrameBuffer;
use crate::clock::unix_now;
use crate::normalize::Normalizer;
use crate::source::FrameSource;

const OPEN_RETRY: Duration = Duration::from_secs(1);
const READ_RETRY: Duration = Duration::from_millis(50);

pub struct IngestionRunner {
    handle: Option<JoinHandle<()>>,
    stop:   Arc<AtomicBool>,
    status: Arc<Mutex<IngestionStatus>>,
}

impl IngestionRunner {
    pub fn spawn(
        source:    Box<dyn FrameSource>,
        buffer:    Arc<FrameBuffer>,
        normalize: NormalizeConfig,
        freeze:    FreezeDetectionConfig,
        health:    Arc<HealthTracker>,
        metrics:   Arc<Metrics>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let status = Arc::new(Mutex::new(IngestionStatus::new(source.name())));

        let thread_stop = Arc::clone(&stop);
        let thread_status = Arc::clone(&status);
        let handle = thread::spawn(move || {
            run_loop(source, buffer, normalize, freeze, health, metrics, thread_stop, thread_status);
        });

        Self { handle: Some(handle), stop, status }
    }

    pub fn status(&self) -> IngestionStatus {
        self.status.lock().clone()
    }

    /// Shared view for the control pipeline's per-frame snapshot publish.
    pub fn status_handle(&self) -> Arc<Mutex<IngestionStatus>> {
        Arc::clone(&self.status)
    }

    /// Flip the stop flag and join. The loop checks the flag between reads
    /// and never sleeps longer than a second, so this returns promptly; the
    /// thread closes the source on its way out.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IngestionRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    mut source: Box<dyn FrameSource>,
    buffer:     Arc<FrameBuffer>,
    normalize:  NormalizeConfig,
    freeze:     FreezeDetectionConfig,
    health:     Arc<HealthTracker>,
    metrics:    Arc<Metrics>,
    stop:       Arc<AtomicBool>,
    status:     Arc<Mutex<IngestionStatus>>,
) {
    let mut normalizer = Normalizer::new(&normalize);
    let mut frame_id: u64 = 0;
    let mut last_fps_ts = unix_now();
    let mut frames_in = 0u64;
    let mut frames_processed = 0u64;

    while !stop.load(Ordering::Relaxed) {
        if !source.open() {
            status.lock().ok = false;
            health.set_degraded(DegradeReason::IngestionOpenFailed);
            thread::sleep(OPEN_RETRY);
            continue;
        }
        health.clear_reason(DegradeReason::IngestionOpenFailed);

        let Some(raw) = source.read() else {
            status.lock().ok = false;
            health.set_degraded(DegradeReason::IngestionReadFailed);
            thread::sleep(READ_RETRY);
            continue;
        };
        status.lock().ok = true;
        health.clear_reason(DegradeReason::IngestionReadFailed);

        let now = unix_now();
        let image = match normalizer.normalize(&raw) {
            Ok(image) => image,
            Err(e) => {
                error!(error = %e, "normalize_failed");
                health.set_degraded(DegradeReason::IngestionNormalizeFailed);
                continue;
            }
        };
        health.clear_reason(DegradeReason::IngestionNormalizeFailed);

        buffer.put(Frame {
            frame_id,
            timestamp: now,
            image,
            source: source.name().to_string(),
        });
        frame_id += 1;
        frames_in += 1;
        frames_processed += 1;

        let previous_ts = {
            let mut st = status.lock();
            let previous_ts = st.last_frame_ts;
            st.last_frame_ts = now;
            st.queue_ms = buffer.queue_ms();
            st.drops = buffer.drops();
            st.reconnections = source.reconnections();
            st.using_synthetic = source.using_synthetic();
            metrics.set_gauge("queue_ms", st.queue_ms);
            metrics.set_gauge("drops", st.drops as f64);

            let dt = now - last_fps_ts;
            if dt >= 1.0 {
                st.fps_in = frames_in as f64 / dt;
                st.fps_processed = frames_processed as f64 / dt;
                metrics.set_gauge("fps_in", st.fps_in);
                metrics.set_gauge("fps_processed", st.fps_processed);
                frames_in = 0;
                frames_processed = 0;
                last_fps_ts = now;
            }
            previous_ts
        };

        if freeze.enabled && previous_ts > 0.0 {
            let stale_ms = (now - previous_ts) * 1000.0;
            if stale_ms > freeze.max_stale_ms as f64 {
                status.lock().stale_events += 1;
                health.set_degraded(DegradeReason::IngestionStale);
            } else {
                health.clear_reason(DegradeReason::IngestionStale);
            }
        }
    }
    source.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use scale_vision_core::config::BufferConfig;
    use scale_vision_core::types::BgrImage;

    /// Source that serves pre-normalized frames, optionally with a fixed
    /// delay per read, optionally failing every read.
    struct ScriptedSource {
        fail_reads: bool,
        read_delay: Duration,
    }

    impl FrameSource for ScriptedSource {
        fn open(&mut self) -> bool {
            true
        }
        fn read(&mut self) -> Option<BgrImage> {
            if !self.read_delay.is_zero() {
                thread::sleep(self.read_delay);
            }
            if self.fail_reads {
                None
            } else {
                Some(BgrImage::zeroed(4, 4))
            }
        }
        fn close(&mut self) {}
        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn harness(
        fail_reads: bool,
        read_delay: Duration,
        freeze: FreezeDetectionConfig,
    ) -> (IngestionRunner, Arc<FrameBuffer>, Arc<HealthTracker>) {
        let buffer = Arc::new(FrameBuffer::new(&BufferConfig::default()));
        let health = Arc::new(HealthTracker::new());
        let runner = IngestionRunner::spawn(
            Box::new(ScriptedSource { fail_reads, read_delay }),
            Arc::clone(&buffer),
            NormalizeConfig { width: 4, height: 4, fps: 15 },
            freeze,
            Arc::clone(&health),
            Arc::new(Metrics::new()),
        );
        (runner, buffer, health)
    }

    #[test]
    fn produces_monotonic_frames() {
        let freeze = FreezeDetectionConfig { enabled: false, max_stale_ms: 1200 };
        let (mut runner, buffer, health) = harness(false, Duration::from_millis(5), freeze);

        let first = buffer.get(Duration::from_secs(2)).expect("frame");
        let second = buffer.get(Duration::from_secs(2)).expect("frame");
        assert!(second.frame_id > first.frame_id);
        assert_eq!(first.source, "scripted");
        assert!(first.timestamp > 0.0);
        assert!(!health.snapshot().has_ingestion_reason());

        runner.stop();
        let status = runner.status();
        assert!(status.ok);
        assert!(status.last_frame_ts > 0.0);
    }

    #[test]
    fn read_failures_degrade_health() {
        let freeze = FreezeDetectionConfig { enabled: false, max_stale_ms: 1200 };
        let (mut runner, _buffer, health) = harness(true, Duration::ZERO, freeze);

        thread::sleep(Duration::from_millis(150));
        let snap = health.snapshot();
        assert!(snap.reasons.contains(&DegradeReason::IngestionReadFailed));
        assert!(snap.degraded);
        assert!(!runner.status().ok);
        runner.stop();
    }

    #[test]
    fn slow_source_trips_freeze_detection() {
        let freeze = FreezeDetectionConfig { enabled: true, max_stale_ms: 1 };
        let (mut runner, buffer, health) = harness(false, Duration::from_millis(20), freeze);

        // Let a few >1 ms gaps accumulate.
        for _ in 0..3 {
            let _ = buffer.get(Duration::from_secs(2));
        }
        thread::sleep(Duration::from_millis(50));
        assert!(health.snapshot().reasons.contains(&DegradeReason::IngestionStale));
        runner.stop();
        assert!(runner.status().stale_events > 0);
    }
}
