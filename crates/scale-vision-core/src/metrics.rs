// crates/scale-vision-core/src/metrics.rs
//
// Named gauges and monotonic counters with a plain-text exposition.

use std::collections::BTreeMap;
use std::time::Instant;

use parking_lot::Mutex;

const PREFIX: &str = "scale_vision";

#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    pub gauges:   BTreeMap<String, f64>,
    pub counters: BTreeMap<String, u64>,
}

pub struct Metrics {
    gauges:   Mutex<BTreeMap<String, f64>>,
    counters: Mutex<BTreeMap<String, u64>>,
    started:  Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            gauges:   Mutex::new(BTreeMap::new()),
            counters: Mutex::new(BTreeMap::new()),
            started:  Instant::now(),
        }
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.lock().insert(name.to_string(), value);
    }

    pub fn inc_counter(&self, name: &str, by: u64) {
        *self.counters.lock().entry(name.to_string()).or_insert(0) += by;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            gauges:   self.gauges.lock().clone(),
            counters: self.counters.lock().clone(),
        }
    }

    /// Text exposition: build-info line, uptime, `prefix_<gauge> <value>`,
    /// `prefix_<counter>_total <value>`.
    pub fn render(&self, version: &str, build_id: &str) -> String {
        let snapshot = self.snapshot();
        let mut lines = vec![format!("# {PREFIX} metrics")];
        lines.push(format!(
            "{PREFIX}_build_info{{version=\"{version}\",build_id=\"{build_id}\"}} 1"
        ));
        lines.push(format!(
            "{PREFIX}_uptime_seconds {:.3}",
            self.started.elapsed().as_secs_f64()
        ));
        for (key, value) in &snapshot.gauges {
            lines.push(format!("{PREFIX}_{key} {value}"));
        }
        for (key, value) in &snapshot.counters {
            lines.push(format!("{PREFIX}_{key}_total {value}"));
        }
        lines.join("\n") + "\n"
    }
}
