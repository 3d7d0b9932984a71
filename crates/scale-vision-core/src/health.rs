// crates/scale-vision-core/src/health.rs
//
// Set of active degradation reasons, reported into by every stage.
// Invariant: degraded ⇔ the reason set is non-empty.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::types::DegradeReason;

#[derive(Clone, Debug)]
pub struct HealthState {
    pub ready:    bool,
    pub degraded: bool,
    pub reasons:  BTreeSet<DegradeReason>,
    pub details:  BTreeMap<String, String>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            ready:    true,
            degraded: false,
            reasons:  BTreeSet::new(),
            details:  BTreeMap::new(),
        }
    }
}

impl HealthState {
    pub fn has_ingestion_reason(&self) -> bool {
        self.reasons.iter().any(|r| r.is_ingestion())
    }
}

pub struct HealthTracker {
    state: Mutex<HealthState>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { state: Mutex::new(HealthState::default()) }
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }

    pub fn set_degraded(&self, reason: DegradeReason) {
        let mut state = self.state.lock();
        state.reasons.insert(reason);
        state.degraded = true;
    }

    pub fn clear_reason(&self, reason: DegradeReason) {
        let mut state = self.state.lock();
        state.reasons.remove(&reason);
        state.degraded = !state.reasons.is_empty();
    }

    pub fn set_detail(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.lock().details.insert(key.into(), value.into());
    }

    pub fn snapshot(&self) -> HealthState {
        self.state.lock().clone()
    }
}
