// crates/scale-vision-core/src/decision/engine.rs
//
// Three-state machine converting noisy per-frame classifications into
// at-most-one emission per episode. An episode runs from arming
// (IDLE → OBSERVING) through emission (LOCKED) and cooldown back to IDLE.

use crate::config::DecisionConfig;
use crate::decision::voting::weighted_vote;
use crate::types::{ClassProb, DecisionEvent, DecisionReason, DecisionState, InferenceResult};

#[derive(Clone, Debug)]
struct Observation {
    timestamp: f64,
    class_id:  String,
    prob:      f32,
}

#[derive(Default)]
struct EngineState {
    state:        DecisionState,
    observations: Vec<Observation>,
    locked_class: Option<String>,
    last_emit_ts: f64,
}

pub struct DecisionEngine {
    config: DecisionConfig,
    state:  EngineState,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config, state: EngineState::default() }
    }

    pub fn current_state(&self) -> DecisionState {
        self.state.state
    }

    fn reset(&mut self) {
        self.state = EngineState::default();
    }

    /// Drop observations older than the window, measured against `now`.
    /// First-seen timestamps are monotone within the window because the
    /// producer stamps frames in wall-clock order; a backward clock jump can
    /// over- or under-retain here (known tolerance).
    fn trim_window(&mut self, now: f64) {
        let window_s = self.config.window_ms as f64 / 1000.0;
        self.state.observations.retain(|obs| now - obs.timestamp <= window_s);
    }

    fn stable_frames(&self, class_id: &str) -> u32 {
        self.state.observations.iter().filter(|obs| obs.class_id == class_id).count() as u32
    }

    /// Consume one frame's classification. Exactly one event comes back per
    /// call; at most one event per episode has `emitted = true`.
    pub fn process(
        &mut self,
        inference: &InferenceResult,
        ingestion_ok: bool,
        quality_ok: bool,
        frame_id: u64,
        now: f64,
    ) -> DecisionEvent {
        let request_id = format!("{}-{}", (now * 1000.0) as i64, frame_id);

        // Reset preconditions, in order. Each one abandons the episode.
        if !ingestion_ok {
            self.reset();
            return self.event(request_id, now, false, DecisionReason::IngestionDegraded);
        }
        if !quality_ok {
            self.reset();
            return self.event(request_id, now, false, DecisionReason::QualityGate);
        }
        if inference.top_k.is_empty() {
            self.reset();
            return self.event(request_id, now, false, DecisionReason::NoPrediction);
        }

        let top1 = &inference.top_k[0];

        // Arm in the same call: the first qualifying frame must contribute to
        // the window, not be discarded.
        if self.state.state == DecisionState::Idle {
            self.state.state = DecisionState::Observing;
            self.state.observations.clear();
        }

        if self.state.state == DecisionState::Observing {
            self.state.observations.push(Observation {
                timestamp: now,
                class_id:  top1.class_id.clone(),
                prob:      top1.prob,
            });
            self.trim_window(now);

            let votes: Vec<ClassProb> = self
                .state
                .observations
                .iter()
                .map(|obs| ClassProb::new(obs.class_id.clone(), obs.prob))
                .collect();
            let (top_class, top_prob, margin) = weighted_vote(&votes);
            let stable = self.stable_frames(&top_class);

            if top_prob >= self.config.min_confidence
                && margin >= self.config.min_margin
                && stable >= self.config.require_stable_frames
            {
                self.state.state = DecisionState::Cooldown;
                self.state.locked_class = Some(top_class.clone());
                self.state.last_emit_ts = now;
                let mut event = self.event(request_id, now, true, DecisionReason::Emit);
                event.state = DecisionState::Locked;
                event.class_id = Some(top_class);
                event.confidence = top_prob;
                event.margin = margin;
                return event;
            }

            let window_age = now - self.state.observations[0].timestamp;
            if window_age > self.config.window_ms as f64 / 1000.0 {
                self.reset();
                let mut event = self.event(request_id, now, false, DecisionReason::WindowExpired);
                event.class_id = Some(top_class);
                event.confidence = top_prob;
                event.margin = margin;
                return event;
            }

            let mut event = self.event(request_id, now, false, DecisionReason::Observing);
            event.class_id = Some(top_class);
            event.confidence = top_prob;
            event.margin = margin;
            return event;
        }

        if self.state.state == DecisionState::Cooldown {
            // Re-arm only once the cooldown has elapsed AND the scene moved
            // on: either a different class fills the pan, or confidence
            // collapsed (object removed). The same object cannot re-emit.
            let elapsed = now - self.state.last_emit_ts;
            let locked = self.state.locked_class.as_deref().unwrap_or("");
            let scene_change = top1.class_id != locked;
            let low_conf = top1.prob < self.config.scene_change_threshold;
            if elapsed >= self.config.cooldown_ms as f64 / 1000.0 && (scene_change || low_conf) {
                self.reset();
                return self.event(request_id, now, false, DecisionReason::CooldownComplete);
            }
            return self.event(request_id, now, false, DecisionReason::Cooldown);
        }

        self.reset();
        self.event(request_id, now, false, DecisionReason::Reset)
    }

    fn event(
        &self,
        request_id: String,
        now: f64,
        emitted: bool,
        reason: DecisionReason,
    ) -> DecisionEvent {
        DecisionEvent {
            request_id,
            timestamp: now,
            state: self.state.state,
            emitted,
            reason_code: reason,
            class_id: None,
            confidence: 0.0,
            margin: 0.0,
            code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DecisionConfig {
        DecisionConfig {
            window_ms: 500,
            min_confidence: 0.6,
            min_margin: 0.1,
            cooldown_ms: 200,
            require_stable_frames: 1,
            scene_change_threshold: 0.40,
            block_on_ingestion_degraded: true,
        }
    }

    fn result(class_id: &str, prob: f32) -> InferenceResult {
        InferenceResult {
            top_k: vec![ClassProb::new(class_id, prob), ClassProb::new("alt", 0.05)],
            ..Default::default()
        }
    }

    #[test]
    fn emits_once_per_episode() {
        let mut engine = DecisionEngine::new(config());
        let mut ts = 0.0;
        let mut emitted = Vec::new();
        for i in 0..10u64 {
            ts += 0.05;
            let event = engine.process(&result("apple", 0.9), true, true, i, ts);
            if event.emitted {
                assert_eq!(event.state, DecisionState::Locked);
                assert_eq!(event.reason_code, DecisionReason::Emit);
                assert_eq!(event.class_id.as_deref(), Some("apple"));
            }
            emitted.push(event.emitted);
        }
        assert_eq!(emitted.iter().filter(|e| **e).count(), 1);
    }

    #[test]
    fn ingestion_degraded_resets_to_idle() {
        let mut cfg = config();
        cfg.require_stable_frames = 3;
        let mut engine = DecisionEngine::new(cfg);
        engine.process(&result("apple", 0.9), true, true, 0, 1.0);
        assert_eq!(engine.current_state(), DecisionState::Observing);

        let event = engine.process(&result("apple", 0.9), false, true, 1, 1.05);
        assert!(!event.emitted);
        assert_eq!(event.reason_code, DecisionReason::IngestionDegraded);
        assert_eq!(event.state, DecisionState::Idle);
        assert_eq!(engine.current_state(), DecisionState::Idle);
    }

    #[test]
    fn quality_gate_and_empty_topk_reset() {
        let mut engine = DecisionEngine::new(config());
        let event = engine.process(&result("apple", 0.9), true, false, 0, 1.0);
        assert_eq!(event.reason_code, DecisionReason::QualityGate);

        let empty = InferenceResult::default();
        let event = engine.process(&empty, true, true, 1, 1.05);
        assert_eq!(event.reason_code, DecisionReason::NoPrediction);
        assert!(!event.emitted);
    }

    #[test]
    fn same_object_cannot_reemit_during_cooldown() {
        let mut engine = DecisionEngine::new(config());
        let event = engine.process(&result("apple", 0.9), true, true, 0, 1.0);
        assert!(event.emitted);

        // Cooldown elapsed but the same confident class still fills the pan.
        let event = engine.process(&result("apple", 0.9), true, true, 1, 1.5);
        assert!(!event.emitted);
        assert_eq!(event.reason_code, DecisionReason::Cooldown);
        assert_eq!(event.state, DecisionState::Cooldown);
    }

    #[test]
    fn scene_change_after_cooldown_rearms() {
        let mut engine = DecisionEngine::new(config());
        assert!(engine.process(&result("apple", 0.9), true, true, 0, 1.0).emitted);

        let event = engine.process(&result("banana", 0.9), true, true, 1, 1.3);
        assert!(!event.emitted);
        assert_eq!(event.reason_code, DecisionReason::CooldownComplete);
        assert_eq!(engine.current_state(), DecisionState::Idle);

        // Second episode emits again.
        let event = engine.process(&result("banana", 0.9), true, true, 2, 1.35);
        assert!(event.emitted);
        assert_eq!(event.class_id.as_deref(), Some("banana"));
    }

    #[test]
    fn confidence_collapse_after_cooldown_rearms() {
        let mut engine = DecisionEngine::new(config());
        assert!(engine.process(&result("apple", 0.9), true, true, 0, 1.0).emitted);

        // Same class but below the scene-change threshold: object removed.
        let event = engine.process(&result("apple", 0.2), true, true, 1, 1.3);
        assert_eq!(event.reason_code, DecisionReason::CooldownComplete);
    }

    #[test]
    fn scene_change_before_cooldown_elapsed_stays_locked_out() {
        let mut engine = DecisionEngine::new(config());
        assert!(engine.process(&result("apple", 0.9), true, true, 0, 1.0).emitted);

        let event = engine.process(&result("banana", 0.9), true, true, 1, 1.1);
        assert_eq!(event.reason_code, DecisionReason::Cooldown);
    }

    #[test]
    fn quality_blocked_frames_never_emit() {
        let mut engine = DecisionEngine::new(config());
        let mut ts = 0.0;
        for i in 0..40u64 {
            ts += 0.05;
            let event = engine.process(&result("apple", 0.9), true, false, i, ts);
            assert!(!event.emitted);
            assert_eq!(event.reason_code, DecisionReason::QualityGate);
        }
    }

    #[test]
    fn contested_window_keeps_observing() {
        // Two classes alternating at equal probability: neither reaches the
        // stable-frame requirement inside the sliding window, so the engine
        // observes indefinitely.
        let mut cfg = config();
        cfg.require_stable_frames = 8;
        let mut engine = DecisionEngine::new(cfg);
        let mut ts = 0.0;
        for i in 0..40u64 {
            ts += 0.05;
            let class = if i % 2 == 0 { "apple" } else { "banana" };
            let event = engine.process(&result(class, 0.5), true, true, i, ts);
            assert!(!event.emitted);
            assert_eq!(event.reason_code, DecisionReason::Observing);
        }
    }

    #[test]
    fn request_id_is_ms_timestamp_dash_frame_id() {
        let mut engine = DecisionEngine::new(config());
        let event = engine.process(&result("apple", 0.9), true, true, 42, 1234.5678);
        assert_eq!(event.request_id, "1234567-42");
    }

    #[test]
    fn stable_frames_requirement_delays_emission() {
        let mut cfg = config();
        cfg.require_stable_frames = 3;
        let mut engine = DecisionEngine::new(cfg);
        let mut emitted_at = None;
        for i in 0..5u64 {
            let event =
                engine.process(&result("apple", 0.9), true, true, i, 1.0 + i as f64 * 0.05);
            if event.emitted {
                emitted_at = Some(i);
                break;
            }
        }
        // Third observation is the first with stable_frames >= 3.
        assert_eq!(emitted_at, Some(2));
    }
}
