// crates/scale-vision-pipeline/src/state.rs
//
// RuntimeState: the process-wide snapshot every task reports into and the
// HTTP handlers read from. Each piece guards its own lock, held only for
// the duration of the read/write — never across I/O or predict calls.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use scale_vision_core::types::{BgrImage, DecisionEvent, IngestionStatus};
use scale_vision_core::{AppConfig, HealthTracker, Mapper, Metrics};

use crate::inference::InferenceBackend;

pub struct RuntimeState {
    pub health:  Arc<HealthTracker>,
    pub metrics: Arc<Metrics>,
    /// Serializes predict() between the control loop and the HTTP
    /// on-demand predict handler.
    pub inference: Mutex<Option<Box<dyn InferenceBackend>>>,
    pub config_path: PathBuf,

    config:           RwLock<AppConfig>,
    mapper:           RwLock<Arc<Mapper>>,
    last_decision:    Mutex<Option<DecisionEvent>>,
    ingestion_status: Mutex<Option<IngestionStatus>>,
    /// Most recent frame pulled by the control loop, for the camera
    /// snapshot/stream endpoints.
    latest_frame: Mutex<Option<BgrImage>>,
}

impl RuntimeState {
    pub fn new(config: AppConfig, config_path: PathBuf) -> Self {
        let mapper = Arc::new(Mapper::new(config.mapping.clone()));
        Self {
            health:           Arc::new(HealthTracker::new()),
            metrics:          Arc::new(Metrics::new()),
            inference:        Mutex::new(None),
            config_path,
            config:           RwLock::new(config),
            mapper:           RwLock::new(mapper),
            last_decision:    Mutex::new(None),
            ingestion_status: Mutex::new(None),
            latest_frame:     Mutex::new(None),
        }
    }

    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: AppConfig) {
        *self.config.write() = config;
    }

    pub fn mapper(&self) -> Arc<Mapper> {
        Arc::clone(&self.mapper.read())
    }

    pub fn set_mapper(&self, mapper: Arc<Mapper>) {
        *self.mapper.write() = mapper;
    }

    pub fn update_last_decision(&self, decision: DecisionEvent) {
        *self.last_decision.lock() = Some(decision);
    }

    pub fn last_decision(&self) -> Option<DecisionEvent> {
        self.last_decision.lock().clone()
    }

    pub fn update_ingestion_status(&self, status: IngestionStatus) {
        *self.ingestion_status.lock() = Some(status);
    }

    pub fn ingestion_status(&self) -> Option<IngestionStatus> {
        self.ingestion_status.lock().clone()
    }

    pub fn update_latest_frame(&self, image: BgrImage) {
        *self.latest_frame.lock() = Some(image);
    }

    pub fn latest_frame(&self) -> Option<BgrImage> {
        self.latest_frame.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scale_vision_core::types::{DecisionReason, DecisionState};

    #[test]
    fn last_decision_round_trips() {
        let state = RuntimeState::new(AppConfig::default(), PathBuf::from("/tmp/config.json"));
        assert!(state.last_decision().is_none());

        state.update_last_decision(DecisionEvent {
            request_id:  "1000-0".into(),
            timestamp:   1.0,
            state:       DecisionState::Observing,
            emitted:     false,
            reason_code: DecisionReason::Observing,
            class_id:    None,
            confidence:  0.0,
            margin:      0.0,
            code:        None,
        });
        assert_eq!(state.last_decision().unwrap().request_id, "1000-0");
    }

    #[test]
    fn mapper_swap_is_visible() {
        use scale_vision_core::config::{MappingConfig, MappingEntry};

        let state = RuntimeState::new(AppConfig::default(), PathBuf::from("/tmp/config.json"));
        assert!(state.mapper().map_class("apple").code.is_none());

        let mut mapping = MappingConfig::default();
        mapping.classes.insert(
            "apple".into(),
            MappingEntry {
                code_type: "plu".into(),
                code:      "4016".into(),
                aliases:   vec![],
                disabled:  false,
            },
        );
        state.set_mapper(Arc::new(Mapper::new(mapping)));
        assert_eq!(state.mapper().map_class("apple").code.as_deref(), Some("4016"));
    }
}
