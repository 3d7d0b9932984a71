// crates/scale-vision-core/src/lib.rs

pub mod config;
pub mod decision;
pub mod health;
pub mod mapping;
pub mod metrics;
pub mod types;

pub use config::AppConfig;
pub use decision::engine::DecisionEngine;
pub use decision::quality::quality_gate;
pub use health::{HealthState, HealthTracker};
pub use mapping::{MapReason, MapResult, Mapper};
pub use metrics::Metrics;
pub use types::{
    BgrImage, ClassProb, DecisionEvent, DecisionReason, DecisionState, DegradeReason, Frame,
    InferenceResult, IngestionStatus, OutputCommand,
};
