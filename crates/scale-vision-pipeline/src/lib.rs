// crates/scale-vision-pipeline/src/lib.rs
//
// The runtime kernel: ingestion sources and runner, the bounded frame
// buffer, inference contract, output backends, and the control pipeline
// that strings them together. All public API the server binary calls
// lives here.

pub mod buffer;
pub mod clock;
pub mod inference;
pub mod loader;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod predict;
pub mod runner;
pub mod source;
pub mod state;

pub use buffer::FrameBuffer;
pub use inference::{build_inference, InferenceBackend, InferenceError, StubInference};
pub use loader::{ConfigLoader, LoadedConfig};
pub use normalize::Normalizer;
pub use output::{build_output, OutputBackend, OutputError};
pub use pipeline::ControlPipeline;
pub use predict::{classify_media, AdhocPrediction, PredictError};
pub use runner::IngestionRunner;
pub use source::{build_source, FrameSource};
pub use state::RuntimeState;
