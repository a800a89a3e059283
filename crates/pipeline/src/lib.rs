//! Generation pipeline: the shared inference engine, prompt enhancement and
//! the Generation Worker that ties them to the job storage layout.

pub mod engine;
pub mod enhance;
pub mod remote;
pub mod worker;

pub use engine::{EngineError, EngineHandle, EngineLoader, InferenceEngine, InferenceRequest};
pub use enhance::{DisabledEnhancer, EnhanceError, GeminiEnhancer, PromptEnhancer};
pub use remote::{ModelSource, RemoteEngine, RemoteEngineLoader};
pub use worker::{GenerationOutput, GenerationWorker, WorkerError};
