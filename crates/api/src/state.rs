use std::sync::Arc;

use dsd_core::hardware::probe::ResourceProbe;
use dsd_core::layout::JobLayout;
use dsd_pipeline::engine::{EngineHandle, EngineLoader};
use dsd_pipeline::enhance::PromptEnhancer;
use dsd_pipeline::worker::GenerationWorker;

use crate::config::ServerConfig;
use crate::engine::ExecutionDispatcher;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// The process-wide inference engine (lazily loaded).
    pub engine: Arc<EngineHandle>,
    /// Chooses inline vs. background execution and answers polls.
    pub dispatcher: Arc<ExecutionDispatcher>,
}

impl AppState {
    /// Wire the worker and dispatcher around the given collaborators.
    ///
    /// Does not touch the filesystem or load the engine.
    pub fn new(
        config: &ServerConfig,
        probe: Arc<dyn ResourceProbe>,
        loader: Arc<dyn EngineLoader>,
        enhancer: Arc<dyn PromptEnhancer>,
    ) -> Self {
        let layout = Arc::new(JobLayout::new(
            config.storage.upload_dir.clone(),
            config.storage.output_dir.clone(),
        ));
        let engine = Arc::new(EngineHandle::new(loader));
        let worker = Arc::new(GenerationWorker::new(Arc::clone(&engine), enhancer, layout));
        let dispatcher = Arc::new(ExecutionDispatcher::new(probe, worker));

        Self { engine, dispatcher }
    }
}
