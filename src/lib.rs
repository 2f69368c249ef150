pub mod config;
pub mod context;
pub mod locator;
pub mod patch;
pub mod plan;
pub mod project;
pub mod rest;
pub mod storage;
pub mod sync;

use std::sync::Arc;

use config::IslaConfig;
use plan::model::PlanModel;
use project::ProjectManager;
use storage::Storage;
use sync::PreviewSync;

/// Shared application state passed to every route handler and background task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<IslaConfig>,
    pub storage: Arc<Storage>,
    pub projects: Arc<ProjectManager>,
    /// Preview sync fan-out hub (also carries lifecycle notifications).
    pub sync: Arc<PreviewSync>,
    /// Plan-generation backend. Swapped for a fake in tests.
    pub model: Arc<dyn PlanModel>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    pub fn new(config: IslaConfig, storage: Storage, model: Arc<dyn PlanModel>) -> Self {
        let storage = Arc::new(storage);
        let sync = Arc::new(PreviewSync::new(config.preview.settle_delay_ms));
        let projects = Arc::new(ProjectManager::new(storage.clone(), config.max_versions));
        Self {
            config: Arc::new(config),
            storage,
            projects,
            sync,
            model,
            started_at: std::time::Instant::now(),
        }
    }
}
