//! Project manager — the owner of every editable project's state.
//!
//! Each project is one live page source plus its version history. All
//! mutation goes through a per-project async mutex, so apply/undo/redo
//! are serialized per project id while independent projects proceed in
//! parallel. History snapshots are persisted through [`Storage`] after
//! every successful mutation.

pub mod templates;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::patch::engine::{apply_to_content, AppliedChange, History};
use crate::patch::{PatchError, ValidatedPlan};
use crate::storage::Storage;

use templates::template_for;

/// In-memory state of one open project.
#[derive(Debug)]
pub struct ProjectState {
    pub file_path: String,
    pub history: History,
}

impl ProjectState {
    pub fn content(&self) -> &str {
        &self.history.current().content
    }
}

/// Response shape for apply/undo/redo operations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryOutcome {
    /// Id of the version now at the cursor.
    pub version: String,
    pub can_undo: bool,
    pub can_redo: bool,
    /// False when an undo/redo hit the history boundary and nothing changed.
    pub moved: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub applied_changes: Vec<AppliedChange>,
}

/// Read-only view of a project for the REST boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub id: String,
    pub file_path: String,
    pub content: String,
    pub version: String,
    pub can_undo: bool,
    pub can_redo: bool,
    pub version_count: usize,
}

pub struct ProjectManager {
    storage: Arc<Storage>,
    projects: RwLock<HashMap<String, Arc<Mutex<ProjectState>>>>,
    /// Versions kept per project (0 = unlimited). Hot-reloadable.
    max_versions: std::sync::atomic::AtomicUsize,
}

impl ProjectManager {
    pub fn new(storage: Arc<Storage>, max_versions: usize) -> Self {
        Self {
            storage,
            projects: RwLock::new(HashMap::new()),
            max_versions: std::sync::atomic::AtomicUsize::new(max_versions),
        }
    }

    pub fn set_max_versions(&self, max_versions: usize) {
        self.max_versions
            .store(max_versions, std::sync::atomic::Ordering::Relaxed);
    }

    /// Open a project, loading it from storage or seeding it from a
    /// template slug on first touch. Unknown id + unknown/absent slug is
    /// `ProjectNotFound`.
    pub async fn open(
        &self,
        project_id: &str,
        template_slug: Option<&str>,
    ) -> Result<Arc<Mutex<ProjectState>>, PatchError> {
        if let Some(state) = self.projects.read().await.get(project_id) {
            return Ok(state.clone());
        }

        let mut projects = self.projects.write().await;
        // Another task may have opened it while we waited for the lock.
        if let Some(state) = projects.get(project_id) {
            return Ok(state.clone());
        }

        let state = match self.storage.load_history(project_id).await? {
            Some(history) => {
                let row = self
                    .storage
                    .get_project(project_id)
                    .await?
                    .ok_or_else(|| PatchError::ProjectNotFound(project_id.to_owned()))?;
                debug!(project = %project_id, versions = history.len(), "project loaded from storage");
                ProjectState {
                    file_path: row.file_path,
                    history,
                }
            }
            None => {
                let slug = template_slug
                    .ok_or_else(|| PatchError::ProjectNotFound(project_id.to_owned()))?;
                let template = template_for(slug)
                    .ok_or_else(|| PatchError::ProjectNotFound(project_id.to_owned()))?;

                let history = History::seeded(template.file_path, template.seed);
                self.storage
                    .create_project(project_id, template.slug, template.file_path)
                    .await?;
                self.storage.save_history(project_id, &history).await?;
                info!(project = %project_id, slug = %slug, "project seeded from template");
                ProjectState {
                    file_path: template.file_path.to_owned(),
                    history,
                }
            }
        };

        let state = Arc::new(Mutex::new(state));
        projects.insert(project_id.to_owned(), state.clone());
        Ok(state)
    }

    pub async fn snapshot(&self, project_id: &str) -> Result<ProjectSnapshot, PatchError> {
        let state = self.open(project_id, None).await?;
        let state = state.lock().await;
        Ok(ProjectSnapshot {
            id: project_id.to_owned(),
            file_path: state.file_path.clone(),
            content: state.content().to_owned(),
            version: state.history.current().id.clone(),
            can_undo: state.history.can_undo(),
            can_redo: state.history.can_redo(),
            version_count: state.history.len(),
        })
    }

    /// Apply a validated plan atomically: the stored version only advances
    /// if every change in the batch succeeds.
    pub async fn apply(
        &self,
        project_id: &str,
        plan: &ValidatedPlan,
    ) -> Result<HistoryOutcome, PatchError> {
        let state = self.open(project_id, None).await?;
        let mut state = state.lock().await;

        if let Some(change) = plan.plan.changes.first() {
            if change.file_path() != state.file_path {
                return Err(PatchError::Schema(format!(
                    "plan targets {:?} but this project edits {:?}",
                    change.file_path(),
                    state.file_path
                )));
            }
        }

        let result = apply_to_content(state.content(), &plan.plan)?;
        let file_path = state.file_path.clone();
        let applied = result.applied.clone();
        state.history.push(
            &file_path,
            result,
            self.max_versions.load(std::sync::atomic::Ordering::Relaxed),
        );

        self.storage.save_history(project_id, &state.history).await?;

        info!(
            project = %project_id,
            changes = applied.len(),
            version = %state.history.current().id,
            "plan applied"
        );

        Ok(HistoryOutcome {
            version: state.history.current().id.clone(),
            can_undo: state.history.can_undo(),
            can_redo: state.history.can_redo(),
            moved: true,
            applied_changes: applied,
        })
    }

    pub async fn undo(&self, project_id: &str) -> Result<HistoryOutcome, PatchError> {
        self.step(project_id, true).await
    }

    pub async fn redo(&self, project_id: &str) -> Result<HistoryOutcome, PatchError> {
        self.step(project_id, false).await
    }

    async fn step(&self, project_id: &str, backward: bool) -> Result<HistoryOutcome, PatchError> {
        let state = self.open(project_id, None).await?;
        let mut state = state.lock().await;

        let before = state.history.cursor();
        if backward {
            state.history.undo();
        } else {
            state.history.redo();
        }
        let moved = state.history.cursor() != before;
        if moved {
            self.storage.save_history(project_id, &state.history).await?;
        }

        debug!(
            project = %project_id,
            backward,
            moved,
            cursor = state.history.cursor(),
            "history step"
        );

        Ok(HistoryOutcome {
            version: state.history.current().id.clone(),
            can_undo: state.history.can_undo(),
            can_redo: state.history.can_redo(),
            moved,
            applied_changes: vec![],
        })
    }

    pub async fn open_count(&self) -> usize {
        self.projects.read().await.len()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
