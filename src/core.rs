use crate::autosave::{EditorRegistry, SaveCoordinator};
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::db::Database;
use crate::doc_cache::DocumentCache;
use crate::errors::AppResult;
use crate::models::{
    CachedDocument, Note, Project, SaveNotePayload, SaveProjectPayload, SaveTaskPayload,
    SaveWorkspacePayload, Subcategory, SweepReport, Task, TaskStatus, UserSettings, Workspace,
};
use crate::retention::RetentionSweeper;
use std::path::Path;
use std::sync::Arc;

const DB_FILE: &str = "localnote.db";

/// The one handle a shell holds. Owns the store, the per-note editors, the
/// document cache and the retention sweeper; constructed once at startup
/// and passed around by reference.
pub struct NotesCore {
    db: Arc<Database>,
    editors: EditorRegistry,
    cache: DocumentCache,
    sweeper: RetentionSweeper,
}

impl NotesCore {
    /// Opens (or creates) the store under `data_dir` and runs the startup
    /// retention sweep.
    pub fn open(data_dir: &Path, config: CoreConfig, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let db = Arc::new(Database::open(&data_dir.join(DB_FILE), clock.clone())?);
        let core = Self::with_database(db, config, clock)?;
        Ok(core)
    }

    /// Same wiring over an already-open store; tests hand in an in-memory
    /// one.
    pub fn with_database(
        db: Arc<Database>,
        config: CoreConfig,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let editors = EditorRegistry::new(
            db.clone(),
            config.autosave_debounce(),
            config.saved_flash(),
        );
        let cache = DocumentCache::new(db.clone(), config.document_cache_capacity_bytes);
        let sweeper = RetentionSweeper::new(db.clone(), config.retention_window(), clock);
        let core = Self {
            db,
            editors,
            cache,
            sweeper,
        };

        let report = core.sweeper.sweep()?;
        tracing::debug!(
            scanned = report.scanned,
            purged = report.purged,
            "startup retention sweep"
        );
        Ok(core)
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    // ─── Editor surface ─────────────────────────────────────────────────────

    pub fn create_note(&self, payload: SaveNotePayload) -> AppResult<Note> {
        self.db.save_note(payload)
    }

    pub async fn open_note_editor(&self, note_id: &str) -> AppResult<SaveCoordinator> {
        self.editors.open(note_id).await
    }

    pub async fn close_note_editor(&self, note_id: &str) -> AppResult<()> {
        self.editors.close(note_id).await
    }

    /// Process teardown: flush every open editor before the runtime goes
    /// away.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.editors.flush_all().await
    }

    // ─── List/board surface ─────────────────────────────────────────────────

    pub fn list_active_notes(&self) -> AppResult<Vec<Note>> {
        self.db.list_active_notes()
    }

    pub fn list_notes_in_workspace(&self, workspace_id: &str) -> AppResult<Vec<Note>> {
        self.db.list_notes_in_workspace(workspace_id)
    }

    pub fn list_starred_notes(&self) -> AppResult<Vec<Note>> {
        self.db.list_starred_notes()
    }

    pub fn search_notes(&self, query: &str) -> AppResult<Vec<Note>> {
        self.db.search_notes(query)
    }

    pub fn soft_delete_note(&self, id: &str) -> AppResult<()> {
        self.db.soft_delete_note(id)
    }

    pub fn restore_note(&self, id: &str) -> AppResult<Note> {
        self.db.restore_note(id)
    }

    pub fn hard_delete_note(&self, id: &str) -> AppResult<()> {
        self.db.hard_delete_note(id)
    }

    /// Opening the trash view sweeps first, then lists what is left, so an
    /// expired note never appears in the listing it was just purged from.
    pub fn open_trash(&self) -> AppResult<Vec<Note>> {
        self.sweeper.sweep()?;
        self.db.list_deleted_notes()
    }

    pub fn sweep_retention(&self) -> AppResult<SweepReport> {
        self.sweeper.sweep()
    }

    // ─── Workspaces / subcategories ─────────────────────────────────────────

    pub fn create_workspace(&self, payload: SaveWorkspacePayload) -> AppResult<Workspace> {
        self.db.create_workspace(payload)
    }

    pub fn update_workspace(&self, id: &str, payload: SaveWorkspacePayload) -> AppResult<Workspace> {
        self.db.update_workspace(id, payload)
    }

    pub fn delete_workspace(&self, id: &str) -> AppResult<()> {
        self.db.delete_workspace(id)
    }

    pub fn list_workspaces(&self) -> AppResult<Vec<Workspace>> {
        self.db.list_workspaces()
    }

    pub fn reorder_workspaces(&self, ids: &[String]) -> AppResult<Vec<Workspace>> {
        self.db.reorder_workspaces(ids)
    }

    pub fn create_subcategory(&self, workspace_id: &str, name: &str) -> AppResult<Subcategory> {
        self.db.create_subcategory(workspace_id, name)
    }

    pub fn list_subcategories(&self, workspace_id: &str) -> AppResult<Vec<Subcategory>> {
        self.db.list_subcategories(workspace_id)
    }

    pub fn delete_subcategory(&self, id: &str) -> AppResult<()> {
        self.db.delete_subcategory(id)
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<UserSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<UserSettings> {
        self.db.update_settings(update)
    }

    // ─── Tasks / projects ───────────────────────────────────────────────────

    pub fn save_task(&self, payload: SaveTaskPayload) -> AppResult<Task> {
        self.db.save_task(payload)
    }

    pub fn get_task(&self, id: &str) -> AppResult<Option<Task>> {
        self.db.get_task(id)
    }

    pub fn delete_task(&self, id: &str) -> AppResult<()> {
        self.db.delete_task(id)
    }

    pub fn list_tasks(&self) -> AppResult<Vec<Task>> {
        self.db.list_tasks()
    }

    pub fn list_tasks_by_status(&self, status: TaskStatus) -> AppResult<Vec<Task>> {
        self.db.list_tasks_by_status(status)
    }

    pub fn list_tasks_by_project(&self, project_id: &str) -> AppResult<Vec<Task>> {
        self.db.list_tasks_by_project(project_id)
    }

    pub fn reorder_tasks(&self, ids: &[String]) -> AppResult<Vec<Task>> {
        self.db.reorder_tasks(ids)
    }

    pub fn save_project(&self, payload: SaveProjectPayload) -> AppResult<Project> {
        self.db.save_project(payload)
    }

    pub fn list_projects(&self) -> AppResult<Vec<Project>> {
        self.db.list_projects()
    }

    pub fn delete_project(&self, id: &str) -> AppResult<()> {
        self.db.delete_project(id)
    }

    // ─── Document viewer surface ────────────────────────────────────────────

    pub fn is_document_cached(&self, id: &str) -> AppResult<bool> {
        self.cache.is_cached(id)
    }

    pub fn get_cached_document(&self, id: &str) -> AppResult<Option<Vec<u8>>> {
        self.cache.get(id)
    }

    pub async fn cache_document(&self, file_name: &str, payload: &[u8]) -> AppResult<CachedDocument> {
        self.cache.put(file_name, payload).await
    }

    pub fn remove_cached_document(&self, id: &str) -> AppResult<bool> {
        self.cache.remove(id)
    }

    pub fn list_cached_documents(&self) -> AppResult<Vec<CachedDocument>> {
        self.cache.list()
    }

    pub fn document_cache_usage(&self) -> AppResult<u64> {
        self.cache.total_size()
    }
}
