use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::models::{
    CachedDocument, Note, Project, SaveNotePayload, SaveProjectPayload, SaveTaskPayload,
    SaveWorkspacePayload, Subcategory, Task, TaskPriority, TaskStatus, UserSettings, Workspace,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const SETTINGS_KEY: &str = "user";

const NOTE_COLUMNS: &str = "id, title, content, workspace_id, subcategory, color, is_pinned, \
     is_starred, is_deleted, deleted_at, tags_json, created_at, updated_at";

const TASK_COLUMNS: &str = "id, title, description, status, priority, due_date, reminder_at, \
     project_id, subtasks_json, sort_order, created_at, updated_at";

/// Keyed record store. Owns the only connection to the on-disk database;
/// every component reaches it through an `Arc<Database>` handle built once
/// at startup. No retries live here; open and commit failures surface to
/// the caller as `AppError::Storage`.
pub struct Database {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl Database {
    /// Raw connection handle for batch maintenance that has no dedicated
    /// method.
    pub fn conn(&self) -> &Mutex<Connection> {
        &self.conn
    }

    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::bootstrap(conn, clock)
    }

    /// Fresh throwaway store, used by tests.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> AppResult<Self> {
        Self::bootstrap(Connection::open_in_memory()?, clock)
    }

    fn bootstrap(conn: Connection, clock: Arc<dyn Clock>) -> AppResult<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        let db = Self {
            conn: Mutex::new(conn),
            clock,
        };
        db.ensure_schema_extensions()?;
        Ok(db)
    }

    /// Columns that arrived after the first shipped schema. Existing
    /// databases pick them up here with defaults, which is what keeps
    /// older-shaped rows readable.
    fn ensure_schema_extensions(&self) -> AppResult<()> {
        let conn = self.lock_conn()?;

        if !column_exists(&conn, "notes", "is_starred")? {
            conn.execute(
                "ALTER TABLE notes ADD COLUMN is_starred INTEGER NOT NULL DEFAULT 0",
                [],
            )?;
        }
        if !column_exists(&conn, "tasks", "reminder_at")? {
            conn.execute("ALTER TABLE tasks ADD COLUMN reminder_at TEXT", [])?;
        }
        if !column_exists(&conn, "tasks", "subtasks_json")? {
            conn.execute(
                "ALTER TABLE tasks ADD COLUMN subtasks_json TEXT NOT NULL DEFAULT '[]'",
                [],
            )?;
        }

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_notes_starred ON notes(is_deleted, is_starred);",
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ─── Notes ──────────────────────────────────────────────────────────────

    /// Insert-or-update by id. Inserts stamp `created_at`; updates preserve
    /// it along with the deletion state, so saving into a soft-deleted note
    /// does not resurrect it.
    pub fn save_note(&self, payload: SaveNotePayload) -> AppResult<Note> {
        let now = time_to_sql(self.now());
        let id = payload
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let tags_json = serde_json::to_string(&payload.tags)?;

        let conn = self.lock_conn()?;
        let exists = conn
            .query_row(
                "SELECT COUNT(1) FROM notes WHERE id = ?1",
                [id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .unwrap_or(0)
            > 0;

        if exists {
            conn.execute(
                "UPDATE notes SET title = ?1, content = ?2, workspace_id = ?3, subcategory = ?4,
                 color = ?5, is_pinned = ?6, is_starred = ?7, tags_json = ?8, updated_at = ?9
                 WHERE id = ?10",
                params![
                    payload.title,
                    payload.content,
                    payload.workspace_id,
                    payload.subcategory,
                    payload.color,
                    payload.is_pinned as i32,
                    payload.is_starred as i32,
                    tags_json,
                    now,
                    id,
                ],
            )?;
        } else {
            conn.execute(
                "INSERT INTO notes (id, title, content, workspace_id, subcategory, color,
                 is_pinned, is_starred, is_deleted, deleted_at, tags_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9, ?10, ?10)",
                params![
                    id,
                    payload.title,
                    payload.content,
                    payload.workspace_id,
                    payload.subcategory,
                    payload.color,
                    payload.is_pinned as i32,
                    payload.is_starred as i32,
                    tags_json,
                    now,
                ],
            )?;
        }
        drop(conn);

        self.get_note(&id)?
            .ok_or_else(|| AppError::Internal(format!("note {} vanished after save", id)))
    }

    pub fn get_note(&self, id: &str) -> AppResult<Option<Note>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            &format!("SELECT {} FROM notes WHERE id = ?1", NOTE_COLUMNS),
            [id],
            parse_note_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Live notes, pinned group first, then most recently updated.
    pub fn list_active_notes(&self) -> AppResult<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {} FROM notes WHERE is_deleted = 0
                 ORDER BY is_pinned DESC, updated_at DESC",
                NOTE_COLUMNS
            ),
            [],
        )
    }

    pub fn list_notes_in_workspace(&self, workspace_id: &str) -> AppResult<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {} FROM notes WHERE is_deleted = 0 AND workspace_id = ?1
                 ORDER BY is_pinned DESC, updated_at DESC",
                NOTE_COLUMNS
            ),
            [workspace_id],
        )
    }

    pub fn list_starred_notes(&self) -> AppResult<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {} FROM notes WHERE is_deleted = 0 AND is_starred = 1
                 ORDER BY is_pinned DESC, updated_at DESC",
                NOTE_COLUMNS
            ),
            [],
        )
    }

    pub fn list_deleted_notes(&self) -> AppResult<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {} FROM notes WHERE is_deleted = 1 ORDER BY deleted_at DESC",
                NOTE_COLUMNS
            ),
            [],
        )
    }

    /// Plain substring scan over title and content, live notes only.
    pub fn search_notes(&self, query: &str) -> AppResult<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {} FROM notes
                 WHERE is_deleted = 0 AND (title LIKE ?1 OR content LIKE ?1)
                 ORDER BY is_pinned DESC, updated_at DESC",
                NOTE_COLUMNS
            ),
            [format!("%{}%", query)],
        )
    }

    fn query_notes<P: rusqlite::Params>(&self, sql: &str, params: P) -> AppResult<Vec<Note>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let notes = stmt
            .query_map(params, parse_note_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Flag the note as deleted and stamp `deleted_at`. Idempotent: a note
    /// already in the trash is left as-is, keeping its original deletion
    /// time.
    pub fn soft_delete_note(&self, id: &str) -> AppResult<()> {
        let now = time_to_sql(self.now());
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE notes SET is_deleted = 1, deleted_at = ?1, updated_at = ?1
             WHERE id = ?2 AND is_deleted = 0",
            params![now, id],
        )?;
        if changed == 0 && !row_exists(&conn, "notes", id)? {
            return Err(AppError::NotFound(format!("note {} does not exist", id)));
        }
        Ok(())
    }

    pub fn restore_note(&self, id: &str) -> AppResult<Note> {
        let now = time_to_sql(self.now());
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE notes SET is_deleted = 0, deleted_at = NULL, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        drop(conn);
        if changed == 0 {
            return Err(AppError::NotFound(format!("note {} does not exist", id)));
        }
        self.get_note(id)?
            .ok_or_else(|| AppError::Internal(format!("note {} vanished after restore", id)))
    }

    /// Permanent removal, used by the retention sweep and "delete forever".
    pub fn hard_delete_note(&self, id: &str) -> AppResult<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute("DELETE FROM notes WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("note {} does not exist", id)));
        }
        Ok(())
    }

    // ─── Workspaces ─────────────────────────────────────────────────────────

    pub fn create_workspace(&self, payload: SaveWorkspacePayload) -> AppResult<Workspace> {
        let now = self.now();
        let id = Uuid::new_v4().to_string();
        let conn = self.lock_conn()?;
        let sort_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM workspaces",
            [],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO workspaces (id, name, color, icon, sort_order, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                payload.name,
                payload.color,
                payload.icon,
                sort_order,
                time_to_sql(now)
            ],
        )?;
        Ok(Workspace {
            id,
            name: payload.name,
            color: payload.color,
            icon: payload.icon,
            sort_order,
            created_at: now,
        })
    }

    pub fn update_workspace(&self, id: &str, payload: SaveWorkspacePayload) -> AppResult<Workspace> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE workspaces SET name = ?1, color = ?2, icon = ?3 WHERE id = ?4",
            params![payload.name, payload.color, payload.icon, id],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!(
                "workspace {} does not exist",
                id
            )));
        }
        conn.query_row(
            "SELECT id, name, color, icon, sort_order, created_at FROM workspaces WHERE id = ?1",
            [id],
            parse_workspace_row,
        )
        .map_err(AppError::from)
    }

    /// Removes the workspace row only. Notes keep their (now dangling)
    /// workspace reference; remaining workspaces keep their positions, so
    /// `sort_order` can develop gaps.
    pub fn delete_workspace(&self, id: &str) -> AppResult<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute("DELETE FROM workspaces WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(AppError::NotFound(format!(
                "workspace {} does not exist",
                id
            )));
        }
        Ok(())
    }

    pub fn list_workspaces(&self) -> AppResult<Vec<Workspace>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, color, icon, sort_order, created_at FROM workspaces
             ORDER BY sort_order ASC, created_at ASC",
        )?;
        let workspaces = stmt
            .query_map([], parse_workspace_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(workspaces)
    }

    /// Rewrites every listed workspace's position to its index in `ids`.
    /// Ids not present in the store are skipped.
    pub fn reorder_workspaces(&self, ids: &[String]) -> AppResult<Vec<Workspace>> {
        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;
        for (position, id) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE workspaces SET sort_order = ?1 WHERE id = ?2",
                params![position as i64, id],
            )?;
        }
        tx.commit()?;
        drop(conn);
        self.list_workspaces()
    }

    // ─── Subcategories ──────────────────────────────────────────────────────

    pub fn create_subcategory(&self, workspace_id: &str, name: &str) -> AppResult<Subcategory> {
        let now = self.now();
        let id = Uuid::new_v4().to_string();
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO subcategories (id, name, workspace_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, name, workspace_id, time_to_sql(now)],
        )?;
        Ok(Subcategory {
            id,
            name: name.to_string(),
            workspace_id: workspace_id.to_string(),
            created_at: now,
        })
    }

    pub fn list_subcategories(&self, workspace_id: &str) -> AppResult<Vec<Subcategory>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, workspace_id, created_at FROM subcategories
             WHERE workspace_id = ?1 ORDER BY created_at ASC",
        )?;
        let subcategories = stmt
            .query_map([workspace_id], |row| {
                Ok(Subcategory {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    workspace_id: row.get(2)?,
                    created_at: parse_time(&row.get::<_, String>(3)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subcategories)
    }

    pub fn delete_subcategory(&self, id: &str) -> AppResult<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute("DELETE FROM subcategories WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(AppError::NotFound(format!(
                "subcategory {} does not exist",
                id
            )));
        }
        Ok(())
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    /// Read-or-default: a missing or unreadable row synthesizes the default
    /// settings rather than erroring.
    pub fn get_settings(&self) -> AppResult<UserSettings> {
        let conn = self.lock_conn()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                [SETTINGS_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<UserSettings>(&raw).unwrap_or_default()),
            None => Ok(UserSettings::default()),
        }
    }

    /// Deep-merges `update` over the stored value and writes the result
    /// back, so partial updates never clobber unrelated preferences.
    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<UserSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: UserSettings = serde_json::from_value(merged)?;

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![
                SETTINGS_KEY,
                serde_json::to_string(&settings)?,
                time_to_sql(self.now())
            ],
        )?;

        Ok(settings)
    }

    // ─── Tasks ──────────────────────────────────────────────────────────────

    pub fn save_task(&self, payload: SaveTaskPayload) -> AppResult<Task> {
        let now = time_to_sql(self.now());
        let id = payload
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let subtasks_json = serde_json::to_string(&payload.subtasks)?;

        let conn = self.lock_conn()?;
        let exists = conn
            .query_row(
                "SELECT COUNT(1) FROM tasks WHERE id = ?1",
                [id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .unwrap_or(0)
            > 0;

        if exists {
            conn.execute(
                "UPDATE tasks SET title = ?1, description = ?2, status = ?3, priority = ?4,
                 due_date = ?5, reminder_at = ?6, project_id = ?7, subtasks_json = ?8,
                 updated_at = ?9 WHERE id = ?10",
                params![
                    payload.title,
                    payload.description,
                    payload.status.as_str(),
                    payload.priority.as_str(),
                    payload.due_date.map(time_to_sql),
                    payload.reminder_at.map(time_to_sql),
                    payload.project_id,
                    subtasks_json,
                    now,
                    id,
                ],
            )?;
        } else {
            let sort_order: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM tasks",
                [],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO tasks (id, title, description, status, priority, due_date,
                 reminder_at, project_id, subtasks_json, sort_order, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    id,
                    payload.title,
                    payload.description,
                    payload.status.as_str(),
                    payload.priority.as_str(),
                    payload.due_date.map(time_to_sql),
                    payload.reminder_at.map(time_to_sql),
                    payload.project_id,
                    subtasks_json,
                    sort_order,
                    now,
                ],
            )?;
        }
        drop(conn);

        self.get_task(&id)?
            .ok_or_else(|| AppError::Internal(format!("task {} vanished after save", id)))
    }

    pub fn get_task(&self, id: &str) -> AppResult<Option<Task>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
            [id],
            parse_task_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn delete_task(&self, id: &str) -> AppResult<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("task {} does not exist", id)));
        }
        Ok(())
    }

    pub fn list_tasks(&self) -> AppResult<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM tasks ORDER BY sort_order ASC, created_at ASC",
                TASK_COLUMNS
            ),
            [],
        )
    }

    pub fn list_tasks_by_status(&self, status: TaskStatus) -> AppResult<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM tasks WHERE status = ?1 ORDER BY sort_order ASC, created_at ASC",
                TASK_COLUMNS
            ),
            [status.as_str()],
        )
    }

    pub fn list_tasks_by_project(&self, project_id: &str) -> AppResult<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM tasks WHERE project_id = ?1 ORDER BY sort_order ASC, created_at ASC",
                TASK_COLUMNS
            ),
            [project_id],
        )
    }

    pub fn reorder_tasks(&self, ids: &[String]) -> AppResult<Vec<Task>> {
        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;
        for (position, id) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE tasks SET sort_order = ?1 WHERE id = ?2",
                params![position as i64, id],
            )?;
        }
        tx.commit()?;
        drop(conn);
        self.list_tasks()
    }

    fn query_tasks<P: rusqlite::Params>(&self, sql: &str, params: P) -> AppResult<Vec<Task>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let tasks = stmt
            .query_map(params, parse_task_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    // ─── Projects ───────────────────────────────────────────────────────────

    pub fn save_project(&self, payload: SaveProjectPayload) -> AppResult<Project> {
        let now = self.now();
        let id = payload
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let conn = self.lock_conn()?;
        let exists = conn
            .query_row(
                "SELECT COUNT(1) FROM projects WHERE id = ?1",
                [id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .unwrap_or(0)
            > 0;

        if exists {
            conn.execute(
                "UPDATE projects SET name = ?1, color = ?2, icon = ?3 WHERE id = ?4",
                params![payload.name, payload.color, payload.icon, id],
            )?;
        } else {
            conn.execute(
                "INSERT INTO projects (id, name, color, icon, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, payload.name, payload.color, payload.icon, time_to_sql(now)],
            )?;
        }

        conn.query_row(
            "SELECT id, name, color, icon, created_at FROM projects WHERE id = ?1",
            [id.as_str()],
            parse_project_row,
        )
        .map_err(AppError::from)
    }

    pub fn list_projects(&self) -> AppResult<Vec<Project>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, color, icon, created_at FROM projects ORDER BY created_at ASC",
        )?;
        let projects = stmt
            .query_map([], parse_project_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    pub fn delete_project(&self, id: &str) -> AppResult<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("project {} does not exist", id)));
        }
        Ok(())
    }

    // ─── Cached documents (substrate for the document cache) ────────────────

    /// Inserting into an occupied slot replaces the payload and refreshes
    /// `cached_at`; the slot id is derived from the file identity upstream.
    pub fn insert_cached_document(
        &self,
        id: &str,
        file_name: &str,
        payload: &[u8],
    ) -> AppResult<CachedDocument> {
        let now = self.now();
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO cached_documents (id, file_name, size, payload, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, cached_at = excluded.cached_at",
            params![id, file_name, payload.len() as i64, payload, time_to_sql(now)],
        )?;
        Ok(CachedDocument {
            id: id.to_string(),
            file_name: file_name.to_string(),
            size: payload.len() as u64,
            cached_at: now,
        })
    }

    pub fn get_cached_document(&self, id: &str) -> AppResult<Option<Vec<u8>>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT payload FROM cached_documents WHERE id = ?1",
            [id],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn cached_document_exists(&self, id: &str) -> AppResult<bool> {
        let conn = self.lock_conn()?;
        row_exists(&conn, "cached_documents", id)
    }

    pub fn delete_cached_document(&self, id: &str) -> AppResult<bool> {
        let conn = self.lock_conn()?;
        let changed = conn.execute("DELETE FROM cached_documents WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    pub fn list_cached_documents(&self) -> AppResult<Vec<CachedDocument>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, file_name, size, cached_at FROM cached_documents
             ORDER BY cached_at DESC, rowid DESC",
        )?;
        let documents = stmt
            .query_map([], parse_cached_document_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(documents)
    }

    pub fn cached_documents_total_size(&self) -> AppResult<u64> {
        let conn = self.lock_conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM cached_documents",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    /// Oldest admitted entry; rowid breaks ties between same-instant
    /// insertions so eviction order stays insertion order.
    pub fn oldest_cached_document(&self) -> AppResult<Option<CachedDocument>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT id, file_name, size, cached_at FROM cached_documents
             ORDER BY cached_at ASC, rowid ASC LIMIT 1",
            [],
            parse_cached_document_row,
        )
        .optional()
        .map_err(AppError::from)
    }
}

fn parse_note_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    let tags_raw: String = row.get(10)?;
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        workspace_id: row.get(3)?,
        subcategory: row.get(4)?,
        color: row.get(5)?,
        is_pinned: row.get::<_, i64>(6)? != 0,
        is_starred: row.get::<_, i64>(7)? != 0,
        is_deleted: row.get::<_, i64>(8)? != 0,
        deleted_at: row
            .get::<_, Option<String>>(9)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
        tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
        created_at: parse_time(&row.get::<_, String>(11)?)?,
        updated_at: parse_time(&row.get::<_, String>(12)?)?,
    })
}

fn parse_workspace_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        icon: row.get(3)?,
        sort_order: row.get(4)?,
        created_at: parse_time(&row.get::<_, String>(5)?)?,
    })
}

fn parse_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let subtasks_raw: String = row.get(8)?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: parse_status(&row.get::<_, String>(3)?)?,
        priority: parse_priority(&row.get::<_, String>(4)?)?,
        due_date: row
            .get::<_, Option<String>>(5)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
        reminder_at: row
            .get::<_, Option<String>>(6)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
        project_id: row.get(7)?,
        subtasks: serde_json::from_str(&subtasks_raw).unwrap_or_default(),
        sort_order: row.get(9)?,
        created_at: parse_time(&row.get::<_, String>(10)?)?,
        updated_at: parse_time(&row.get::<_, String>(11)?)?,
    })
}

fn parse_project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        icon: row.get(3)?,
        created_at: parse_time(&row.get::<_, String>(4)?)?,
    })
}

fn parse_cached_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedDocument> {
    Ok(CachedDocument {
        id: row.get(0)?,
        file_name: row.get(1)?,
        size: row.get::<_, i64>(2)? as u64,
        cached_at: parse_time(&row.get::<_, String>(3)?)?,
    })
}

fn parse_status(raw: &str) -> rusqlite::Result<TaskStatus> {
    match raw {
        "todo" => Ok(TaskStatus::Todo),
        "in-progress" => Ok(TaskStatus::InProgress),
        "done" => Ok(TaskStatus::Done),
        other => Err(conversion_error(format!("Unknown task status '{}'", other))),
    }
}

fn parse_priority(raw: &str) -> rusqlite::Result<TaskPriority> {
    match raw {
        "low" => Ok(TaskPriority::Low),
        "medium" => Ok(TaskPriority::Medium),
        "high" => Ok(TaskPriority::High),
        other => Err(conversion_error(format!(
            "Unknown task priority '{}'",
            other
        ))),
    }
}

fn row_exists(conn: &Connection, table: &str, id: &str) -> AppResult<bool> {
    let sql = format!("SELECT COUNT(1) FROM {} WHERE id = ?1", table);
    let count: i64 = conn.query_row(&sql, [id], |row| row.get(0))?;
    Ok(count > 0)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Fixed-width RFC 3339 (millisecond precision, `Z` suffix) so that string
/// comparison in SQL matches chronological order.
fn time_to_sql(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(error.to_string()))
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
