mod autosave;
mod clock;
mod config;
mod core;
mod db;
mod doc_cache;
mod errors;
mod models;
mod retention;

pub use crate::autosave::{EditorRegistry, EditorSignal, NoteEdit, SaveCoordinator};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::CoreConfig;
pub use crate::core::NotesCore;
pub use crate::db::Database;
pub use crate::doc_cache::{format_bytes, DocumentCache};
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{
    CachedDocument, Note, Project, SaveNotePayload, SaveProjectPayload, SaveTaskPayload,
    SaveWorkspacePayload, Subcategory, Subtask, SweepReport, Task, TaskPriority, TaskStatus,
    UserSettings, Workspace,
};
pub use crate::retention::RetentionSweeper;

use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Wires daily-rolling json logs under `<data_dir>/logs`. Call once from
/// the shell before opening the core; `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing(data_dir: &Path) -> AppResult<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| AppError::Io(error.to_string()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "localnote.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
