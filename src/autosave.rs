use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{Note, SaveNotePayload};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Editor-facing state signal. `Saved` is a transient pulse that reverts
/// to `Clean` after the configured flash interval; it is not a durable
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorSignal {
    Clean,
    Dirty,
    Saving,
    Saved,
}

/// One field mutation on an open note.
#[derive(Debug, Clone)]
pub enum NoteEdit {
    Title(String),
    Content(String),
    Tags(Vec<String>),
    Workspace(String),
    Subcategory(String),
    Color(String),
}

struct EditorState {
    draft: SaveNotePayload,
    last_saved: Note,
    dirty: bool,
    revision: u64,
}

impl EditorState {
    fn apply(&mut self, edit: NoteEdit) {
        match edit {
            NoteEdit::Title(title) => self.draft.title = title,
            NoteEdit::Content(content) => self.draft.content = content,
            NoteEdit::Tags(tags) => self.draft.tags = tags,
            NoteEdit::Workspace(workspace_id) => self.draft.workspace_id = workspace_id,
            NoteEdit::Subcategory(subcategory) => self.draft.subcategory = subcategory,
            NoteEdit::Color(color) => self.draft.color = color,
        }
        self.dirty = true;
        self.revision += 1;
    }
}

/// Coalesces bursts of edits on one open note into the minimum number of
/// durable writes, and guarantees a flush on every exit path (manual save,
/// debounce expiry, visibility loss, close, shutdown).
///
/// Writes for the note are serialized by a single-flight lock: a trigger
/// that arrives while a save is in flight waits, re-checks dirtiness, and
/// either coalesces into a follow-up write or drops as redundant. A failed
/// write leaves the editor dirty so the next trigger retries; there is no
/// internal retry loop.
#[derive(Clone)]
pub struct SaveCoordinator {
    note_id: String,
    db: Arc<Database>,
    debounce: Duration,
    saved_flash: Duration,
    state: Arc<Mutex<EditorState>>,
    save_lock: Arc<Mutex<()>>,
    pending: Arc<StdMutex<Option<JoinHandle<()>>>>,
    signal_tx: Arc<watch::Sender<EditorSignal>>,
    completed_saves: Arc<AtomicU64>,
}

impl SaveCoordinator {
    pub fn open(db: Arc<Database>, note: Note, debounce: Duration, saved_flash: Duration) -> Self {
        let (signal_tx, _) = watch::channel(EditorSignal::Clean);
        Self {
            note_id: note.id.clone(),
            db,
            debounce,
            saved_flash,
            state: Arc::new(Mutex::new(EditorState {
                draft: SaveNotePayload::from_note(&note),
                last_saved: note,
                dirty: false,
                revision: 0,
            })),
            save_lock: Arc::new(Mutex::new(())),
            pending: Arc::new(StdMutex::new(None)),
            signal_tx: Arc::new(signal_tx),
            completed_saves: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    pub fn subscribe(&self) -> watch::Receiver<EditorSignal> {
        self.signal_tx.subscribe()
    }

    pub fn signal(&self) -> EditorSignal {
        *self.signal_tx.borrow()
    }

    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    /// Current working copy, edits included.
    pub async fn draft(&self) -> SaveNotePayload {
        self.state.lock().await.draft.clone()
    }

    /// Last state known to be on disk.
    pub async fn last_saved(&self) -> Note {
        self.state.lock().await.last_saved.clone()
    }

    pub fn saves_completed(&self) -> u64 {
        self.completed_saves.load(Ordering::SeqCst)
    }

    /// Records the mutation and restarts the quiet-time window; every edit
    /// pushes the autosave out by the full debounce interval.
    pub async fn apply(&self, edit: NoteEdit) {
        {
            let mut state = self.state.lock().await;
            state.apply(edit);
        }
        self.signal_tx.send_replace(EditorSignal::Dirty);
        self.schedule();
    }

    /// (Re)arms the debounce timer, replacing any pending one.
    pub fn schedule(&self) {
        let coordinator = self.clone();
        let mut pending = self.pending.lock().expect("pending timer lock");
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(coordinator.debounce).await;
            // Leave the timer slot before flushing so a later re-arm cannot
            // abort a flush that already started.
            drop(coordinator.pending.lock().expect("pending timer lock").take());
            if let Err(error) = coordinator.flush_now().await {
                tracing::warn!(note_id = %coordinator.note_id, %error, "debounced autosave failed");
            }
        }));
    }

    pub fn cancel_pending(&self) {
        if let Some(handle) = self.pending.lock().expect("pending timer lock").take() {
            handle.abort();
        }
    }

    /// Manual save: skips the rest of the debounce window.
    pub async fn save_now(&self) -> AppResult<()> {
        self.cancel_pending();
        self.flush_now().await
    }

    /// The host surface lost visibility or focus; persist immediately, the
    /// caller may never come back.
    pub async fn on_visibility_lost(&self) -> AppResult<()> {
        self.cancel_pending();
        self.flush_now().await
    }

    /// Writes the current draft if there is unsaved state. At most one
    /// flush runs per note at a time; racing triggers serialize here and
    /// the losers find the editor clean.
    pub async fn flush_now(&self) -> AppResult<()> {
        let _flight = self.save_lock.lock().await;

        let (payload, revision) = {
            let state = self.state.lock().await;
            if !state.dirty {
                return Ok(());
            }
            (state.draft.clone(), state.revision)
        };

        self.signal_tx.send_replace(EditorSignal::Saving);
        match self.db.save_note(payload) {
            Ok(saved) => {
                let mut state = self.state.lock().await;
                state.last_saved = saved;
                let caught_up = state.revision == revision;
                if caught_up {
                    state.dirty = false;
                }
                drop(state);
                self.completed_saves.fetch_add(1, Ordering::SeqCst);
                if caught_up {
                    self.signal_tx.send_replace(EditorSignal::Saved);
                    self.schedule_saved_clear();
                } else {
                    // Edits landed mid-write; stay dirty so the already
                    // re-armed timer gives them their own save.
                    self.signal_tx.send_replace(EditorSignal::Dirty);
                }
                Ok(())
            }
            Err(error) => {
                self.signal_tx.send_replace(EditorSignal::Dirty);
                tracing::warn!(
                    note_id = %self.note_id,
                    %error,
                    "note save failed, keeping editor dirty"
                );
                Err(error)
            }
        }
    }

    fn schedule_saved_clear(&self) {
        let signal_tx = self.signal_tx.clone();
        let flash = self.saved_flash;
        tokio::spawn(async move {
            tokio::time::sleep(flash).await;
            signal_tx.send_if_modified(|signal| {
                if *signal == EditorSignal::Saved {
                    *signal = EditorSignal::Clean;
                    true
                } else {
                    false
                }
            });
        });
    }
}

/// One coordinator per open note. Closing flushes and drops the
/// coordinator; `flush_all` is the process-shutdown path and keeps going
/// past individual failures.
#[derive(Clone)]
pub struct EditorRegistry {
    db: Arc<Database>,
    debounce: Duration,
    saved_flash: Duration,
    editors: Arc<Mutex<HashMap<String, SaveCoordinator>>>,
}

impl EditorRegistry {
    pub fn new(db: Arc<Database>, debounce: Duration, saved_flash: Duration) -> Self {
        Self {
            db,
            debounce,
            saved_flash,
            editors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Opens an editing session, or returns the one already open for this
    /// note.
    pub async fn open(&self, note_id: &str) -> AppResult<SaveCoordinator> {
        let mut editors = self.editors.lock().await;
        if let Some(existing) = editors.get(note_id) {
            return Ok(existing.clone());
        }
        let note = self
            .db
            .get_note(note_id)?
            .ok_or_else(|| AppError::NotFound(format!("note {} does not exist", note_id)))?;
        let coordinator =
            SaveCoordinator::open(self.db.clone(), note, self.debounce, self.saved_flash);
        editors.insert(note_id.to_string(), coordinator.clone());
        Ok(coordinator)
    }

    pub async fn get(&self, note_id: &str) -> Option<SaveCoordinator> {
        self.editors.lock().await.get(note_id).cloned()
    }

    /// Closing the editing surface forces a final flush.
    pub async fn close(&self, note_id: &str) -> AppResult<()> {
        let removed = self.editors.lock().await.remove(note_id);
        if let Some(coordinator) = removed {
            coordinator.cancel_pending();
            if let Err(error) = coordinator.flush_now().await {
                // Dropping the session here would discard the edits that
                // just failed to persist; keep it open for a retry.
                self.editors
                    .lock()
                    .await
                    .insert(note_id.to_string(), coordinator);
                return Err(error);
            }
        }
        Ok(())
    }

    /// Shutdown path: flush every open editor, reporting the first failure
    /// only after all of them were attempted.
    pub async fn flush_all(&self) -> AppResult<()> {
        let coordinators: Vec<SaveCoordinator> =
            self.editors.lock().await.values().cloned().collect();
        let mut first_error = None;
        for coordinator in coordinators {
            coordinator.cancel_pending();
            if let Err(error) = coordinator.flush_now().await {
                tracing::warn!(
                    note_id = %coordinator.note_id(),
                    %error,
                    "flush on shutdown failed"
                );
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EditorRegistry, EditorSignal, NoteEdit, SaveCoordinator};
    use crate::clock::{Clock, SystemClock};
    use crate::db::Database;
    use crate::models::SaveNotePayload;
    use std::sync::Arc;
    use tokio::time::{advance, Duration};

    const DEBOUNCE: Duration = Duration::from_millis(2_000);
    const FLASH: Duration = Duration::from_millis(2_000);

    fn setup() -> (Arc<Database>, EditorRegistry) {
        let db = Arc::new(
            Database::open_in_memory(Arc::new(SystemClock) as Arc<dyn Clock>).expect("db"),
        );
        db.save_note(SaveNotePayload {
            id: Some("n1".to_string()),
            title: "draft".to_string(),
            content: "initial".to_string(),
            ..SaveNotePayload::default()
        })
        .expect("seed note");
        let registry = EditorRegistry::new(db.clone(), DEBOUNCE, FLASH);
        (db, registry)
    }

    async fn wait_for_signal(coordinator: &SaveCoordinator, wanted: EditorSignal) {
        let mut rx = coordinator.subscribe();
        rx.wait_for(|signal| *signal == wanted)
            .await
            .expect("signal channel open");
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_edits_coalesces_into_one_write() {
        let (db, registry) = setup();
        let editor = registry.open("n1").await.expect("open");

        editor.apply(NoteEdit::Content("v1".to_string())).await;
        advance(Duration::from_millis(500)).await;
        editor.apply(NoteEdit::Content("v2".to_string())).await;
        advance(Duration::from_millis(500)).await;
        editor.apply(NoteEdit::Content("v3".to_string())).await;

        // t = 1.0 s after the first edit; the window restarted each time.
        advance(Duration::from_millis(1_999)).await;
        assert_eq!(editor.saves_completed(), 0);

        advance(Duration::from_millis(2)).await;
        wait_for_signal(&editor, EditorSignal::Saved).await;

        assert_eq!(editor.saves_completed(), 1);
        let saved = db.get_note("n1").expect("get").expect("exists");
        assert_eq!(saved.content, "v3");
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_measures_quiet_time_not_time_since_first_edit() {
        let (_db, registry) = setup();
        let editor = registry.open("n1").await.expect("open");

        editor.apply(NoteEdit::Content("a".to_string())).await;
        advance(Duration::from_millis(1_900)).await;
        editor.apply(NoteEdit::Content("b".to_string())).await;
        advance(Duration::from_millis(1_900)).await;
        // 3.8 s since the first edit, but never 2 s of quiet.
        assert_eq!(editor.saves_completed(), 0);

        advance(Duration::from_millis(200)).await;
        wait_for_signal(&editor, EditorSignal::Saved).await;
        assert_eq!(editor.saves_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_save_skips_the_debounce_wait() {
        let (db, registry) = setup();
        let editor = registry.open("n1").await.expect("open");

        editor.apply(NoteEdit::Title("renamed".to_string())).await;
        editor.save_now().await.expect("save now");

        assert_eq!(editor.saves_completed(), 1);
        assert!(!editor.is_dirty().await);
        let saved = db.get_note("n1").expect("get").expect("exists");
        assert_eq!(saved.title, "renamed");

        // The canceled timer must not produce a second write.
        advance(Duration::from_millis(5_000)).await;
        tokio::task::yield_now().await;
        assert_eq!(editor.saves_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn racing_flush_triggers_produce_exactly_one_write() {
        let (_db, registry) = setup();
        let editor = registry.open("n1").await.expect("open");

        editor.apply(NoteEdit::Content("raced".to_string())).await;
        let (manual, visibility) =
            tokio::join!(editor.save_now(), editor.on_visibility_lost());
        manual.expect("manual save");
        visibility.expect("visibility flush");

        assert_eq!(editor.saves_completed(), 1);
        assert!(!editor.is_dirty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_with_nothing_dirty_is_a_no_op() {
        let (_db, registry) = setup();
        let editor = registry.open("n1").await.expect("open");

        editor.save_now().await.expect("save with clean state");
        editor.on_visibility_lost().await.expect("visibility flush");
        assert_eq!(editor.saves_completed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_keeps_the_editor_dirty() {
        let (db, registry) = setup();
        let editor = registry.open("n1").await.expect("open");
        editor.apply(NoteEdit::Content("doomed".to_string())).await;
        editor.cancel_pending();

        db.conn()
            .lock()
            .expect("db lock")
            .execute_batch("DROP TABLE notes")
            .expect("sabotage storage");

        assert!(editor.save_now().await.is_err());
        assert!(editor.is_dirty().await);
        assert_eq!(editor.saves_completed(), 0);
        assert_eq!(editor.signal(), EditorSignal::Dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_after_a_save_get_their_own_write() {
        let (db, registry) = setup();
        let editor = registry.open("n1").await.expect("open");

        editor.apply(NoteEdit::Content("first".to_string())).await;
        editor.save_now().await.expect("first save");

        editor.apply(NoteEdit::Content("second".to_string())).await;
        advance(DEBOUNCE).await;
        wait_for_signal(&editor, EditorSignal::Saved).await;

        assert_eq!(editor.saves_completed(), 2);
        let saved = db.get_note("n1").expect("get").expect("exists");
        assert_eq!(saved.content, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn saved_flash_reverts_to_clean() {
        let (_db, registry) = setup();
        let editor = registry.open("n1").await.expect("open");

        editor.apply(NoteEdit::Content("flash".to_string())).await;
        editor.save_now().await.expect("save");
        assert_eq!(editor.signal(), EditorSignal::Saved);

        advance(FLASH).await;
        wait_for_signal(&editor, EditorSignal::Clean).await;
    }

    #[tokio::test(start_paused = true)]
    async fn saved_flash_never_clobbers_a_dirty_editor() {
        // Flash shorter than the debounce so the flash expires while the
        // next autosave is still pending.
        let (db, _) = setup();
        let registry = EditorRegistry::new(db, DEBOUNCE, Duration::from_millis(500));
        let editor = registry.open("n1").await.expect("open");

        editor.apply(NoteEdit::Content("one".to_string())).await;
        editor.save_now().await.expect("save");
        editor.apply(NoteEdit::Content("two".to_string())).await;

        advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert_eq!(editor.signal(), EditorSignal::Dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn close_flushes_without_waiting_for_the_timer() {
        let (db, registry) = setup();
        let editor = registry.open("n1").await.expect("open");

        editor.apply(NoteEdit::Content("closing".to_string())).await;
        registry.close("n1").await.expect("close");

        assert_eq!(editor.saves_completed(), 1);
        let saved = db.get_note("n1").expect("get").expect("exists");
        assert_eq!(saved.content, "closing");
        assert!(registry.get("n1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_all_covers_every_open_editor() {
        let (db, registry) = setup();
        db.save_note(SaveNotePayload {
            id: Some("n2".to_string()),
            title: "second".to_string(),
            content: "initial".to_string(),
            ..SaveNotePayload::default()
        })
        .expect("seed second note");

        let first = registry.open("n1").await.expect("open n1");
        let second = registry.open("n2").await.expect("open n2");
        first.apply(NoteEdit::Content("one".to_string())).await;
        second.apply(NoteEdit::Content("two".to_string())).await;

        registry.flush_all().await.expect("flush all");
        assert_eq!(db.get_note("n1").expect("get").expect("n1").content, "one");
        assert_eq!(db.get_note("n2").expect("get").expect("n2").content, "two");
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_a_note_returns_the_same_session() {
        let (_db, registry) = setup();
        let first = registry.open("n1").await.expect("open");
        first.apply(NoteEdit::Content("kept".to_string())).await;

        let second = registry.open("n1").await.expect("reopen");
        assert_eq!(second.draft().await.content, "kept");
    }

    #[tokio::test(start_paused = true)]
    async fn opening_a_missing_note_is_not_found() {
        let (_db, registry) = setup();
        assert!(registry.open("ghost").await.is_err());
    }
}
