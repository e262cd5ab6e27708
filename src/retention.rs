use crate::clock::Clock;
use crate::db::Database;
use crate::errors::AppResult;
use crate::models::SweepReport;
use chrono::Duration;
use std::sync::Arc;

/// Purges notes that have sat in the trash longer than the retention
/// window. Runs opportunistically: once at startup and again when the
/// trash view opens. There is deliberately no background timer, so a note
/// can outlive the window until the next trigger fires.
pub struct RetentionSweeper {
    db: Arc<Database>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl RetentionSweeper {
    pub fn new(db: Arc<Database>, retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            retention,
            clock,
        }
    }

    /// Evaluates every soft-deleted note independently; a note deleted
    /// exactly at the boundary is retained (strictly-older wins). A purge
    /// failure is logged and counted, never aborts the rest of the sweep.
    pub fn sweep(&self) -> AppResult<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for note in self.db.list_deleted_notes()? {
            report.scanned += 1;
            let Some(deleted_at) = note.deleted_at else {
                tracing::warn!(note_id = %note.id, "deleted note has no deletion timestamp, skipping");
                report.failed += 1;
                continue;
            };
            if now - deleted_at <= self.retention {
                continue;
            }
            match self.db.hard_delete_note(&note.id) {
                Ok(()) => report.purged += 1,
                Err(error) => {
                    tracing::warn!(note_id = %note.id, %error, "failed to purge expired note");
                    report.failed += 1;
                }
            }
        }

        if report.purged > 0 || report.failed > 0 {
            tracing::info!(
                scanned = report.scanned,
                purged = report.purged,
                failed = report.failed,
                "retention sweep finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::RetentionSweeper;
    use crate::clock::{Clock, ManualClock};
    use crate::db::Database;
    use crate::models::SaveNotePayload;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn setup() -> (Arc<ManualClock>, Arc<Database>, RetentionSweeper) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let db = Arc::new(Database::open_in_memory(clock.clone() as Arc<dyn Clock>).expect("db"));
        let sweeper = RetentionSweeper::new(db.clone(), Duration::days(30), clock.clone());
        (clock, db, sweeper)
    }

    fn trash_note(db: &Database, id: &str) {
        db.save_note(SaveNotePayload {
            id: Some(id.to_string()),
            title: id.to_string(),
            content: String::new(),
            ..SaveNotePayload::default()
        })
        .expect("save");
        db.soft_delete_note(id).expect("soft delete");
    }

    #[test]
    fn note_at_exactly_thirty_days_is_retained() {
        let (clock, db, sweeper) = setup();
        trash_note(&db, "boundary");

        clock.advance(Duration::days(30));
        let report = sweeper.sweep().expect("sweep");
        assert_eq!(report.scanned, 1);
        assert_eq!(report.purged, 0);
        assert!(db.get_note("boundary").expect("get").is_some());
    }

    #[test]
    fn note_one_second_past_the_window_is_purged() {
        let (clock, db, sweeper) = setup();
        trash_note(&db, "expired");

        clock.advance(Duration::days(30) + Duration::seconds(1));
        let report = sweeper.sweep().expect("sweep");
        assert_eq!(report.purged, 1);
        assert!(db.get_note("expired").expect("get").is_none());
    }

    #[test]
    fn fresh_trash_survives_while_old_trash_goes() {
        let (clock, db, sweeper) = setup();
        trash_note(&db, "old");
        clock.advance(Duration::days(31));
        trash_note(&db, "fresh");

        let report = sweeper.sweep().expect("sweep");
        assert_eq!(report.scanned, 2);
        assert_eq!(report.purged, 1);
        assert!(db.get_note("old").expect("get").is_none());
        assert!(db.get_note("fresh").expect("get").is_some());

        // Nothing left to do on an immediate re-run.
        let again = sweeper.sweep().expect("sweep again");
        assert_eq!(again.purged, 0);
    }

    #[test]
    fn active_notes_are_never_scanned() {
        let (clock, db, sweeper) = setup();
        db.save_note(SaveNotePayload {
            id: Some("alive".to_string()),
            title: "alive".to_string(),
            content: String::new(),
            ..SaveNotePayload::default()
        })
        .expect("save");

        clock.advance(Duration::days(90));
        let report = sweeper.sweep().expect("sweep");
        assert_eq!(report.scanned, 0);
        assert!(db.get_note("alive").expect("get").is_some());
    }
}
