use crate::db::Database;
use crate::errors::AppResult;
use crate::models::CachedDocument;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Capacity-capped store for binary documents kept for offline viewing.
///
/// Admission evicts the oldest-admitted entries (FIFO by `cached_at`, not
/// LRU: re-reading a document does not refresh its slot) until the new
/// entry fits. An entry larger than the entire capacity is still admitted
/// after the cache has been emptied, temporarily exceeding the cap; the
/// overage is logged rather than rejected.
pub struct DocumentCache {
    db: Arc<Database>,
    capacity: u64,
    admission: Mutex<()>,
}

impl DocumentCache {
    pub fn new(db: Arc<Database>, capacity: u64) -> Self {
        Self {
            db,
            capacity,
            admission: Mutex::new(()),
        }
    }

    /// Deterministic slot id: re-opening the same file resolves to the same
    /// cache entry.
    pub fn document_id(file_name: &str, size: u64) -> String {
        format!("{}-{}", file_name, size)
    }

    pub fn is_cached(&self, id: &str) -> AppResult<bool> {
        self.db.cached_document_exists(id)
    }

    pub fn get(&self, id: &str) -> AppResult<Option<Vec<u8>>> {
        self.db.get_cached_document(id)
    }

    pub fn remove(&self, id: &str) -> AppResult<bool> {
        self.db.delete_cached_document(id)
    }

    pub fn list(&self) -> AppResult<Vec<CachedDocument>> {
        self.db.list_cached_documents()
    }

    pub fn total_size(&self) -> AppResult<u64> {
        self.db.cached_documents_total_size()
    }

    /// Admission path. The whole measure/evict/insert sequence runs under
    /// one guard so no interleaved caller observes a partial eviction.
    pub async fn put(&self, file_name: &str, payload: &[u8]) -> AppResult<CachedDocument> {
        let _guard = self.admission.lock().await;

        let entry_size = payload.len() as u64;
        let id = Self::document_id(file_name, entry_size);

        let mut current_total = self.db.cached_documents_total_size()?;
        while current_total + entry_size > self.capacity {
            let Some(oldest) = self.db.oldest_cached_document()? else {
                break;
            };
            self.db.delete_cached_document(&oldest.id)?;
            current_total -= oldest.size;
            tracing::debug!(
                evicted = %oldest.id,
                freed = oldest.size,
                remaining = current_total,
                "evicted oldest cached document"
            );
        }

        if current_total + entry_size > self.capacity {
            tracing::warn!(
                document = %id,
                size = entry_size,
                capacity = self.capacity,
                "admitting document larger than the cache capacity"
            );
        }

        self.db.insert_cached_document(&id, file_name, payload)
    }
}

/// Human-readable byte count for the document viewer.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::{format_bytes, DocumentCache};
    use crate::clock::{Clock, ManualClock};
    use crate::db::Database;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    const MIB: u64 = 1024 * 1024;

    fn setup(capacity: u64) -> (Arc<ManualClock>, DocumentCache) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let db = Arc::new(Database::open_in_memory(clock.clone() as Arc<dyn Clock>).expect("db"));
        (clock.clone(), DocumentCache::new(db, capacity))
    }

    #[tokio::test]
    async fn oldest_entry_is_evicted_to_make_room() {
        let (clock, cache) = setup(100 * MIB);
        let blob = vec![0u8; (40 * MIB) as usize];

        cache.put("a.pdf", &blob).await.expect("put a");
        clock.advance(Duration::seconds(1));
        cache.put("b.pdf", &blob).await.expect("put b");
        clock.advance(Duration::seconds(1));
        cache.put("c.pdf", &blob).await.expect("put c");

        let a = DocumentCache::document_id("a.pdf", 40 * MIB);
        let b = DocumentCache::document_id("b.pdf", 40 * MIB);
        let c = DocumentCache::document_id("c.pdf", 40 * MIB);
        assert!(!cache.is_cached(&a).expect("a"));
        assert!(cache.is_cached(&b).expect("b"));
        assert!(cache.is_cached(&c).expect("c"));
        assert_eq!(cache.total_size().expect("total"), 80 * MIB);
    }

    #[tokio::test]
    async fn same_instant_insertions_evict_in_insertion_order() {
        let (_clock, cache) = setup(100 * MIB);
        let blob = vec![0u8; (40 * MIB) as usize];

        cache.put("a.pdf", &blob).await.expect("put a");
        cache.put("b.pdf", &blob).await.expect("put b");
        cache.put("c.pdf", &blob).await.expect("put c");

        assert!(!cache
            .is_cached(&DocumentCache::document_id("a.pdf", 40 * MIB))
            .expect("a"));
        assert!(cache
            .is_cached(&DocumentCache::document_id("b.pdf", 40 * MIB))
            .expect("b"));
    }

    #[tokio::test]
    async fn oversized_entry_is_admitted_after_emptying_the_cache() {
        let (_clock, cache) = setup(10 * MIB);
        cache
            .put("small.pdf", &vec![0u8; (4 * MIB) as usize])
            .await
            .expect("put small");

        let huge = vec![0u8; (12 * MIB) as usize];
        let admitted = cache.put("huge.pdf", &huge).await.expect("put huge");
        assert_eq!(admitted.size, 12 * MIB);
        assert!(!cache
            .is_cached(&DocumentCache::document_id("small.pdf", 4 * MIB))
            .expect("small"));
        assert_eq!(cache.total_size().expect("total"), 12 * MIB);
    }

    #[tokio::test]
    async fn reopening_the_same_file_reuses_its_slot() {
        let (_clock, cache) = setup(100 * MIB);
        let blob = vec![7u8; (4 * MIB) as usize];

        cache.put("same.pdf", &blob).await.expect("first put");
        cache.put("same.pdf", &blob).await.expect("second put");

        assert_eq!(cache.list().expect("list").len(), 1);
        assert_eq!(cache.total_size().expect("total"), 4 * MIB);

        let bytes = cache
            .get(&DocumentCache::document_id("same.pdf", 4 * MIB))
            .expect("get")
            .expect("cached");
        assert_eq!(bytes.len(), (4 * MIB) as usize);
    }

    #[tokio::test]
    async fn remove_frees_space() {
        let (_clock, cache) = setup(100 * MIB);
        cache
            .put("doc.pdf", &vec![0u8; (8 * MIB) as usize])
            .await
            .expect("put");

        let id = DocumentCache::document_id("doc.pdf", 8 * MIB);
        assert!(cache.remove(&id).expect("remove"));
        assert!(!cache.remove(&id).expect("second remove is a no-op"));
        assert_eq!(cache.total_size().expect("total"), 0);
    }

    #[test]
    fn format_bytes_picks_sensible_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(100 * MIB), "100.0 MiB");
        assert_eq!(format_bytes(5 * 1024 * MIB), "5.0 GiB");
    }
}
