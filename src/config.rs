use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable constants for the persistence core.
///
/// Shells may load this from disk or pass overrides; defaults carry the
/// reference behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreConfig {
    /// Soft-deleted notes older than this are purged by the sweeper.
    pub retention_days: i64,
    /// Quiet time after the last edit before an autosave fires.
    pub autosave_debounce_ms: u64,
    /// How long the transient "Saved" signal stays up before reverting to
    /// Clean.
    pub saved_flash_ms: u64,
    /// Hard ceiling on the summed size of cached documents.
    pub document_cache_capacity_bytes: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            autosave_debounce_ms: 2_000,
            saved_flash_ms: 2_000,
            document_cache_capacity_bytes: 100 * 1024 * 1024,
        }
    }
}

impl CoreConfig {
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn saved_flash(&self) -> Duration {
        Duration::from_millis(self.saved_flash_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::CoreConfig;

    #[test]
    fn defaults_match_reference_behavior() {
        let config = CoreConfig::default();
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.autosave_debounce_ms, 2_000);
        assert_eq!(config.document_cache_capacity_bytes, 104_857_600);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{ "retentionDays": 7 }"#).expect("parse config");
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.autosave_debounce_ms, 2_000);
    }
}
