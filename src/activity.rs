use crate::catalog::CatalogId;
use crate::config::ActivityConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Create,
    BulkCreate,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Create => "create",
            ActivityAction::BulkCreate => "bulk_create",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: ActivityAction,
    pub subject_id: CatalogId,
    pub source_address: String,
}

/// Bounded newest-first record of successful catalog writes.
///
/// Clones share the same list. Appends take the lock, so the capacity holds
/// under any number of concurrent writers.
#[derive(Clone)]
pub struct ActivityLog {
    entries: Arc<Mutex<VecDeque<ActivityLogEntry>>>,
    capacity: usize,
    enabled: bool,
}

impl ActivityLog {
    pub fn new(config: &ActivityConfig) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity: config.capacity.max(1),
            enabled: config.enabled,
        }
    }

    pub async fn append(&self, entry: ActivityLogEntry) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock().await;
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    pub async fn list(&self) -> Vec<ActivityLogEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// Empties the log and returns how many entries were dropped.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64) -> ActivityLogEntry {
        ActivityLogEntry {
            timestamp: Utc::now(),
            actor: "ops@shop.test".into(),
            action: ActivityAction::Create,
            subject_id: CatalogId(id),
            source_address: "127.0.0.1".into(),
        }
    }

    #[tokio::test]
    async fn newest_entry_is_at_the_head() {
        let log = ActivityLog::new(&ActivityConfig::default());
        log.append(entry(1)).await;
        log.append(entry(2)).await;
        let ids: Vec<u64> = log.list().await.iter().map(|e| e.subject_id.0).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn capacity_drops_the_oldest_entry() {
        let log = ActivityLog::new(&ActivityConfig::default());
        for id in 1..=1001 {
            log.append(entry(id)).await;
        }
        let entries = log.list().await;
        assert_eq!(entries.len(), 1000);
        assert_eq!(entries.first().map(|e| e.subject_id), Some(CatalogId(1001)));
        assert!(entries.iter().all(|e| e.subject_id != CatalogId(1)));
    }

    #[tokio::test]
    async fn concurrent_appends_respect_capacity() {
        let log = ActivityLog::new(&ActivityConfig {
            enabled: true,
            capacity: 50,
        });
        let mut handles = Vec::new();
        for worker in 0..8u64 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..20u64 {
                    log.append(entry(worker * 100 + n)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(log.len().await, 50);
    }

    #[tokio::test]
    async fn disabled_log_records_nothing() {
        let log = ActivityLog::new(&ActivityConfig {
            enabled: false,
            capacity: 10,
        });
        log.append(entry(1)).await;
        assert_eq!(log.len().await, 0);
    }

    #[tokio::test]
    async fn clear_empties_the_log() {
        let log = ActivityLog::new(&ActivityConfig::default());
        log.append(entry(1)).await;
        log.append(entry(2)).await;
        assert_eq!(log.clear().await, 2);
        assert!(log.list().await.is_empty());
    }

    #[test]
    fn actions_serialize_in_snake_case() {
        let value = serde_json::to_value(ActivityAction::BulkCreate).unwrap();
        assert_eq!(value, serde_json::json!("bulk_create"));
    }
}
