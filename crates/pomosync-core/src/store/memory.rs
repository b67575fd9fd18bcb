use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use super::hub::NotifyHub;
use super::{RemoteStore, Subscription};
use crate::error::StoreError;
use crate::timer::{Durations, RecordPatch, TimerRecord};

/// In-process record store. Clones share the same records and channels, so
/// each clone can stand in for one tab talking to the same backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    records: Mutex<HashMap<String, TimerRecord>>,
    hub: NotifyHub,
    offline: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Current stored copy of a record.
    pub fn record(&self, id: &str) -> Option<TimerRecord> {
        self.records().get(id).cloned()
    }

    /// Stored record for `user`, if one was created.
    pub fn record_for_user(&self, user: &str) -> Option<TimerRecord> {
        self.records().values().find(|r| r.user == user).cloned()
    }

    /// Number of successful updates.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Deliver `record` to subscribers as if the backend re-sent an old
    /// update (reconnect replay). Nothing is stored.
    pub fn replay(&self, record: &TimerRecord) {
        self.inner.hub.publish_raw(record);
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, TimerRecord>> {
        self.inner.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

impl RemoteStore for MemoryStore {
    async fn fetch_or_create(&self, user: &str, defaults: Durations) -> Result<TimerRecord, StoreError> {
        self.check_online()?;
        let mut records = self.records();
        if let Some(existing) = records.values().find(|r| r.user == user) {
            return Ok(existing.clone());
        }
        let record = TimerRecord::seeded(Uuid::new_v4().to_string(), user.to_string(), defaults, Utc::now());
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, patch: RecordPatch) -> Result<TimerRecord, StoreError> {
        self.check_online()?;
        let updated = {
            let mut records = self.records();
            let record = records
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if let Some(expected) = patch.if_revision {
                if record.revision != expected {
                    return Err(StoreError::RevisionConflict {
                        id: id.to_string(),
                        expected,
                        actual: record.revision,
                    });
                }
            }
            record.apply(&patch);
            record.revision += 1;
            record.updated = Utc::now();
            record.clone()
        };
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.hub.publish(&updated);
        Ok(updated)
    }

    fn subscribe(&self, id: &str) -> Result<Subscription, StoreError> {
        self.check_online()?;
        let record = self
            .record(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(self.inner.hub.subscribe(&record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::Mode;

    #[tokio::test]
    async fn fetch_or_create_is_idempotent_per_user() {
        let store = MemoryStore::new();
        let a = store.fetch_or_create("alice", Durations::default()).await.unwrap();
        let again = store.fetch_or_create("alice", Durations::default()).await.unwrap();
        let b = store.fetch_or_create("bob", Durations::default()).await.unwrap();
        assert_eq!(a.id, again.id);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn update_bumps_revision_and_notifies_writer_too() {
        let store = MemoryStore::new();
        let rec = store.fetch_or_create("alice", Durations::default()).await.unwrap();
        let mut sub = store.subscribe(&rec.id).unwrap();

        let updated = store
            .update(&rec.id, RecordPatch::default().with_mode(Mode::LongBreak))
            .await
            .unwrap();
        assert_eq!(updated.revision, rec.revision + 1);

        let seen = sub.recv().await.unwrap();
        assert_eq!(seen.mode, Mode::LongBreak);
        assert_eq!(seen.revision, updated.revision);
    }

    #[tokio::test]
    async fn stale_compare_and_set_is_rejected() {
        let store = MemoryStore::new();
        let rec = store.fetch_or_create("alice", Durations::default()).await.unwrap();
        store.update(&rec.id, RecordPatch::stopped(10)).await.unwrap();

        let err = store
            .update(&rec.id, RecordPatch::stopped(20).if_revision(rec.revision))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RevisionConflict { expected: 1, actual: 2, .. }));
        assert_eq!(store.record(&rec.id).unwrap().initial_time_remaining, 10);
    }

    #[tokio::test]
    async fn offline_store_fails_without_mutating() {
        let store = MemoryStore::new();
        let rec = store.fetch_or_create("alice", Durations::default()).await.unwrap();
        store.set_offline(true);
        assert!(matches!(
            store.update(&rec.id, RecordPatch::stopped(1)).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false);
        assert_eq!(store.record(&rec.id).unwrap(), rec);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn unknown_record_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.update("nope", RecordPatch::stopped(1)).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.subscribe("nope").is_err());
    }
}
