//! Remote state mirror.
//!
//! A [`RemoteStore`] holds one [`TimerRecord`] per user and relays every
//! write, including the writer's own, to all subscribers of that record.
//! Engines treat it as the only channel between instances.
//!
//! Backends:
//! - [`MemoryStore`]: in-process, shared by cloning. Used by tests and by
//!   `watch` when `sync.backend = "memory"`.
//! - [`SqliteStore`]: durable file; a revision poller lets separate
//!   processes sharing the file converge.

mod hub;
mod memory;
mod sqlite;

use std::future::Future;

use tokio::sync::broadcast;
use tracing::warn;

use crate::error::StoreError;
use crate::timer::{Durations, RecordPatch, TimerRecord};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Persistence boundary of the engine.
pub trait RemoteStore: Send + Sync + 'static {
    /// Return the user's record, creating it (idle, `work`, seeded with
    /// `defaults`) if none exists.
    fn fetch_or_create(
        &self,
        user: &str,
        defaults: Durations,
    ) -> impl Future<Output = Result<TimerRecord, StoreError>> + Send;

    /// Apply `patch` and return the stored result. Fails with
    /// [`StoreError::RevisionConflict`] when `patch.if_revision` is stale.
    fn update(
        &self,
        id: &str,
        patch: RecordPatch,
    ) -> impl Future<Output = Result<TimerRecord, StoreError>> + Send;

    /// Change notifications for record `id`. Dropping the subscription
    /// unsubscribes.
    fn subscribe(&self, id: &str) -> Result<Subscription, StoreError>;
}

/// Stream of updates to one record.
#[derive(Debug)]
pub struct Subscription {
    record_id: String,
    rx: broadcast::Receiver<TimerRecord>,
}

impl Subscription {
    pub(crate) fn new(record_id: String, rx: broadcast::Receiver<TimerRecord>) -> Self {
        Self { record_id, rx }
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// Next update, or `None` once the store has gone away.
    ///
    /// A slow subscriber that falls behind skips to the oldest retained
    /// update; the newest one is always delivered eventually.
    pub async fn recv(&mut self) -> Option<TimerRecord> {
        loop {
            match self.rx.recv().await {
                Ok(record) => return Some(record),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(record = %self.record_id, skipped, "subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<TimerRecord> {
        loop {
            match self.rx.try_recv() {
                Ok(record) => return Some(record),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
