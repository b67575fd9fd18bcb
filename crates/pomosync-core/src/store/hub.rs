//! Per-record broadcast channels shared by the store backends.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use super::Subscription;
use crate::timer::TimerRecord;

const CHANNEL_CAPACITY: usize = 64;

struct Channel {
    tx: broadcast::Sender<TimerRecord>,
    /// Highest revision published so far; older ones are not re-sent.
    last_revision: u64,
}

#[derive(Default)]
pub(crate) struct NotifyHub {
    channels: Mutex<HashMap<String, Channel>>,
}

impl NotifyHub {
    pub(crate) fn subscribe(&self, record: &TimerRecord) -> Subscription {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let channel = channels.entry(record.id.clone()).or_insert_with(|| Channel {
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
            last_revision: record.revision,
        });
        Subscription::new(record.id.clone(), channel.tx.subscribe())
    }

    /// Publish `record` unless a same-or-newer revision already went out.
    pub(crate) fn publish(&self, record: &TimerRecord) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(channel) = channels.get_mut(&record.id) else {
            return;
        };
        if record.revision <= channel.last_revision {
            return;
        }
        channel.last_revision = record.revision;
        Self::send(&mut channels, record);
    }

    /// Publish regardless of revision (redelivery of an old update).
    pub(crate) fn publish_raw(&self, record: &TimerRecord) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        Self::send(&mut channels, record);
    }

    pub(crate) fn has_subscribers(&self, id: &str) -> bool {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(id).is_some_and(|c| c.tx.receiver_count() > 0)
    }

    pub(crate) fn last_revision(&self, id: &str) -> Option<u64> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(id).map(|c| c.last_revision)
    }

    fn send(channels: &mut HashMap<String, Channel>, record: &TimerRecord) {
        let Some(channel) = channels.get(&record.id) else {
            return;
        };
        match channel.tx.send(record.clone()) {
            Ok(n) => debug!(record = %record.id, revision = record.revision, receivers = n, "published"),
            Err(_) => {
                channels.remove(&record.id);
            }
        }
    }
}
