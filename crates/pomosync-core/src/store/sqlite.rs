//! SQLite-backed record store.
//!
//! One row per user in `timer_states`. Writes are read-modify-write inside a
//! transaction, guarded by the row's revision. Separate processes sharing the
//! file see each other's writes through a per-record revision poller that
//! feeds the same notification hub as local writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::hub::NotifyHub;
use super::{RemoteStore, Subscription};
use crate::error::{CoreError, StoreError};
use crate::storage::data_dir;
use crate::timer::{Durations, Mode, RecordPatch, TimerRecord};

const DB_FILE: &str = "pomosync.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const COLUMNS: &str = "id, user, mode, is_running, start_time, initial_time_remaining,
    sessions_completed, work_duration, short_break_duration, long_break_duration,
    revision, updated_by, created, updated";

/// Durable store for timer records.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    hub: NotifyHub,
    poll_interval: Option<Duration>,
    pollers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl SqliteStore {
    /// Open the store at `<data dir>/pomosync.db`.
    pub fn open_default() -> Result<Self, CoreError> {
        let path = data_dir()?.join(DB_FILE);
        Ok(Self::open(&path)?)
    }

    /// Open (and migrate) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        migrate(&conn)?;
        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                path,
                hub: NotifyHub::default(),
                poll_interval: None,
                pollers: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Poll subscribed records every `interval` for writes made by other
    /// processes. Must be set before the store is cloned or subscribed.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.poll_interval = Some(interval).filter(|d| !d.is_zero());
        } else {
            warn!("poll interval ignored: store already shared");
        }
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Record for `user` without creating one.
    pub fn find_by_user(&self, user: &str) -> Result<Option<TimerRecord>, StoreError> {
        let conn = self.inner.lock();
        let sql = format!("SELECT {COLUMNS} FROM timer_states WHERE user = ?1");
        conn.query_row(&sql, params![user], RawRow::read)
            .optional()?
            .map(RawRow::into_record)
            .transpose()
    }

    pub fn load(&self, id: &str) -> Result<Option<TimerRecord>, StoreError> {
        self.inner.load(id)
    }

    fn spawn_poller(&self, id: &str) {
        let Some(interval) = self.inner.poll_interval else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime; cross-process polling disabled");
            return;
        };
        let mut pollers = self.inner.pollers.lock().unwrap_or_else(|e| e.into_inner());
        if pollers.get(id).is_some_and(|h| !h.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let id_owned = id.to_string();
        pollers.insert(id.to_string(), handle.spawn(poll_record(weak, id_owned, interval)));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let pollers = self.pollers.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, poller) in pollers.drain() {
            poller.abort();
        }
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load(&self, id: &str) -> Result<Option<TimerRecord>, StoreError> {
        let conn = self.lock();
        let sql = format!("SELECT {COLUMNS} FROM timer_states WHERE id = ?1");
        conn.query_row(&sql, params![id], RawRow::read)
            .optional()?
            .map(RawRow::into_record)
            .transpose()
    }
}

async fn poll_record(inner: Weak<Inner>, id: String, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.hub.has_subscribers(&id) {
            debug!(record = %id, "no subscribers left; poller exiting");
            break;
        }
        match inner.load(&id) {
            Ok(Some(record)) => {
                if inner.hub.last_revision(&id).is_some_and(|seen| record.revision > seen) {
                    debug!(record = %id, revision = record.revision, "external write detected");
                }
                inner.hub.publish(&record);
            }
            Ok(None) => warn!(record = %id, "polled record disappeared"),
            Err(e) => warn!(record = %id, error = %e, "poll failed"),
        }
    }
}

impl RemoteStore for SqliteStore {
    async fn fetch_or_create(&self, user: &str, defaults: Durations) -> Result<TimerRecord, StoreError> {
        if let Some(existing) = self.find_by_user(user)? {
            return Ok(existing);
        }
        let record = TimerRecord::seeded(Uuid::new_v4().to_string(), user.to_string(), defaults, Utc::now());
        {
            let conn = self.inner.lock();
            // Another process may have created it between the lookup and now.
            conn.execute(
                "INSERT OR IGNORE INTO timer_states
                 (id, user, mode, is_running, start_time, initial_time_remaining, sessions_completed,
                  work_duration, short_break_duration, long_break_duration, revision, updated_by,
                  created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.id,
                    record.user,
                    record.mode.as_str(),
                    record.is_running,
                    record.start_time.map(|t| t.to_rfc3339()),
                    record.initial_time_remaining as i64,
                    record.sessions_completed as i64,
                    record.durations.work() as i64,
                    record.durations.short_break() as i64,
                    record.durations.long_break() as i64,
                    record.revision as i64,
                    record.updated_by,
                    record.created.to_rfc3339(),
                    record.updated.to_rfc3339(),
                ],
            )?;
        }
        self.find_by_user(user)?
            .ok_or_else(|| StoreError::NotFound(format!("timer state for {user}")))
    }

    async fn update(&self, id: &str, patch: RecordPatch) -> Result<TimerRecord, StoreError> {
        let updated = {
            let mut conn = self.inner.lock();
            // Take the write lock up front so a competing process waits on
            // the busy timeout instead of failing the read-to-write upgrade.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let sql = format!("SELECT {COLUMNS} FROM timer_states WHERE id = ?1");
            let mut record = tx
                .query_row(&sql, params![id], RawRow::read)
                .optional()?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?
                .into_record()?;
            if let Some(expected) = patch.if_revision {
                if record.revision != expected {
                    return Err(StoreError::RevisionConflict {
                        id: id.to_string(),
                        expected,
                        actual: record.revision,
                    });
                }
            }
            let previous = record.revision;
            record.apply(&patch);
            record.revision = previous + 1;
            record.updated = Utc::now();
            let changed = tx.execute(
                "UPDATE timer_states SET
                    mode = ?1, is_running = ?2, start_time = ?3, initial_time_remaining = ?4,
                    sessions_completed = ?5, work_duration = ?6, short_break_duration = ?7,
                    long_break_duration = ?8, revision = ?9, updated_by = ?10, updated = ?11
                 WHERE id = ?12 AND revision = ?13",
                params![
                    record.mode.as_str(),
                    record.is_running,
                    record.start_time.map(|t| t.to_rfc3339()),
                    record.initial_time_remaining as i64,
                    record.sessions_completed as i64,
                    record.durations.work() as i64,
                    record.durations.short_break() as i64,
                    record.durations.long_break() as i64,
                    record.revision as i64,
                    record.updated_by,
                    record.updated.to_rfc3339(),
                    id,
                    previous as i64,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::RevisionConflict {
                    id: id.to_string(),
                    expected: previous,
                    actual: previous + 1,
                });
            }
            tx.commit()?;
            record
        };
        self.inner.hub.publish(&updated);
        Ok(updated)
    }

    fn subscribe(&self, id: &str) -> Result<Subscription, StoreError> {
        let record = self
            .inner
            .load(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let subscription = self.inner.hub.subscribe(&record);
        self.spawn_poller(id);
        Ok(subscription)
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS timer_states (
            id                      TEXT PRIMARY KEY,
            user                    TEXT NOT NULL UNIQUE,
            mode                    TEXT NOT NULL,
            is_running              INTEGER NOT NULL,
            start_time              TEXT,
            initial_time_remaining  INTEGER NOT NULL,
            sessions_completed      INTEGER NOT NULL DEFAULT 0,
            work_duration           INTEGER NOT NULL,
            short_break_duration    INTEGER NOT NULL,
            long_break_duration     INTEGER NOT NULL,
            revision                INTEGER NOT NULL DEFAULT 1,
            updated_by              TEXT NOT NULL DEFAULT '',
            created                 TEXT NOT NULL,
            updated                 TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_timer_states_user ON timer_states(user);",
    )
}

/// Undecoded row; decoding failures become [`StoreError::Corrupt`] instead of
/// SQLite errors.
struct RawRow {
    id: String,
    user: String,
    mode: String,
    is_running: bool,
    start_time: Option<String>,
    initial_time_remaining: i64,
    sessions_completed: i64,
    durations: (i64, i64, i64),
    revision: i64,
    updated_by: String,
    created: String,
    updated: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user: row.get(1)?,
            mode: row.get(2)?,
            is_running: row.get(3)?,
            start_time: row.get(4)?,
            initial_time_remaining: row.get(5)?,
            sessions_completed: row.get(6)?,
            durations: (row.get(7)?, row.get(8)?, row.get(9)?),
            revision: row.get(10)?,
            updated_by: row.get(11)?,
            created: row.get(12)?,
            updated: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<TimerRecord, StoreError> {
        let corrupt = |message: String| StoreError::Corrupt {
            id: self.id.clone(),
            message,
        };
        let mode: Mode = self.mode.parse().map_err(|e| corrupt(format!("{e}")))?;
        let (work, short_break, long_break) = self.durations;
        let durations =
            Durations::new(work, short_break, long_break).map_err(|e| corrupt(e.to_string()))?;
        let start_time = self
            .start_time
            .as_deref()
            .map(parse_time)
            .transpose()
            .map_err(|e| corrupt(format!("start_time: {e}")))?;
        let created = parse_time(&self.created).map_err(|e| corrupt(format!("created: {e}")))?;
        let updated = parse_time(&self.updated).map_err(|e| corrupt(format!("updated: {e}")))?;
        // Rows written by hand may violate the anchor invariant; trust start_time.
        let is_running = self.is_running && start_time.is_some();
        Ok(TimerRecord {
            id: self.id.clone(),
            user: self.user.clone(),
            mode,
            is_running,
            start_time: start_time.filter(|_| is_running),
            initial_time_remaining: self.initial_time_remaining.max(0) as u64,
            sessions_completed: self.sessions_completed.max(0) as u64,
            durations,
            revision: self.revision.max(0) as u64,
            updated_by: self.updated_by.clone(),
            created,
            updated,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_once_and_round_trips_fields() {
        let store = SqliteStore::open_memory().unwrap();
        let durations = Durations::new(60, 30, 90).unwrap();
        let rec = store.fetch_or_create("alice", durations).await.unwrap();
        assert_eq!(rec.initial_time_remaining, 60);
        assert_eq!(rec.durations, durations);

        let start = Utc::now() - ChronoDuration::seconds(5);
        let updated = store
            .update(
                &rec.id,
                RecordPatch::started(start, 60).with_sessions(3).by("tab-a"),
            )
            .await
            .unwrap();
        assert_eq!(updated.revision, 2);
        assert_eq!(updated.updated_by, "tab-a");

        let loaded = store.fetch_or_create("alice", Durations::default()).await.unwrap();
        assert_eq!(loaded.id, rec.id);
        assert!(loaded.is_running);
        assert_eq!(loaded.sessions_completed, 3);
        assert_eq!(loaded.start_time.map(|t| t.timestamp()), Some(start.timestamp()));
        // Existing record keeps its own durations.
        assert_eq!(loaded.durations, durations);
    }

    #[tokio::test]
    async fn compare_and_set_conflict() {
        let store = SqliteStore::open_memory().unwrap();
        let rec = store.fetch_or_create("alice", Durations::default()).await.unwrap();
        store.update(&rec.id, RecordPatch::stopped(100)).await.unwrap();
        let err = store
            .update(&rec.id, RecordPatch::stopped(5).if_revision(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RevisionConflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn local_write_is_published() {
        let store = SqliteStore::open_memory().unwrap();
        let rec = store.fetch_or_create("alice", Durations::default()).await.unwrap();
        let mut sub = store.subscribe(&rec.id).unwrap();
        store
            .update(&rec.id, RecordPatch::default().with_mode(Mode::ShortBreak))
            .await
            .unwrap();
        let seen = sub.recv().await.unwrap();
        assert_eq!(seen.mode, Mode::ShortBreak);
    }

    #[tokio::test]
    async fn poller_relays_writes_from_another_connection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.db");
        let watcher = SqliteStore::open(&path)
            .unwrap()
            .with_poll_interval(Duration::from_millis(20));
        let writer = SqliteStore::open(&path).unwrap();

        let rec = watcher.fetch_or_create("alice", Durations::default()).await.unwrap();
        let mut sub = watcher.subscribe(&rec.id).unwrap();

        writer
            .update(&rec.id, RecordPatch::default().with_mode(Mode::LongBreak))
            .await
            .unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("poller should relay the external write")
            .unwrap();
        assert_eq!(seen.mode, Mode::LongBreak);
        assert_eq!(seen.revision, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writers_on_one_file_wait_for_each_other() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.db");
        let first = SqliteStore::open(&path).unwrap();
        let second = SqliteStore::open(&path).unwrap();
        let rec = first.fetch_or_create("alice", Durations::default()).await.unwrap();

        let writers: Vec<_> = [first, second]
            .into_iter()
            .map(|store| {
                let id = rec.id.clone();
                tokio::spawn(async move {
                    for i in 0..25 {
                        store.update(&id, RecordPatch::stopped(i)).await?;
                    }
                    Ok::<_, StoreError>(store)
                })
            })
            .collect();
        let mut stores = Vec::new();
        for writer in writers {
            stores.push(writer.await.unwrap().expect("no write should fail with a busy error"));
        }
        assert_eq!(stores[0].load(&rec.id).unwrap().unwrap().revision, rec.revision + 50);
    }

    #[test]
    fn corrupt_mode_is_reported() {
        let store = SqliteStore::open_memory().unwrap();
        {
            let conn = store.inner.lock();
            conn.execute(
                "INSERT INTO timer_states (id, user, mode, is_running, initial_time_remaining,
                    work_duration, short_break_duration, long_break_duration, created, updated)
                 VALUES ('x', 'mallory', 'nap', 0, 10, 10, 10, 10, ?1, ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();
        }
        assert!(matches!(store.load("x"), Err(StoreError::Corrupt { .. })));
    }
}
