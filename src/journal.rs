//! Storage handle for the ledger. The engine never touches files directly:
//! every mutation goes through a `Journal`, so tests can inject doubles.

use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::engine::EngineError;
use crate::model::Event;
use crate::wal::Wal;

#[async_trait]
pub trait Journal: Send + Sync {
    /// Durably record one event. On error nothing may be applied.
    async fn append(&self, event: &Event) -> Result<(), EngineError>;

    /// Replace the journal contents with `events`.
    async fn compact(&self, events: Vec<Event>) -> Result<(), EngineError>;

    async fn appends_since_compact(&self) -> u64;
}

// ── WAL-backed journal with group commit ─────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Journal whose WAL is owned by a background writer task. Appends that queue
/// up while a flush is in progress are written and fsynced together.
pub struct WalJournal {
    tx: mpsc::Sender<WalCommand>,
}

impl WalJournal {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<io::Result<T>>,
    ) -> Result<T, EngineError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::Storage("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }
}

#[async_trait]
impl Journal for WalJournal {
    async fn append(&self, event: &Event) -> Result<(), EngineError> {
        let (response, rx) = oneshot::channel();
        let cmd = WalCommand::Append {
            event: event.clone(),
            response,
        };
        self.request(cmd, rx).await
    }

    async fn compact(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (response, rx) = oneshot::channel();
        self.request(WalCommand::Compact { events, response }, rx).await
    }

    async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        if self
            .tx
            .send(WalCommand::AppendsSinceCompact { response })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Block for the first append, drain whatever else is already queued, then
/// write the batch with a single fsync and answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_other(&mut wal, other);
                continue;
            }
        };
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            error!("journal flush of {} records failed: {e}", batch.len());
        }
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_other(&mut wal, cmd);
        }
    }
}

/// All or nothing: a batch that fails to stage or sync leaves the log as it
/// was before the batch.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    if let Err(e) = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
    {
        wal.discard_pending();
        return Err(e);
    }
    wal.flush_sync()
}

fn handle_other(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

// ── In-memory journal ────────────────────────────────────

/// Keeps records in memory. `fail_appends` turns it into a failing store.
#[derive(Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<Event>>,
    appends: AtomicU64,
    failing: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Make every following append fail with `EngineError::Storage`.
    pub fn fail_appends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, event: &Event) -> Result<(), EngineError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Storage("journal unavailable".into()));
        }
        self.events
            .lock()
            .map_err(|_| EngineError::Storage("journal lock poisoned".into()))?
            .push(event.clone());
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn compact(&self, events: Vec<Event>) -> Result<(), EngineError> {
        *self
            .events
            .lock()
            .map_err(|_| EngineError::Storage("journal lock poisoned".into()))? = events;
        self.appends.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        self.appends.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKey;
    use std::sync::Arc;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("timetabled_test_journal");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn teacher(id: i64) -> Event {
        Event::ResourceRegistered {
            key: ResourceKey::teacher(id),
            name: None,
            capacity: None,
        }
    }

    #[tokio::test]
    async fn concurrent_appends_all_land() {
        let path = tmp_path("group_commit.wal");
        let (wal, _) = Wal::open(&path).unwrap();
        let journal = Arc::new(WalJournal::spawn(wal));

        let mut handles = Vec::new();
        for id in 0..50 {
            let journal = journal.clone();
            handles.push(tokio::spawn(async move { journal.append(&teacher(id)).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(journal.appends_since_compact().await, 50);
        assert_eq!(Wal::replay(&path).unwrap().events.len(), 50);
    }

    #[tokio::test]
    async fn compact_resets_counter() {
        let path = tmp_path("journal_compact.wal");
        let (wal, _) = Wal::open(&path).unwrap();
        let journal = WalJournal::spawn(wal);
        for id in 0..5 {
            journal.append(&teacher(id)).await.unwrap();
        }
        journal.compact(vec![teacher(4)]).await.unwrap();
        assert_eq!(journal.appends_since_compact().await, 0);
        assert_eq!(Wal::replay(&path).unwrap().events, vec![teacher(4)]);
    }

    #[tokio::test]
    async fn failed_flush_is_not_replayed() {
        let path = tmp_path("journal_failed_flush.wal");
        let (mut wal, _) = Wal::open(&path).unwrap();
        wal.fail_next_sync();
        let journal = WalJournal::spawn(wal);

        assert!(matches!(
            journal.append(&teacher(1)).await,
            Err(EngineError::Storage(_))
        ));
        journal.append(&teacher(2)).await.unwrap();

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![teacher(2)]);
        assert_eq!(replay.discarded, 0);
        assert_eq!(journal.appends_since_compact().await, 1);
    }

    #[tokio::test]
    async fn memory_journal_can_fail() {
        let journal = MemoryJournal::new();
        journal.append(&teacher(1)).await.unwrap();
        journal.fail_appends(true);
        assert!(matches!(
            journal.append(&teacher(2)).await,
            Err(EngineError::Storage(_))
        ));
        assert_eq!(journal.events(), vec![teacher(1)]);
    }
}
