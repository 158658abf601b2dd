use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::{upsert, BookingRepository, RepositoryError};

// ── Group-commit WAL channel ─────────────────────────────

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            commit_batch(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    commit_batch(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("WAL writer stopped: {}", wal.path().display());
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Durable repository: every save is one `BookingSaved` record in an append-only log.
///
/// The log is replayed into an owner index on open; later records for the same id
/// replace earlier ones.
pub struct WalRepository {
    index: DashMap<OwnerId, Vec<Booking>>,
    wal_tx: mpsc::Sender<WalCommand>,
    path: PathBuf,
    /// Saves hold it shared, compaction exclusively, so a compaction snapshot
    /// never misses a record that already reached the old file.
    commit_lock: RwLock<()>,
}

impl WalRepository {
    /// Replay `path` and start the writer task. Must be called inside a tokio runtime.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let replay = Wal::replay_report(&path)?;
        if replay.torn_tail {
            tracing::warn!("discarded torn tail of {}", path.display());
        }
        let index: DashMap<OwnerId, Vec<Booking>> = DashMap::new();
        for Event::BookingSaved(booking) in &replay.events {
            upsert(&mut index.entry(booking.owner_id.clone()).or_default(), booking);
        }
        tracing::info!("replayed {} records from {}", replay.events.len(), path.display());

        let wal = Wal::open(&path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            index,
            wal_tx,
            path,
            commit_lock: RwLock::new(()),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn send(&self, cmd: WalCommand) -> Result<(), RepositoryError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| RepositoryError::WriterClosed("WAL writer shut down"))
    }
}

#[async_trait]
impl BookingRepository for WalRepository {
    async fn load_bookings(&self, owner_id: &str) -> Result<Vec<Booking>, RepositoryError> {
        Ok(self
            .index
            .get(owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn save_booking(&self, booking: &Booking) -> Result<(), RepositoryError> {
        let _shared = self.commit_lock.read().await;
        let (tx, rx) = oneshot::channel();
        self.send(WalCommand::Append {
            event: Event::BookingSaved(booking.clone()),
            response: tx,
        })
        .await?;
        rx.await
            .map_err(|_| RepositoryError::WriterClosed("WAL writer dropped response"))??;
        upsert(&mut self.index.entry(booking.owner_id.clone()).or_default(), booking);
        Ok(())
    }

    async fn find_owner(&self, booking_id: &Ulid) -> Result<Option<OwnerId>, RepositoryError> {
        Ok(self
            .index
            .iter()
            .find(|e| e.value().iter().any(|b| b.id == *booking_id))
            .map(|e| e.key().clone()))
    }

    async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the log with one record per live booking.
    async fn compact(&self) -> Result<(), RepositoryError> {
        let _exclusive = self.commit_lock.write().await;
        let mut owners: Vec<OwnerId> = self.index.iter().map(|e| e.key().clone()).collect();
        owners.sort();
        let mut events = Vec::new();
        for owner in owners {
            if let Some(bookings) = self.index.get(&owner) {
                events.extend(bookings.iter().cloned().map(Event::BookingSaved));
            }
        }

        let (tx, rx) = oneshot::channel();
        self.send(WalCommand::Compact { events, response: tx }).await?;
        rx.await
            .map_err(|_| RepositoryError::WriterClosed("WAL writer dropped response"))??;
        Ok(())
    }
}
