use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::model::*;
use crate::wal::Wal;

use super::{
    ConflictRow, Directory, ReservationBook, ReservationStore, RestaurantRow, RestrictionRow,
    StoreError, TableRow,
};

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
/// 3. Drain all immediately available Appends.
/// 4. Single flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
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
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let result = wal.mark().and_then(|mark| {
        let written = batch
            .iter()
            .try_for_each(|(event, _)| wal.append_buffered(event))
            .and_then(|()| wal.flush_sync());
        if let Err(e) = &written {
            // Every sender hears an error, so none of the batch may survive replay.
            warn!("WAL batch of {} failed ({e}), rolling back", batch.len());
            if let Err(rollback_err) = wal.rollback(mark) {
                error!("WAL rollback failed: {rollback_err}");
            }
        }
        written
    });
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

struct RestaurantEntry {
    name: String,
    /// Lowercased endorsement tags.
    tags: BTreeSet<String>,
}

/// In-memory store over a read-only [`Directory`] with WAL-backed reservations.
///
/// Every reservation mutation takes the book's write lock, so a checked insert
/// sees a stable book between its check and its write.
pub struct MemoryStore {
    diners: DashMap<DinerId, Diner>,
    restaurants: DashMap<RestaurantId, RestaurantEntry>,
    tables: DashMap<TableId, Table>,
    book: RwLock<ReservationBook>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl MemoryStore {
    /// Replay `wal_path` and serve `directory`. Must be called inside a Tokio runtime.
    pub fn open(wal_path: &Path, directory: Directory) -> Result<Self, StoreError> {
        directory.validate()?;
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut book = ReservationBook::new();
        for event in &events {
            book.apply(event);
        }
        info!(
            "store opened: {} diners, {} restaurants, {} tables, {} reservations ({} events replayed)",
            directory.diners.len(),
            directory.restaurants.len(),
            directory.tables.len(),
            book.len(),
            events.len()
        );

        let restaurants = DashMap::new();
        for r in directory.restaurants {
            let tags = r
                .endorsement_tags()
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect();
            restaurants.insert(r.id, RestaurantEntry { name: r.name, tags });
        }

        Ok(Self {
            diners: directory.diners.into_iter().map(|d| (d.id, d)).collect(),
            restaurants,
            tables: directory.tables.into_iter().map(|t| (t.id, t)).collect(),
            book: RwLock::new(book),
            wal_tx,
        })
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Log then apply a creation while the caller holds the book's write lock.
    async fn persist_new(
        &self,
        book: &mut ReservationBook,
        new: NewReservation,
    ) -> Result<ReservationId, StoreError> {
        let reservation = Reservation {
            id: book.next_id(),
            table_id: new.table_id,
            restaurant_id: new.restaurant_id,
            time: new.time,
            diner_ids: encode_diner_ids(&new.diner_ids),
        };
        let event = Event::created(&reservation);
        self.wal_append(&event).await?;
        book.apply(&event);
        Ok(reservation.id)
    }

    pub async fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.book.read().await.get(id).cloned()
    }

    pub async fn reservation_count(&self) -> usize {
        self.book.read().await.len()
    }

    pub async fn appends_since_compact(&self) -> Result<u64, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))
    }

    /// Rewrite the WAL to the live reservation set. Holds the write lock so no
    /// mutation lands between the snapshot and the swap.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let book = self.book.write().await;
        let events = book.snapshot_events();
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        drop(book);
        Ok(count)
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn fetch_dietary_restrictions(
        &self,
        diner_ids: &[DinerId],
    ) -> Result<Vec<RestrictionRow>, StoreError> {
        let unique: BTreeSet<_> = diner_ids.iter().copied().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| self.diners.get(&id))
            .map(|d| RestrictionRow {
                restrictions: d.dietary_restrictions.clone(),
            })
            .collect())
    }

    async fn fetch_endorsed_restaurants(
        &self,
        labels: &BTreeSet<String>,
    ) -> Result<Vec<RestaurantRow>, StoreError> {
        let wanted: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
        let mut rows: Vec<RestaurantRow> = self
            .restaurants
            .iter()
            .filter(|e| wanted.iter().all(|l| e.value().tags.contains(l)))
            .map(|e| RestaurantRow {
                id: *e.key(),
                name: e.value().name.clone(),
            })
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    async fn fetch_available_tables(
        &self,
        capacity: u32,
        restaurant_ids: &[RestaurantId],
        window: &Window,
    ) -> Result<Vec<TableRow>, StoreError> {
        if restaurant_ids.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<_> = restaurant_ids.iter().copied().collect();
        let book = self.book.read().await;
        let busy: HashSet<TableId> = book.within(window).map(|r| r.table_id).collect();
        drop(book);

        let mut rows: Vec<TableRow> = self
            .tables
            .iter()
            .filter(|t| {
                t.capacity >= capacity && wanted.contains(&t.restaurant_id) && !busy.contains(&t.id)
            })
            .map(|t| TableRow {
                restaurant_id: t.restaurant_id,
                table_id: t.id,
            })
            .collect();
        rows.sort_by_key(|r| r.table_id);
        Ok(rows)
    }

    async fn fetch_conflicting_reservation(
        &self,
        diner_ids: &[DinerId],
        window: &Window,
    ) -> Result<Option<ConflictRow>, StoreError> {
        let book = self.book.read().await;
        Ok(book.party_conflict(diner_ids, window).map(|r| ConflictRow {
            reservation_id: r.id,
            table_id: r.table_id,
        }))
    }

    async fn insert_reservation(&self, new: NewReservation) -> Result<ReservationId, StoreError> {
        let mut book = self.book.write().await;
        self.persist_new(&mut book, new).await
    }

    async fn insert_reservation_checked(
        &self,
        new: NewReservation,
        window: &Window,
    ) -> Result<ReservationId, StoreError> {
        let mut book = self.book.write().await;
        if let Some(existing) = book.party_conflict(&new.diner_ids, window) {
            debug!("checked insert: party overlaps reservation {}", existing.id);
            return Err(StoreError::Conflict(existing.id));
        }
        if let Some(existing) = book.table_conflict(new.table_id, window) {
            debug!("checked insert: table {} held by reservation {}", new.table_id, existing.id);
            return Err(StoreError::Conflict(existing.id));
        }
        self.persist_new(&mut book, new).await
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<u64, StoreError> {
        let mut book = self.book.write().await;
        if book.get(id).is_none() {
            return Ok(0);
        }
        let event = Event::ReservationCancelled { id };
        self.wal_append(&event).await?;
        book.apply(&event);
        Ok(1)
    }
}
