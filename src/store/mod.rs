//! Data-access collaborator for the matching engine.
//!
//! The engine only talks to a [`ReservationStore`]; the shipped implementation
//! is [`MemoryStore`], which serves the externally managed [`Directory`] from
//! memory and keeps reservations durable in a WAL.

mod book;
mod memory;

pub use book::ReservationBook;
pub use memory::MemoryStore;

use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::limits::*;
use crate::model::*;

/// One diner's raw restriction field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictionRow {
    pub restrictions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestaurantRow {
    pub id: RestaurantId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRow {
    pub restaurant_id: RestaurantId,
    pub table_id: TableId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRow {
    pub reservation_id: ReservationId,
    pub table_id: TableId,
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Restriction fields of the known diners among `diner_ids`, one row per diner.
    async fn fetch_dietary_restrictions(
        &self,
        diner_ids: &[DinerId],
    ) -> Result<Vec<RestrictionRow>, StoreError>;

    /// Restaurants endorsing every label, ordered by id. An empty set returns all.
    async fn fetch_endorsed_restaurants(
        &self,
        labels: &BTreeSet<String>,
    ) -> Result<Vec<RestaurantRow>, StoreError>;

    /// Tables of `restaurant_ids` seating at least `capacity` with no reservation
    /// inside `window`, ordered by table id.
    async fn fetch_available_tables(
        &self,
        capacity: u32,
        restaurant_ids: &[RestaurantId],
        window: &Window,
    ) -> Result<Vec<TableRow>, StoreError>;

    /// Earliest reservation inside `window` whose party contains any of `diner_ids`.
    async fn fetch_conflicting_reservation(
        &self,
        diner_ids: &[DinerId],
        window: &Window,
    ) -> Result<Option<ConflictRow>, StoreError>;

    /// Unconditional insert. Performs no conflict or capacity check.
    async fn insert_reservation(&self, new: NewReservation) -> Result<ReservationId, StoreError>;

    /// Insert only if neither the party nor the table has a reservation inside
    /// `window`; the check and the write happen under one exclusive lock.
    async fn insert_reservation_checked(
        &self,
        new: NewReservation,
        window: &Window,
    ) -> Result<ReservationId, StoreError>;

    /// Number of rows removed (0 or 1).
    async fn delete_reservation(&self, id: ReservationId) -> Result<u64, StoreError>;
}

// ── Directory ────────────────────────────────────────────────────

/// Externally managed diners, restaurants and tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Directory {
    #[serde(default)]
    pub diners: Vec<Diner>,
    #[serde(default)]
    pub restaurants: Vec<Restaurant>,
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl Directory {
    pub fn from_json_file(path: &Path) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path)?;
        let directory: Directory = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Directory(format!("{}: {e}", path.display())))?;
        directory.validate()?;
        Ok(directory)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for d in &self.diners {
            if !seen.insert(d.id) {
                return Err(StoreError::Directory(format!("duplicate diner id {}", d.id)));
            }
            if let Some(r) = &d.dietary_restrictions {
                check_labels(r)?;
            }
        }
        seen.clear();
        for r in &self.restaurants {
            if !seen.insert(r.id) {
                return Err(StoreError::Directory(format!("duplicate restaurant id {}", r.id)));
            }
            if r.name.len() > MAX_NAME_LEN {
                return Err(StoreError::Directory(format!("restaurant {} name too long", r.id)));
            }
            if let Some(e) = &r.endorsements {
                check_labels(e)?;
            }
        }
        let restaurants: HashSet<_> = self.restaurants.iter().map(|r| r.id).collect();
        seen.clear();
        for t in &self.tables {
            if !seen.insert(t.id) {
                return Err(StoreError::Directory(format!("duplicate table id {}", t.id)));
            }
            if t.capacity == 0 {
                return Err(StoreError::Directory(format!("table {} has zero capacity", t.id)));
            }
            if !restaurants.contains(&t.restaurant_id) {
                return Err(StoreError::Directory(format!(
                    "table {} belongs to unknown restaurant {}",
                    t.id, t.restaurant_id
                )));
            }
        }
        Ok(())
    }
}

fn check_labels(field: &str) -> Result<(), StoreError> {
    match split_labels(field).find(|l| l.len() > MAX_LABEL_LEN) {
        Some(l) => Err(StoreError::Directory(format!("label too long: {l:.32}…"))),
        None => Ok(()),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("bad directory: {0}")]
    Directory(String),
    #[error("conflict with reservation: {0}")]
    Conflict(ReservationId),
}
