//! Availability matching and reservation conflict engine.
//!
//! Lookup runs conflict check → restriction aggregation → endorsement matching
//! → table resolution, strictly in that order. Each step is one awaited store
//! call; nothing fans out.

mod availability;
mod conflict;
mod endorsement;
mod error;
mod mutations;
mod restrictions;
#[cfg(test)]
mod tests;

pub use availability::first_table_per_restaurant;
pub use conflict::distinct_party;
pub use error::EngineError;
pub use restrictions::merge_restrictions;

use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::model::*;
use crate::store::ReservationStore;

pub struct Engine {
    store: Arc<dyn ReservationStore>,
}

impl Engine {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    /// Find one free table per endorsed restaurant for the whole party, or
    /// report that some diner already holds a reservation within ±2h.
    pub async fn find_availability(
        &self,
        diner_ids: &[DinerId],
        reservation_time: NaiveDateTime,
    ) -> Result<Availability, EngineError> {
        let party = distinct_party(diner_ids)?;
        let window = Window::around(reservation_time)?;

        if self.has_conflict(&party, &window).await? {
            return Ok(Availability::Conflict);
        }

        let restrictions = self.aggregate_restrictions(&party).await?;
        let endorsed = self.match_endorsements(&restrictions).await?;
        let party_size = u32::try_from(party.len())
            .map_err(|_| EngineError::LimitExceeded("party too large"))?;
        let tables = self.resolve_tables(party_size, &endorsed, &window).await?;

        debug!(
            "availability for {} diner(s) at {}: {} restaurant(s) endorsed, {} with a free table",
            party.len(),
            format_store_time(&reservation_time),
            endorsed.len(),
            tables.len()
        );
        Ok(Availability::Open(tables))
    }
}
