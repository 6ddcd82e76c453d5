use std::collections::BTreeSet;

use tracing::debug;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Distinct diner ids in ascending order. Party size is the length of the result.
pub fn distinct_party(diner_ids: &[DinerId]) -> Result<Vec<DinerId>, EngineError> {
    let party: BTreeSet<DinerId> = diner_ids.iter().copied().collect();
    if party.is_empty() {
        return Err(EngineError::InvalidRequest("at least one diner id is required".into()));
    }
    if party.len() > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("too many diners in party"));
    }
    Ok(party.into_iter().collect())
}

impl Engine {
    /// True if any diner already has a reservation whose time lies in `window`.
    pub async fn has_conflict(
        &self,
        diner_ids: &[DinerId],
        window: &Window,
    ) -> Result<bool, EngineError> {
        let found = self
            .store
            .fetch_conflicting_reservation(diner_ids, window)
            .await?;
        if let Some(row) = found {
            debug!(
                "party overlaps reservation {} on table {} between {} and {}",
                row.reservation_id,
                row.table_id,
                window.start_text(),
                window.end_text()
            );
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
        }
        Ok(found.is_some())
    }
}
