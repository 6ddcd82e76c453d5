use std::collections::BTreeMap;

use tracing::debug;

use crate::model::*;
use crate::store::TableRow;

use super::{Engine, EngineError};

/// Keep the first row seen for each endorsed restaurant. Rows arrive in
/// ascending table-id order, so the lowest qualifying table id wins.
/// Rows for restaurants missing from `endorsed` are dropped.
pub fn first_table_per_restaurant(
    rows: &[TableRow],
    endorsed: &BTreeMap<RestaurantId, String>,
) -> Vec<AvailableTable> {
    let mut picked: BTreeMap<RestaurantId, AvailableTable> = BTreeMap::new();
    for row in rows {
        let Some(name) = endorsed.get(&row.restaurant_id) else {
            continue;
        };
        picked.entry(row.restaurant_id).or_insert_with(|| AvailableTable {
            restaurant_id: row.restaurant_id,
            restaurant_name: name.clone(),
            table_id: row.table_id,
        });
    }
    picked.into_values().collect()
}

impl Engine {
    /// One free table per endorsed restaurant with `capacity >= party_size`
    /// and no reservation in `window`. Restaurants without one are omitted.
    pub async fn resolve_tables(
        &self,
        party_size: u32,
        endorsed: &BTreeMap<RestaurantId, String>,
        window: &Window,
    ) -> Result<Vec<AvailableTable>, EngineError> {
        if endorsed.is_empty() {
            return Ok(Vec::new());
        }
        let restaurant_ids: Vec<RestaurantId> = endorsed.keys().copied().collect();
        let mut rows = self
            .store
            .fetch_available_tables(party_size, &restaurant_ids, window)
            .await?;
        rows.sort_by_key(|r| r.table_id);

        let found = first_table_per_restaurant(&rows, endorsed);
        if found.len() < endorsed.len() {
            debug!(
                "{} endorsed restaurant(s) have no free table for {party_size} between {} and {}",
                endorsed.len() - found.len(),
                window.start_text(),
                window.end_text()
            );
        }
        Ok(found)
    }
}
