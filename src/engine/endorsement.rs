use std::collections::{BTreeMap, BTreeSet};

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Restaurants whose endorsements cover every restriction, keyed by id.
    /// An empty restriction set selects every restaurant.
    pub async fn match_endorsements(
        &self,
        restrictions: &BTreeSet<String>,
    ) -> Result<BTreeMap<RestaurantId, String>, EngineError> {
        let rows = self.store.fetch_endorsed_restaurants(restrictions).await?;
        Ok(rows.into_iter().map(|r| (r.id, r.name)).collect())
    }
}
