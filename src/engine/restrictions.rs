use std::collections::BTreeSet;

use crate::model::*;
use crate::store::RestrictionRow;

use super::{Engine, EngineError};

/// Union of every diner's delimited restriction field. Diners without a field
/// contribute nothing.
pub fn merge_restrictions(rows: &[RestrictionRow]) -> BTreeSet<String> {
    rows.iter()
        .filter_map(|row| row.restrictions.as_deref())
        .flat_map(split_labels)
        .map(str::to_string)
        .collect()
}

impl Engine {
    pub async fn aggregate_restrictions(
        &self,
        diner_ids: &[DinerId],
    ) -> Result<BTreeSet<String>, EngineError> {
        let rows = self.store.fetch_dietary_restrictions(diner_ids).await?;
        Ok(merge_restrictions(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(r: Option<&str>) -> RestrictionRow {
        RestrictionRow {
            restrictions: r.map(str::to_string),
        }
    }

    #[test]
    fn merges_and_dedups() {
        let merged = merge_restrictions(&[
            row(Some("Vegan, Gluten-Free")),
            row(Some("Gluten-Free")),
            row(None),
            row(Some("Paleo,Vegan")),
        ]);
        let labels: Vec<_> = merged.iter().map(String::as_str).collect();
        assert_eq!(labels, vec!["Gluten-Free", "Paleo", "Vegan"]);
    }

    #[test]
    fn no_rows_no_restrictions() {
        assert!(merge_restrictions(&[]).is_empty());
        assert!(merge_restrictions(&[row(None), row(Some(""))]).is_empty());
    }
}
