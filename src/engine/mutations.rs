use chrono::NaiveDateTime;
use tracing::info;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn parse_party(raw: &str) -> Result<Vec<DinerId>, EngineError> {
    let ids = parse_diner_ids(raw)?;
    if ids.len() > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("too many diners in party"));
    }
    Ok(ids)
}

impl Engine {
    /// Persist a reservation as requested.
    ///
    /// No conflict or capacity re-check happens here: a caller that checked
    /// availability earlier can still race another writer and double-book the
    /// table or the party. Use [`Engine::book_reservation`] when the check and
    /// the write must be atomic.
    pub async fn create_reservation(
        &self,
        table_id: TableId,
        restaurant_id: RestaurantId,
        reservation_time: NaiveDateTime,
        diner_ids: &str,
    ) -> Result<CreatedReservation, EngineError> {
        let ids = parse_party(diner_ids)?;
        let reservation_id = self
            .store
            .insert_reservation(NewReservation {
                table_id,
                restaurant_id,
                diner_ids: ids.clone(),
                time: reservation_time,
            })
            .await?;
        Ok(self.created(reservation_id, table_id, restaurant_id, reservation_time, ids))
    }

    /// Check-and-insert under the store's exclusive lock. Fails with
    /// [`EngineError::Conflict`] when any diner or the table already has a
    /// reservation within ±2h of `reservation_time`.
    pub async fn book_reservation(
        &self,
        table_id: TableId,
        restaurant_id: RestaurantId,
        reservation_time: NaiveDateTime,
        diner_ids: &str,
    ) -> Result<CreatedReservation, EngineError> {
        let ids = parse_party(diner_ids)?;
        let window = Window::around(reservation_time)?;
        let result = self
            .store
            .insert_reservation_checked(
                NewReservation {
                    table_id,
                    restaurant_id,
                    diner_ids: ids.clone(),
                    time: reservation_time,
                },
                &window,
            )
            .await;
        let reservation_id = match result {
            Ok(id) => id,
            Err(e) => {
                let err = EngineError::from(e);
                if matches!(err, EngineError::Conflict(_)) {
                    metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
                }
                return Err(err);
            }
        };
        Ok(self.created(reservation_id, table_id, restaurant_id, reservation_time, ids))
    }

    /// Remove a reservation. `false` means no such reservation existed.
    pub async fn cancel_reservation(&self, reservation_id: ReservationId) -> Result<bool, EngineError> {
        let removed = self.store.delete_reservation(reservation_id).await? > 0;
        if removed {
            info!("reservation {reservation_id} cancelled");
            metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        }
        Ok(removed)
    }

    fn created(
        &self,
        reservation_id: ReservationId,
        table_id: TableId,
        restaurant_id: RestaurantId,
        reservation_time: NaiveDateTime,
        diner_ids: Vec<DinerId>,
    ) -> CreatedReservation {
        info!(
            "reservation {reservation_id} created: table {table_id} at restaurant {restaurant_id}, {} for [{}]",
            format_store_time(&reservation_time),
            format_diner_ids(&diner_ids)
        );
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        CreatedReservation {
            reservation_id,
            restaurant_id,
            table_id,
            diner_ids,
            reservation_time,
        }
    }
}
