use crate::model::*;

/// All live reservations, sorted by `time`.
#[derive(Debug)]
pub struct ReservationBook {
    reservations: Vec<Reservation>,
    /// One past the largest id ever applied.
    next_id: ReservationId,
}

impl Default for ReservationBook {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationBook {
    pub fn new() -> Self {
        Self {
            reservations: Vec::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn next_id(&self) -> ReservationId {
        self.next_id
    }

    pub fn get(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Insert keeping time order; equal times keep insertion order.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.time <= reservation.time);
        self.next_id = self.next_id.max(reservation.id + 1);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations whose time lies in `[window.start, window.end]`.
    pub fn within(&self, window: &Window) -> impl Iterator<Item = &Reservation> {
        let lo = self.reservations.partition_point(|r| r.time < window.start);
        let hi = self.reservations.partition_point(|r| r.time <= window.end);
        self.reservations[lo..hi.max(lo)].iter()
    }

    /// First reservation in `window` whose party contains any of `diner_ids`.
    pub fn party_conflict(&self, diner_ids: &[DinerId], window: &Window) -> Option<&Reservation> {
        self.within(window)
            .find(|r| diner_ids.iter().any(|id| r.has_diner(*id)))
    }

    /// First reservation in `window` on `table_id`.
    pub fn table_conflict(&self, table_id: TableId, window: &Window) -> Option<&Reservation> {
        self.within(window).find(|r| r.table_id == table_id)
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::ReservationCreated {
                id,
                table_id,
                restaurant_id,
                time,
                diner_ids,
            } => self.insert(Reservation {
                id: *id,
                table_id: *table_id,
                restaurant_id: *restaurant_id,
                time: *time,
                diner_ids: diner_ids.clone(),
            }),
            Event::ReservationCancelled { id } => {
                self.remove(*id);
            }
        }
    }

    /// Minimal event list that recreates the live set.
    pub fn snapshot_events(&self) -> Vec<Event> {
        self.reservations.iter().map(Event::created).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter()
    }
}
