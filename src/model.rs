use std::collections::BTreeSet;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};

use crate::limits::*;

pub type DinerId = i64;
pub type RestaurantId = i64;
pub type TableId = i64;
pub type ReservationId = i64;

/// Local, non-timezone-qualified timestamp text used for every time the store hands out.
pub const STORE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_store_time(t: &NaiveDateTime) -> String {
    t.format(STORE_TIME_FORMAT).to_string()
}

/// Parse a caller-supplied reservation time. Offsets are converted to local
/// wall-clock time; sub-second precision is dropped so that chronological
/// order matches the order of the store text form.
pub fn parse_reservation_time(input: &str) -> Result<NaiveDateTime, ParseError> {
    let s = input.trim();
    let naive_formats = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    let parsed = naive_formats
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Local).naive_local())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| ParseError::BadTime(input.to_string()))?;
    Ok(parsed.with_nanosecond(0).unwrap_or(parsed))
}

/// Inclusive `[start, end]` window around a requested reservation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Window {
    /// The conflict window: `t ± CONFLICT_WINDOW_HOURS`.
    pub fn around(t: NaiveDateTime) -> Result<Self, ParseError> {
        let half = TimeDelta::hours(CONFLICT_WINDOW_HOURS);
        let start = t
            .checked_sub_signed(half)
            .ok_or_else(|| ParseError::OutOfRange(format_store_time(&t)))?;
        let end = t
            .checked_add_signed(half)
            .ok_or_else(|| ParseError::OutOfRange(format_store_time(&t)))?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, t: &NaiveDateTime) -> bool {
        self.start <= *t && *t <= self.end
    }

    pub fn start_text(&self) -> String {
        format_store_time(&self.start)
    }

    pub fn end_text(&self) -> String {
        format_store_time(&self.end)
    }
}

// ── Delimited encodings ─────────────────────────────────────────

/// Parse a raw `"1,2,3"` diner-id list. Order is kept, duplicates are kept.
pub fn parse_diner_ids(raw: &str) -> Result<Vec<DinerId>, ParseError> {
    if raw.len() > MAX_DINER_IDS_LEN {
        return Err(ParseError::BadDinerIds(format!("list longer than {MAX_DINER_IDS_LEN} bytes")));
    }
    if raw.is_empty() {
        return Err(ParseError::BadDinerIds("empty list".into()));
    }
    raw.split(',')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::BadDinerIds(format!("not a diner id: {part:?}")));
            }
            part.parse::<DinerId>()
                .map_err(|e| ParseError::BadDinerIds(format!("{part}: {e}")))
        })
        .collect()
}

pub fn format_diner_ids(ids: &[DinerId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",")
}

/// Membership token for one diner: `[id]`.
pub fn diner_token(id: DinerId) -> String {
    format!("[{id}]")
}

/// Storage encoding of a party: `[1],[2],[3]`.
pub fn encode_diner_ids(ids: &[DinerId]) -> String {
    ids.iter().map(|id| diner_token(*id)).collect::<Vec<_>>().join(",")
}

/// Substring membership test against an encoded party. The brackets keep
/// `1` from matching inside `12`.
pub fn encoded_contains(encoded: &str, id: DinerId) -> bool {
    encoded.contains(&diner_token(id))
}

/// Split a comma-delimited label field, trimming whitespace and skipping blanks.
pub fn split_labels(field: &str) -> impl Iterator<Item = &str> {
    field.split(',').map(str::trim).filter(|l| !l.is_empty())
}

// ── Records ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diner {
    pub id: DinerId,
    #[serde(default)]
    pub name: Option<String>,
    /// Comma-delimited labels, e.g. `"Vegan, Gluten-Free"`.
    #[serde(default)]
    pub dietary_restrictions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: RestaurantId,
    pub name: String,
    /// Comma-delimited labels the restaurant supports.
    #[serde(default)]
    pub endorsements: Option<String>,
}

impl Restaurant {
    pub fn endorsement_tags(&self) -> BTreeSet<String> {
        self.endorsements
            .as_deref()
            .map(|e| split_labels(e).map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub restaurant_id: RestaurantId,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub table_id: TableId,
    pub restaurant_id: RestaurantId,
    pub time: NaiveDateTime,
    /// `[id]` encoded party, see [`encode_diner_ids`].
    pub diner_ids: String,
}

impl Reservation {
    pub fn has_diner(&self, id: DinerId) -> bool {
        encoded_contains(&self.diner_ids, id)
    }
}

/// A reservation before the store has assigned its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub table_id: TableId,
    pub restaurant_id: RestaurantId,
    pub diner_ids: Vec<DinerId>,
    pub time: NaiveDateTime,
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        id: ReservationId,
        table_id: TableId,
        restaurant_id: RestaurantId,
        time: NaiveDateTime,
        diner_ids: String,
    },
    ReservationCancelled {
        id: ReservationId,
    },
}

impl Event {
    pub fn created(r: &Reservation) -> Self {
        Event::ReservationCreated {
            id: r.id,
            table_id: r.table_id,
            restaurant_id: r.restaurant_id,
            time: r.time,
            diner_ids: r.diner_ids.clone(),
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableTable {
    pub restaurant_id: RestaurantId,
    pub restaurant_name: String,
    pub table_id: TableId,
}

/// Outcome of an availability lookup. A conflicting party is a normal
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Open(Vec<AvailableTable>),
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedReservation {
    pub reservation_id: ReservationId,
    pub restaurant_id: RestaurantId,
    pub table_id: TableId,
    pub diner_ids: Vec<DinerId>,
    pub reservation_time: NaiveDateTime,
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("bad diner ids: {0}")]
    BadDinerIds(String),
    #[error("bad reservation time: {0}")]
    BadTime(String),
    #[error("time out of range: {0}")]
    OutOfRange(String),
}
