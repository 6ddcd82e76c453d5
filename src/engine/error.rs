use crate::model::{ParseError, ReservationId};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("conflict with reservation: {0}")]
    Conflict(ReservationId),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("data access failure: {0}")]
    DataAccess(#[source] StoreError),
}

impl From<ParseError> for EngineError {
    fn from(e: ParseError) -> Self {
        EngineError::InvalidRequest(e.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(id) => EngineError::Conflict(id),
            other => EngineError::DataAccess(other),
        }
    }
}
