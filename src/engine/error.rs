use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::Booking;

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(Ulid),
    InvalidRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    LimitExceeded(&'static str),
    /// The change is live in memory but the repository refused it.
    Persistence {
        booking: Box<Booking>,
        reason: String,
    },
}

impl EngineError {
    /// The booking as it stands in memory, when the only failure was persisting it.
    pub fn unsaved_booking(&self) -> Option<&Booking> {
        match self {
            EngineError::Persistence { booking, .. } => Some(booking),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: start {start} is after end {end}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Persistence { booking, reason } => {
                write!(f, "booking {} kept in memory but not saved: {reason}", booking.id)
            }
        }
    }
}

impl std::error::Error for EngineError {}
