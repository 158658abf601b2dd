mod memory;
mod wal;

pub use memory::InMemoryRepository;
pub use wal::WalRepository;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{Booking, OwnerId};

/// Where bookings live between sessions. The engine's in-memory calendars stay
/// authoritative for the running session whatever the repository reports.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn load_bookings(&self, owner_id: &str) -> Result<Vec<Booking>, RepositoryError>;

    /// Insert or replace by id. Last writer wins.
    async fn save_booking(&self, booking: &Booking) -> Result<(), RepositoryError>;

    /// Owner of a stored booking, for ids whose calendar is not in memory.
    async fn find_owner(&self, booking_id: &Ulid) -> Result<Option<OwnerId>, RepositoryError>;

    /// Records written since the last compaction.
    async fn appends_since_compact(&self) -> u64 {
        0
    }

    async fn compact(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[derive(Debug)]
pub enum RepositoryError {
    Io(std::io::Error),
    WriterClosed(&'static str),
    Unavailable(String),
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryError::Io(e) => write!(f, "I/O error: {e}"),
            RepositoryError::WriterClosed(msg) => write!(f, "log writer closed: {msg}"),
            RepositoryError::Unavailable(msg) => write!(f, "repository unavailable: {msg}"),
        }
    }
}

impl std::error::Error for RepositoryError {}

impl From<std::io::Error> for RepositoryError {
    fn from(e: std::io::Error) -> Self {
        RepositoryError::Io(e)
    }
}

/// Replace the booking with the same id in place, or append it.
pub(crate) fn upsert(bookings: &mut Vec<Booking>, booking: &Booking) {
    match bookings.iter_mut().find(|b| b.id == booking.id) {
        Some(existing) => *existing = booking.clone(),
        None => bookings.push(booking.clone()),
    }
}
