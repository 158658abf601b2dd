use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::{upsert, BookingRepository, RepositoryError};

/// Process-local repository. Nothing survives a restart.
pub struct InMemoryRepository {
    bookings: DashMap<OwnerId, Vec<Booking>>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
        }
    }

    /// Seed an owner's calendar, replacing whatever was stored.
    pub fn with_bookings(self, owner_id: impl Into<OwnerId>, bookings: Vec<Booking>) -> Self {
        self.bookings.insert(owner_id.into(), bookings);
        self
    }

    pub fn owner_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn booking_count(&self, owner_id: &str) -> usize {
        self.bookings.get(owner_id).map_or(0, |e| e.value().len())
    }
}

#[async_trait]
impl BookingRepository for InMemoryRepository {
    async fn load_bookings(&self, owner_id: &str) -> Result<Vec<Booking>, RepositoryError> {
        Ok(self
            .bookings
            .get(owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn save_booking(&self, booking: &Booking) -> Result<(), RepositoryError> {
        let mut entry = self.bookings.entry(booking.owner_id.clone()).or_default();
        upsert(entry.value_mut(), booking);
        Ok(())
    }

    async fn find_owner(&self, booking_id: &Ulid) -> Result<Option<OwnerId>, RepositoryError> {
        Ok(self
            .bookings
            .iter()
            .find(|e| e.value().iter().any(|b| b.id == *booking_id))
            .map(|e| e.key().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn booking(owner: &str, title: &str, status: BookingStatus) -> Booking {
        let d = NaiveDate::from_ymd_opt(2025, 7, 7).unwrap();
        Booking {
            id: Ulid::new(),
            owner_id: owner.into(),
            title: title.into(),
            start: d.and_hms_opt(9, 0, 0).unwrap(),
            end: d.and_hms_opt(17, 0, 0).unwrap(),
            status,
            details: BookingDetails::default(),
        }
    }

    #[tokio::test]
    async fn load_unknown_owner_is_empty() {
        let repo = InMemoryRepository::new();
        assert!(repo.load_bookings("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_upserts_by_id() {
        let repo = InMemoryRepository::new();
        let mut b = booking("sara", "Music Video", BookingStatus::Held);
        repo.save_booking(&b).await.unwrap();
        b.status = BookingStatus::Booked;
        repo.save_booking(&b).await.unwrap();

        let loaded = repo.load_bookings("sara").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, BookingStatus::Booked);
    }

    #[tokio::test]
    async fn owners_are_isolated() {
        let repo = InMemoryRepository::new()
            .with_bookings("sara", vec![booking("sara", "Film", BookingStatus::Available)]);
        repo.save_booking(&booking("abc-studios", "TV", BookingStatus::Held))
            .await
            .unwrap();
        assert_eq!(repo.owner_count(), 2);
        assert_eq!(repo.booking_count("sara"), 1);
        assert_eq!(repo.booking_count("abc-studios"), 1);
    }

    #[tokio::test]
    async fn find_owner_scans_every_calendar() {
        let held = booking("sara", "Film", BookingStatus::Held);
        let repo = InMemoryRepository::new().with_bookings("sara", vec![held.clone()]);
        repo.save_booking(&booking("abc-studios", "TV", BookingStatus::Held))
            .await
            .unwrap();
        assert_eq!(repo.find_owner(&held.id).await.unwrap().as_deref(), Some("sara"));
        assert_eq!(repo.find_owner(&Ulid::new()).await.unwrap(), None);
    }
}
