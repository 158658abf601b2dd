use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::repository::RepositoryError;

use super::calendar::{bookings_on_date, day_cells, month_days, CalendarDays, DayCell};
use super::validate::validate_window;
use super::{Engine, EngineError};

impl Engine {
    /// Every booking of an owner, in insertion order.
    pub async fn list_bookings(&self, owner_id: &str) -> Result<Vec<Booking>, EngineError> {
        let cal = self.calendar(owner_id).await?;
        let guard = cal.read().await;
        Ok(guard.bookings.clone())
    }

    /// Look up a booking by id, loading its owner's calendar if needed.
    pub async fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        let owner = self.resolve_owner(id).await.ok()??;
        let cal = self.calendar(&owner).await.ok()?;
        let guard = cal.read().await;
        guard.get(id).cloned()
    }

    /// Bookings touching `date`, in insertion order.
    pub async fn bookings_on(
        &self,
        owner_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, EngineError> {
        let cal = self.calendar(owner_id).await?;
        let guard = cal.read().await;
        Ok(bookings_on_date(date, &guard.bookings)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Per-status highlighted days across the owner's whole calendar.
    pub async fn calendar_days(&self, owner_id: &str) -> Result<CalendarDays, EngineError> {
        let cal = self.calendar(owner_id).await?;
        let guard = cal.read().await;
        Ok(CalendarDays::from_bookings(&guard.bookings))
    }

    /// Per-status highlighted days clipped to `[first, last]`.
    pub async fn calendar_days_within(
        &self,
        owner_id: &str,
        first: NaiveDate,
        last: NaiveDate,
    ) -> Result<CalendarDays, EngineError> {
        validate_window(first, last)?;
        let cal = self.calendar(owner_id).await?;
        let guard = cal.read().await;
        Ok(CalendarDays::within(&guard.bookings, first, last))
    }

    /// One cell per day of the month, each with the bookings touching it.
    pub async fn month_view(
        &self,
        owner_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Vec<DayCell>, EngineError> {
        let days = month_days(year, month)
            .ok_or_else(|| EngineError::Validation(format!("no such month: {year}-{month}")))?;
        let cal = self.calendar(owner_id).await?;
        let guard = cal.read().await;
        Ok(day_cells(days, &guard.bookings))
    }

    pub fn loaded_owners(&self) -> Vec<OwnerId> {
        let mut owners: Vec<OwnerId> = self.calendars.iter().map(|e| e.key().clone()).collect();
        owners.sort();
        owners
    }

    pub async fn compact(&self) -> Result<(), RepositoryError> {
        self.repository.compact().await
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.repository.appends_since_compact().await
    }
}
