use std::collections::{HashMap, HashSet};

use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::transitions::confirmed_transitions;
use super::validate::{now, validate_draft, validate_owner};
use super::{Engine, EngineError};

fn block_added(booking: &Booking, created_at: chrono::NaiveDateTime) -> Notification {
    Notification {
        id: Ulid::new(),
        kind: NotificationKind::BlockAdded,
        recipient_id: booking.owner_id.clone(),
        title: "Availability block added".to_string(),
        description: format!(
            "\"{}\" was added to your calendar as {}.",
            booking.title, booking.status
        ),
        booking_id: Some(booking.id),
        metadata: serde_json::json!({
            "bookingId": booking.id.to_string(),
            "status": booking.status.as_str(),
        }),
        created_at,
        read: false,
    }
}

impl Engine {
    /// Add a booking to an owner's calendar.
    ///
    /// Overlapping an existing booking is allowed; it is logged and counted,
    /// never rejected. If the repository refuses the save the booking stays in
    /// the calendar and `EngineError::Persistence` carries it.
    pub async fn create_booking(
        &self,
        owner_id: &str,
        draft: BookingDraft,
    ) -> Result<Booking, EngineError> {
        let mut created = self.create_bookings(owner_id, vec![draft]).await?;
        created.pop().ok_or_else(|| EngineError::Validation("no booking created".into()))
    }

    /// Add several bookings to one owner's calendar at once.
    ///
    /// Every draft is validated before anything changes: one bad draft leaves the
    /// calendar, the repository and the inbox untouched. On a save failure all
    /// bookings stay in memory and the error names the first one not saved.
    pub async fn create_bookings(
        &self,
        owner_id: &str,
        drafts: Vec<BookingDraft>,
    ) -> Result<Vec<Booking>, EngineError> {
        validate_owner(owner_id)?;
        if drafts.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut checked = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let (start, end) = validate_draft(&draft)?;
            checked.push((draft, start, end));
        }

        let cal = self.calendar(owner_id).await?;
        let mut guard = cal.write().await;
        if guard.bookings.len() + checked.len() > MAX_BOOKINGS_PER_OWNER {
            return Err(EngineError::LimitExceeded("too many bookings for owner"));
        }

        let mut created = Vec::with_capacity(checked.len());
        for (draft, start, end) in checked {
            let booking = Booking {
                id: Ulid::new(),
                owner_id: owner_id.to_string(),
                title: draft.title.trim().to_string(),
                start,
                end,
                status: draft.status,
                details: draft.details,
            };

            for other in guard.overlapping(&booking) {
                warn!(
                    "booking {} for {owner_id} overlaps {} ({} / {})",
                    booking.id, other.id, booking.status, other.status
                );
                metrics::counter!(crate::observability::BOOKING_OVERLAPS_TOTAL).increment(1);
            }

            guard.push(booking.clone());
            self.booking_owner.insert(booking.id, owner_id.to_string());
            metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "status" => booking.status.as_str())
                .increment(1);
            info!("booking {} created for {owner_id}: {:?}", booking.id, booking.title);
            created.push(booking);
        }

        let created_at = now();
        for booking in &created {
            self.notify.publish(block_added(booking, created_at));
        }

        let mut first_failure = None;
        for booking in &created {
            if let Err(e) = self.persist(booking).await {
                first_failure.get_or_insert(e);
            }
        }
        drop(guard);

        match first_failure {
            Some(e) => Err(e),
            None => Ok(created),
        }
    }

    /// Change one booking's status. Returns the booking as it now stands.
    pub async fn update_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let mut updated = self.update_statuses(&[(id, status)]).await?;
        updated.pop().ok_or(EngineError::NotFound(id))
    }

    /// Change several statuses at once, across any number of owners.
    ///
    /// Every id is checked before anything changes: one unknown id leaves all
    /// calendars untouched. A repeated id takes its last status. Each
    /// `held -> booked` change publishes one confirmation to the owner.
    /// On a save failure every change stays in memory and the error names the
    /// first booking that was not saved.
    pub async fn update_statuses(
        &self,
        changes: &[(Ulid, BookingStatus)],
    ) -> Result<Vec<Booking>, EngineError> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        if changes.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let mut owners = Vec::with_capacity(changes.len());
        for (id, _) in changes {
            owners.push(self.resolve_owner(id).await?.ok_or(EngineError::NotFound(*id))?);
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut owner_ids = owners.clone();
        owner_ids.sort();
        owner_ids.dedup();

        let mut guards = Vec::with_capacity(owner_ids.len());
        let mut cal_index = HashMap::new();
        for owner in &owner_ids {
            let cal = self.calendar(owner).await?;
            cal_index.insert(owner.as_str(), guards.len());
            guards.push(cal.write_owned().await);
        }

        // Phase 1: every id must still be there once the locks are held.
        let mut seen = HashSet::new();
        let mut before = Vec::new();
        for ((id, _), owner) in changes.iter().zip(&owners) {
            let guard = &guards[cal_index[owner.as_str()]];
            let booking = guard.get(id).ok_or(EngineError::NotFound(*id))?;
            if seen.insert(*id) {
                before.push(booking.clone());
            }
        }

        // Phase 2: apply.
        for ((id, status), owner) in changes.iter().zip(&owners) {
            let guard = &mut guards[cal_index[owner.as_str()]];
            if let Some(booking) = guard.get_mut(id) {
                booking.status = *status;
            }
        }

        let after: Vec<Booking> = before
            .iter()
            .filter_map(|b| guards[cal_index[b.owner_id.as_str()]].get(&b.id).cloned())
            .collect();

        let created_at = now();
        for transition in confirmed_transitions(&before, &after) {
            info!(
                "booking {} of {} confirmed: {}",
                transition.booking_id, transition.owner_id, transition.title
            );
            metrics::counter!(crate::observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
            self.notify.publish(transition.into_notification(created_at));
        }

        let mut first_failure = None;
        for booking in &after {
            if let Err(e) = self.persist(booking).await {
                first_failure.get_or_insert(e);
            }
        }
        drop(guards);

        match first_failure {
            Some(e) => Err(e),
            None => Ok(after),
        }
    }
}
