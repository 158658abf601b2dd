mod calendar;
mod error;
mod mutations;
mod queries;
mod transitions;
mod validate;

pub use calendar::{
    booking_days, bookings_on_date, day_cells, days_between, expand_range, month_days, CalendarDays,
    CalendarSelection, DayCell, DayRange,
};
pub use error::EngineError;
pub use transitions::{confirmed_transitions, status_changes};
pub use validate::{combine_date_time, parse_time_of_day};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::repository::BookingRepository;

use validate::validate_owner;

pub type SharedCalendar = Arc<RwLock<OwnerCalendar>>;

/// Booking store for one workspace.
///
/// Calendars are loaded from the repository on first touch and stay in memory
/// from then on; the in-memory copy wins over whatever the repository says.
pub struct Engine {
    calendars: DashMap<OwnerId, SharedCalendar>,
    repository: Arc<dyn BookingRepository>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → owner id, for loaded calendars only.
    booking_owner: DashMap<Ulid, OwnerId>,
    /// Bookings whose latest in-memory state the repository refused, by owner.
    unsaved: DashMap<Ulid, OwnerId>,
}

impl Engine {
    pub fn new(repository: Arc<dyn BookingRepository>, notify: Arc<NotifyHub>) -> Self {
        Self {
            calendars: DashMap::new(),
            repository,
            notify,
            booking_owner: DashMap::new(),
            unsaved: DashMap::new(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn BookingRepository> {
        &self.repository
    }

    /// Get an owner's calendar, loading it on first use. A failed load starts
    /// the owner with an empty calendar.
    pub(super) async fn calendar(&self, owner_id: &str) -> Result<SharedCalendar, EngineError> {
        validate_owner(owner_id)?;
        if let Some(cal) = self.calendars.get(owner_id) {
            return Ok(cal.value().clone());
        }

        let bookings = match self.repository.load_bookings(owner_id).await {
            Ok(bookings) => bookings,
            Err(e) => {
                warn!("loading calendar of {owner_id} failed, starting empty: {e}");
                metrics::counter!(crate::observability::REPOSITORY_FAILURES_TOTAL, "op" => "load")
                    .increment(1);
                Vec::new()
            }
        };

        // A concurrent loader may have won the race; keep whichever landed first.
        let entry = self.calendars.entry(owner_id.to_string()).or_insert_with(|| {
            for b in &bookings {
                self.booking_owner.insert(b.id, owner_id.to_string());
            }
            metrics::gauge!(crate::observability::CALENDARS_LOADED).increment(1.0);
            Arc::new(RwLock::new(OwnerCalendar::new(owner_id.to_string(), bookings)))
        });
        Ok(entry.value().clone())
    }

    /// Load an owner's calendar without reading it.
    pub async fn preload(&self, owner_id: &str) -> Result<(), EngineError> {
        self.calendar(owner_id).await.map(|_| ())
    }

    /// Owner of a booking in a loaded calendar.
    pub fn owner_of(&self, booking_id: &Ulid) -> Option<OwnerId> {
        self.booking_owner.get(booking_id).map(|e| e.value().clone())
    }

    /// Owner of any known booking. A booking whose calendar is not in memory yet
    /// is looked up in the repository and its owner's calendar loaded.
    pub async fn resolve_owner(&self, booking_id: &Ulid) -> Result<Option<OwnerId>, EngineError> {
        if let Some(owner) = self.owner_of(booking_id) {
            return Ok(Some(owner));
        }
        let owner = match self.repository.find_owner(booking_id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("looking up owner of booking {booking_id} failed: {e}");
                metrics::counter!(crate::observability::REPOSITORY_FAILURES_TOTAL, "op" => "find")
                    .increment(1);
                return Ok(None);
            }
        };
        self.calendar(&owner).await?;
        Ok(self.owner_of(booking_id))
    }

    pub fn is_loaded(&self, owner_id: &str) -> bool {
        self.calendars.contains_key(owner_id)
    }

    /// True while some booking of the owner exists only in memory.
    pub fn has_unsaved(&self, owner_id: &str) -> bool {
        self.unsaved.iter().any(|e| e.value() == owner_id)
    }

    /// Forget an owner's in-memory calendar. The next access reloads it from the
    /// repository. A calendar holding unsaved changes is kept; returns whether
    /// the calendar is gone.
    pub fn unload(&self, owner_id: &str) -> bool {
        if self.has_unsaved(owner_id) {
            warn!("keeping calendar of {owner_id} in memory: it has unsaved bookings");
            return false;
        }
        if self.calendars.remove(owner_id).is_some() {
            self.booking_owner.retain(|_, owner| owner != owner_id);
            metrics::gauge!(crate::observability::CALENDARS_LOADED).decrement(1.0);
        }
        true
    }

    /// Save one booking. On failure the in-memory state is left as is and the
    /// error carries the unsaved booking.
    pub(super) async fn persist(&self, booking: &Booking) -> Result<(), EngineError> {
        if let Err(e) = self.repository.save_booking(booking).await {
            self.unsaved.insert(booking.id, booking.owner_id.clone());
            warn!("saving booking {} failed, keeping in-memory copy: {e}", booking.id);
            metrics::counter!(crate::observability::REPOSITORY_FAILURES_TOTAL, "op" => "save")
                .increment(1);
            return Err(EngineError::Persistence {
                booking: Box::new(booking.clone()),
                reason: e.to_string(),
            });
        }
        self.unsaved.remove(&booking.id);
        Ok(())
    }
}
