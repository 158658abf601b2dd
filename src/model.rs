use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies the assistant or production a calendar belongs to.
pub type OwnerId = String;

/// Tri-state label on a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BookingStatus {
    Available,
    Held,
    Booked,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 3] = [BookingStatus::Available, BookingStatus::Held, BookingStatus::Booked];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Available => "available",
            BookingStatus::Held => "held",
            BookingStatus::Booked => "booked",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "available" => Ok(BookingStatus::Available),
            "held" => Ok(BookingStatus::Held),
            "booked" => Ok(BookingStatus::Booked),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductionType {
    MusicVideo,
    Commercial,
    Film,
    Tv,
    Documentary,
    Corporate,
    Other,
}

impl ProductionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionType::MusicVideo => "music_video",
            ProductionType::Commercial => "commercial",
            ProductionType::Film => "film",
            ProductionType::Tv => "tv",
            ProductionType::Documentary => "documentary",
            ProductionType::Corporate => "corporate",
            ProductionType::Other => "other",
        }
    }

    /// Human label, e.g. "Music Video".
    pub fn label(&self) -> &'static str {
        match self {
            ProductionType::MusicVideo => "Music Video",
            ProductionType::Commercial => "Commercial",
            ProductionType::Film => "Film",
            ProductionType::Tv => "TV Show",
            ProductionType::Documentary => "Documentary",
            ProductionType::Corporate => "Corporate",
            ProductionType::Other => "Other",
        }
    }
}

impl FromStr for ProductionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "music_video" => Ok(ProductionType::MusicVideo),
            "commercial" => Ok(ProductionType::Commercial),
            "film" => Ok(ProductionType::Film),
            "tv" => Ok(ProductionType::Tv),
            "documentary" => Ok(ProductionType::Documentary),
            "corporate" => Ok(ProductionType::Corporate),
            "other" => Ok(ProductionType::Other),
            other => Err(format!("unknown production type: {other}")),
        }
    }
}

/// Kind of production-assistant work a booking is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaType {
    Truck,
    Set,
    Ad,
    Events,
    Photoshoot,
    Script,
    Office,
    Locations,
}

impl PaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaType::Truck => "truck_pa",
            PaType::Set => "set_pa",
            PaType::Ad => "ad_pa",
            PaType::Events => "events_pa",
            PaType::Photoshoot => "photoshoot_pa",
            PaType::Script => "script_pa",
            PaType::Office => "office_pa",
            PaType::Locations => "locations_pa",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PaType::Truck => "Truck PA",
            PaType::Set => "Set PA",
            PaType::Ad => "AD (Assistant Director)",
            PaType::Events => "Events PA",
            PaType::Photoshoot => "Photoshoot PA",
            PaType::Script => "Script PA",
            PaType::Office => "Office PA",
            PaType::Locations => "Locations PA",
        }
    }
}

impl FromStr for PaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "truck_pa" => Ok(PaType::Truck),
            "set_pa" => Ok(PaType::Set),
            "ad_pa" => Ok(PaType::Ad),
            "events_pa" => Ok(PaType::Events),
            "photoshoot_pa" => Ok(PaType::Photoshoot),
            "script_pa" => Ok(PaType::Script),
            "office_pa" => Ok(PaType::Office),
            "locations_pa" => Ok(PaType::Locations),
            other => Err(format!("unknown PA type: {other}")),
        }
    }
}

/// Descriptive fields carried along with a booking. Never used in range logic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub production_id: Option<String>,
    pub production_type: Option<ProductionType>,
    pub pa_type: Option<PaType>,
    pub location: Option<String>,
    pub description: Option<String>,
}

/// A time-ranged availability or commitment block.
///
/// `[start, end]` is closed on both ends; membership tests compare calendar dates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub owner_id: OwnerId,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub status: BookingStatus,
    pub details: BookingDetails,
}

impl Booking {
    pub fn start_date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end.date()
    }

    /// True if `date` falls within the booking, ignoring time of day.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date() <= date && date <= self.end_date()
    }

    /// True if the two bookings share at least one instant (closed intervals).
    pub fn overlaps(&self, other: &Booking) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Input to booking creation, as collected by the "add availability block" form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDraft {
    pub title: String,
    /// `"HH:MM"`, 24-hour.
    pub start_time: String,
    /// `"HH:MM"`, 24-hour.
    pub end_time: String,
    pub status: BookingStatus,
    pub reference_date: NaiveDate,
    /// Defaults to `reference_date` for single-day blocks.
    pub end_date: Option<NaiveDate>,
    pub details: BookingDetails,
}

impl BookingDraft {
    pub fn new(
        title: impl Into<String>,
        reference_date: NaiveDate,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
        status: BookingStatus,
    ) -> Self {
        Self {
            title: title.into(),
            start_time: start_time.into(),
            end_time: end_time.into(),
            status,
            reference_date,
            end_date: None,
            details: BookingDetails::default(),
        }
    }

    pub fn ending_on(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_details(mut self, details: BookingDetails) -> Self {
        self.details = details;
        self
    }
}

/// All bookings of one owner, in insertion order.
#[derive(Debug, Clone)]
pub struct OwnerCalendar {
    pub owner_id: OwnerId,
    pub bookings: Vec<Booking>,
}

impl OwnerCalendar {
    pub fn new(owner_id: OwnerId, bookings: Vec<Booking>) -> Self {
        Self { owner_id, bookings }
    }

    pub fn push(&mut self, booking: Booking) {
        self.bookings.push(booking);
    }

    pub fn get(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Existing bookings sharing at least one instant with `candidate`.
    pub fn overlapping<'a>(&'a self, candidate: &'a Booking) -> impl Iterator<Item = &'a Booking> {
        self.bookings
            .iter()
            .filter(move |b| b.id != candidate.id && b.overlaps(candidate))
    }
}

// ── Notifications ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    BlockAdded,
    BookingStatusChange,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BlockAdded => "block_added",
            NotificationKind::BookingStatusChange => "booking_status_change",
        }
    }
}

/// A user-facing event. Delivery is fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub kind: NotificationKind,
    pub recipient_id: OwnerId,
    pub title: String,
    pub description: String,
    pub booking_id: Option<Ulid>,
    /// Structured detail, e.g. `{"bookingId", "oldStatus", "newStatus"}` for a status change.
    pub metadata: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub read: bool,
}

/// One observed `held -> booked` change between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub booking_id: Ulid,
    pub owner_id: OwnerId,
    pub title: String,
    pub from: BookingStatus,
    pub to: BookingStatus,
}

impl StatusTransition {
    pub fn into_notification(self, created_at: NaiveDateTime) -> Notification {
        Notification {
            id: Ulid::new(),
            kind: NotificationKind::BookingStatusChange,
            recipient_id: self.owner_id,
            title: "Booking confirmed".to_string(),
            description: format!(
                "Your availability block for \"{}\" has been changed from {} to {}.",
                self.title, self.from, self.to
            ),
            metadata: serde_json::json!({
                "bookingId": self.booking_id.to_string(),
                "oldStatus": self.from.as_str(),
                "newStatus": self.to.as_str(),
            }),
            booking_id: Some(self.booking_id),
            created_at,
            read: false,
        }
    }
}

// ── Log records ──────────────────────────────────────────────────

/// The log record format. Every save writes the whole booking, so replay is last-writer-wins per id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingSaved(Booking),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
        date.and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn sample(start: NaiveDateTime, end: NaiveDateTime) -> Booking {
        Booking {
            id: Ulid::new(),
            owner_id: "sara".into(),
            title: "Commercial Shoot".into(),
            start,
            end,
            status: BookingStatus::Held,
            details: BookingDetails::default(),
        }
    }

    #[test]
    fn status_parse_and_display() {
        for status in BookingStatus::ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert_eq!(" Booked ".parse::<BookingStatus>().unwrap(), BookingStatus::Booked);
        assert!("confirmed".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn production_type_labels() {
        let pt: ProductionType = "music_video".parse().unwrap();
        assert_eq!(pt, ProductionType::MusicVideo);
        assert_eq!(pt.label(), "Music Video");
        assert_eq!(ProductionType::Tv.label(), "TV Show");
        assert!("opera".parse::<ProductionType>().is_err());
    }

    #[test]
    fn pa_type_round_trips_through_text() {
        let pa: PaType = "AD_PA".parse().unwrap();
        assert_eq!(pa, PaType::Ad);
        assert_eq!(pa.as_str(), "ad_pa");
        assert_eq!(pa.label(), "AD (Assistant Director)");
        assert!("grip".parse::<PaType>().is_err());
    }

    #[test]
    fn covers_ignores_time_of_day() {
        let d1 = NaiveDate::from_ymd_opt(2025, 7, 7).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 7, 8).unwrap();
        let b = sample(at(d1, 9, 0), at(d2, 17, 0));
        assert!(b.covers(d1));
        assert!(b.covers(d2)); // midnight of the end day is before 17:00 but still covered
        assert!(!b.covers(d2.succ_opt().unwrap()));
        assert!(!b.covers(d1.pred_opt().unwrap()));
    }

    #[test]
    fn overlaps_is_closed_interval() {
        let d = NaiveDate::from_ymd_opt(2025, 7, 7).unwrap();
        let a = sample(at(d, 9, 0), at(d, 12, 0));
        let b = sample(at(d, 12, 0), at(d, 15, 0));
        let c = sample(at(d, 12, 1), at(d, 15, 0));
        assert!(a.overlaps(&b)); // touching endpoints share an instant
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn calendar_keeps_insertion_order() {
        let d = NaiveDate::from_ymd_opt(2025, 7, 7).unwrap();
        let mut cal = OwnerCalendar::new("sara".into(), Vec::new());
        let late = sample(at(d, 15, 0), at(d, 17, 0));
        let early = sample(at(d, 8, 0), at(d, 9, 0));
        cal.push(late.clone());
        cal.push(early.clone());
        assert_eq!(cal.bookings[0].id, late.id);
        assert_eq!(cal.bookings[1].id, early.id);
        assert_eq!(cal.get(&early.id).unwrap().start, early.start);
        assert!(cal.get(&Ulid::new()).is_none());
    }

    #[test]
    fn calendar_overlapping_excludes_self() {
        let d = NaiveDate::from_ymd_opt(2025, 7, 7).unwrap();
        let mut cal = OwnerCalendar::new("sara".into(), Vec::new());
        let a = sample(at(d, 9, 0), at(d, 12, 0));
        let b = sample(at(d, 11, 0), at(d, 14, 0));
        let c = sample(at(d, 15, 0), at(d, 16, 0));
        cal.push(a.clone());
        cal.push(b.clone());
        cal.push(c.clone());
        let hits: Vec<_> = cal.overlapping(&a).map(|x| x.id).collect();
        assert_eq!(hits, vec![b.id]);
        assert_eq!(cal.overlapping(&c).count(), 0);
    }

    #[test]
    fn transition_notification_mentions_title() {
        let t = StatusTransition {
            booking_id: Ulid::new(),
            owner_id: "sara".into(),
            title: "Warner Bros Commercial".into(),
            from: BookingStatus::Held,
            to: BookingStatus::Booked,
        };
        let n = t.clone().into_notification(at(NaiveDate::from_ymd_opt(2024, 5, 22).unwrap(), 9, 30));
        assert_eq!(n.kind, NotificationKind::BookingStatusChange);
        assert_eq!(n.title, "Booking confirmed");
        assert!(n.description.contains("Warner Bros Commercial"));
        assert!(n.description.contains("from held to booked"));
        assert_eq!(n.booking_id, Some(t.booking_id));
        assert_eq!(n.metadata["oldStatus"], "held");
        assert_eq!(n.metadata["newStatus"], "booked");
        assert!(!n.read);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let d = NaiveDate::from_ymd_opt(2025, 7, 7).unwrap();
        let mut booking = sample(at(d, 9, 0), at(d, 17, 0));
        booking.details.production_type = Some(ProductionType::Film);
        booking.details.location = Some("Brooklyn".into());
        let event = Event::BookingSaved(booking);
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
