use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, NaiveDate};

use crate::model::*;

// ── Range expansion ───────────────────────────────────────────────

/// Calendar days from `first` to `last`, both inclusive, one day per step.
///
/// Cheap to clone; a clone restarts from wherever the original was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayRange {
    next: Option<NaiveDate>,
    last: NaiveDate,
}

impl Iterator for DayRange {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next?;
        if current > self.last {
            self.next = None;
            return None;
        }
        self.next = if current == self.last {
            None
        } else {
            current.succ_opt()
        };
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.next {
            Some(n) if n <= self.last => (self.last - n).num_days() as usize + 1,
            _ => 0,
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DayRange {}

/// Every calendar day in `[start, end]`. Empty when `start > end`.
pub fn expand_range(start: NaiveDate, end: NaiveDate) -> DayRange {
    DayRange {
        next: Some(start),
        last: end,
    }
}

/// Whole days from `start` to `end`; negative when `end` comes first.
pub fn days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days()
}

/// Days covered by a booking, at calendar-date granularity.
pub fn booking_days(booking: &Booking) -> DayRange {
    expand_range(booking.start_date(), booking.end_date())
}

/// All days of a month, or `None` for an invalid year/month.
pub fn month_days(year: i32, month: u32) -> Option<DayRange> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(expand_range(first, next_first.pred_opt()?))
}

// ── Date membership ───────────────────────────────────────────────

/// Bookings whose `[start, end]` contains `date`, comparing calendar dates only.
pub fn bookings_on_date(date: NaiveDate, bookings: &[Booking]) -> Vec<&Booking> {
    bookings.iter().filter(|b| b.covers(date)).collect()
}

/// One cell of a month grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCell {
    pub date: NaiveDate,
    pub bookings: Vec<Booking>,
}

pub fn day_cells(days: DayRange, bookings: &[Booking]) -> Vec<DayCell> {
    days.map(|date| DayCell {
        date,
        bookings: bookings_on_date(date, bookings).into_iter().cloned().collect(),
    })
    .collect()
}

// ── Per-status day sets ───────────────────────────────────────────

/// Highlighted days per status. A day may sit in more than one set when
/// bookings of different status overlap it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarDays {
    pub available: BTreeSet<NaiveDate>,
    pub held: BTreeSet<NaiveDate>,
    pub booked: BTreeSet<NaiveDate>,
}

impl CalendarDays {
    pub fn from_bookings<'a>(bookings: impl IntoIterator<Item = &'a Booking>) -> Self {
        let mut days = Self::default();
        for booking in bookings {
            days.days_mut(booking.status).extend(booking_days(booking));
        }
        days
    }

    /// Same as `from_bookings`, keeping only days inside `[first, last]`.
    pub fn within<'a>(
        bookings: impl IntoIterator<Item = &'a Booking>,
        first: NaiveDate,
        last: NaiveDate,
    ) -> Self {
        let mut days = Self::default();
        for booking in bookings {
            let start = booking.start_date().max(first);
            let end = booking.end_date().min(last);
            days.days_mut(booking.status).extend(expand_range(start, end));
        }
        days
    }

    pub fn days(&self, status: BookingStatus) -> &BTreeSet<NaiveDate> {
        match status {
            BookingStatus::Available => &self.available,
            BookingStatus::Held => &self.held,
            BookingStatus::Booked => &self.booked,
        }
    }

    fn days_mut(&mut self, status: BookingStatus) -> &mut BTreeSet<NaiveDate> {
        match status {
            BookingStatus::Available => &mut self.available,
            BookingStatus::Held => &mut self.held,
            BookingStatus::Booked => &mut self.booked,
        }
    }

    /// Every status layer on `date`, in `available, held, booked` order.
    pub fn statuses_on(&self, date: NaiveDate) -> Vec<BookingStatus> {
        BookingStatus::ALL
            .into_iter()
            .filter(|s| self.days(*s).contains(&date))
            .collect()
    }

    /// Status to paint when layers overlap: booked over held over available.
    pub fn dominant(&self, date: NaiveDate) -> Option<BookingStatus> {
        self.statuses_on(date).last().copied()
    }

    /// Flat `(date, status)` markers ordered by date, then status.
    pub fn markers(&self) -> Vec<(NaiveDate, BookingStatus)> {
        let mut out: Vec<_> = BookingStatus::ALL
            .into_iter()
            .flat_map(|s| self.days(s).iter().map(move |d| (*d, s)))
            .collect();
        out.sort();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty() && self.held.is_empty() && self.booked.is_empty()
    }
}

// ── Selection ─────────────────────────────────────────────────────

/// What the calendar view holds: the day sets, the selected date, and a
/// callback fired when the selection moves to a different day.
pub struct CalendarSelection {
    pub days: CalendarDays,
    selected: NaiveDate,
    on_change: Box<dyn FnMut(NaiveDate) + Send>,
}

impl CalendarSelection {
    pub fn new(days: CalendarDays, selected: NaiveDate, on_change: impl FnMut(NaiveDate) + Send + 'static) -> Self {
        Self {
            days,
            selected,
            on_change: Box::new(on_change),
        }
    }

    pub fn selected(&self) -> NaiveDate {
        self.selected
    }

    /// Move the selection. Returns false (and skips the callback) when `date` is already selected.
    pub fn select(&mut self, date: NaiveDate) -> bool {
        if date == self.selected {
            return false;
        }
        self.selected = date;
        (self.on_change)(date);
        true
    }

    /// Shift the selection into the same day of the neighbouring month, clamped to its length.
    pub fn shift_month(&mut self, forward: bool) -> bool {
        let (year, month) = match (forward, self.selected.month()) {
            (true, 12) => (self.selected.year() + 1, 1),
            (true, m) => (self.selected.year(), m + 1),
            (false, 1) => (self.selected.year() - 1, 12),
            (false, m) => (self.selected.year(), m - 1),
        };
        let Some(days) = month_days(year, month) else {
            return false;
        };
        let last = days.last().unwrap_or(self.selected);
        let day = self.selected.day().min(last.day());
        match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) => self.select(date),
            None => false,
        }
    }
}

impl fmt::Debug for CalendarSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendarSelection")
            .field("days", &self.days)
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}
