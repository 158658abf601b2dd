use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::limits::*;
use crate::model::*;

use super::calendar::days_between;
use super::EngineError;

pub(crate) fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Parse a 24-hour `"HH:MM"` time of day.
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map_err(|e| EngineError::Validation(format!("bad time of day {input:?}: {e}")))
}

/// Put a `"HH:MM"` time of day on a calendar date.
pub fn combine_date_time(date: NaiveDate, time: &str) -> Result<NaiveDateTime, EngineError> {
    Ok(date.and_time(parse_time_of_day(time)?))
}

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_details(details: &BookingDetails) -> Result<(), EngineError> {
    let fields = [
        (&details.production_id, "production id too long"),
        (&details.location, "location too long"),
        (&details.description, "description too long"),
    ];
    for (value, what) in fields {
        if let Some(v) = value {
            check_len(v, MAX_TEXT_FIELD_LEN, what)?;
        }
    }
    Ok(())
}

/// Check a draft and resolve its `[start, end]`. Nothing is mutated on error.
pub(crate) fn validate_draft(draft: &BookingDraft) -> Result<(NaiveDateTime, NaiveDateTime), EngineError> {
    if draft.title.trim().is_empty() {
        return Err(EngineError::Validation("title is required".into()));
    }
    check_len(&draft.title, MAX_TITLE_LEN, "title too long")?;
    check_details(&draft.details)?;

    let start = combine_date_time(draft.reference_date, &draft.start_time)?;
    let end = combine_date_time(
        draft.end_date.unwrap_or(draft.reference_date),
        &draft.end_time,
    )?;
    if start > end {
        return Err(EngineError::InvalidRange { start, end });
    }
    if days_between(start.date(), end.date()) >= MAX_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("booking spans too many days"));
    }
    Ok((start, end))
}

/// Check an inclusive `[first, last]` query window.
pub(crate) fn validate_window(first: NaiveDate, last: NaiveDate) -> Result<(), EngineError> {
    if first > last {
        return Err(EngineError::InvalidRange {
            start: first.and_time(NaiveTime::MIN),
            end: last.and_time(NaiveTime::MIN),
        });
    }
    if days_between(first, last) >= MAX_QUERY_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_owner(owner_id: &str) -> Result<(), EngineError> {
    if owner_id.trim().is_empty() {
        return Err(EngineError::Validation("owner id is required".into()));
    }
    check_len(owner_id, MAX_OWNER_ID_LEN, "owner id too long")
}
