use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

/// Every status change between two snapshots, matched by id, in `after` order.
/// Bookings missing from either side are ignored.
pub fn status_changes(before: &[Booking], after: &[Booking]) -> Vec<StatusTransition> {
    let previous: HashMap<Ulid, BookingStatus> = before.iter().map(|b| (b.id, b.status)).collect();
    after
        .iter()
        .filter_map(|b| {
            let old = *previous.get(&b.id)?;
            (old != b.status).then(|| StatusTransition {
                booking_id: b.id,
                owner_id: b.owner_id.clone(),
                title: b.title.clone(),
                from: old,
                to: b.status,
            })
        })
        .collect()
}

/// The `held -> booked` subset of `status_changes`: one entry per booking that needs a
/// confirmation notification.
pub fn confirmed_transitions(before: &[Booking], after: &[Booking]) -> Vec<StatusTransition> {
    status_changes(before, after)
        .into_iter()
        .filter(|t| t.from == BookingStatus::Held && t.to == BookingStatus::Booked)
        .collect()
}
