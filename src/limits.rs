/// Hard limits. Anything past these is rejected with `LimitExceeded`.
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_TEXT_FIELD_LEN: usize = 4096;
pub const MAX_OWNER_ID_LEN: usize = 128;
pub const MAX_BOOKINGS_PER_OWNER: usize = 10_000;
pub const MAX_BATCH_SIZE: usize = 500;

/// Longest block a single booking may cover, in calendar days.
pub const MAX_BOOKING_DAYS: i64 = 366;

/// Widest window a calendar query may expand, in calendar days.
pub const MAX_QUERY_DAYS: i64 = 3 * 366;

pub const MAX_INBOX_LEN: usize = 200;

pub const MAX_WORKSPACE_NAME_LEN: usize = 128;
pub const MAX_WORKSPACES: usize = 1024;
pub const MAX_IN_CLAUSE_IDS: usize = MAX_BATCH_SIZE;
