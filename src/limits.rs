/// Longest stay the engine will price or book, regardless of property settings.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Add-on services selectable on a single booking.
pub const MAX_SERVICES_PER_BOOKING: usize = 32;

/// Reservations (including cancelled ones) kept per property calendar.
pub const MAX_RESERVATIONS_PER_PROPERTY: usize = 100_000;

/// Manually blocked dates per property.
pub const MAX_BLOCKED_DATES_PER_PROPERTY: usize = 10_000;

/// Widest window accepted by the calendar view query.
pub const MAX_CALENDAR_WINDOW_DAYS: i64 = 731;

pub const MAX_PAYMENT_METHOD_LEN: usize = 64;
pub const MAX_TRANSACTION_ID_LEN: usize = 256;
