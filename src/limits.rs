//! Hard caps applied at the engine and SQL boundaries.

/// Longest reservation accepted, in days (inclusive count).
pub const MAX_RESERVATION_DAYS: i64 = 366;

/// Live (pending + confirmed + rejected) reservations kept per unit.
pub const MAX_RESERVATIONS_PER_UNIT: usize = 10_000;

/// Free-text cancellation reason.
pub const MAX_REASON_LEN: usize = 2_000;

/// Unit names, extra names and party ids.
pub const MAX_NAME_LEN: usize = 256;

/// Distinct extras selectable on one reservation.
pub const MAX_EXTRAS_PER_RESERVATION: usize = 32;

/// Extras a unit may offer.
pub const MAX_EXTRAS_PER_UNIT: usize = 64;

/// Blocked-date expansion is bounded by this many days per unit.
pub const MAX_BLOCKED_DAYS: usize = 200_000;
