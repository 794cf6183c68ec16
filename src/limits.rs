//! Operational limits. Requests outside this envelope fail with
//! `EngineError::LimitExceeded` before anything is written.

use crate::model::Ms;

/// Earliest accepted timestamp: 2000-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// Latest accepted timestamp: 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest single reservation: 7 days. Venue events run hours, not weeks.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * 24 * 3_600_000;

/// Widest list query window: ~1 year.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_RESERVATIONS: usize = 100_000;
pub const MAX_CATALOG_ENTRIES: usize = 100_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_REFERENCE_LEN: usize = 100;

pub const MAX_SERVICE_LINES_PER_RESERVATION: usize = 64;
pub const MAX_PAYMENTS_PER_RESERVATION: usize = 256;

/// Monetary ceiling per field, in cents. Generous for a single event.
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000_00;
