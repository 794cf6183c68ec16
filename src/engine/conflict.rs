use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Validate raw endpoints into a `Span`. The only place an interval enters
/// the engine.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if end <= start {
        return Err(EngineError::InvalidInterval { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// The overlap oracle: fail with `SlotConflict` if `candidate` overlaps any
/// reservation that occupies its slot (Held or Confirmed — Cancelled never
/// blocks). `exclude` skips the reservation being updated, so a record
/// never conflicts with itself. Read-only.
pub(crate) fn check_no_conflict(
    state: &VenueState,
    candidate: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for existing in state.overlapping(candidate) {
        if Some(existing.id) == exclude {
            continue;
        }
        if existing.occupies_slot() {
            return Err(EngineError::SlotConflict(existing.id));
        }
    }
    Ok(())
}
