use ulid::Ulid;

use crate::model::{Ms, ReservationStatus};

#[derive(Debug)]
pub enum EngineError {
    /// `end <= start`.
    InvalidInterval { start: Ms, end: Ms },
    /// Malformed or out-of-range field.
    Validation(&'static str),
    /// Candidate interval overlaps an active reservation; carries the
    /// blocking reservation's id.
    SlotConflict(Ulid),
    /// Dangling client/package/service reference.
    ReferenceNotFound { kind: &'static str, id: Ulid },
    NotFound(Ulid),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval: [{start}, {end}) has end <= start")
            }
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::SlotConflict(id) => {
                write!(f, "slot conflict with active reservation: {id}")
            }
            EngineError::ReferenceNotFound { kind, id } => {
                write!(f, "{kind} not found: {id}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidTransition { from, to } => {
                write!(
                    f,
                    "invalid transition: {} -> {}",
                    from.as_str(),
                    to.as_str()
                )
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
