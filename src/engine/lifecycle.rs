use crate::model::ReservationStatus;

use super::EngineError;

/// Legal transitions: Held -> Confirmed, Held -> Cancelled,
/// Confirmed -> Cancelled. Cancelled is terminal. Writing the current
/// status again is not a transition and always passes.
pub(crate) fn check_transition(
    from: ReservationStatus,
    to: ReservationStatus,
) -> Result<(), EngineError> {
    use ReservationStatus::*;
    match (from, to) {
        (a, b) if a == b => Ok(()),
        (Held, Confirmed) => Ok(()),
        (Held, Cancelled) => Ok(()),
        (Confirmed, Cancelled) => Ok(()),
        (from, to) => Err(EngineError::InvalidTransition { from, to }),
    }
}

/// A Cancelled reservation is read-only except for inspection. This is
/// enforced explicitly, before any other validation of an edit.
pub(crate) fn check_editable(status: ReservationStatus) -> Result<(), EngineError> {
    if status == ReservationStatus::Cancelled {
        return Err(EngineError::InvalidTransition {
            from: ReservationStatus::Cancelled,
            to: ReservationStatus::Cancelled,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReservationStatus::*;

    #[test]
    fn forward_transitions_pass() {
        assert!(check_transition(Held, Confirmed).is_ok());
        assert!(check_transition(Held, Cancelled).is_ok());
        assert!(check_transition(Confirmed, Cancelled).is_ok());
    }

    #[test]
    fn cancelled_is_terminal() {
        assert!(matches!(
            check_transition(Cancelled, Held),
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(matches!(
            check_transition(Cancelled, Confirmed),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn no_demotion_from_confirmed() {
        assert!(matches!(
            check_transition(Confirmed, Held),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn same_status_is_noop() {
        assert!(check_transition(Held, Held).is_ok());
        assert!(check_transition(Confirmed, Confirmed).is_ok());
        assert!(check_transition(Cancelled, Cancelled).is_ok());
    }

    #[test]
    fn cancelled_not_editable() {
        assert!(check_editable(Held).is_ok());
        assert!(check_editable(Confirmed).is_ok());
        assert!(check_editable(Cancelled).is_err());
    }
}
