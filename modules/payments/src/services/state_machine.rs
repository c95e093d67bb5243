//! Payment intent transition table
//!
//! ```text
//! requires_confirmation -> processing | canceled
//! processing            -> requires_action | succeeded | failed
//! requires_action       -> processing | failed | canceled
//! succeeded/failed/canceled -> (terminal)
//! ```

use crate::error::{ApiError, ApiResult};
use crate::models::IntentStatus;

pub fn can_transition(from: IntentStatus, to: IntentStatus) -> bool {
    use IntentStatus::*;
    matches!(
        (from, to),
        (RequiresConfirmation, Processing)
            | (RequiresConfirmation, Canceled)
            | (Processing, RequiresAction)
            | (Processing, Succeeded)
            | (Processing, Failed)
            | (RequiresAction, Processing)
            | (RequiresAction, Failed)
            | (RequiresAction, Canceled)
    )
}

/// Reject transitions outside the table with `invalid_state_transition` (409)
pub fn ensure_transition(from: IntentStatus, to: IntentStatus) -> ApiResult<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(ApiError::invalid_state_transition(from.as_str(), to.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IntentStatus::*;

    const ALL: [IntentStatus; 6] = [
        RequiresConfirmation,
        Processing,
        RequiresAction,
        Succeeded,
        Failed,
        Canceled,
    ];

    #[test]
    fn permitted_transitions() {
        assert!(can_transition(RequiresConfirmation, Processing));
        assert!(can_transition(RequiresConfirmation, Canceled));
        assert!(can_transition(Processing, RequiresAction));
        assert!(can_transition(Processing, Succeeded));
        assert!(can_transition(Processing, Failed));
        assert!(can_transition(RequiresAction, Processing));
        assert!(can_transition(RequiresAction, Failed));
        assert!(can_transition(RequiresAction, Canceled));
    }

    #[test]
    fn terminal_statuses_admit_nothing() {
        for terminal in [Succeeded, Failed, Canceled] {
            for to in ALL {
                assert!(!can_transition(terminal, to), "{terminal:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn forbidden_transitions_are_409() {
        let err = ensure_transition(Processing, Canceled).unwrap_err();
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.status, axum::http::StatusCode::CONFLICT);

        assert!(ensure_transition(RequiresConfirmation, Succeeded).is_err());
        assert!(ensure_transition(RequiresConfirmation, RequiresAction).is_err());
        assert!(ensure_transition(Canceled, Processing).is_err());
    }
}
