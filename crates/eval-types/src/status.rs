use serde::{Deserialize, Serialize};

/// Lifecycle status of an evaluation.
///
/// Transitions are constrained by [`EvaluationStatus::can_transition_to`]:
/// `submitted -> queued -> provisioning -> running -> {completed|failed|timeout}`,
/// with `cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Submitted,
    Queued,
    Provisioning,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl EvaluationStatus {
    /// Terminal states are sticky: once set, only the outcome payload changes.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is an allowed transition.
    ///
    /// Terminal states never transition further (including to themselves,
    /// which callers treat as a no-op rather than a transition).
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Self::Submitted, Self::Queued)
                | (Self::Queued, Self::Provisioning)
                | (Self::Provisioning, Self::Running)
                | (Self::Provisioning, Self::Completed)
                | (Self::Provisioning, Self::Failed)
                | (Self::Provisioning, Self::Timeout)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Timeout)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Queued => "queued",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EvaluationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "submitted" => Self::Submitted,
            "queued" => Self::Queued,
            "provisioning" => Self::Provisioning,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "timeout" => Self::Timeout,
            "cancelled" => Self::Cancelled,
            other => return Err(UnknownStatus(other.to_string())),
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown evaluation status: {0}")]
pub struct UnknownStatus(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        assert!(EvaluationStatus::Submitted.can_transition_to(EvaluationStatus::Queued));
        assert!(EvaluationStatus::Queued.can_transition_to(EvaluationStatus::Provisioning));
        assert!(EvaluationStatus::Provisioning.can_transition_to(EvaluationStatus::Running));
        assert!(EvaluationStatus::Running.can_transition_to(EvaluationStatus::Completed));
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        for terminal in [
            EvaluationStatus::Completed,
            EvaluationStatus::Failed,
            EvaluationStatus::Timeout,
            EvaluationStatus::Cancelled,
        ] {
            assert!(!terminal.can_transition_to(EvaluationStatus::Running));
            assert!(!terminal.can_transition_to(EvaluationStatus::Cancelled));
        }
    }

    #[test]
    fn cancelled_reachable_from_any_non_terminal_state() {
        for state in [
            EvaluationStatus::Submitted,
            EvaluationStatus::Queued,
            EvaluationStatus::Provisioning,
            EvaluationStatus::Running,
        ] {
            assert!(state.can_transition_to(EvaluationStatus::Cancelled));
        }
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        assert!(!EvaluationStatus::Submitted.can_transition_to(EvaluationStatus::Running));
        assert!(!EvaluationStatus::Queued.can_transition_to(EvaluationStatus::Completed));
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        for s in [
            EvaluationStatus::Submitted,
            EvaluationStatus::Queued,
            EvaluationStatus::Provisioning,
            EvaluationStatus::Running,
            EvaluationStatus::Completed,
            EvaluationStatus::Failed,
            EvaluationStatus::Timeout,
            EvaluationStatus::Cancelled,
        ] {
            let parsed: EvaluationStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}
