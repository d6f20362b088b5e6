/// Site state definitions for the scheduler
///
/// Every configured site cycles through `Idle -> Due -> Running -> Idle`.
use std::fmt;

use super::StateError;

/// Represents the scheduling state of a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SiteState {
    /// Waiting for its cadence to elapse
    #[default]
    Idle,

    /// Cadence elapsed, waiting for a worker slot
    Due,

    /// A crawl job for the site is queued or executing
    Running,
}

impl SiteState {
    /// Returns true if moving from `self` to `next` is a legal transition
    ///
    /// `Due -> Idle` covers a site that was disabled or whose dispatch was
    /// abandoned before a worker accepted it. `Running -> Idle` covers both
    /// completion and cancellation at shutdown.
    pub fn can_transition_to(&self, next: SiteState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Due)
                | (Self::Due, Self::Running)
                | (Self::Due, Self::Idle)
                | (Self::Running, Self::Idle)
        )
    }

    /// Validates a transition for the named site
    ///
    /// # Returns
    ///
    /// The new state, or `StateError::InvalidTransition`
    pub fn transition(&self, site: &str, next: SiteState) -> Result<SiteState, StateError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StateError::InvalidTransition {
                site: site.to_string(),
                from: *self,
                to: next,
            })
        }
    }

    /// Returns true if a job for the site is in flight
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Converts the state to a string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Due => "due",
            Self::Running => "running",
        }
    }

    /// Parses a state from its string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "due" => Some(Self::Due),
            "running" => Some(Self::Running),
            _ => None,
        }
    }

    /// Returns all possible site states
    pub fn all_states() -> Vec<Self> {
        vec![Self::Idle, Self::Due, Self::Running]
    }
}

impl fmt::Display for SiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_cycle() {
        let state = SiteState::Idle;
        let state = state.transition("s", SiteState::Due).unwrap();
        let state = state.transition("s", SiteState::Running).unwrap();
        let state = state.transition("s", SiteState::Idle).unwrap();
        assert_eq!(state, SiteState::Idle);
    }

    #[test]
    fn test_running_cannot_be_redispatched() {
        assert!(!SiteState::Running.can_transition_to(SiteState::Due));
        assert!(!SiteState::Running.can_transition_to(SiteState::Running));

        let err = SiteState::Running
            .transition("arxiv", SiteState::Running)
            .unwrap_err();
        match err {
            StateError::InvalidTransition { site, from, to } => {
                assert_eq!(site, "arxiv");
                assert_eq!(from, SiteState::Running);
                assert_eq!(to, SiteState::Running);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_idle_cannot_skip_due() {
        assert!(!SiteState::Idle.can_transition_to(SiteState::Running));
        assert!(!SiteState::Idle.can_transition_to(SiteState::Idle));
    }

    #[test]
    fn test_due_can_fall_back_to_idle() {
        assert!(SiteState::Due.can_transition_to(SiteState::Idle));
    }

    #[test]
    fn test_is_running() {
        assert!(SiteState::Running.is_running());
        assert!(!SiteState::Idle.is_running());
        assert!(!SiteState::Due.is_running());
    }

    #[test]
    fn test_roundtrip_db_string() {
        for state in SiteState::all_states() {
            let db_str = state.to_db_string();
            let parsed = SiteState::from_db_string(db_str);
            assert_eq!(Some(state), parsed, "Failed roundtrip for {:?}", state);
        }
        assert_eq!(SiteState::from_db_string("invalid"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", SiteState::Idle), "idle");
        assert_eq!(format!("{}", SiteState::Running), "running");
    }

    #[test]
    fn test_default_is_idle() {
        assert_eq!(SiteState::default(), SiteState::Idle);
    }
}
