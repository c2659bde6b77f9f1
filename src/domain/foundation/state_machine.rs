//! State machine trait for lifecycle status enums.
//!
//! Subscription and payment statuses both implement this so every status write
//! goes through a single edge check.

use std::fmt;

/// Rejected transition between two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError<S> {
    pub from: S,
    pub to: S,
}

impl<S: fmt::Debug> fmt::Display for TransitionError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cannot transition from {:?} to {:?}", self.from, self.to)
    }
}

impl<S: fmt::Debug> std::error::Error for TransitionError<S> {}

/// Trait for status enums that represent state machines.
///
/// Implementors list their edges; `transition_to` and `is_terminal` follow.
pub trait StateMachine: Sized + Copy + PartialEq + fmt::Debug {
    /// Returns true if transition from self to target is an edge.
    fn can_transition_to(&self, target: &Self) -> bool;

    /// Returns all valid target states from current state.
    fn valid_transitions(&self) -> Vec<Self>;

    /// Performs transition with validation.
    fn transition_to(&self, target: Self) -> Result<Self, TransitionError<Self>> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(TransitionError {
                from: *self,
                to: target,
            })
        }
    }

    /// Checks if current state is terminal (no outgoing edges).
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Door {
        Open,
        Closed,
        Locked,
        Welded,
    }

    impl StateMachine for Door {
        fn can_transition_to(&self, target: &Self) -> bool {
            use Door::*;
            matches!(
                (self, target),
                (Open, Closed) | (Closed, Open) | (Closed, Locked) | (Locked, Closed) | (Locked, Welded)
            )
        }

        fn valid_transitions(&self) -> Vec<Self> {
            use Door::*;
            match self {
                Open => vec![Closed],
                Closed => vec![Open, Locked],
                Locked => vec![Closed, Welded],
                Welded => vec![],
            }
        }
    }

    #[test]
    fn valid_edge_returns_target() {
        assert_eq!(Door::Closed.transition_to(Door::Locked), Ok(Door::Locked));
    }

    #[test]
    fn invalid_edge_reports_both_ends() {
        let err = Door::Open.transition_to(Door::Welded).unwrap_err();
        assert_eq!(err.from, Door::Open);
        assert_eq!(err.to, Door::Welded);
        assert_eq!(err.to_string(), "Cannot transition from Open to Welded");
    }

    #[test]
    fn terminal_state_has_no_edges() {
        assert!(Door::Welded.is_terminal());
        assert!(!Door::Locked.is_terminal());
    }

    #[test]
    fn can_transition_to_is_consistent_with_valid_transitions() {
        for door in [Door::Open, Door::Closed, Door::Locked, Door::Welded] {
            for target in door.valid_transitions() {
                assert!(door.can_transition_to(&target), "{:?} -> {:?}", door, target);
            }
        }
    }
}
