//! Dispatch-call state machine and terminal outcomes
//!
//! These are the states of one `dispatch` call, not of the remote executor.
//! The executor's own status is only an event source that drives
//! [`DispatchState::advance`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a single dispatch call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Idle,
    Pending,
    Active,
    Succeeded,
    Rejected,
    Aborted,
    /// Canceled by the client, or abandoned without an outcome
    Preempted,
    TimedOut,
}

/// Inputs that move a dispatch between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Sent,
    Accepted,
    Rejected,
    Succeeded,
    Aborted,
    Preempted,
    DeadlineElapsed,
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchState::Succeeded
                | DispatchState::Rejected
                | DispatchState::Aborted
                | DispatchState::Preempted
                | DispatchState::TimedOut
        )
    }

    /// Apply `transition`, returning `None` when it is not allowed from this state.
    ///
    /// Terminal states accept nothing. Preemption is deliverable while Pending
    /// as well as Active.
    pub fn advance(self, transition: Transition) -> Option<DispatchState> {
        use DispatchState::*;

        match (self, transition) {
            (Idle, Transition::Sent) => Some(Pending),
            (Pending, Transition::Accepted) => Some(Active),
            (Pending, Transition::Rejected) => Some(Rejected),
            (Active, Transition::Succeeded) => Some(Succeeded),
            (Active, Transition::Aborted) => Some(Aborted),
            (Pending | Active, Transition::Preempted) => Some(Preempted),
            (Pending | Active, Transition::DeadlineElapsed) => Some(TimedOut),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Idle => "idle",
            DispatchState::Pending => "pending",
            DispatchState::Active => "active",
            DispatchState::Succeeded => "succeeded",
            DispatchState::Rejected => "rejected",
            DispatchState::Aborted => "aborted",
            DispatchState::Preempted => "preempted",
            DispatchState::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Terminal result of a dispatch. Remote failures are values here, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum ExecutionOutcome {
    Succeeded,
    Rejected(Option<String>),
    Aborted(Option<String>),
    Preempted,
    TimedOut,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }

    /// Executor-supplied reason, when there is one
    pub fn reason(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Rejected(reason) | ExecutionOutcome::Aborted(reason) => {
                reason.as_deref()
            }
            _ => None,
        }
    }

    /// The terminal dispatch state this outcome corresponds to
    pub fn state(&self) -> DispatchState {
        match self {
            ExecutionOutcome::Succeeded => DispatchState::Succeeded,
            ExecutionOutcome::Rejected(_) => DispatchState::Rejected,
            ExecutionOutcome::Aborted(_) => DispatchState::Aborted,
            ExecutionOutcome::Preempted => DispatchState::Preempted,
            ExecutionOutcome::TimedOut => DispatchState::TimedOut,
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}: {}", self.state(), reason),
            None => write!(f, "{}", self.state()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = DispatchState::Idle
            .advance(Transition::Sent)
            .and_then(|s| s.advance(Transition::Accepted))
            .and_then(|s| s.advance(Transition::Succeeded));
        assert_eq!(state, Some(DispatchState::Succeeded));
    }

    #[test]
    fn test_success_requires_active() {
        assert_eq!(DispatchState::Pending.advance(Transition::Succeeded), None);
        assert_eq!(DispatchState::Active.advance(Transition::Rejected), None);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let terminals = [
            DispatchState::Succeeded,
            DispatchState::Rejected,
            DispatchState::Aborted,
            DispatchState::Preempted,
            DispatchState::TimedOut,
        ];
        let transitions = [
            Transition::Sent,
            Transition::Accepted,
            Transition::Rejected,
            Transition::Succeeded,
            Transition::Aborted,
            Transition::Preempted,
            Transition::DeadlineElapsed,
        ];
        for state in terminals {
            assert!(state.is_terminal());
            for transition in transitions {
                assert_eq!(state.advance(transition), None, "{state} accepted {transition:?}");
            }
        }
    }

    #[test]
    fn test_outcome_display_includes_reason() {
        let outcome = ExecutionOutcome::Aborted(Some("joint_lift stalled".to_string()));
        assert_eq!(outcome.to_string(), "aborted: joint_lift stalled");
        assert_eq!(ExecutionOutcome::TimedOut.to_string(), "timed_out");
    }
}
