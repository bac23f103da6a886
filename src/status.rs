//! The task lifecycle state machine: valid statuses, the transition table,
//! and the predicates the orchestrator consults on every mutation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Todo,
    InProgress,
    NeedsInput,
    ForReview,
    Reviewing,
    Reviewed,
    Stopped,
    Error,
    Closed,
    /// Legacy value kept only for reading old task blobs; never written.
    #[serde(rename = "done")]
    Done,
}

impl Status {
    /// The statuses a value may transition into. Empty for `Closed` (the
    /// only terminal status) and for the legacy `Done` value, which is
    /// accepted on read but invalid as a source or target of any new
    /// transition.
    pub fn transitions(self) -> &'static [Status] {
        use Status::*;
        match self {
            Todo => &[InProgress, Closed],
            InProgress => &[ForReview, NeedsInput, Stopped, Error, Closed],
            NeedsInput => &[InProgress, ForReview, Closed],
            ForReview => &[Reviewing, InProgress, Closed],
            Reviewing => &[Reviewed, InProgress, Closed],
            Reviewed => &[InProgress, Closed],
            Stopped => &[InProgress, Closed],
            Error => &[InProgress, Closed],
            Closed => &[],
            Done => &[],
        }
    }

    pub fn can_transition_to(self, to: Status) -> bool {
        self.transitions().contains(&to)
    }

    /// `closed` is the sole terminal status; `done` displays as terminal but
    /// can never be produced by a transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Closed | Status::Done)
    }

    pub fn can_start(self) -> bool {
        matches!(
            self,
            Status::Todo | Status::ForReview | Status::Reviewed | Status::Stopped | Status::Error
        )
    }

    pub fn display(self) -> &'static str {
        match self {
            Status::Todo => "To Do",
            Status::InProgress => "In Progress",
            Status::NeedsInput => "Needs Input",
            Status::ForReview => "For Review",
            Status::Reviewing => "Reviewing",
            Status::Reviewed => "Reviewed",
            Status::Stopped => "Stopped",
            Status::Error => "Error",
            Status::Closed => "Closed",
            Status::Done => "Done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    #[default]
    None,
    Merged,
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[Status] = &[
        Status::Todo,
        Status::InProgress,
        Status::NeedsInput,
        Status::ForReview,
        Status::Reviewing,
        Status::Reviewed,
        Status::Stopped,
        Status::Error,
        Status::Closed,
    ];

    #[test]
    fn transition_table_is_exhaustive_and_exclusive() {
        for &from in ALL {
            for &to in ALL {
                let expected = from.transitions().contains(&to);
                assert_eq!(from.can_transition_to(to), expected, "{:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn closed_is_the_only_terminal_status() {
        for &s in ALL {
            assert_eq!(s.is_terminal(), s == Status::Closed);
        }
        assert!(Status::Done.is_terminal());
    }

    #[test]
    fn can_start_matches_the_named_set() {
        let startable: Vec<Status> = ALL.iter().copied().filter(|s| s.can_start()).collect();
        assert_eq!(
            startable,
            vec![
                Status::Todo,
                Status::ForReview,
                Status::Reviewed,
                Status::Stopped,
                Status::Error,
            ]
        );
        assert!(!Status::InProgress.can_start());
        assert!(!Status::NeedsInput.can_start());
        assert!(!Status::Reviewing.can_start());
        assert!(!Status::Closed.can_start());
    }

    #[test]
    fn todo_cannot_reach_legacy_done() {
        assert!(!Status::Todo.can_transition_to(Status::Done));
        assert!(Status::Todo.can_transition_to(Status::InProgress));
    }

    #[test]
    fn display_strings_are_fixed() {
        assert_eq!(Status::Todo.display(), "To Do");
        assert_eq!(Status::InProgress.display(), "In Progress");
        assert_eq!(Status::NeedsInput.display(), "Needs Input");
        assert_eq!(Status::ForReview.display(), "For Review");
        assert_eq!(Status::Reviewing.display(), "Reviewing");
        assert_eq!(Status::Reviewed.display(), "Reviewed");
        assert_eq!(Status::Stopped.display(), "Stopped");
        assert_eq!(Status::Error.display(), "Error");
        assert_eq!(Status::Closed.display(), "Closed");
    }

    #[test]
    fn legacy_done_deserializes_but_is_distinct() {
        let done: Status = serde_json::from_str("\"done\"").unwrap();
        assert_eq!(done, Status::Done);
    }
}
