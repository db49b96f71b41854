use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{SubmissionSnapshot, WorkflowState};

/// Completion state shown in the status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    ToDo,
    InProgress,
    Complete,
    DidNotFinish,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Self::ToDo,
        Self::InProgress,
        Self::Complete,
        Self::DidNotFinish,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::ToDo => "To do",
            Self::InProgress => "In Progress",
            Self::Complete => "Complete",
            Self::DidNotFinish => "DNF",
        }
    }
}

/// Derive the status from submission evidence and the deadline.
///
/// Grading or submission evidence always outranks the deadline, so a late but
/// submitted assignment is `Complete`, never `DidNotFinish`.
pub fn classify(
    submission: Option<&SubmissionSnapshot>,
    due: Option<&DateTime<Tz>>,
    now: &DateTime<Tz>,
) -> Status {
    if let Some(sub) = submission {
        let state = sub.workflow_state.as_ref();
        if matches!(state, Some(WorkflowState::Graded | WorkflowState::Submitted))
            || sub.has_submitted_at()
        {
            return Status::Complete;
        }
        if matches!(state, Some(WorkflowState::PendingReview)) {
            return Status::InProgress;
        }
    }
    match due {
        Some(due) if due < now => Status::DidNotFinish,
        _ => Status::ToDo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::Phoenix;

    fn at(d: u32, h: u32) -> DateTime<Tz> {
        Phoenix.with_ymd_and_hms(2024, 3, d, h, 0, 0).single().expect("dt")
    }

    fn sub(state: Option<WorkflowState>, submitted_at: Option<&str>) -> SubmissionSnapshot {
        SubmissionSnapshot {
            workflow_state: state,
            submitted_at: submitted_at.map(ToString::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn past_due_without_submission_did_not_finish() {
        // due 2024-03-01T07:00Z is midnight local; now is the next local midnight
        let due = at(1, 0);
        let now = at(2, 0);
        assert_eq!(classify(None, Some(&due), &now), Status::DidNotFinish);
    }

    #[test]
    fn submitted_at_outranks_deadline() {
        let due = at(1, 0);
        let now = at(2, 0);
        let s = sub(Some(WorkflowState::Unsubmitted), Some("2024-03-01T06:00:00Z"));
        assert_eq!(classify(Some(&s), Some(&due), &now), Status::Complete);
    }

    #[test]
    fn graded_or_submitted_state_is_complete() {
        let now = at(2, 0);
        for state in [WorkflowState::Graded, WorkflowState::Submitted] {
            let s = sub(Some(state), None);
            assert_eq!(classify(Some(&s), Some(&at(1, 0)), &now), Status::Complete);
        }
    }

    #[test]
    fn pending_review_is_in_progress_even_past_due() {
        let s = sub(Some(WorkflowState::PendingReview), None);
        assert_eq!(classify(Some(&s), Some(&at(1, 0)), &at(2, 0)), Status::InProgress);
    }

    #[test]
    fn future_or_missing_due_is_to_do() {
        let now = at(2, 0);
        let s = sub(Some(WorkflowState::Unsubmitted), Some(""));
        assert_eq!(classify(Some(&s), Some(&at(3, 0)), &now), Status::ToDo);
        assert_eq!(classify(None, None, &now), Status::ToDo);
        // due exactly now is not strictly before now
        assert_eq!(classify(None, Some(&now), &now), Status::ToDo);
    }

    #[test]
    fn submitted_at_never_yields_did_not_finish() {
        let now = at(20, 0);
        for state in [
            None,
            Some(WorkflowState::Unsubmitted),
            Some(WorkflowState::PendingReview),
            Some(WorkflowState::Other("deleted".into())),
        ] {
            let s = sub(state, Some("2024-03-05T10:00:00Z"));
            assert_ne!(classify(Some(&s), Some(&at(1, 0)), &now), Status::DidNotFinish);
        }
    }
}
