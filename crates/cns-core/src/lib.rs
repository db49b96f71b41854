//! Core domain model for the Canvas to Notion assignment mirror.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod record;
pub mod schema;
pub mod status;
pub mod time;

pub use record::{
    encode, EncodedValue, FieldValue, RecordField, RecordPayload, RowFilter, RowId, RowProperties,
};
pub use schema::{ColumnSpec, ColumnType, SchemaDescriptor};
pub use status::{classify, Status};
pub use time::{time_of_day, Horizon, TimeError, TimeNormalizer};

pub const CRATE_NAME: &str = "cns-core";

/// Max characters the destination accepts in a title cell.
pub const TITLE_LIMIT: usize = 1000;
/// Max characters written into the notes cell.
pub const NOTES_LIMIT: usize = 2000;

pub const EXAM_KEYWORDS: [&str; 3] = ["exam", "midterm", "final"];

/// A course as returned by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub course_code: Option<String>,
}

impl Course {
    /// Label used for the class column: override, then course code, then name.
    pub fn display_label(&self, overrides: &BTreeMap<u64, String>) -> String {
        overrides
            .get(&self.id)
            .and_then(|s| non_empty(s))
            .or_else(|| self.course_code.as_deref().and_then(non_empty))
            .or_else(|| self.name.as_deref().and_then(non_empty))
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("Course {}", self.id))
    }
}

/// Source-owned assignment. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: u64,
    #[serde(default)]
    pub course_id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub due_at: Option<String>,
    #[serde(default)]
    pub quiz_id: Option<u64>,
    #[serde(default)]
    pub is_quiz_assignment: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub submission: Option<SubmissionSnapshot>,
}

impl Assignment {
    pub fn title(&self) -> String {
        self.name
            .as_deref()
            .and_then(non_empty)
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("Assignment {}", self.id))
    }

    pub fn is_quiz(&self) -> bool {
        self.quiz_id.is_some() || self.is_quiz_assignment.unwrap_or(false)
    }

    pub fn kind(&self) -> AssignmentKind {
        AssignmentKind::classify(self.name.as_deref().unwrap_or_default(), self.is_quiz())
    }
}

/// Workflow state reported on a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkflowState {
    Unsubmitted,
    Submitted,
    Graded,
    PendingReview,
    Other(String),
}

impl From<String> for WorkflowState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "unsubmitted" => Self::Unsubmitted,
            "submitted" => Self::Submitted,
            "graded" => Self::Graded,
            "pending_review" => Self::PendingReview,
            _ => Self::Other(value),
        }
    }
}

impl From<WorkflowState> for String {
    fn from(value: WorkflowState) -> Self {
        match value {
            WorkflowState::Unsubmitted => "unsubmitted".to_string(),
            WorkflowState::Submitted => "submitted".to_string(),
            WorkflowState::Graded => "graded".to_string(),
            WorkflowState::PendingReview => "pending_review".to_string(),
            WorkflowState::Other(other) => other,
        }
    }
}

/// The caller's own submission for one assignment.
///
/// Arrives embedded in an assignment during a full scan, or standalone (with the
/// assignment embedded the other way round) from the changed-since query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SubmissionSnapshot {
    #[serde(default)]
    pub assignment_id: Option<u64>,
    #[serde(default)]
    pub workflow_state: Option<WorkflowState>,
    #[serde(default)]
    pub submitted_at: Option<String>,
    #[serde(default)]
    pub assignment: Option<Box<Assignment>>,
}

impl SubmissionSnapshot {
    pub fn has_submitted_at(&self) -> bool {
        self.submitted_at
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    }

    /// Assignment id from the field itself or from the embedded assignment.
    pub fn resolved_assignment_id(&self) -> Option<u64> {
        self.assignment_id
            .or_else(|| self.assignment.as_ref().map(|a| a.id))
    }
}

/// Stable deduplication handle for one (course, assignment) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub const DELIMITER: char = ':';

    pub fn new(course_id: u64, assignment_id: u64) -> Self {
        Self(format!("{course_id}{}{assignment_id}", Self::DELIMITER))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentKind {
    Assignment,
    Quiz,
    Exam,
}

impl AssignmentKind {
    pub const ALL: [AssignmentKind; 3] = [Self::Assignment, Self::Quiz, Self::Exam];

    pub fn label(self) -> &'static str {
        match self {
            Self::Assignment => "Assignment",
            Self::Quiz => "Quiz",
            Self::Exam => "Exam",
        }
    }

    /// Quiz marker wins; otherwise any exam keyword in the name makes it an exam.
    pub fn classify(name: &str, is_quiz: bool) -> Self {
        if is_quiz {
            return Self::Quiz;
        }
        let lower = name.to_lowercase();
        if EXAM_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Self::Exam
        } else {
            Self::Assignment
        }
    }
}

/// Deterministic link to the assignment page in the source UI.
pub fn submission_url(base_url: &str, course_id: u64, assignment_id: u64) -> String {
    format!(
        "{}/courses/{course_id}/assignments/{assignment_id}",
        base_url.trim_end_matches('/')
    )
}

/// Truncate on a char boundary.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => input[..idx].to_string(),
        None => input.to_string(),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
