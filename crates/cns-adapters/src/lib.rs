//! Source and destination collaborator contracts plus their implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cns_core::{
    Assignment, ColumnSpec, Course, RowFilter, RowId, RowProperties, SchemaDescriptor,
    SubmissionSnapshot,
};
use cns_storage::FetchError;
use thiserror::Error;

pub mod canvas;
pub mod memory;
pub mod notion;

pub use canvas::{html_to_text, CanvasClient, CanvasConfig};
pub use memory::{CallLog, InMemoryDestination, StaticSource};
pub use notion::{NotionClient, NotionConfig};

pub const CRATE_NAME: &str = "cns-adapters";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Error)]
pub enum DestinationError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected destination response: {0}")]
    Malformed(String),
    #[error("{0}")]
    Message(String),
}

/// Read-only view of the learning-management source.
#[async_trait]
pub trait SourceApi: Send + Sync {
    async fn get_course(&self, course_id: u64) -> Result<Course, SourceError>;

    /// Every assignment in the course, with the caller's submission embedded.
    async fn list_assignments(&self, course_id: u64) -> Result<Vec<Assignment>, SourceError>;

    /// Submissions submitted or graded since `since`, with assignment data embedded.
    async fn list_submissions_since(
        &self,
        course_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SubmissionSnapshot>, SourceError>;
}

/// The tabular store rows are mirrored into. One implementation instance is
/// bound to one table.
#[async_trait]
pub trait DestinationApi: Send + Sync {
    async fn retrieve_schema(&self) -> Result<SchemaDescriptor, DestinationError>;

    async fn add_column(&self, name: &str, spec: &ColumnSpec) -> Result<(), DestinationError>;

    /// First row matching `filter`, if any.
    async fn find_row(&self, filter: &RowFilter) -> Result<Option<RowId>, DestinationError>;

    async fn create_row(&self, properties: &RowProperties) -> Result<RowId, DestinationError>;

    /// Patch only the columns present in `properties`.
    async fn update_row(
        &self,
        row: &RowId,
        properties: &RowProperties,
    ) -> Result<(), DestinationError>;
}
