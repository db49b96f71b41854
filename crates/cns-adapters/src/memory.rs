//! In-process source and destination for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cns_core::{
    Assignment, ColumnSpec, ColumnType, Course, EncodedValue, RecordField, RowFilter, RowId,
    RowProperties, SchemaDescriptor, SubmissionSnapshot,
};

use crate::{DestinationApi, DestinationError, SourceApi, SourceError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct StaticSource {
    courses: BTreeMap<u64, Course>,
    assignments: BTreeMap<u64, Vec<Assignment>>,
    submissions: BTreeMap<u64, Vec<SubmissionSnapshot>>,
    failing: BTreeSet<u64>,
    delta_requests: Mutex<Vec<(u64, DateTime<Utc>)>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_course(mut self, course: Course) -> Self {
        self.courses.insert(course.id, course);
        self
    }

    pub fn with_assignments(mut self, course_id: u64, assignments: Vec<Assignment>) -> Self {
        self.assignments.entry(course_id).or_default().extend(assignments);
        self
    }

    pub fn with_submissions(
        mut self,
        course_id: u64,
        submissions: Vec<SubmissionSnapshot>,
    ) -> Self {
        self.submissions.entry(course_id).or_default().extend(submissions);
        self
    }

    /// Every listing call for `course_id` fails.
    pub fn failing_course(mut self, course_id: u64) -> Self {
        self.failing.insert(course_id);
        self
    }

    /// `(course, since)` pairs passed to `list_submissions_since`, in call order.
    pub fn delta_requests(&self) -> Vec<(u64, DateTime<Utc>)> {
        lock(&self.delta_requests).clone()
    }

    fn check(&self, course_id: u64) -> Result<(), SourceError> {
        if self.failing.contains(&course_id) {
            return Err(SourceError::Message(format!("course {course_id} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceApi for StaticSource {
    async fn get_course(&self, course_id: u64) -> Result<Course, SourceError> {
        self.courses
            .get(&course_id)
            .cloned()
            .ok_or_else(|| SourceError::Message(format!("course {course_id} not found")))
    }

    async fn list_assignments(&self, course_id: u64) -> Result<Vec<Assignment>, SourceError> {
        self.check(course_id)?;
        Ok(self.assignments.get(&course_id).cloned().unwrap_or_default())
    }

    async fn list_submissions_since(
        &self,
        course_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SubmissionSnapshot>, SourceError> {
        lock(&self.delta_requests).push((course_id, since));
        self.check(course_id)?;
        Ok(self.submissions.get(&course_id).cloned().unwrap_or_default())
    }
}

/// Number of calls made against an [`InMemoryDestination`], by operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallLog {
    pub schema_reads: usize,
    pub columns_added: usize,
    pub finds: usize,
    pub creates: usize,
    pub updates: usize,
}

#[derive(Debug, Default)]
struct TableState {
    columns: BTreeMap<String, ColumnType>,
    rows: Vec<(RowId, RowProperties)>,
    next_id: u64,
    calls: CallLog,
}

/// A single table held in memory. Writes are validated against the column
/// types the way a hosted table would reject them.
#[derive(Debug, Default)]
pub struct InMemoryDestination {
    state: Mutex<TableState>,
    failing_keys: BTreeSet<String>,
    failing_columns: BTreeSet<String>,
    fail_schema: bool,
}

impl InMemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that already has every engine column in its preferred type.
    pub fn with_default_columns() -> Self {
        Self::new().with_columns(
            RecordField::ALL
                .iter()
                .map(|f| (f.column_name(), f.preferred_spec().column_type)),
        )
    }

    pub fn with_columns<'a>(
        self,
        columns: impl IntoIterator<Item = (&'a str, ColumnType)>,
    ) -> Self {
        {
            let mut state = lock(&self.state);
            for (name, column_type) in columns {
                state.columns.insert(name.to_string(), column_type);
            }
        }
        self
    }

    pub fn with_row(self, properties: RowProperties) -> Self {
        {
            let mut state = lock(&self.state);
            let id = state.allocate();
            state.rows.push((id, properties));
        }
        self
    }

    /// Writes carrying this key in the `Key` column fail.
    pub fn failing_key(mut self, key: impl Into<String>) -> Self {
        self.failing_keys.insert(key.into());
        self
    }

    pub fn failing_column(mut self, name: impl Into<String>) -> Self {
        self.failing_columns.insert(name.into());
        self
    }

    pub fn failing_schema(mut self) -> Self {
        self.fail_schema = true;
        self
    }

    pub fn rows(&self) -> Vec<(RowId, RowProperties)> {
        lock(&self.state).rows.clone()
    }

    pub fn row(&self, id: &RowId) -> Option<RowProperties> {
        lock(&self.state)
            .rows
            .iter()
            .find(|(row_id, _)| row_id == id)
            .map(|(_, props)| props.clone())
    }

    pub fn columns(&self) -> BTreeMap<String, ColumnType> {
        lock(&self.state).columns.clone()
    }

    pub fn calls(&self) -> CallLog {
        lock(&self.state).calls
    }

    fn check_key(&self, key: Option<&EncodedValue>) -> Result<(), DestinationError> {
        match key.map(EncodedValue::as_text) {
            Some(key) if self.failing_keys.contains(&key) => {
                Err(DestinationError::Message(format!("write rejected for {key}")))
            }
            _ => Ok(()),
        }
    }
}

impl TableState {
    fn allocate(&mut self) -> RowId {
        self.next_id += 1;
        RowId(format!("row-{}", self.next_id))
    }

    fn validate(&self, properties: &RowProperties) -> Result<(), DestinationError> {
        for (name, value) in properties {
            let column = self.columns.get(name).ok_or_else(|| {
                DestinationError::Message(format!("{name} is not a property that exists"))
            })?;
            if !accepts(column, value) {
                return Err(DestinationError::Message(format!(
                    "{name} is expected to be {}",
                    column.as_wire()
                )));
            }
        }
        Ok(())
    }
}

fn accepts(column: &ColumnType, value: &EncodedValue) -> bool {
    matches!(
        (column, value),
        (ColumnType::Title, EncodedValue::Title(_))
            | (ColumnType::RichText, EncodedValue::RichText(_))
            | (ColumnType::Select, EncodedValue::Select(_))
            | (ColumnType::MultiSelect, EncodedValue::MultiSelect(_))
            | (ColumnType::Status, EncodedValue::Status(_))
            | (ColumnType::Date, EncodedValue::Date(_))
            | (ColumnType::Url, EncodedValue::Url(_))
    )
}

#[async_trait]
impl DestinationApi for InMemoryDestination {
    async fn retrieve_schema(&self) -> Result<SchemaDescriptor, DestinationError> {
        let mut state = lock(&self.state);
        state.calls.schema_reads += 1;
        if self.fail_schema {
            return Err(DestinationError::Message("schema unavailable".into()));
        }
        Ok(SchemaDescriptor::new(state.columns.clone()))
    }

    async fn add_column(&self, name: &str, spec: &ColumnSpec) -> Result<(), DestinationError> {
        let mut state = lock(&self.state);
        if self.failing_columns.contains(name) {
            return Err(DestinationError::Message(format!("cannot add {name}")));
        }
        state.calls.columns_added += 1;
        state.columns.insert(name.to_string(), spec.column_type.clone());
        Ok(())
    }

    async fn find_row(&self, filter: &RowFilter) -> Result<Option<RowId>, DestinationError> {
        let mut state = lock(&self.state);
        state.calls.finds += 1;
        if let Some(missing) = filter
            .columns()
            .into_iter()
            .find(|column| !state.columns.contains_key(*column))
        {
            return Err(DestinationError::Message(format!(
                "could not find property with name {missing}"
            )));
        }
        Ok(state
            .rows
            .iter()
            .find(|(_, props)| filter.matches(props))
            .map(|(id, _)| id.clone()))
    }

    async fn create_row(&self, properties: &RowProperties) -> Result<RowId, DestinationError> {
        self.check_key(properties.get(RecordField::Key.column_name()))?;
        let mut state = lock(&self.state);
        state.validate(properties)?;
        state.calls.creates += 1;
        let id = state.allocate();
        state.rows.push((id.clone(), properties.clone()));
        Ok(id)
    }

    async fn update_row(
        &self,
        row: &RowId,
        properties: &RowProperties,
    ) -> Result<(), DestinationError> {
        let mut state = lock(&self.state);
        let existing_key = state
            .rows
            .iter()
            .find(|(id, _)| id == row)
            .and_then(|(_, props)| props.get(RecordField::Key.column_name()).cloned());
        self.check_key(properties.get(RecordField::Key.column_name()).or(existing_key.as_ref()))?;
        state.validate(properties)?;
        let target = state
            .rows
            .iter_mut()
            .find(|(id, _)| id == row)
            .ok_or_else(|| DestinationError::Message(format!("row {row} not found")))?;
        target.1.extend(properties.clone());
        state.calls.updates += 1;
        Ok(())
    }
}
