//! Logical record fields and their encoding against actual column types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::schema::{ColumnSpec, ColumnType};
use crate::status::Status;
use crate::AssignmentKind;

/// Fields the engine maintains on each destination row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordField {
    Title,
    Class,
    Kind,
    Due,
    Time,
    Notes,
    Link,
    Status,
    Key,
}

impl RecordField {
    /// Creation order used by the schema reconciler.
    pub const ALL: [RecordField; 9] = [
        Self::Title,
        Self::Class,
        Self::Kind,
        Self::Due,
        Self::Time,
        Self::Notes,
        Self::Link,
        Self::Status,
        Self::Key,
    ];

    /// Fields a delta refresh is allowed to touch.
    pub const DELTA: [RecordField; 4] = [Self::Status, Self::Due, Self::Time, Self::Link];

    pub fn column_name(self) -> &'static str {
        match self {
            Self::Title => "Task",
            Self::Class => "Class",
            Self::Kind => "Type",
            Self::Due => "Due",
            Self::Time => "Time",
            Self::Notes => "Notes",
            Self::Link => "Link",
            Self::Status => "Status",
            // hide this column in destination views
            Self::Key => "Key",
        }
    }

    pub fn preferred_spec(self) -> ColumnSpec {
        match self {
            Self::Title => ColumnSpec::plain(ColumnType::Title),
            Self::Class => ColumnSpec::plain(ColumnType::Select),
            Self::Kind => ColumnSpec {
                column_type: ColumnType::Select,
                options: AssignmentKind::ALL.iter().map(|k| k.label().to_string()).collect(),
            },
            Self::Due => ColumnSpec::plain(ColumnType::Date),
            Self::Time | Self::Notes | Self::Key => ColumnSpec::plain(ColumnType::RichText),
            Self::Link => ColumnSpec::plain(ColumnType::Url),
            Self::Status => ColumnSpec {
                column_type: ColumnType::Status,
                options: Status::ALL.iter().map(|s| s.label().to_string()).collect(),
            },
        }
    }
}

/// A value before it is shaped for a particular column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Choice(String),
    Date(DateTime<Tz>),
    Url(String),
}

impl FieldValue {
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) | Self::Choice(s) | Self::Url(s) => s.clone(),
            Self::Date(dt) => dt.fixed_offset().to_rfc3339(),
        }
    }
}

/// A value shaped for one destination column type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodedValue {
    Title(String),
    RichText(String),
    Select(String),
    MultiSelect(Vec<String>),
    Status(String),
    Date(String),
    Url(String),
}

impl EncodedValue {
    pub fn as_text(&self) -> String {
        match self {
            Self::Title(s)
            | Self::RichText(s)
            | Self::Select(s)
            | Self::Status(s)
            | Self::Date(s)
            | Self::Url(s) => s.clone(),
            Self::MultiSelect(names) => names.join(", "),
        }
    }
}

/// Shape `value` for a column of type `column`.
///
/// Returns `None` when the column cannot hold the value (a non-date into a date
/// column, or a column type the engine does not write).
pub fn encode(value: &FieldValue, column: &ColumnType) -> Option<EncodedValue> {
    let text = value.as_text();
    match column {
        ColumnType::Title => Some(EncodedValue::Title(text)),
        ColumnType::RichText => Some(EncodedValue::RichText(text)),
        ColumnType::Select => Some(EncodedValue::Select(text)),
        ColumnType::MultiSelect => Some(EncodedValue::MultiSelect(vec![text])),
        ColumnType::Status => Some(EncodedValue::Status(text)),
        ColumnType::Date => match value {
            FieldValue::Date(_) => Some(EncodedValue::Date(text)),
            FieldValue::Text(_) | FieldValue::Choice(_) | FieldValue::Url(_) => None,
        },
        ColumnType::Url => Some(EncodedValue::Url(text)),
        ColumnType::Unsupported(_) => None,
    }
}

/// Logical payload produced by the record mapper.
pub type RecordPayload = BTreeMap<RecordField, FieldValue>;

/// Column name to encoded value, as sent to the destination.
pub type RowProperties = BTreeMap<String, EncodedValue>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub String);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exact-match row lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    Equals { column: String, value: EncodedValue },
    And(Vec<RowFilter>),
}

impl RowFilter {
    pub fn equals(column: impl Into<String>, value: EncodedValue) -> Self {
        Self::Equals {
            column: column.into(),
            value,
        }
    }

    /// Every column the filter names.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::Equals { column, .. } => vec![column.as_str()],
            Self::And(filters) => filters.iter().flat_map(RowFilter::columns).collect(),
        }
    }

    pub fn matches(&self, row: &RowProperties) -> bool {
        match self {
            Self::Equals { column, value } => row
                .get(column)
                .is_some_and(|v| v.as_text() == value.as_text()),
            Self::And(filters) => filters.iter().all(|f| f.matches(row)),
        }
    }
}
