//! Destination column model and the per-run schema snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Column types the engine knows how to write. Anything else is carried as
/// `Unsupported` so encoding can skip it instead of failing the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Title,
    RichText,
    Select,
    MultiSelect,
    Status,
    Date,
    Url,
    Unsupported(String),
}

impl ColumnType {
    pub fn from_wire(name: &str) -> Self {
        match name {
            "title" => Self::Title,
            "rich_text" => Self::RichText,
            "select" => Self::Select,
            "multi_select" => Self::MultiSelect,
            "status" => Self::Status,
            "date" => Self::Date,
            "url" => Self::Url,
            other => Self::Unsupported(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Title => "title",
            Self::RichText => "rich_text",
            Self::Select => "select",
            Self::MultiSelect => "multi_select",
            Self::Status => "status",
            Self::Date => "date",
            Self::Url => "url",
            Self::Unsupported(other) => other,
        }
    }

    /// Values come from a fixed named-option set.
    pub fn is_choice(&self) -> bool {
        matches!(self, Self::Select | Self::MultiSelect)
    }
}

/// Type and initial options used when the engine creates a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub column_type: ColumnType,
    #[serde(default)]
    pub options: Vec<String>,
}

impl ColumnSpec {
    pub fn plain(column_type: ColumnType) -> Self {
        Self {
            column_type,
            options: Vec::new(),
        }
    }

    pub fn with_options(column_type: ColumnType, options: &[&str]) -> Self {
        Self {
            column_type,
            options: options.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Snapshot of the destination's columns, loaded once per run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    columns: BTreeMap<String, ColumnType>,
}

impl SchemaDescriptor {
    pub fn new(columns: BTreeMap<String, ColumnType>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &BTreeMap<String, ColumnType> {
        &self.columns
    }

    pub fn column_type(&self, name: &str) -> Option<&ColumnType> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn is_choice(&self, name: &str) -> bool {
        self.column_type(name).is_some_and(ColumnType::is_choice)
    }
}
