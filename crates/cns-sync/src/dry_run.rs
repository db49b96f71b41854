use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cns_adapters::{DestinationApi, DestinationError};
use cns_core::{ColumnSpec, ColumnType, RowFilter, RowId, RowProperties, SchemaDescriptor};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Passes reads through to the wrapped destination and only logs mutations.
///
/// Columns "created" during the run are overlaid on later schema reads so
/// payloads are built as they would be for real. Lookups that name such a
/// column find nothing, since the real table cannot be filtered on it.
pub struct DryRunDestination {
    inner: Arc<dyn DestinationApi>,
    pending_columns: Mutex<BTreeMap<String, ColumnType>>,
    suppressed: AtomicUsize,
}

impl DryRunDestination {
    pub fn new(inner: Arc<dyn DestinationApi>) -> Self {
        Self {
            inner,
            pending_columns: Mutex::new(BTreeMap::new()),
            suppressed: AtomicUsize::new(0),
        }
    }

    /// Mutations that were logged instead of sent.
    pub fn suppressed(&self) -> usize {
        self.suppressed.load(Ordering::Relaxed)
    }

    fn count(&self) -> usize {
        self.suppressed.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl DestinationApi for DryRunDestination {
    async fn retrieve_schema(&self) -> Result<SchemaDescriptor, DestinationError> {
        let schema = self.inner.retrieve_schema().await?;
        let pending = self.pending_columns.lock().await;
        if pending.is_empty() {
            return Ok(schema);
        }
        let mut columns = schema.columns().clone();
        for (name, column_type) in pending.iter() {
            columns
                .entry(name.clone())
                .or_insert_with(|| column_type.clone());
        }
        Ok(SchemaDescriptor::new(columns))
    }

    async fn add_column(&self, name: &str, spec: &ColumnSpec) -> Result<(), DestinationError> {
        info!(
            column = name,
            kind = spec.column_type.as_wire(),
            "dry run: would create column"
        );
        self.count();
        self.pending_columns
            .lock()
            .await
            .insert(name.to_string(), spec.column_type.clone());
        Ok(())
    }

    async fn find_row(&self, filter: &RowFilter) -> Result<Option<RowId>, DestinationError> {
        {
            let pending = self.pending_columns.lock().await;
            if let Some(column) = filter.columns().into_iter().find(|c| pending.contains_key(*c)) {
                debug!(column, "dry run: lookup on uncreated column matches nothing");
                return Ok(None);
            }
        }
        self.inner.find_row(filter).await
    }

    async fn create_row(&self, properties: &RowProperties) -> Result<RowId, DestinationError> {
        let n = self.count();
        info!(columns = properties.len(), "dry run: would create row");
        Ok(RowId(format!("dry-run-{n}")))
    }

    async fn update_row(
        &self,
        row: &RowId,
        properties: &RowProperties,
    ) -> Result<(), DestinationError> {
        self.count();
        info!(row = %row, columns = properties.len(), "dry run: would update row");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cns_adapters::InMemoryDestination;
    use cns_core::EncodedValue;

    #[tokio::test]
    async fn mutations_never_reach_the_inner_destination() {
        let inner =
            Arc::new(InMemoryDestination::new().with_columns([("Task", ColumnType::Title)]));
        let dry = DryRunDestination::new(inner.clone());

        dry.add_column("Key", &ColumnSpec::plain(ColumnType::RichText))
            .await
            .expect("add");
        let schema = dry.retrieve_schema().await.expect("schema");
        assert_eq!(schema.column_type("Key"), Some(&ColumnType::RichText));

        let mut props = RowProperties::new();
        props.insert("Task".into(), EncodedValue::Title("HW".into()));
        let row = dry.create_row(&props).await.expect("create");
        dry.update_row(&row, &props).await.expect("update");

        assert_eq!(dry.suppressed(), 3);
        assert!(inner.rows().is_empty());
        assert!(!inner.columns().contains_key("Key"));
    }

    #[tokio::test]
    async fn lookups_on_uncreated_columns_find_nothing() {
        let inner =
            Arc::new(InMemoryDestination::new().with_columns([("Task", ColumnType::Title)]));
        let dry = DryRunDestination::new(inner.clone());
        dry.add_column("Key", &ColumnSpec::plain(ColumnType::RichText))
            .await
            .expect("add");

        let by_key = RowFilter::equals("Key", EncodedValue::RichText("42:555".into()));
        assert_eq!(dry.find_row(&by_key).await.expect("find"), None);
        assert_eq!(inner.calls().finds, 0);

        let by_task = RowFilter::equals("Task", EncodedValue::Title("HW".into()));
        assert_eq!(dry.find_row(&by_task).await.expect("find"), None);
        assert_eq!(inner.calls().finds, 1);
    }
}
