use std::sync::Arc;

use cns_adapters::{DestinationApi, DestinationError};
use cns_core::{ColumnType, RecordField, SchemaDescriptor};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// What `ensure_schema` did to the destination.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaReport {
    pub created: Vec<String>,
    pub failed: Vec<String>,
    /// `(column, actual type)` for columns kept in a type other than the preferred one.
    pub adapted: Vec<(String, String)>,
}

/// Owns the cached destination schema for one run.
///
/// The cache sits behind an async lock, so concurrent callers see either the
/// loaded descriptor or wait for the single load/creation pass to finish.
pub struct SchemaReconciler {
    destination: Arc<dyn DestinationApi>,
    cache: Mutex<Option<SchemaDescriptor>>,
}

impl SchemaReconciler {
    pub fn new(destination: Arc<dyn DestinationApi>) -> Self {
        Self {
            destination,
            cache: Mutex::new(None),
        }
    }

    pub async fn invalidate(&self) {
        self.cache.lock().await.take();
    }

    /// Create every missing engine column; keep existing ones as they are.
    pub async fn ensure_schema(
        &self,
    ) -> Result<(SchemaDescriptor, SchemaReport), DestinationError> {
        let mut cache = self.cache.lock().await;
        let mut schema = match cache.take() {
            Some(schema) => schema,
            None => self.destination.retrieve_schema().await?,
        };
        let mut report = SchemaReport::default();

        for field in RecordField::ALL {
            let name = field.column_name();
            let spec = field.preferred_spec();
            match schema.column_type(name) {
                None => match self.destination.add_column(name, &spec).await {
                    Ok(()) => {
                        info!(column = name, kind = spec.column_type.as_wire(), "created column");
                        report.created.push(name.to_string());
                        schema = self.destination.retrieve_schema().await?;
                    }
                    Err(err) => {
                        warn!(column = name, error = %err, "failed to create column");
                        report.failed.push(name.to_string());
                    }
                },
                Some(actual) if *actual != spec.column_type => {
                    warn!(
                        column = name,
                        expected = spec.column_type.as_wire(),
                        actual = actual.as_wire(),
                        "column exists with a different type; adapting at runtime"
                    );
                    report
                        .adapted
                        .push((name.to_string(), actual.as_wire().to_string()));
                }
                Some(_) => {}
            }
        }

        *cache = Some(schema.clone());
        Ok((schema, report))
    }
}
