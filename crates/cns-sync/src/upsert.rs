use std::sync::Arc;

use cns_adapters::DestinationApi;
use cns_core::{
    encode, EncodedValue, FieldValue, IdentityKey, RecordField, RowFilter, RowId, RowProperties,
    SchemaDescriptor,
};
use tracing::{debug, warn};

/// Result of writing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(RowId),
    Updated(RowId),
    /// A row written before identity keys existed was found and stamped with its key.
    Adopted(RowId),
    /// Delta patch for a key nothing has mirrored yet.
    NotMirrored,
    Failed,
}

impl UpsertOutcome {
    /// Whether a mutation was sent to the destination.
    pub fn mutated(&self) -> bool {
        matches!(self, Self::Created(_) | Self::Updated(_) | Self::Adopted(_))
    }
}

/// Check-then-act writer keyed on the hidden identity column.
///
/// The lookup runs immediately before each create. There is no transaction
/// across the two calls, so only one run may write to a table at a time.
pub struct Upserter {
    destination: Arc<dyn DestinationApi>,
    legacy_adoption: bool,
}

impl Upserter {
    pub fn new(destination: Arc<dyn DestinationApi>, legacy_adoption: bool) -> Self {
        Self {
            destination,
            legacy_adoption,
        }
    }

    /// Update the row carrying `key`, or create it with `properties` plus the key.
    pub async fn upsert(
        &self,
        key: &IdentityKey,
        mut properties: RowProperties,
        schema: &SchemaDescriptor,
    ) -> UpsertOutcome {
        let Some((key_column, key_value)) = key_property(key, schema) else {
            warn!(key = %key, "identity key column unusable; record not written");
            return UpsertOutcome::Failed;
        };
        properties.insert(key_column.clone(), key_value.clone());

        let existing = match self
            .destination
            .find_row(&RowFilter::equals(key_column, key_value))
            .await
        {
            Ok(found) => found,
            Err(err) => {
                warn!(key = %key, error = %err, "identity lookup failed; record skipped");
                return UpsertOutcome::Failed;
            }
        };

        if let Some(row) = existing {
            return self.write_update(key, row, &properties, UpsertOutcome::Updated).await;
        }

        if self.legacy_adoption {
            if let Some(row) = self.find_legacy(key, &properties).await {
                return self.write_update(key, row, &properties, UpsertOutcome::Adopted).await;
            }
        }

        match self.destination.create_row(&properties).await {
            Ok(row) => {
                debug!(key = %key, row = %row, "created row");
                UpsertOutcome::Created(row)
            }
            Err(err) => {
                warn!(key = %key, error = %err, "create failed");
                UpsertOutcome::Failed
            }
        }
    }

    /// Patch the row carrying `key` if one exists; never creates.
    pub async fn patch_existing(
        &self,
        key: &IdentityKey,
        properties: &RowProperties,
        schema: &SchemaDescriptor,
    ) -> UpsertOutcome {
        let Some((key_column, key_value)) = key_property(key, schema) else {
            warn!(key = %key, "identity key column unusable; delta skipped");
            return UpsertOutcome::Failed;
        };
        match self
            .destination
            .find_row(&RowFilter::equals(key_column, key_value))
            .await
        {
            Ok(Some(row)) => self.write_update(key, row, properties, UpsertOutcome::Updated).await,
            Ok(None) => {
                debug!(key = %key, "not mirrored yet; left for the full scan");
                UpsertOutcome::NotMirrored
            }
            Err(err) => {
                warn!(key = %key, error = %err, "identity lookup failed; delta skipped");
                UpsertOutcome::Failed
            }
        }
    }

    async fn write_update(
        &self,
        key: &IdentityKey,
        row: RowId,
        properties: &RowProperties,
        outcome: fn(RowId) -> UpsertOutcome,
    ) -> UpsertOutcome {
        match self.destination.update_row(&row, properties).await {
            Ok(()) => {
                debug!(key = %key, row = %row, "updated row");
                outcome(row)
            }
            Err(err) => {
                warn!(key = %key, row = %row, error = %err, "update failed");
                UpsertOutcome::Failed
            }
        }
    }

    /// Exact match on title, class and due, for rows that predate the key column.
    async fn find_legacy(&self, key: &IdentityKey, properties: &RowProperties) -> Option<RowId> {
        let mut clauses = Vec::new();
        for field in [RecordField::Title, RecordField::Class, RecordField::Due] {
            let column = field.column_name();
            match properties.get(column) {
                Some(value) => clauses.push(RowFilter::equals(column, value.clone())),
                None if field == RecordField::Due => {}
                None => return None,
            }
        }
        match self.destination.find_row(&RowFilter::And(clauses)).await {
            Ok(found) => found,
            Err(err) => {
                warn!(key = %key, error = %err, "legacy lookup failed");
                None
            }
        }
    }
}

fn key_property(
    key: &IdentityKey,
    schema: &SchemaDescriptor,
) -> Option<(String, EncodedValue)> {
    let column = RecordField::Key.column_name();
    let value = encode(&FieldValue::Text(key.to_string()), schema.column_type(column)?)?;
    Some((column.to_string(), value))
}
