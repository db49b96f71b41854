use chrono::DateTime;
use chrono_tz::Tz;
use cns_adapters::html_to_text;
use cns_core::{
    classify, encode, submission_url, time_of_day, truncate_chars, Assignment, FieldValue,
    IdentityKey, RecordField, RecordPayload, RowProperties, SchemaDescriptor, SubmissionSnapshot,
    TimeError, TimeNormalizer, NOTES_LIMIT, TITLE_LIMIT,
};
use tracing::warn;

/// Turns source assignments into destination payloads.
#[derive(Debug, Clone)]
pub struct RecordMapper {
    normalizer: TimeNormalizer,
    base_url: String,
}

impl RecordMapper {
    pub fn new(normalizer: TimeNormalizer, base_url: impl Into<String>) -> Self {
        Self {
            normalizer,
            base_url: base_url.into(),
        }
    }

    pub fn normalizer(&self) -> &TimeNormalizer {
        &self.normalizer
    }

    /// Every field the engine owns, for a full-scan upsert.
    pub fn full_payload(
        &self,
        course_id: u64,
        assignment: &Assignment,
        class_label: &str,
        now: &DateTime<Tz>,
    ) -> Result<RecordPayload, TimeError> {
        let due = self.normalizer.parse(assignment.due_at.as_deref())?;
        let status = classify(assignment.submission.as_ref(), due.as_ref(), now);

        let mut payload = RecordPayload::new();
        payload.insert(
            RecordField::Key,
            FieldValue::Text(IdentityKey::new(course_id, assignment.id).to_string()),
        );
        payload.insert(
            RecordField::Title,
            FieldValue::Text(truncate_chars(&assignment.title(), TITLE_LIMIT)),
        );
        payload.insert(RecordField::Class, FieldValue::Choice(class_label.to_string()));
        payload.insert(
            RecordField::Kind,
            FieldValue::Choice(assignment.kind().label().to_string()),
        );
        payload.insert(RecordField::Status, FieldValue::Choice(status.label().to_string()));
        if let Some(due) = due {
            payload.insert(RecordField::Time, FieldValue::Text(time_of_day(&due)));
            payload.insert(RecordField::Due, FieldValue::Date(due));
        }
        let notes = assignment
            .description
            .as_deref()
            .map(html_to_text)
            .unwrap_or_default();
        if !notes.is_empty() {
            payload.insert(
                RecordField::Notes,
                FieldValue::Text(truncate_chars(&notes, NOTES_LIMIT)),
            );
        }
        payload.insert(
            RecordField::Link,
            FieldValue::Url(submission_url(&self.base_url, course_id, assignment.id)),
        );
        Ok(payload)
    }

    /// Status, due/time and link only. Never title, class, type or notes.
    pub fn delta_payload(
        &self,
        submission: &SubmissionSnapshot,
        due: Option<&DateTime<Tz>>,
        assignment_id: u64,
        course_id: u64,
        now: &DateTime<Tz>,
    ) -> RecordPayload {
        let status = classify(Some(submission), due, now);
        let mut payload = RecordPayload::new();
        payload.insert(RecordField::Status, FieldValue::Choice(status.label().to_string()));
        if let Some(due) = due {
            payload.insert(RecordField::Due, FieldValue::Date(*due));
            payload.insert(RecordField::Time, FieldValue::Text(time_of_day(due)));
        }
        payload.insert(
            RecordField::Link,
            FieldValue::Url(submission_url(&self.base_url, course_id, assignment_id)),
        );
        debug_assert!(payload.keys().all(|f| RecordField::DELTA.contains(f)));
        payload
    }

    pub fn build_full(
        &self,
        course_id: u64,
        assignment: &Assignment,
        class_label: &str,
        schema: &SchemaDescriptor,
        now: &DateTime<Tz>,
    ) -> Result<RowProperties, TimeError> {
        let payload = self.full_payload(course_id, assignment, class_label, now)?;
        Ok(encode_payload(&payload, schema))
    }

    pub fn build_delta(
        &self,
        submission: &SubmissionSnapshot,
        due: Option<&DateTime<Tz>>,
        assignment_id: u64,
        course_id: u64,
        schema: &SchemaDescriptor,
        now: &DateTime<Tz>,
    ) -> RowProperties {
        let payload = self.delta_payload(submission, due, assignment_id, course_id, now);
        encode_payload(&payload, schema)
    }
}

/// Shape each field for the column type the destination actually has.
/// Fields whose column is missing or cannot hold the value are left out.
pub fn encode_payload(payload: &RecordPayload, schema: &SchemaDescriptor) -> RowProperties {
    let mut properties = RowProperties::new();
    for (field, value) in payload {
        let name = field.column_name();
        let Some(column) = schema.column_type(name) else {
            warn!(column = name, "column missing from destination; field skipped");
            continue;
        };
        match encode(value, column) {
            Some(encoded) => {
                properties.insert(name.to_string(), encoded);
            }
            None => warn!(
                column = name,
                kind = column.as_wire(),
                "column type cannot hold this field; skipped"
            ),
        }
    }
    properties
}
