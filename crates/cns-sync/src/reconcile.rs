//! The two per-course passes: authoritative full scan and incremental delta.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cns_adapters::{SourceApi, SourceError};
use cns_core::{Horizon, IdentityKey, SchemaDescriptor};
use tracing::{debug, info, warn};

use crate::mapper::RecordMapper;
use crate::summary::PhaseCounters;
use crate::upsert::{UpsertOutcome, Upserter};

async fn pace(delay: Duration, outcome: &UpsertOutcome) {
    if outcome.mutated() && !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Full scan of one course within a due-date horizon.
pub struct Reconciler<'a> {
    pub source: &'a dyn SourceApi,
    pub mapper: &'a RecordMapper,
    pub upserter: &'a Upserter,
    pub upsert_delay: Duration,
}

impl Reconciler<'_> {
    /// Fails only when the assignment listing cannot be fetched; per-record
    /// problems are counted and logged.
    pub async fn run_course(
        &self,
        course_id: u64,
        class_label: &str,
        horizon: &Horizon,
        schema: &SchemaDescriptor,
        now: &DateTime<Tz>,
    ) -> Result<PhaseCounters, SourceError> {
        let assignments = self.source.list_assignments(course_id).await?;
        let mut counters = PhaseCounters {
            fetched: assignments.len(),
            ..Default::default()
        };

        for assignment in &assignments {
            let due = match self.mapper.normalizer().parse(assignment.due_at.as_deref()) {
                Ok(Some(due)) => due,
                Ok(None) => {
                    counters.undated += 1;
                    continue;
                }
                Err(err) => {
                    warn!(
                        course_id,
                        assignment_id = assignment.id,
                        error = %err,
                        "bad due date; assignment skipped"
                    );
                    counters.parse_errors += 1;
                    continue;
                }
            };
            if !horizon.contains(&due) {
                counters.out_of_horizon += 1;
                continue;
            }

            let properties = match self
                .mapper
                .build_full(course_id, assignment, class_label, schema, now)
            {
                Ok(properties) => properties,
                Err(err) => {
                    warn!(
                        course_id,
                        assignment_id = assignment.id,
                        error = %err,
                        "assignment skipped"
                    );
                    counters.parse_errors += 1;
                    continue;
                }
            };
            let key = IdentityKey::new(course_id, assignment.id);
            let outcome = self.upserter.upsert(&key, properties, schema).await;
            counters.record(&outcome);
            pace(self.upsert_delay, &outcome).await;
        }

        info!(
            course_id,
            fetched = counters.fetched,
            created = counters.created,
            updated = counters.updated,
            failed = counters.failed,
            "full scan finished"
        );
        Ok(counters)
    }
}

/// Status refresh for rows already mirrored, driven by submissions changed since
/// the watermark.
pub struct DeltaSyncer<'a> {
    pub source: &'a dyn SourceApi,
    pub mapper: &'a RecordMapper,
    pub upserter: &'a Upserter,
    pub upsert_delay: Duration,
}

impl DeltaSyncer<'_> {
    pub async fn run_course(
        &self,
        course_id: u64,
        since: DateTime<Utc>,
        schema: &SchemaDescriptor,
        now: &DateTime<Tz>,
    ) -> Result<PhaseCounters, SourceError> {
        let submissions = self.source.list_submissions_since(course_id, since).await?;
        let mut counters = PhaseCounters {
            fetched: submissions.len(),
            ..Default::default()
        };

        for submission in &submissions {
            let Some(assignment_id) = submission.resolved_assignment_id() else {
                debug!(course_id, "submission without assignment id ignored");
                continue;
            };
            let raw_due = submission
                .assignment
                .as_ref()
                .and_then(|a| a.due_at.as_deref());
            let due = match self.mapper.normalizer().parse(raw_due) {
                Ok(due) => due,
                Err(err) => {
                    warn!(course_id, assignment_id, error = %err, "bad due date; delta skipped");
                    counters.parse_errors += 1;
                    continue;
                }
            };

            let properties =
                self.mapper
                    .build_delta(submission, due.as_ref(), assignment_id, course_id, schema, now);
            let key = IdentityKey::new(course_id, assignment_id);
            let outcome = self.upserter.patch_existing(&key, &properties, schema).await;
            counters.record(&outcome);
            pace(self.upsert_delay, &outcome).await;
        }

        info!(
            course_id,
            fetched = counters.fetched,
            updated = counters.updated,
            not_mirrored = counters.not_mirrored,
            "delta pass finished"
        );
        Ok(counters)
    }
}
