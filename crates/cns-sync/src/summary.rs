use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::schema::SchemaReport;
use crate::upsert::UpsertOutcome;

/// Per-pass tallies. Both the full scan and the delta pass fill one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseCounters {
    pub fetched: usize,
    pub out_of_horizon: usize,
    pub undated: usize,
    pub parse_errors: usize,
    pub created: usize,
    pub updated: usize,
    pub adopted: usize,
    pub not_mirrored: usize,
    pub failed: usize,
}

impl PhaseCounters {
    pub fn record(&mut self, outcome: &UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created(_) => self.created += 1,
            UpsertOutcome::Updated(_) => self.updated += 1,
            UpsertOutcome::Adopted(_) => self.adopted += 1,
            UpsertOutcome::NotMirrored => self.not_mirrored += 1,
            UpsertOutcome::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &PhaseCounters) {
        self.fetched += other.fetched;
        self.out_of_horizon += other.out_of_horizon;
        self.undated += other.undated;
        self.parse_errors += other.parse_errors;
        self.created += other.created;
        self.updated += other.updated;
        self.adopted += other.adopted;
        self.not_mirrored += other.not_mirrored;
        self.failed += other.failed;
    }

    pub fn writes(&self) -> usize {
        self.created + self.updated + self.adopted
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Destination mutations logged instead of sent; zero outside dry runs.
    pub suppressed_mutations: usize,
    pub aborted: bool,
    pub courses: usize,
    pub courses_failed: Vec<u64>,
    pub schema: SchemaReport,
    /// `None` when the pass did not run (no watermark, or skipped).
    pub delta: Option<PhaseCounters>,
    pub full: PhaseCounters,
    pub previous_watermark: Option<DateTime<Utc>>,
    pub watermark_advanced: bool,
}

impl fmt::Display for SyncRunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sync complete: run_id={} courses={} failed_courses={} \
             created={} updated={} adopted={} failed={}",
            self.run_id,
            self.courses,
            self.courses_failed.len(),
            self.full.created,
            self.full.updated,
            self.full.adopted,
            self.full.failed,
        )?;
        if let Some(delta) = &self.delta {
            write!(f, " delta_updated={} delta_skipped={}", delta.updated, delta.not_mirrored)?;
        }
        write!(f, " watermark_advanced={}", self.watermark_advanced)?;
        if self.dry_run {
            write!(f, " (dry run, {} mutations suppressed)", self.suppressed_mutations)?;
        }
        if self.aborted {
            f.write_str(" (aborted)")?;
        }
        Ok(())
    }
}
