use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::America::Phoenix;
use cns_adapters::{InMemoryDestination, StaticSource};
use cns_core::{
    Assignment, ColumnType, Course, EncodedValue, RowProperties, SubmissionSnapshot, WorkflowState,
};
use cns_sync::{RunOptions, SyncConfig, SyncEngine};
use tempfile::TempDir;

const COURSE: u64 = 42;

fn config(dir: &TempDir, course_ids: Vec<u64>) -> SyncConfig {
    SyncConfig {
        canvas_base_url: "https://canvas.example.edu".into(),
        canvas_token: "canvas".into(),
        notion_token: "notion".into(),
        notion_database_id: "db".into(),
        course_ids,
        course_name_overrides: BTreeMap::new(),
        timezone: Phoenix,
        lookahead_days: 120,
        lookback_days: 7,
        state_path: dir.path().join("watermark"),
        http_timeout_secs: 5,
        upsert_delay: Duration::ZERO,
        legacy_adoption: false,
        sync_cron: "0 0 */6 * * *".into(),
    }
}

/// 2024-03-02T00:00:00 in Phoenix.
fn run_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 2, 7, 0, 0).single().expect("start")
}

fn assignment(id: u64, name: &str, due_at: Option<&str>) -> Assignment {
    Assignment {
        id,
        course_id: Some(COURSE),
        name: Some(name.into()),
        due_at: due_at.map(str::to_string),
        quiz_id: None,
        is_quiz_assignment: None,
        description: None,
        submission: None,
    }
}

fn course() -> Course {
    Course {
        id: COURSE,
        name: Some("Database Management Systems".into()),
        course_code: Some("CSE 412".into()),
    }
}

fn source_with(assignments: Vec<Assignment>) -> StaticSource {
    StaticSource::new()
        .with_course(course())
        .with_assignments(COURSE, assignments)
}

fn row_for<'a>(rows: &'a [(cns_core::RowId, RowProperties)], key: &str) -> &'a RowProperties {
    rows.iter()
        .map(|(_, props)| props)
        .find(|props| props.get("Key").map(EncodedValue::as_text).as_deref() == Some(key))
        .unwrap_or_else(|| panic!("no row with key {key}"))
}

#[tokio::test]
async fn example_assignment_past_due_without_submission_is_dnf() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new());
    let source = source_with(vec![assignment(555, "HW3", Some("2024-03-01T07:00:00Z"))]);
    let engine = SyncEngine::new(config(&dir, vec![COURSE]), Arc::new(source), dest.clone());

    let summary = engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("run");
    assert_eq!(summary.full.created, 1);

    let rows = dest.rows();
    let row = row_for(&rows, "42:555");
    assert_eq!(row.get("Task"), Some(&EncodedValue::Title("HW3".into())));
    assert_eq!(row.get("Class"), Some(&EncodedValue::Select("CSE 412".into())));
    assert_eq!(row.get("Type"), Some(&EncodedValue::Select("Assignment".into())));
    assert_eq!(row.get("Status"), Some(&EncodedValue::Status("DNF".into())));
    assert_eq!(row.get("Time"), Some(&EncodedValue::RichText("12:00 AM".into())));
    assert_eq!(
        row.get("Link"),
        Some(&EncodedValue::Url(
            "https://canvas.example.edu/courses/42/assignments/555".into()
        ))
    );
}

#[tokio::test]
async fn submission_evidence_outranks_the_deadline() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new());
    let mut hw3 = assignment(555, "HW3", Some("2024-03-01T07:00:00Z"));
    hw3.submission = Some(SubmissionSnapshot {
        assignment_id: Some(555),
        workflow_state: Some(WorkflowState::Unsubmitted),
        submitted_at: Some("2024-03-01T06:00:00Z".into()),
        assignment: None,
    });
    let mut late = assignment(556, "HW4", Some("2024-02-28T07:00:00Z"));
    late.submission = Some(SubmissionSnapshot {
        assignment_id: Some(556),
        workflow_state: Some(WorkflowState::Graded),
        submitted_at: None,
        assignment: None,
    });
    let engine = SyncEngine::new(
        config(&dir, vec![COURSE]),
        Arc::new(source_with(vec![hw3, late])),
        dest.clone(),
    );

    engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("run");

    let rows = dest.rows();
    for key in ["42:555", "42:556"] {
        assert_eq!(
            row_for(&rows, key).get("Status"),
            Some(&EncodedValue::Status("Complete".into()))
        );
    }
}

#[tokio::test]
async fn full_scan_is_idempotent_and_never_duplicates() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new());
    let assignments = vec![
        assignment(1, "HW1", Some("2024-03-05T07:00:00Z")),
        assignment(2, "Midterm Exam", Some("2024-03-10T07:00:00Z")),
        assignment(3, "Quiz 1", Some("2024-03-12T07:00:00Z")),
    ];
    let engine = SyncEngine::new(
        config(&dir, vec![COURSE]),
        Arc::new(source_with(assignments)),
        dest.clone(),
    );

    let first = engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("first run");
    let after_first = dest.rows();
    let second = engine
        .run_once_at(run_start() + chrono::Duration::hours(6), RunOptions::default())
        .await
        .expect("second run");
    let after_second = dest.rows();

    assert_eq!(first.full.created, 3);
    assert_eq!(second.full.created, 0);
    assert_eq!(second.full.updated, 3);
    assert_eq!(after_first, after_second);

    let keys: BTreeSet<String> = after_second
        .iter()
        .filter_map(|(_, props)| props.get("Key").map(EncodedValue::as_text))
        .collect();
    assert_eq!(keys.len(), after_second.len());
    assert_eq!(
        row_for(&after_second, "42:2").get("Type"),
        Some(&EncodedValue::Select("Exam".into()))
    );
}

#[tokio::test]
async fn horizon_bounds_the_full_scan() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new());
    let assignments = vec![
        // now - 8 days
        assignment(1, "too old", Some("2024-02-23T07:00:00Z")),
        // now - 6 days
        assignment(2, "recent", Some("2024-02-25T07:00:00Z")),
        // now + 121 days
        assignment(3, "too far", Some("2024-07-01T07:00:00Z")),
        assignment(4, "undated", None),
    ];
    let engine = SyncEngine::new(
        config(&dir, vec![COURSE]),
        Arc::new(source_with(assignments)),
        dest.clone(),
    );

    let summary = engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("run");

    let rows = dest.rows();
    assert_eq!(rows.len(), 1);
    row_for(&rows, "42:2");
    assert_eq!(summary.full.out_of_horizon, 2);
    assert_eq!(summary.full.undated, 1);
}

#[tokio::test]
async fn existing_text_class_column_is_written_as_text() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new().with_columns([
        ("Task", ColumnType::Title),
        ("Class", ColumnType::RichText),
        ("Status", ColumnType::Select),
    ]));
    let engine = SyncEngine::new(
        config(&dir, vec![COURSE]),
        Arc::new(source_with(vec![assignment(555, "HW3", Some("2024-03-05T07:00:00Z"))])),
        dest.clone(),
    );

    let summary = engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("run");

    assert!(!summary.schema.created.contains(&"Class".to_string()));
    assert!(!summary.schema.created.contains(&"Status".to_string()));
    assert_eq!(dest.columns().get("Class"), Some(&ColumnType::RichText));
    let rows = dest.rows();
    let row = row_for(&rows, "42:555");
    assert_eq!(row.get("Class"), Some(&EncodedValue::RichText("CSE 412".into())));
    assert_eq!(row.get("Status"), Some(&EncodedValue::Select("To do".into())));
}

#[tokio::test]
async fn watermark_advances_to_run_start_and_feeds_the_next_delta() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new());
    let source = Arc::new(source_with(vec![assignment(1, "HW1", Some("2024-03-05T07:00:00Z"))]));
    let engine = SyncEngine::new(config(&dir, vec![COURSE]), source.clone(), dest.clone());

    let first = engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("first");
    assert!(first.delta.is_none());
    assert!(first.watermark_advanced);
    assert_eq!(
        engine.watermark_store().load().await.expect("load"),
        Some(run_start())
    );

    let later = run_start() + chrono::Duration::hours(6);
    let second = engine
        .run_once_at(later, RunOptions::default())
        .await
        .expect("second");
    assert_eq!(second.previous_watermark, Some(run_start()));
    assert!(second.delta.is_some());
    assert_eq!(source.delta_requests(), vec![(COURSE, run_start())]);

    let skipped = engine
        .run_once_at(later + chrono::Duration::hours(6), RunOptions { skip_delta: true })
        .await
        .expect("third");
    assert!(skipped.delta.is_none());
    assert_eq!(source.delta_requests().len(), 1);
}

#[tokio::test]
async fn failed_course_is_isolated_and_holds_the_watermark() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new());
    let source = source_with(vec![assignment(1, "HW1", Some("2024-03-05T07:00:00Z"))])
        .with_course(Course {
            id: 7,
            name: Some("Broken".into()),
            course_code: None,
        })
        .failing_course(7);
    // course 9 does not exist at all
    let engine = SyncEngine::new(config(&dir, vec![7, COURSE, 9]), Arc::new(source), dest.clone());

    let summary = engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("run");

    assert_eq!(summary.courses_failed, vec![7, 9]);
    assert_eq!(summary.full.created, 1);
    assert!(!summary.watermark_advanced);
    assert_eq!(engine.watermark_store().load().await.expect("load"), None);
}

#[tokio::test]
async fn bad_date_and_rejected_write_do_not_abort_the_batch() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new().failing_key("42:2"));
    let source = source_with(vec![
        assignment(1, "HW1", Some("next tuesday")),
        assignment(2, "HW2", Some("2024-03-05T07:00:00Z")),
        assignment(3, "HW3", Some("2024-03-06T07:00:00Z")),
        assignment(4, "HW4", Some("2024-03-07T07:00:00Z")),
    ]);
    let engine = SyncEngine::new(config(&dir, vec![COURSE]), Arc::new(source), dest.clone());

    let summary = engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("run");

    assert_eq!(summary.full.fetched, 4);
    assert_eq!(summary.full.parse_errors, 1);
    assert_eq!(summary.full.failed, 1);
    assert_eq!(summary.full.created, 2);
    let rows = dest.rows();
    assert_eq!(rows.len(), 2);
    row_for(&rows, "42:3");
    row_for(&rows, "42:4");
    assert!(summary.watermark_advanced);
    assert_eq!(
        engine.watermark_store().load().await.expect("load"),
        Some(run_start())
    );
}

#[tokio::test]
async fn unrepresentable_horizon_fails_before_touching_the_destination() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new());
    let mut config = config(&dir, vec![COURSE]);
    config.lookahead_days = u32::MAX;
    let engine = SyncEngine::new(
        config,
        Arc::new(source_with(vec![assignment(1, "HW1", Some("2024-03-05T07:00:00Z"))])),
        dest.clone(),
    );

    assert!(engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .is_err());
    assert_eq!(dest.calls().schema_reads, 0);
    assert!(dest.rows().is_empty());
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new());
    let engine = SyncEngine::dry_run(
        config(&dir, vec![COURSE]),
        Arc::new(source_with(vec![assignment(1, "HW1", Some("2024-03-05T07:00:00Z"))])),
        dest.clone(),
    );

    let summary = engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("run");

    assert!(summary.dry_run);
    assert_eq!(summary.full.created, 1);
    assert_eq!(summary.full.failed, 0);
    // nine columns plus one row
    assert_eq!(summary.suppressed_mutations, 10);
    assert!(!summary.watermark_advanced);
    assert!(dest.rows().is_empty());
    assert!(dest.columns().is_empty());
    assert_eq!(engine.watermark_store().load().await.expect("load"), None);
}

#[tokio::test]
async fn abort_flag_stops_before_the_next_course() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new());
    let engine = SyncEngine::new(
        config(&dir, vec![COURSE]),
        Arc::new(source_with(vec![assignment(1, "HW1", Some("2024-03-05T07:00:00Z"))])),
        dest.clone(),
    );
    engine.abort_handle().store(true, Ordering::SeqCst);

    let summary = engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("run");

    assert!(summary.aborted);
    assert!(!summary.watermark_advanced);
    assert!(dest.rows().is_empty());
}

#[tokio::test]
async fn malformed_watermark_is_treated_as_absent() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("watermark"), "yesterday-ish\n").expect("write");
    let engine = SyncEngine::new(
        config(&dir, vec![COURSE]),
        Arc::new(source_with(vec![])),
        Arc::new(InMemoryDestination::new()),
    );

    let summary = engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("run");

    assert!(summary.previous_watermark.is_none());
    assert!(summary.delta.is_none());
    assert!(summary.watermark_advanced);
}

#[tokio::test]
async fn course_name_override_wins_over_course_code() {
    let dir = TempDir::new().expect("tempdir");
    let dest = Arc::new(InMemoryDestination::new());
    let mut config = config(&dir, vec![COURSE]);
    config.course_name_overrides.insert(COURSE, "Databases".into());
    let engine = SyncEngine::new(
        config,
        Arc::new(source_with(vec![assignment(1, "HW1", Some("2024-03-05T07:00:00Z"))])),
        dest.clone(),
    );

    engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("run");

    let rows = dest.rows();
    assert_eq!(
        row_for(&rows, "42:1").get("Class"),
        Some(&EncodedValue::Select("Databases".into()))
    );
}

#[tokio::test]
async fn summary_serializes_for_json_output() {
    let dir = TempDir::new().expect("tempdir");
    let engine = SyncEngine::new(
        config(&dir, vec![COURSE]),
        Arc::new(source_with(vec![])),
        Arc::new(InMemoryDestination::new()),
    );
    let summary = engine
        .run_once_at(run_start(), RunOptions::default())
        .await
        .expect("run");

    let json = serde_json::to_value(&summary).expect("json");
    assert_eq!(json["courses"], 1);
    assert_eq!(json["watermark_advanced"], true);
    assert_eq!(json["suppressed_mutations"], 0);
    assert!(summary.to_string().starts_with("sync complete: run_id="));
}
