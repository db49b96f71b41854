//! Sync engine: mirrors Canvas assignments into a Notion database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cns_adapters::{
    CanvasClient, CanvasConfig, DestinationApi, NotionClient, NotionConfig, SourceApi,
};
use cns_core::{Horizon, SchemaDescriptor, TimeNormalizer};
use cns_storage::{HttpClientConfig, HttpFetcher, TokenBucketConfig, WatermarkStore};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod config;
pub mod dry_run;
pub mod mapper;
pub mod reconcile;
pub mod schema;
pub mod summary;
pub mod upsert;

pub use config::{ConfigError, SyncConfig};
pub use dry_run::DryRunDestination;
pub use mapper::{encode_payload, RecordMapper};
pub use reconcile::{DeltaSyncer, Reconciler};
pub use schema::{SchemaReconciler, SchemaReport};
pub use summary::{PhaseCounters, SyncRunSummary};
pub use upsert::{UpsertOutcome, Upserter};

pub const CRATE_NAME: &str = "cns-sync";

const USER_AGENT: &str = concat!("cns-cli/", env!("CARGO_PKG_VERSION"));
/// Notion allows an average of three requests per second per integration.
const NOTION_REQUESTS_PER_SECOND: u32 = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub skip_delta: bool,
}

#[derive(Debug, Default)]
struct CourseOutcome {
    delta: Option<PhaseCounters>,
    /// `None` when the course could not be scanned.
    full: Option<PhaseCounters>,
}

pub struct SyncEngine {
    config: SyncConfig,
    source: Arc<dyn SourceApi>,
    watermark: WatermarkStore,
    schema: SchemaReconciler,
    mapper: RecordMapper,
    upserter: Upserter,
    /// Set when mutations are suppressed.
    dry_run: Option<Arc<DryRunDestination>>,
    abort: Arc<AtomicBool>,
    run_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn SourceApi>,
        destination: Arc<dyn DestinationApi>,
    ) -> Self {
        let mapper = RecordMapper::new(
            TimeNormalizer::new(config.timezone),
            config.canvas_base_url.clone(),
        );
        Self {
            watermark: WatermarkStore::new(config.state_path.clone()),
            schema: SchemaReconciler::new(destination.clone()),
            upserter: Upserter::new(destination, config.legacy_adoption),
            mapper,
            source,
            config,
            dry_run: None,
            abort: Arc::new(AtomicBool::new(false)),
            run_lock: Mutex::new(()),
        }
    }

    /// Same engine, but destination mutations are logged instead of sent and
    /// the watermark is never written.
    pub fn dry_run(
        config: SyncConfig,
        source: Arc<dyn SourceApi>,
        destination: Arc<dyn DestinationApi>,
    ) -> Self {
        let dry = Arc::new(DryRunDestination::new(destination));
        let wrapped: Arc<dyn DestinationApi> = dry.clone();
        Self {
            dry_run: Some(dry),
            ..Self::new(config, source, wrapped)
        }
    }

    /// Wire the Canvas and Notion HTTP clients described by `config`.
    pub fn from_config(config: SyncConfig, dry_run: bool) -> Result<Self> {
        let timeout = Duration::from_secs(config.http_timeout_secs);
        let canvas_http = HttpFetcher::new(HttpClientConfig {
            timeout,
            user_agent: Some(USER_AGENT.to_string()),
            ..Default::default()
        })
        .context("building canvas http client")?;
        let notion_http = HttpFetcher::new(HttpClientConfig {
            timeout,
            user_agent: Some(USER_AGENT.to_string()),
            token_bucket: Some(TokenBucketConfig {
                capacity: NOTION_REQUESTS_PER_SECOND,
                refill_every: Duration::from_millis(
                    1000 / u64::from(NOTION_REQUESTS_PER_SECOND),
                ),
            }),
            ..Default::default()
        })
        .context("building notion http client")?;

        let source: Arc<dyn SourceApi> = Arc::new(CanvasClient::new(
            CanvasConfig {
                base_url: config.canvas_base_url.clone(),
                token: config.canvas_token.clone(),
            },
            Arc::new(canvas_http),
        ));
        let destination: Arc<dyn DestinationApi> = Arc::new(NotionClient::new(
            NotionConfig::new(config.notion_token.clone(), config.notion_database_id.clone()),
            Arc::new(notion_http),
        ));

        Ok(if dry_run {
            Self::dry_run(config, source, destination)
        } else {
            Self::new(config, source, destination)
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn watermark_store(&self) -> &WatermarkStore {
        &self.watermark
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run.is_some()
    }

    fn suppressed_mutations(&self) -> usize {
        self.dry_run.as_ref().map_or(0, |dry| dry.suppressed())
    }

    /// Setting the flag stops a run before its next course.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub async fn ensure_schema(&self) -> Result<(SchemaDescriptor, SchemaReport)> {
        self.schema
            .ensure_schema()
            .await
            .context("reconciling destination schema")
    }

    pub async fn run_once(&self, options: RunOptions) -> Result<SyncRunSummary> {
        self.run_once_at(Utc::now(), options).await
    }

    /// Run with an explicit start instant; waits for any run already in progress.
    pub async fn run_once_at(
        &self,
        started_at: DateTime<Utc>,
        options: RunOptions,
    ) -> Result<SyncRunSummary> {
        let _guard = self.run_lock.lock().await;
        self.run_locked(started_at, options).await
    }

    /// `None` if another run holds the engine.
    pub async fn try_run_once(&self, options: RunOptions) -> Option<Result<SyncRunSummary>> {
        let _guard = self.run_lock.try_lock().ok()?;
        Some(self.run_locked(Utc::now(), options).await)
    }

    async fn run_locked(
        &self,
        started_at: DateTime<Utc>,
        options: RunOptions,
    ) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let suppressed_before = self.suppressed_mutations();
        let now = self.mapper.normalizer().localize(started_at);
        let horizon = Horizon::around(now, self.config.lookback_days, self.config.lookahead_days)
            .context("computing scan horizon")?;
        info!(
            %run_id,
            courses = self.config.course_ids.len(),
            dry_run = self.is_dry_run(),
            "sync run starting"
        );

        self.schema.invalidate().await;
        let (schema, schema_report) = self.ensure_schema().await?;

        let previous_watermark = self.load_watermark().await;
        let delta_since = match previous_watermark {
            Some(since) if !options.skip_delta => Some(since),
            Some(_) => {
                info!("delta pass skipped by request");
                None
            }
            None => {
                info!("no watermark; running full scan only");
                None
            }
        };

        let mut delta = delta_since.map(|_| PhaseCounters::default());
        let mut full = PhaseCounters::default();
        let mut courses_failed = Vec::new();
        let mut aborted = false;

        for &course_id in &self.config.course_ids {
            if self.abort.load(Ordering::SeqCst) {
                warn!(course_id, "abort requested; remaining courses not processed");
                aborted = true;
                break;
            }
            let outcome = self
                .sync_course(course_id, delta_since, &schema, &horizon, &now)
                .instrument(info_span!("course", course_id))
                .await;
            if let (Some(total), Some(counters)) = (delta.as_mut(), outcome.delta.as_ref()) {
                total.merge(counters);
            }
            match outcome.full {
                Some(counters) => full.merge(&counters),
                None => courses_failed.push(course_id),
            }
        }

        let watermark_advanced = !aborted && !self.is_dry_run() && courses_failed.is_empty();
        if watermark_advanced {
            self.watermark
                .store(started_at)
                .await
                .context("writing watermark")?;
        } else {
            info!(
                aborted,
                dry_run = self.is_dry_run(),
                failed_courses = courses_failed.len(),
                "watermark left unchanged"
            );
        }

        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: self.is_dry_run(),
            suppressed_mutations: self.suppressed_mutations() - suppressed_before,
            aborted,
            courses: self.config.course_ids.len(),
            courses_failed,
            schema: schema_report,
            delta,
            full,
            previous_watermark,
            watermark_advanced,
        };
        info!(%run_id, writes = summary.full.writes(), "sync run finished");
        Ok(summary)
    }

    async fn sync_course(
        &self,
        course_id: u64,
        delta_since: Option<DateTime<Utc>>,
        schema: &SchemaDescriptor,
        horizon: &Horizon,
        now: &DateTime<Tz>,
    ) -> CourseOutcome {
        let label = match self.source.get_course(course_id).await {
            Ok(course) => course.display_label(&self.config.course_name_overrides),
            Err(err) => {
                warn!(course_id, error = %err, "course lookup failed; course skipped");
                return CourseOutcome::default();
            }
        };
        info!(course_id, label = %label, "syncing course");

        let delta = match delta_since {
            Some(since) => {
                let syncer = DeltaSyncer {
                    source: self.source.as_ref(),
                    mapper: &self.mapper,
                    upserter: &self.upserter,
                    upsert_delay: self.config.upsert_delay,
                };
                match syncer.run_course(course_id, since, schema, now).await {
                    Ok(counters) => Some(counters),
                    Err(err) => {
                        warn!(
                            course_id,
                            error = %err,
                            "submission listing failed; delta skipped"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let reconciler = Reconciler {
            source: self.source.as_ref(),
            mapper: &self.mapper,
            upserter: &self.upserter,
            upsert_delay: self.config.upsert_delay,
        };
        let full = match reconciler
            .run_course(course_id, &label, horizon, schema, now)
            .await
        {
            Ok(counters) => Some(counters),
            Err(err) => {
                warn!(
                    course_id,
                    error = %err,
                    "assignment listing failed; course skipped"
                );
                None
            }
        };

        CourseOutcome { delta, full }
    }

    async fn load_watermark(&self) -> Option<DateTime<Utc>> {
        match self.watermark.load().await {
            Ok(watermark) => watermark,
            Err(err) => {
                warn!(error = %err, "watermark unreadable; treating as absent");
                None
            }
        }
    }
}

/// Cron-driven runs. A tick that fires while a run is still going is skipped.
pub async fn build_scheduler(
    engine: Arc<SyncEngine>,
    options: RunOptions,
) -> Result<JobScheduler> {
    let cron = engine.config().sync_cron.clone();
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let engine = Arc::clone(&engine);
        Box::pin(async move {
            match engine.try_run_once(options).await {
                None => info!("previous run still in progress; tick skipped"),
                Some(Ok(summary)) => info!(%summary, "scheduled run finished"),
                Some(Err(err)) => error!(error = %format!("{err:#}"), "scheduled run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}
