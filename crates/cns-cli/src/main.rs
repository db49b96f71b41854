use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cns_sync::{build_scheduler, RunOptions, SyncConfig, SyncEngine};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "cns-cli")]
#[command(about = "Mirror Canvas assignments into a Notion database")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass (the default).
    Sync(SyncArgs),
    /// Create any missing columns and print the destination column map.
    Schema {
        #[arg(long)]
        json: bool,
    },
    /// Print the stored watermark.
    Watermark {
        /// Delete it so the next run skips the delta pass.
        #[arg(long)]
        reset: bool,
    },
    /// Run on SYNC_CRON until interrupted.
    Schedule {
        #[arg(long)]
        skip_delta: bool,
    },
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    /// Log destination mutations instead of sending them.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    skip_delta: bool,
    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt().with_env_filter(filter).with_target(true).init();
}

fn load_config() -> Result<SyncConfig> {
    SyncConfig::from_env().map_err(|err| {
        error!(error = %err, "invalid configuration");
        anyhow::Error::new(err).context("loading configuration")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let cli = Cli::parse();
    let config = load_config()?;

    match cli.command.unwrap_or_else(|| Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => {
            let engine = SyncEngine::from_config(config, args.dry_run)?;
            let abort = engine.abort_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; stopping after the current course");
                    abort.store(true, Ordering::SeqCst);
                }
            });

            let summary = engine
                .run_once(RunOptions {
                    skip_delta: args.skip_delta,
                })
                .await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{summary}");
            }
        }
        Commands::Schema { json } => {
            let engine = SyncEngine::from_config(config, false)?;
            let (schema, report) = engine.ensure_schema().await?;
            if json {
                let columns: BTreeMap<&str, &str> = schema
                    .columns()
                    .iter()
                    .map(|(name, ty)| (name.as_str(), ty.as_wire()))
                    .collect();
                let out = serde_json::json!({ "columns": columns, "report": report });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                for (name, ty) in schema.columns() {
                    println!("{name}\t{}", ty.as_wire());
                }
                for name in &report.created {
                    println!("created: {name}");
                }
            }
        }
        Commands::Watermark { reset } => {
            let engine = SyncEngine::from_config(config, false)?;
            let store = engine.watermark_store();
            if reset {
                let removed = store.clear().await?;
                println!(
                    "{} {}",
                    if removed { "removed" } else { "no watermark at" },
                    store.path().display()
                );
            } else {
                match store.load().await.context("reading watermark")? {
                    Some(instant) => println!("{}", instant.to_rfc3339()),
                    None => println!("no watermark at {}", store.path().display()),
                }
            }
        }
        Commands::Schedule { skip_delta } => {
            let cron = config.sync_cron.clone();
            let engine = Arc::new(SyncEngine::from_config(config, false)?);
            let abort = engine.abort_handle();
            let mut sched = build_scheduler(engine, RunOptions { skip_delta }).await?;
            sched.start().await.context("starting scheduler")?;
            info!(cron = %cron, "scheduler started");

            tokio::signal::ctrl_c()
                .await
                .context("waiting for interrupt")?;
            warn!("interrupt received; shutting down scheduler");
            abort.store(true, Ordering::SeqCst);
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
