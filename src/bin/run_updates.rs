use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use activity_digest::admin;
use activity_digest::config;
use activity_digest::db;
use activity_digest::mailer::HttpMailer;
use activity_digest::{CycleOutcome, UpdatesProcessor, UpdatesSettings, WindowCursor};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one updates cycle now (testing only; do not run alongside the daemon)"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Id of the user requesting the run; must hold the super-admin role
    #[arg(long)]
    as_user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let processor = UpdatesProcessor::new(
        WindowCursor::new(pool.clone()),
        Arc::new(pool.clone()),
        Arc::new(HttpMailer::from_config(&cfg.mailer)?),
        UpdatesSettings::from_config(&cfg),
    );

    match admin::run_updates_now(&processor, &pool, args.as_user.as_deref()).await? {
        CycleOutcome::Skipped => info!("no window established yet; cursor initialised"),
        CycleOutcome::Processed(report) => info!(
            window_start = %report.window_start,
            window_end = %report.window_end,
            emails_sent = report.emails_sent,
            send_failures = report.send_failures,
            "manual update cycle finished"
        ),
    }
    Ok(())
}
