use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use activity_digest::config;
use activity_digest::db;
use activity_digest::mailer::HttpMailer;
use activity_digest::scheduler;
use activity_digest::{UpdatesProcessor, UpdatesSettings, WindowCursor};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    let schedule = scheduler::parse_schedule(&cfg.updates.schedule)?;
    let mailer = HttpMailer::from_config(&cfg.mailer)?;

    // The only processor in this process; the scheduler borrows it.
    let processor = UpdatesProcessor::new(
        WindowCursor::new(pool.clone()),
        Arc::new(pool.clone()),
        Arc::new(mailer),
        UpdatesSettings::from_config(&cfg),
    );

    info!(schedule = %cfg.updates.schedule, "starting updates scheduler");
    scheduler::run(&processor, &schedule, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    pool.close().await;
    Ok(())
}
