use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use activity_digest::config;
use activity_digest::db;
use activity_digest::{LockPolicy, NotificationsDigest};

#[derive(Debug, Parser)]
#[command(author, version, about = "Print a user's notification digest as JSON")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(long)]
    user: String,

    #[arg(long)]
    org: String,

    /// Drain the pending entries (under the digest mutex) instead of peeking
    #[arg(long)]
    take: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url()).await?;

    let digest = NotificationsDigest::new(
        pool.clone(),
        Arc::new(pool.clone()),
        LockPolicy::from(&cfg.lock),
    );
    let record = digest
        .digest_for_user(&args.user, &args.org)
        .await?
        .with_context(|| format!("no digest for user {} in org {}", args.user, args.org))?;

    if args.take {
        let pending = digest
            .take_pending(&record.id)
            .await?
            .with_context(|| format!("digest {} disappeared", record.id))?;
        println!("{}", serde_json::to_string_pretty(&pending)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Ok(())
}
