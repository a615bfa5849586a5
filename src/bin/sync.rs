use cachebox::{ClientConfig, SyncManager};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The cachebox sync client.
#[derive(Parser, Debug)]
#[clap(name = "cachebox-sync")]
#[clap(about = "Sync a local datasite tree against a cachebox server", long_about = None)]
struct Args {
    /// Caching server URL
    #[clap(long, value_name = "URL", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Acting identity (datasite owner email)
    #[clap(long, value_name = "EMAIL")]
    user: String,

    /// Local sync root (one subdirectory per datasite)
    #[clap(long, value_name = "DIR", default_value = "./sync")]
    root: PathBuf,

    /// Poll interval in seconds
    #[clap(long, default_value = "5")]
    interval: u64,

    /// Consumer worker pool size
    #[clap(long, default_value = "8")]
    workers: usize,

    /// Run one cycle and exit
    #[clap(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cachebox=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = ClientConfig::new(&args.server, &args.user, &args.root);
    config.poll_interval = Duration::from_secs(args.interval);
    config.workers = args.workers;

    let manager = SyncManager::new(config)?;

    if args.once {
        let report = manager.run_once().await?;
        tracing::info!(
            synced = report.synced,
            noops = report.noops,
            conflicts = report.conflicts,
            failed = report.failures.len(),
            "cycle complete"
        );
        for (path, kind) in &report.failures {
            tracing::warn!(%path, kind, "sync failed");
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    manager.run(shutdown_rx).await?;
    Ok(())
}
