use cachebox::{create_router, ServerConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The cachebox caching server.
#[derive(Parser, Debug)]
#[clap(name = "cachebox-server")]
#[clap(about = "Permission-checked caching server for datasite sync", long_about = None)]
struct Args {
    /// Directory holding the authoritative datasite snapshot
    #[clap(long, value_name = "DIR", default_value = "./snapshot")]
    snapshot: PathBuf,

    /// Port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// Require admin (not just write) permission for deletes
    #[clap(long)]
    admin_only_delete: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cachebox=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::new(&args.snapshot);
    config.admin_only_delete = args.admin_only_delete;

    let app = create_router(config)?;
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, snapshot = %args.snapshot.display(), "cachebox server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
