//! OCI registry server.

use camino::Utf8PathBuf;
use clap::Parser;
use eyre::WrapErr;
use registry::{RegistryBuilder, RegistryConfig};
use storage::StorageConfig;
use tower_http::trace::TraceLayer;
use tracing_error::ErrorLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Serve an OCI distribution registry
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "REGISTRY_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Address to listen on, overriding the config file
    #[arg(short, long, env = "REGISTRY_LISTEN")]
    listen: Option<std::net::SocketAddr>,

    /// Serve from a local storage directory, overriding the config file
    #[arg(long, env = "REGISTRY_STORAGE_PATH")]
    storage_path: Option<Utf8PathBuf>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(ErrorLayer::default())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RegistryConfig::load(path)
            .await
            .wrap_err("loading configuration")?,
        None => RegistryConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(path) = args.storage_path {
        config.storage = StorageConfig::Local { path };
    }

    let storage = config
        .storage
        .build()
        .await
        .wrap_err("initializing storage")?;
    tracing::info!(driver = storage.name(), "storage ready");

    let app = RegistryBuilder::new()
        .storage(storage)
        .build()
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .wrap_err_with(|| format!("binding {}", config.listen))?;
    tracing::info!(addr = %config.listen, "registry listening");

    axum::serve(listener, app).await.wrap_err("serving")?;
    Ok(())
}
