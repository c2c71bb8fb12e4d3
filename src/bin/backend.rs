use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use tokio::{net::TcpListener, signal};
use vidtube::{
    api::{self, AppState},
    auth::TokenService,
    config::{DEFAULT_CONFIG_PATH, load_runtime_config_from},
    media::LocalMediaStorage,
    security::service_identity,
    store::Store,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve the VidTube REST API.")]
struct Args {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the env-style config file")]
    config: PathBuf,
    #[arg(long = "host", value_name = "ADDR", help = "Listen address (overrides VIDTUBE_HOST)")]
    host: Option<String>,
    #[arg(long = "port", value_name = "PORT", help = "Listen port (overrides VIDTUBE_PORT)")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = load_runtime_config_from(&args.config, |key| std::env::var(key).ok())
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let account = service_identity(&[
        config.database_path.as_path(),
        config.media_root.as_path(),
        config.upload_dir.as_path(),
    ])?;
    log::info!("running as {account}");

    let store = Store::open(&config.database_path).context("opening database")?;
    let media = LocalMediaStorage::new(&config.media_root, config.media_public_url.clone())
        .context("initializing media storage")?;
    let tokens = TokenService::from_config(&config);
    let state = AppState::new(
        store,
        Arc::new(media),
        tokens,
        config.upload_dir.clone(),
        config.cookie_secure,
    );
    let app = api::router(state, config.max_upload_bytes);

    let addr = SocketAddr::new(
        config
            .host
            .parse()
            .with_context(|| format!("parsing listen address {:?}", config.host))?,
        config.port,
    );
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    log::info!("API server listening on http://{addr}");
    log::info!("using database {}", config.database_path.display());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    log::info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        log::error!("failed to install Ctrl+C handler: {err}");
    }
}
