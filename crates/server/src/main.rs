use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ispnexus_routeros::RouterOsConnector;
use ispnexus_server::{
    config::ServerConfig, crypto::CredentialCipher, db, service::RouterService,
    sync::scheduler::spawn_periodic_sync, web,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Router connection and subscriber sync server")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    let file_appender = rolling::daily(log_dir, "ispnexus.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    // Routes `log` records from dependencies into tracing. Fails only if a
    // logger is already installed.
    let _ = tracing_log::LogTracer::init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();

    let config = ServerConfig::load(args.config.as_deref())?;
    init_logging(&config.log_dir);
    info!(listen_address = %config.listen_address, "Starting server...");

    let db = db::connect(&config.database_url).await?;
    let cipher = CredentialCipher::from_hex(&config.credential_key)?;
    let service = Arc::new(RouterService::new(
        db,
        cipher,
        Duration::from_secs(config.default_timeout_seconds),
        Arc::new(RouterOsConnector::new()),
    ));

    let sync_task = spawn_periodic_sync(service.clone(), config.sync_interval_seconds);

    let app_router = web::create_axum_router(service);
    let listener = tokio::net::TcpListener::bind(&config.listen_address).await?;
    info!("HTTP server listening on {}", config.listen_address);
    axum::serve(listener, app_router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sync_task {
        handle.abort();
    }
    info!("Server stopped.");
    Ok(())
}
