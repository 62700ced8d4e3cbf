use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleet_core::{Clock, Config, SystemClock};
use fleet_server::cli::{run_admin, Cli, Command};
use fleet_server::{build_router, AppState};
use fleet_storage::FleetStore;

fn load_config() -> Config {
    fleet_core::config::load_dotenv();
    Config::from_env()
}

async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let seeded = state.store.seed_sid_counter(state.config.rules.sid_start)?;
    info!(next_sid = seeded, sensors = state.store.sensor_count(), "catalogue loaded");

    let app = build_router(Arc::clone(&state));
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Console listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.scheduler().shutdown();
    info!("console stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl-c handler failed");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = load_config();
    config.log_summary();

    let store = Arc::new(FleetStore::open(config.storage.data_dir.clone())?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = Arc::new(AppState::new(config, store, clock));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        other => run_admin(&state, &other),
    }
}
