//! sensor-agent: keeps one sensor reporting to the console and its rule
//! directory converged on the desired versions.

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleet_agent::client::{ConsoleClient, StatusPayload};
use fleet_agent::{reloader_for, Agent, AgentConfig};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "ctrl-c handler failed");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler failed");
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
    info!("termination signal received");
}

/// Last-resort `inactive` report when the agent cannot start.
async fn report_inactive(config: &AgentConfig) {
    let Ok(client) = ConsoleClient::new(config) else {
        return;
    };
    let payload = StatusPayload {
        sensor_id: config.sensor_id.clone(),
        status: "inactive".to_string(),
        rule_version: None,
        rule_versions: Vec::new(),
    };
    if let Err(e) = client.status(&payload).await {
        warn!(error = %e, "inactive report failed");
    }
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

    let config = AgentConfig::parse();
    config.log_summary();

    let reloader = reloader_for(&config.reload_command);
    let agent = match Agent::new(config.clone(), reloader) {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "agent failed to start");
            report_inactive(&config).await;
            return Err(e.into());
        }
    };

    agent.run(shutdown_signal()).await;
    info!("sensor agent stopped");
    Ok(())
}
