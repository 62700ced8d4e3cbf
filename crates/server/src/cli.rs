//! CLI argument parsing and one-shot admin subcommands.

use std::collections::BTreeSet;

use clap::{Parser, Subcommand};
use tracing::info;

use fleet_rules::DeployTarget;

use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "fleet-server", version, about = "Sensor fleet console")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP console (default).
    Serve,
    /// Build the archive for a rule-set version.
    Build { version: String },
    /// Deploy a built version to every sensor, or only to `--sensor` ids.
    Deploy {
        version: String,
        #[arg(long = "sensor")]
        sensors: Vec<String>,
    },
    /// Raise the sid counter to the highest sid already stored.
    SeedSid,
}

impl Command {
    /// Deploy target from the `--sensor` list; empty means all.
    pub fn deploy_target(sensors: &[String]) -> DeployTarget {
        if sensors.is_empty() {
            DeployTarget::All
        } else {
            DeployTarget::List(sensors.iter().cloned().collect::<BTreeSet<_>>())
        }
    }
}

/// Run a non-serve subcommand against the shared state.
pub fn run_admin(state: &AppState, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Serve => {}
        Command::Build { version } => {
            let outcome = state.rules.build(version)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Deploy { version, sensors } => {
            let outcome = state
                .rules
                .deploy(version, &Command::deploy_target(sensors))?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::SeedSid => {
            let next = state.store.seed_sid_counter(state.config.rules.sid_start)?;
            info!(next_sid = next, "sid counter seeded");
            println!("next sid: {}", next);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default() {
        let cli = Cli::parse_from(["fleet-server"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn deploy_collects_repeated_sensors() {
        let cli = Cli::parse_from([
            "fleet-server",
            "deploy",
            "2025.01.01-000000-e1",
            "--sensor",
            "s1",
            "--sensor",
            "s2",
        ]);
        let Some(Command::Deploy { version, sensors }) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(version, "2025.01.01-000000-e1");
        assert_eq!(
            Command::deploy_target(&sensors),
            DeployTarget::List(["s1".to_string(), "s2".to_string()].into())
        );
        assert_eq!(Command::deploy_target(&[]), DeployTarget::All);
    }
}
