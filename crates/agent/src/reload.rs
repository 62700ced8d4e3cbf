//! Detection-engine reload after new rules land.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::AgentError;

#[async_trait]
pub trait EngineReloader: Send + Sync {
    /// Make the engine pick up `rules_file`.
    async fn reload(&self, rules_file: &Path) -> Result<(), AgentError>;
}

/// Runs a fixed command line, e.g. `systemctl reload snort3`.
#[derive(Debug, Clone)]
pub struct CommandReloader {
    program: String,
    args: Vec<String>,
}

impl CommandReloader {
    /// Whitespace-split command line; `None` when it is blank.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl EngineReloader for CommandReloader {
    async fn reload(&self, rules_file: &Path) -> Result<(), AgentError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| AgentError::Reload(format!("{}: {}", self.program, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::Reload(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        info!(program = %self.program, rules = %rules_file.display(), "engine reloaded");
        Ok(())
    }
}

/// Used when reloads are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReload;

#[async_trait]
impl EngineReloader for NoReload {
    async fn reload(&self, rules_file: &Path) -> Result<(), AgentError> {
        debug!(rules = %rules_file.display(), "reload disabled");
        Ok(())
    }
}

/// Reloader for a configured command line.
pub fn reloader_for(command_line: &str) -> Box<dyn EngineReloader> {
    match CommandReloader::from_command_line(command_line) {
        Some(cmd) => Box::new(cmd),
        None => Box::new(NoReload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_is_split() {
        let cmd = CommandReloader::from_command_line("  systemctl reload  snort3 ").unwrap();
        assert_eq!(cmd.program, "systemctl");
        assert_eq!(cmd.args, vec!["reload", "snort3"]);
        assert!(CommandReloader::from_command_line("   ").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_decides_success() {
        let ok = CommandReloader::from_command_line("true").unwrap();
        assert!(ok.reload(Path::new("x.rules")).await.is_ok());

        let failing = CommandReloader::from_command_line("false").unwrap();
        let err = failing.reload(Path::new("x.rules")).await.unwrap_err();
        assert!(matches!(err, AgentError::Reload(_)));

        let missing = CommandReloader::from_command_line("/nonexistent/reload-engine").unwrap();
        assert!(missing.reload(Path::new("x.rules")).await.is_err());
    }
}
