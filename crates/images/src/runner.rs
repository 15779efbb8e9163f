//! External command execution.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// A command that could not be started or exited unsuccessfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandFailure {
    /// Why the command failed
    pub message: String,
    /// Combined stdout and stderr, if the command ran
    pub output: String,
}

impl CommandFailure {
    /// Failure with combined output
    #[must_use]
    pub fn new(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: output.into(),
        }
    }

    /// Output if any, otherwise the message
    #[must_use]
    pub fn details(&self) -> &str {
        if self.output.trim().is_empty() {
            &self.message
        } else {
            &self.output
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.details())
    }
}

impl std::error::Error for CommandFailure {}

/// Runs external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args...` in `cwd`, returning combined stdout and stderr
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> Result<String, CommandFailure>;
}

/// Runs commands as tokio child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> Result<String, CommandFailure> {
        debug!(program, ?args, cwd = %cwd.display(), "Running command");
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| CommandFailure::new(format!("Failed to execute {program}: {e}"), ""))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(CommandFailure::new(
                format!("{program} exited with {}", output.status),
                combined,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_details_prefer_output() {
        let failure = CommandFailure::new("exit 1", "no basic auth credentials");
        assert_eq!(failure.details(), "no basic auth credentials");
        let failure = CommandFailure::new("not found", "  ");
        assert_eq!(failure.to_string(), "not found");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = TokioCommandRunner
            .run("skyhook-definitely-not-a-program", &[], dir.path())
            .await
            .unwrap_err();
        assert!(err.message.contains("Failed to execute"));
        assert!(err.output.is_empty());
    }
}
