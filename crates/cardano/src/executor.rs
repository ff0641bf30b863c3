//! Subprocess execution seam.

use async_trait::async_trait;
use tokio::process::Command;

use crate::CardanoError;

/// Runs external commands. Implemented once for production and scripted
/// in tests.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args` and extra environment variables,
    /// returning its stdout on success.
    async fn exec(
        &self,
        envs: &[(&str, &str)],
        program: &str,
        args: &[String],
    ) -> Result<Vec<u8>, CardanoError>;
}

/// Production executor backed by [`tokio::process`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn exec(
        &self,
        envs: &[(&str, &str)],
        program: &str,
        args: &[String],
    ) -> Result<Vec<u8>, CardanoError> {
        let output = Command::new(program)
            .args(args)
            .envs(envs.iter().copied())
            .output()
            .await
            .map_err(|source| CardanoError::Io { program: program.to_owned(), source })?;

        if !output.status.success() {
            return Err(CardanoError::Command {
                program: program.to_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output.stdout)
    }
}
