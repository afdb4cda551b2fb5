use crate::domain::ports::{CommandOutput, CommandRunner};
use crate::utils::error::{AgentError, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// 以 tokio 子行程執行外部指令
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> Result<CommandOutput> {
        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        tracing::debug!("Running {} {}", program, args.join(" "));
        let output = command.output().await.map_err(|e| AgentError::CommandError {
            command: format!("{} {}", program, args.join(" ")),
            message: e.to_string(),
        })?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_command_error() {
        let runner = SystemCommandRunner;
        let result = runner
            .run("definitely-not-a-real-binary-4821", &["--version"], None)
            .await;
        assert!(matches!(result, Err(AgentError::CommandError { .. })));
    }
}
