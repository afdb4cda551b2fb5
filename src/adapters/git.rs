use crate::domain::ports::{CommandOutput, CommandRunner};
use crate::utils::error::{AgentError, Result};
use std::path::{Path, PathBuf};

/// 透過 CommandRunner 呼叫 git 的薄封裝
pub struct GitClient<'a> {
    runner: &'a dyn CommandRunner,
    cwd: PathBuf,
}

impl<'a> GitClient<'a> {
    pub fn new(runner: &'a dyn CommandRunner, cwd: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            cwd: cwd.into(),
        }
    }

    pub fn runner(&self) -> &'a dyn CommandRunner {
        self.runner
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub async fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner.run("git", args, Some(&self.cwd)).await
    }

    /// 執行並要求成功，回傳去除前後空白的 stdout
    async fn checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.success() {
            return Err(AgentError::CommandError {
                command: format!("git {}", args.join(" ")),
                message: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    pub async fn toplevel(&self) -> Result<PathBuf> {
        let out = self.checked(&["rev-parse", "--show-toplevel"]).await?;
        Ok(PathBuf::from(out))
    }

    /// 目前分支名稱；detached HEAD 視為錯誤
    pub async fn current_branch(&self) -> Result<String> {
        let branch = self.checked(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        if branch.is_empty() || branch == "HEAD" {
            return Err(AgentError::repository("detached HEAD not supported"));
        }
        Ok(branch)
    }

    /// Like `current_branch`, but never fails: detached HEAD yields `HEAD` and git errors yield `unknown`.
    pub async fn branch_or_unknown(&self) -> String {
        match self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                out.stdout.trim().to_string()
            }
            _ => "unknown".to_string(),
        }
    }

    pub async fn head(&self) -> Result<String> {
        self.checked(&["rev-parse", "HEAD"]).await
    }

    pub async fn status_porcelain(&self) -> Result<String> {
        let output = self.checked(&["status", "--porcelain"]).await?;
        Ok(output)
    }

    pub async fn verify_ref(&self, reference: &str) -> bool {
        matches!(
            self.run(&["rev-parse", "--verify", reference]).await,
            Ok(out) if out.success()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::process::test_support::ScriptedRunner;

    #[tokio::test]
    async fn test_detached_head_is_rejected() {
        let runner = ScriptedRunner::new().with("git rev-parse --abbrev-ref HEAD", 0, "HEAD\n");
        let git = GitClient::new(&runner, ".");
        let err = git.current_branch().await.unwrap_err();
        assert!(matches!(err, AgentError::RepositoryStateError { .. }));
        assert_eq!(git.branch_or_unknown().await, "HEAD");
    }

    #[tokio::test]
    async fn test_failed_command_surfaces_stderr() {
        let runner = ScriptedRunner::new().with("git rev-parse HEAD", 128, "");
        let git = GitClient::new(&runner, ".");
        assert!(matches!(
            git.head().await,
            Err(AgentError::CommandError { .. })
        ));
        assert!(!git.verify_ref("origin/main").await);
    }
}
