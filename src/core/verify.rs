use crate::adapters::git::GitClient;
use crate::utils::error::{AgentError, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const SMOKE_TEST_NOTE: &str = "Smoke test updated";

fn relative(repo: &Path, path: &Path) -> String {
    path.strip_prefix(repo).unwrap_or(path).display().to_string()
}

pub fn assert_readme(repo: &Path) -> Result<()> {
    let readme = repo.join("README.md");
    let content = std::fs::read_to_string(&readme)
        .map_err(|_| AgentError::verification("README.md missing"))?;
    if !content.contains(SMOKE_TEST_NOTE) {
        return Err(AgentError::verification("README does not include smoke test note"));
    }
    Ok(())
}

/// 最近修改的 session 目錄需有 summary.md 與合法的 meta.json
pub fn assert_session(repo: &Path) -> Result<PathBuf> {
    let sessions_dir = repo.join("sessions");
    let entries = std::fs::read_dir(&sessions_dir)
        .map_err(|_| AgentError::verification("sessions directory missing"))?;

    let latest = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
        .ok_or_else(|| AgentError::verification("no session directory created"))?;

    if !latest.join("summary.md").is_file() {
        return Err(AgentError::verification(format!(
            "session summary not found in {}",
            relative(repo, &latest)
        )));
    }
    let meta = latest.join("meta.json");
    let content = std::fs::read_to_string(&meta).map_err(|_| {
        AgentError::verification(format!("session meta.json missing in {}", relative(repo, &latest)))
    })?;
    serde_json::from_str::<serde_json::Value>(&content).map_err(|e| {
        AgentError::verification(format!("session meta.json in {} is invalid: {}", relative(repo, &latest), e))
    })?;
    Ok(latest)
}

pub async fn assert_git_clean(git: &GitClient<'_>) -> Result<()> {
    let status = git.status_porcelain().await?;
    if !status.trim().is_empty() {
        return Err(AgentError::verification("git status not clean after run"));
    }
    Ok(())
}

fn feature_notebooks(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("feature-") && name.ends_with(".md"))
        })
        .collect();
    found.sort();
    found
}

pub fn assert_notebooks_removed(repo: &Path) -> Result<()> {
    let docs = repo.join("docs");
    let mut leftovers = feature_notebooks(&docs.join("plans"));
    leftovers.extend(feature_notebooks(&docs.join("progress")));
    if leftovers.is_empty() {
        return Ok(());
    }
    let listed: Vec<String> = leftovers.iter().map(|p| relative(repo, p)).collect();
    Err(AgentError::verification(format!(
        "feature notebooks still present after merge: {}",
        listed.join(", ")
    )))
}

/// 依序檢查 README、session、git 狀態與 feature notebook
pub async fn verify_process_run(git: &GitClient<'_>, repo: &Path) -> Result<()> {
    if !repo.exists() {
        return Err(AgentError::verification(format!(
            "repo path {} does not exist",
            repo.display()
        )));
    }
    assert_readme(repo)?;
    let latest = assert_session(repo)?;
    tracing::debug!("Latest session {}", latest.display());
    assert_git_clean(git).await?;
    assert_notebooks_removed(repo)?;
    Ok(())
}
