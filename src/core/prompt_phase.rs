use crate::adapters::git::GitClient;
use serde_json::Value;
use std::path::{Component, Path};
use std::time::SystemTime;

pub const PHASE_ENV: &str = "CODEX_PHASE";
pub const REGISTRY_RELATIVE_PATH: &str = "parallelus/manuals/subagent-registry.json";

/// 提示列要顯示的項目
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum PhaseQuery {
    #[default]
    Phase,
    FullPhase,
    Branch,
    Heartbeat,
    GitStatus,
    Worktree,
}

/// 環境變數優先；否則 main 為 Recon & Planning，其餘為 Active Execution
pub fn current_phase(branch: &str) -> String {
    if let Ok(phase) = std::env::var(PHASE_ENV) {
        if !phase.is_empty() {
            return phase;
        }
    }
    if branch == "main" {
        "Recon & Planning".to_string()
    } else {
        "Active Execution".to_string()
    }
}

pub fn abbreviate_phase(name: &str) -> String {
    if name.is_empty() {
        return "-".to_string();
    }
    let lowered = name.to_lowercase();
    if lowered.contains("recon") {
        "Recon".to_string()
    } else if lowered.contains("active") {
        "Active".to_string()
    } else if lowered.contains("transition") {
        "Transition".to_string()
    } else if lowered.contains("turn") && lowered.contains("end") {
        "Turn-End".to_string()
    } else {
        name.split_whitespace().next().unwrap_or("-").to_string()
    }
}

fn running_log_ages(rows: &[Value], repo_root: &Path, now: SystemTime) -> Option<Vec<u64>> {
    let mut ages = Vec::new();
    for row in rows {
        let log = row.get("log_path").and_then(Value::as_str).filter(|l| !l.is_empty());
        let Some(log) = log else { continue };
        let Ok(meta) = std::fs::metadata(repo_root.join(log)) else {
            continue;
        };
        let modified = meta.modified().ok()?;
        let age = now.duration_since(modified).map(|d| d.as_secs()).unwrap_or(0);
        ages.push(age);
    }
    Some(ages)
}

/// 子代理心跳：執行中紀錄檔的最久未更新時間 (MM:SS)
pub fn heartbeat(repo_root: &Path, now: SystemTime) -> String {
    let registry = repo_root.join(REGISTRY_RELATIVE_PATH);
    let Ok(content) = std::fs::read_to_string(&registry) else {
        return "-".to_string();
    };
    let Ok(Value::Array(rows)) = serde_json::from_str::<Value>(&content) else {
        return "err".to_string();
    };
    if rows.iter().any(|row| !row.is_object()) {
        return "err".to_string();
    }

    let running: Vec<Value> = rows
        .into_iter()
        .filter(|row| row.get("status").and_then(Value::as_str) == Some("running"))
        .collect();
    if running.is_empty() {
        return "ready".to_string();
    }
    match running_log_ages(&running, repo_root, now) {
        None => "err".to_string(),
        Some(ages) => match ages.into_iter().max() {
            Some(worst) => format!("{:02}:{:02}", worst / 60, worst % 60),
            None => "-".to_string(),
        },
    }
}

pub async fn git_status_indicator(git: &GitClient<'_>) -> String {
    match git.run(&["status", "--porcelain"]).await {
        Ok(out) if out.success() => {
            let dirty = out.stdout.lines().filter(|line| !line.trim().is_empty()).count();
            if dirty > 0 {
                format!("Δ{}", dirty)
            } else {
                "✓".to_string()
            }
        }
        _ => "-".to_string(),
    }
}

/// 依 `.git` 型態判斷：目錄為主 repo，檔案為 worktree
pub fn worktree_indicator_for(toplevel: &Path) -> String {
    let git_path = toplevel.join(".git");
    if !git_path.is_file() {
        return "•".to_string();
    }
    let Ok(content) = std::fs::read_to_string(&git_path) else {
        return "WT".to_string();
    };
    let Some(gitdir) = content.trim().strip_prefix("gitdir:") else {
        return "WT".to_string();
    };
    let parts: Vec<String> = Path::new(gitdir.trim())
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let slug = parts
        .iter()
        .position(|part| part == "worktrees")
        .and_then(|idx| parts.get(idx + 1));
    match slug {
        Some(slug) => format!("WT:{}", slug),
        None => "WT".to_string(),
    }
}

pub async fn worktree_indicator(git: &GitClient<'_>) -> String {
    match git.toplevel().await {
        Ok(toplevel) => worktree_indicator_for(&toplevel),
        Err(_) => "-".to_string(),
    }
}

pub async fn render(query: PhaseQuery, git: &GitClient<'_>, repo_root: &Path) -> String {
    match query {
        PhaseQuery::Branch => git.branch_or_unknown().await,
        PhaseQuery::Heartbeat => heartbeat(repo_root, SystemTime::now()),
        PhaseQuery::GitStatus => git_status_indicator(git).await,
        PhaseQuery::Worktree => worktree_indicator(git).await,
        PhaseQuery::FullPhase => current_phase(&git.branch_or_unknown().await),
        PhaseQuery::Phase => abbreviate_phase(&current_phase(&git.branch_or_unknown().await)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::process::test_support::ScriptedRunner;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_abbreviate_phase() {
        assert_eq!(abbreviate_phase(""), "-");
        assert_eq!(abbreviate_phase("Recon & Planning"), "Recon");
        assert_eq!(abbreviate_phase("Active Execution"), "Active");
        assert_eq!(abbreviate_phase("Phase Transition"), "Transition");
        assert_eq!(abbreviate_phase("turn end"), "Turn-End");
        assert_eq!(abbreviate_phase("Cleanup duties"), "Cleanup");
    }

    #[test]
    fn test_heartbeat_states() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path();
        assert_eq!(heartbeat(repo, SystemTime::now()), "-");

        let registry = repo.join(REGISTRY_RELATIVE_PATH);
        std::fs::create_dir_all(registry.parent().unwrap()).unwrap();
        std::fs::write(&registry, "{not json").unwrap();
        assert_eq!(heartbeat(repo, SystemTime::now()), "err");

        std::fs::write(&registry, r#"[{"status": "completed"}]"#).unwrap();
        assert_eq!(heartbeat(repo, SystemTime::now()), "ready");

        std::fs::write(&registry, r#"[{"status": "running", "log_path": "missing.log"}]"#).unwrap();
        assert_eq!(heartbeat(repo, SystemTime::now()), "-");

        std::fs::write(repo.join("sub.log"), "working\n").unwrap();
        std::fs::write(&registry, r#"[{"status": "running", "log_path": "sub.log"}]"#).unwrap();
        let modified = std::fs::metadata(repo.join("sub.log")).unwrap().modified().unwrap();
        assert_eq!(heartbeat(repo, modified + Duration::from_secs(125)), "02:05");
    }

    #[test]
    fn test_worktree_indicator_for() {
        let dir = TempDir::new().unwrap();
        assert_eq!(worktree_indicator_for(dir.path()), "•");

        std::fs::write(dir.path().join(".git"), "gitdir: /repo/.git/worktrees/feature-x\n").unwrap();
        assert_eq!(worktree_indicator_for(dir.path()), "WT:feature-x");

        std::fs::write(dir.path().join(".git"), "gitdir: /elsewhere/.git\n").unwrap();
        assert_eq!(worktree_indicator_for(dir.path()), "WT");

        std::fs::write(dir.path().join(".git"), "garbage\n").unwrap();
        assert_eq!(worktree_indicator_for(dir.path()), "WT");

        std::fs::remove_file(dir.path().join(".git")).unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        assert_eq!(worktree_indicator_for(dir.path()), "•");
    }

    #[tokio::test]
    async fn test_git_status_indicator() {
        let dirty = ScriptedRunner::new().with("git status --porcelain", 0, " M a.rs\n?? b.rs\n\n");
        assert_eq!(git_status_indicator(&GitClient::new(&dirty, ".")).await, "Δ2");

        let clean = ScriptedRunner::new().with("git status --porcelain", 0, "");
        assert_eq!(git_status_indicator(&GitClient::new(&clean, ".")).await, "✓");

        let failing = ScriptedRunner::new();
        assert_eq!(git_status_indicator(&GitClient::new(&failing, ".")).await, "-");
    }

    #[tokio::test]
    async fn test_render_branch_query() {
        let runner = ScriptedRunner::new().with("git rev-parse --abbrev-ref HEAD", 0, "feature/x\n");
        let git = GitClient::new(&runner, ".");
        assert_eq!(render(PhaseQuery::Branch, &git, Path::new(".")).await, "feature/x");
        assert_eq!(
            render(PhaseQuery::Worktree, &git, Path::new(".")).await,
            "-"
        );
    }
}
