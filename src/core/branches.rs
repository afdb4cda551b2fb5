//! Branch/PR report for branches with commits not yet merged into the base.

use crate::adapters::git::GitClient;
use crate::domain::model::{BranchInfo, PullRequest};
use crate::utils::error::Result;
use std::collections::{BTreeMap, BTreeSet};

pub const BASE_REMOTE_ENV: &str = "BASE_REMOTE";
const FALLBACK_BRANCH: &str = "main";

/// 環境變數優先，其次為設定檔的值
pub fn base_remote(configured: &str) -> String {
    std::env::var(BASE_REMOTE_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| configured.to_string())
}

/// `refs/heads/x` -> `x`; `refs/remotes/<remote>/x` -> `x`; the remote `HEAD` and other refs are dropped.
pub fn normalize_ref(reference: &str, remote: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    if let Some(name) = reference.strip_prefix("refs/heads/") {
        return Some(name.to_string());
    }
    let remote_prefix = format!("refs/remotes/{}/", remote);
    match reference.strip_prefix(remote_prefix.as_str()) {
        Some("HEAD") | None => None,
        Some(name) => Some(name.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseRef {
    pub reference: String,
    pub branch: String,
}

pub struct BranchReporter<'a> {
    git: &'a GitClient<'a>,
    remote: String,
}

impl<'a> BranchReporter<'a> {
    pub fn new(git: &'a GitClient<'a>, remote: impl Into<String>) -> Self {
        Self {
            git,
            remote: remote.into(),
        }
    }

    pub async fn detect_default_branch(&self) -> String {
        let symbolic = format!("refs/remotes/{}/HEAD", self.remote);
        if let Ok(out) = self.git.run(&["symbolic-ref", symbolic.as_str()]).await {
            if out.success() {
                let prefix = format!("refs/remotes/{}/", self.remote);
                if let Some(branch) = out.stdout.trim().strip_prefix(prefix.as_str()) {
                    return branch.to_string();
                }
            }
        }
        FALLBACK_BRANCH.to_string()
    }

    pub async fn resolve_base_ref(&self) -> BaseRef {
        let default_branch = self.detect_default_branch().await;
        let candidates = [
            format!("{}/{}", self.remote, default_branch),
            default_branch,
            "origin/main".to_string(),
            FALLBACK_BRANCH.to_string(),
        ];
        for candidate in candidates {
            if self.git.verify_ref(&candidate).await {
                let branch = match candidate.split_once('/') {
                    Some((_, rest)) => rest.to_string(),
                    None => candidate.clone(),
                };
                return BaseRef {
                    reference: candidate,
                    branch,
                };
            }
        }
        BaseRef {
            reference: FALLBACK_BRANCH.to_string(),
            branch: FALLBACK_BRANCH.to_string(),
        }
    }

    pub async fn list_unmerged(&self, prefix: &str, base_ref: &str) -> Vec<String> {
        let args = ["for-each-ref", "--format=%(refname)", "--no-merged", base_ref, prefix];
        match self.git.run(&args).await {
            Ok(out) if out.success() => out
                .stdout
                .lines()
                .filter_map(|line| normalize_ref(line, &self.remote))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// `gh` 不存在或失敗時回傳空清單
    pub async fn list_prs(&self) -> Vec<PullRequest> {
        let args = ["pr", "list", "--json", "number,title,headRefName,state,createdAt"];
        match self.git.runner().run("gh", &args, Some(self.git.cwd())).await {
            Ok(out) if out.success() => serde_json::from_str(&out.stdout).unwrap_or_else(|e| {
                tracing::debug!("Ignoring unparseable gh output: {}", e);
                Vec::new()
            }),
            Ok(out) => {
                tracing::debug!("gh pr list exited with {}", out.status);
                Vec::new()
            }
            Err(e) => {
                tracing::debug!("gh unavailable: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn build_report(&self) -> Result<(Vec<BranchInfo>, String)> {
        let base = self.resolve_base_ref().await;
        let remote_refs = format!("refs/remotes/{}", self.remote);
        let remote_branches: BTreeSet<String> = self
            .list_unmerged(&remote_refs, &base.reference)
            .await
            .into_iter()
            .collect();
        let local_branches: BTreeSet<String> = self
            .list_unmerged("refs/heads", &base.reference)
            .await
            .into_iter()
            .collect();

        let mut branch_map: BTreeMap<String, BranchInfo> = remote_branches
            .union(&local_branches)
            .filter(|name| *name != &base.branch && !name.starts_with("archive/"))
            .map(|name| {
                let mut info = BranchInfo::new(name.clone());
                info.remote = remote_branches.contains(name);
                info.local = local_branches.contains(name);
                (name.clone(), info)
            })
            .collect();

        for pr in self.list_prs().await {
            let head = pr.head_ref_name.clone().unwrap_or_default();
            if let Some(info) = branch_map.get_mut(&head) {
                info.pr_number = pr.number;
                info.pr_title = pr.title;
                info.pr_state = pr.state;
                info.pr_created_at = pr.created_at;
            }
        }

        tracing::debug!("{} branches unmerged into {}", branch_map.len(), base.reference);
        Ok((branch_map.into_values().collect(), base.branch))
    }
}

pub fn format_report(branches: &[BranchInfo], base_branch: &str) -> String {
    let mut lines = Vec::new();
    if branches.is_empty() {
        lines.push(format!(
            "No branches with unmerged commits relative to {}.",
            base_branch
        ));
        return lines.join("\n");
    }

    let header = format!("{:<40} {:<18} {:<45} {}", "Branch", "Status", "PR", "Action");
    let dashes = "-".repeat(header.chars().count());
    lines.push(header);
    lines.push(dashes);
    for info in branches {
        let pr_part = match info.pr_number {
            Some(number) => format!(
                "#{} – {} ({}, {})",
                number,
                info.pr_title.as_deref().unwrap_or(""),
                info.pr_state.as_deref().unwrap_or(""),
                info.pr_created_at.as_deref().unwrap_or("")
            ),
            None => "-".to_string(),
        };
        lines.push(format!(
            "{:<40} {:<18} {:<45} {}",
            info.name,
            info.status(),
            pr_part,
            info.action()
        ));
    }
    lines.push(String::new());
    lines.push("Tips:".to_string());
    lines.push(" - Request a quality review with `Senior review request: <branch-name>`".to_string());
    lines.push(" - Request an orientation with `Branch overview request: <branch-name>`".to_string());
    lines.join("\n")
}
