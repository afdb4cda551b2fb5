//! 流程文件與 session 目錄的路徑解析

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

pub const SESSIONS_WRITE_DIR_ENV: &str = "PARALLELUS_SESSIONS_WRITE_DIR";
pub const AGENTRC_RELATIVE_PATH: &str = "parallelus/engine/agentrc";

static UNSAFE_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid slug pattern"));

fn unique_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

pub fn branch_notebooks_root(repo_root: &Path) -> PathBuf {
    repo_root.join("docs").join("branches")
}

pub fn branch_plan_path(repo_root: &Path, slugged_branch: &str) -> PathBuf {
    branch_notebooks_root(repo_root)
        .join(slugged_branch)
        .join("PLAN.md")
}

pub fn branch_progress_path(repo_root: &Path, slugged_branch: &str) -> PathBuf {
    branch_notebooks_root(repo_root)
        .join(slugged_branch)
        .join("PROGRESS.md")
}

/// `docs/branches/*/PROGRESS.md`, sorted.
pub fn iter_branch_progress_paths(repo_root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(branch_notebooks_root(repo_root)) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join("PROGRESS.md"))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    paths
}

pub fn docs_parallelus_root(repo_root: &Path) -> PathBuf {
    repo_root.join("docs").join("parallelus")
}

pub fn reviews_write_dir(repo_root: &Path) -> PathBuf {
    docs_parallelus_root(repo_root).join("reviews")
}

/// 新位置優先，其次為舊版 `docs/reviews`
pub fn reviews_read_dirs(repo_root: &Path) -> Vec<PathBuf> {
    unique_paths(vec![
        reviews_write_dir(repo_root),
        repo_root.join("docs").join("reviews"),
    ])
}

pub fn self_improvement_write_root(repo_root: &Path) -> PathBuf {
    docs_parallelus_root(repo_root).join("self-improvement")
}

pub fn self_improvement_read_roots(repo_root: &Path) -> Vec<PathBuf> {
    unique_paths(vec![
        self_improvement_write_root(repo_root),
        repo_root.join("docs").join("self-improvement"),
    ])
}

pub fn marker_write_path(repo_root: &Path, slugged_branch: &str) -> PathBuf {
    self_improvement_write_root(repo_root)
        .join("markers")
        .join(format!("{}.json", slugged_branch))
}

/// 第一個存在的 marker；都不存在時回傳寫入位置
pub fn marker_read_path(repo_root: &Path, slugged_branch: &str) -> PathBuf {
    self_improvement_read_roots(repo_root)
        .into_iter()
        .map(|root| root.join("markers").join(format!("{}.json", slugged_branch)))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| marker_write_path(repo_root, slugged_branch))
}

pub fn reports_write_dir(repo_root: &Path) -> PathBuf {
    self_improvement_write_root(repo_root).join("reports")
}

pub fn failures_write_dir(repo_root: &Path) -> PathBuf {
    self_improvement_write_root(repo_root).join("failures")
}

/// `feature/foo` -> `feature-foo`
pub fn branch_slug(branch: &str) -> String {
    branch.replace('/', "-")
}

pub fn capsule_branch_slug(branch: &str) -> String {
    let slug = UNSAFE_SLUG_CHARS
        .replace_all(&branch.replace('/', "-"), "-")
        .into_owned();
    if slug.is_empty() {
        "unknown-branch".to_string()
    } else {
        slug
    }
}

/// 將分支名稱拆成安全的路徑片段
pub fn sanitise_branch_path(branch: &str) -> PathBuf {
    let parts: Vec<String> = branch
        .split('/')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| UNSAFE_SLUG_CHARS.replace_all(part, "-").into_owned())
        .collect();
    if parts.is_empty() {
        return PathBuf::from("unknown-branch");
    }
    parts.iter().collect()
}

/// `~` expansion without touching the filesystem.
pub fn expand_home(value: &str) -> PathBuf {
    if value == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(value));
    }
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(value)
}

/// Removes `.` and `..` components lexically.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn resolve(path: &Path) -> PathBuf {
    path.canonicalize()
        .unwrap_or_else(|_| normalize_lexically(path))
}

pub fn normalize_repo_path(repo_root: &Path, value: &str) -> PathBuf {
    let path = expand_home(value);
    let path = if path.is_absolute() {
        path
    } else {
        repo_root.join(path)
    };
    resolve(&path)
}

/// 讀取 `parallelus/engine/agentrc` 的 KEY=VALUE 設定
pub fn load_agentrc(repo_root: &Path) -> HashMap<String, String> {
    match std::fs::read_to_string(repo_root.join(AGENTRC_RELATIVE_PATH)) {
        Ok(content) => parse_agentrc(&content),
        Err(_) => HashMap::new(),
    }
}

pub fn parse_agentrc(content: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let mut value = value.trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }
        values.insert(key.trim().to_string(), value.to_string());
    }
    values
}

pub fn sessions_write_root(repo_root: &Path) -> PathBuf {
    let override_dir = std::env::var(SESSIONS_WRITE_DIR_ENV).unwrap_or_default();
    let override_dir = override_dir.trim();
    if !override_dir.is_empty() {
        return normalize_repo_path(repo_root, override_dir);
    }
    resolve(&repo_root.join(".parallelus").join("sessions"))
}

pub fn sessions_legacy_root(repo_root: &Path) -> PathBuf {
    resolve(&repo_root.join("sessions"))
}

/// 寫入根目錄、設定的 SESSION_DIR、舊版 `sessions/`，依序去重
pub fn sessions_read_roots(repo_root: &Path, configured_root: Option<&str>) -> Vec<PathBuf> {
    let configured = match configured_root {
        Some(value) => Some(value.to_string()),
        None => load_agentrc(repo_root).remove("SESSION_DIR"),
    };

    let mut candidates = vec![sessions_write_root(repo_root)];
    if let Some(configured) = configured.filter(|value| !value.is_empty()) {
        candidates.push(normalize_repo_path(repo_root, &configured));
    }
    candidates.push(sessions_legacy_root(repo_root));
    unique_paths(candidates)
}

pub fn resolve_session_dir(
    repo_root: &Path,
    session_id: &str,
    configured_root: Option<&str>,
) -> PathBuf {
    sessions_read_roots(repo_root, configured_root)
        .into_iter()
        .map(|root| root.join(session_id))
        .find(|candidate| candidate.is_dir())
        .unwrap_or_else(|| sessions_write_root(repo_root).join(session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_docs_paths_layout() {
        let repo = Path::new("/repo");
        assert_eq!(
            branch_plan_path(repo, "feature-demo"),
            PathBuf::from("/repo/docs/branches/feature-demo/PLAN.md")
        );
        assert_eq!(
            marker_write_path(repo, "feature-demo"),
            PathBuf::from("/repo/docs/parallelus/self-improvement/markers/feature-demo.json")
        );
        assert_eq!(
            failures_write_dir(repo),
            PathBuf::from("/repo/docs/parallelus/self-improvement/failures")
        );
        assert_eq!(reviews_read_dirs(repo).len(), 2);
    }

    #[test]
    fn test_branch_slugs() {
        assert_eq!(branch_slug("feature/demo"), "feature-demo");
        assert_eq!(capsule_branch_slug("feature/a b@c"), "feature-a-b-c");
        assert_eq!(capsule_branch_slug(""), "unknown-branch");
        assert_eq!(
            sanitise_branch_path("feature/ odd name /x"),
            PathBuf::from("feature/odd-name/x")
        );
        assert_eq!(sanitise_branch_path("//"), PathBuf::from("unknown-branch"));
    }

    #[test]
    fn test_parse_agentrc() {
        let values = parse_agentrc(
            "# comment\nSESSION_DIR=\"custom/sessions\"\n\nBROKEN LINE\n BASE_BRANCH = main \n",
        );
        assert_eq!(values.get("SESSION_DIR").unwrap(), "custom/sessions");
        assert_eq!(values.get("BASE_BRANCH").unwrap(), "main");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_progress_paths_are_sorted() {
        let temp_dir = TempDir::new().unwrap();
        for slug in ["zeta", "alpha"] {
            let dir = temp_dir.path().join("docs/branches").join(slug);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("PROGRESS.md"), "# progress\n").unwrap();
        }
        std::fs::create_dir_all(temp_dir.path().join("docs/branches/empty")).unwrap();

        let paths = iter_branch_progress_paths(temp_dir.path());
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("alpha/PROGRESS.md"));
    }

    #[test]
    fn test_session_roots_include_configured_and_legacy() {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().canonicalize().unwrap();

        let roots = sessions_read_roots(&repo, Some("custom/sessions"));
        assert_eq!(roots.last().unwrap(), &repo.join("sessions"));
        assert!(roots.contains(&repo.join("custom/sessions")));

        let legacy = repo.join("sessions").join("20260207-legacy");
        std::fs::create_dir_all(&legacy).unwrap();
        assert_eq!(resolve_session_dir(&repo, "20260207-legacy", Some("custom/sessions")), legacy);
    }

    #[test]
    fn test_normalize_repo_path_handles_dot_segments() {
        let repo = Path::new("/nonexistent-repo-root");
        assert_eq!(
            normalize_repo_path(repo, "a/./b/../c"),
            PathBuf::from("/nonexistent-repo-root/a/c")
        );
        assert_eq!(
            normalize_repo_path(repo, "/abs/path"),
            PathBuf::from("/abs/path")
        );
    }
}
