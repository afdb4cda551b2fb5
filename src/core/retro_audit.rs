use crate::adapters::git::GitClient;
use crate::config::paths;
use crate::core::failures::load_marker;
use crate::domain::model::{Failure, FailureSummary, RetroIssue, RetroReport};
use crate::domain::ports::Storage;
use crate::utils::error::{AgentError, Result};
use crate::utils::text::{display_value, is_truthy, truncate_chars};
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const REPORT_MODE: &str = "local_commit_aware";
const DETAIL_LIMIT: usize = 240;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid issue id pattern"));

pub fn sanitize_issue_id(text: &str, idx: usize) -> String {
    let lowered = text.to_lowercase();
    let cleaned = NON_ALNUM.replace_all(&lowered, "-");
    let cleaned = cleaned.trim_matches('-');
    let cleaned = if cleaned.is_empty() { "issue" } else { cleaned };
    format!("{}-{}", cleaned, idx)
}

fn optional_text(value: Option<&Value>) -> String {
    value
        .filter(|v| is_truthy(v))
        .map(display_value)
        .unwrap_or_default()
}

pub fn build_issues(failures: &[Failure], warnings: &[String]) -> Vec<RetroIssue> {
    let mut issues = Vec::new();

    for (idx, item) in failures.iter().enumerate() {
        let kind = if item.kind.is_empty() { "failure" } else { item.kind.as_str() };
        let source = if item.source.is_empty() {
            "unknown-source"
        } else {
            item.source.as_str()
        };
        let command = optional_text(item.command.as_ref());
        let exit_code = item
            .exit_code
            .as_ref()
            .filter(|code| !code.is_null())
            .map(display_value)
            .unwrap_or_else(|| "None".to_string());
        let excerpt = match item.excerpt.as_deref().filter(|e| !e.is_empty()) {
            Some(excerpt) => excerpt.to_string(),
            None => {
                let error = optional_text(item.error.as_ref());
                if error.is_empty() {
                    optional_text(item.stderr.as_ref())
                } else {
                    error
                }
            }
        };
        let details = [command, excerpt]
            .into_iter()
            .find(|text| !text.is_empty())
            .unwrap_or_else(|| "no extra details".to_string());
        let details = truncate_chars(&details, DETAIL_LIMIT);

        issues.push(RetroIssue {
            id: sanitize_issue_id(kind, idx + 1),
            root_cause: format!(
                "Tool execution recorded a '{}' event while collecting retrospective evidence.",
                kind
            ),
            mitigation: "Inspect the failing command/log source and re-run the failing step on the current commit.".to_string(),
            prevention: "Keep the retrospective preflight serialized and add/maintain regression coverage for recurring failures.".to_string(),
            evidence: format!("source={}; exit_code={}; details={}", source, exit_code, details),
        });
    }

    for (idx, warning) in warnings.iter().enumerate() {
        issues.push(RetroIssue {
            id: sanitize_issue_id("warning", idx + 1),
            root_cause: "Retrospective evidence collection produced a warning.".to_string(),
            mitigation: "Inspect the warning source and refresh the failures summary for the current marker.".to_string(),
            prevention: "Keep evidence sources deterministic and avoid stale or empty session artifacts.".to_string(),
            evidence: warning.clone(),
        });
    }
    issues
}

/// 依是否有 issue 產生摘要與後續步驟
pub fn summarize(issues: &[RetroIssue]) -> (String, Vec<String>) {
    if issues.is_empty() {
        (
            "No blocking issues detected. Marker and marker-matched failures summary align to the current commit.".to_string(),
            vec![
                "Keep preflight serialized: retro-marker -> collect_failures -> retro_audit_local.".to_string(),
                "Re-run preflight whenever HEAD changes before senior review launch.".to_string(),
            ],
        )
    } else {
        (
            "Retrospective preflight found evidence issues in the marker-matched failures summary; resolve before senior review.".to_string(),
            vec![
                "Address each marker-matched failures/warnings issue and regenerate retrospective artifacts.".to_string(),
                "Re-run the serialized preflight pipeline before launching senior review.".to_string(),
            ],
        )
    }
}

/// Marker-adjacent failures summary first, then the canonical write location.
async fn locate_failures<S: Storage>(
    storage: &S,
    repo_root: &Path,
    marker_path: &Path,
    file_name: &str,
) -> Result<PathBuf> {
    let marker_root = marker_path
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths::self_improvement_write_root(repo_root));
    let candidates = [
        marker_root.join("failures").join(file_name),
        paths::failures_write_dir(repo_root).join(file_name),
    ];
    for candidate in candidates {
        if storage.exists(&candidate.to_string_lossy()).await {
            return Ok(candidate);
        }
    }
    Err(AgentError::not_found(
        "marker-matched failures summary; run collect-failures after the retro marker",
    ))
}

pub async fn audit_for<S: Storage>(
    storage: &S,
    repo_root: &Path,
    branch: &str,
    head: &str,
) -> Result<(PathBuf, RetroReport)> {
    let slugged = paths::branch_slug(branch);
    let (marker_path, marker, marker_ts) = load_marker(storage, repo_root, &slugged).await?;
    if let Some(marker_head) = marker.head.as_deref().filter(|h| !h.is_empty()) {
        if marker_head != head {
            return Err(AgentError::marker(format!(
                "marker head mismatch (marker={}, current={}); rerun the retro marker",
                marker_head, head
            )));
        }
    }

    let file_name = format!("{}--{}.json", slugged, marker_ts);
    let failures_path = locate_failures(storage, repo_root, &marker_path, &file_name).await?;
    tracing::debug!("Using failures summary {}", failures_path.display());
    let raw = storage.read_file(&failures_path.to_string_lossy()).await?;
    let failures_data: FailureSummary = serde_json::from_slice(&raw)?;

    let issues = build_issues(&failures_data.failures, &failures_data.warnings);
    let (summary, follow_ups) = summarize(&issues);
    let report = RetroReport {
        branch: branch.to_string(),
        marker_timestamp: marker_ts,
        summary,
        issues,
        follow_ups,
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        mode: REPORT_MODE.to_string(),
    };

    let report_path = paths::reports_write_dir(repo_root).join(&file_name);
    let body = serde_json::to_string_pretty(&report)? + "\n";
    storage
        .write_file(&report_path.to_string_lossy(), body.as_bytes())
        .await?;
    tracing::info!("Retro report has {} issues", report.issues.len());
    Ok((report_path, report))
}

/// 以目前分支與 HEAD 執行本地回顧稽核
pub async fn audit<S: Storage>(
    storage: &S,
    git: &GitClient<'_>,
    repo_root: &Path,
) -> Result<(PathBuf, RetroReport)> {
    let branch = git.current_branch().await?;
    let head = git.head().await?;
    audit_for(storage, repo_root, &branch, &head).await
}
