use crate::adapters::git::GitClient;
use crate::config::paths;
use crate::domain::model::{Failure, FailureSummary, Marker};
use crate::domain::ports::Storage;
use crate::utils::error::{AgentError, Result};
use crate::utils::text::{first_truthy, is_truthy, take_chars};
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

const MAX_TEXT_HITS: usize = 50;
const EXCERPT_CHARS: usize = 300;

static TEXT_FAILURE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)\bERROR\b", r"\bTraceback\b", r"(?i)exit code\s+([1-9][0-9]*)"]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("valid failure pattern"))
        .collect()
});

/// 讀取分支的 retro marker，並要求其帶有 timestamp
pub async fn load_marker<S: Storage>(
    storage: &S,
    repo_root: &Path,
    slugged_branch: &str,
) -> Result<(PathBuf, Marker, String)> {
    let marker_path = paths::marker_read_path(repo_root, slugged_branch);
    if !storage.exists(&marker_path.to_string_lossy()).await {
        return Err(AgentError::marker(
            "marker not found; run the retro marker step before collecting failures",
        ));
    }
    let raw = storage.read_file(&marker_path.to_string_lossy()).await?;
    let marker: Marker = serde_json::from_slice(&raw).map_err(|e| {
        AgentError::marker(format!("unable to parse {}: {}", marker_path.display(), e))
    })?;
    let timestamp = marker
        .timestamp
        .clone()
        .filter(|ts| !ts.is_empty())
        .ok_or_else(|| {
            AgentError::marker(format!("marker {} missing timestamp", marker_path.display()))
        })?;
    Ok((marker_path, marker, timestamp))
}

/// `root/**/<file_name>`, dot-directories included
fn walk_named(root: &Path, file_name: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == file_name)
        .map(|entry| entry.into_path())
        .collect();
    found.sort();
    found
}

pub fn candidate_sources(repo_root: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(entries) = std::fs::read_dir(repo_root.join("sessions")) {
        let mut logs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path().join("console.log"))
            .filter(|path| path.is_file())
            .collect();
        logs.sort();
        candidates.extend(logs);
    }

    let parallelus = repo_root.join(".parallelus");
    candidates.extend(walk_named(&parallelus, "subagent.exec_events.jsonl"));
    candidates.extend(walk_named(&parallelus, "subagent.session.jsonl"));

    let runs = repo_root.join("docs").join("guardrails").join("runs");
    candidates.extend(walk_named(&runs, "session.jsonl"));
    candidates.extend(walk_named(&runs, "subagent.exec_events.jsonl"));
    candidates
}

fn nonzero_exit(code: &Value) -> bool {
    match code {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => s.trim().parse::<i64>().map(|c| c != 0).unwrap_or(true),
        _ => true,
    }
}

/// 將單一 JSONL 事件分類為失敗，不相關時回傳 None
pub fn classify_event(source: &str, event: &Value) -> Option<Failure> {
    let msg = first_truthy(event, &["msg", "payload"]).unwrap_or(event);
    let msg_type = msg.get("type").and_then(Value::as_str).filter(|t| !t.is_empty());

    match msg_type {
        Some("exec_command_end") => {
            let exit_code = msg.get("exit_code").filter(|c| !c.is_null())?;
            if !nonzero_exit(exit_code) {
                return None;
            }
            Some(Failure {
                source: source.to_string(),
                kind: "exec_command_end".to_string(),
                exit_code: Some(exit_code.clone()),
                command: Some(
                    first_truthy(msg, &["command", "argv"])
                        .cloned()
                        .unwrap_or(Value::Null),
                ),
                stderr: Some(msg.get("stderr").cloned().unwrap_or(Value::Null)),
                ..Default::default()
            })
        }
        Some(kind) if kind.contains("error") => Some(Failure {
            source: source.to_string(),
            kind: kind.to_string(),
            error: Some(
                first_truthy(msg, &["error", "message"])
                    .unwrap_or(msg)
                    .clone(),
            ),
            ..Default::default()
        }),
        _ => {
            let error = msg.get("error").filter(|e| is_truthy(e))?;
            Some(Failure {
                source: source.to_string(),
                kind: msg_type.unwrap_or("error").to_string(),
                error: Some(error.clone()),
                ..Default::default()
            })
        }
    }
}

pub async fn scan_exec_events<S: Storage>(
    storage: &S,
    path: &Path,
    failures: &mut Vec<Failure>,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let key = path.to_string_lossy();
    if !storage.exists(&key).await {
        return Ok(());
    }
    let raw = storage.read_file(&key).await?;
    let source = path.display().to_string();
    for line in String::from_utf8_lossy(&raw).lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if let Some(failure) = classify_event(&source, &event) {
            failures.push(failure);
        }
    }
    if raw.is_empty() {
        warnings.push(format!("{} is empty", source));
    }
    Ok(())
}

pub async fn scan_text_log<S: Storage>(
    storage: &S,
    path: &Path,
    failures: &mut Vec<Failure>,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let key = path.to_string_lossy();
    if !storage.exists(&key).await {
        return Ok(());
    }
    let raw = storage.read_file(&key).await?;
    let source = path.display().to_string();
    let mut hits = 0;
    for line in String::from_utf8_lossy(&raw).lines() {
        if !TEXT_FAILURE_PATTERNS.iter().any(|p| p.is_match(line)) {
            continue;
        }
        failures.push(Failure {
            source: source.clone(),
            kind: "unstructured_log".to_string(),
            excerpt: Some(take_chars(line.trim(), EXCERPT_CHARS)),
            ..Default::default()
        });
        hits += 1;
        if hits >= MAX_TEXT_HITS {
            warnings.push(format!(
                "{} produced many matches; truncated to {}",
                source, MAX_TEXT_HITS
            ));
            break;
        }
    }
    Ok(())
}

/// 針對指定分支收集失敗並寫入 `<failures dir>/<slug>--<ts>.json`
pub async fn collect_for_branch<S: Storage>(
    storage: &S,
    repo_root: &Path,
    branch: &str,
) -> Result<(PathBuf, FailureSummary)> {
    let slugged = paths::branch_slug(branch);
    let (_, _, marker_ts) = load_marker(storage, repo_root, &slugged).await?;

    let mut summary = FailureSummary {
        branch: branch.to_string(),
        marker_timestamp: marker_ts.clone(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        ..Default::default()
    };

    for path in candidate_sources(repo_root) {
        summary.sources.push(path.display().to_string());
        let is_jsonl = path.extension().is_some_and(|ext| ext == "jsonl");
        if is_jsonl {
            scan_exec_events(storage, &path, &mut summary.failures, &mut summary.warnings).await?;
        } else {
            scan_text_log(storage, &path, &mut summary.failures, &mut summary.warnings).await?;
        }
    }
    tracing::info!(
        "Collected {} failures from {} sources",
        summary.failures.len(),
        summary.sources.len()
    );

    let out_path = paths::failures_write_dir(repo_root).join(format!("{}--{}.json", slugged, marker_ts));
    let body = serde_json::to_string_pretty(&summary)? + "\n";
    storage
        .write_file(&out_path.to_string_lossy(), body.as_bytes())
        .await?;
    Ok((out_path, summary))
}

pub async fn collect_failures<S: Storage>(
    storage: &S,
    git: &GitClient<'_>,
    repo_root: &Path,
) -> Result<(PathBuf, FailureSummary)> {
    let branch = git.current_branch().await?;
    collect_for_branch(storage, repo_root, &branch).await
}
