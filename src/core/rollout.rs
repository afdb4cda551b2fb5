use crate::core::redact::{redact_text, redact_value};
use crate::domain::ports::Storage;
use crate::utils::error::{AgentError, Result};
use crate::utils::text::{display_value, first_truthy, is_truthy};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct RolloutRequest {
    pub nonce: String,
    pub sessions_root: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub output_jsonl: Option<PathBuf>,
    pub output_md: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutExtraction {
    pub source: PathBuf,
    pub jsonl_path: PathBuf,
    pub markdown_path: PathBuf,
    pub events: usize,
}

fn is_rollout_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with("rollout-") && name.ends_with(".jsonl"))
        .unwrap_or(false)
}

/// 找出內容含有 nonce 的 `rollout-*.jsonl`，依路徑排序
pub fn find_rollouts(root: &Path, nonce: &str) -> Vec<PathBuf> {
    let mut rollouts: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file() && is_rollout_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    rollouts.sort();

    rollouts
        .into_iter()
        .filter(|path| match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes)
                .lines()
                .any(|line| line.contains(nonce)),
            Err(_) => false,
        })
        .collect()
}

fn modified_at(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// `$SESSION_DIR/artifacts` when that session has a console log, else `sessions/extracted`.
pub fn default_output_dir(repo_root: &Path, session_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = session_dir.filter(|d| !d.as_os_str().is_empty()) {
        if dir.join("console.log").exists() {
            return dir.join("artifacts");
        }
    }
    repo_root.join("sessions").join("extracted")
}

fn extract_text(value: &Value) -> String {
    match value {
        Value::Object(obj) if obj.contains_key("text") => display_value(&obj["text"]),
        Value::Object(obj) if obj.contains_key("content") => extract_text(&obj["content"]),
        Value::Array(items) => items
            .iter()
            .map(extract_text)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Null => String::new(),
        other => display_value(other),
    }
}

fn fenced(lines: &mut Vec<String>, body: String) {
    lines.push("```".to_string());
    lines.push(body);
    lines.push("```".to_string());
}

/// 事件本身或其 msg 物件上的欄位
fn event_field<'a>(ev: &'a Value, msg: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    first_truthy(ev, &[key]).or_else(|| {
        msg.filter(|m| m.is_object())
            .and_then(|m| m.get(key))
            .filter(|v| is_truthy(v))
    })
}

fn command_text(command: &Value) -> String {
    match command {
        Value::Array(parts) => parts.iter().map(display_value).collect::<Vec<_>>().join(" "),
        other => display_value(other),
    }
}

pub fn render_markdown(events: &[Value], source_path: &Path) -> String {
    let mut lines = vec![
        "# Codex Rollout Transcript".to_string(),
        String::new(),
        format!("- Source: {}", source_path.display()),
        format!("- Events: {}", events.len()),
        String::new(),
    ];

    for ev in events {
        let msg = first_truthy(ev, &["msg", "message", "payload"]);
        let etype = first_truthy(ev, &["type", "event", "kind"])
            .or_else(|| msg.and_then(|m| first_truthy(m, &["type", "event"])))
            .map(display_value)
            .unwrap_or_default();

        if etype == "token_count" {
            continue;
        }

        let prefix = first_truthy(ev, &["timestamp", "time", "ts", "created_at"])
            .map(|value| format!("{} ", display_value(value)))
            .unwrap_or_default();

        match etype.as_str() {
            "turn_context" => {
                if let Some(cwd) = event_field(ev, msg, "cwd") {
                    lines.push(format!("- {}[context] cwd: `{}`", prefix, display_value(cwd)));
                }
            }
            "function_call" => {
                let name = first_truthy(ev, &["name"])
                    .or_else(|| msg.filter(|m| m.is_object()).and_then(|m| m.get("name")))
                    .filter(|v| !v.is_null())
                    .map(display_value)
                    .unwrap_or_else(|| "None".to_string());
                let args = event_field(ev, msg, "arguments");
                let parsed_args = args
                    .and_then(Value::as_str)
                    .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                    .filter(Value::is_object);
                let command = parsed_args
                    .as_ref()
                    .and_then(|p| p.get("command"))
                    .map(command_text)
                    .unwrap_or_default();
                let workdir = parsed_args
                    .as_ref()
                    .and_then(|p| p.get("workdir"))
                    .map(display_value)
                    .unwrap_or_default();

                lines.push(format!("- {}[call] `{}`", prefix, name));
                if !workdir.is_empty() {
                    lines.push(format!("  - workdir: `{}`", redact_text(&workdir)));
                }
                if !command.is_empty() {
                    lines.push("  - command:".to_string());
                    fenced(&mut lines, redact_text(&command));
                } else if let Some(args) = args {
                    lines.push("  - arguments:".to_string());
                    fenced(&mut lines, redact_text(&extract_text(args)));
                }
            }
            "function_call_output" => {
                if let Some(output) = event_field(ev, msg, "output") {
                    lines.push(format!("- {}[output]", prefix));
                    fenced(&mut lines, redact_text(&extract_text(output)));
                }
            }
            "message" | "agent_message" => {
                let content = first_truthy(ev, &["message", "content"]).or(msg);
                let text = redact_text(&content.map(extract_text).unwrap_or_default());
                if !text.is_empty() {
                    lines.push(format!("- {}[message]", prefix));
                    fenced(&mut lines, text);
                }
            }
            "agent_reasoning" => {
                let text = match msg {
                    Some(Value::Object(obj)) => obj
                        .get("text")
                        .filter(|t| is_truthy(t))
                        .map(display_value)
                        .unwrap_or_default(),
                    Some(other) => extract_text(other),
                    None => String::new(),
                };
                let text = redact_text(&text);
                if !text.is_empty() {
                    lines.push(format!("- {}[reasoning]", prefix));
                    fenced(&mut lines, text);
                }
            }
            "" => {}
            other => {
                let text = redact_text(&msg.map(extract_text).unwrap_or_default());
                lines.push(format!("- {}[{}]", prefix, other));
                if !text.is_empty() {
                    fenced(&mut lines, text);
                }
            }
        }
    }

    lines.join("\n") + "\n"
}

/// 擷取含 nonce 的最新 rollout，輸出遮蔽後的 JSONL 與 Markdown
pub async fn extract_rollout<S: Storage>(
    storage: &S,
    request: &RolloutRequest,
    default_dir: PathBuf,
) -> Result<RolloutExtraction> {
    let matched = find_rollouts(&request.sessions_root, &request.nonce);
    let rollout = matched
        .into_iter()
        .max_by_key(|path| modified_at(path))
        .ok_or_else(|| {
            AgentError::not_found(format!(
                "rollout containing the nonce under {}",
                request.sessions_root.display()
            ))
        })?;
    tracing::info!("Extracting rollout {}", rollout.display());

    let out_dir = request.output_dir.clone().unwrap_or(default_dir);
    let stem = rollout
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let jsonl_path = request
        .output_jsonl
        .clone()
        .unwrap_or_else(|| out_dir.join(format!("codex-rollout-{}.jsonl", stem)));
    let markdown_path = request
        .output_md
        .clone()
        .unwrap_or_else(|| out_dir.join(format!("codex-rollout-{}.md", stem)));

    let raw = storage.read_file(&rollout.to_string_lossy()).await?;
    let content = String::from_utf8_lossy(&raw);

    let mut events = Vec::new();
    let mut redacted_jsonl = String::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(obj) => {
                let redacted = redact_value(&obj);
                redacted_jsonl.push_str(&serde_json::to_string(&redacted)?);
                redacted_jsonl.push('\n');
                events.push(redacted);
            }
            Err(_) => {
                redacted_jsonl.push_str(&redact_text(line));
                redacted_jsonl.push('\n');
            }
        }
    }

    storage
        .write_file(&jsonl_path.to_string_lossy(), redacted_jsonl.as_bytes())
        .await?;
    storage
        .write_file(
            &markdown_path.to_string_lossy(),
            render_markdown(&events, &rollout).as_bytes(),
        )
        .await?;

    Ok(RolloutExtraction {
        source: rollout,
        jsonl_path,
        markdown_path,
        events: events.len(),
    })
}
