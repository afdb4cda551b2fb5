use crate::domain::model::TranscriptEntry;
use crate::domain::ports::Storage;
use crate::utils::error::{AgentError, Result};
use crate::utils::text::{capitalize, display_value};
use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const TRANSCRIPT_HEADER: &str = "# Subagent Session Transcript\n\n";

/// 時間戳記轉為 `YYYY-MM-DD HH:MM:SS UTC`，無法解析時原樣回傳
pub fn format_timestamp(raw: Option<&str>) -> String {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return "Unknown time".to_string();
    };
    const OUTPUT: &str = "%Y-%m-%d %H:%M:%S UTC";
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format(OUTPUT).to_string();
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, layout) {
            return dt.format(OUTPUT).to_string();
        }
    }
    raw.to_string()
}

pub fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::Object(obj) => {
                        let typ = obj.get("type").and_then(Value::as_str);
                        if matches!(typ, Some("output_text") | Some("input_text")) {
                            obj.get("text")
                                .filter(|t| !t.is_null())
                                .or_else(|| obj.get("input_text"))
                                .map(display_value)
                                .unwrap_or_default()
                        } else if let Some(inner) = obj.get("Text") {
                            inner.get("text").map(display_value).unwrap_or_default()
                        } else {
                            flatten_content(&Value::Array(obj.values().cloned().collect()))
                        }
                    }
                    other => display_value(other),
                })
                .filter(|part| !part.is_empty())
                .collect();
            parts.join("\n")
        }
        Value::Object(obj) => flatten_content(&Value::Array(obj.values().cloned().collect())),
        other => display_value(other),
    }
}

pub fn extract_command(msg: &Value) -> String {
    if let Some(parsed) = msg.get("parsed_cmd").and_then(Value::as_array) {
        let parts: Vec<String> = parsed
            .iter()
            .filter_map(|item| item.get("cmd").or_else(|| item.get("arg")))
            .map(display_value)
            .collect();
        if !parts.is_empty() {
            return parts.join(" ");
        }
    }
    match msg.get("command") {
        Some(Value::Array(items)) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(" "),
        Some(other) => display_value(other),
        None => String::new(),
    }
}

fn text_of(msg: &Value, key: &str) -> String {
    flatten_content(msg.get(key).unwrap_or(&Value::Null))
        .trim()
        .to_string()
}

/// 將單一 session 事件轉為逐字稿列
pub fn entry_from_event(data: &Value) -> Option<TranscriptEntry> {
    let payload = data.get("payload");
    let msg = payload.and_then(|p| p.get("msg")).unwrap_or(&Value::Null);
    let ts = data
        .get("ts")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .or_else(|| payload.and_then(|p| p.get("ts")).and_then(Value::as_str));
    let timestamp = format_timestamp(ts);

    let (role, text) = match msg.get("type").and_then(Value::as_str)? {
        "agent_message" => ("Subagent".to_string(), text_of(msg, "message")),
        "user_message" => ("Main agent".to_string(), text_of(msg, "message")),
        "message" => {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("message");
            (capitalize(role), text_of(msg, "content"))
        }
        "exec_command_begin" => ("Command".to_string(), extract_command(msg).trim().to_string()),
        "exec_command_end" => {
            let mut parts = Vec::new();
            if let Some(code) = msg.get("exit_code").filter(|c| !c.is_null()) {
                parts.push(format!("exit {}", display_value(code)));
            }
            for stream in ["stdout", "stderr"] {
                let body = msg
                    .get(stream)
                    .map(display_value)
                    .unwrap_or_default();
                let body = body.trim();
                if !body.is_empty() {
                    parts.push(format!("{}:\n{}", stream, body));
                }
            }
            ("Command result".to_string(), parts.join("\n").trim().to_string())
        }
        "agent_summary" => ("Subagent summary".to_string(), text_of(msg, "summary")),
        _ => return None,
    };

    if text.is_empty() {
        return None;
    }
    Some(TranscriptEntry {
        timestamp,
        role,
        text,
    })
}

/// 解析 JSONL 內容；無法解析的行會被略過並記錄警告
pub fn collect_entries(content: &str) -> Vec<TranscriptEntry> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str::<Value>(line.trim()) {
            Ok(data) => entry_from_event(&data),
            Err(e) => {
                tracing::warn!("Skipping malformed session line {}: {}", idx + 1, e);
                None
            }
        })
        .collect()
}

pub fn render_transcript(entries: &[TranscriptEntry]) -> String {
    let mut out = String::from(TRANSCRIPT_HEADER);
    for entry in entries {
        let text_block = entry.text.replace('\n', "\n  ");
        out.push_str(&format!(
            "- **{}** — {}: {}\n",
            entry.timestamp, entry.role, text_block
        ));
    }
    out
}

/// `<stem>-transcript.md` next to the session log.
pub fn default_output_path(session_path: &Path) -> PathBuf {
    let stem = session_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    session_path.with_file_name(format!("{}-transcript.md", stem))
}

pub async fn convert_session<S: Storage>(
    storage: &S,
    session_path: &Path,
    output: Option<&Path>,
) -> Result<(PathBuf, usize)> {
    let session_key = session_path.to_string_lossy();
    if !storage.exists(&session_key).await {
        return Err(AgentError::not_found(format!(
            "session file {}",
            session_path.display()
        )));
    }
    let raw = storage.read_file(&session_key).await?;
    let entries = collect_entries(&String::from_utf8_lossy(&raw));

    let output_path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(session_path));
    storage
        .write_file(
            &output_path.to_string_lossy(),
            render_transcript(&entries).as_bytes(),
        )
        .await?;
    tracing::info!("Wrote {} transcript entries to {}", entries.len(), output_path.display());
    Ok((output_path, entries.len()))
}
