use crate::core::redact::redact_stream_text;
use crate::domain::ports::Storage;
use crate::utils::error::{AgentError, Result};
use crate::utils::text::{display_value, field_text, is_truthy, truncate_chars, truthy_text};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const VERBOSE_ENV: &str = "SUBAGENT_EXEC_SUMMARY_VERBOSE";
pub const OUTPUT_LINES_ENV: &str = "SUBAGENT_EXEC_OUTPUT_LINES";

const COMMAND_LIMIT: usize = 140;
const ERROR_LIMIT: usize = 200;
const OUTPUT_LINE_LIMIT: usize = 180;

static SHELL_WRAPPERS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"^\s*(?:/bin/)?(?:ba)?sh\s+-lc\s+(.+)\s*$").expect("valid sh pattern"),
        Regex::new(r"^\s*(?:/bin/)?zsh\s+-lc\s+(.+)\s*$").expect("valid zsh pattern"),
    ]
});

static SESSION_ID_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bsession id:\s*([0-9a-fA-F-]{36})\b").expect("valid session id pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum StreamMode {
    /// `codex exec --json` event lines
    Json,
    /// Plain console output
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum SummaryStyle {
    Compact,
    #[default]
    Tui,
}

impl FromStr for SummaryStyle {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "compact" => Ok(Self::Compact),
            "tui" => Ok(Self::Tui),
            other => Err(AgentError::InvalidConfigValueError {
                field: "style".to_string(),
                value: other.to_string(),
                reason: "expected compact or tui".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamFilterOptions {
    pub mode: StreamMode,
    pub style: SummaryStyle,
    pub events_path: Option<PathBuf>,
    pub session_id_path: Option<PathBuf>,
    pub last_message_path: Option<PathBuf>,
    pub print_events: bool,
    pub verbose: bool,
    pub output_lines: usize,
}

impl StreamFilterOptions {
    pub fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            style: SummaryStyle::Tui,
            events_path: None,
            session_id_path: None,
            last_message_path: None,
            print_events: true,
            verbose: false,
            output_lines: 4,
        }
    }

    /// 環境變數優先於設定檔
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// 以 `lookup` 取代環境變數查詢；無法解析的行數會被忽略
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(VERBOSE_ENV) {
            self.verbose = truthy_text(&raw);
        }
        if let Some(raw) = lookup(OUTPUT_LINES_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(lines) => self.output_lines = lines,
                Err(_) if raw.trim().is_empty() => {}
                Err(_) => tracing::warn!("Ignoring non-numeric {}={}", OUTPUT_LINES_ENV, raw),
            }
        }
        self
    }
}

fn path_str(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `bash -lc '<cmd>'` 之類的包裝只留下內層指令
pub fn unwrap_shell_command(command: &str) -> String {
    let cmd = command.trim();
    for wrapper in SHELL_WRAPPERS.iter() {
        let Some(caps) = wrapper.captures(cmd) else {
            continue;
        };
        let mut inner = caps[1].trim();
        if inner.len() >= 2 && inner.starts_with('\'') && inner.ends_with('\'') {
            inner = &inner[1..inner.len() - 1];
        }
        if inner.len() >= 2 && inner.starts_with('"') && inner.ends_with('"') {
            inner = &inner[1..inner.len() - 1];
        }
        return inner.trim().to_string();
    }
    cmd.to_string()
}

/// Last `max_lines` non-empty lines of command output, redacted and truncated.
pub fn format_output_snippet(output: &str, max_lines: usize, max_chars: usize) -> Vec<String> {
    let out = output.trim_end_matches('\n');
    if out.is_empty() {
        return Vec::new();
    }

    let mut tail: Vec<&str> = Vec::new();
    for line in out.rsplit('\n') {
        if tail.len() >= max_lines {
            break;
        }
        if !line.trim().is_empty() {
            tail.push(line);
        }
    }

    tail.into_iter()
        .rev()
        .map(|line| truncate_chars(&redact_stream_text(line.trim_end()), max_chars))
        .collect()
}

fn usage_parts(evt: &Value) -> Vec<String> {
    let Some(usage) = evt.get("usage").filter(|u| is_truthy(u)) else {
        return Vec::new();
    };
    [
        ("input_tokens", "in"),
        ("cached_input_tokens", "cached_in"),
        ("output_tokens", "out"),
    ]
    .iter()
    .filter_map(|(key, label)| {
        usage
            .get(*key)
            .filter(|v| !v.is_null())
            .map(|v| format!("{}={}", label, display_value(v)))
    })
    .collect()
}

fn event_item(evt: &Value) -> Value {
    evt.get("item")
        .filter(|item| is_truthy(item))
        .cloned()
        .unwrap_or(Value::Object(Default::default()))
}

fn display_command(item: &Value) -> String {
    let cmd = unwrap_shell_command(&field_text(item, "command"));
    truncate_chars(&redact_stream_text(&cmd), COMMAND_LIMIT)
}

/// Compact one-line summaries, `[exec] ...`.
pub fn summarize_compact(evt: &Value) -> Option<String> {
    let typ = field_text(evt, "type");
    if typ.is_empty() {
        return None;
    }
    match typ.as_str() {
        "thread.started" => Some(format!(
            "[exec] thread.started id={}",
            evt.get("thread_id").map(display_value).unwrap_or_else(|| "None".to_string())
        )),
        "turn.started" => Some("[exec] turn.started".to_string()),
        "turn.completed" => {
            let parts = usage_parts(evt);
            let suffix = if parts.is_empty() {
                String::new()
            } else {
                format!(" {}", parts.join(" "))
            };
            Some(format!("[exec] turn.completed{}", suffix))
        }
        "item.completed" => {
            let item_type = field_text(&event_item(evt), "type");
            if !item_type.is_empty() && item_type != "agent_message" {
                Some(format!("[exec] item.completed type={}", item_type))
            } else {
                None
            }
        }
        other if other.ends_with(".started")
            || other.ends_with(".completed")
            || other.ends_with(".failed") =>
        {
            Some(format!("[exec] {}", other))
        }
        _ => None,
    }
}

/// codex exec 事件串流過濾器
pub struct StreamFilter<S: Storage> {
    storage: S,
    options: StreamFilterOptions,
    session_id: Option<String>,
    last_agent_text: Option<String>,
    inflight: HashMap<String, String>,
}

impl<S: Storage> StreamFilter<S> {
    pub fn new(storage: S, options: StreamFilterOptions) -> Self {
        Self {
            storage,
            options,
            session_id: None,
            last_agent_text: None,
            inflight: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn last_agent_text(&self) -> Option<&str> {
        self.last_agent_text.as_deref()
    }

    pub async fn run<R, W>(&mut self, mut reader: R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let output = match self.options.mode {
                StreamMode::Json => self.process_json_line(&buf).await?,
                StreamMode::Text => self.process_text_line(&buf).await,
            };
            if let Some(text) = output {
                writer.write_all(text.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        tracing::debug!(
            "Stream finished (session id: {})",
            self.session_id.as_deref().unwrap_or("-")
        );
        Ok(())
    }

    /// 處理一行 JSON 事件，回傳要輸出的文字（含換行）
    pub async fn process_json_line(&mut self, raw: &[u8]) -> Result<Option<String>> {
        if let Some(events_path) = &self.options.events_path {
            self.storage.append_file(&path_str(events_path), raw).await?;
        }

        let decoded = String::from_utf8_lossy(raw);
        let line = decoded.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let evt: Value = match serde_json::from_str(line) {
            Ok(evt) => evt,
            Err(e) => {
                tracing::debug!("Unparseable exec event: {}", e);
                if self.options.print_events {
                    return Ok(Some(format!("[exec] <unparseable> {}\n", line)));
                }
                return Ok(None);
            }
        };

        let typ = field_text(&evt, "type");
        if typ == "thread.started" && self.session_id.is_none() {
            if let Some(tid) = evt.get("thread_id").and_then(Value::as_str).filter(|t| !t.is_empty()) {
                self.session_id = Some(tid.to_string());
                if let Some(path) = &self.options.session_id_path {
                    self.storage
                        .write_file(&path_str(path), format!("{}\n", tid).as_bytes())
                        .await?;
                }
            }
        }

        if typ == "item.completed" {
            let item = event_item(&evt);
            if item.get("type").and_then(Value::as_str) == Some("agent_message") {
                if let Some(text) = item.get("text").filter(|t| !t.is_null()) {
                    let message = format!("{}\n", display_value(text).trim_end_matches('\n'));
                    self.last_agent_text = Some(display_value(text));
                    if let Some(path) = &self.options.last_message_path {
                        self.storage
                            .write_file(&path_str(path), message.as_bytes())
                            .await?;
                    }
                    return Ok(Some(message));
                }
            }
        }

        if !self.options.print_events {
            return Ok(None);
        }
        let summary = match self.options.style {
            SummaryStyle::Tui => self.summarize_tui(&evt),
            SummaryStyle::Compact => summarize_compact(&evt),
        };
        Ok(summary.map(|s| format!("{}\n", s)))
    }

    /// Text mode echoes the line and sniffs the first `session id:` banner.
    pub async fn process_text_line(&mut self, raw: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(raw).into_owned();
        if self.session_id.is_none() {
            if let Some(caps) = SESSION_ID_LINE.captures(&line) {
                let id = caps[1].to_string();
                if let Some(path) = &self.options.session_id_path {
                    if let Err(e) = self
                        .storage
                        .write_file(&path_str(path), format!("{}\n", id).as_bytes())
                        .await
                    {
                        tracing::warn!("Could not record session id: {}", e);
                    }
                }
                self.session_id = Some(id);
            }
        }
        Some(line)
    }

    /// TUI 風格摘要，會追蹤進行中的 item
    pub fn summarize_tui(&mut self, evt: &Value) -> Option<String> {
        let typ = field_text(evt, "type");
        if typ.is_empty() {
            return None;
        }
        let verbose = self.options.verbose;

        match typ.as_str() {
            "thread.started" => Some(format!(
                "- Started exec session ({})",
                evt.get("thread_id").map(display_value).unwrap_or_else(|| "None".to_string())
            )),
            "turn.started" => Some("- Starting turn".to_string()),
            "item.started" => {
                let item = event_item(evt);
                let item_id = field_text(&item, "id");
                let item_type = field_text(&item, "type");
                if !item_id.is_empty() && !item_type.is_empty() {
                    self.inflight.insert(item_id, item_type.clone());
                }
                match item_type.as_str() {
                    "reasoning" => Some("- Thinking…".to_string()),
                    "command_execution" => Some(format!("- Run {}", display_command(&item))),
                    "" => None,
                    other if verbose => Some(format!("- Starting {}", other)),
                    _ => None,
                }
            }
            "item.failed" => {
                let item = event_item(evt);
                let mut item_type = field_text(&item, "type");
                if item_type.is_empty() {
                    item_type = "item".to_string();
                }
                let error = [item.get("error"), evt.get("error"), evt.get("message")]
                    .into_iter()
                    .flatten()
                    .find(|v| is_truthy(v));
                let error_text = error
                    .map(|e| truncate_chars(&redact_stream_text(display_value(e).trim()), ERROR_LIMIT))
                    .unwrap_or_default();
                let head = if item_type == "command_execution" {
                    format!("- Command failed: {}", display_command(&item))
                } else {
                    format!("- Failed {}", item_type)
                };
                if error_text.is_empty() {
                    Some(head)
                } else {
                    Some(format!("{}\n  └ {}", head, error_text))
                }
            }
            "item.completed" => {
                let item = event_item(evt);
                let item_id = field_text(&item, "id");
                let mut item_type = field_text(&item, "type");
                if !item_id.is_empty() {
                    if let Some(prior) = self.inflight.remove(&item_id) {
                        if item_type.is_empty() {
                            item_type = prior;
                        }
                    }
                }
                match item_type.as_str() {
                    "agent_message" | "reasoning" => None,
                    "command_execution" => {
                        let cmd = display_command(&item);
                        let suffix = item
                            .get("exit_code")
                            .filter(|v| !v.is_null())
                            .map(|code| format!(" (exit {})", display_value(code)))
                            .unwrap_or_default();
                        let max_lines = if verbose { self.options.output_lines } else { 1 };
                        let snippet = format_output_snippet(
                            &field_text(&item, "aggregated_output"),
                            max_lines,
                            OUTPUT_LINE_LIMIT,
                        );
                        if snippet.is_empty() {
                            return Some(format!("- Ran {}{}", cmd, suffix));
                        }
                        let body = snippet
                            .iter()
                            .map(|line| format!("  └ {}", line))
                            .collect::<Vec<_>>()
                            .join("\n");
                        Some(format!("- Ran {}{}\n{}", cmd, suffix, body))
                    }
                    other if verbose => Some(format!("- Completed {}", other)),
                    _ => None,
                }
            }
            "turn.completed" => {
                let parts = usage_parts(evt);
                let suffix = if parts.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", parts.join(", "))
                };
                Some(format!("- Turn complete{}", suffix))
            }
            other if other.ends_with(".failed") => Some(format!("- {}", other)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalStorage;
    use serde_json::json;
    use tempfile::TempDir;

    fn tui_filter(dir: &TempDir) -> StreamFilter<LocalStorage> {
        StreamFilter::new(
            LocalStorage::new(dir.path()),
            StreamFilterOptions::new(StreamMode::Json),
        )
    }

    #[test]
    fn test_unwrap_shell_command() {
        assert_eq!(unwrap_shell_command("bash -lc 'cargo test'"), "cargo test");
        assert_eq!(unwrap_shell_command("/bin/zsh -lc \"ls -la\""), "ls -la");
        assert_eq!(unwrap_shell_command("  git status  "), "git status");
    }

    #[test]
    fn test_env_overrides_parse_verbose_and_output_lines() {
        let env: HashMap<&str, &str> =
            HashMap::from([(VERBOSE_ENV, "yes"), (OUTPUT_LINES_ENV, " 7 ")]);
        let options = StreamFilterOptions::new(StreamMode::Json)
            .with_overrides_from(|name| env.get(name).map(|v| v.to_string()));
        assert!(options.verbose);
        assert_eq!(options.output_lines, 7);

        let env: HashMap<&str, &str> =
            HashMap::from([(VERBOSE_ENV, "off"), (OUTPUT_LINES_ENV, "many")]);
        let mut base = StreamFilterOptions::new(StreamMode::Json);
        base.verbose = true;
        base.output_lines = 9;
        let options = base.with_overrides_from(|name| env.get(name).map(|v| v.to_string()));
        assert!(!options.verbose);
        assert_eq!(options.output_lines, 9);

        let options = StreamFilterOptions::new(StreamMode::Json).with_overrides_from(|_| None);
        assert!(!options.verbose);
        assert_eq!(options.output_lines, 4);
    }

    #[test]
    fn test_with_env_overrides_reads_process_env() {
        std::env::set_var(VERBOSE_ENV, "true");
        std::env::set_var(OUTPUT_LINES_ENV, "2");
        let options = StreamFilterOptions::new(StreamMode::Text).with_env_overrides();
        std::env::remove_var(VERBOSE_ENV);
        std::env::remove_var(OUTPUT_LINES_ENV);
        assert!(options.verbose);
        assert_eq!(options.output_lines, 2);
    }

    #[test]
    fn test_format_output_snippet_keeps_tail() {
        let output = "one\n\ntwo\nthree\n\n";
        assert_eq!(format_output_snippet(output, 2, 180), vec!["two", "three"]);
        assert_eq!(format_output_snippet(output, 1, 180), vec!["three"]);
        assert!(format_output_snippet("\n\n", 3, 180).is_empty());
    }

    #[test]
    fn test_compact_summaries() {
        assert_eq!(
            summarize_compact(&json!({"type": "thread.started", "thread_id": "abc"})).unwrap(),
            "[exec] thread.started id=abc"
        );
        assert_eq!(
            summarize_compact(&json!({
                "type": "turn.completed",
                "usage": {"input_tokens": 10, "cached_input_tokens": 2, "output_tokens": 5}
            }))
            .unwrap(),
            "[exec] turn.completed in=10 cached_in=2 out=5"
        );
        assert!(summarize_compact(
            &json!({"type": "item.completed", "item": {"type": "agent_message"}})
        )
        .is_none());
        assert_eq!(
            summarize_compact(&json!({"type": "item.completed", "item": {"type": "command_execution"}}))
                .unwrap(),
            "[exec] item.completed type=command_execution"
        );
        assert_eq!(
            summarize_compact(&json!({"type": "error.failed"})).unwrap(),
            "[exec] error.failed"
        );
        assert!(summarize_compact(&json!({"type": "noise"})).is_none());
    }

    #[test]
    fn test_tui_command_lifecycle() {
        let dir = TempDir::new().unwrap();
        let mut filter = tui_filter(&dir);

        let started = filter.summarize_tui(&json!({
            "type": "item.started",
            "item": {"id": "item_1", "type": "command_execution", "command": "bash -lc 'cargo test'"}
        }));
        assert_eq!(started.unwrap(), "- Run cargo test");

        let completed = filter.summarize_tui(&json!({
            "type": "item.completed",
            "item": {
                "id": "item_1",
                "command": "bash -lc 'cargo test'",
                "exit_code": 101,
                "aggregated_output": "running 3 tests\ntest result: FAILED\n"
            }
        }));
        assert_eq!(
            completed.unwrap(),
            "- Ran cargo test (exit 101)\n  └ test result: FAILED"
        );
        assert!(filter.inflight.is_empty());
    }

    #[test]
    fn test_tui_failures_and_turns() {
        let dir = TempDir::new().unwrap();
        let mut filter = tui_filter(&dir);

        assert_eq!(
            filter
                .summarize_tui(&json!({
                    "type": "item.failed",
                    "item": {"type": "command_execution", "command": "make lint"},
                    "error": "exit status 2"
                }))
                .unwrap(),
            "- Command failed: make lint\n  └ exit status 2"
        );
        assert_eq!(
            filter.summarize_tui(&json!({"type": "item.failed"})).unwrap(),
            "- Failed item"
        );
        assert_eq!(
            filter
                .summarize_tui(&json!({"type": "turn.completed", "usage": {"input_tokens": 3, "output_tokens": 4}}))
                .unwrap(),
            "- Turn complete (in=3, out=4)"
        );
        assert_eq!(
            filter.summarize_tui(&json!({"type": "item.started", "item": {"type": "reasoning"}})).unwrap(),
            "- Thinking…"
        );
        assert!(filter
            .summarize_tui(&json!({"type": "item.started", "item": {"type": "web_search"}}))
            .is_none());
    }

    #[tokio::test]
    async fn test_json_mode_records_session_and_last_message() {
        let dir = TempDir::new().unwrap();
        let mut options = StreamFilterOptions::new(StreamMode::Json);
        options.events_path = Some(PathBuf::from("events.jsonl"));
        options.session_id_path = Some(PathBuf::from("session_id.txt"));
        options.last_message_path = Some(PathBuf::from("out/last.txt"));
        let mut filter = StreamFilter::new(LocalStorage::new(dir.path()), options);

        let input = concat!(
            "{\"type\":\"thread.started\",\"thread_id\":\"t-123\"}\n",
            "not json\n",
            "\n",
            "{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"All done.\\n\"}}\n",
        );
        let mut output = Vec::new();
        filter.run(input.as_bytes(), &mut output).await.unwrap();

        let printed = String::from_utf8(output).unwrap();
        assert_eq!(
            printed,
            "- Started exec session (t-123)\n[exec] <unparseable> not json\nAll done.\n"
        );
        assert_eq!(filter.session_id(), Some("t-123"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("session_id.txt")).unwrap(),
            "t-123\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/last.txt")).unwrap(),
            "All done.\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap(),
            input
        );
    }

    #[tokio::test]
    async fn test_text_mode_echoes_and_sniffs_session_id() {
        let dir = TempDir::new().unwrap();
        let mut options = StreamFilterOptions::new(StreamMode::Text);
        options.session_id_path = Some(PathBuf::from("sid"));
        let mut filter = StreamFilter::new(LocalStorage::new(dir.path()), options);

        let input = "banner\nsession id: 0199a2b3-c4d5-7e6f-8a9b-0c1d2e3f4a5b\nmore\n";
        let mut output = Vec::new();
        filter.run(input.as_bytes(), &mut output).await.unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), input);
        assert_eq!(
            filter.session_id(),
            Some("0199a2b3-c4d5-7e6f-8a9b-0c1d2e3f4a5b")
        );
        assert!(dir.path().join("sid").exists());
    }
}
