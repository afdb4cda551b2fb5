use agent_process_demo::adapters::git::GitClient;
use agent_process_demo::config::paths;
use agent_process_demo::core::branches::{self, BranchReporter};
use agent_process_demo::core::capsule::{self, CapsuleRequest};
use agent_process_demo::core::reminders::{self, Reminder};
use agent_process_demo::core::rollout::{self, RolloutRequest};
use agent_process_demo::core::stream_filter::{StreamMode, SummaryStyle};
use agent_process_demo::core::{failures, retro_audit, secret_scan, transcript};
use agent_process_demo::domain::ports::{CommandOutput, CommandRunner};
use agent_process_demo::{AgentError, AgentProcessConfig, LocalStorage, StreamFilter, StreamFilterOptions};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 以固定輸出回應 git/gh 的測試執行器
#[derive(Default)]
struct FakeRunner {
    responses: HashMap<String, (i32, String)>,
}

impl FakeRunner {
    fn respond(mut self, command_line: &str, status: i32, stdout: &str) -> Self {
        self.responses
            .insert(command_line.to_string(), (status, stdout.to_string()));
        self
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        _cwd: Option<&Path>,
    ) -> agent_process_demo::Result<CommandOutput> {
        let key = format!("{} {}", program, args.join(" "));
        match self.responses.get(&key) {
            Some((status, stdout)) => Ok(CommandOutput {
                status: *status,
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            None => Err(AgentError::CommandError {
                command: key,
                message: "not scripted".to_string(),
            }),
        }
    }
}

fn write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[tokio::test]
async fn test_stream_filter_records_session_and_last_message() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut options = StreamFilterOptions::new(StreamMode::Json);
    options.style = SummaryStyle::Tui;
    options.events_path = Some(PathBuf::from("events.jsonl"));
    options.session_id_path = Some(PathBuf::from("session_id.txt"));
    options.last_message_path = Some(PathBuf::from("last_message.txt"));

    let input = concat!(
        "{\"type\":\"thread.started\",\"thread_id\":\"thread-123\"}\n",
        "{\"type\":\"turn.started\"}\n",
        "{\"type\":\"item.completed\",\"item\":{\"id\":\"i1\",\"type\":\"agent_message\",\"text\":\"All checks pass.\"}}\n",
    );
    let mut filter = StreamFilter::new(LocalStorage::new(temp_dir.path()), options);
    let mut output = Vec::new();
    filter.run(input.as_bytes(), &mut output).await?;

    let printed = String::from_utf8(output)?;
    assert!(printed.contains("- Started exec session (thread-123)"));
    assert!(printed.contains("- Starting turn"));
    assert!(printed.ends_with("All checks pass.\n"));
    assert_eq!(filter.session_id(), Some("thread-123"));

    let session_id = std::fs::read_to_string(temp_dir.path().join("session_id.txt"))?;
    assert_eq!(session_id, "thread-123\n");
    let last = std::fs::read_to_string(temp_dir.path().join("last_message.txt"))?;
    assert_eq!(last, "All checks pass.\n");
    let events = std::fs::read_to_string(temp_dir.path().join("events.jsonl"))?;
    assert_eq!(events, input);
    Ok(())
}

#[tokio::test]
async fn test_failures_feed_the_retro_audit() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let repo = temp_dir.path();
    write(
        &paths::marker_write_path(repo, "feature-retro"),
        r#"{"timestamp": "20250301T101010Z", "head": "c0ffee"}"#,
    )?;
    write(
        &repo.join(".parallelus/sessions/20250301-a/subagent.exec_events.jsonl"),
        concat!(
            "{\"msg\":{\"type\":\"exec_command_end\",\"exit_code\":101,\"command\":[\"cargo\",\"test\"],\"stderr\":\"1 failed\"}}\n",
            "{\"msg\":{\"type\":\"exec_command_end\",\"exit_code\":0,\"command\":[\"ls\"]}}\n",
        ),
    )?;
    write(&repo.join("sessions/20250301-a/console.log"), "build ok\n")?;

    let runner = FakeRunner::default()
        .respond("git rev-parse --abbrev-ref HEAD", 0, "feature/retro\n")
        .respond("git rev-parse HEAD", 0, "c0ffee\n");
    let git = GitClient::new(&runner, repo);
    let storage = LocalStorage::new(repo);

    let (failures_path, summary) = failures::collect_failures(&storage, &git, repo).await?;
    assert!(failures_path.ends_with("feature-retro--20250301T101010Z.json"));
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.sources.len(), 2);

    let (report_path, report) = retro_audit::audit(&storage, &git, repo).await?;
    assert_eq!(
        report_path,
        paths::reports_write_dir(repo).join("feature-retro--20250301T101010Z.json")
    );
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].id, "exec-command-end-1");
    assert!(report.issues[0].evidence.contains("exit_code=101"));
    assert_eq!(report.mode, "local_commit_aware");

    let on_disk: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report_path)?)?;
    assert_eq!(on_disk["branch"], "feature/retro");
    assert_eq!(on_disk["issues"][0]["id"], "exec-command-end-1");
    Ok(())
}

#[tokio::test]
async fn test_retro_audit_rejects_stale_marker() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let repo = temp_dir.path();
    write(
        &paths::marker_write_path(repo, "main"),
        r#"{"timestamp": "T", "head": "old"}"#,
    )?;
    let runner = FakeRunner::default()
        .respond("git rev-parse --abbrev-ref HEAD", 0, "main\n")
        .respond("git rev-parse HEAD", 0, "new\n");
    let git = GitClient::new(&runner, repo);

    let err = retro_audit::audit(&LocalStorage::new(repo), &git, repo)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::MarkerError { .. }));
    assert!(err.user_friendly_message().contains("marker=old, current=new"));
    Ok(())
}

#[tokio::test]
async fn test_branch_report_end_to_end() -> Result<()> {
    let runner = FakeRunner::default()
        .respond("git symbolic-ref refs/remotes/origin/HEAD", 0, "refs/remotes/origin/main\n")
        .respond("git rev-parse --verify origin/main", 0, "abc\n")
        .respond(
            "git for-each-ref --format=%(refname) --no-merged origin/main refs/remotes/origin",
            0,
            "refs/remotes/origin/feature/remote-only\n",
        )
        .respond(
            "git for-each-ref --format=%(refname) --no-merged origin/main refs/heads",
            0,
            "",
        )
        .respond(
            "gh pr list --json number,title,headRefName,state,createdAt",
            0,
            r#"[{"number": 9, "title": "Remote work", "headRefName": "feature/remote-only", "state": "OPEN", "createdAt": "2025-03-01T00:00:00Z"}]"#,
        );
    let git = GitClient::new(&runner, ".");
    let reporter = BranchReporter::new(&git, "origin");
    let (report, base) = reporter.build_report().await?;

    assert_eq!(base, "main");
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].status(), "remote-only");
    assert_eq!(report[0].action(), "fetch branch & review");

    let text = branches::format_report(&report, &base);
    assert!(text.contains("#9 – Remote work (OPEN, 2025-03-01T00:00:00Z)"));
    assert!(text.contains("Tips:"));
    Ok(())
}

#[tokio::test]
async fn test_rollout_extraction_and_review_scan() -> Result<()> {
    let sessions = TempDir::new()?;
    let repo = TempDir::new()?;
    write(
        &sessions.path().join("2025/03/01/rollout-2025-03-01-xyz.jsonl"),
        concat!(
            "{\"type\":\"turn_context\",\"timestamp\":\"2025-03-01T00:00:00Z\",\"cwd\":\"/work\"}\n",
            "{\"type\":\"function_call\",\"name\":\"shell\",\"arguments\":\"{\\\"command\\\":[\\\"echo\\\",\\\"nonce-abc\\\"]}\"}\n",
            "{\"type\":\"function_call_output\",\"output\":\"Bearer abcdef123456\"}\n",
        ),
    )?;

    let request = RolloutRequest {
        nonce: "nonce-abc".to_string(),
        sessions_root: sessions.path().to_path_buf(),
        output_dir: None,
        output_jsonl: None,
        output_md: None,
    };
    let default_dir = rollout::default_output_dir(repo.path(), None);
    let extraction = rollout::extract_rollout(&LocalStorage::new(repo.path()), &request, default_dir).await?;
    assert_eq!(extraction.events, 3);
    assert!(extraction.markdown_path.starts_with(repo.path().join("sessions/extracted")));

    let markdown = std::fs::read_to_string(&extraction.markdown_path)?;
    assert!(markdown.contains("- 2025-03-01T00:00:00Z [context] cwd: `/work`"));
    assert!(markdown.contains("```\necho nonce-abc\n```"));
    assert!(markdown.contains("Bearer [REDACTED_TOKEN]"));
    assert!(!markdown.contains("abcdef123456"));

    write(
        &paths::reviews_write_dir(repo.path()).join("feature-x.md"),
        "Reviewer pasted api_key=supersecretvalue by mistake\n",
    )?;
    let storage = LocalStorage::new(repo.path());
    let findings = secret_scan::scan_reviews(&storage, repo.path()).await?;
    assert_eq!(findings.len(), 1);
    let report = secret_scan::format_report(repo.path(), &findings);
    assert!(report.contains("(credential assignment)"));
    assert!(!report.contains("supersecretvalue"));
    Ok(())
}

#[tokio::test]
async fn test_transcript_conversion() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let session = temp_dir.path().join("subagent.session.jsonl");
    write(
        &session,
        concat!(
            "{\"ts\":\"2025-03-01T12:00:00Z\",\"payload\":{\"msg\":{\"type\":\"user_message\",\"message\":\"Review the branch\"}}}\n",
            "{\"ts\":\"2025-03-01T12:00:05Z\",\"payload\":{\"msg\":{\"type\":\"agent_message\",\"message\":\"Looks good\"}}}\n",
        ),
    )?;
    let output = temp_dir.path().join("out/transcript.md");
    let storage = LocalStorage::new(temp_dir.path());
    let (written, count) = transcript::convert_session(&storage, &session, Some(output.as_path())).await?;

    assert_eq!(written, output);
    assert_eq!(count, 2);
    let content = std::fs::read_to_string(&output)?;
    assert_eq!(
        content,
        "# Subagent Session Transcript\n\n- **2025-03-01 12:00:00 UTC** — Main agent: Review the branch\n- **2025-03-01 12:00:05 UTC** — Subagent: Looks good\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_reminders_surface_in_capsule_prompt() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let storage = LocalStorage::new(temp_dir.path());
    let config = AgentProcessConfig::default();
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();

    let reminder = Reminder {
        message: "Stream filter truncates long commands".to_string(),
        topic: Some("stream".to_string()),
        next_step: Some("Measure terminal width".to_string()),
        tags: vec!["ux".to_string()],
    };
    reminders::append_reminder(&storage, &config.capsule.reminder_path, &reminder, now).await?;

    let request = CapsuleRequest {
        branch: "feature/stream".to_string(),
        capsule_path: None,
        session_marker: Some("20250301-093000".to_string()),
        plan_slug: None,
        token_budget: config.capsule.token_budget,
        version: config.capsule.version.clone(),
        reminder_path: PathBuf::from(&config.capsule.reminder_path),
        include_reminders: true,
        write_stub: true,
    };
    let prompt = capsule::generate(&storage, temp_dir.path(), &request, now).await?;

    assert_eq!(
        prompt.capsule_path,
        PathBuf::from("parallelus/manuals/capsules/feature/stream/20250301T093000Z.md")
    );
    assert!(prompt.stub_created);
    assert!(prompt.output.contains("Target file: parallelus/manuals/capsules/feature/stream/20250301T093000Z.md"));
    assert!(prompt.output.contains("- **Next step:** Measure terminal width"));
    assert!(prompt.output.contains("within 1200 tokens"));

    let stub = std::fs::read_to_string(temp_dir.path().join(&prompt.capsule_path))?;
    assert!(stub.contains("source_session: 20250301-093000"));
    Ok(())
}

#[cfg(feature = "cli")]
#[tokio::test]
async fn test_cli_remember_later_command() -> Result<()> {
    use agent_process_demo::app::commands::{self, CommandContext};
    use agent_process_demo::CliConfig;
    use clap::Parser;

    let temp_dir = TempDir::new()?;
    write(
        &temp_dir.path().join("agent-process.toml"),
        "[reminders]\ncapsule_file = \"notes/inbox.md\"\n",
    )?;
    let repo = temp_dir.path().to_string_lossy().into_owned();
    let cli = CliConfig::try_parse_from([
        "agent-process",
        "--repo",
        repo.as_str(),
        "remember-later",
        "-m",
        "Try the compact style",
    ])?;

    let ctx = CommandContext::from_cli(&cli)?;
    assert_eq!(ctx.config.reminders.capsule_file, "notes/inbox.md");
    let code = commands::execute(&cli.command, &ctx).await?;
    assert_eq!(code, 0);

    let inbox = std::fs::read_to_string(temp_dir.path().join("notes/inbox.md"))?;
    assert!(inbox.contains("- **Note:** Try the compact style"));
    Ok(())
}
