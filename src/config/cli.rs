use crate::core::prompt_phase::PhaseQuery;
use crate::core::stream_filter::{StreamMode, SummaryStyle};
use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "agent-process")]
#[command(about = "Process tooling for branch-based agent sessions")]
pub struct CliConfig {
    /// Repository root
    #[arg(long, global = true, default_value = ".")]
    pub repo: PathBuf,

    /// Path to agent-process.toml (defaults to <repo>/agent-process.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Summarise a `codex exec` stream read from stdin
    StreamFilter(StreamFilterArgs),
    /// Convert a sub-agent session log into a Markdown transcript
    Transcript(TranscriptArgs),
    /// Extract and redact the Codex rollout containing a nonce
    ExtractRollout(RolloutArgs),
    /// Scan review documents for leaked secrets
    SecretScan,
    /// Collect failures from session logs for the current marker
    CollectFailures,
    /// Run the local commit-aware retrospective audit
    RetroAudit,
    /// Report branches not yet merged into the base branch
    ReportBranches,
    /// Print a prompt indicator (phase, branch, heartbeat, git status, worktree)
    PromptPhase(PromptPhaseArgs),
    /// Append a "remember later" note to the capsule inbox
    RememberLater(RememberLaterArgs),
    /// Generate a context capsule capture prompt
    CapsulePrompt(CapsulePromptArgs),
    /// Verify a completed process smoke-test run
    VerifyRun,
    /// Resolve the directory of a session id
    SessionDir(SessionDirArgs),
}

#[derive(Debug, Clone, Args)]
pub struct StreamFilterArgs {
    #[arg(long, value_enum)]
    pub mode: StreamMode,

    /// Summary style (defaults to `stream.style` from the config file)
    #[arg(long, value_enum)]
    pub style: Option<SummaryStyle>,

    #[arg(long)]
    pub events_path: Option<PathBuf>,

    #[arg(long)]
    pub session_id_path: Option<PathBuf>,

    #[arg(long)]
    pub last_message_path: Option<PathBuf>,

    #[arg(long)]
    pub no_print_events: bool,
}

#[derive(Debug, Clone, Args)]
pub struct TranscriptArgs {
    /// Path to subagent.session.jsonl
    pub session_path: PathBuf,

    /// Output path (defaults to <session stem>-transcript.md)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct RolloutArgs {
    /// Nonce string to locate in rollout JSONL files
    #[arg(long)]
    pub nonce: String,

    /// Root of the Codex sessions directory (defaults to `sessions.codex_sessions_root`)
    #[arg(long)]
    pub sessions_root: Option<String>,

    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long)]
    pub output_jsonl: Option<PathBuf>,

    #[arg(long)]
    pub output_md: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct PromptPhaseArgs {
    #[arg(long, value_enum, default_value_t = PhaseQuery::Phase)]
    pub show: PhaseQuery,
}

#[derive(Debug, Clone, Args)]
pub struct RememberLaterArgs {
    /// The reminder text to record
    #[arg(short, long)]
    pub message: String,

    #[arg(long)]
    pub topic: Option<String>,

    #[arg(long)]
    pub next_step: Option<String>,

    /// Repeat for multiple tags
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Defaults to `reminders.capsule_file`
    #[arg(long)]
    pub capsule_file: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct CapsulePromptArgs {
    #[arg(long)]
    pub capsule_path: Option<PathBuf>,

    #[arg(long)]
    pub session_marker: Option<String>,

    #[arg(long)]
    pub plan_slug: Option<String>,

    #[arg(long)]
    pub token_budget: Option<usize>,

    #[arg(long)]
    pub reminder_path: Option<PathBuf>,

    #[arg(long)]
    pub no_reminders: bool,

    #[arg(long)]
    pub write_stub: bool,

    /// Capsule version string (named `capsule-version` to avoid clashing with `--version`)
    #[arg(long = "capsule-version")]
    pub capsule_version: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct SessionDirArgs {
    pub session_id: String,
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_path("repo", &self.repo.to_string_lossy())?;
        match &self.command {
            Command::ExtractRollout(args) => {
                validation::validate_non_empty_string("nonce", &args.nonce)?;
            }
            Command::RememberLater(args) => {
                validation::validate_non_empty_string("message", &args.message)?;
            }
            Command::CapsulePrompt(args) => {
                if let Some(budget) = args.token_budget {
                    validation::validate_positive_number("token_budget", budget, 1)?;
                }
            }
            Command::SessionDir(args) => {
                validation::validate_non_empty_string("session_id", &args.session_id)?;
            }
            _ => {}
        }
        Ok(())
    }
}
