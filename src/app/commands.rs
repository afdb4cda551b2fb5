use crate::adapters::git::GitClient;
use crate::adapters::process::SystemCommandRunner;
use crate::adapters::storage::LocalStorage;
use crate::config::cli::{
    CapsulePromptArgs, CliConfig, Command, RememberLaterArgs, RolloutArgs, StreamFilterArgs,
    TranscriptArgs,
};
use crate::config::paths;
use crate::config::toml_config::AgentProcessConfig;
use crate::core::branches::{self, BranchReporter};
use crate::core::capsule::{self, CapsuleRequest};
use crate::core::reminders::{self, Reminder};
use crate::core::rollout::{self, RolloutRequest};
use crate::core::stream_filter::{StreamFilter, StreamFilterOptions};
use crate::core::{failures, prompt_phase, retro_audit, secret_scan, transcript, verify};
use crate::domain::ports::CommandRunner;
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use chrono::Utc;
use std::path::{Path, PathBuf};

pub const SESSION_DIR_ENV: &str = "SESSION_DIR";

/// 執行單一子命令所需的共用狀態
pub struct CommandContext {
    pub repo: PathBuf,
    pub config: AgentProcessConfig,
    runner: Box<dyn CommandRunner>,
}

impl CommandContext {
    pub fn new(repo: PathBuf, config: AgentProcessConfig, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            repo,
            config,
            runner,
        }
    }

    /// 讀取並驗證設定檔，使用系統 git/gh
    pub fn from_cli(cli: &CliConfig) -> Result<Self> {
        let config = AgentProcessConfig::load(&cli.repo, cli.config.as_deref())?;
        config.validate()?;
        Ok(Self::new(cli.repo.clone(), config, Box::new(SystemCommandRunner)))
    }

    pub fn git(&self) -> GitClient<'_> {
        GitClient::new(self.runner.as_ref(), &self.repo)
    }

    /// git 工作目錄的根；不在 git repo 內時退回 `--repo`
    async fn repo_root(&self) -> PathBuf {
        match self.git().toplevel().await {
            Ok(root) => root,
            Err(e) => {
                tracing::debug!("Falling back to --repo: {}", e);
                paths::normalize_repo_path(Path::new("."), &self.repo.to_string_lossy())
            }
        }
    }
}

fn display_relative(repo: &Path, path: &Path) -> String {
    path.strip_prefix(repo).unwrap_or(path).display().to_string()
}

/// 執行子命令並回傳行程結束碼
pub async fn execute(command: &Command, ctx: &CommandContext) -> Result<i32> {
    match command {
        Command::StreamFilter(args) => stream_filter(args, ctx).await,
        Command::Transcript(args) => transcript_cmd(args).await,
        Command::ExtractRollout(args) => extract_rollout(args, ctx).await,
        Command::SecretScan => secret_scan_cmd(ctx).await,
        Command::CollectFailures => {
            let repo = ctx.repo_root().await;
            let storage = LocalStorage::new(&repo);
            let (path, _) = failures::collect_failures(&storage, &ctx.git(), &repo).await?;
            println!("collect_failures: wrote {}", display_relative(&repo, &path));
            Ok(0)
        }
        Command::RetroAudit => {
            let repo = ctx.repo_root().await;
            let storage = LocalStorage::new(&repo);
            let (path, _) = retro_audit::audit(&storage, &ctx.git(), &repo).await?;
            println!("retro_audit_local: wrote {}", display_relative(&repo, &path));
            Ok(0)
        }
        Command::ReportBranches => {
            let git = ctx.git();
            let remote = branches::base_remote(&ctx.config.repository.base_remote);
            let reporter = BranchReporter::new(&git, remote);
            let (report, base_branch) = reporter.build_report().await?;
            println!("{}", branches::format_report(&report, &base_branch));
            Ok(0)
        }
        Command::PromptPhase(args) => {
            let repo = ctx.repo_root().await;
            println!("{}", prompt_phase::render(args.show, &ctx.git(), &repo).await);
            Ok(0)
        }
        Command::RememberLater(args) => remember_later(args, ctx).await,
        Command::CapsulePrompt(args) => capsule_prompt(args, ctx).await,
        Command::VerifyRun => {
            let repo = paths::normalize_repo_path(Path::new("."), &ctx.repo.to_string_lossy());
            verify::verify_process_run(&ctx.git(), &repo).await?;
            println!("verify_process_run: success");
            Ok(0)
        }
        Command::SessionDir(args) => {
            let repo = ctx.repo_root().await;
            let dir = paths::resolve_session_dir(
                &repo,
                &args.session_id,
                ctx.config.sessions.session_dir.as_deref(),
            );
            println!("{}", dir.display());
            Ok(0)
        }
    }
}

async fn stream_filter(args: &StreamFilterArgs, ctx: &CommandContext) -> Result<i32> {
    let mut options = StreamFilterOptions::new(args.mode);
    options.style = match args.style {
        Some(style) => style,
        None => ctx.config.stream.style.parse()?,
    };
    options.events_path = args.events_path.clone();
    options.session_id_path = args.session_id_path.clone();
    options.last_message_path = args.last_message_path.clone();
    options.print_events = !args.no_print_events;
    options.verbose = ctx.config.stream.verbose;
    options.output_lines = ctx.config.stream.output_lines;
    let options = options.with_env_overrides();

    let mut filter = StreamFilter::new(LocalStorage::new(PathBuf::new()), options);
    let reader = tokio::io::BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();
    filter.run(reader, &mut writer).await?;
    Ok(0)
}

async fn transcript_cmd(args: &TranscriptArgs) -> Result<i32> {
    let storage = LocalStorage::new(PathBuf::new());
    let (output, count) =
        transcript::convert_session(&storage, &args.session_path, args.output.as_deref()).await?;
    println!("Wrote {} entries to {}", count, output.display());
    Ok(0)
}

async fn extract_rollout(args: &RolloutArgs, ctx: &CommandContext) -> Result<i32> {
    let repo = ctx.repo_root().await;
    let sessions_root = args
        .sessions_root
        .as_deref()
        .unwrap_or(&ctx.config.sessions.codex_sessions_root);
    let session_dir = std::env::var(SESSION_DIR_ENV)
        .ok()
        .or_else(|| ctx.config.sessions.session_dir.clone())
        .map(PathBuf::from);

    let request = RolloutRequest {
        nonce: args.nonce.clone(),
        sessions_root: paths::expand_home(sessions_root),
        output_dir: args.output_dir.as_deref().map(|p| paths::expand_home(&p.to_string_lossy())),
        output_jsonl: args.output_jsonl.clone(),
        output_md: args.output_md.clone(),
    };
    let default_dir = rollout::default_output_dir(&repo, session_dir.as_deref());
    let storage = LocalStorage::new(PathBuf::new());
    let extraction = rollout::extract_rollout(&storage, &request, default_dir).await?;
    println!("{}", extraction.jsonl_path.display());
    println!("{}", extraction.markdown_path.display());
    Ok(0)
}

async fn secret_scan_cmd(ctx: &CommandContext) -> Result<i32> {
    let repo = ctx.repo_root().await;
    let storage = LocalStorage::new(&repo);
    let findings = secret_scan::scan_reviews(&storage, &repo).await?;
    if findings.is_empty() {
        return Ok(0);
    }
    eprint!("{}", secret_scan::format_report(&repo, &findings));
    Ok(secret_scan::FINDINGS_EXIT_CODE)
}

async fn remember_later(args: &RememberLaterArgs, ctx: &CommandContext) -> Result<i32> {
    let storage = LocalStorage::new(&ctx.repo);
    let capsule_file = args
        .capsule_file
        .clone()
        .unwrap_or_else(|| ctx.config.reminders.capsule_file.clone());
    let reminder = Reminder {
        message: args.message.clone(),
        topic: args.topic.clone(),
        next_step: args.next_step.clone(),
        tags: args.tags.clone(),
    };
    let timestamp = reminders::append_reminder(&storage, &capsule_file, &reminder, Utc::now()).await?;
    println!("Appended reminder to {} ({}).", capsule_file, timestamp);
    Ok(0)
}

async fn capsule_prompt(args: &CapsulePromptArgs, ctx: &CommandContext) -> Result<i32> {
    let storage = LocalStorage::new(&ctx.repo);
    let defaults = &ctx.config.capsule;
    let request = CapsuleRequest {
        branch: ctx.git().branch_or_unknown().await,
        capsule_path: args.capsule_path.clone(),
        session_marker: args.session_marker.clone(),
        plan_slug: args.plan_slug.clone(),
        token_budget: args.token_budget.unwrap_or(defaults.token_budget),
        version: args
            .capsule_version
            .clone()
            .unwrap_or_else(|| defaults.version.clone()),
        reminder_path: args
            .reminder_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(&defaults.reminder_path)),
        include_reminders: !args.no_reminders,
        write_stub: args.write_stub,
    };
    let prompt = capsule::generate(&storage, &ctx.repo, &request, Utc::now()).await?;
    print!("{}", prompt.output);
    Ok(0)
}
