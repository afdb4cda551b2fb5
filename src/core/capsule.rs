//! Context capsule capture prompt.
//!
//! 產生一段可貼到 agent session 的提示，要求將目前的工作記憶整理成 capsule 文件，
//! 並可選擇先建立含 front matter 與章節骨架的 stub。

use crate::config::paths;
use crate::domain::ports::Storage;
use crate::utils::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};

pub const CAPSULES_ROOT: &str = "parallelus/manuals/capsules";
pub const TEMPLATE_PATH: &str = "parallelus/manuals/templates/context_capsule_prompt.md";
pub const DESIGN_DOC_PATH: &str = "parallelus/manuals/prototypes/context-capsule.md";
const SESSION_PLACEHOLDER: &str = "<fill-latest-session-marker>";

const STUB_BODY: &str = "# Mission Snapshot
- **User intent:** <summarise the latest user request>
- **Current status:** <branch state, outstanding checks>

# Key Decisions & Rationale
1. <Decision> — <Why it was made>

# Active Workstreams
- **<Workstream>** — scope, owner, blockers.

# Pending Actions
- [ ] <Action item> (owner, trigger)

# Knowledge Base
- <Reference> — <why it matters>

# Risks & Watchpoints
- <Risk> — <mitigation>

# Transcript Highlights
- <Timestamp or log reference> — <key takeaway>

# Exploratory Threads & User Preferences
- **<Topic>** — <current hypothesis or preference>; next step: <follow-up>.

# Consistency Checklist
- [ ] Capsule aligns with docs/plans/{plan_slug}.md latest entry.
- [ ] Capsule aligns with docs/progress/{plan_slug}.md latest entry.
- [ ] Referenced commits/PRs are included in current branch history.
- [ ] Sensitive data removed.";

#[derive(Debug, Clone)]
pub struct CapsuleRequest {
    pub branch: String,
    pub capsule_path: Option<PathBuf>,
    pub session_marker: Option<String>,
    pub plan_slug: Option<String>,
    pub token_budget: usize,
    pub version: String,
    pub reminder_path: PathBuf,
    pub include_reminders: bool,
    pub write_stub: bool,
}

#[derive(Debug, Clone)]
pub struct CapsulePrompt {
    pub capsule_path: PathBuf,
    pub stub_created: bool,
    pub output: String,
}

pub fn build_capsule_path(branch: &str, override_path: Option<&Path>, timestamp: DateTime<Utc>) -> PathBuf {
    if let Some(path) = override_path.filter(|p| !p.as_os_str().is_empty()) {
        return path.to_path_buf();
    }
    Path::new(CAPSULES_ROOT)
        .join(paths::sanitise_branch_path(branch))
        .join(format!("{}.md", timestamp.format("%Y%m%dT%H%M%SZ")))
}

/// 微秒為零時省略小數
fn iso_utc(timestamp: DateTime<Utc>) -> String {
    let precision = if timestamp.timestamp_subsec_micros() == 0 {
        SecondsFormat::Secs
    } else {
        SecondsFormat::Micros
    };
    timestamp.to_rfc3339_opts(precision, false)
}

pub fn render_stub(
    branch: &str,
    plan_slug: &str,
    session_marker: Option<&str>,
    token_budget: usize,
    version: &str,
    created_at: DateTime<Utc>,
) -> String {
    let front_matter = [
        "---".to_string(),
        format!("branch: {}", branch),
        format!("source_session: {}", session_marker.unwrap_or(SESSION_PLACEHOLDER)),
        format!("created_at: {}", iso_utc(created_at)),
        "primary_objective: <describe the immediate focus in one sentence>".to_string(),
        format!("token_budget: {}", token_budget),
        format!("version: {}", version),
        "---".to_string(),
    ]
    .join("\n");
    format!(
        "{}\n\n{}\n",
        front_matter,
        STUB_BODY.replace("{plan_slug}", plan_slug)
    )
}

/// stub 已存在時不覆寫，回傳 false
pub async fn write_stub<S: Storage>(
    storage: &S,
    path: &Path,
    request: &CapsuleRequest,
    plan_slug: &str,
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let key = path.to_string_lossy();
    if storage.exists(&key).await {
        return Ok(false);
    }
    let stub = render_stub(
        &request.branch,
        plan_slug,
        request.session_marker.as_deref(),
        request.token_budget,
        &request.version,
        created_at,
    );
    storage.write_file(&key, stub.as_bytes()).await?;
    Ok(true)
}

pub struct PromptInputs<'a> {
    pub branch: &'a str,
    pub capsule_path: &'a Path,
    pub plan_path: &'a Path,
    pub plan_exists: bool,
    pub progress_path: &'a Path,
    pub progress_exists: bool,
    pub reminder_path: &'a Path,
    pub reminder_contents: Option<&'a str>,
    pub session_marker: Option<&'a str>,
    pub token_budget: usize,
    pub version: &'a str,
    pub timestamp: DateTime<Utc>,
}

pub fn build_prompt(inputs: &PromptInputs<'_>) -> String {
    let plan_line = if inputs.plan_exists {
        format!("- Branch plan: `{}`", inputs.plan_path.display())
    } else {
        "- Branch plan: (no file detected)".to_string()
    };
    let progress_line = if inputs.progress_exists {
        format!("- Progress log: `{}`", inputs.progress_path.display())
    } else {
        "- Progress log: (no file detected)".to_string()
    };
    let capsule = inputs.capsule_path.display();
    let session_line = inputs.session_marker.unwrap_or(SESSION_PLACEHOLDER);
    let budget = inputs.token_budget;

    let mut prompt = format!(
        "You are the main agent for branch `{branch}`. Flush your current working memory into a
complete context capsule so a successor session feels like the same collaborator.

Requirements:
- Write the capsule to `{capsule}` (create the file if it does not exist).
- Follow the structure defined in `{TEMPLATE_PATH}`.
- Include the metadata front matter with:
  - `branch: {branch}`
  - `source_session: {session_line}` (use the most recent session marker)
  - `created_at: {created_at}`
  - `primary_objective`: one-sentence summary of the current focus
  - `token_budget: {budget}`
  - `version: {version}`

Reference artifacts before writing:
{plan_line}
{progress_line}
- Reminder inbox: `{reminder}`
- Latest committed diffs relevant to the objectives.
- Any `/compact` or summary artifacts already produced this session.

Scope of the capsule:
- Capture mission snapshot, key decisions, active workstreams, pending actions, knowledge references, risks, transcript highlights, and exploratory threads exactly as outlined in the template.
- Integrate every \"remember this later\" reminder that is still relevant; once incorporated, clear or annotate the reminder inbox entry so it is not duplicated next time.
- Surface unresolved hypotheses or user preferences even if they have not been promoted to the plan notebook yet.
- Prefer concise bullets that cite source artifacts (commit hashes, plan entries, timestamps) instead of verbose prose.

Quality gate before returning the capsule:
- Cross-check the plan and progress notebook for consistency.
- Flag any mismatches or missing updates in the `Risks & Watchpoints` section.
- Ensure there are no TODO placeholders remaining.
- Confirm the final capsule fits within {budget} tokens (≈4.5k characters).

Respond with only the completed Markdown capsule body ready to commit to `{capsule}`.
If you need additional guidance on capsule expectations, review `{DESIGN_DOC_PATH}` first.",
        branch = inputs.branch,
        created_at = iso_utc(inputs.timestamp),
        version = inputs.version,
        reminder = inputs.reminder_path.display(),
    );

    if let Some(contents) = inputs.reminder_contents.filter(|c| !c.is_empty()) {
        prompt.push_str(&format!(
            "\n\nReminder inbox snapshot (trim once captured):\n```markdown\n{}\n```",
            contents
        ));
    }
    prompt.push('\n');
    prompt
}

/// 組合 header、(選擇性) stub 與提示
pub async fn generate<S: Storage>(
    storage: &S,
    repo_root: &Path,
    request: &CapsuleRequest,
    timestamp: DateTime<Utc>,
) -> Result<CapsulePrompt> {
    let capsule_path = build_capsule_path(&request.branch, request.capsule_path.as_deref(), timestamp);
    let plan_slug = request
        .plan_slug
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| paths::capsule_branch_slug(&request.branch));
    let plan_path = Path::new("docs/plans").join(format!("{}.md", plan_slug));
    let progress_path = Path::new("docs/progress").join(format!("{}.md", plan_slug));

    let reminder_contents = if request.include_reminders {
        let key = request.reminder_path.to_string_lossy();
        if storage.exists(&key).await {
            let raw = storage.read_file(&key).await?;
            Some(String::from_utf8_lossy(&raw).trim().to_string()).filter(|c| !c.is_empty())
        } else {
            None
        }
    } else {
        None
    };

    let stub_created = if request.write_stub {
        write_stub(storage, &capsule_path, request, &plan_slug, timestamp).await?
    } else {
        false
    };

    let prompt = build_prompt(&PromptInputs {
        branch: &request.branch,
        capsule_path: &capsule_path,
        plan_path: &plan_path,
        plan_exists: repo_root.join(&plan_path).exists(),
        progress_path: &progress_path,
        progress_exists: repo_root.join(&progress_path).exists(),
        reminder_path: &request.reminder_path,
        reminder_contents: reminder_contents.as_deref(),
        session_marker: request.session_marker.as_deref(),
        token_budget: request.token_budget,
        version: &request.version,
        timestamp,
    });

    let mut header = vec![
        "# Capsule Capture Prompt".to_string(),
        "Copy the block below into the active agent session to generate a capsule.".to_string(),
        format!("Target file: {}", capsule_path.display()),
    ];
    if let Some(marker) = request.session_marker.as_deref().filter(|m| !m.is_empty()) {
        header.push(format!("Session marker: {}", marker));
    }
    if stub_created {
        header.push("Capsule stub created.".to_string());
    }

    Ok(CapsulePrompt {
        output: format!("{}\n\n{}", header.join("\n"), prompt),
        capsule_path,
        stub_created,
    })
}
