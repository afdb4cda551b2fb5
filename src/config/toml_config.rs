use crate::utils::error::{AgentError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const DEFAULT_CONFIG_FILE: &str = "agent-process.toml";

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env pattern"));

/// `agent-process.toml`：所有區段皆可省略
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProcessConfig {
    pub repository: RepositoryConfig,
    pub sessions: SessionsConfig,
    pub stream: StreamConfig,
    pub capsule: CapsuleConfig,
    pub reminders: RemindersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub base_remote: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_remote: "origin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// 覆寫 agentrc 中的 SESSION_DIR
    pub session_dir: Option<String>,
    pub codex_sessions_root: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            session_dir: None,
            codex_sessions_root: "~/.codex/sessions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub style: String,
    pub output_lines: usize,
    pub verbose: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            style: "tui".to_string(),
            output_lines: 4,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsuleConfig {
    pub token_budget: usize,
    pub version: String,
    pub reminder_path: String,
}

impl Default for CapsuleConfig {
    fn default() -> Self {
        Self {
            token_budget: 1200,
            version: "0.1".to_string(),
            reminder_path: "parallelus/manuals/capsules/remember-later.md".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemindersConfig {
    pub capsule_file: String,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            capsule_file: "docs/agents/capsules/remember-later.md".to_string(),
        }
    }
}

impl AgentProcessConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);
        let config: Self = toml::from_str(&processed_content)?;
        Ok(config)
    }

    /// 指定檔案必須存在；未指定時讀取 repo 根目錄的 agent-process.toml，不存在則用預設值
    pub fn load(repo_root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path: PathBuf = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(AgentError::not_found(format!(
                        "config file {}",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => {
                let candidate = repo_root.join(DEFAULT_CONFIG_FILE);
                if !candidate.exists() {
                    tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    return Ok(Self::default());
                }
                candidate
            }
        };
        tracing::debug!("Loading configuration from {}", path.display());
        Self::from_file(path)
    }

    /// 替換環境變數 (例如 ${SESSION_DIR})；未定義的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_PATTERN
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }
}

impl Validate for AgentProcessConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("repository.base_remote", &self.repository.base_remote)?;
        validation::validate_path("sessions.codex_sessions_root", &self.sessions.codex_sessions_root)?;
        if let Some(dir) = &self.sessions.session_dir {
            validation::validate_path("sessions.session_dir", dir)?;
        }
        validation::validate_one_of("stream.style", &self.stream.style, &["compact", "tui"])?;
        validation::validate_range("stream.output_lines", self.stream.output_lines, 1, 200)?;
        validation::validate_positive_number("capsule.token_budget", self.capsule.token_budget, 1)?;
        validation::validate_non_empty_string("capsule.version", &self.capsule.version)?;
        validation::validate_path("capsule.reminder_path", &self.capsule.reminder_path)?;
        validation::validate_path("reminders.capsule_file", &self.reminders.capsule_file)?;
        Ok(())
    }
}
