use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Pattern error: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Command `{command}` failed: {message}")]
    CommandError { command: String, message: String },

    #[error("Repository state error: {message}")]
    RepositoryStateError { message: String },

    #[error("Marker error: {message}")]
    MarkerError { message: String },

    #[error("Not found: {what}")]
    NotFoundError { what: String },

    #[error("Verification failed: {message}")]
    VerificationError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Io,
    Data,
    Configuration,
    Command,
    Repository,
    Verification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AgentError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn marker(message: impl Into<String>) -> Self {
        Self::MarkerError {
            message: message.into(),
        }
    }

    pub fn repository(message: impl Into<String>) -> Self {
        Self::RepositoryStateError {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFoundError { what: what.into() }
    }

    pub fn verification(message: impl Into<String>) -> Self {
        Self::VerificationError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::IoError(_) => ErrorCategory::Io,
            Self::SerializationError(_) | Self::ProcessingError { .. } => ErrorCategory::Data,
            Self::TomlError(_)
            | Self::PatternError(_)
            | Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            Self::CommandError { .. } => ErrorCategory::Command,
            Self::RepositoryStateError { .. }
            | Self::MarkerError { .. }
            | Self::NotFoundError { .. } => ErrorCategory::Repository,
            Self::VerificationError { .. } => ErrorCategory::Verification,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CommandError { .. } => ErrorSeverity::Medium,
            Self::IoError(_) | Self::PatternError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    /// 依嚴重程度對應的行程結束碼
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::IoError(_) => "Check that the path exists and is writable",
            Self::SerializationError(_) => "Inspect the JSON artifact; it may be truncated or hand-edited",
            Self::TomlError(_) => "Fix the syntax of agent-process.toml",
            Self::PatternError(_) => "Report this: a built-in pattern failed to compile",
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. } => {
                "Review agent-process.toml and the command-line flags"
            }
            Self::CommandError { .. } => "Make sure git (and gh, for PR data) are installed and on PATH",
            Self::RepositoryStateError { .. } => "Check out a named branch before running this command",
            Self::MarkerError { .. } => {
                "Run retro-marker, then collect-failures, then retro-audit on the current commit"
            }
            Self::NotFoundError { .. } => "Double-check the path or identifier you passed",
            Self::VerificationError { .. } => "Inspect the sandbox repository and re-run the smoke test",
            Self::ProcessingError { .. } => "Inspect the input logs for malformed entries",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::MarkerError { message } | Self::RepositoryStateError { message } => message.clone(),
            Self::VerificationError { message } => format!("verify_process_run: {}", message),
            Self::NotFoundError { what } => format!("{} not found", what),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_severity() {
        let err = AgentError::CommandError {
            command: "gh pr list".to_string(),
            message: "not installed".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Medium);
        assert_eq!(err.exit_code(), 2);

        let err = AgentError::verification("git status not clean after run");
        assert_eq!(err.category(), ErrorCategory::Verification);
        assert_eq!(err.exit_code(), 1);
        assert_eq!(
            err.user_friendly_message(),
            "verify_process_run: git status not clean after run"
        );

        let err = AgentError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(err.exit_code(), 3);
    }
}
