pub mod branches;
pub mod capsule;
pub mod failures;
pub mod prompt_phase;
pub mod redact;
pub mod reminders;
pub mod retro_audit;
pub mod rollout;
pub mod secret_scan;
pub mod stream_filter;
pub mod transcript;
pub mod verify;

pub use crate::domain::model::{BranchInfo, Failure, FailureSummary, RetroReport};
pub use crate::domain::ports::{CommandRunner, Storage};
pub use crate::utils::error::Result;
