pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub mod app;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{git::GitClient, process::SystemCommandRunner, storage::LocalStorage};
pub use config::AgentProcessConfig;
pub use core::stream_filter::{StreamFilter, StreamFilterOptions};
pub use utils::error::{AgentError, Result};
