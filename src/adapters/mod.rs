// Adapters layer: concrete implementations for external systems (filesystem, processes, git).

pub mod git;
pub mod process;
pub mod storage;
