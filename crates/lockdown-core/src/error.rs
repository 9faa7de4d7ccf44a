//! Error types for the lockdown engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockdownError {
    #[error("hook install failed: {0}")]
    HookInstall(String),

    #[error("configuration rejected: {0}")]
    Configuration(String),

    #[error("restoration failed: {0}")]
    Restoration(String),

    #[error("unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("settings store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LockdownError>;

/// Failures reported by a process table for a single pid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("access denied for pid {0}")]
    AccessDenied(u32),

    #[error("process {0} already exited")]
    Exited(u32),
}
