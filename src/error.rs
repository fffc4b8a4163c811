//! Error types for the VBoxManage orchestrator

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Working directory path not found [{}]", .0.display())]
    WorkingDirectoryNotFound(PathBuf),

    #[error("VBoxManage {command} failed with exit code {exit_code}: {stderr}")]
    Tool {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid-argument error for a blank required argument
    pub fn blank(arg: &str) -> Self {
        Error::InvalidArgument(format!("{} cannot be empty", arg))
    }

    /// Lines of captured stderr if this is a tool failure
    pub fn stderr_lines(&self) -> Vec<&str> {
        match self {
            Error::Tool { stderr, .. } => stderr.lines().collect(),
            _ => Vec::new(),
        }
    }

    /// Check if this failure was caused by a stale machine settings file
    pub fn is_settings_conflict(&self) -> bool {
        crate::parse::existing_settings_file(self.stderr_lines()).is_some()
    }
}
