//! Process execution seam

use std::path::Path;
use std::process::Command;

use serde::Serialize;

use crate::{Error, Result};

/// Finished VBoxManage invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ProcessOutput {
    pub fn new(exit_code: i32, stdout: Vec<String>, stderr: Vec<String>) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }

    /// [`Error::Tool`] describing this result
    pub fn failure(&self, command: &str) -> Error {
        Error::Tool {
            command: command.to_string(),
            exit_code: self.exit_code,
            stderr: self.stderr_text(),
        }
    }

    /// Turn a non-zero exit into [`Error::Tool`]
    pub fn into_result(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(self.failure(command))
        }
    }
}

/// Runs an executable to completion and captures its output.
///
/// Blocking, one process per call. A non-zero exit is reported in the
/// returned [`ProcessOutput`], not as an error; errors are reserved for
/// failing to start the process at all.
pub trait CommandExecutor {
    fn execute(
        &self,
        program: &str,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<ProcessOutput>;
}

/// Executor backed by `std::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    fn execute(
        &self,
        program: &str,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<ProcessOutput> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let output = command.output()?;

        Ok(ProcessOutput {
            // Killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
            stdout: split_lines(&output.stdout),
            stderr: split_lines(&output.stderr),
        })
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}
