//! Scripted executor for unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{CommandExecutor, ProcessOutput};
use crate::{Error, Result};

/// Replays canned outputs keyed by VBoxManage subcommand and records every call.
/// Unscripted subcommands succeed with empty output.
#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    responses: Mutex<HashMap<String, VecDeque<ProcessOutput>>>,
    calls: Mutex<Vec<Vec<String>>>,
    unavailable: Mutex<HashSet<String>>,
    dirs: Mutex<Vec<Option<PathBuf>>>,
}

impl ScriptedExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(self, command: &str, output: ProcessOutput) -> Self {
        self.responses
            .lock()
            .entry(command.to_string())
            .or_default()
            .push_back(output);
        self
    }

    pub(crate) fn stdout(self, command: &str, text: &str) -> Self {
        let lines = text.lines().map(str::to_string).collect();
        self.respond(command, ProcessOutput::new(0, lines, Vec::new()))
    }

    pub(crate) fn fail(self, command: &str, stderr: &str) -> Self {
        let lines = stderr.lines().map(str::to_string).collect();
        self.respond(command, ProcessOutput::new(1, Vec::new(), lines))
    }

    /// Every call to `command` fails to spawn
    pub(crate) fn unavailable(self, command: &str) -> Self {
        self.unavailable.lock().insert(command.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// First argument of every call, in order
    pub(crate) fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|args| args.first().cloned().unwrap_or_default())
            .collect()
    }

    pub(crate) fn dirs(&self) -> Vec<Option<PathBuf>> {
        self.dirs.lock().clone()
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(
        &self,
        _program: &str,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<ProcessOutput> {
        self.calls.lock().push(args.to_vec());
        self.dirs.lock().push(working_dir.map(Path::to_path_buf));

        let command = args.first().cloned().unwrap_or_default();
        if self.unavailable.lock().contains(&command) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "VBoxManage not found",
            )));
        }

        let output = self
            .responses
            .lock()
            .get_mut(&command)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        Ok(output)
    }
}
