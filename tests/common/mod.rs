//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use vbox_orchestrator::{
    CommandExecutor, Orchestrator, ProcessOutput, Result, Storage, VBoxManage, VBoxManageConfig,
};

/// Executor that replays queued outputs per VBoxManage subcommand
#[derive(Default)]
pub struct FakeVBoxManage {
    responses: Mutex<HashMap<String, VecDeque<ProcessOutput>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeVBoxManage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stdout(&self, command: &str, text: &str) -> &Self {
        let lines = text.lines().map(str::to_string).collect();
        self.push(command, ProcessOutput::new(0, lines, Vec::new()))
    }

    pub fn fail(&self, command: &str, stderr: &str) -> &Self {
        let lines = stderr.lines().map(str::to_string).collect();
        self.push(command, ProcessOutput::new(1, Vec::new(), lines))
    }

    fn push(&self, command: &str, output: ProcessOutput) -> &Self {
        self.responses
            .lock()
            .entry(command.to_string())
            .or_default()
            .push_back(output);
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|args| args.first().cloned().unwrap_or_default())
            .collect()
    }
}

impl CommandExecutor for FakeVBoxManage {
    fn execute(
        &self,
        _program: &str,
        args: &[String],
        _working_dir: Option<&Path>,
    ) -> Result<ProcessOutput> {
        self.calls.lock().push(args.to_vec());
        let command = args.first().cloned().unwrap_or_default();
        Ok(self
            .responses
            .lock()
            .get_mut(&command)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }
}

/// Storage with nothing on it; conflict cleanup is covered by unit tests
/// where the settle delay can be skipped
#[derive(Default)]
pub struct EmptyStorage;

impl Storage for EmptyStorage {
    fn file_exists(&self, _path: &Path) -> bool {
        false
    }

    fn delete_file(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn dir_exists(&self, _path: &Path) -> bool {
        false
    }

    fn delete_dir(&self, _path: &Path, _recursive: bool) -> Result<()> {
        Ok(())
    }
}

pub fn orchestrator(fake: &Arc<FakeVBoxManage>) -> Orchestrator {
    let vbox = VBoxManage::with_executor(VBoxManageConfig::default(), fake.clone()).unwrap();
    Orchestrator::from_parts(vbox, Box::new(EmptyStorage))
}

pub const VMS: &str = r#""TestBox_default" {19c3ab26-0746-4ddd-97ae-37552fdea6e8}
"TestBox_default_1" {4a4a8f4e-8d2c-4b8e-9d45-4c5e1f3f6a11}
"#;

pub const HDDS: &str = "UUID:           6b0e6a1e-0f0c-4d5f-9d6f-3c1c2b8e5a10
Parent UUID:    base
State:          created
Type:           normal (base)
Location:       /vms/TestBox_default/box-disk1.vmdk
Storage format: VMDK
Capacity:       40960 MBytes
Encryption:     disabled

UUID:           debc84da-8a8e-4f24-a2a0-1b6f3b4d8c11
Parent UUID:    6b0e6a1e-0f0c-4d5f-9d6f-3c1c2b8e5a10
State:          created
Type:           normal (differencing)
Location:       /vms/TestBox_default/Snapshots/{debc84da-8a8e-4f24-a2a0-1b6f3b4d8c11}.vmdk
Storage format: VMDK
Capacity:       40960 MBytes
Encryption:     disabled
";
