//! VBoxManage command wrappers

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use super::{CommandExecutor, ProcessExecutor, ProcessOutput};
use crate::config::{ControllerSpec, DiskSpec, VBoxManageConfig};
use crate::models::{Disk, InventoryLookup};
use crate::parse;
use crate::{Error, Result};

/// VBoxManage operations.
///
/// Each method builds the argument vector for one subcommand and runs it to
/// completion. A non-zero exit comes back inside the [`ProcessOutput`]; only
/// blank required arguments, a missing working directory or a failure to
/// spawn the process are returned as errors.
pub struct VBoxManage {
    config: VBoxManageConfig,
    executor: Arc<dyn CommandExecutor>,
}

impl VBoxManage {
    /// Runner that spawns the real executable
    pub fn new(config: VBoxManageConfig) -> Result<Self> {
        Self::with_executor(config, Arc::new(ProcessExecutor))
    }

    pub fn with_executor(config: VBoxManageConfig, executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, executor })
    }

    pub fn config(&self) -> &VBoxManageConfig {
        &self.config
    }

    /// Run every later command from `path`
    pub fn from_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.working_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// `--version`
    pub fn display_version(&self) -> Result<ProcessOutput> {
        self.run(vec!["--version".into()])
    }

    /// Installed version, stdout lines joined with `;`
    pub fn version(&self) -> Result<String> {
        let output = self.display_version()?.into_result("--version")?;
        Ok(output.stdout.join(";"))
    }

    /// `list vms`
    pub fn list_vms(&self) -> Result<ProcessOutput> {
        self.run(vec!["list".into(), "vms".into()])
    }

    /// `showvminfo <vm>`; a well-formed identifier is passed in hyphenated form
    pub fn show_vm_info(&self, name_or_uuid: &str) -> Result<ProcessOutput> {
        let target = required(name_or_uuid, "vm name or uuid")?;
        let target = match Uuid::parse_str(target) {
            Ok(id) => id.hyphenated().to_string(),
            Err(_) => target.to_string(),
        };

        self.run(vec!["showvminfo".into(), target])
    }

    /// `list hdds`
    pub fn list_hdds(&self) -> Result<ProcessOutput> {
        self.run(vec!["list".into(), "hdds".into()])
    }

    /// `createvm --name <name> --ostype <type> --register`
    pub fn create_vm(&self, name: &str, os_type: &str) -> Result<ProcessOutput> {
        let name = required(name, "vm name")?;
        let os_type = required(os_type, "os type")?;

        tracing::info!(vm = %name, os_type = %os_type, "createvm");
        self.run(vec![
            "createvm".into(),
            "--name".into(),
            name.into(),
            "--ostype".into(),
            os_type.into(),
            "--register".into(),
        ])
    }

    /// `storagectl <vm> --name <name> --add <bus> --controller <model>`
    pub fn create_storage_controller(
        &self,
        vm_name: &str,
        controller: &ControllerSpec,
    ) -> Result<ProcessOutput> {
        let vm_name = required(vm_name, "vm name")?;
        let name = required(&controller.name, "controller name")?;

        tracing::info!(vm = %vm_name, controller = %name, "storagectl add");
        self.run(vec![
            "storagectl".into(),
            vm_name.into(),
            "--name".into(),
            name.into(),
            "--add".into(),
            controller.bus_type.clone(),
            "--controller".into(),
            controller.controller_model.clone(),
        ])
    }

    /// `createhd --filename <file> --size <mb>`
    pub fn create_hd(&self, disk: &DiskSpec) -> Result<ProcessOutput> {
        let file_name = required(&disk.file_name, "disk file name")?;

        tracing::info!(disk = %file_name, size_mb = disk.size_mb, "createhd");
        self.run(vec![
            "createhd".into(),
            "--filename".into(),
            file_name.into(),
            "--size".into(),
            disk.size_mb.to_string(),
        ])
    }

    /// `storageattach <vm> --storagectl <ctl> --port <p> --device <d> --type hdd --medium <file>`
    pub fn attach_storage(
        &self,
        vm_name: &str,
        controller_name: &str,
        disk: &DiskSpec,
    ) -> Result<ProcessOutput> {
        let vm_name = required(vm_name, "vm name")?;
        let controller_name = required(controller_name, "controller name")?;
        let file_name = required(&disk.file_name, "disk file name")?;

        tracing::info!(vm = %vm_name, controller = %controller_name, disk = %file_name, "storageattach");
        self.run(vec![
            "storageattach".into(),
            vm_name.into(),
            "--storagectl".into(),
            controller_name.into(),
            "--port".into(),
            disk.port.to_string(),
            "--device".into(),
            disk.device.to_string(),
            "--type".into(),
            "hdd".into(),
            "--medium".into(),
            file_name.into(),
        ])
    }

    /// `controlvm <vm> poweroff`
    pub fn power_off(&self, name_or_uuid: &str) -> Result<ProcessOutput> {
        let target = required(name_or_uuid, "vm name or uuid")?;
        self.run(vec!["controlvm".into(), target.into(), "poweroff".into()])
    }

    /// `unregistervm <vm> --delete`
    pub fn unregister_vm(&self, name_or_uuid: &str) -> Result<ProcessOutput> {
        let target = required(name_or_uuid, "vm name or uuid")?;
        self.run(vec!["unregistervm".into(), target.into(), "--delete".into()])
    }

    /// `closemedium disk <disk> --delete`
    pub fn close_medium(&self, name_or_uuid: &str) -> Result<ProcessOutput> {
        let target = required(name_or_uuid, "disk name or uuid")?;
        self.run(vec![
            "closemedium".into(),
            "disk".into(),
            target.into(),
            "--delete".into(),
        ])
    }

    /// Raw `list vms` text; empty when the listing fails
    pub fn vm_list_text(&self) -> Result<String> {
        let output = self.list_vms()?;
        if !output.success() {
            tracing::warn!(exit_code = output.exit_code, stderr = %output.stderr_text(), "list vms failed");
            return Ok(String::new());
        }
        Ok(output.stdout_text())
    }

    /// Registered disks; empty when the listing fails
    pub fn disks(&self) -> Result<Vec<Disk>> {
        let output = self.list_hdds()?;
        if !output.success() {
            tracing::warn!(exit_code = output.exit_code, stderr = %output.stderr_text(), "list hdds failed");
            return Ok(Vec::new());
        }
        Ok(parse::parse_disks(&output.stdout_text()))
    }

    fn run(&self, args: Vec<String>) -> Result<ProcessOutput> {
        let working_dir = self.working_dir()?;

        tracing::debug!(executable = %self.config.executable, args = ?args, "Running VBoxManage");
        let output = self
            .executor
            .execute(&self.config.executable, &args, working_dir)?;

        if !output.success() {
            tracing::debug!(
                command = %args.first().map(String::as_str).unwrap_or_default(),
                exit_code = output.exit_code,
                stderr = %output.stderr_text(),
                "VBoxManage exited with failure"
            );
        }

        Ok(output)
    }

    fn working_dir(&self) -> Result<Option<&Path>> {
        match &self.config.working_dir {
            Some(dir) if !dir.is_dir() => Err(Error::WorkingDirectoryNotFound(dir.clone())),
            Some(dir) => Ok(Some(dir.as_path())),
            None => Ok(None),
        }
    }
}

impl InventoryLookup for VBoxManage {
    fn vm_detail_text(&self, vm: &Uuid) -> Option<String> {
        match self.show_vm_info(&vm.to_string()) {
            Ok(output) if output.success() => Some(output.stdout_text()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(vm = %vm, error = %e, "showvminfo failed");
                None
            }
        }
    }

    fn disk(&self, disk: &Uuid) -> Option<Disk> {
        match self.disks() {
            Ok(disks) => disks.into_iter().find(|d| d.uuid.as_ref() == Some(disk)),
            Err(e) => {
                tracing::warn!(disk = %disk, error = %e, "list hdds failed");
                None
            }
        }
    }
}

/// Trimmed value of a required argument
fn required<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::blank(what));
    }
    Ok(value)
}
