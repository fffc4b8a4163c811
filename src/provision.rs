//! VM provisioning and teardown
//!
//! Provisioning runs four stages in order: create the VM, add each storage
//! controller, create each disk, attach each disk. A failed controller skips
//! its disks, a failed disk skips its attach, and nothing already created is
//! rolled back. Only VM creation is fatal.
//!
//! When VM creation fails because a settings file for the name is already on
//! disk, the stale machine is powered off and unregistered, the settings file
//! and its directory are removed, and creation is retried once.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::config::ProvisionSpec;
use crate::parse;
use crate::storage::Storage;
use crate::vboxmanage::{ProcessOutput, VBoxManage};
use crate::{Error, Result};

/// Wait between powering off a machine and deleting it, while VirtualBox
/// finishes tearing the session down
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Create-VM retries after a settings file conflict has been cleaned up
pub const CONFLICT_RETRIES: u32 = 1;

/// One external step issued while provisioning or tearing down
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Stage {
    CreateVm,
    PowerOff,
    Unregister,
    CreateController { controller: String },
    CreateDisk { controller: String, disk: String },
    AttachDisk { controller: String, disk: String },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::CreateVm => write!(f, "createvm"),
            Stage::PowerOff => write!(f, "controlvm poweroff"),
            Stage::Unregister => write!(f, "unregistervm"),
            Stage::CreateController { controller } => write!(f, "storagectl {}", controller),
            Stage::CreateDisk { controller, disk } => {
                write!(f, "createhd {} (controller {})", disk, controller)
            }
            Stage::AttachDisk { controller, disk } => {
                write!(f, "storageattach {} to {}", disk, controller)
            }
        }
    }
}

/// A controller, disk or attach step that failed without aborting provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    /// `-1` when VBoxManage could not be run at all
    pub exit_code: i32,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProvisionStatus {
    /// Every stage succeeded
    Provisioned,
    /// The VM exists but some controller, disk or attach step failed
    PartiallyProvisioned,
}

impl fmt::Display for ProvisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionStatus::Provisioned => write!(f, "Provisioned"),
            ProvisionStatus::PartiallyProvisioned => write!(f, "PartiallyProvisioned"),
        }
    }
}

/// Outcome of a provisioning run whose VM was created
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub vm_name: String,
    /// Stale settings file removed before the successful retry
    pub recovered_settings_file: Option<PathBuf>,
    pub failures: Vec<StageFailure>,
}

impl ProvisionReport {
    pub fn status(&self) -> ProvisionStatus {
        if self.failures.is_empty() {
            ProvisionStatus::Provisioned
        } else {
            ProvisionStatus::PartiallyProvisioned
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == ProvisionStatus::Provisioned
    }

    fn record(&mut self, stage: Stage, output: &ProcessOutput) {
        self.failures.push(StageFailure {
            stage,
            exit_code: output.exit_code,
            stderr: output.stderr_text(),
        });
    }
}

/// Sequences provisioning and teardown against one runner
pub struct Provisioner<'a> {
    vbox: &'a VBoxManage,
    storage: &'a dyn Storage,
    sleep: Box<dyn Fn(Duration) + 'a>,
}

impl<'a> Provisioner<'a> {
    pub fn new(vbox: &'a VBoxManage, storage: &'a dyn Storage) -> Self {
        Self {
            vbox,
            storage,
            sleep: Box::new(std::thread::sleep),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_sleep(mut self, sleep: impl Fn(Duration) + 'a) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn provision(&self, spec: &ProvisionSpec) -> Result<ProvisionReport> {
        self.provision_with(spec, &mut |_, _| {})
    }

    /// Provision `spec`, handing every finished step to `on_step`.
    ///
    /// Fails only on an invalid spec or when the VM cannot be created; all
    /// later failures, including a runner that cannot start VBoxManage, are
    /// collected in the report.
    pub fn provision_with(
        &self,
        spec: &ProvisionSpec,
        on_step: &mut dyn FnMut(&Stage, &ProcessOutput),
    ) -> Result<ProvisionReport> {
        spec.validate()?;
        let vm = spec.vm_name.trim();

        tracing::info!(vm = %vm, controllers = spec.controllers.len(), "Provisioning VM");

        let recovered_settings_file = self.create_vm(vm, &spec.os_type, on_step)?;
        let mut report = ProvisionReport {
            vm_name: vm.to_string(),
            recovered_settings_file,
            failures: Vec::new(),
        };

        for controller in &spec.controllers {
            let stage = Stage::CreateController {
                controller: controller.name.clone(),
            };
            let output = stage_output(&stage, self.vbox.create_storage_controller(vm, controller));
            on_step(&stage, &output);

            if !output.success() {
                tracing::warn!(vm = %vm, controller = %controller.name, "Failed to add storagectl, skipping its disks");
                report.record(stage, &output);
                continue;
            }

            for disk in &controller.disks {
                let stage = Stage::CreateDisk {
                    controller: controller.name.clone(),
                    disk: disk.file_name.clone(),
                };
                let output = stage_output(&stage, self.vbox.create_hd(disk));
                on_step(&stage, &output);

                if !output.success() {
                    tracing::warn!(vm = %vm, controller = %controller.name, disk = %disk.file_name, "Failed to create disk");
                    report.record(stage, &output);
                    continue;
                }

                let stage = Stage::AttachDisk {
                    controller: controller.name.clone(),
                    disk: disk.file_name.clone(),
                };
                let output =
                    stage_output(&stage, self.vbox.attach_storage(vm, &controller.name, disk));
                on_step(&stage, &output);

                if !output.success() {
                    tracing::warn!(vm = %vm, controller = %controller.name, disk = %disk.file_name, "Failed to attach disk");
                    report.record(stage, &output);
                }
            }
        }

        tracing::info!(vm = %vm, status = %report.status(), failures = report.failures.len(), "Provisioning finished");
        Ok(report)
    }

    /// Power off, unregister and delete a machine, then delete the given disk
    /// files (relative to the working directory). Errors are logged and
    /// swallowed.
    pub fn destroy_machine(&self, vm_name: &str, disk_files: &[String]) -> Result<()> {
        let vm = vm_name.trim();
        if vm.is_empty() {
            return Err(Error::blank("vm name"));
        }

        tracing::info!(vm = %vm, disks = disk_files.len(), "Destroying machine");
        self.teardown(vm, &mut |_, _| {});

        for file in disk_files {
            let path = match &self.vbox.config().working_dir {
                Some(dir) => dir.join(file),
                None => PathBuf::from(file),
            };
            if self.storage.file_exists(&path) {
                if let Err(e) = self.storage.delete_file(&path) {
                    tracing::warn!(disk = %path.display(), error = %e, "Failed to delete disk file");
                }
            }
        }

        Ok(())
    }

    /// Create the VM, recovering once from a stale settings file.
    /// Returns the settings file that had to be removed, if any.
    fn create_vm(
        &self,
        vm: &str,
        os_type: &str,
        on_step: &mut dyn FnMut(&Stage, &ProcessOutput),
    ) -> Result<Option<PathBuf>> {
        let mut recovered = None;
        let mut retries = 0;

        loop {
            let output = self.vbox.create_vm(vm, os_type)?;
            on_step(&Stage::CreateVm, &output);

            if output.success() {
                return Ok(recovered);
            }

            match parse::existing_settings_file(&output.stderr) {
                Some(settings_file) if retries < CONFLICT_RETRIES => {
                    retries += 1;
                    tracing::warn!(vm = %vm, settings_file = %settings_file, "Machine settings file already exists, cleaning up and retrying");

                    self.teardown(vm, on_step);
                    let settings_file = PathBuf::from(settings_file);
                    self.remove_settings(&settings_file);
                    recovered = Some(settings_file);
                }
                _ => {
                    tracing::error!(vm = %vm, exit_code = output.exit_code, stderr = %output.stderr_text(), "Failed to create vm");
                    return Err(output.failure("createvm"));
                }
            }
        }
    }

    /// Best-effort power off, settle, unregister
    fn teardown(&self, vm: &str, on_step: &mut dyn FnMut(&Stage, &ProcessOutput)) {
        match self.vbox.power_off(vm) {
            Ok(output) => on_step(&Stage::PowerOff, &output),
            Err(e) => tracing::warn!(vm = %vm, error = %e, "controlvm poweroff failed"),
        }

        (self.sleep)(SETTLE_DELAY);

        match self.vbox.unregister_vm(vm) {
            Ok(output) => on_step(&Stage::Unregister, &output),
            Err(e) => tracing::warn!(vm = %vm, error = %e, "unregistervm failed"),
        }
    }

    fn remove_settings(&self, settings_file: &Path) {
        if self.storage.file_exists(settings_file) {
            if let Err(e) = self.storage.delete_file(settings_file) {
                tracing::warn!(file = %settings_file.display(), error = %e, "Failed to delete settings file");
            }
        }

        let Some(dir) = settings_file.parent().filter(|d| !d.as_os_str().is_empty()) else {
            return;
        };
        if self.storage.dir_exists(dir) {
            if let Err(e) = self.storage.delete_dir(dir, true) {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to delete settings directory");
            }
        }
    }
}

/// Output of a stage after the VM exists. A runner error becomes a failed
/// output so the report is kept.
fn stage_output(stage: &Stage, result: Result<ProcessOutput>) -> ProcessOutput {
    result.unwrap_or_else(|e| {
        tracing::warn!(stage = %stage, error = %e, "VBoxManage could not be run");
        ProcessOutput::new(-1, Vec::new(), vec![e.to_string()])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VBoxManageConfig;
    use crate::storage::MockStorage;
    use crate::vboxmanage::fake::ScriptedExecutor;
    use mockall::predicate::*;
    use std::cell::RefCell;
    use std::sync::Arc;

    const CONFLICT: &str = "VBoxManage: error: Machine settings file '/vms/TestBox_default/TestBox_default.vbox' already exists\n\
                            VBoxManage: error: Details: code VBOX_E_FILE_ERROR (0x80bb0004), component MachineWrap, interface IMachine";

    fn runner(exec: &Arc<ScriptedExecutor>) -> VBoxManage {
        VBoxManage::with_executor(VBoxManageConfig::default(), exec.clone()).unwrap()
    }

    fn single_disk_spec() -> ProvisionSpec {
        let mut spec = ProvisionSpec::new("TestBox_default");
        spec.add_controller("SATA Controller", "sata", "IntelAHCI")
            .unwrap()
            .add_disk("TestBox_default.vdi", Some(32768));
        spec
    }

    fn quiet_storage() -> MockStorage {
        let mut storage = MockStorage::new();
        storage.expect_file_exists().return_const(false);
        storage.expect_dir_exists().return_const(false);
        storage
    }

    #[test]
    fn test_provision_order() {
        let exec = Arc::new(ScriptedExecutor::new());
        let vbox = runner(&exec);
        let storage = quiet_storage();

        let report = Provisioner::new(&vbox, &storage)
            .provision(&single_disk_spec())
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(
            exec.commands(),
            vec!["createvm", "storagectl", "createhd", "storageattach"]
        );
    }

    #[test]
    fn test_provision_reports_each_step() {
        let exec = Arc::new(ScriptedExecutor::new());
        let vbox = runner(&exec);
        let storage = quiet_storage();

        let mut stages = Vec::new();
        Provisioner::new(&vbox, &storage)
            .provision_with(&single_disk_spec(), &mut |stage, output| {
                assert!(output.success());
                stages.push(stage.clone());
            })
            .unwrap();

        assert_eq!(stages.len(), 4);
        assert_eq!(stages[0], Stage::CreateVm);
        assert_eq!(
            stages[3],
            Stage::AttachDisk {
                controller: "SATA Controller".into(),
                disk: "TestBox_default.vdi".into(),
            }
        );
    }

    #[test]
    fn test_controller_failure_skips_its_disks() {
        let exec = Arc::new(ScriptedExecutor::new().fail("storagectl", "VBoxManage: error: bad controller"));
        let vbox = runner(&exec);
        let storage = quiet_storage();

        let mut spec = single_disk_spec();
        spec.add_controller("IDE Controller", "ide", "PIIX4")
            .unwrap()
            .add_disk("data.vdi", Some(1024));

        let report = Provisioner::new(&vbox, &storage).provision(&spec).unwrap();

        assert_eq!(report.status(), ProvisionStatus::PartiallyProvisioned);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].stage,
            Stage::CreateController {
                controller: "SATA Controller".into()
            }
        );
        assert_eq!(
            exec.commands(),
            vec!["createvm", "storagectl", "storagectl", "createhd", "storageattach"]
        );
        assert_eq!(exec.calls()[3][2], "data.vdi");
    }

    #[test]
    fn test_disk_failure_skips_attach_only() {
        let exec = Arc::new(ScriptedExecutor::new().fail("createhd", "VBoxManage: error: exists"));
        let vbox = runner(&exec);
        let storage = quiet_storage();

        let mut spec = single_disk_spec();
        spec.controllers[0].add_disk("second.vdi", Some(1024));

        let report = Provisioner::new(&vbox, &storage).provision(&spec).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            exec.commands(),
            vec!["createvm", "storagectl", "createhd", "createhd", "storageattach"]
        );
        assert_eq!(exec.calls()[4].last().unwrap(), "second.vdi");
    }

    #[test]
    fn test_attach_failure_reported() {
        let exec = Arc::new(ScriptedExecutor::new().fail("storageattach", "VBoxManage: error: busy"));
        let vbox = runner(&exec);
        let storage = quiet_storage();

        let report = Provisioner::new(&vbox, &storage)
            .provision(&single_disk_spec())
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stderr, "VBoxManage: error: busy");
        assert!(matches!(report.failures[0].stage, Stage::AttachDisk { .. }));
    }

    #[test]
    fn test_runner_error_after_create_is_reported() {
        let exec = Arc::new(ScriptedExecutor::new().unavailable("storagectl"));
        let vbox = runner(&exec);
        let storage = quiet_storage();

        let mut spec = single_disk_spec();
        spec.add_controller("IDE Controller", "ide", "PIIX4")
            .unwrap()
            .add_disk("data.vdi", Some(1024));

        let mut steps = Vec::new();
        let report = Provisioner::new(&vbox, &storage)
            .provision_with(&spec, &mut |stage, output| steps.push((stage.clone(), output.exit_code)))
            .unwrap();

        assert_eq!(report.status(), ProvisionStatus::PartiallyProvisioned);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.exit_code == -1));
        assert!(report.failures[0].stderr.contains("IO error"));
        assert_eq!(exec.commands(), vec!["createvm", "storagectl", "storagectl"]);
        assert_eq!(steps.len(), 3);
    }

    #[test]
    fn test_create_vm_failure_is_fatal() {
        let exec = Arc::new(ScriptedExecutor::new().fail("createvm", "VBoxManage: error: invalid os type"));
        let vbox = runner(&exec);
        let storage = MockStorage::new();

        let err = Provisioner::new(&vbox, &storage)
            .provision(&single_disk_spec())
            .unwrap_err();

        assert!(matches!(err, Error::Tool { .. }));
        assert_eq!(exec.commands(), vec!["createvm"]);
    }

    #[test]
    fn test_invalid_spec_runs_nothing() {
        let exec = Arc::new(ScriptedExecutor::new());
        let vbox = runner(&exec);
        let storage = MockStorage::new();

        let err = Provisioner::new(&vbox, &storage)
            .provision(&ProvisionSpec::new(" "))
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_settings_conflict_recovered() {
        let exec = Arc::new(
            ScriptedExecutor::new()
                .fail("createvm", CONFLICT)
                .fail("controlvm", "VBoxManage: error: machine is not running"),
        );
        let vbox = runner(&exec);

        let settings_file = Path::new("/vms/TestBox_default/TestBox_default.vbox");
        let settings_dir = Path::new("/vms/TestBox_default");
        let mut storage = MockStorage::new();
        storage
            .expect_file_exists()
            .with(eq(settings_file))
            .times(1)
            .return_const(true);
        storage
            .expect_delete_file()
            .with(eq(settings_file))
            .times(1)
            .returning(|_| Ok(()));
        storage
            .expect_dir_exists()
            .with(eq(settings_dir))
            .times(1)
            .return_const(true);
        storage
            .expect_delete_dir()
            .with(eq(settings_dir), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let delays = RefCell::new(Vec::new());
        let report = Provisioner::new(&vbox, &storage)
            .with_sleep(|d| delays.borrow_mut().push(d))
            .provision(&single_disk_spec())
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.recovered_settings_file.as_deref(), Some(settings_file));
        assert_eq!(*delays.borrow(), vec![SETTLE_DELAY]);
        assert_eq!(
            exec.commands(),
            vec![
                "createvm",
                "controlvm",
                "unregistervm",
                "createvm",
                "storagectl",
                "createhd",
                "storageattach"
            ]
        );
        assert_eq!(exec.calls()[1], vec!["controlvm", "TestBox_default", "poweroff"]);
        assert_eq!(exec.calls()[2], vec!["unregistervm", "TestBox_default", "--delete"]);
    }

    #[test]
    fn test_settings_conflict_retried_once() {
        let exec = Arc::new(
            ScriptedExecutor::new()
                .fail("createvm", CONFLICT)
                .fail("createvm", CONFLICT),
        );
        let vbox = runner(&exec);
        let storage = quiet_storage();

        let err = Provisioner::new(&vbox, &storage)
            .with_sleep(|_| {})
            .provision(&single_disk_spec())
            .unwrap_err();

        assert!(err.is_settings_conflict());
        assert_eq!(
            exec.commands(),
            vec!["createvm", "controlvm", "unregistervm", "createvm"]
        );
    }

    #[test]
    fn test_cleanup_errors_swallowed() {
        let exec = Arc::new(ScriptedExecutor::new().fail("createvm", CONFLICT));
        let vbox = runner(&exec);

        let mut storage = MockStorage::new();
        storage.expect_file_exists().return_const(true);
        storage
            .expect_delete_file()
            .returning(|_| Err(Error::Io(std::io::Error::other("locked"))));
        storage.expect_dir_exists().return_const(true);
        storage
            .expect_delete_dir()
            .returning(|_, _| Err(Error::Io(std::io::Error::other("locked"))));

        let report = Provisioner::new(&vbox, &storage)
            .with_sleep(|_| {})
            .provision(&ProvisionSpec::new("TestBox_default"))
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(exec.commands().iter().filter(|c| *c == "createvm").count(), 2);
    }

    #[test]
    fn test_destroy_machine() {
        let temp = tempfile::TempDir::new().unwrap();
        let exec = Arc::new(ScriptedExecutor::new().fail("unregistervm", "VBoxManage: error: not found"));
        let vbox = runner(&exec).from_path(temp.path());

        let disk_path = temp.path().join("TestBox_default.vdi");
        let mut storage = MockStorage::new();
        storage
            .expect_file_exists()
            .with(eq(disk_path.clone()))
            .times(1)
            .return_const(true);
        storage
            .expect_delete_file()
            .with(eq(disk_path))
            .times(1)
            .returning(|_| Ok(()));

        let delays = RefCell::new(0);
        Provisioner::new(&vbox, &storage)
            .with_sleep(|_| *delays.borrow_mut() += 1)
            .destroy_machine("TestBox_default", &["TestBox_default.vdi".to_string()])
            .unwrap();

        assert_eq!(*delays.borrow(), 1);
        assert_eq!(exec.commands(), vec!["controlvm", "unregistervm"]);
    }

    #[test]
    fn test_destroy_machine_requires_name() {
        let exec = Arc::new(ScriptedExecutor::new());
        let vbox = runner(&exec);
        let storage = MockStorage::new();

        let result = Provisioner::new(&vbox, &storage).destroy_machine("", &[]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(exec.calls().is_empty());
    }
}
