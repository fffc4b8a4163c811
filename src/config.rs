//! Runner configuration and provisioning specs with builder pattern

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default VBoxManage executable, resolved through PATH
#[cfg(target_os = "windows")]
pub const DEFAULT_EXECUTABLE: &str = "VBoxManage.exe";
#[cfg(not(target_os = "windows"))]
pub const DEFAULT_EXECUTABLE: &str = "VBoxManage";

/// How to invoke VBoxManage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VBoxManageConfig {
    pub executable: String,
    /// Directory every command runs from; `None` inherits the current directory
    pub working_dir: Option<PathBuf>,
}

impl Default for VBoxManageConfig {
    fn default() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            working_dir: None,
        }
    }
}

impl VBoxManageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.executable.trim().is_empty() {
            return Err(crate::Error::Config("executable cannot be empty".into()));
        }
        Ok(())
    }
}

/// What to create for one VM: the VM, its controllers and their disks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionSpec {
    pub vm_name: String,
    #[serde(default = "default_os_type")]
    pub os_type: String,
    #[serde(default)]
    pub controllers: Vec<ControllerSpec>,
}

/// Storage controller to add to the VM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSpec {
    #[serde(default = "default_controller_name")]
    pub name: String,
    /// `--add` bus type (sata, ide, scsi, ...)
    #[serde(default = "default_bus_type")]
    pub bus_type: String,
    /// `--controller` chipset model
    #[serde(default = "default_controller_model")]
    pub controller_model: String,
    #[serde(default)]
    pub disks: Vec<DiskSpec>,
}

/// Disk to create and attach to a controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSpec {
    #[serde(default = "default_disk_file")]
    pub file_name: String,
    #[serde(default = "default_disk_size")]
    pub size_mb: u64,
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub device: u32,
}

fn default_os_type() -> String {
    "Linux".to_string()
}

fn default_controller_name() -> String {
    "default".to_string()
}

fn default_bus_type() -> String {
    "sata".to_string()
}

fn default_controller_model() -> String {
    "IntelAHCI".to_string()
}

fn default_disk_file() -> String {
    "default.vdi".to_string()
}

fn default_disk_size() -> u64 {
    32768
}

impl Default for ControllerSpec {
    fn default() -> Self {
        Self {
            name: default_controller_name(),
            bus_type: default_bus_type(),
            controller_model: default_controller_model(),
            disks: Vec::new(),
        }
    }
}

impl Default for DiskSpec {
    fn default() -> Self {
        Self {
            file_name: default_disk_file(),
            size_mb: default_disk_size(),
            port: 0,
            device: 0,
        }
    }
}

impl ProvisionSpec {
    pub fn new(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            os_type: default_os_type(),
            controllers: Vec::new(),
        }
    }

    pub fn os_type(mut self, os_type: impl Into<String>) -> Self {
        self.os_type = os_type.into();
        self
    }

    /// Load a spec from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let spec: Self = serde_json::from_str(&text)?;
        Ok(spec)
    }

    /// Add a controller. Blank arguments keep the defaults.
    ///
    /// Returns `None` without adding anything when a controller with the same
    /// name (case-insensitive) already exists.
    pub fn add_controller(
        &mut self,
        name: &str,
        bus_type: &str,
        controller_model: &str,
    ) -> Option<&mut ControllerSpec> {
        let mut controller = ControllerSpec::default();
        if !name.trim().is_empty() {
            controller.name = name.to_string();
        }
        if !bus_type.trim().is_empty() {
            controller.bus_type = bus_type.to_string();
        }
        if !controller_model.trim().is_empty() {
            controller.controller_model = controller_model.to_string();
        }

        if self
            .controllers
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&controller.name))
        {
            return None;
        }

        self.controllers.push(controller);
        self.controllers.last_mut()
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.vm_name.trim().is_empty() {
            return Err(crate::Error::blank("vm name"));
        }
        if self.os_type.trim().is_empty() {
            return Err(crate::Error::blank("os type"));
        }
        for (i, controller) in self.controllers.iter().enumerate() {
            if controller.name.trim().is_empty() {
                return Err(crate::Error::blank("controller name"));
            }
            if self.controllers[..i]
                .iter()
                .any(|c| c.name.trim().eq_ignore_ascii_case(controller.name.trim()))
            {
                return Err(crate::Error::InvalidArgument(format!(
                    "duplicate controller name '{}'",
                    controller.name
                )));
            }

            for (j, disk) in controller.disks.iter().enumerate() {
                if disk.file_name.trim().is_empty() {
                    return Err(crate::Error::blank("disk file name"));
                }
                if controller.disks[..j]
                    .iter()
                    .any(|d| d.file_name.trim().eq_ignore_ascii_case(disk.file_name.trim()))
                {
                    return Err(crate::Error::InvalidArgument(format!(
                        "duplicate disk '{}' on controller '{}'",
                        disk.file_name, controller.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl ControllerSpec {
    /// Add a disk. A blank file name or a zero size keeps the default.
    ///
    /// Returns `None` without adding anything when a disk with the same file
    /// name (case-insensitive) is already on this controller.
    pub fn add_disk(&mut self, file_name: &str, size_mb: Option<u64>) -> Option<&mut DiskSpec> {
        let mut disk = DiskSpec::default();
        if !file_name.trim().is_empty() {
            disk.file_name = file_name.to_string();
        }
        if let Some(size) = size_mb.filter(|s| *s > 0) {
            disk.size_mb = size;
        }

        if self
            .disks
            .iter()
            .any(|d| d.file_name.eq_ignore_ascii_case(&disk.file_name))
        {
            return None;
        }

        self.disks.push(disk);
        self.disks.last_mut()
    }
}

impl DiskSpec {
    pub fn at(&mut self, port: u32, device: u32) -> &mut Self {
        self.port = port;
        self.device = device;
        self
    }
}
