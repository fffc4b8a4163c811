//! Orchestrator tying the runner, parsers and storage together

use std::path::Path;
use std::sync::Arc;

use crate::config::{ProvisionSpec, VBoxManageConfig};
use crate::models::{Disk, InventoryLookup, VirtualMachine, VmDetail};
use crate::parse;
use crate::provision::{ProvisionReport, Provisioner, Stage};
use crate::removal::{Filter, RemovalReport, RemovedItem, Remover};
use crate::storage::{LocalStorage, Storage};
use crate::vboxmanage::{ProcessOutput, VBoxManage};
use crate::Result;

/// Entry point for inventory queries, provisioning and removal
pub struct Orchestrator {
    vbox: Arc<VBoxManage>,
    storage: Box<dyn Storage>,
}

impl Orchestrator {
    /// Orchestrator using `VBoxManage` from PATH and the current directory
    pub fn new() -> Result<Self> {
        Self::with_config(VBoxManageConfig::default())
    }

    pub fn with_config(config: VBoxManageConfig) -> Result<Self> {
        Ok(Self::from_parts(VBoxManage::new(config)?, Box::new(LocalStorage)))
    }

    /// Build from an existing runner and storage backend
    pub fn from_parts(vbox: VBoxManage, storage: Box<dyn Storage>) -> Self {
        Self {
            vbox: Arc::new(vbox),
            storage,
        }
    }

    /// The underlying command runner
    pub fn runner(&self) -> &VBoxManage {
        &self.vbox
    }

    /// Installed VBoxManage version
    pub fn version(&self) -> Result<String> {
        self.vbox.version()
    }

    /// Registered VMs. Detail and disks resolve lazily through the runner.
    pub fn vms(&self) -> Result<Vec<VirtualMachine>> {
        let text = self.vbox.vm_list_text()?;
        let lookup: Arc<dyn InventoryLookup> = self.vbox.clone();
        Ok(parse::parse_vms(&text, Some(lookup)))
    }

    /// First VM whose identifier or name (case-insensitive) matches
    pub fn find_vm(&self, name_or_uuid: &str) -> Result<Option<VirtualMachine>> {
        let filter = Filter::parse(name_or_uuid)?;
        Ok(self.vms()?.into_iter().find(|vm| filter.matches_vm(vm)))
    }

    /// Detail for a VM; `None` if it is not registered or `showvminfo` fails
    pub fn vm_detail(&self, name_or_uuid: &str) -> Result<Option<VmDetail>> {
        let Some(vm) = self.find_vm(name_or_uuid)? else {
            tracing::debug!(vm = %name_or_uuid.trim(), "VM not found");
            return Ok(None);
        };
        Ok(vm.detail().cloned())
    }

    /// Raw `showvminfo` result
    pub fn show_vm_info(&self, name_or_uuid: &str) -> Result<ProcessOutput> {
        self.vbox.show_vm_info(name_or_uuid)
    }

    /// Registered disks
    pub fn disks(&self) -> Result<Vec<Disk>> {
        self.vbox.disks()
    }

    /// Differencing leaf disks belonging to `box_filter`
    pub fn tip_disks(&self, box_filter: &str) -> Result<Vec<Disk>> {
        let disks = self.vbox.disks()?;
        Ok(parse::tip_disks(&disks, box_filter)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn provision(&self, spec: &ProvisionSpec) -> Result<ProvisionReport> {
        self.provision_with(spec, &mut |_, _| {})
    }

    pub fn provision_with(
        &self,
        spec: &ProvisionSpec,
        on_step: &mut dyn FnMut(&Stage, &ProcessOutput),
    ) -> Result<ProvisionReport> {
        Provisioner::new(&self.vbox, self.storage.as_ref()).provision_with(spec, on_step)
    }

    pub fn remove(&self, filter: &str) -> Result<RemovalReport> {
        self.remove_with(filter, &mut |_| {})
    }

    pub fn remove_with(
        &self,
        filter: &str,
        on_step: &mut dyn FnMut(&RemovedItem),
    ) -> Result<RemovalReport> {
        Remover::new(&self.vbox).remove_with(filter, on_step)
    }

    /// Power off, unregister and delete a machine and its disk files
    pub fn destroy_machine(&self, vm_name: &str, disk_files: &[String]) -> Result<()> {
        Provisioner::new(&self.vbox, self.storage.as_ref()).destroy_machine(vm_name, disk_files)
    }

    /// Working directory commands run from, if one is configured
    pub fn working_dir(&self) -> Option<&Path> {
        self.vbox.config().working_dir.as_deref()
    }
}
