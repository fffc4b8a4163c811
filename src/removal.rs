//! Filter-based removal of VMs and disks

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::models::{Disk, VirtualMachine};
use crate::parse;
use crate::vboxmanage::{ProcessOutput, VBoxManage};
use crate::{Error, Result};

/// What a removal request matches against
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Filter {
    /// Exact identifier match for both VMs and disks
    Id(Uuid),
    /// Case-insensitive VM name, or a substring of a disk location
    Name(String),
}

impl Filter {
    /// Interpret a user-supplied filter. The nil identifier is kept as a name
    /// since no VM or disk carries it.
    pub fn parse(filter: &str) -> Result<Self> {
        let filter = filter.trim();
        if filter.is_empty() {
            return Err(Error::blank("filter"));
        }

        match Uuid::parse_str(filter) {
            Ok(id) if !id.is_nil() => Ok(Filter::Id(id)),
            _ => Ok(Filter::Name(filter.to_string())),
        }
    }

    pub fn matches_vm(&self, vm: &VirtualMachine) -> bool {
        match self {
            Filter::Id(id) => vm.uuid.as_ref() == Some(id),
            Filter::Name(name) => vm.name.to_lowercase() == name.to_lowercase(),
        }
    }

    pub fn matches_disk(&self, disk: &Disk) -> bool {
        match self {
            Filter::Id(id) => disk.uuid.as_ref() == Some(id),
            Filter::Name(fragment) => disk.location.contains(fragment.as_str()),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Id(id) => write!(f, "{}", id),
            Filter::Name(name) => write!(f, "{}", name),
        }
    }
}

/// A VM or disk a removal command was issued for
#[derive(Debug, Clone, Serialize)]
pub struct RemovedItem {
    pub uuid: Uuid,
    /// VM name or disk location
    pub label: String,
    pub output: ProcessOutput,
}

impl RemovedItem {
    pub fn success(&self) -> bool {
        self.output.success()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovalReport {
    pub filter: Filter,
    pub vms: Vec<RemovedItem>,
    pub disks: Vec<RemovedItem>,
}

impl RemovalReport {
    pub fn is_empty(&self) -> bool {
        self.vms.is_empty() && self.disks.is_empty()
    }

    /// Items whose removal command exited non-zero
    pub fn failures(&self) -> impl Iterator<Item = &RemovedItem> {
        self.vms.iter().chain(&self.disks).filter(|item| !item.success())
    }
}

pub struct Remover<'a> {
    vbox: &'a VBoxManage,
}

impl<'a> Remover<'a> {
    pub fn new(vbox: &'a VBoxManage) -> Self {
        Self { vbox }
    }

    pub fn remove(&self, filter: &str) -> Result<RemovalReport> {
        self.remove_with(filter, &mut |_| {})
    }

    /// Unregister every matching VM, then close and delete every matching
    /// disk. Both passes always run; matches without an identifier are
    /// skipped.
    pub fn remove_with(
        &self,
        filter: &str,
        on_step: &mut dyn FnMut(&RemovedItem),
    ) -> Result<RemovalReport> {
        let filter = Filter::parse(filter)?;
        tracing::info!(filter = %filter, "Removing matching VMs and disks");

        let mut report = RemovalReport {
            filter: filter.clone(),
            vms: Vec::new(),
            disks: Vec::new(),
        };

        let vms = parse::parse_vms(&self.vbox.vm_list_text()?, None);
        for vm in vms.iter().filter(|vm| filter.matches_vm(vm)) {
            let Some(uuid) = vm.uuid else {
                tracing::debug!(vm = %vm.name, "Matched VM has no identifier, skipping");
                continue;
            };

            let output = self.vbox.unregister_vm(&uuid.to_string())?;
            if !output.success() {
                tracing::warn!(vm = %vm.name, uuid = %uuid, stderr = %output.stderr_text(), "unregistervm failed");
            }

            let item = RemovedItem {
                uuid,
                label: vm.name.clone(),
                output,
            };
            on_step(&item);
            report.vms.push(item);
        }

        let disks = self.vbox.disks()?;
        for disk in disks.iter().filter(|d| filter.matches_disk(d)) {
            let Some(uuid) = disk.uuid else {
                tracing::debug!(location = %disk.location, "Matched disk has no identifier, skipping");
                continue;
            };

            let output = self.vbox.close_medium(&uuid.to_string())?;
            if !output.success() {
                tracing::warn!(disk = %uuid, location = %disk.location, stderr = %output.stderr_text(), "closemedium failed");
            }

            let item = RemovedItem {
                uuid,
                label: disk.location.clone(),
                output,
            };
            on_step(&item);
            report.disks.push(item);
        }

        tracing::info!(filter = %filter, vms = report.vms.len(), disks = report.disks.len(), "Removal finished");
        Ok(report)
    }
}
