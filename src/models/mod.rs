//! Data models

mod disk;
mod vm;

pub use disk::*;
pub use vm::*;

pub(crate) use disk::parse_uuid;

use std::collections::HashMap;
use uuid::Uuid;

/// Resolves the lazy links between VMs, their detail and their disks.
///
/// Implemented by the live [`VBoxManage`](crate::VBoxManage) runner and by
/// [`StaticInventory`] for fixed snapshots.
#[cfg_attr(test, mockall::automock)]
pub trait InventoryLookup {
    /// Raw `showvminfo` text for a VM, or `None` if it cannot be fetched
    fn vm_detail_text(&self, vm: &Uuid) -> Option<String>;

    /// Disk record for an identifier, or `None` if unknown
    fn disk(&self, disk: &Uuid) -> Option<Disk>;
}

/// In-memory inventory snapshot
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    details: HashMap<Uuid, String>,
    disks: Vec<Disk>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detail(mut self, vm: Uuid, text: impl Into<String>) -> Self {
        self.details.insert(vm, text.into());
        self
    }

    pub fn with_disk(mut self, disk: Disk) -> Self {
        self.disks.push(disk);
        self
    }

    pub fn with_disks(mut self, disks: impl IntoIterator<Item = Disk>) -> Self {
        self.disks.extend(disks);
        self
    }
}

impl InventoryLookup for StaticInventory {
    fn vm_detail_text(&self, vm: &Uuid) -> Option<String> {
        self.details.get(vm).cloned()
    }

    fn disk(&self, disk: &Uuid) -> Option<Disk> {
        self.disks.iter().find(|d| d.uuid.as_ref() == Some(disk)).cloned()
    }
}
