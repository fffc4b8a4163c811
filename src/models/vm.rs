//! VM model

use std::cell::OnceCell;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::{Disk, InventoryLookup};
use crate::parse;

/// A VM as reported by `VBoxManage list vms`
#[derive(Clone, Serialize)]
pub struct VirtualMachine {
    /// VM name; empty if the listing line was malformed
    pub name: String,
    /// VM identifier; `None` if absent or unparsable
    pub uuid: Option<Uuid>,
    #[serde(skip)]
    lookup: Option<Arc<dyn InventoryLookup>>,
    /// Filled on the first successful resolution only, so a lookup that
    /// returns nothing is retried on the next access.
    #[serde(skip)]
    detail: OnceCell<VmDetail>,
}

impl VirtualMachine {
    pub fn new(name: impl Into<String>, uuid: Option<Uuid>) -> Self {
        Self {
            name: name.into(),
            uuid,
            lookup: None,
            detail: OnceCell::new(),
        }
    }

    /// Attach the lookup used to resolve detail and disks lazily
    pub fn with_lookup(mut self, lookup: Arc<dyn InventoryLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Detail record, fetched through the lookup on first use
    pub fn detail(&self) -> Option<&VmDetail> {
        if let Some(detail) = self.detail.get() {
            return Some(detail);
        }

        let uuid = self.uuid?;
        let lookup = self.lookup.as_ref()?;
        let text = lookup.vm_detail_text(&uuid)?;
        if text.trim().is_empty() {
            return None;
        }

        let detail = parse::parse_vm_detail(self, &text, Some(Arc::clone(lookup)));
        Some(self.detail.get_or_init(|| detail))
    }

    /// Whether detail has already been resolved
    pub fn is_detail_resolved(&self) -> bool {
        self.detail.get().is_some()
    }
}

impl fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .field("detail", &self.detail.get())
            .finish()
    }
}

/// Detail for a single VM as reported by `VBoxManage showvminfo`
#[derive(Clone)]
pub struct VmDetail {
    vm_name: String,
    vm_uuid: Option<Uuid>,
    disk_ids: Vec<Uuid>,
    lookup: Option<Arc<dyn InventoryLookup>>,
    disks: OnceCell<Vec<Disk>>,
}

impl VmDetail {
    /// Detail always belongs to a VM; the owner is kept by name and identifier only.
    pub fn new(
        vm: &VirtualMachine,
        disk_ids: Vec<Uuid>,
        lookup: Option<Arc<dyn InventoryLookup>>,
    ) -> Self {
        Self {
            vm_name: vm.name.clone(),
            vm_uuid: vm.uuid,
            disk_ids,
            lookup,
            disks: OnceCell::new(),
        }
    }

    pub fn vm_name(&self) -> &str {
        &self.vm_name
    }

    pub fn vm_uuid(&self) -> Option<Uuid> {
        self.vm_uuid
    }

    /// Attached disk identifiers in the order they were listed
    pub fn disk_ids(&self) -> &[Uuid] {
        &self.disk_ids
    }

    /// Attached disks, resolved once; identifiers the lookup cannot find are dropped
    pub fn disks(&self) -> &[Disk] {
        if let Some(disks) = self.disks.get() {
            return disks;
        }

        match &self.lookup {
            Some(lookup) if !self.disk_ids.is_empty() => self.disks.get_or_init(|| {
                self.disk_ids
                    .iter()
                    .filter_map(|id| lookup.disk(id))
                    .collect()
            }),
            _ => &[],
        }
    }
}

impl fmt::Debug for VmDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmDetail")
            .field("vm_name", &self.vm_name)
            .field("vm_uuid", &self.vm_uuid)
            .field("disk_ids", &self.disk_ids)
            .field("disks", &self.disks.get())
            .finish()
    }
}
