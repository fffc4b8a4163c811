//! Disk model

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// A virtual disk image registered with VirtualBox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Disk identifier
    pub uuid: Option<Uuid>,
    /// Parent disk identifier; `None` for a base disk
    pub parent_uuid: Option<Uuid>,
    /// Image file path exactly as reported by VBoxManage
    pub location: String,
}

impl Disk {
    pub fn new(uuid: Option<Uuid>, parent_uuid: Option<Uuid>, location: impl Into<String>) -> Self {
        Self {
            uuid,
            parent_uuid,
            location: location.into(),
        }
    }

    /// Build a disk from the raw field text of a `list hdds` block.
    ///
    /// Unparsable identifiers (including the `base` sentinel used for the
    /// parent of a root disk) become `None`.
    pub fn from_fields(uuid: &str, parent_uuid: &str, location: &str) -> Self {
        Self {
            uuid: parse_uuid(uuid),
            parent_uuid: parse_uuid(parent_uuid),
            location: location.trim().to_string(),
        }
    }

    pub fn is_base(&self) -> bool {
        self.parent_uuid.is_none()
    }

    pub fn has_parent(&self) -> bool {
        self.parent_uuid.is_some()
    }

    pub fn location_path(&self) -> &Path {
        Path::new(&self.location)
    }
}

/// Lenient identifier parse; anything unrecognisable is `None`
pub(crate) fn parse_uuid(s: &str) -> Option<Uuid> {
    Uuid::parse_str(s.trim()).ok()
}
