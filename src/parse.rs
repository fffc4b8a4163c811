//! Parsers for VBoxManage text output
//!
//! Every parser is a pure function over the captured text: calling it twice
//! on the same input yields the same records. Text that does not match the
//! expected shape never raises; the affected fields are simply left empty.

use std::collections::HashSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::models::{parse_uuid, Disk, InventoryLookup, VirtualMachine, VmDetail};

lazy_static! {
    /// `"<name>" {<uuid>}`
    static ref VM_LINE: Regex = Regex::new(r#"^"(.*)"\s+\{(.*)\}$"#).unwrap();

    /// `<bus> (<port>, <device>): <path> (UUID: <uuid>)`
    static ref ATTACHED_DISK: Regex = Regex::new(
        r"(?im)^.+?\([0-9]+[, \t]+[0-9]+\):[ \t]*.*UUID:[ \t]+([a-z0-9\-]+)\)[ \t\r]*$"
    )
    .unwrap();

    static ref DISK_UUID: Regex = Regex::new(r"(?im)^UUID:[ \t]*(.*)$").unwrap();
    static ref DISK_PARENT: Regex = Regex::new(r"(?im)^Parent UUID:[ \t]*(.*)$").unwrap();
    static ref DISK_LOCATION: Regex = Regex::new(r"(?im)^Location:[ \t]*(.*)$").unwrap();

    /// `<tool>: error: ... Machine settings file '<path>' already exists`
    static ref SETTINGS_CONFLICT: Regex = Regex::new(
        r"(?im)^.*?:[ \t]*error:.*?Machine[ \t]+settings[ \t]+file[ \t]+'?(.+?)'?[ \t]+already[ \t]+exists[ \t\r]*$"
    )
    .unwrap();
}

/// Parse `list vms` output, one VM per non-blank line, in input order
pub fn parse_vms(text: &str, lookup: Option<Arc<dyn InventoryLookup>>) -> Vec<VirtualMachine> {
    text.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let vm = parse_vm_line(line);
            match &lookup {
                Some(lookup) => vm.with_lookup(Arc::clone(lookup)),
                None => vm,
            }
        })
        .collect()
}

/// Parse a single `list vms` line; a malformed line gives an empty name and no id
pub fn parse_vm_line(line: &str) -> VirtualMachine {
    match VM_LINE.captures(line.trim()) {
        Some(caps) => {
            let name = caps.get(1).map_or("", |m| m.as_str()).trim();
            let uuid = caps.get(2).and_then(|m| parse_uuid(m.as_str()));
            VirtualMachine::new(name, uuid)
        }
        None => VirtualMachine::new("", None),
    }
}

/// Collect attached disk identifiers from `showvminfo` text.
///
/// The scan stops at the first attachment whose identifier does not parse
/// (or is nil); identifiers after it are not collected.
pub fn parse_attached_disk_ids(text: &str) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for caps in ATTACHED_DISK.captures_iter(text) {
        match caps.get(1).and_then(|m| parse_uuid(m.as_str())) {
            Some(id) if !id.is_nil() => ids.push(id),
            _ => break,
        }
    }
    ids
}

/// Build the detail record for `vm` from its `showvminfo` text
pub fn parse_vm_detail(
    vm: &VirtualMachine,
    text: &str,
    lookup: Option<Arc<dyn InventoryLookup>>,
) -> VmDetail {
    VmDetail::new(vm, parse_attached_disk_ids(text), lookup)
}

/// Parse `list hdds` output into one disk per block
pub fn parse_disks(text: &str) -> Vec<Disk> {
    disk_blocks(text)
        .iter()
        .map(|block| parse_disk_block(block))
        .collect()
}

/// Parse one `list hdds` block; missing fields are left empty
pub fn parse_disk_block(block: &str) -> Disk {
    let field = |re: &Regex| {
        re.captures(block)
            .and_then(|caps| caps.get(1))
            .map_or("", |m| m.as_str().trim())
    };

    Disk::from_fields(
        field(&DISK_UUID),
        field(&DISK_PARENT),
        field(&DISK_LOCATION),
    )
}

/// Split `list hdds` output into blocks. A block opens on a `UUID:` line and
/// closes at the next blank line or the next `UUID:` line.
fn disk_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        if starts_block(line) {
            if let Some(block) = current.take() {
                blocks.push(block.join("\n"));
            }
            current = Some(vec![line]);
        } else if line.trim().is_empty() {
            if let Some(block) = current.take() {
                blocks.push(block.join("\n"));
            }
        } else if let Some(block) = current.as_mut() {
            block.push(line);
        }
    }

    if let Some(block) = current {
        blocks.push(block.join("\n"));
    }

    blocks
}

fn starts_block(line: &str) -> bool {
    line.get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("UUID:"))
}

/// Path of the stale settings file named by a create-VM error line, if any
pub fn settings_file_in(line: &str) -> Option<String> {
    SETTINGS_CONFLICT
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|path| !path.is_empty())
}

/// First stale settings file path named across `lines`
pub fn existing_settings_file<I, S>(lines: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .find_map(|line| settings_file_in(line.as_ref()))
}

/// Tip (leaf differencing) disks belonging to a box.
///
/// A disk qualifies when it has a parent, no other listed disk names it as
/// a parent, and its location contains `box_filter` followed by one or more
/// underscore-led digit groups (`_1`, `__1_2`) or a path separator. An
/// empty filter matches every location.
pub fn tip_disks<'a>(disks: &'a [Disk], box_filter: &str) -> Vec<&'a Disk> {
    let filter = box_filter.trim();
    let location_re = if filter.is_empty() {
        None
    } else {
        match Regex::new(&format!(
            r"(?i){}(?:(?:_+[0-9]+)+|[\\/]+)",
            regex::escape(filter)
        )) {
            Ok(re) => Some(re),
            Err(_) => return Vec::new(),
        }
    };

    let parents: HashSet<Uuid> = disks.iter().filter_map(|d| d.parent_uuid).collect();

    disks
        .iter()
        .filter(|d| d.has_parent())
        .filter(|d| d.uuid.is_some_and(|id| !parents.contains(&id)))
        .filter(|d| {
            location_re
                .as_ref()
                .map_or(true, |re| re.is_match(&d.location))
        })
        .collect()
}
