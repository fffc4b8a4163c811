//! VirtualBox VM Orchestrator
//!
//! A Rust library for provisioning and tearing down VirtualBox VMs by
//! driving the `VBoxManage` command-line tool, and for reading the VM and
//! disk inventory back from its text output.
//!
//! # Key Features
//!
//! - **Staged provisioning** - VM, storage controllers, disks and attachments,
//!   with per-stage failure reporting
//! - **Conflict recovery** - a stale machine settings file is cleaned up and
//!   creation retried once
//! - **Lazy inventory** - VM detail and attached disks are fetched on first use
//! - **Filter removal** - unregister VMs and close disks by name or identifier
//!
//! # Example
//!
//! ```no_run
//! use vbox_orchestrator::{Orchestrator, ProvisionSpec, VBoxManageConfig};
//!
//! let orchestrator = Orchestrator::with_config(
//!     VBoxManageConfig::new().working_dir("/var/lib/vms"),
//! )?;
//!
//! let mut spec = ProvisionSpec::new("TestBox_default");
//! spec.add_controller("SATA Controller", "sata", "IntelAHCI")
//!     .and_then(|c| c.add_disk("TestBox_default.vdi", Some(32768)));
//!
//! let report = orchestrator.provision(&spec)?;
//! println!("{}: {}", report.vm_name, report.status());
//!
//! for vm in orchestrator.vms()? {
//!     let disks = vm.detail().map(|d| d.disks().len()).unwrap_or(0);
//!     println!("{} ({} disks)", vm.name, disks);
//! }
//!
//! orchestrator.remove("TestBox_default")?;
//! # Ok::<(), vbox_orchestrator::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod parse;
pub mod provision;
pub mod removal;
pub mod storage;
pub mod vboxmanage;

pub use config::{ControllerSpec, DiskSpec, ProvisionSpec, VBoxManageConfig};
pub use error::{Error, Result};
pub use models::{Disk, InventoryLookup, StaticInventory, VirtualMachine, VmDetail};
pub use orchestrator::Orchestrator;
pub use provision::{ProvisionReport, ProvisionStatus, Stage, StageFailure};
pub use removal::{Filter, RemovalReport, RemovedItem};
pub use storage::{LocalStorage, Storage};
pub use vboxmanage::{CommandExecutor, ProcessExecutor, ProcessOutput, VBoxManage};
