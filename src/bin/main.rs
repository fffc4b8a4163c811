//! vbox-orchestrator CLI

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tabled::{Table, Tabled};
use vbox_orchestrator::{Disk, Orchestrator, ProvisionSpec, Result, VBoxManageConfig};

#[derive(Parser)]
#[command(name = "vbox-orchestrator")]
#[command(about = "Provision and tear down VirtualBox VMs through VBoxManage")]
#[command(version)]
struct Cli {
    /// Directory every VBoxManage command runs from
    #[arg(long, global = true)]
    working_dir: Option<PathBuf>,

    /// VBoxManage executable
    #[arg(long, global = true)]
    vboxmanage: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the installed VBoxManage version
    Version,
    /// List registered VMs
    List,
    /// List registered disks
    Disks {
        /// Only differencing leaf disks belonging to this box
        #[arg(long)]
        tips: Option<String>,
    },
    /// Show a VM and its attached disks
    Show {
        /// VM name or UUID
        vm: String,
    },
    /// Create a VM with a storage controller and disk
    Create {
        /// JSON provisioning spec; overrides the other options
        #[arg(long, conflicts_with = "name")]
        spec: Option<PathBuf>,
        /// VM name
        #[arg(short, long, required_unless_present = "spec")]
        name: Option<String>,
        /// Guest OS type
        #[arg(long, default_value = "Linux")]
        os_type: String,
        /// Storage controller name
        #[arg(long, default_value = "SATA Controller")]
        controller: String,
        /// Disk file to create and attach
        #[arg(short, long)]
        disk: Option<String>,
        /// Disk size in MB
        #[arg(short, long)]
        size: Option<u64>,
    },
    /// Unregister VMs and delete disks matching a name or UUID
    Remove {
        /// VM name, UUID or disk location fragment
        filter: String,
    },
    /// Power off, unregister and delete a VM and its disk files
    Destroy {
        /// VM name
        name: String,
        /// Disk file to delete afterwards
        #[arg(short, long)]
        disk: Vec<String>,
    },
}

#[derive(Tabled)]
struct VmRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "UUID")]
    uuid: String,
}

#[derive(Tabled, Serialize)]
struct DiskRow {
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Location")]
    location: String,
}

impl From<&Disk> for DiskRow {
    fn from(disk: &Disk) -> Self {
        Self {
            uuid: disk.uuid.map(|u| u.to_string()).unwrap_or_default(),
            parent: disk
                .parent_uuid
                .map(|u| u.to_string())
                .unwrap_or_else(|| "base".to_string()),
            location: disk.location.clone(),
        }
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vbox_orchestrator=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = VBoxManageConfig::new();
    if let Some(executable) = cli.vboxmanage {
        config = config.executable(executable);
    }
    if let Some(dir) = cli.working_dir {
        config = config.working_dir(dir);
    }

    let orch = Orchestrator::with_config(config)?;
    let json = cli.json;

    match cli.command {
        Commands::Version => {
            let version = orch.version()?;
            if json {
                println!("{}", serde_json::json!({ "version": version }));
            } else {
                println!("{}", version);
            }
        }
        Commands::List => cmd_list(&orch, json)?,
        Commands::Disks { tips } => cmd_disks(&orch, tips.as_deref(), json)?,
        Commands::Show { vm } => cmd_show(&orch, &vm, json)?,
        Commands::Create {
            spec,
            name,
            os_type,
            controller,
            disk,
            size,
        } => {
            let spec = match spec {
                Some(path) => ProvisionSpec::from_json_file(path)?,
                None => {
                    let name = name.unwrap_or_default();
                    let mut spec = ProvisionSpec::new(&name).os_type(os_type);
                    let disk = disk.unwrap_or_else(|| format!("{}.vdi", name));
                    if let Some(c) = spec.add_controller(&controller, "", "") {
                        c.add_disk(&disk, size);
                    }
                    spec
                }
            };
            cmd_create(&orch, &spec, json)?;
        }
        Commands::Remove { filter } => {
            let report = orch.remove_with(&filter, &mut |item| {
                if !json {
                    let status = if item.success() { "removed" } else { "FAILED" };
                    println!("  {} {} ({})", status, item.label, item.uuid);
                }
            })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.is_empty() {
                println!("Nothing matched '{}'.", filter);
            } else {
                println!(
                    "Removed {} VM(s) and {} disk(s).",
                    report.vms.len(),
                    report.disks.len()
                );
            }
        }
        Commands::Destroy { name, disk } => {
            orch.destroy_machine(&name, &disk)?;
            if json {
                println!("{}", serde_json::json!({ "destroyed": name }));
            } else {
                println!("Destroyed {}", name);
            }
        }
    }

    Ok(())
}

fn cmd_list(orch: &Orchestrator, json: bool) -> Result<()> {
    let vms = orch.vms()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&vms)?);
        return Ok(());
    }

    if vms.is_empty() {
        println!("No VMs registered.");
        return Ok(());
    }

    let rows: Vec<VmRow> = vms
        .iter()
        .map(|vm| VmRow {
            name: vm.name.clone(),
            uuid: vm.uuid.map(|u| u.to_string()).unwrap_or_default(),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}

fn cmd_disks(orch: &Orchestrator, tips: Option<&str>, json: bool) -> Result<()> {
    let disks = match tips {
        Some(box_filter) => orch.tip_disks(box_filter)?,
        None => orch.disks()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&disks)?);
        return Ok(());
    }

    if disks.is_empty() {
        println!("No disks found.");
        return Ok(());
    }

    let rows: Vec<DiskRow> = disks.iter().map(DiskRow::from).collect();
    println!("{}", Table::new(rows));
    Ok(())
}

fn cmd_show(orch: &Orchestrator, vm: &str, json: bool) -> Result<()> {
    let Some(detail) = orch.vm_detail(vm)? else {
        println!("VM not found: {}", vm);
        return Ok(());
    };

    let disks: Vec<DiskRow> = detail.disks().iter().map(DiskRow::from).collect();

    if json {
        let value = serde_json::json!({
            "name": detail.vm_name(),
            "uuid": detail.vm_uuid(),
            "disk_ids": detail.disk_ids(),
            "disks": disks,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Name:  {}", detail.vm_name());
    if let Some(uuid) = detail.vm_uuid() {
        println!("UUID:  {}", uuid);
    }
    println!("Disks: {}", detail.disk_ids().len());
    if !disks.is_empty() {
        println!("{}", Table::new(disks));
    }
    Ok(())
}

fn cmd_create(orch: &Orchestrator, spec: &ProvisionSpec, json: bool) -> Result<()> {
    if !json {
        println!("Creating VM '{}' ({})...", spec.vm_name, spec.os_type);
    }

    let report = orch.provision_with(spec, &mut |stage, output| {
        if !json {
            let status = if output.success() { "ok" } else { "FAILED" };
            println!("  {:<48} {}", stage.to_string(), status);
        }
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if let Some(file) = &report.recovered_settings_file {
        println!("Removed stale settings file {}", file.display());
    }
    for failure in &report.failures {
        println!("  {}: exit {} {}", failure.stage, failure.exit_code, failure.stderr);
    }
    println!("{}: {}", report.vm_name, report.status());
    Ok(())
}
