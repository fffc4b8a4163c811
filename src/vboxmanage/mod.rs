//! VBoxManage command runner

mod commands;
mod executor;

#[cfg(test)]
pub(crate) mod fake;

pub use commands::VBoxManage;
pub use executor::{CommandExecutor, ProcessExecutor, ProcessOutput};
