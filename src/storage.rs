//! Filesystem access used during cleanup

use std::path::Path;

use crate::Result;

#[cfg_attr(test, mockall::automock)]
pub trait Storage {
    fn file_exists(&self, path: &Path) -> bool;
    fn delete_file(&self, path: &Path) -> Result<()>;
    fn dir_exists(&self, path: &Path) -> bool;
    fn delete_dir(&self, path: &Path, recursive: bool) -> Result<()>;
}

/// Local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl Storage for LocalStorage {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn delete_dir(&self, path: &Path, recursive: bool) -> Result<()> {
        if recursive {
            std::fs::remove_dir_all(path)?;
        } else {
            std::fs::remove_dir(path)?;
        }
        Ok(())
    }
}
