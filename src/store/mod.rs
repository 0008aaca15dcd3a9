mod hooks;
mod repository;

pub use repository::Repository;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Owns the base directory and hands out [`Repository`] handles, creating
/// bare repos on first use.
pub struct RepoStore {
    base: PathBuf,
}

impl RepoStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The absolute on-disk directory for a repo named by its relative path
    /// (without the `.git` suffix, which this appends).
    pub fn disk_path(&self, rel: &Path) -> PathBuf {
        let mut path = self.base.join(rel);

        if let Some(name) = path.file_name() {
            let name = format!("{}.git", name.to_string_lossy());
            path.set_file_name(name);
        }

        path
    }

    /// Open the repo at `rel`, creating it bare if it does not exist, and
    /// refresh its hook scripts. A legacy directory without the `.git`
    /// suffix is renamed into place first. Idempotent.
    pub fn ensure(&self, rel: &Path) -> Result<Repository> {
        let disk = self.disk_path(rel);

        let inner = if disk.is_dir() {
            git2::Repository::open_bare(&disk)?
        } else {
            let legacy = self.base.join(rel);

            if legacy.is_dir() {
                fs::rename(&legacy, &disk)?;
                git2::Repository::open_bare(&disk)?
            } else {
                if let Some(parent) = disk.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut opts = git2::RepositoryInitOptions::new();
                opts.bare(true);
                git2::Repository::init_opts(&disk, &opts)?
            }
        };

        hooks::install(&disk, &std::env::current_exe()?)?;

        Ok(Repository::new(inner))
    }
}
