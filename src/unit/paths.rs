//! Where unit fragments live on the host.

use crate::constants::{
    MACHINES_DIR, MOUNT_SUFFIX, NSPAWN_DIR, NSPAWN_SERVICE_PREFIX, NSPAWN_SUFFIX, OVERRIDE_DROPIN,
    SYSTEM_UNIT_DIR,
};
use std::path::{Path, PathBuf};

/// Directories the engine reads and writes fragments in.
///
/// Defaults to the host conventions. [`UnitPaths::under`] re-roots every
/// directory below another directory, which is how tests run the engine
/// against a scratch tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPaths {
    /// Container settings files (`<fqdn>.nspawn`).
    pub nspawn_dir: PathBuf,
    /// Unit files and drop-in directories.
    pub system_dir: PathBuf,
    /// Parent of default host mount points.
    pub machines_dir: PathBuf,
}

impl Default for UnitPaths {
    fn default() -> Self {
        Self {
            nspawn_dir: PathBuf::from(NSPAWN_DIR),
            system_dir: PathBuf::from(SYSTEM_UNIT_DIR),
            machines_dir: PathBuf::from(MACHINES_DIR),
        }
    }
}

impl UnitPaths {
    /// Host conventions, re-rooted below `root`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let rebase = |abs: &str| root.join(abs.trim_start_matches('/'));
        Self {
            nspawn_dir: rebase(NSPAWN_DIR),
            system_dir: rebase(SYSTEM_UNIT_DIR),
            machines_dir: rebase(MACHINES_DIR),
        }
    }

    /// `/etc/systemd/nspawn/<fqdn>.nspawn`
    pub fn nspawn_file(&self, fqdn: &str) -> PathBuf {
        self.nspawn_dir.join(format!("{}{}", fqdn, NSPAWN_SUFFIX))
    }

    /// `/etc/systemd/system/systemd-nspawn@<fqdn>.service.d/<drop-in>`
    pub fn override_file(&self, fqdn: &str) -> PathBuf {
        self.system_dir
            .join(format!("{}{}.service.d", NSPAWN_SERVICE_PREFIX, fqdn))
            .join(OVERRIDE_DROPIN)
    }

    /// `/etc/systemd/system/<unit>.mount`, given the escaped unit stem.
    pub fn mount_file(&self, unit_name: &str) -> PathBuf {
        debug_assert!(unit_name.ends_with(MOUNT_SUFFIX));
        self.system_dir.join(unit_name)
    }

    /// Default host mount point of volume `name`.
    pub fn default_mount_point(&self, name: &str) -> PathBuf {
        self.machines_dir.join(name)
    }
}
