//! # Mount Coordinator
//!
//! A machine volume is a block device mounted on the host by a mount unit and
//! bind-mounted into the container. One [`MountSpec`] yields three fragments:
//!
//! ```text
//!   MountSpec { name: data, device: /dev/vg0/data, target: /srv }
//!        │
//!        ├─▶ /etc/systemd/system/var-lib-machines-data.mount
//!        │     [Unit]  Description, After=blockdev@dev-vg0-data.target
//!        │     [Mount] What=/dev/vg0/data  Where=/var/lib/machines/data
//!        │             Type=…  Options=…
//!        │
//!        ├─▶ <fqdn>.nspawn
//!        │     [Files] Bind=/var/lib/machines/data:/srv:idmap
//!        │
//!        └─▶ systemd-nspawn@<fqdn>.service.d/…
//!              [Unit]  RequiresMountsFor=/var/lib/machines/data
//! ```
//!
//! ## Normalization
//!
//! [`MountSpec::normalize`] fills in defaults and folds the free-form options
//! into the derived unit options. It runs once; later calls are no-ops, so the
//! derived fragments are identical however often a caller normalizes.
//!
//! ## Ordering
//!
//! A mount unit must not be rewritten while the machine still has it bound.
//! Callers stop the machine first, then [`unmount`] each volume, then let the
//! reload and the next start bring the new unit in.

use crate::bus::MachineBus;
use crate::constants::{AUTO_FS_OPTIONS, MOUNT_SUFFIX};
use crate::error::{Error, Result};
use crate::unit::{UnitChange, UnitOption, UnitPaths, ensure_unit, escape_path, write_unit};
use crate::wait::{Job, WaitPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Span, debug};

// =============================================================================
// MountSpec
// =============================================================================

/// One volume of a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountSpec {
    /// Logical volume name; also names the default host mount point.
    pub name: String,

    /// Block device to mount.
    pub device: String,

    /// Bind target inside the container.
    pub target: String,

    /// Host mount point. Defaults to `<machines dir>/<name>`.
    #[serde(alias = "mountpoint", alias = "MountPoint")]
    pub mount_point: String,

    /// Filesystem type, if not auto-detected.
    #[serde(alias = "FS", alias = "type")]
    pub fs: String,

    /// Create and grow the filesystem on demand.
    #[serde(alias = "autofs", alias = "AutoFs")]
    pub auto_fs: bool,

    /// Comma-separated mount options.
    pub options: String,

    /// Extra options for the mount unit.
    #[serde(alias = "mountoptions", alias = "MountOptions")]
    pub mount_options: Vec<UnitOption>,

    #[serde(skip)]
    pub(crate) normalized: bool,
}

impl MountSpec {
    /// Creates an unnormalized volume with the required fields set.
    pub fn new(
        name: impl Into<String>,
        device: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            device: device.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    /// Checks the fields that have no default.
    pub fn validate(&self) -> Result<()> {
        let missing = [
            ("name", &self.name),
            ("device", &self.device),
            ("target", &self.target),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty());

        if let Some((field, _)) = missing {
            return Err(Error::InvalidConfig(format!(
                "mount '{}' has no {}",
                self.name, field
            )));
        }
        for opt in &self.mount_options {
            opt.validate()?;
        }
        Ok(())
    }

    /// Fills in defaults and derives mount unit options, once.
    pub fn normalize(&mut self, paths: &UnitPaths) {
        if self.normalized {
            return;
        }
        self.normalized = true;

        if self.mount_point.is_empty() {
            self.mount_point = paths.default_mount_point(&self.name).display().to_string();
        }
        if !self.fs.is_empty() {
            self.mount_options
                .push(UnitOption::new("Mount", "Type", self.fs.as_str()));
        }
        if self.auto_fs {
            if !self.options.is_empty() {
                self.options.push(',');
            }
            self.options.push_str(AUTO_FS_OPTIONS);
        }
        if !self.options.is_empty() {
            match self
                .mount_options
                .iter_mut()
                .find(|o| o.section == "Mount" && o.name == "Options")
            {
                Some(existing) => {
                    existing.value.push(',');
                    existing.value.push_str(&self.options);
                }
                None => self
                    .mount_options
                    .push(UnitOption::new("Mount", "Options", self.options.as_str())),
            }
        }
    }

    /// Returns true once [`normalize`](Self::normalize) has run.
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// Mount unit name, derived from the host mount point.
    pub fn unit_name(&self) -> String {
        format!("{}{}", escape_path(&self.mount_point), MOUNT_SUFFIX)
    }

    /// Full option set of the host mount unit.
    pub fn unit_options(&self) -> Vec<UnitOption> {
        let mut options = vec![
            UnitOption::new("Unit", "Description", format!("Machine volume {}", self.name)),
            UnitOption::new(
                "Unit",
                "After",
                format!("blockdev@{}.target", escape_path(&self.device)),
            ),
            UnitOption::new("Mount", "What", self.device.as_str()),
            UnitOption::new("Mount", "Where", self.mount_point.as_str()),
        ];
        options.extend(self.mount_options.iter().cloned());
        options
    }

    /// Container bind of the host mount point with identity-mapped ownership.
    pub fn bind_option(&self) -> UnitOption {
        UnitOption::new(
            "Files",
            "Bind",
            format!("{}:{}:idmap", self.mount_point, self.target),
        )
    }

    /// Service dependency making the container wait for the mount.
    pub fn override_option(&self) -> UnitOption {
        UnitOption::new("Unit", "RequiresMountsFor", self.mount_point.as_str())
    }

    /// Converges the mount unit file.
    pub fn ensure(&self, paths: &UnitPaths, log: Option<&Span>) -> Result<UnitChange> {
        ensure_unit(&paths.mount_file(&self.unit_name()), &self.unit_options(), log)
    }

    /// Deletes the mount unit file, if present.
    pub fn remove(&self, paths: &UnitPaths) -> Result<UnitChange> {
        write_unit(&paths.mount_file(&self.unit_name()), &[])
    }
}

// =============================================================================
// Batch Operations
// =============================================================================

/// Converges every mount unit; true if any file changed.
///
/// Every unit is reconciled even after an earlier one changed.
pub fn ensure_mounts(mounts: &[MountSpec], paths: &UnitPaths, log: Option<&Span>) -> Result<bool> {
    let mut changed = false;
    for mount in mounts {
        changed |= mount.ensure(paths, log)?.is_changed();
    }
    Ok(changed)
}

/// Deletes every mount unit file; true if any file was deleted.
pub fn remove_mounts(mounts: &[MountSpec], paths: &UnitPaths) -> Result<bool> {
    let mut changed = false;
    for mount in mounts {
        let change = mount.remove(paths)?;
        if change.is_changed() {
            debug!(unit = %mount.unit_name(), "Removed mount unit");
        }
        changed |= change.is_changed();
    }
    Ok(changed)
}

/// Stops every mount unit and waits for each stop job.
pub async fn unmount(
    bus: &Arc<dyn MachineBus>,
    mounts: &[MountSpec],
    policy: &WaitPolicy,
) -> Result<()> {
    for mount in mounts {
        let unit = mount.unit_name();
        debug!(%unit, "Unmounting");
        let job = bus.stop_unit(&unit).await?;
        Job::new(job, Arc::clone(bus)).wait(policy).await?;
    }
    Ok(())
}
