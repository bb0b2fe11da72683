//! # Desired-State Document
//!
//! The document names a default template and lists machines in the order
//! they are reconciled:
//!
//! ```yaml
//! default_template: base
//! machines:
//!   - fqdn: db01.example.com
//!     options:
//!       - { section: Network, name: Bridge, value: br0 }
//!     mounts:
//!       - { name: db01-data, device: /dev/vg0/db01, target: /var/lib/postgresql, fs: ext4, autofs: true }
//!     creation:
//!       - { command: [apt-get, install, -y, postgresql] }
//!     commands:
//!       - { command: [register-dns], local: true, appendfqdn: true, appendaddr: true }
//! ```
//!
//! Keys are snake_case; the flat lowercase spellings used by older documents
//! (`defaulttemplate`, `commandspre`, `creationpost`, `mountpoint`, …) are
//! accepted as aliases.

use crate::constants::validate_machine_name;
use crate::error::{Error, Result};
use crate::mount::MountSpec;
use crate::provision::CommandStages;
use crate::unit::{UnitOption, UnitPaths};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// =============================================================================
// Format
// =============================================================================

/// Encoding of a desired-state document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Picks the decoder by extension: `.json` is JSON, anything else YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

// =============================================================================
// FleetSpec
// =============================================================================

/// Every machine this run reconciles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSpec {
    /// Template used by machines that do not name one.
    #[serde(alias = "defaulttemplate")]
    pub default_template: String,

    /// Machines, in processing order.
    pub machines: Vec<MachineSpec>,
}

impl FleetSpec {
    /// Decodes a document.
    pub fn parse(text: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Yaml => Self::from_yaml(text),
            ConfigFormat::Json => Self::from_json(text),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Rejects documents the engine cannot act on safely.
    ///
    /// Machine names must be valid and unique, every mount needs a name,
    /// device, and target, and no command may be empty.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for machine in &self.machines {
            machine.validate()?;
            if !seen.insert(machine.fqdn.as_str()) {
                return Err(Error::DuplicateMachine(machine.fqdn.clone()));
            }
        }
        Ok(())
    }

    /// Normalizes every machine. Repeated calls change nothing.
    pub fn normalize(&mut self, paths: &UnitPaths) {
        for machine in &mut self.machines {
            machine.normalize(paths);
        }
    }
}

// =============================================================================
// MachineSpec
// =============================================================================

/// Desired state of one machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineSpec {
    /// Fully-qualified name; the machine's identity.
    pub fqdn: String,

    /// Template name; empty means the fleet default.
    pub template: String,

    /// Pins a template version instead of the highest one.
    #[serde(alias = "templateversion")]
    pub template_version: Option<u32>,

    /// Container settings (`.nspawn` file).
    pub options: Vec<UnitOption>,

    /// Service settings layered on the container's service unit.
    pub overrides: Vec<UnitOption>,

    /// Volumes, mounted on the host and bound into the container.
    pub mounts: Vec<MountSpec>,

    /// Provisioning commands.
    #[serde(flatten)]
    pub stages: CommandStages,

    #[serde(skip)]
    normalized: bool,
}

impl MachineSpec {
    /// Creates an empty spec for `fqdn`.
    pub fn new(fqdn: impl Into<String>) -> Self {
        Self {
            fqdn: fqdn.into(),
            ..Default::default()
        }
    }

    /// Template reference, `None` meaning the fleet default.
    pub fn template_name(&self) -> Option<&str> {
        (!self.template.is_empty()).then_some(self.template.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        validate_machine_name(&self.fqdn).map_err(|reason| Error::InvalidName {
            name: self.fqdn.clone(),
            reason: reason.to_string(),
        })?;
        for opt in self.options.iter().chain(&self.overrides) {
            opt.validate().map_err(|e| {
                Error::InvalidConfig(format!("machine {}: {}", self.fqdn, e))
            })?;
        }
        for mount in &self.mounts {
            mount.validate()?;
        }
        for command in self.stages.iter() {
            command.validate().map_err(|e| {
                Error::InvalidConfig(format!("machine {}: {}", self.fqdn, e))
            })?;
        }
        Ok(())
    }

    /// Normalizes mounts and folds their bind and dependency options into
    /// the machine's options and overrides. Runs once.
    pub fn normalize(&mut self, paths: &UnitPaths) {
        if self.normalized {
            return;
        }
        self.normalized = true;

        for mount in &mut self.mounts {
            mount.normalize(paths);
            self.options.push(mount.bind_option());
            self.overrides.push(mount.override_option());
        }
    }

    /// Returns true once [`normalize`](Self::normalize) has run.
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path("fleet.json"), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path("fleet.yaml"), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path("-"), ConfigFormat::Yaml);
    }

    #[test]
    fn test_lowercase_aliases() {
        let yaml = r#"
defaulttemplate: base
machines:
  - fqdn: web01.example.com
    commandspre:
      - { command: [/bin/true], local: true }
    creationpost:
      - { command: [echo, done], appendfqdn: true }
    mounts:
      - { name: www, device: /dev/vg0/www, target: /srv, mountpoint: /srv/www, autofs: true }
"#;
        let fleet = FleetSpec::from_yaml(yaml).unwrap();
        assert_eq!(fleet.default_template, "base");
        let machine = &fleet.machines[0];
        assert_eq!(machine.stages.commands_pre.len(), 1);
        assert!(machine.stages.creation_post[0].append_fqdn);
        assert_eq!(machine.mounts[0].mount_point, "/srv/www");
        assert!(machine.mounts[0].auto_fs);
    }

    #[test]
    fn test_normalize_runs_once() {
        let mut machine = MachineSpec::new("db01.example.com");
        machine.mounts.push(MountSpec {
            name: "data".to_string(),
            device: "/dev/vg0/data".to_string(),
            target: "/srv".to_string(),
            ..Default::default()
        });

        let paths = UnitPaths::default();
        machine.normalize(&paths);
        machine.normalize(&paths);

        assert_eq!(machine.options.len(), 1);
        assert_eq!(machine.overrides.len(), 1);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let fleet = FleetSpec {
            default_template: "base".to_string(),
            machines: vec![MachineSpec::new("a.example"), MachineSpec::new("a.example")],
        };
        assert!(matches!(fleet.validate(), Err(Error::DuplicateMachine(_))));
    }

    #[test]
    fn test_validate_rejects_bad_name() {
        let fleet = FleetSpec {
            default_template: "base".to_string(),
            machines: vec![MachineSpec::new("bad/name")],
        };
        assert!(matches!(fleet.validate(), Err(Error::InvalidName { .. })));
    }

    #[test]
    fn test_validate_rejects_unwritable_option() {
        let mut machine = MachineSpec::new("a.example");
        machine.options = vec![UnitOption::new("Files", "Bind", "/srv/share\\")];
        assert!(matches!(machine.validate(), Err(Error::InvalidConfig(_))));

        let mut machine = MachineSpec::new("a.example");
        machine.overrides = vec![UnitOption::new("Service", "Environment", "A=1\nB=2")];
        assert!(matches!(machine.validate(), Err(Error::InvalidConfig(_))));
    }
}
