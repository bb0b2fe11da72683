//! # Host Conventions and Defaults
//!
//! Single source of truth for the paths, bus names, naming conventions, and
//! wait bounds used across the crate.
//!
//! ## Cross-References
//!
//! - [`crate::machine`]: nspawn settings and service drop-in paths
//! - [`crate::mount`]: mount unit directory and default mount points
//! - [`crate::template`]: template image naming
//! - [`crate::wait`]: poll interval and timeout defaults
//! - [`crate::bus::systemd`]: D-Bus names

use std::time::Duration;

// =============================================================================
// Host Paths
// =============================================================================

/// Directory holding per-machine `.nspawn` settings files.
pub const NSPAWN_DIR: &str = "/etc/systemd/nspawn";

/// Directory holding administrator unit files and drop-ins.
pub const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";

/// Default parent directory for host mount points of machine volumes.
pub const MACHINES_DIR: &str = "/var/lib/machines";

/// File name of the drop-in layered on `systemd-nspawn@<name>.service`.
pub const OVERRIDE_DROPIN: &str = "nspawn-fleet.conf";

/// Extension of container settings files.
pub const NSPAWN_SUFFIX: &str = ".nspawn";

/// Suffix of mount unit names.
pub const MOUNT_SUFFIX: &str = ".mount";

// =============================================================================
// Naming Conventions
// =============================================================================

/// Separator between template name and version in an image name.
///
/// `base-template_3` is version 3 of template `base`.
pub const TEMPLATE_SEPARATOR: &str = "-template_";

/// Template unit the per-machine container services are instantiated from.
pub const NSPAWN_SERVICE_PREFIX: &str = "systemd-nspawn@";

/// Job mode passed with start/stop requests.
pub const JOB_MODE: &str = "fail";

/// Machine state reported by the container manager once booted.
pub const MACHINE_STATE_RUNNING: &str = "running";

/// Mount options appended when automatic filesystem provisioning is on.
pub const AUTO_FS_OPTIONS: &str = "x-systemd.makefs,x-systemd.growfs";

/// Remote command wrapper: run inside the machine, wait, propagate status.
pub const REMOTE_WRAPPER: &[&str] = &["systemd-run", "-M"];

/// Flag making the remote wrapper wait and pipe stdio.
pub const REMOTE_WRAPPER_PIPE: &str = "-P";

/// Default permission bits of files created by stdio redirection.
pub const DEFAULT_REDIRECT_MODE: u32 = 0o600;

// =============================================================================
// Waits
// =============================================================================
//
// Every poll loop is bounded. The interval doubles after each unsuccessful
// poll, capped at the maximum, until the timeout elapses.
// =============================================================================

/// First delay between two polls (1 second).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on the delay between two polls (5 seconds).
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Overall bound on a single wait (5 minutes).
///
/// Covers a machine boot including first-boot setup in the container.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

// =============================================================================
// Validation
// =============================================================================

/// Maximum machine name length accepted by the container manager.
pub const MAX_MACHINE_NAME_LEN: usize = 64;

/// Validates a fully-qualified machine name.
///
/// Names become image names, unit instance names, and file names, so they
/// must be non-empty host names: ASCII alphanumerics, `-`, and `.`, not
/// starting with `.` or `-`.
pub fn validate_machine_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("machine name cannot be empty");
    }
    if name.len() > MAX_MACHINE_NAME_LEN {
        return Err("machine name exceeds maximum length");
    }
    if name.starts_with('.') || name.starts_with('-') {
        return Err("machine name cannot start with '.' or '-'");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err("machine name contains invalid characters");
    }
    if name.contains("..") {
        return Err("machine name contains an empty label");
    }
    Ok(())
}
