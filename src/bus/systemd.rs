//! systemd and systemd-machined over the system bus.
//!
//! One [`zbus::Connection`] is opened per run and shared by every call.
//! Properties are read with explicit `org.freedesktop.DBus.Properties.Get`
//! calls rather than cached proxies, since both job and machine objects
//! appear and vanish while we poll them.

use super::{ImageInfo, JobPath, MachineBus};
use crate::constants::JOB_MODE;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};
use zbus::{Connection, DBusError, Proxy};

// =============================================================================
// Bus Names
// =============================================================================

const MACHINED_SERVICE: &str = "org.freedesktop.machine1";
const MACHINED_PATH: &str = "/org/freedesktop/machine1";
const MACHINED_MANAGER: &str = "org.freedesktop.machine1.Manager";
const MACHINED_MACHINE: &str = "org.freedesktop.machine1.Machine";

const SYSTEMD_SERVICE: &str = "org.freedesktop.systemd1";
const SYSTEMD_PATH: &str = "/org/freedesktop/systemd1";
const SYSTEMD_MANAGER: &str = "org.freedesktop.systemd1.Manager";
const SYSTEMD_JOB: &str = "org.freedesktop.systemd1.Job";

const PROPERTIES: &str = "org.freedesktop.DBus.Properties";

/// Row of `ListImages`: name, type, read-only, creation, modification,
/// disk usage, object path.
type ImageRow = (String, String, bool, u64, u64, u64, OwnedObjectPath);

// =============================================================================
// Error Classification
// =============================================================================

/// What a remote error name means to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteError {
    NoSuchImage,
    NoSuchMachine,
    AlreadyExists,
    Other,
}

/// Classifies a D-Bus error name.
pub(crate) fn classify(name: &str) -> RemoteError {
    match name {
        "org.freedesktop.machine1.NoSuchImage" => RemoteError::NoSuchImage,
        "org.freedesktop.machine1.NoSuchMachine" => RemoteError::NoSuchMachine,
        "System.Error.EEXIST" | "org.freedesktop.DBus.Error.FileExists" => {
            RemoteError::AlreadyExists
        }
        _ => RemoteError::Other,
    }
}

/// Returns the error name of a remote error reply, if this is one.
fn remote_name(err: &zbus::Error) -> Option<String> {
    match err {
        zbus::Error::MethodError(name, _, _) => Some(name.as_str().to_string()),
        zbus::Error::FDO(fdo) => Some(fdo.name().to_string()),
        _ => None,
    }
}

/// Maps a failed call about object `subject` to a crate error.
fn map_call_error(operation: &str, subject: &str, err: zbus::Error) -> Error {
    match remote_name(&err).as_deref().map(classify) {
        Some(RemoteError::NoSuchImage) => Error::NoSuchImage(subject.to_string()),
        Some(RemoteError::NoSuchMachine) => Error::NoSuchMachine(subject.to_string()),
        Some(RemoteError::AlreadyExists) => Error::AlreadyExists(subject.to_string()),
        _ => Error::bus(operation, err),
    }
}

/// Decodes one `(family, bytes)` address entry.
fn decode_address(family: i32, bytes: &[u8]) -> Option<IpAddr> {
    match (family, bytes.len()) {
        (af::INET, 4) => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        (af::INET6, 16) => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Address family numbers as sent by the container manager.
mod af {
    pub const INET: i32 = 2;
    pub const INET6: i32 = 10;
}

// =============================================================================
// SystemdBus
// =============================================================================

/// [`MachineBus`] backed by systemd and systemd-machined.
#[derive(Clone)]
pub struct SystemdBus {
    conn: Connection,
}

impl SystemdBus {
    /// Connects to the system bus.
    pub async fn connect() -> Result<Self> {
        let conn = Connection::system()
            .await
            .map_err(|e| Error::bus("connect", e))?;
        debug!("Connected to system bus");
        Ok(Self { conn })
    }

    /// Wraps an existing connection.
    pub fn with_connection(conn: Connection) -> Self {
        Self { conn }
    }

    async fn proxy(
        &self,
        service: &'static str,
        path: &str,
        interface: &'static str,
    ) -> Result<Proxy<'static>> {
        Proxy::new(&self.conn, service, path.to_string(), interface)
            .await
            .map_err(|e| Error::bus("proxy", e))
    }

    async fn machined(&self) -> Result<Proxy<'static>> {
        self.proxy(MACHINED_SERVICE, MACHINED_PATH, MACHINED_MANAGER)
            .await
    }

    async fn systemd(&self) -> Result<Proxy<'static>> {
        self.proxy(SYSTEMD_SERVICE, SYSTEMD_PATH, SYSTEMD_MANAGER)
            .await
    }

    /// Reads a string property with an uncached `Properties.Get`.
    async fn string_property(
        &self,
        service: &'static str,
        path: &str,
        interface: &'static str,
        property: &'static str,
    ) -> std::result::Result<String, zbus::Error> {
        let proxy = self
            .proxy(service, path, PROPERTIES)
            .await
            .map_err(|e| zbus::Error::Failure(e.to_string()))?;
        let value: OwnedValue = proxy.call("Get", &(interface, property)).await?;
        String::try_from(value).map_err(zbus::Error::Variant)
    }

    async fn start_or_stop(&self, method: &'static str, unit: &str) -> Result<JobPath> {
        let job: OwnedObjectPath = self
            .systemd()
            .await?
            .call(method, &(unit, JOB_MODE))
            .await
            .map_err(|e| map_call_error(method, unit, e))?;
        debug!("{} {} enqueued job {}", method, unit, job.as_str());
        Ok(JobPath(job.as_str().to_string()))
    }
}

#[async_trait]
impl MachineBus for SystemdBus {
    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let rows: Vec<ImageRow> = self
            .machined()
            .await?
            .call("ListImages", &())
            .await
            .map_err(|e| Error::bus("ListImages", e))?;

        Ok(rows
            .into_iter()
            .map(|(name, _, _, _, _, _, path)| ImageInfo {
                name,
                path: path.as_str().to_string(),
            })
            .collect())
    }

    async fn get_image(&self, name: &str) -> Result<ImageInfo> {
        let path: OwnedObjectPath = self
            .machined()
            .await?
            .call("GetImage", &(name,))
            .await
            .map_err(|e| map_call_error("GetImage", name, e))?;
        Ok(ImageInfo {
            name: name.to_string(),
            path: path.as_str().to_string(),
        })
    }

    async fn clone_image(&self, source: &str, target: &str) -> Result<()> {
        self.machined()
            .await?
            .call_method("CloneImage", &(source, target, false))
            .await
            .map_err(|e| map_call_error("CloneImage", target, e))?;
        Ok(())
    }

    async fn remove_image(&self, name: &str) -> Result<()> {
        self.machined()
            .await?
            .call_method("RemoveImage", &(name,))
            .await
            .map_err(|e| map_call_error("RemoveImage", name, e))?;
        Ok(())
    }

    async fn machine_state(&self, name: &str) -> Result<Option<String>> {
        let path: OwnedObjectPath = match self
            .machined()
            .await?
            .call("GetMachine", &(name,))
            .await
            .map_err(|e| map_call_error("GetMachine", name, e))
        {
            Ok(path) => path,
            Err(Error::NoSuchMachine(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        match self
            .string_property(MACHINED_SERVICE, path.as_str(), MACHINED_MACHINE, "State")
            .await
        {
            Ok(state) => Ok(Some(state)),
            // The machine unregistered between the two calls.
            Err(e) if remote_name(&e).is_some() => Ok(None),
            Err(e) => Err(Error::bus("machine State", e)),
        }
    }

    async fn machine_addresses(&self, name: &str) -> Result<Vec<IpAddr>> {
        let entries: Vec<(i32, Vec<u8>)> = self
            .machined()
            .await?
            .call("GetMachineAddresses", &(name,))
            .await
            .map_err(|e| map_call_error("GetMachineAddresses", name, e))?;

        entries
            .into_iter()
            .map(|(family, bytes)| {
                decode_address(family, &bytes).ok_or_else(|| Error::InvalidResponse {
                    operation: "GetMachineAddresses".to_string(),
                    reason: format!("invalid address family {} with {} bytes", family, bytes.len()),
                })
            })
            .collect()
    }

    async fn start_unit(&self, unit: &str) -> Result<JobPath> {
        self.start_or_stop("StartUnit", unit).await
    }

    async fn stop_unit(&self, unit: &str) -> Result<JobPath> {
        self.start_or_stop("StopUnit", unit).await
    }

    async fn reload(&self) -> Result<()> {
        self.systemd()
            .await?
            .call_method("Reload", &())
            .await
            .map_err(|e| Error::bus("Reload", e))?;
        Ok(())
    }

    async fn job_state(&self, job: &JobPath) -> Result<Option<String>> {
        match self
            .string_property(SYSTEMD_SERVICE, &job.0, SYSTEMD_JOB, "State")
            .await
        {
            Ok(state) => Ok(Some(state)),
            // Finished jobs are garbage-collected; their object disappears.
            Err(e) if remote_name(&e).is_some() => Ok(None),
            Err(e) => Err(Error::bus("job State", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_machined_errors() {
        assert_eq!(
            classify("org.freedesktop.machine1.NoSuchImage"),
            RemoteError::NoSuchImage
        );
        assert_eq!(
            classify("org.freedesktop.machine1.NoSuchMachine"),
            RemoteError::NoSuchMachine
        );
        assert_eq!(classify("System.Error.EEXIST"), RemoteError::AlreadyExists);
        assert_eq!(
            classify("org.freedesktop.DBus.Error.AccessDenied"),
            RemoteError::Other
        );
    }

    #[test]
    fn test_decode_ipv4_and_ipv6() {
        assert_eq!(
            decode_address(2, &[203, 0, 113, 5]),
            Some("203.0.113.5".parse().unwrap())
        );
        let mut v6 = [0u8; 16];
        v6[0] = 0xfe;
        v6[1] = 0x80;
        v6[15] = 1;
        assert_eq!(decode_address(10, &v6), Some("fe80::1".parse().unwrap()));
    }

    #[test]
    fn test_decode_rejects_mismatched_length() {
        assert_eq!(decode_address(2, &[1, 2, 3]), None);
        assert_eq!(decode_address(10, &[0; 4]), None);
        assert_eq!(decode_address(99, &[0; 4]), None);
    }
}
