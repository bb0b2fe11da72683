//! System bus capabilities.
//!
//! [`MachineBus`] is the only door to the service manager and the container
//! manager. Everything above it works in terms of names, job handles, and the
//! crate's [`Error`](crate::Error) variants; remote error names are already
//! classified by the time a call returns.
//!
//! # Capabilities
//!
//! ```text
//! container manager:  list_images · get_image · clone_image · remove_image
//!                     machine_state · machine_addresses
//! service manager:    start_unit · stop_unit · reload · job_state
//! ```
//!
//! # Implementations
//!
//! - [`SystemdBus`]: systemd + systemd-machined over the system bus

pub mod systemd;

pub use self::systemd::SystemdBus;

use crate::error::Result;
use async_trait::async_trait;
use std::net::IpAddr;

/// An image known to the container manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Image name.
    pub name: String,
    /// Bus object path of the image.
    pub path: String,
}

/// Bus object path of an enqueued service manager job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobPath(pub String);

impl std::fmt::Display for JobPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Calls into the service manager and container manager.
///
/// Implementations must report a missing image as
/// [`Error::NoSuchImage`](crate::Error::NoSuchImage) and a clone onto an
/// existing name as [`Error::AlreadyExists`](crate::Error::AlreadyExists).
/// Every other failure is fatal to the run.
#[async_trait]
pub trait MachineBus: Send + Sync {
    // =========================================================================
    // Container Manager
    // =========================================================================

    /// Lists every image, templates and machines alike.
    async fn list_images(&self) -> Result<Vec<ImageInfo>>;

    /// Looks up one image by name.
    async fn get_image(&self, name: &str) -> Result<ImageInfo>;

    /// Clones image `source` under the name `target`.
    async fn clone_image(&self, source: &str, target: &str) -> Result<()>;

    /// Removes an image.
    async fn remove_image(&self, name: &str) -> Result<()>;

    /// Returns the run state of a machine, or `None` if it is not running.
    async fn machine_state(&self, name: &str) -> Result<Option<String>>;

    /// Returns the addresses a running machine reports.
    async fn machine_addresses(&self, name: &str) -> Result<Vec<IpAddr>>;

    // =========================================================================
    // Service Manager
    // =========================================================================

    /// Enqueues a start job for a unit.
    async fn start_unit(&self, unit: &str) -> Result<JobPath>;

    /// Enqueues a stop job for a unit.
    async fn stop_unit(&self, unit: &str) -> Result<JobPath>;

    /// Reloads the unit database.
    async fn reload(&self) -> Result<()>;

    /// Reads a job's state, or `None` once the job object is gone.
    async fn job_state(&self, job: &JobPath) -> Result<Option<String>>;
}
