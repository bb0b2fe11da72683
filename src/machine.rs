//! # Machine Handle
//!
//! A [`Machine`] is a name plus a shared reference to the bus. It holds no
//! state of its own: every question is answered by the container manager, and
//! every change is either a bus call or a unit fragment on disk.
//!
//! ```text
//!          start()                         stop()
//!   StartUnit ─▶ Job::wait ─▶ poll     StopUnit ─▶ Job::wait ─▶ poll
//!                             state                             state
//!                          == running                        != running
//! ```
//!
//! Both directions are no-ops when the machine is already in the target
//! state, and both waits are bounded by the caller's [`WaitPolicy`].

use crate::bus::MachineBus;
use crate::constants::{MACHINE_STATE_RUNNING, NSPAWN_SERVICE_PREFIX};
use crate::error::{Error, Result};
use crate::unit::{UnitChange, UnitOption, UnitPaths, ensure_unit};
use crate::wait::{Job, WaitPolicy, poll_until, wait_for_address};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{Span, debug};

/// Runtime handle on one machine.
#[derive(Clone)]
pub struct Machine {
    name: String,
    bus: Arc<dyn MachineBus>,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine").field("name", &self.name).finish()
    }
}

impl Machine {
    /// Creates a handle; does not touch the bus.
    pub fn new(name: impl Into<String>, bus: Arc<dyn MachineBus>) -> Self {
        Self {
            name: name.into(),
            bus,
        }
    }

    /// Fully-qualified machine name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `systemd-nspawn@<name>.service`
    pub fn service_unit(&self) -> String {
        format!("{}{}.service", NSPAWN_SERVICE_PREFIX, self.name)
    }

    // =========================================================================
    // Image
    // =========================================================================

    /// Returns true if the backing image exists.
    pub async fn exists(&self) -> Result<bool> {
        match self.bus.get_image(&self.name).await {
            Ok(_) => Ok(true),
            Err(Error::NoSuchImage(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Removes the backing image.
    pub async fn remove(&self) -> Result<()> {
        self.bus.remove_image(&self.name).await
    }

    // =========================================================================
    // Run State
    // =========================================================================

    /// Current run state, or `None` when the machine is not registered.
    pub async fn status(&self) -> Result<Option<String>> {
        self.bus.machine_state(&self.name).await
    }

    /// Returns true if the container manager reports the machine running.
    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.status().await?.as_deref() == Some(MACHINE_STATE_RUNNING))
    }

    /// Starts the machine and waits until it reports running.
    ///
    /// Returns `false` without doing anything if it already runs.
    pub async fn start(&self, policy: &WaitPolicy) -> Result<bool> {
        if self.is_running().await? {
            return Ok(false);
        }

        debug!(machine = %self.name, "Starting machine job");
        let job = self.bus.start_unit(&self.service_unit()).await?;
        Job::new(job, Arc::clone(&self.bus)).wait(policy).await?;

        debug!(machine = %self.name, "Job completed, waiting for unit");
        let operation = format!("start {}", self.name);
        let this = self;
        poll_until(policy, &operation, move || async move {
            Ok(this.is_running().await?.then_some(()))
        })
        .await?;
        Ok(true)
    }

    /// Stops the machine and waits until it no longer reports running.
    ///
    /// Returns `false` without doing anything unless the machine reports
    /// running. A machine still booting is left alone.
    pub async fn stop(&self, policy: &WaitPolicy) -> Result<bool> {
        let state = self.status().await?;
        if state.as_deref() != Some(MACHINE_STATE_RUNNING) {
            debug!(
                machine = %self.name,
                state = state.as_deref().unwrap_or("absent"),
                "Machine not running, skipping stop"
            );
            return Ok(false);
        }

        debug!(machine = %self.name, "Stopping machine job");
        let job = self.bus.stop_unit(&self.service_unit()).await?;
        Job::new(job, Arc::clone(&self.bus)).wait(policy).await?;

        let operation = format!("stop {}", self.name);
        let this = self;
        poll_until(policy, &operation, move || async move {
            Ok((!this.is_running().await?).then_some(()))
        })
        .await?;
        Ok(true)
    }

    // =========================================================================
    // Network
    // =========================================================================

    /// Addresses currently reported by the machine, unfiltered.
    pub async fn addresses(&self) -> Result<Vec<IpAddr>> {
        self.bus.machine_addresses(&self.name).await
    }

    /// Waits for at least one routable address.
    pub async fn wait_for_address(&self, policy: &WaitPolicy) -> Result<Vec<IpAddr>> {
        wait_for_address(&*self.bus, &self.name, policy).await
    }

    // =========================================================================
    // Fragments
    // =========================================================================

    /// Converges the container settings file.
    pub fn ensure_options(
        &self,
        paths: &UnitPaths,
        options: &[UnitOption],
        log: Option<&Span>,
    ) -> Result<UnitChange> {
        ensure_unit(&paths.nspawn_file(&self.name), options, log)
    }

    /// Converges the service drop-in.
    pub fn ensure_override(
        &self,
        paths: &UnitPaths,
        options: &[UnitOption],
        log: Option<&Span>,
    ) -> Result<UnitChange> {
        ensure_unit(&paths.override_file(&self.name), options, log)
    }
}
