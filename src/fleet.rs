//! # Fleet Reconciliation
//!
//! [`Fleet`] is the state of one run: the bus, the lazily built template
//! catalog, and a registry of machines already resolved. Machines are
//! processed one after another in document order, and the first error ends
//! the run.
//!
//! ## Machine States
//!
//! ```text
//!   Unknown ──probe──▶ Absent ──clone──▶ PresentUnconfigured
//!                                              │ converge fragments
//!                                              ▼
//!                                       PresentConfigured ──start──▶ Running
//!
//!   any present state ──destroy──▶ Removed
//! ```
//!
//! ## Convergence
//!
//! ```text
//!   ensure_machine(spec, template)
//!     ├─ registry hit?              → cached handle, nothing to do
//!     ├─ GetImage                   → NoSuchImage + template → CloneImage
//!     ├─ .nspawn file               ┐
//!     ├─ service drop-in            ├─ each reconciled, results OR'd
//!     ├─ mount units                ┘
//!     ├─ anything changed           → stop the machine
//!     └─ mount units changed        → stop each mount unit
//! ```
//!
//! A reload of the unit database is due whenever the drop-in or a mount unit
//! changed; the caller performs it before starting the machine.

use crate::bus::MachineBus;
use crate::error::{Error, Result};
use crate::machine::Machine;
use crate::mount::{ensure_mounts, remove_mounts, unmount};
use crate::provision::run_pipeline;
use crate::spec::{FleetSpec, MachineSpec};
use crate::template::{Template, TemplateCatalog};
use crate::unit::{UnitPaths, write_unit};
use crate::wait::WaitPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

// =============================================================================
// Options
// =============================================================================

/// Knobs of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetOptions {
    /// Where unit fragments are read and written.
    pub paths: UnitPaths,
    /// Bound on every wait.
    pub wait: WaitPolicy,
}

// =============================================================================
// Mode
// =============================================================================

/// What a run does to each machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Clone if missing, converge, start, provision.
    Create,
    /// Converge nothing; start and provision existing machines.
    Start,
    /// Stop machines and their mounts. Missing machines are skipped.
    Stop,
    /// Stop and delete machines with their fragments. Idempotent.
    Destroy,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Destroy => "destroy",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "destroy" => Ok(Self::Destroy),
            other => Err(Error::InvalidConfig(format!(
                "invalid mode '{}', try: create, start, stop, destroy",
                other
            ))),
        }
    }
}

// =============================================================================
// Machine State
// =============================================================================

/// What this run knows about a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MachineState {
    /// Not probed yet.
    #[default]
    Unknown,
    /// No backing image.
    Absent,
    /// Image exists; fragments not converged by this run.
    PresentUnconfigured,
    /// Image exists and fragments match the desired state.
    PresentConfigured,
    /// Started, or found running, by this run.
    Running,
    /// Deleted by this run.
    Removed,
}

/// Result of [`Fleet::ensure_machine`].
#[derive(Debug, Clone)]
pub struct EnsureOutcome {
    /// Handle on the machine.
    pub machine: Machine,
    /// The image was cloned by this call.
    pub created: bool,
    /// The image or any fragment changed.
    pub changed: bool,
    /// The unit database must be reloaded before the next start.
    pub reload: bool,
}

impl EnsureOutcome {
    fn cached(machine: Machine) -> Self {
        Self {
            machine,
            created: false,
            changed: false,
            reload: false,
        }
    }
}

// =============================================================================
// Fleet
// =============================================================================

/// Reconciliation state of one run.
pub struct Fleet {
    bus: Arc<dyn MachineBus>,
    options: FleetOptions,
    default_template: String,
    catalog: Option<TemplateCatalog>,
    machines: HashMap<String, Machine>,
    states: HashMap<String, MachineState>,
}

impl Fleet {
    /// Creates an empty run state.
    pub fn new(
        bus: Arc<dyn MachineBus>,
        default_template: impl Into<String>,
        options: FleetOptions,
    ) -> Self {
        Self {
            bus,
            options,
            default_template: default_template.into(),
            catalog: None,
            machines: HashMap::new(),
            states: HashMap::new(),
        }
    }

    /// Creates run state for a document, taking its default template.
    pub fn for_spec(bus: Arc<dyn MachineBus>, spec: &FleetSpec, options: FleetOptions) -> Self {
        Self::new(bus, spec.default_template.clone(), options)
    }

    pub fn bus(&self) -> &Arc<dyn MachineBus> {
        &self.bus
    }

    pub fn options(&self) -> &FleetOptions {
        &self.options
    }

    /// Last known state of machine `fqdn`.
    pub fn state(&self, fqdn: &str) -> MachineState {
        self.states.get(fqdn).copied().unwrap_or_default()
    }

    /// Resolved handle of machine `fqdn`, if any.
    pub fn machine(&self, fqdn: &str) -> Option<&Machine> {
        self.machines.get(fqdn)
    }

    fn set_state(&mut self, fqdn: &str, state: MachineState) {
        debug!(machine = %fqdn, ?state, "State");
        self.states.insert(fqdn.to_string(), state);
    }

    // =========================================================================
    // Templates
    // =========================================================================

    /// Returns the template catalog, listing images on first use.
    pub async fn catalog(&mut self) -> Result<&TemplateCatalog> {
        let catalog = match self.catalog.take() {
            Some(catalog) => catalog,
            None => {
                let images = self.bus.list_images().await?;
                let catalog =
                    TemplateCatalog::from_images(self.default_template.as_str(), &images);
                debug!(templates = catalog.groups().len(), "Built template catalog");
                catalog
            }
        };
        Ok(self.catalog.insert(catalog))
    }

    /// Resolves the template a machine is cloned from.
    pub async fn discover_template(&mut self, spec: &MachineSpec) -> Result<Template> {
        let catalog = self.catalog().await?;
        catalog
            .require(spec.template_name(), spec.template_version, &spec.fqdn)
            .cloned()
    }

    /// Clones `template` as machine `fqdn`.
    ///
    /// An existing image of that name is returned as is; the flag reports
    /// whether a clone actually happened.
    pub async fn create_from_template(
        &self,
        template: &Template,
        fqdn: &str,
    ) -> Result<(Machine, bool)> {
        let machine = Machine::new(fqdn, Arc::clone(&self.bus));
        match self.bus.clone_image(&template.image_name(), fqdn).await {
            Ok(()) => Ok((machine, true)),
            Err(e) if e.is_already_exists() => Ok((machine, false)),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Convergence
    // =========================================================================

    /// Resolves a machine and, given a template, converges its fragments.
    ///
    /// Without a template a missing image is returned as
    /// [`Error::NoSuchImage`]; with one it is cloned. Machines already
    /// resolved in this run are returned from the registry.
    pub async fn ensure_machine(
        &mut self,
        spec: &MachineSpec,
        template: Option<&Template>,
        log: &Span,
    ) -> Result<EnsureOutcome> {
        let fqdn = spec.fqdn.as_str();
        if let Some(machine) = self.machines.get(fqdn) {
            debug!("Already found");
            return Ok(EnsureOutcome::cached(machine.clone()));
        }

        debug!("Fetching machine");
        let (machine, created) = match self.bus.get_image(fqdn).await {
            Ok(_) => (Machine::new(fqdn, Arc::clone(&self.bus)), false),
            Err(Error::NoSuchImage(name)) => match template {
                Some(template) => {
                    info!(%template, "Creating machine");
                    self.create_from_template(template, fqdn).await?
                }
                None => {
                    self.set_state(fqdn, MachineState::Absent);
                    return Err(Error::NoSuchImage(name));
                }
            },
            Err(e) => return Err(e),
        };
        self.machines.insert(fqdn.to_string(), machine.clone());
        self.set_state(fqdn, MachineState::PresentUnconfigured);

        let mut outcome = EnsureOutcome {
            machine,
            created,
            changed: created,
            reload: false,
        };
        if template.is_none() {
            return Ok(outcome);
        }

        info!("Checking machine config");
        let paths = &self.options.paths;
        let options_changed = outcome
            .machine
            .ensure_options(paths, &spec.options, Some(log))?
            .is_changed();
        let override_changed = outcome
            .machine
            .ensure_override(paths, &spec.overrides, Some(log))?
            .is_changed();
        let mounts_changed = ensure_mounts(&spec.mounts, paths, Some(log))?;

        outcome.changed |= options_changed || override_changed || mounts_changed;
        outcome.reload = override_changed || mounts_changed;

        if outcome.changed && outcome.machine.stop(&self.options.wait).await? {
            info!("Stopped for reconfiguration");
        }
        if mounts_changed {
            unmount(&self.bus, &spec.mounts, &self.options.wait).await?;
        }

        self.set_state(fqdn, MachineState::PresentConfigured);
        Ok(outcome)
    }

    /// Stops and deletes a machine with its fragments.
    ///
    /// A missing image is a successful no-op.
    pub async fn remove_machine(&mut self, spec: &MachineSpec, log: &Span) -> Result<()> {
        let machine = match self.ensure_machine(spec, None, log).await {
            Ok(outcome) => outcome.machine,
            Err(e) if e.is_not_found() => {
                info!("Already absent");
                self.set_state(&spec.fqdn, MachineState::Removed);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.machines.remove(&spec.fqdn);

        let wait = self.options.wait;
        let paths = &self.options.paths;
        machine.stop(&wait).await?;
        unmount(&self.bus, &spec.mounts, &wait).await?;

        let mut deleted = remove_mounts(&spec.mounts, paths)?;
        deleted |= write_unit(&paths.override_file(&spec.fqdn), &[])?.is_changed();

        info!("Removing image");
        machine.remove().await?;

        if deleted {
            self.bus.reload().await?;
        }
        self.set_state(&spec.fqdn, MachineState::Removed);
        Ok(())
    }

    // =========================================================================
    // Modes
    // =========================================================================

    /// Clones if needed, converges, starts, and provisions one machine.
    pub async fn create(&mut self, spec: &MachineSpec, log: &Span) -> Result<()> {
        let template = self.discover_template(spec).await?;
        let outcome = self.ensure_machine(spec, Some(&template), log).await?;
        self.bring_up(spec, outcome).await
    }

    /// Starts and provisions one existing machine.
    pub async fn start(&mut self, spec: &MachineSpec, log: &Span) -> Result<()> {
        let outcome = self.ensure_machine(spec, None, log).await?;
        self.bring_up(spec, outcome).await
    }

    /// Stops one machine and its mounts; a missing machine is skipped.
    pub async fn stop(&mut self, spec: &MachineSpec, log: &Span) -> Result<()> {
        let outcome = match self.ensure_machine(spec, None, log).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_not_found() => {
                warn!("Missing");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        info!("Stopping");
        outcome.machine.stop(&self.options.wait).await?;
        unmount(&self.bus, &spec.mounts, &self.options.wait).await
    }

    /// Deletes one machine.
    pub async fn destroy(&mut self, spec: &MachineSpec, log: &Span) -> Result<()> {
        info!("Removing");
        self.remove_machine(spec, log).await
    }

    async fn bring_up(&mut self, spec: &MachineSpec, outcome: EnsureOutcome) -> Result<()> {
        let wait = self.options.wait;
        if outcome.reload {
            debug!("Reloading unit database");
            self.bus.reload().await?;
        }

        let started = outcome.machine.start(&wait).await?;
        if started {
            info!("Started");
        }
        self.set_state(&spec.fqdn, MachineState::Running);

        info!("Waiting for address");
        let addrs = outcome.machine.wait_for_address(&wait).await?;
        debug!(?addrs, "Addresses");

        let pipeline = spec.stages.assemble(outcome.created, started);
        run_pipeline(&pipeline, &spec.fqdn, &addrs, &Span::current()).await
    }

    /// Applies `mode` to every machine of `fleet`, in order.
    ///
    /// The document is validated and normalized first. The first failing
    /// machine ends the run with its error.
    pub async fn run(&mut self, mode: Mode, fleet: &mut FleetSpec) -> Result<()> {
        fleet.validate()?;
        fleet.normalize(&self.options.paths);

        let run_span = info_span!("run", %mode);
        run_span.in_scope(|| info!("Starting execution"));

        for spec in &fleet.machines {
            let span = info_span!(parent: &run_span, "machine", machine = %spec.fqdn);
            let result = match mode {
                Mode::Create => self.create(spec, &span).instrument(span.clone()).await,
                Mode::Start => self.start(spec, &span).instrument(span.clone()).await,
                Mode::Stop => self.stop(spec, &span).instrument(span.clone()).await,
                Mode::Destroy => self.destroy(spec, &span).instrument(span.clone()).await,
            };
            if let Err(e) = result {
                span.in_scope(|| error!(error = %e, "Failed"));
                return Err(e);
            }
        }

        run_span.in_scope(|| info!("Done."));
        Ok(())
    }
}
