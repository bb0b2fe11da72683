//! # nspawn-fleet
//!
//! **Declarative reconciliation of systemd-nspawn machines**
//!
//! This crate converges a fleet of containers toward a desired-state
//! document. Actual state lives in two places: the service manager and
//! container manager, reached over the system bus, and unit fragments on the
//! host's disk. Re-running against an unchanged document changes nothing.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           nspawn-fleet                              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  FleetSpec ──validate──▶ normalize ──▶ Fleet::run(mode)             │
//! │                                            │                        │
//! │  ┌─────────────────────────────────────────┼──────────────────┐     │
//! │  │             Machine Lifecycle (per machine, in order)      │     │
//! │  │  TemplateCatalog ─▶ ensure_machine ─▶ start ─▶ provision   │     │
//! │  └───────┬──────────────────┬───────────────┬─────────────────┘     │
//! │          │                  │               │                       │
//! │  ┌───────▼──────┐  ┌────────▼───────┐  ┌────▼──────────┐            │
//! │  │  MachineBus  │  │ Unit Reconciler│  │ Job / Address │            │
//! │  │ machined +   │  │ sorted diff of │  │ bounded waits │            │
//! │  │ systemd      │  │ key/value units│  │ with backoff  │            │
//! │  └──────────────┘  └────────────────┘  └───────────────┘            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Machine Lifecycle
//!
//! ```text
//!   ┌─────────┐  clone   ┌──────────────┐ converge ┌────────────┐ start ┌─────────┐
//!   │ Absent  │ ───────► │ Unconfigured │ ───────► │ Configured │ ────► │ Running │
//!   └─────────┘          └──────────────┘          └────────────┘       └─────────┘
//!                                │                        │                  │
//!                                └──────── destroy ───────┴──────────────────┘
//!                                             ▼
//!                                        ┌─────────┐
//!                                        │ Removed │
//!                                        └─────────┘
//! ```
//!
//! # Host Fragments
//!
//! | Fragment | Path |
//! |----------|------|
//! | Container settings | `/etc/systemd/nspawn/<fqdn>.nspawn` |
//! | Service drop-in | `/etc/systemd/system/systemd-nspawn@<fqdn>.service.d/nspawn-fleet.conf` |
//! | Volume mount | `/etc/systemd/system/<escaped mount point>.mount` |
//!
//! # Bounded Waits
//!
//! Every wait on the bus (job completion, run state, address assignment) is
//! bounded by a [`WaitPolicy`] and fails with [`Error::Timeout`] instead of
//! hanging.
//!
//! # Example
//!
//! ```rust,ignore
//! use nspawn_fleet::{Fleet, FleetOptions, FleetSpec, Mode, SystemdBus};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> nspawn_fleet::Result<()> {
//!     let mut spec = FleetSpec::from_yaml(&std::fs::read_to_string("fleet.yaml")?)?;
//!     let bus = Arc::new(SystemdBus::connect().await?);
//!     let mut fleet = Fleet::for_spec(bus, &spec, FleetOptions::default());
//!     fleet.run(Mode::Create, &mut spec).await
//! }
//! ```

pub mod bus;
pub mod constants;
pub mod error;
pub mod fleet;
pub mod machine;
pub mod mount;
pub mod provision;
pub mod spec;
pub mod template;
pub mod unit;
pub mod wait;

// Re-exports
pub use bus::{ImageInfo, JobPath, MachineBus, SystemdBus};
pub use error::{Error, Result};
pub use fleet::{EnsureOutcome, Fleet, FleetOptions, MachineState, Mode};
pub use machine::Machine;
pub use mount::MountSpec;
pub use provision::{CommandSpec, CommandStages};
pub use spec::{ConfigFormat, FleetSpec, MachineSpec};
pub use template::{Template, TemplateCatalog, TemplateSource, TemplateVersions};
pub use unit::{UnitChange, UnitOption, UnitPaths};
pub use wait::{Job, WaitPolicy};
