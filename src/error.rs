//! Error types for machine reconciliation.
//!
//! Every failure the engine can observe is a variant of [`Error`]. The bus
//! layer translates remote error *names* into these variants, so callers
//! decide on recoverability by matching variants, never by inspecting text.

use std::path::PathBuf;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling machines.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Image/Machine Lookup Errors
    // =========================================================================
    /// No image with this name is known to the container manager.
    #[error("image not found: {0}")]
    NoSuchImage(String),

    /// No running machine with this name is registered.
    #[error("machine not found: {0}")]
    NoSuchMachine(String),

    /// An image with this name already exists.
    #[error("image already exists: {0}")]
    AlreadyExists(String),

    /// Neither a named nor the default template could be resolved.
    #[error("missing template '{template}' creating {machine}")]
    MissingTemplate { template: String, machine: String },

    // =========================================================================
    // Bus Errors
    // =========================================================================
    /// A call into the service or container manager failed.
    #[error("bus call {operation} failed: {reason}")]
    Bus { operation: String, reason: String },

    /// A bus reply did not have the expected shape.
    #[error("invalid reply from {operation}: {reason}")]
    InvalidResponse { operation: String, reason: String },

    // =========================================================================
    // Unit File Errors
    // =========================================================================
    /// A unit file could not be parsed.
    #[error("failed to parse {path}:{line}: {reason}")]
    UnitParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A unit file could not be read, written, or removed.
    #[error("unit file {path}: {reason}")]
    UnitIo { path: PathBuf, reason: String },

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    /// A provisioning command could not be spawned or its stdio prepared.
    #[error("failed to run '{program}': {reason}")]
    CommandSpawn { program: String, reason: String },

    /// A provisioning command exited unsuccessfully.
    #[error("command '{program}' failed: {status}")]
    CommandFailed { program: String, status: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// The desired-state document is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two machines share one fully-qualified name.
    #[error("duplicate machine name: {0}")]
    DuplicateMachine(String),

    /// A machine name is not usable as a unit or image name.
    #[error("invalid machine name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// A wait did not observe its condition in time.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },
}

impl Error {
    /// Returns true for the expected "image or machine does not exist" case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchImage(_) | Self::NoSuchMachine(_))
    }

    /// Returns true when a clone target was already present.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub(crate) fn bus(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Bus {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unit_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::UnitIo {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
