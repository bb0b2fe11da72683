//! # Unit Fragments
//!
//! Host-persisted configuration fragments are line-oriented files of
//! `[Section]` headers followed by `Name=Value` lines. This module models one
//! such file as a list of [`UnitOption`] triples and keeps files in sync with
//! a desired list using a minimal, sorted diff.
//!
//! ## Ordering
//!
//! Options are totally ordered by `(section, name, value)`. Both the desired
//! and the persisted list are sorted by that order before diffing, and files
//! are always written sorted, so a converged file compares equal to the
//! desired list option for option.
//!
//! ## Write Semantics
//!
//! ```text
//!   desired == current  ──▶ Unchanged (no write)
//!   desired empty       ──▶ file removed (empty fragments are invalid)
//!   otherwise           ──▶ whole file rewritten, parents created
//! ```

mod escape;
mod file;
mod paths;
mod reconcile;

pub use escape::escape_path;
pub use file::{parse_unit, serialize_unit};
pub use paths::UnitPaths;
pub use reconcile::{OptionDiff, UnitChange, diff_options, ensure_unit, read_unit, write_unit};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One `Name=Value` entry within a section of a unit fragment.
///
/// The derived ordering compares section, then name, then value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitOption {
    /// Section the option belongs to (without brackets).
    pub section: String,
    /// Option key.
    pub name: String,
    /// Option value, verbatim.
    pub value: String,
}

impl UnitOption {
    /// Creates a new option.
    pub fn new(
        section: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            section: section.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns the option as it reads back from a written fragment.
    ///
    /// The reader drops whitespace around the name and the value.
    pub fn canonical(&self) -> Self {
        Self {
            section: self.section.clone(),
            name: self.name.trim().to_string(),
            value: self.value.trim().to_string(),
        }
    }

    /// Rejects options that cannot be written as a single `Name=Value` line
    /// and read back as the same option.
    pub fn validate(&self) -> Result<()> {
        let reason = if self.section.is_empty() {
            Some("empty section")
        } else if self.section.contains(['[', ']', '\n', '\r']) {
            Some("section contains a bracket or line break")
        } else if self.name.trim().is_empty() {
            Some("empty name")
        } else if self.name.contains(['=', '\n', '\r']) {
            Some("name contains '=' or a line break")
        } else if self.name.trim_start().starts_with(['#', ';', '[']) {
            Some("name starts with a comment or section marker")
        } else if self.value.contains(['\n', '\r']) {
            Some("value contains a line break")
        } else if self.value.trim_end().ends_with('\\') {
            Some("value ends with a line continuation")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::InvalidConfig(format!("option {}: {}", self, reason))),
            None => Ok(()),
        }
    }
}

impl std::fmt::Display for UnitOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}={}", self.section, self.name, self.value)
    }
}
