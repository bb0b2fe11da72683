//! Sorted diff and persistence of unit fragments.

use super::{UnitOption, parse_unit, serialize_unit};
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::{Span, debug, info};

// =============================================================================
// Diff
// =============================================================================

/// Partition of two sorted option lists.
///
/// `add` holds options only in the desired list, `remove` options only in the
/// current list, and `keep` options present in both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDiff<'a, T> {
    /// Present only in the desired list.
    pub add: Vec<&'a T>,
    /// Present in both lists.
    pub keep: Vec<&'a T>,
    /// Present only in the current list.
    pub remove: Vec<&'a T>,
}

impl<T> OptionDiff<'_, T> {
    /// Returns true if applying the diff would change nothing.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Diffs two lists that are both sorted ascending.
///
/// A single merge pass: each element of either list is visited once, so the
/// cost is linear in the combined length. Duplicates are matched pairwise.
pub fn diff_options<'a, T: Ord>(desired: &'a [T], current: &'a [T]) -> OptionDiff<'a, T> {
    let mut diff = OptionDiff {
        add: Vec::new(),
        keep: Vec::new(),
        remove: Vec::new(),
    };
    let (mut i, mut j) = (0, 0);

    while i < desired.len() && j < current.len() {
        match desired[i].cmp(&current[j]) {
            std::cmp::Ordering::Less => {
                diff.add.push(&desired[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                diff.remove.push(&current[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                diff.keep.push(&current[j]);
                i += 1;
                j += 1;
            }
        }
    }
    diff.add.extend(&desired[i..]);
    diff.remove.extend(&current[j..]);

    diff
}

// =============================================================================
// Persistence
// =============================================================================

/// Outcome of [`ensure_unit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitChange {
    /// The persisted options already matched.
    Unchanged,
    /// The file was (re)written.
    Written,
    /// The desired set was empty and the file was deleted.
    Removed,
}

impl UnitChange {
    /// Returns true unless the file was left untouched.
    pub fn is_changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Reads the options persisted at `path`.
///
/// A missing file is an empty option set. With `sorted`, the result is in
/// `(section, name, value)` order rather than file order.
pub fn read_unit(path: &Path, sorted: bool) -> Result<Vec<UnitOption>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::unit_io(path, e)),
    };
    let mut options = parse_unit(path, &text)?;
    if sorted {
        options.sort();
    }
    Ok(options)
}

/// Replaces the file at `path` with `options`.
///
/// An empty option list deletes the file instead; deleting a missing file is
/// not an error. Parent directories are created as needed. Options that
/// cannot be written as one `Name=Value` line are rejected.
pub fn write_unit(path: &Path, options: &[UnitOption]) -> Result<UnitChange> {
    if options.is_empty() {
        return match fs::remove_file(path) {
            Ok(()) => Ok(UnitChange::Removed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UnitChange::Unchanged),
            Err(e) => Err(Error::unit_io(path, e)),
        };
    }

    for opt in options {
        opt.validate()?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::unit_io(parent, e))?;
    }
    fs::write(path, serialize_unit(options)).map_err(|e| Error::unit_io(path, e))?;
    Ok(UnitChange::Written)
}

/// Makes the file at `path` hold exactly `desired`, writing only on change.
///
/// Desired options are compared in their canonical form, so a converged
/// file reads back equal to them. Options that cannot be persisted fail with
/// [`Error::InvalidConfig`] before the file is touched.
///
/// When `log` is given, one event per option is emitted inside that span:
/// additions and removals at INFO, kept options at DEBUG.
pub fn ensure_unit(path: &Path, desired: &[UnitOption], log: Option<&Span>) -> Result<UnitChange> {
    let mut desired: Vec<UnitOption> = desired.iter().map(UnitOption::canonical).collect();
    for opt in &desired {
        opt.validate()?;
    }
    desired.sort();
    let current = read_unit(path, true)?;

    let diff = diff_options(&desired, &current);

    if let Some(span) = log {
        span.in_scope(|| {
            let unit = path.display();
            for opt in &diff.add {
                info!(%unit, section = %opt.section, option = %opt.name, value = %opt.value, "add");
            }
            for opt in &diff.keep {
                debug!(%unit, section = %opt.section, option = %opt.name, value = %opt.value, "keep");
            }
            for opt in &diff.remove {
                info!(%unit, section = %opt.section, option = %opt.name, value = %opt.value, "remove");
            }
        });
    }

    if diff.is_empty() {
        return Ok(UnitChange::Unchanged);
    }
    write_unit(path, &desired)
}
