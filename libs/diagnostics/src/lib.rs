//! Issue collection for compiler passes.
//!
//! A pass that can surface several independent problems at once collects
//! them into an [`IssueSet`] instead of stopping at the first one.
//! Orchestration code then decides, based on the set's severity counts,
//! whether compilation may proceed.

#![warn(missing_docs)]


use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

/// An issue that can be reported to users.
pub trait Diagnostic: Debug + Display {
    /// Returns the severity of this issue.
    ///
    /// The default implementation returns [`Severity::default`].
    fn severity(&self) -> Severity {
        Default::default()
    }

    /// Returns an optional message indicating what users can do
    /// to resolve this issue.
    fn help(&self) -> Option<Box<dyn Display>> {
        None
    }
}

/// An enumeration of possible severity levels.
#[derive(
    Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub enum Severity {
    /// An informational message.
    Info,
    /// A warning. Compilation can continue.
    #[default]
    Warning,
    /// An error. Often, but not always, fatal.
    Error,
}

impl Severity {
    /// Returns `true` if the severity is [`Severity::Error`].
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(*self, Self::Error)
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// An ordered collection of issues gathered by one pass.
///
/// Issues are kept in the order they were added, so reports are
/// reproducible across runs of the same pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueSet<T> {
    issues: Vec<T>,
}

impl<T> IssueSet<T> {
    /// Creates a new, empty issue set.
    #[inline]
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Returns an iterator over all issues in the set.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.issues.iter()
    }

    /// The number of issues in this issue set.
    #[inline]
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Returns `true` if this issue set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

impl<T: Diagnostic> IssueSet<T> {
    /// Adds the given issue to the issue set.
    #[inline]
    pub fn add(&mut self, issue: T) {
        self.issues.push(issue);
    }

    /// The number of issues with the given severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity() == severity)
            .count()
    }

    /// Returns `true` if this issue set contains an error.
    pub fn has_error(&self) -> bool {
        self.num_errors() > 0
    }

    /// The number of errors in this issue set.
    #[inline]
    pub fn num_errors(&self) -> usize {
        self.count(Severity::Error)
    }

    /// Returns `true` if this issue set contains a warning.
    pub fn has_warning(&self) -> bool {
        self.num_warnings() > 0
    }

    /// The number of warnings in this issue set.
    #[inline]
    pub fn num_warnings(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// Logs every issue in the set at the tracing level matching its severity.
    pub fn log(&self) {
        for issue in &self.issues {
            match issue.severity() {
                Severity::Info => tracing::info!(%issue),
                Severity::Warning => tracing::warn!(%issue),
                Severity::Error => tracing::error!(%issue),
            }
        }
    }
}

impl<T: Diagnostic> Extend<T> for IssueSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.issues.extend(iter);
    }
}

impl<T: Diagnostic> FromIterator<T> for IssueSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            issues: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for IssueSet<T> {
    type Item = T;
    type IntoIter = <std::vec::Vec<T> as IntoIterator>::IntoIter;
    fn into_iter(self) -> Self::IntoIter {
        self.issues.into_iter()
    }
}

impl<T: Diagnostic> Display for IssueSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for issue in self.issues.iter() {
            writeln!(f, "{}: {}", issue.severity(), issue)?;
        }
        Ok(())
    }
}
