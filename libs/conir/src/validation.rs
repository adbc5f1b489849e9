//! Validation of resolved routes.
//!
//! Ranges constructed through this crate's API uphold their invariants by
//! construction; routes that arrive from elsewhere (deserialized
//! snapshots, or ranges paired with the wrong instance tree) may not.
//! This module checks a batch of resolved send ranges against an instance
//! tree and collects every problem found, so orchestration code can report
//! them all at once.

use std::fmt::Display;

use diagnostics::{Diagnostic, IssueSet, Severity};
use serde::{Deserialize, Serialize};
use tracing::{span, Level};

use crate::{Instance, InstanceTree, Range, SendRange};

/// An issue identified while validating resolved routes.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ValidatorIssue {
    cause: Cause,
    severity: Severity,
}

/// The cause of a validator issue.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Cause {
    /// A range refers to an instance that is not in the tree.
    DanglingInstance {
        /// The identifier that could not be resolved.
        instance: String,
    },
    /// A range extends past the flattened width of its anchor.
    RangeOutOfBounds {
        /// The anchor's fully qualified name.
        instance: String,
        /// The range's start offset.
        start: usize,
        /// The range's width.
        width: usize,
        /// The anchor's flattened width.
        max_width: usize,
    },
    /// A range lists an interleaved level that is not a proper ancestor
    /// of its anchor.
    NotAnAncestor {
        /// The anchor's fully qualified name.
        instance: String,
        /// The level that is not an ancestor.
        level: String,
    },
    /// A destination width that is not an integer multiple of the source
    /// width.
    WidthNotMultiple {
        /// The source port's fully qualified name.
        source: String,
        /// The source range's width.
        source_width: usize,
        /// The destination port's fully qualified name.
        destination: String,
        /// The destination range's width.
        destination_width: usize,
    },
    /// A send range with no destinations: the connection sends to nobody.
    NoDestinations {
        /// The source port's fully qualified name.
        source: String,
    },
}

impl Diagnostic for ValidatorIssue {
    fn severity(&self) -> Severity {
        self.severity
    }
}

impl ValidatorIssue {
    /// Creates a new validator issue from the given cause and severity.
    pub(crate) fn new(cause: Cause, severity: Severity) -> Self {
        Self { cause, severity }
    }

    /// The underlying cause of this issue.
    #[inline]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Creates a new validator issue and logs it immediately.
    ///
    /// The log level is selected according to the given severity.
    pub(crate) fn new_and_log(cause: Cause, severity: Severity) -> Self {
        let result = Self::new(cause, severity);
        match severity {
            Severity::Info => tracing::event!(Level::INFO, issue = ?result.cause, "{}", result),
            Severity::Warning => tracing::event!(Level::WARN, issue = ?result.cause, "{}", result),
            Severity::Error => tracing::event!(Level::ERROR, issue = ?result.cause, "{}", result),
        }
        result
    }
}

impl Display for ValidatorIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cause)
    }
}

impl Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DanglingInstance { instance } => {
                write!(f, "dangling instance: `{instance}` is not in the tree")
            }
            Self::RangeOutOfBounds {
                instance,
                start,
                width,
                max_width,
            } => write!(
                f,
                "range [{start}, {}) exceeds the flattened width {max_width} of `{instance}`",
                start + width
            ),
            Self::NotAnAncestor { instance, level } => write!(
                f,
                "interleaved level `{level}` is not a proper ancestor of `{instance}`"
            ),
            Self::WidthNotMultiple {
                source,
                source_width,
                destination,
                destination_width,
            } => write!(
                f,
                "destination `{destination}` has width {destination_width}, \
                 which is not a multiple of the width {source_width} of source `{source}`"
            ),
            Self::NoDestinations { source } => {
                write!(f, "send range over `{source}` has no destinations")
            }
        }
    }
}

/// Checks a set of resolved send ranges against the given instance tree.
///
/// Every issue found is logged as it is discovered and returned in the
/// issue set; width mismatches and structural inconsistencies are errors,
/// a destination-less send range is a warning.
pub fn validate_routes(tree: &InstanceTree, routes: &[SendRange]) -> IssueSet<ValidatorIssue> {
    let _guard = span!(Level::INFO, "validating resolved routes").entered();
    let mut issues = IssueSet::new();
    for route in routes {
        validate_route(tree, route, &mut issues);
    }
    issues
}

fn validate_route(tree: &InstanceTree, route: &SendRange, issues: &mut IssueSet<ValidatorIssue>) {
    if !validate_range(tree, route.source(), issues) {
        return;
    }
    if route.destinations().is_empty() {
        issues.add(ValidatorIssue::new_and_log(
            Cause::NoDestinations {
                source: route.anchor().full_name(tree),
            },
            Severity::Warning,
        ));
    }
    for destination in route.destinations() {
        if !validate_range(tree, destination, issues) {
            continue;
        }
        if destination.width() % route.width() != 0 {
            issues.add(ValidatorIssue::new_and_log(
                Cause::WidthNotMultiple {
                    source: route.anchor().full_name(tree),
                    source_width: route.width(),
                    destination: destination.anchor().full_name(tree),
                    destination_width: destination.width(),
                },
                Severity::Error,
            ));
        }
    }
}

/// Validates one range; returns `false` if its anchor cannot even be
/// resolved, in which case no further checks against it are possible.
fn validate_range<L: Instance>(
    tree: &InstanceTree,
    range: &Range<L>,
    issues: &mut IssueSet<ValidatorIssue>,
) -> bool {
    let anchor = range.anchor();
    if !anchor.exists(tree) {
        issues.add(ValidatorIssue::new_and_log(
            Cause::DanglingInstance {
                instance: anchor.to_string(),
            },
            Severity::Error,
        ));
        return false;
    }
    let max_width = anchor.max_width(tree);
    if range.end() > max_width {
        issues.add(ValidatorIssue::new_and_log(
            Cause::RangeOutOfBounds {
                instance: anchor.full_name(tree),
                start: range.start(),
                width: range.width(),
                max_width,
            },
            Severity::Error,
        ));
    }
    let ancestors = anchor.ancestors(tree);
    for &level in range.interleaved() {
        if !level.exists(tree) {
            issues.add(ValidatorIssue::new_and_log(
                Cause::DanglingInstance {
                    instance: level.to_string(),
                },
                Severity::Error,
            ));
        } else if !ancestors.contains(&level) {
            issues.add(ValidatorIssue::new_and_log(
                Cause::NotAnAncestor {
                    instance: anchor.full_name(tree),
                    level: level.full_name(tree),
                },
                Severity::Error,
            ));
        }
    }
    true
}
