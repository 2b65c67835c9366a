//! Accumulating diagnostics.
//!
//! Graph execution never stops at the first problem: every operation reports
//! its own [`Diagnostics`] and the runtime gathers them all, so independent
//! parts of the graph still complete and the final outcome carries every
//! problem that was found.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// The operation did not achieve its goal.
    Error,
    /// Worth reporting, but the operation succeeded.
    Warning,
}

/// Which class of problem a diagnostic describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Problems reported by providers or the configuration evaluator.
    General,
    /// The execution graph is malformed or inconsistent with the evaluator.
    InvalidGraph,
    /// A stored object could not be decoded or saved.
    InvalidState,
    /// A provider broke its contract, for example by returning an
    /// inconsistent result.
    ProviderBug,
    /// An engine invariant was violated. Always an error.
    Internal,
    /// The operation never ran because the apply was cancelled.
    Cancelled,
}

/// A single problem report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// How serious the problem is
    pub severity: Severity,
    /// Which class of problem this is
    pub kind: DiagnosticKind,
    /// One-line summary
    pub summary: String,
    /// Full explanation
    pub detail: String,
}

impl Diagnostic {
    /// Creates an error diagnostic.
    pub fn error(kind: DiagnosticKind, summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            summary: summary.into(),
            detail: detail.into(),
        }
    }

    /// Creates a warning diagnostic.
    pub fn warning(kind: DiagnosticKind, summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            summary: summary.into(),
            detail: detail.into(),
        }
    }

    /// Creates an engine-bug diagnostic. The detail is labelled so that
    /// nobody mistakes it for a configuration or provider problem.
    pub fn internal(summary: impl Into<String>, detail: impl AsRef<str>) -> Self {
        Self::error(
            DiagnosticKind::Internal,
            summary,
            format!("{}\n\nThis is a bug in the apply engine.", detail.as_ref()),
        )
    }

    /// Wraps any error as a general error diagnostic.
    pub fn from_error(err: &(dyn std::error::Error + '_)) -> Self {
        let mut detail = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            detail.push_str(": ");
            detail.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::error(DiagnosticKind::General, err.to_string(), detail)
    }

    /// Returns true for error diagnostics.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
        };
        if self.detail.is_empty() {
            write!(f, "{label}: {}", self.summary)
        } else {
            write!(f, "{label}: {}\n\n{}", self.summary, self.detail)
        }
    }
}

/// An ordered collection of diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    /// Creates an empty collection.
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds one diagnostic.
    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    /// Moves every diagnostic from `other` into this collection.
    pub fn append(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Returns true if any diagnostic is an error.
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    /// Returns true if there are no diagnostics at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of diagnostics.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the diagnostics in the order they were added.
    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    /// Iterates over error diagnostics only.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    /// Iterates over diagnostics of one kind.
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(move |d| d.kind == kind)
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, diag) in self.0.iter().enumerate() {
            if idx != 0 {
                writeln!(f)?;
                writeln!(f)?;
            }
            write!(f, "{diag}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AddrParseError, StateError, ValueError};

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::warning(DiagnosticKind::ProviderBug, "odd", "but tolerated"));
        assert!(!diags.has_errors());
        assert!(!diags.is_empty());

        diags.push(Diagnostic::error(DiagnosticKind::General, "bad", ""));
        assert!(diags.has_errors());
        assert_eq!(diags.errors().count(), 1);
    }

    #[test]
    fn internal_diagnostics_are_labelled_as_engine_bugs() {
        let diag = Diagnostic::internal("Failed to restore deposed object", "could not restore it");
        assert_eq!(diag.kind, DiagnosticKind::Internal);
        assert!(diag.is_error());
        assert!(diag.detail.ends_with("This is a bug in the apply engine."));
    }

    #[test]
    fn from_error_includes_the_source_chain() {
        let err = StateError::InvalidValue {
            object: "aws_instance.a".to_string(),
            source: ValueError::Unknown {
                path: ".id".to_string(),
            },
        };
        let diag = Diagnostic::from_error(&err);
        assert_eq!(diag.kind, DiagnosticKind::General);
        assert!(diag.detail.contains(".id: value is not yet known"));
    }

    #[test]
    fn append_preserves_order() {
        let mut first = Diagnostics::from(Diagnostic::from_error(&AddrParseError::InvalidName("1x".into())));
        let second: Diagnostics = vec![
            Diagnostic::warning(DiagnosticKind::General, "w1", ""),
            Diagnostic::warning(DiagnosticKind::General, "w2", ""),
        ]
        .into_iter()
        .collect();
        first.append(second);

        let summaries: Vec<_> = first.iter().map(|d| d.summary.clone()).collect();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[1], "w1");
        assert_eq!(summaries[2], "w2");
    }

    #[test]
    fn display_separates_diagnostics() {
        let diags: Diagnostics = vec![
            Diagnostic::error(DiagnosticKind::General, "first", "one"),
            Diagnostic::warning(DiagnosticKind::General, "second", ""),
        ]
        .into_iter()
        .collect();
        assert_eq!(diags.to_string(), "Error: first\n\none\n\nWarning: second");
    }
}
