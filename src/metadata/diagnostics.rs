//! Findings that do not abort a build.
//!
//! A method that falls back to dynamic registration, a connector that could not be removed,
//! two DSO names sharing a hash, a dangling entry in a blob index: none of these make the
//! output unusable, but each one is worth reporting. Stages log them through the [`log`]
//! facade (see `warn_diag!`) and record them in a [`Diagnostics`] collector, which the caller
//! inspects afterwards and may promote to a failure.
//!
//! The collector is append-only and backed by `boxcar::Vec`, so the parallel scan, rewrite
//! and blob read tasks share it by reference.
//!
//! ```rust,no_run
//! use peerweave::metadata::diagnostics::{DiagnosticCategory, Diagnostics};
//!
//! let diagnostics = Diagnostics::new();
//! diagnostics.warning(
//!     DiagnosticCategory::Registration,
//!     "MyApp.MainActivity.OnCustom is registered dynamically",
//! );
//!
//! if diagnostics.has_warnings() {
//!     eprint!("{}", diagnostics.summary());
//! }
//! ```

use std::fmt::{self, Write};

/// How serious a recorded finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    /// Output is complete but may behave worse than expected
    Warning,
    /// Part of the input was skipped; output is incomplete
    Error,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Error => "error",
        })
    }
}

/// Stage a finding comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DiagnosticCategory {
    /// Type discovery
    Type,
    /// Registration verdicts and special entry points
    Registration,
    /// Native entry point marking and wrappers
    Marshal,
    /// Connector and callback field removal
    Scaffolding,
    /// Native metadata generation
    Native,
    /// Blob containers
    Blob,
    /// Anything else
    General,
}

/// One recorded finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Seriousness
    pub severity: DiagnosticSeverity,
    /// Originating stage
    pub category: DiagnosticCategory,
    /// What was found, naming the type, method or file involved
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.category, self.message)
    }
}

/// Append-only, thread-safe collection of [`Diagnostic`] values.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: boxcar::Vec<Diagnostic>,
}

impl Diagnostics {
    /// An empty collector
    #[must_use]
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// Records a warning
    pub fn warning(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.record(DiagnosticSeverity::Warning, category, message.into());
    }

    /// Records an error
    pub fn error(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.record(DiagnosticSeverity::Error, category, message.into());
    }

    fn record(&self, severity: DiagnosticSeverity, category: DiagnosticCategory, message: String) {
        self.entries.push(Diagnostic {
            severity,
            category,
            message,
        });
    }

    /// All findings in the order they were recorded
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, diagnostic)| diagnostic)
    }

    /// Number of findings
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.count()
    }

    /// Returns true if anything was recorded
    #[must_use]
    pub fn has_any(&self) -> bool {
        self.count() > 0
    }

    /// Returns true if a warning was recorded
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        self.iter().any(|d| d.severity == DiagnosticSeverity::Warning)
    }

    /// Returns true if an error was recorded
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Number of errors
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.iter().filter(|d| d.severity == DiagnosticSeverity::Error).count()
    }

    /// The recorded warnings
    #[must_use]
    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.severity == DiagnosticSeverity::Warning).collect()
    }

    /// The findings of one stage
    #[must_use]
    pub fn by_category(&self, category: DiagnosticCategory) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.category == category).collect()
    }

    /// One line per finding, errors first, preceded by the totals.
    #[must_use]
    pub fn summary(&self) -> String {
        let errors = self.error_count();
        let mut out = String::new();
        let _ = writeln!(out, "{} error(s), {} warning(s)", errors, self.count() - errors);

        let mut sorted: Vec<&Diagnostic> = self.iter().collect();
        sorted.sort_by(|a, b| b.severity.cmp(&a.severity));
        for diagnostic in sorted {
            let _ = writeln!(out, "  {diagnostic}");
        }
        out
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
