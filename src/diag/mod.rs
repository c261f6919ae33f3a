//! Diagnostics — error and warning reporting.
//!
//! The compiler distinguishes two classes of trouble:
//!
//! - *Recoverable* diagnostics are recorded in a [`DiagnosticSink`] and
//!   increment an error counter; compilation continues so more errors can
//!   be reported. After each stage the driver consults the counter and
//!   skips the remaining stages if it is non-zero.
//! - *Fatal* errors ([`Fatal`]) unwind the current stage through `Result`.
//!   They are used where continuing would corrupt the tree, e.g. an
//!   unresolvable name during binding, and for internal invariant
//!   violations ("emergency stop").
//!
//! Each rendered diagnostic shows the offending source line with a caret
//! under the column, followed by the message.

use std::fmt::Write as _;

use crate::base::Position;

// ============================================================================
// DIAGNOSTIC TYPES
// ============================================================================

/// Severity level of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Error)
    }
}

/// A diagnostic message with an optional source location.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub position: Option<Position>,
    pub message: String,
}

/// A fatal error that unwinds the current compilation stage.
#[derive(Debug, thiserror::Error)]
pub enum Fatal {
    /// A diagnostic severe enough to abandon the stage. The message has
    /// already been recorded in the sink.
    #[error("{0}")]
    Stage(String),

    /// An internal invariant was violated during a traversal.
    #[error("emergency stop: {node} has no {method}")]
    Internal { node: String, method: String },

    /// File system trouble while reading sources or the runtime template.
    #[error("{0}")]
    Io(String),
}

/// Raise an emergency stop for a node that does not support an operation.
pub fn emergency_stop(node: impl Into<String>, method: impl Into<String>) -> Fatal {
    Fatal::Internal {
        node: node.into(),
        method: method.into(),
    }
}

// ============================================================================
// SINK
// ============================================================================

/// Collects diagnostics for one compilation and renders them.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    /// Source lines of the combined compilation unit, for caret rendering.
    lines: Vec<String>,
    diagnostics: Vec<Diagnostic>,
    errors: usize,
    /// Protocol-conformance warnings are emitted only when enabled.
    pub warnings_enabled: bool,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that can render carets against the given source text.
    pub fn with_source(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_owned).collect(),
            ..Self::default()
        }
    }

    /// Replace the source text used for caret rendering.
    pub fn set_source(&mut self, text: &str) {
        self.lines = text.lines().map(str::to_owned).collect();
    }

    /// Record a recoverable error at a position.
    pub fn error(&mut self, position: Position, message: impl Into<String>) {
        self.errors += 1;
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            position: Some(position),
            message: message.into(),
        });
    }

    /// Record a recoverable error with no position.
    pub fn error_global(&mut self, message: impl Into<String>) {
        self.errors += 1;
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            position: None,
            message: message.into(),
        });
    }

    /// Record a warning. Warnings never increment the error counter.
    pub fn warning(&mut self, position: Position, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            position: Some(position),
            message: message.into(),
        });
    }

    /// Record a warning with no position.
    pub fn warning_global(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            position: None,
            message: message.into(),
        });
    }

    /// Record an error and build the fatal value that unwinds the stage.
    pub fn fatal(&mut self, position: Position, message: impl Into<String>) -> Fatal {
        let message = message.into();
        self.error(position, message.clone());
        Fatal::Stage(message)
    }

    /// The number of errors recorded so far.
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// All diagnostics recorded so far.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Render one diagnostic: the source line, a caret, then the message.
    pub fn render(&self, diagnostic: &Diagnostic) -> String {
        let mut out = String::new();
        if let Some(pos) = diagnostic.position {
            if let Some(line) = self.lines.get(pos.line) {
                let _ = writeln!(out, "{:4}: {}", pos.line + 1, line);
                let _ = writeln!(out, "      {}^", " ".repeat(pos.column));
            }
        }
        let _ = write!(out, "{}: {}", diagnostic.severity.as_str(), diagnostic.message);
        out
    }

    /// Render every diagnostic, one per paragraph.
    pub fn render_all(&self) -> String {
        self.diagnostics
            .iter()
            .map(|d| self.render(d))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_count_warnings_do_not() {
        let mut sink = DiagnosticSink::new();
        sink.warning(Position::new(0, 0), "odd but legal");
        assert_eq!(sink.error_count(), 0);
        sink.error(Position::new(0, 0), "broken");
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn caret_lands_under_column() {
        let mut sink = DiagnosticSink::with_source("abc def\n");
        sink.error(Position::new(0, 4), "bad name");
        let rendered = sink.render(&sink.diagnostics()[0]);
        let caret_line = rendered.lines().nth(1).unwrap();
        assert_eq!(caret_line, "          ^");
    }

    #[test]
    fn fatal_records_the_error() {
        let mut sink = DiagnosticSink::new();
        let fatal = sink.fatal(Position::new(2, 1), "name is not defined");
        assert_eq!(sink.error_count(), 1);
        assert!(matches!(fatal, Fatal::Stage(_)));
    }
}
