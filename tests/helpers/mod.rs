//! Shared helpers for the integration tests.
#![allow(dead_code)]

use oriel::diag::Severity;
use oriel::driver::{compile_source, Compilation, Options};

/// Compile source text with warnings enabled; panic on a fatal error.
pub fn compile(text: &str) -> Compilation {
    let mut options = Options::default();
    options.warnings = true;
    compile_source(text, &options).expect("compilation should not unwind")
}

/// Compile and require a clean result.
pub fn compile_ok(text: &str) -> Compilation {
    let outcome = compile(text);
    assert_eq!(
        outcome.sink.error_count(),
        0,
        "unexpected errors:\n{}",
        outcome.sink.render_all()
    );
    outcome
}

/// Number of error diagnostics for a source text.
pub fn errors_of(text: &str) -> usize {
    compile(text).sink.error_count()
}

/// Whether compiling produced any warning diagnostics.
pub fn has_warning(text: &str) -> bool {
    compile(text)
        .sink
        .diagnostics()
        .iter()
        .any(|d| d.severity == Severity::Warning)
}
