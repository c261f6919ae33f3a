//! # oriel
//!
//! Compiler core for the Oriel concurrent messaging language.
//!
//! Oriel programs are built from cells, processes, and threads that talk to
//! each other over ports bound to protocols. A protocol is a regular
//! expression over named message fields; the compiler checks every process
//! against the protocols of its ports and lowers the program into numbered
//! basic blocks driven by a cooperative scheduler.
//!
//! ## Module Structure (dependency order)
//!
//! ```text
//! driver    → option surface, pipeline orchestration
//!   ↓
//! gen       → block numbering, basic-block flattening, template emission
//!   ↓
//! lts       → labeled transition systems, protocol refinement
//!   ↓
//! sem       → extraction, name binding, semantic checking
//!   ↓
//! source    → import resolution, literate extraction
//!   ↓
//! parser    → Logos lexer, recursive-descent parser
//!   ↓
//! syntax    → arena syntax tree, node kinds, counters
//!   ↓
//! diag      → diagnostics, severities, fatal errors
//!   ↓
//! base      → primitives (positions, line index, name interning)
//! ```

/// Foundation types: Position, Span, LineIndex, Name interning
pub mod base;

/// Diagnostics: severities, caret rendering, fatal errors
pub mod diag;

/// Syntax: arena tree, node kinds, field table, counters
pub mod syntax;

/// Parser: Logos lexer and recursive-descent parser
pub mod parser;

/// Source loading: imports and literate extraction
pub mod source;

/// Semantic analysis: extraction, binding, checking
pub mod sem;

/// Labeled transition systems and protocol refinement
pub mod lts;

/// Code preparation: numbering, basic blocks, template emission
pub mod gen;

/// Driver: option surface and pipeline orchestration
pub mod driver;

// Re-export foundation types
pub use base::{Interner, LineIndex, Name, Position, Span};
pub use diag::{DiagnosticSink, Fatal, Severity};
pub use syntax::{Ast, NodeId};
