//! Foundation types for the Oriel compiler.
//!
//! This module provides fundamental types used throughout the compiler:
//! - [`Position`], [`Span`] - Line/column positions for tree nodes
//! - [`LineIndex`] - Byte offset to line/column conversion
//! - [`Name`], [`Interner`] - String interning
//!
//! This module has NO dependencies on other oriel modules.

mod intern;
mod line_index;
mod position;

pub use intern::{Interner, Name};
pub use line_index::LineIndex;
pub use position::{Position, Span};

// Re-export text-size types for convenience
pub use text_size::{TextRange, TextSize};
