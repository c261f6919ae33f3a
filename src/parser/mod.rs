//! Parser: Logos lexer and recursive-descent parser for Oriel.
//!
//! The lexer produces tokens with byte offsets; the parser cooks them into
//! positioned tokens and builds the arena tree. The parser assumes nothing
//! about semantics: names are unbound, types are syntactic, and every
//! communication may still sit inside a compound expression.

mod lexer;
#[allow(clippy::module_inception)]
mod parser;

pub use lexer::{tokenize, Lexer, RawToken, TokKind};
pub use parser::{parse, Parser};
