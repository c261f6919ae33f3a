//! Semantic analysis.
//!
//! Three passes, each walking the tree once in order:
//!
//! 1. [`extract`] rewrites expressions so that no receive or query
//!    appears below another operator;
//! 2. [`bind`] links every name use to its definition along the scope
//!    chain;
//! 3. [`check`] infers and coerces types, enforces enum, map, and port
//!    rules, matches instances against their declarations, and verifies
//!    protocol conformance.

pub mod bind;
pub mod check;
pub mod extract;
pub mod funcs;

pub use bind::{bind, Binder};
pub use check::{check, CheckData, Checker, ProtocolEntry, ProtocolMap};
pub use extract::extract;
pub use funcs::{Conversion, FuncDef, FuncTable, ParamTy, MAX_CONV};
