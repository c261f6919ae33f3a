//! Code preparation and lowering.
//!
//! Three steps, in order:
//!
//! 1. the numbering pass ([`number`]) assigns block labels, closure type
//!    ordinals, variable ordinals, field numbers, and owner names;
//! 2. flattening ([`flatten`]) lowers the tree into numbered basic blocks
//!    with explicit successor addresses, then removes dead and empty
//!    blocks;
//! 3. emission ([`emit`]) interleaves the block lists with sections of
//!    the runtime-support template.

mod blocks;
mod emit;
mod numbering;
mod template;

pub use blocks::{flatten, optimize, BasicBlock, BlockList};
pub use emit::{emit, render, write_blocks};
pub use numbering::{number, GenData};
pub use template::{Template, RUNTIME_VERSION};
