//! Syntax — the arena tree shared by every compiler stage.
//!
//! The tree is a heterogeneous structure stored in one arena ([`Ast`]);
//! nodes are addressed by [`NodeId`], which doubles as the identity-stable
//! sequence number assigned at construction. Stages mutate node payloads
//! through the arena instead of re-building the tree.
//!
//! Field names shared between protocols wired through a port are kept in a
//! union-find table ([`FieldTable`]) instead of the circular tie lists a
//! pointer-based tree would need: joining two rings is a `union`, reading
//! the shared field number is a `find`.

mod ast;
mod fields;
mod queries;
mod tree;

pub use ast::{
    BinOp, CommKind, FileMode, IterFun, MapKind, MessageKind, Node, NodeKind, Policy, PortRole,
    ProtoOp, SetKind, UnOp, NO_LABEL,
};
pub use fields::{FieldId, FieldTable};
pub use tree::{Ast, Counters, NodeId};
