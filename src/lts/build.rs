//! LTS construction from protocol expressions and process bodies.
//!
//! Both constructions are compositional. Protocol operators map directly
//! onto LTS shapes; process statements generate transitions only for dot
//! and query operations on the port under scrutiny, everything else
//! becoming a silent transition that collapse removes.

use crate::base::Name;
use crate::syntax::{Ast, NodeId, NodeKind, ProtoOp};

use super::{Label, Lts, StateGen};

/// Build the LTS of a protocol expression, collecting the field
/// declarations encountered along the way.
pub fn protocol_graph(
    ast: &Ast,
    expr: NodeId,
    gen: &mut StateGen,
    fields: &mut Vec<NodeId>,
) -> Lts {
    match ast.kind(expr) {
        // A field declaration: one labeled transition.
        NodeKind::Dec { name, .. } => {
            fields.push(expr);
            let label = ast
                .name_text(*name)
                .cloned()
                .unwrap_or_else(|| Name::new("?"));
            let mut lts = Lts::new(gen);
            let (s, f) = (lts.start(), lts.finish());
            lts.insert(s, f, Label::Field(label));
            lts
        }

        NodeKind::ProtoRep { op, operand } => match op {
            // ?p: p alongside a direct wildcard branch.
            ProtoOp::Opt => {
                let inner = protocol_graph(ast, *operand, gen, fields);
                let mut lts = Lts::new(gen);
                lts.adopt(&inner);
                let (s, f) = (lts.start(), lts.finish());
                lts.insert(s, inner.start(), Label::Silent);
                lts.insert(inner.finish(), f, Label::Silent);
                lts.insert(s, f, Label::Wildcard);
                lts
            }
            // *p: one copy plus a back edge.
            ProtoOp::Many => {
                let mut lts = protocol_graph(ast, *operand, gen, fields);
                let (s, f) = (lts.start(), lts.finish());
                lts.insert(f, s, Label::Silent);
                lts
            }
            // +p: two copies in sequence, the second looping.
            ProtoOp::More => {
                let first = protocol_graph(ast, *operand, gen, fields);
                let second = protocol_graph(ast, *operand, gen, fields);
                let mut lts = Lts::new(gen);
                lts.adopt(&first);
                lts.adopt(&second);
                let (s, f) = (lts.start(), lts.finish());
                lts.insert(s, first.start(), Label::Silent);
                lts.insert(first.finish(), second.start(), Label::Silent);
                lts.insert(second.finish(), second.start(), Label::Silent);
                lts.insert(second.finish(), f, Label::Silent);
                lts
            }
        },

        // p ; q ; ...: concatenate, identifying finishes with starts.
        NodeKind::ProtoSeq { parts } => {
            let mut lts = Lts::new(gen);
            let mut state = lts.start();
            for &part in parts {
                let inner = protocol_graph(ast, part, gen, fields);
                lts.adopt(&inner);
                lts.insert(state, inner.start(), Label::Silent);
                state = inner.finish();
            }
            let f = lts.finish();
            lts.insert(state, f, Label::Silent);
            lts
        }

        // p | q | ...: branches share start and finish.
        NodeKind::ProtoAlt { parts } => {
            let mut lts = Lts::new(gen);
            for &part in parts {
                let inner = protocol_graph(ast, part, gen, fields);
                lts.adopt(&inner);
                let (s, f) = (lts.start(), lts.finish());
                lts.insert(s, inner.start(), Label::Silent);
                lts.insert(inner.finish(), f, Label::Silent);
            }
            lts
        }

        _ => Lts::unit(gen),
    }
}

/// Build the LTS of a process body as seen through one port declaration.
///
/// Transitions are generated only for dot and query operations whose port
/// resolves to `port_dec`; every other statement contributes a silent
/// transition. `loop_end` is the finish state of the nearest enclosing
/// loop, the target of `exit`.
pub fn process_graph(
    ast: &Ast,
    node: NodeId,
    port_dec: NodeId,
    gen: &mut StateGen,
    loop_end: Option<u32>,
) -> Lts {
    match ast.kind(node) {
        NodeKind::Sequence { stmts } => {
            let mut lts = Lts::new(gen);
            let mut state = lts.start();
            for &stmt in stmts {
                let inner = process_graph(ast, stmt, port_dec, gen, loop_end);
                lts.adopt(&inner);
                lts.insert(state, inner.start(), Label::Silent);
                state = inner.finish();
            }
            let f = lts.finish();
            lts.insert(state, f, Label::Silent);
            lts
        }

        NodeKind::If { arms, alt, .. } => {
            let mut lts = Lts::new(gen);
            for &arm in arms {
                let inner = process_graph(ast, arm, port_dec, gen, loop_end);
                lts.adopt(&inner);
                let (s, f) = (lts.start(), lts.finish());
                lts.insert(s, inner.start(), Label::Silent);
                lts.insert(inner.finish(), f, Label::Silent);
            }
            let empty_alt = matches!(ast.kind(*alt), NodeKind::Sequence { stmts } if stmts.is_empty());
            let (s, f) = (lts.start(), lts.finish());
            if empty_alt {
                // The implicit skip branch is "anything else".
                lts.insert(s, f, Label::Wildcard);
            } else {
                let inner = process_graph(ast, *alt, port_dec, gen, loop_end);
                lts.adopt(&inner);
                lts.insert(s, inner.start(), Label::Silent);
                lts.insert(inner.finish(), f, Label::Silent);
            }
            lts
        }

        NodeKind::CondArm { cond, body, .. } => {
            let mut lts = Lts::new(gen);
            let cond_lts = process_graph(ast, *cond, port_dec, gen, loop_end);
            let body_lts = process_graph(ast, *body, port_dec, gen, loop_end);
            lts.adopt(&cond_lts);
            lts.adopt(&body_lts);
            let (s, f) = (lts.start(), lts.finish());
            lts.insert(s, cond_lts.start(), Label::Silent);
            lts.insert(cond_lts.finish(), body_lts.start(), Label::Silent);
            lts.insert(body_lts.finish(), f, Label::Silent);
            lts
        }

        NodeKind::Loop { body, .. } => {
            let lts_shell = Lts::new(gen);
            let inner = process_graph(ast, *body, port_dec, gen, Some(lts_shell.finish()));
            let mut lts = lts_shell;
            lts.adopt(&inner);
            let s = lts.start();
            lts.insert(s, inner.start(), Label::Silent);
            lts.insert(inner.finish(), inner.start(), Label::Silent);
            lts
        }

        NodeKind::Exit { .. } => {
            let mut lts = Lts::new(gen);
            match loop_end {
                Some(end) => {
                    let s = lts.start();
                    lts.insert(s, end, Label::Silent);
                }
                None => {
                    // exit outside a loop is rejected during checking.
                }
            }
            lts
        }

        NodeKind::Select { options, .. } => {
            let mut lts = Lts::new(gen);
            for &option in options {
                let inner = process_graph(ast, option, port_dec, gen, loop_end);
                lts.adopt(&inner);
                let (s, f) = (lts.start(), lts.finish());
                lts.insert(s, inner.start(), Label::Silent);
                lts.insert(inner.finish(), f, Label::Silent);
            }
            lts
        }

        NodeKind::SelectOption { body, .. } => process_graph(ast, *body, port_dec, gen, loop_end),

        NodeKind::Dot { port, field } | NodeKind::Query { port, field, .. } => {
            if ast.definition(*port) == Some(port_dec) {
                let label = ast
                    .name_text(*field)
                    .cloned()
                    .unwrap_or_else(|| Name::new("?"));
                let mut lts = Lts::new(gen);
                let (s, f) = (lts.start(), lts.finish());
                lts.insert(s, f, Label::Field(label));
                lts
            } else {
                Lts::unit(gen)
            }
        }

        NodeKind::Dec {
            name, ty, value, ..
        } => match (ty, value) {
            // v : T := e - only e can communicate.
            (Some(_), Some(value)) => process_graph(ast, *value, port_dec, gen, loop_end),
            // v : T - nothing to check.
            (Some(_), None) => Lts::unit(gen),
            // v := e - both sides may communicate.
            (None, Some(value)) => {
                let mut lts = Lts::new(gen);
                let name_lts = process_graph(ast, *name, port_dec, gen, loop_end);
                let value_lts = process_graph(ast, *value, port_dec, gen, loop_end);
                lts.adopt(&name_lts);
                lts.adopt(&value_lts);
                let (s, f) = (lts.start(), lts.finish());
                lts.insert(s, name_lts.start(), Label::Silent);
                lts.insert(name_lts.finish(), value_lts.start(), Label::Silent);
                lts.insert(value_lts.finish(), f, Label::Silent);
                lts
            }
            // p.s - a signal.
            (None, None) => process_graph(ast, *name, port_dec, gen, loop_end),
        },

        NodeKind::Binop { lhs, rhs, .. } => {
            let mut lts = Lts::new(gen);
            let lhs_lts = process_graph(ast, *lhs, port_dec, gen, loop_end);
            let rhs_lts = process_graph(ast, *rhs, port_dec, gen, loop_end);
            lts.adopt(&lhs_lts);
            lts.adopt(&rhs_lts);
            let (s, f) = (lts.start(), lts.finish());
            lts.insert(s, lhs_lts.start(), Label::Silent);
            lts.insert(lhs_lts.finish(), rhs_lts.start(), Label::Silent);
            lts.insert(rhs_lts.finish(), f, Label::Silent);
            lts
        }

        NodeKind::Unop { operand, .. } => process_graph(ast, *operand, port_dec, gen, loop_end),

        NodeKind::Subscript { index, .. } => process_graph(ast, *index, port_dec, gen, loop_end),

        NodeKind::Call { args, .. } => {
            let mut lts = Lts::new(gen);
            let mut state = lts.start();
            for &arg in args {
                let inner = process_graph(ast, arg, port_dec, gen, loop_end);
                lts.adopt(&inner);
                lts.insert(state, inner.start(), Label::Silent);
                state = inner.finish();
            }
            let f = lts.finish();
            lts.insert(state, f, Label::Silent);
            lts
        }

        _ => Lts::unit(gen),
    }
}
