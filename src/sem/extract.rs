//! Communication extraction.
//!
//! Rewrites the tree so that no receive or query subexpression appears
//! below another operator. Wherever a dot or query sits inside a compound
//! expression, a fresh temporary is declared immediately before the
//! containing statement:
//!
//! ```text
//! x := p.a + 1        ==>        ioTemp1 := p.a; x := ioTemp1 + 1
//! ```
//!
//! Applied bottom-up, so one statement may expand into several. After
//! this pass every communication is a top-level statement and therefore
//! owns a well-defined basic-block position. Running the pass twice
//! produces the same tree as running it once: a hoisted communication is
//! the direct initializer of its temporary and is never hoisted again.

use crate::base::Name;
use crate::diag::DiagnosticSink;
use crate::syntax::{Ast, CommKind, MessageKind, NodeId, NodeKind, PortRole, NO_LABEL};

/// Run extraction over a whole program.
pub fn extract(ast: &mut Ast, sink: &mut DiagnosticSink, program: NodeId) {
    let mut extractor = Extractor {
        ast,
        sink,
        temps: 0,
    };
    extractor.walk(program);
}

struct Extractor<'a> {
    ast: &'a mut Ast,
    sink: &'a mut DiagnosticSink,
    temps: u32,
}

impl<'a> Extractor<'a> {
    /// Walk a node, returning the statements that must be inserted before
    /// the containing statement.
    fn walk(&mut self, id: NodeId) -> Vec<NodeId> {
        match self.ast.kind(id).clone() {
            NodeKind::Program { items } => {
                for item in items {
                    self.walk(item);
                }
                Vec::new()
            }
            NodeKind::Define { value, .. } => self.walk(value),
            NodeKind::Process { body, .. }
            | NodeKind::Procedure { body, .. }
            | NodeKind::Thread { body, .. } => self.walk(body),
            NodeKind::Cell { instances, .. } => {
                for instance in instances {
                    self.walk(instance);
                }
                Vec::new()
            }

            NodeKind::Sequence { mut stmts } => {
                let mut index = 0;
                while index < stmts.len() {
                    let subs = self.walk(stmts[index]);
                    let count = subs.len();
                    for (offset, sub) in subs.into_iter().enumerate() {
                        stmts.insert(index + offset, sub);
                    }
                    index += count + 1;
                }
                if let NodeKind::Sequence { stmts: slot } = self.ast.kind_mut(id) {
                    *slot = stmts;
                }
                Vec::new()
            }

            NodeKind::If { arms, alt, .. } => {
                for arm in arms {
                    self.walk(arm);
                }
                self.walk(alt)
            }

            NodeKind::CondArm { cond, body, .. } => {
                let (new_cond, mut decs) = self.hoist(cond);
                if let NodeKind::CondArm {
                    cond: cond_slot,
                    decs: decs_slot,
                    ..
                } = self.ast.kind_mut(id)
                {
                    *cond_slot = new_cond;
                    decs_slot.append(&mut decs);
                }
                self.walk(body)
            }

            NodeKind::Loop { body, .. } | NodeKind::For { body, .. } => self.walk(body),

            NodeKind::Any { body, alt, .. } => {
                self.walk(body);
                self.walk(alt)
            }

            NodeKind::Select { options, .. } => {
                for option in options {
                    self.walk(option);
                }
                Vec::new()
            }

            NodeKind::SelectOption { body, .. } => self.walk(body),

            NodeKind::Start { body, .. } => self.walk(body),

            NodeKind::Dec {
                name, ty, value, ..
            } => {
                let mut subs = Vec::new();
                if let Some(ty) = ty {
                    subs.extend(self.walk(ty));
                }
                if let Some(value) = value {
                    let name_is_dot = matches!(self.ast.kind(name), NodeKind::Dot { .. });
                    let value_is_dot = matches!(self.ast.kind(value), NodeKind::Dot { .. });
                    if name_is_dot && value_is_dot {
                        // Both sides communicate: split into a receive into
                        // a temporary followed by a send of the temporary.
                        let (new_value, mut decs) = self.hoist(value);
                        subs.append(&mut decs);
                        if let NodeKind::Dec { value: slot, .. } = self.ast.kind_mut(id) {
                            *slot = Some(new_value);
                        }
                    } else {
                        subs.extend(self.walk(value));
                    }
                }
                subs
            }

            NodeKind::Binop { lhs, rhs, .. } => {
                let (new_lhs, mut subs) = self.hoist(lhs);
                let (new_rhs, mut right) = self.hoist(rhs);
                subs.append(&mut right);
                if let NodeKind::Binop {
                    lhs: lhs_slot,
                    rhs: rhs_slot,
                    ..
                } = self.ast.kind_mut(id)
                {
                    *lhs_slot = new_lhs;
                    *rhs_slot = new_rhs;
                }
                subs
            }

            NodeKind::Unop { operand, .. } => {
                let (new_operand, subs) = self.hoist(operand);
                if let NodeKind::Unop { operand: slot, .. } = self.ast.kind_mut(id) {
                    *slot = new_operand;
                }
                subs
            }

            NodeKind::Subscript { index, .. } => {
                // Only the index is hoisted; the base stays in place.
                let (new_index, subs) = self.hoist(index);
                if let NodeKind::Subscript { index: slot, .. } = self.ast.kind_mut(id) {
                    *slot = new_index;
                }
                subs
            }

            NodeKind::Subrange { lo, hi, .. } => {
                let (new_lo, mut subs) = self.hoist(lo);
                let (new_hi, mut right) = self.hoist(hi);
                subs.append(&mut right);
                if let NodeKind::Subrange {
                    lo: lo_slot,
                    hi: hi_slot,
                    ..
                } = self.ast.kind_mut(id)
                {
                    *lo_slot = new_lo;
                    *hi_slot = new_hi;
                }
                subs
            }

            NodeKind::IterOp { map, .. } => {
                let (new_map, subs) = self.hoist(map);
                if let NodeKind::IterOp { map: slot, .. } = self.ast.kind_mut(id) {
                    *slot = new_map;
                }
                subs
            }

            NodeKind::CondExpr { lhs, pred, rhs, .. } => {
                // A conditional expression whose arms both communicate has
                // no agreed evaluation order; reject it instead of
                // guessing one.
                if self.contains_comm(lhs) && self.contains_comm(rhs) {
                    let pos = self.ast.pos(id);
                    self.sink.error(
                        pos,
                        "both arms of a conditional expression communicate; \
                         assign the messages to variables first",
                    );
                    return Vec::new();
                }
                let (new_lhs, mut subs) = self.hoist(lhs);
                let (new_rhs, mut arm) = self.hoist(rhs);
                subs.append(&mut arm);
                let (new_pred, mut pred_subs) = self.hoist(pred);
                subs.append(&mut pred_subs);
                if let NodeKind::CondExpr {
                    lhs: lhs_slot,
                    pred: pred_slot,
                    rhs: rhs_slot,
                    ..
                } = self.ast.kind_mut(id)
                {
                    *lhs_slot = new_lhs;
                    *pred_slot = new_pred;
                    *rhs_slot = new_rhs;
                }
                subs
            }

            NodeKind::Call { args, .. } => {
                let mut subs = Vec::new();
                let mut new_args = Vec::with_capacity(args.len());
                for arg in args {
                    let (new_arg, mut more) = self.hoist(arg);
                    new_args.push(new_arg);
                    subs.append(&mut more);
                }
                if let NodeKind::Call { args: slot, .. } = self.ast.kind_mut(id) {
                    *slot = new_args;
                }
                subs
            }

            NodeKind::Instance { args, .. } => {
                let mut subs = Vec::new();
                let mut new_args = Vec::with_capacity(args.len());
                for arg in args {
                    let (new_arg, mut more) = self.hoist(arg);
                    new_args.push(new_arg);
                    subs.append(&mut more);
                }
                if let NodeKind::Instance { args: slot, .. } = self.ast.kind_mut(id) {
                    *slot = new_args;
                }
                subs
            }

            NodeKind::ThreadCall {
                inputs, outputs, ..
            } => {
                let mut subs = Vec::new();
                let mut new_inputs = Vec::with_capacity(inputs.len());
                for input in inputs {
                    let (new_input, mut more) = self.hoist(input);
                    new_inputs.push(new_input);
                    subs.append(&mut more);
                }
                let mut new_outputs = Vec::with_capacity(outputs.len());
                for output in outputs {
                    let (new_output, mut more) = self.hoist(output);
                    new_outputs.push(new_output);
                    subs.append(&mut more);
                }
                if let NodeKind::ThreadCall {
                    inputs: in_slot,
                    outputs: out_slot,
                    ..
                } = self.ast.kind_mut(id)
                {
                    *in_slot = new_inputs;
                    *out_slot = new_outputs;
                }
                subs
            }

            NodeKind::ArrayType { lo, hi, .. } => {
                let (new_lo, mut subs) = self.hoist(lo);
                let (new_hi, mut right) = self.hoist(hi);
                subs.append(&mut right);
                if let NodeKind::ArrayType {
                    lo: lo_slot,
                    hi: hi_slot,
                    ..
                } = self.ast.kind_mut(id)
                {
                    *lo_slot = new_lo;
                    *hi_slot = new_hi;
                }
                subs
            }

            _ => Vec::new(),
        }
    }

    /// Hoist an expression position. A dot or query becomes a fresh
    /// temporary initialized by the communication; anything else recurses.
    fn hoist(&mut self, expr: NodeId) -> (NodeId, Vec<NodeId>) {
        if matches!(
            self.ast.kind(expr),
            NodeKind::Dot { .. } | NodeKind::Query { .. }
        ) {
            self.temps += 1;
            let var_name = format!("ioTemp{}", self.temps);
            let pos = self.ast.pos(expr);
            let def_name = self.ast.alloc(
                pos,
                NodeKind::Name {
                    text: Name::new(&var_name),
                    defining: true,
                    definition: None,
                    owner: Name::default(),
                    var_num: NO_LABEL,
                    field: None,
                    by_reference: false,
                },
            );
            let dec = self.ast.alloc(
                pos,
                NodeKind::Dec {
                    name: def_name,
                    ty: None,
                    value: Some(expr),
                    role: PortRole::None,
                    msg: MessageKind::None,
                    generated: true,
                    constant: false,
                    moved: false,
                    alias: false,
                    parameter: false,
                    reference: false,
                    comm: CommKind::None,
                    transfer: NO_LABEL,
                    temp_num: NO_LABEL,
                    branch: false,
                },
            );
            let use_name = self.ast.alloc(
                pos,
                NodeKind::Name {
                    text: Name::new(&var_name),
                    defining: false,
                    definition: None,
                    owner: Name::default(),
                    var_num: NO_LABEL,
                    field: None,
                    by_reference: false,
                },
            );
            (use_name, vec![dec])
        } else {
            (expr, self.walk(expr))
        }
    }

    /// Whether any dot or query occurs in the subtree.
    fn contains_comm(&self, id: NodeId) -> bool {
        match self.ast.kind(id) {
            NodeKind::Dot { .. } | NodeKind::Query { .. } => true,
            NodeKind::Binop { lhs, rhs, .. } => {
                self.contains_comm(*lhs) || self.contains_comm(*rhs)
            }
            NodeKind::Unop { operand, .. } => self.contains_comm(*operand),
            NodeKind::CondExpr { lhs, pred, rhs, .. } => {
                self.contains_comm(*lhs)
                    || self.contains_comm(*pred)
                    || self.contains_comm(*rhs)
            }
            NodeKind::Call { args, .. } => args.iter().any(|&a| self.contains_comm(a)),
            NodeKind::Subscript { base, index, .. } => {
                self.contains_comm(*base) || self.contains_comm(*index)
            }
            NodeKind::Subrange { base, lo, hi, .. } => {
                self.contains_comm(*base) || self.contains_comm(*lo) || self.contains_comm(*hi)
            }
            NodeKind::IterOp { map, .. } => self.contains_comm(*map),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn parse_and_extract(text: &str) -> (Ast, NodeId, DiagnosticSink) {
        let mut ast = Ast::new();
        let mut sink = DiagnosticSink::with_source(text);
        let program = parser::parse(text, &mut ast, &mut sink).unwrap();
        extract(&mut ast, &mut sink, program);
        (ast, program, sink)
    }

    fn process_stmts(ast: &Ast, program: NodeId) -> Vec<NodeId> {
        let NodeKind::Program { items } = ast.kind(program) else {
            panic!()
        };
        for &item in items {
            if let NodeKind::Define { value, .. } = ast.kind(item) {
                if let NodeKind::Process { body, .. } = ast.kind(*value) {
                    let NodeKind::Sequence { stmts } = ast.kind(*body) else {
                        panic!()
                    };
                    return stmts.clone();
                }
            }
        }
        panic!("no process found");
    }

    #[test]
    fn receive_in_sum_is_hoisted() {
        let (ast, program, _) = parse_and_extract("Q = process p : -P | x := p.a + 1 end");
        let stmts = process_stmts(&ast, program);
        assert_eq!(stmts.len(), 2);
        // First: ioTemp1 := p.a
        let NodeKind::Dec {
            generated: true,
            value: Some(v),
            ..
        } = ast.kind(stmts[0])
        else {
            panic!("expected generated declaration first");
        };
        assert!(matches!(ast.kind(*v), NodeKind::Dot { .. }));
        // Second: x := ioTemp1 + 1
        let NodeKind::Dec { value: Some(v), .. } = ast.kind(stmts[1]) else {
            panic!()
        };
        let NodeKind::Binop { lhs, .. } = ast.kind(*v) else {
            panic!("expected sum");
        };
        assert_eq!(ast.name_text(*lhs).unwrap().as_str(), "ioTemp1");
    }

    #[test]
    fn plain_receive_is_left_alone() {
        let (ast, program, _) = parse_and_extract("Q = process p : -P | x := p.a end");
        let stmts = process_stmts(&ast, program);
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn dot_to_dot_assignment_splits() {
        let (ast, program, _) = parse_and_extract("Q = process p : -P; q : +R | q.b := p.a end");
        let stmts = process_stmts(&ast, program);
        assert_eq!(stmts.len(), 2);
        let NodeKind::Dec {
            generated: true, ..
        } = ast.kind(stmts[0])
        else {
            panic!("expected receive into temporary");
        };
        let NodeKind::Dec {
            name,
            value: Some(v),
            ..
        } = ast.kind(stmts[1])
        else {
            panic!()
        };
        assert!(matches!(ast.kind(*name), NodeKind::Dot { .. }));
        assert!(matches!(ast.kind(*v), NodeKind::Name { .. }));
    }

    #[test]
    fn extraction_is_idempotent() {
        let text = "Q = process p : -P | x := p.a + p.b; if p?c then skip end end";
        let mut ast = Ast::new();
        let mut sink = DiagnosticSink::with_source(text);
        let program = parser::parse(text, &mut ast, &mut sink).unwrap();
        extract(&mut ast, &mut sink, program);
        let once = format!("{:?}", ast.kind(program));
        let first_len = ast.len();
        extract(&mut ast, &mut sink, program);
        assert_eq!(once, format!("{:?}", ast.kind(program)));
        assert_eq!(first_len, ast.len());
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn both_arms_communicating_is_rejected() {
        let (_, _, sink) =
            parse_and_extract("Q = process p : -P | x := p.a if b else p.c end");
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn condition_hoists_into_arm_declarations() {
        let (ast, program, _) = parse_and_extract("Q = process p : -P | if p?a then skip end end");
        let stmts = process_stmts(&ast, program);
        assert_eq!(stmts.len(), 1);
        let NodeKind::If { arms, .. } = ast.kind(stmts[0]) else {
            panic!()
        };
        let NodeKind::CondArm { decs, cond, .. } = ast.kind(arms[0]) else {
            panic!()
        };
        assert_eq!(decs.len(), 1);
        assert!(matches!(ast.kind(*cond), NodeKind::Name { .. }));
    }
}
