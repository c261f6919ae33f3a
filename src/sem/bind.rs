//! Name binding.
//!
//! Links each use of a name to its definition. The scope chain is a
//! linked list of nodes that may define names; it is threaded through the
//! walk and recorded per chain head, so a lookup walks outward from the
//! point of use. Definition nodes pass themselves as the new chain head
//! when descending into their value, so enumeration values and recursive
//! definitions resolve. Sequences advance the head statement by
//! statement, so a declaration is visible only below itself.
//!
//! Dot and query nodes bind their field against the protocol of the port,
//! not the enclosing scope.
//!
//! An unresolved name is fatal: continuing with a dangling use would
//! corrupt every later pass.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::base::Name;
use crate::diag::{DiagnosticSink, Fatal};
use crate::syntax::{Ast, MessageKind, NodeId, NodeKind};

/// Bind a program. `chain` is the initial scope chain head, normally the
/// standard-port declaration injected by the driver.
pub fn bind(
    ast: &mut Ast,
    sink: &mut DiagnosticSink,
    program: NodeId,
    chain: Option<NodeId>,
) -> Result<(), Fatal> {
    let mut binder = Binder::new(ast, sink);
    binder.bind_node(program, chain)
}

/// The binding pass. Holds the chain-parent links built so far.
pub struct Binder<'a> {
    ast: &'a mut Ast,
    sink: &'a mut DiagnosticSink,
    parents: FxHashMap<NodeId, Option<NodeId>>,
}

impl<'a> Binder<'a> {
    pub fn new(ast: &'a mut Ast, sink: &'a mut DiagnosticSink) -> Self {
        Self {
            ast,
            sink,
            parents: FxHashMap::default(),
        }
    }

    /// Pre-register a chain link for a node built outside the program,
    /// e.g. the injected `sys` declarations.
    pub fn predefine(&mut self, node: NodeId, parent: Option<NodeId>) {
        self.parents.insert(node, parent);
    }

    fn link(&mut self, node: NodeId, parent: Option<NodeId>) {
        self.parents.insert(node, parent);
    }

    /// Bind one node with the given chain head.
    pub fn bind_node(&mut self, id: NodeId, chain: Option<NodeId>) -> Result<(), Fatal> {
        match self.ast.kind(id).clone() {
            NodeKind::Program { items } => {
                self.link(id, chain);
                let mut head = chain;
                for item in items {
                    self.bind_node(item, head)?;
                    head = Some(item);
                }
                Ok(())
            }

            NodeKind::Define { name, value } => {
                self.link(id, chain);
                // The definition itself heads the chain inside its value,
                // so recursion and enumeration values resolve.
                self.bind_node(name, Some(id))?;
                self.bind_node(value, Some(id))?;
                if let Some(text) = self.ast.name_text(name).cloned() {
                    set_owner_name(self.ast, value, &text);
                }
                Ok(())
            }

            NodeKind::Constant { name, ty, value } => {
                self.link(id, chain);
                self.bind_node(name, Some(id))?;
                self.bind_node(ty, chain)?;
                self.bind_node(value, chain)
            }

            NodeKind::Instance { name, args, .. } => {
                self.link(id, chain);
                self.bind_node(name, chain)?;
                for arg in args {
                    self.bind_node(arg, chain)?;
                }
                Ok(())
            }

            NodeKind::Cell {
                params, instances, ..
            } => {
                let mut head = chain;
                for param in params {
                    self.bind_node(param, head)?;
                    head = Some(param);
                }
                for instance in instances {
                    self.bind_node(instance, head)?;
                    head = Some(instance);
                }
                Ok(())
            }

            NodeKind::Process { params, body, .. }
            | NodeKind::Procedure { params, body, .. } => {
                let mut head = chain;
                for param in params {
                    self.bind_node(param, head)?;
                    head = Some(param);
                }
                self.bind_node(body, head)
            }

            NodeKind::Thread {
                inputs,
                outputs,
                body,
                ..
            } => {
                let mut head = chain;
                for input in inputs {
                    self.bind_node(input, head)?;
                    head = Some(input);
                }
                for output in outputs {
                    self.bind_node(output, head)?;
                    head = Some(output);
                }
                self.bind_node(body, head)
            }

            NodeKind::ThreadParam { name, ty, .. } => {
                self.link(id, chain);
                self.bind_node(name, Some(id))?;
                self.bind_node(ty, chain)
            }

            NodeKind::NativeDec { params, result } => {
                let mut head = chain;
                for param in params {
                    self.bind_node(param, head)?;
                    head = Some(param);
                }
                if let Some(result) = result {
                    self.bind_node(result, head)?;
                }
                Ok(())
            }

            NodeKind::Protocol { expr, .. } => self.bind_node(expr, chain),

            NodeKind::Sequence { stmts } => {
                self.link(id, chain);
                let mut head = Some(id);
                for stmt in stmts {
                    self.bind_node(stmt, head)?;
                    head = Some(stmt);
                }
                Ok(())
            }

            NodeKind::Skip | NodeKind::Exit { .. } => {
                self.link(id, chain);
                Ok(())
            }

            NodeKind::If { arms, alt, .. } => {
                self.link(id, chain);
                for arm in arms {
                    self.bind_node(arm, chain)?;
                }
                self.bind_node(alt, chain)
            }

            NodeKind::CondArm {
                decs, cond, body, ..
            } => {
                self.link(id, chain);
                let mut head = Some(id);
                for dec in decs {
                    self.bind_node(dec, head)?;
                    head = Some(dec);
                }
                self.bind_node(cond, head)?;
                self.bind_node(body, head)
            }

            NodeKind::Loop { body, .. } => {
                self.link(id, chain);
                self.bind_node(body, chain)
            }

            NodeKind::For { comp, body, .. } => {
                self.link(id, chain);
                self.bind_node(comp, chain)?;
                // The body sees the loop variable through the
                // comprehension.
                self.bind_node(body, Some(comp))
            }

            NodeKind::Any {
                comp, body, alt, ..
            } => {
                self.link(id, chain);
                self.bind_node(comp, chain)?;
                self.bind_node(body, Some(comp))?;
                self.bind_node(alt, chain)
            }

            NodeKind::Comprehension {
                var,
                ty,
                collection,
                pred,
                ..
            } => {
                self.link(id, chain);
                self.bind_node(var, Some(id))?;
                if let Some(ty) = ty {
                    self.bind_node(ty, Some(id))?;
                }
                self.bind_node(collection, Some(id))?;
                if let Some(pred) = pred {
                    self.bind_node(pred, Some(id))?;
                }
                Ok(())
            }

            NodeKind::RangeSet {
                start,
                finish,
                step,
                ..
            } => {
                self.link(id, chain);
                self.bind_node(start, chain)?;
                self.bind_node(finish, chain)?;
                if let Some(step) = step {
                    self.bind_node(step, chain)?;
                }
                Ok(())
            }

            NodeKind::MapSet { map, .. } => {
                self.link(id, chain);
                self.bind_node(map, chain)
            }

            NodeKind::EnumSet { ty, .. } => {
                self.link(id, chain);
                if let Some(ty) = ty {
                    self.bind_node(ty, chain)?;
                }
                Ok(())
            }

            NodeKind::Select { options, .. } => {
                self.link(id, chain);
                for option in options {
                    self.bind_node(option, chain)?;
                }
                Ok(())
            }

            NodeKind::SelectOption { guard, body, .. } => {
                self.link(id, chain);
                if let Some(guard) = guard {
                    self.bind_node(guard, chain)?;
                }
                self.bind_node(body, chain)
            }

            NodeKind::Dec {
                name, ty, value, ..
            } => {
                self.link(id, chain);
                if ty.is_some() {
                    // Defining occurrence.
                    self.bind_node(name, Some(id))?;
                } else {
                    // Assignment target, signal, or generated temporary.
                    self.bind_node(name, chain)?;
                }
                if let Some(ty) = ty {
                    self.bind_node(ty, chain)?;
                }
                if let Some(value) = value {
                    self.bind_node(value, chain)?;
                }
                Ok(())
            }

            NodeKind::Dot { port, field } | NodeKind::Query { port, field, .. } => {
                self.bind_node(port, chain)?;
                let port_dec = self.ast.definition(port);
                match port_dec {
                    Some(dec) if self.ast.is_port(dec) => {
                        let protocol = self.ast.protocol_of(dec);
                        trace!(?protocol, "binding field against port protocol");
                        self.bind_node(field, protocol)
                    }
                    Some(_) => {
                        let pos = self.ast.pos(id);
                        self.sink.error(pos, "invalid port");
                        Ok(())
                    }
                    None => {
                        let pos = self.ast.pos(id);
                        let name = self
                            .ast
                            .name_text(port)
                            .map(|n| n.to_string())
                            .unwrap_or_default();
                        self.sink.error(
                            pos,
                            format!(
                                "port '{name}' is either undefined or cannot be used \
                                 in this context"
                            ),
                        );
                        Ok(())
                    }
                }
            }

            NodeKind::Binop { lhs, rhs, .. } => {
                self.link(id, chain);
                self.bind_node(lhs, chain)?;
                self.bind_node(rhs, chain)
            }

            NodeKind::Unop { operand, .. } => self.bind_node(operand, chain),

            NodeKind::CondExpr { lhs, pred, rhs, .. } => {
                self.bind_node(lhs, chain)?;
                self.bind_node(pred, chain)?;
                self.bind_node(rhs, chain)
            }

            NodeKind::Subscript { base, index, .. } => {
                self.bind_node(base, chain)?;
                self.bind_node(index, chain)
            }

            NodeKind::Subrange { base, lo, hi, .. } => {
                self.bind_node(base, chain)?;
                self.bind_node(lo, chain)?;
                self.bind_node(hi, chain)
            }

            NodeKind::IterOp { map, .. } => {
                self.link(id, chain);
                self.bind_node(map, chain)
            }

            NodeKind::Call { name, args, .. } => {
                self.link(id, chain);
                // Builtins stay unbound and resolve through the function
                // table at the call site.
                self.try_bind_name(name, chain);
                for arg in args {
                    self.bind_node(arg, chain)?;
                }
                Ok(())
            }

            NodeKind::EnumType { values, .. } => {
                self.link(id, chain);
                for value in values {
                    self.link(value, Some(id));
                }
                Ok(())
            }

            NodeKind::ArrayType { elem, lo, hi } => {
                self.bind_node(elem, chain)?;
                self.bind_node(lo, chain)?;
                self.bind_node(hi, chain)
            }

            NodeKind::MapType { domain, range, .. } => {
                self.bind_node(domain, chain)?;
                self.bind_node(range, chain)
            }

            NodeKind::ProtoSeq { parts } | NodeKind::ProtoAlt { parts } => {
                for part in parts {
                    self.bind_node(part, chain)?;
                }
                Ok(())
            }

            NodeKind::ProtoRep { operand, .. } => self.bind_node(operand, chain),

            NodeKind::Start { calls, body } => {
                self.link(id, chain);
                for call in calls {
                    self.bind_node(call, chain)?;
                }
                self.bind_node(body, chain)
            }

            NodeKind::ThreadCall {
                name,
                inputs,
                outputs,
                ..
            } => {
                self.bind_node(name, chain)?;
                for input in inputs {
                    self.bind_node(input, chain)?;
                }
                for output in outputs {
                    self.bind_node(output, chain)?;
                }
                Ok(())
            }

            NodeKind::Name { defining, .. } => {
                if defining {
                    return Ok(());
                }
                let text = self.ast.name_text(id).cloned().unwrap_or_default();
                match self.resolve(&text, chain) {
                    Some(def) => {
                        if let NodeKind::Name { definition, .. } = self.ast.kind_mut(id) {
                            *definition = Some(def);
                        }
                        Ok(())
                    }
                    None => {
                        let pos = self.ast.pos(id);
                        Err(self.sink.fatal(
                            pos,
                            format!(
                                "'{text}' is either not defined or cannot be used \
                                 in this context"
                            ),
                        ))
                    }
                }
            }

            _ => Ok(()),
        }
    }

    /// Bind a name if a definition exists, leaving it unbound otherwise.
    fn try_bind_name(&mut self, name: NodeId, chain: Option<NodeId>) {
        let NodeKind::Name {
            defining: false, ..
        } = self.ast.kind(name)
        else {
            return;
        };
        let text = self.ast.name_text(name).cloned().unwrap_or_default();
        if let Some(def) = self.resolve(&text, chain) {
            if let NodeKind::Name { definition, .. } = self.ast.kind_mut(name) {
                *definition = Some(def);
            }
        }
    }

    /// Walk the chain outward until some node defines `text`.
    fn resolve(&mut self, text: &Name, mut chain: Option<NodeId>) -> Option<NodeId> {
        while let Some(node) = chain {
            if let Some(def) = look_up(self.ast, node, text) {
                return Some(def);
            }
            chain = self.parents.get(&node).copied().flatten();
        }
        None
    }
}

/// Does this chain node define `text`? Returns the definition node.
fn look_up(ast: &Ast, node: NodeId, text: &Name) -> Option<NodeId> {
    match ast.kind(node) {
        NodeKind::Define { name, value } => {
            if ast.name_text(*name) == Some(text) {
                return Some(node);
            }
            // Enumeration values are reachable through their definition.
            if matches!(ast.kind(*value), NodeKind::EnumType { .. }) {
                return look_up(ast, *value, text);
            }
            None
        }
        NodeKind::Constant { name, .. } => {
            (ast.name_text(*name) == Some(text)).then_some(node)
        }
        NodeKind::Dec {
            name,
            ty,
            msg,
            generated,
            ..
        } => {
            let defines = ty.is_some()
                || matches!(msg, MessageKind::Query | MessageKind::Reply)
                || *generated;
            (defines && ast.name_text(*name) == Some(text)).then_some(node)
        }
        NodeKind::Comprehension { var, .. } => {
            (ast.name_text(*var) == Some(text)).then_some(node)
        }
        NodeKind::ThreadParam { name, .. } => {
            (ast.name_text(*name) == Some(text)).then_some(node)
        }
        NodeKind::EnumType { values, .. } => values
            .iter()
            .copied()
            .find(|&v| matches!(ast.kind(v), NodeKind::EnumValue { name, .. } if name == text)),
        NodeKind::EnumValue { name, .. } => (name == text).then_some(node),
        NodeKind::Protocol { expr, .. } => look_up(ast, *expr, text),
        NodeKind::ProtoSeq { parts } | NodeKind::ProtoAlt { parts } => {
            parts.iter().find_map(|&p| look_up(ast, p, text))
        }
        NodeKind::ProtoRep { operand, .. } => look_up(ast, *operand, text),
        _ => None,
    }
}

/// Record the defining name on a named value node.
fn set_owner_name(ast: &mut Ast, value: NodeId, text: &Name) {
    match ast.kind_mut(value) {
        NodeKind::Cell { name, .. }
        | NodeKind::Process { name, .. }
        | NodeKind::Procedure { name, .. }
        | NodeKind::Thread { name, .. }
        | NodeKind::Protocol { name, .. } => *name = text.clone(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::sem::extract;

    fn bound(text: &str) -> (Ast, NodeId, DiagnosticSink) {
        let mut ast = Ast::new();
        let mut sink = DiagnosticSink::with_source(text);
        let program = parser::parse(text, &mut ast, &mut sink).unwrap();
        extract(&mut ast, &mut sink, program);
        bind(&mut ast, &mut sink, program, None).unwrap();
        (ast, program, sink)
    }

    fn all_names(ast: &Ast) -> Vec<NodeId> {
        (0..ast.len() as u32)
            .map(NodeId)
            .filter(|&id| matches!(ast.kind(id), NodeKind::Name { .. }))
            .collect()
    }

    #[test]
    fn every_name_is_defining_or_bound() {
        let (ast, _, sink) = bound(
            "P = [ a : Integer ; ^b : Text ];\n\
             Q = process p : +P | x : Integer := 3; x := x + 1; y : Integer := p.a end",
        );
        assert_eq!(sink.error_count(), 0, "{}", sink.render_all());
        for name in all_names(&ast) {
            let NodeKind::Name {
                defining,
                definition,
                ..
            } = ast.kind(name)
            else {
                unreachable!()
            };
            assert!(
                *defining || definition.is_some(),
                "unbound name {:?}",
                ast.kind(name)
            );
        }
    }

    #[test]
    fn fields_bind_against_the_protocol() {
        let (ast, program, _) = bound("P = [ msg : Text ]; Q = process p : +P | p.msg end");
        // Find the dot node and confirm its field's definition is the
        // protocol field declaration.
        let dot = (0..ast.len() as u32)
            .map(NodeId)
            .find(|&id| matches!(ast.kind(id), NodeKind::Dot { .. }))
            .expect("dot exists");
        let NodeKind::Dot { field, .. } = ast.kind(dot) else {
            unreachable!()
        };
        let def = ast.definition(*field).expect("field bound");
        assert_eq!(ast.message_kind(def), MessageKind::Query);
        let _ = program;
    }

    #[test]
    fn unresolved_names_are_fatal() {
        let text = "Q = process | x := nowhere end";
        let mut ast = Ast::new();
        let mut sink = DiagnosticSink::with_source(text);
        let program = parser::parse(text, &mut ast, &mut sink).unwrap();
        let result = bind(&mut ast, &mut sink, program, None);
        assert!(result.is_err());
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn enum_values_resolve_through_their_definition() {
        let (ast, _, sink) =
            bound("Color = <red, green, blue>; Q = process | c : Color := green end");
        assert_eq!(sink.error_count(), 0, "{}", sink.render_all());
        let green_use = (0..ast.len() as u32).map(NodeId).find(|&id| {
            matches!(ast.kind(id),
                NodeKind::Name { text, defining: false, .. } if text.as_str() == "green")
        });
        let def = ast.definition(green_use.unwrap()).unwrap();
        assert!(matches!(ast.kind(def), NodeKind::EnumValue { .. }));
    }

    #[test]
    fn later_statements_see_earlier_declarations_only() {
        let text = "Q = process | x := y; y : Integer := 1 end";
        let mut ast = Ast::new();
        let mut sink = DiagnosticSink::with_source(text);
        let program = parser::parse(text, &mut ast, &mut sink).unwrap();
        assert!(bind(&mut ast, &mut sink, program, None).is_err());
    }
}
