//! Predicates and getters used to query tree nodes.
//!
//! These walk definition links, so most of them are only meaningful after
//! binding. Type names resolve through their definitions; primitive types
//! compare by arena identity.

use crate::base::Name;

use super::ast::{FileMode, MessageKind, NodeKind, PortRole};
use super::tree::{Ast, NodeId};

impl Ast {
    /// The text of a name node, if `id` is one.
    pub fn name_text(&self, id: NodeId) -> Option<&Name> {
        match self.kind(id) {
            NodeKind::Name { text, .. } => Some(text),
            _ => None,
        }
    }

    /// The definition a name was bound to.
    pub fn definition(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(id) {
            NodeKind::Name { definition, .. } => *definition,
            NodeKind::Subscript { base, .. } => self.definition(*base),
            _ => None,
        }
    }

    /// Resolve a type expression: a name resolves through its definition to
    /// the defined value, anything else stands for itself.
    pub fn resolve_type(&self, id: NodeId) -> NodeId {
        match self.kind(id) {
            NodeKind::Name { definition, .. } => match definition {
                Some(def) => match self.kind(*def) {
                    NodeKind::Define { value, .. } => self.resolve_type(*value),
                    _ => *def,
                },
                None => id,
            },
            _ => id,
        }
    }

    /// The declared or inferred type of a definition node.
    pub fn def_type(&self, def: NodeId) -> Option<NodeId> {
        match self.kind(def) {
            NodeKind::Dec { ty, .. } => *ty,
            NodeKind::Constant { ty, .. } => Some(*ty),
            NodeKind::Comprehension { ty, .. } => *ty,
            NodeKind::EnumValue { ty, .. } => *ty,
            NodeKind::ThreadParam { ty, .. } => Some(*ty),
            NodeKind::Define { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// True when the node declares or denotes a port.
    pub fn is_port(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::Dec { ty, .. } => ty.map_or(false, |t| self.is_port(t)),
            NodeKind::Define { value, .. } => self.is_port(*value),
            NodeKind::Protocol { .. } => true,
            NodeKind::MapType { range, .. } => self.is_port(*range),
            NodeKind::Subscript { base, .. } => self.is_port(*base),
            NodeKind::ThreadParam { ty, .. } => self.is_port(*ty),
            NodeKind::Name { definition, .. } => definition.map_or(false, |d| self.is_port(d)),
            _ => false,
        }
    }

    /// The protocol governing a port, a field access, or a port type.
    pub fn protocol_of(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(id) {
            NodeKind::Protocol { .. } => Some(id),
            NodeKind::Define { value, .. } => self.protocol_of(*value),
            NodeKind::Dot { field, .. } => self.protocol_of(*field),
            NodeKind::Query { field, .. } => self.protocol_of(*field),
            NodeKind::Dec { ty, .. } => ty.and_then(|t| self.protocol_of(t)),
            NodeKind::MapType { range, .. } => self.protocol_of(*range),
            NodeKind::ThreadParam { ty, .. } => self.protocol_of(*ty),
            NodeKind::Name { definition, .. } => definition.and_then(|d| self.protocol_of(d)),
            _ => None,
        }
    }

    /// The role of the port behind a name, declaration, or communication.
    pub fn port_role(&self, id: NodeId) -> PortRole {
        match self.kind(id) {
            NodeKind::Dec { role, .. } => *role,
            NodeKind::ThreadParam { role, .. } => *role,
            NodeKind::Dot { port, .. } => self.port_role(*port),
            NodeKind::Query { port, .. } => self.port_role(*port),
            NodeKind::Subscript { base, .. } => self.port_role(*base),
            NodeKind::Name { definition, .. } => {
                definition.map_or(PortRole::None, |d| self.port_role(d))
            }
            _ => PortRole::None,
        }
    }

    /// The message direction of a field access or field declaration.
    pub fn message_kind(&self, id: NodeId) -> MessageKind {
        match self.kind(id) {
            NodeKind::Dec { msg, .. } => *msg,
            NodeKind::Dot { field, .. } => self.message_kind(*field),
            NodeKind::Query { field, .. } => self.message_kind(*field),
            NodeKind::Name { definition, .. } => {
                definition.map_or(MessageKind::None, |d| self.message_kind(d))
            }
            _ => MessageKind::None,
        }
    }

    pub fn is_bool_type(&self, id: NodeId) -> bool {
        id == self.bool_ty
    }

    /// Char or Text.
    pub fn is_text_type(&self, id: NodeId) -> bool {
        id == self.char_ty || id == self.text_ty
    }

    /// Byte, unsigned Byte, Integer, or unsigned Integer.
    pub fn is_int_type(&self, id: NodeId) -> bool {
        id == self.byte_ty || id == self.ubyte_ty || id == self.int_ty || id == self.uint_ty
    }

    /// Any member of the numeric tower, enumerations included.
    pub fn is_numeric_type(&self, id: NodeId) -> bool {
        self.is_int_type(id)
            || id == self.float_ty
            || id == self.decimal_ty
            || self.is_enum_type(id)
    }

    pub fn is_enum_type(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::EnumType { .. } => true,
            NodeKind::Define { value, .. } => self.is_enum_type(*value),
            NodeKind::Name { definition, .. } => definition.map_or(false, |d| self.is_enum_type(d)),
            _ => false,
        }
    }

    pub fn is_array_type(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::ArrayType { .. } => true,
            NodeKind::Define { value, .. } => self.is_array_type(*value),
            NodeKind::Name { definition, .. } => {
                definition.map_or(false, |d| self.is_array_type(d))
            }
            _ => false,
        }
    }

    pub fn is_map_type(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::MapType { .. } => true,
            NodeKind::Define { value, .. } => self.is_map_type(*value),
            NodeKind::Name { definition, .. } => definition.map_or(false, |d| self.is_map_type(d)),
            _ => false,
        }
    }

    /// Domain type of a resolved map or iterator type.
    pub fn domain_type(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(self.resolve_type(id)) {
            NodeKind::MapType { domain, .. } | NodeKind::IterType { domain, .. } => Some(*domain),
            _ => None,
        }
    }

    /// Range type of a resolved map, array, or iterator type.
    pub fn range_type(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(self.resolve_type(id)) {
            NodeKind::MapType { range, .. } | NodeKind::IterType { range, .. } => Some(*range),
            NodeKind::ArrayType { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    /// Structural type equality: maps compare componentwise, arrays compare
    /// as arrays, everything else by identity after resolving names.
    pub fn same_type(&self, lhs: NodeId, rhs: NodeId) -> bool {
        let lhs = self.resolve_type(lhs);
        let rhs = self.resolve_type(rhs);
        if let (
            NodeKind::MapType {
                domain: ld,
                range: lr,
                ..
            },
            NodeKind::MapType {
                domain: rd,
                range: rr,
                ..
            },
        ) = (self.kind(lhs), self.kind(rhs))
        {
            return self.same_type(*ld, *rd) && self.same_type(*lr, *rr);
        }
        if self.is_array_type(lhs) && self.is_array_type(rhs) {
            return true;
        }
        lhs == rhs
    }

    /// True when the name denotes something that may not be assigned to.
    pub fn is_constant_name(&self, id: NodeId) -> bool {
        match self.definition(id) {
            Some(def) => match self.kind(def) {
                NodeKind::Constant { .. } => true,
                NodeKind::Dec { constant, .. } => *constant,
                _ => false,
            },
            None => false,
        }
    }

    /// True when the name may stand on the left of an assignment.
    pub fn is_assignable(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::Dot { .. } | NodeKind::Subscript { .. } | NodeKind::Subrange { .. } => true,
            NodeKind::Name { definition, .. } => match definition {
                Some(def) => match self.kind(*def) {
                    NodeKind::Dec { constant, .. } => !*constant,
                    NodeKind::ThreadParam { .. } => true,
                    NodeKind::Comprehension { .. } => false,
                    _ => false,
                },
                None => false,
            },
            _ => false,
        }
    }

    /// True when the name declares an alias parameter.
    pub fn is_alias(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::Dec { alias, .. } => *alias,
            NodeKind::Name { definition, .. } => definition.map_or(false, |d| self.is_alias(d)),
            _ => false,
        }
    }

    /// Number of values in an enumeration type.
    pub fn enum_size(&self, id: NodeId) -> Option<u32> {
        match self.kind(self.resolve_type(id)) {
            NodeKind::EnumType { values, .. } => Some(values.len() as u32),
            _ => None,
        }
    }

    /// Runtime buffer tag for values of the given type, as the scheduler's
    /// port slots name them. Enumeration values travel as integers.
    pub fn buffer_name(&self, ty: NodeId) -> Name {
        let resolved = self.resolve_type(ty);
        let tag = match self.kind(resolved) {
            NodeKind::BoolType => "pBool",
            NodeKind::ByteType { signed: true } => "pByte",
            NodeKind::ByteType { signed: false } => "pUnsignedByte",
            NodeKind::IntType { signed: true } => "pInt",
            NodeKind::IntType { signed: false } => "pUnsignedInt",
            NodeKind::FloatType | NodeKind::DecimalType => "pDouble",
            NodeKind::CharType => "pChar",
            NodeKind::TextType => "pString",
            NodeKind::FileType { .. } => "pFile",
            NodeKind::EnumType { .. } => "pInt",
            NodeKind::Protocol { .. } => "ppChannel",
            _ => "",
        };
        Name::new(tag)
    }

    /// Static type of an expression, following definitions. Void when the
    /// node has no type (or has not been checked yet).
    pub fn expr_type(&self, id: NodeId) -> NodeId {
        match self.kind(id) {
            NodeKind::Name { definition, .. } => definition
                .and_then(|d| self.def_type(d))
                .unwrap_or(self.void_ty),
            NodeKind::BoolLit { .. } => self.bool_ty,
            NodeKind::CharLit { .. } => self.char_ty,
            NodeKind::TextLit { .. } => self.text_ty,
            NodeKind::NumLit { ty, .. } => *ty,
            NodeKind::Binop { ty, .. }
            | NodeKind::Unop { ty, .. }
            | NodeKind::CondExpr { ty, .. } => ty.unwrap_or(self.void_ty),
            NodeKind::Dot { field, .. } => self.expr_type(*field),
            NodeKind::Query { .. } => self.bool_ty,
            NodeKind::Subscript { base, .. } => {
                let base_ty = self.expr_type(*base);
                if base_ty == self.text_ty {
                    self.char_ty
                } else {
                    self.range_type(base_ty).unwrap_or(self.void_ty)
                }
            }
            NodeKind::Subrange { .. } => self.text_ty,
            NodeKind::Dec { ty, name, .. } => match ty {
                Some(ty) => *ty,
                None => self.expr_type(*name),
            },
            NodeKind::ThreadParam { ty, .. } => *ty,
            NodeKind::Constant { ty, .. } => *ty,
            NodeKind::Comprehension { ty, .. } => ty.unwrap_or(self.void_ty),
            NodeKind::EnumValue { ty, .. } => ty.unwrap_or(self.void_ty),
            NodeKind::Define { value, .. } => *value,
            _ => self.void_ty,
        }
    }

    /// Whether a dot or query addresses the standard `sys` port, and which
    /// system stream its field names.
    pub fn sys_io(&self, id: NodeId) -> FileMode {
        let (port, field) = match self.kind(id) {
            NodeKind::Dot { port, field } | NodeKind::Query { port, field, .. } => (*port, *field),
            _ => return FileMode::None,
        };
        if self.name_text(port).map(|n| n.as_str()) != Some("sys") {
            return FileMode::None;
        }
        match self.name_text(field).map(|n| n.as_str()) {
            Some("inp") => FileMode::SysIn,
            Some("out") => FileMode::SysOut,
            Some("err") => FileMode::SysErr,
            _ => FileMode::None,
        }
    }

    /// Integer value of a numeric literal, if it parses.
    pub fn int_value(&self, id: NodeId) -> Option<i64> {
        match self.kind(id) {
            NodeKind::NumLit { text, .. } => text.parse().ok(),
            _ => None,
        }
    }

    /// The user-level function name a call resolves through.
    pub fn call_target_name(&self, id: NodeId) -> Option<&Name> {
        match self.kind(id) {
            NodeKind::Call { name, .. } => self.name_text(*name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::ast::CommKind;
    use super::*;
    use crate::base::Position;

    fn name(ast: &mut Ast, text: &str, definition: Option<NodeId>) -> NodeId {
        ast.alloc(
            Position::default(),
            NodeKind::Name {
                text: Name::new(text),
                defining: false,
                definition,
                owner: Name::default(),
                var_num: -1,
                field: None,
                by_reference: false,
            },
        )
    }

    #[test]
    fn type_names_resolve_through_definitions() {
        let mut ast = Ast::new();
        let int_ty = ast.int_ty;
        let def_name = name(&mut ast, "Size", None);
        let def = ast.alloc(
            Position::default(),
            NodeKind::Define {
                name: def_name,
                value: int_ty,
            },
        );
        let use_name = name(&mut ast, "Size", Some(def));
        assert_eq!(ast.resolve_type(use_name), int_ty);
        assert!(ast.same_type(use_name, int_ty));
    }

    #[test]
    fn port_declarations_are_ports() {
        let mut ast = Ast::new();
        let proto_expr = ast.alloc(Position::default(), NodeKind::Skip);
        let proto = ast.alloc(
            Position::default(),
            NodeKind::Protocol {
                expr: proto_expr,
                name: Name::default(),
                num_fields: 0,
            },
        );
        let def_name = name(&mut ast, "P", None);
        let def = ast.alloc(
            Position::default(),
            NodeKind::Define {
                name: def_name,
                value: proto,
            },
        );
        let ty = name(&mut ast, "P", Some(def));
        let port_name = name(&mut ast, "p", None);
        let dec = ast.alloc(
            Position::default(),
            NodeKind::Dec {
                name: port_name,
                ty: Some(ty),
                value: None,
                role: PortRole::Server,
                msg: MessageKind::None,
                generated: false,
                constant: false,
                moved: false,
                alias: false,
                parameter: false,
                reference: false,
                comm: CommKind::None,
                transfer: -1,
                temp_num: -1,
                branch: false,
            },
        );
        assert!(ast.is_port(dec));
        assert_eq!(ast.protocol_of(dec), Some(proto));
        assert_eq!(ast.port_role(dec), PortRole::Server);
    }
}
