//! Semantic checking.
//!
//! One walk over the bound tree. A [`CheckData`] record travels with the
//! walk: the type of the expression just checked, the nesting flags, and
//! the per-scope name sets for duplicate detection. The checker
//!
//! - infers expression types and inserts coercions around operators and
//!   at assignments, declarations, and argument positions;
//! - enforces enumeration, array, and map rules;
//! - enforces port and role rules, including the cell wiring invariant
//!   (one server, one client per internal channel);
//! - builds the LTS of each protocol and checks every process against the
//!   protocols of its port parameters;
//! - matches instance arguments against parameters, tying equally named
//!   protocol fields into one field-number class.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::base::{Name, Position};
use crate::diag::{emergency_stop, DiagnosticSink, Fatal};
use crate::lts::{process_graph, protocol_graph, satisfies, Lts, StateGen};
use crate::syntax::{
    Ast, BinOp, CommKind, FieldId, IterFun, MapKind, MessageKind, NodeId, NodeKind, PortRole,
    SetKind, UnOp,
};

use super::funcs::{Conversion, FuncTable, ParamTy, MAX_CONV};

/// Everything the checker learns about one protocol definition.
#[derive(Debug)]
pub struct ProtocolEntry {
    pub lts: Lts,
    pub fields: Vec<NodeId>,
}

/// Protocol definition node to its checked form.
pub type ProtocolMap = FxHashMap<NodeId, ProtocolEntry>;

/// State threaded through the checking walk.
#[derive(Debug)]
pub struct CheckData {
    /// Type of the node just checked.
    pub ty: NodeId,
    /// Collection type of a for/any loop over a map.
    pub iter_ty: Option<NodeId>,
    /// Inferred loop-variable type; void when nothing was inferred.
    pub index_ty: NodeId,
    pub within_loop: bool,
    pub within_protocol: bool,
    pub within_guard: bool,
    pub within_param_list: bool,
    /// Names already declared in the current scope.
    pub var_names: FxHashSet<Name>,
    /// Field names of the protocol being checked.
    pub prot_names: FxHashSet<Name>,
}

impl CheckData {
    fn new(void_ty: NodeId) -> Self {
        Self {
            ty: void_ty,
            iter_ty: None,
            index_ty: void_ty,
            within_loop: false,
            within_protocol: false,
            within_guard: false,
            within_param_list: false,
            var_names: FxHashSet::default(),
            prot_names: FxHashSet::default(),
        }
    }
}

/// Check a program. Returns the protocol map for later stages and tests.
pub fn check(
    ast: &mut Ast,
    sink: &mut DiagnosticSink,
    funcs: &FuncTable,
    program: NodeId,
) -> Result<ProtocolMap, Fatal> {
    let mut checker = Checker::new(ast, sink, funcs);
    let void_ty = checker.ast.void_ty;
    let mut cd = CheckData::new(void_ty);
    checker.check_node(program, &mut cd)?;
    Ok(checker.protocols)
}

/// Port usage bookkeeping for one name inside a cell.
#[derive(Debug, Clone, Copy)]
struct PortEntry {
    param: bool,
    valid: bool,
    role: PortRole,
    pos: Position,
    servers: u32,
    clients: u32,
}

impl Default for PortEntry {
    fn default() -> Self {
        Self {
            param: false,
            valid: false,
            role: PortRole::None,
            pos: Position::default(),
            servers: 0,
            clients: 0,
        }
    }
}

pub struct Checker<'a> {
    ast: &'a mut Ast,
    sink: &'a mut DiagnosticSink,
    funcs: &'a FuncTable,
    protocols: ProtocolMap,
}

impl<'a> Checker<'a> {
    pub fn new(ast: &'a mut Ast, sink: &'a mut DiagnosticSink, funcs: &'a FuncTable) -> Self {
        Self {
            ast,
            sink,
            funcs,
            protocols: ProtocolMap::default(),
        }
    }

    // ==================================================================
    // Type utilities
    // ==================================================================

    /// The smallest type that includes both. Sometimes approximate: a
    /// signed/unsigned mix joins to signed Integer.
    fn join_types(&self, lhs: NodeId, rhs: NodeId) -> NodeId {
        let ast = &*self.ast;
        let lhs = ast.resolve_type(lhs);
        let rhs = ast.resolve_type(rhs);
        if lhs == ast.bool_ty && rhs == ast.bool_ty {
            ast.bool_ty
        } else if ast.is_text_type(lhs) && ast.is_text_type(rhs) {
            if lhs == ast.char_ty && rhs == ast.char_ty {
                ast.char_ty
            } else {
                ast.text_ty
            }
        } else if ast.is_numeric_type(lhs) && ast.is_numeric_type(rhs) {
            if lhs == ast.float_ty || rhs == ast.float_ty {
                ast.float_ty
            } else if lhs == ast.decimal_ty || rhs == ast.decimal_ty {
                ast.decimal_ty
            } else if lhs == rhs {
                // Unsigned arithmetic stays unsigned.
                lhs
            } else {
                ast.int_ty
            }
        } else {
            ast.void_ty
        }
    }

    /// Coerce `expr` from `from` to `to`, returning the expression to use
    /// in its place. Rejections are recoverable diagnostics.
    fn coerce(&mut self, from: NodeId, to: NodeId, expr: NodeId) -> NodeId {
        let pos = self.ast.pos(expr);

        // Integer literals are range-checked against narrow targets.
        if let NodeKind::NumLit { text, ty } = self.ast.kind(expr) {
            if *ty == self.ast.int_ty {
                let value: i64 = text.parse().unwrap_or(0);
                if to == self.ast.uint_ty && value < 0 {
                    self.sink
                        .error(pos, "literal cannot be converted to unsigned Integer");
                    return expr;
                }
                if to == self.ast.byte_ty && !(-128..=127).contains(&value) {
                    self.sink.error(pos, "literal cannot be converted to Byte");
                    return expr;
                }
                if to == self.ast.ubyte_ty && !(0..=255).contains(&value) {
                    self.sink
                        .error(pos, "literal cannot be converted to unsigned Byte");
                    return expr;
                }
            }
        }

        // A single-character text target context turns a char literal into
        // a text literal in place.
        if let NodeKind::CharLit { value } = self.ast.kind(expr) {
            if to == self.ast.text_ty {
                let text = value.to_string();
                return self.ast.alloc(pos, NodeKind::TextLit { value: text });
            }
        }

        // Integer entering an enumeration gets a run-time range check.
        if self.ast.is_int_type(self.ast.resolve_type(from)) && self.ast.is_enum_type(to) {
            let index = self.funcs.int_enum_index();
            return self.wrap_call(pos, index, vec![to, expr]);
        }

        match self.funcs.conversion(self.ast, from, to) {
            Conversion::Identity => expr,
            Conversion::Bottom => {
                self.sink
                    .error(pos, "expression cannot be coerced to required type");
                expr
            }
            Conversion::Fun(index) => self.wrap_call(pos, index, vec![expr]),
        }
    }

    /// Wrap arguments in a call to a table entry.
    fn wrap_call(&mut self, pos: Position, index: usize, args: Vec<NodeId>) -> NodeId {
        let def = self.funcs.get(index);
        let label = if def.user_name.is_empty() {
            def.runtime_name
        } else {
            def.user_name
        };
        let name = self.ast.alloc(
            pos,
            NodeKind::Name {
                text: Name::new(label),
                defining: false,
                definition: None,
                owner: Name::default(),
                var_num: -1,
                field: None,
                by_reference: false,
            },
        );
        self.ast.alloc(
            pos,
            NodeKind::Call {
                name,
                args,
                target: Some(index),
            },
        )
    }

    /// Report a duplicate name or record it in the current scope set.
    fn check_scope_name(&mut self, cd: &mut CheckData, name: &Name, pos: Position) {
        if cd.var_names.contains(name) {
            self.sink.error(
                pos,
                format!("name '{name}' has already been defined in this scope"),
            );
        } else {
            cd.var_names.insert(name.clone());
        }
    }

    // ==================================================================
    // Protocol conformance
    // ==================================================================

    /// Check a process body against the protocol of one port parameter.
    /// Mismatches are warnings: refinement is a conservative
    /// approximation.
    fn check_port_protocol(
        &mut self,
        port_dec: NodeId,
        closure_name: &Name,
        body: NodeId,
        role: PortRole,
    ) {
        let pos = self.ast.pos(port_dec);
        let mut gen = StateGen::new();
        let mut body_lts = process_graph(self.ast, body, port_dec, &mut gen, None);
        body_lts.collapse(gen.count());

        let Some(protocol) = self.ast.protocol_of(port_dec) else {
            return;
        };
        let Some(entry) = self.protocols.get(&protocol) else {
            return;
        };
        let port_name = match self.ast.kind(port_dec) {
            NodeKind::Dec { name, .. } => self
                .ast
                .name_text(*name)
                .cloned()
                .unwrap_or_default(),
            _ => Name::default(),
        };
        if !self.sink.warnings_enabled {
            return;
        }
        match role {
            PortRole::Client => {
                if !satisfies(&entry.lts, &body_lts) {
                    self.sink.warning(
                        pos,
                        format!(
                            "protocol '{port_name}' does not satisfy client \
                             '{closure_name}'\nprotocol: {}\ncode:     {}",
                            entry.lts, body_lts
                        ),
                    );
                }
            }
            PortRole::Server => {
                if !satisfies(&body_lts, &entry.lts) {
                    self.sink.warning(
                        pos,
                        format!(
                            "server '{closure_name}' does not satisfy protocol \
                             '{port_name}'\ncode:     {}\nprotocol: {}",
                            body_lts, entry.lts
                        ),
                    );
                }
            }
            _ => {
                self.sink
                    .warning(pos, "port should indicate client or server");
            }
        }
    }

    /// Field slot of a protocol field declaration.
    fn field_slot(&self, dec: NodeId) -> Option<FieldId> {
        if let NodeKind::Dec { name, .. } = self.ast.kind(dec) {
            if let NodeKind::Name { field, .. } = self.ast.kind(*name) {
                return *field;
            }
        }
        None
    }

    // ==================================================================
    // Instance matching
    // ==================================================================

    /// Match one argument against one parameter; returns the argument to
    /// keep (a coercion may replace it).
    fn match_arg(&mut self, arg: NodeId, arg_ty: NodeId, param: NodeId) -> NodeId {
        let arg_pos = self.ast.pos(arg);
        let par_pos = self.ast.pos(param);
        let par_ty = self.ast.expr_type(param);
        let arg_is_port = self.ast.is_port(arg_ty);
        let par_is_port = self.ast.is_port(par_ty);

        if arg_is_port && par_is_port {
            let par_role = self.ast.port_role(param);
            let arg_prot = self.ast.protocol_of(arg_ty);
            let par_prot = self.ast.protocol_of(par_ty);
            let (Some(arg_prot), Some(par_prot)) = (arg_prot, par_prot) else {
                return arg;
            };
            let mut compatible = true;
            {
                let arg_entry = self.protocols.get(&arg_prot);
                let par_entry = self.protocols.get(&par_prot);
                if let (Some(arg_entry), Some(par_entry)) = (arg_entry, par_entry) {
                    if par_role == PortRole::Server
                        && !satisfies(&par_entry.lts, &arg_entry.lts)
                    {
                        self.sink.error(
                            par_pos,
                            "parameter protocol does not satisfy argument protocol",
                        );
                        compatible = false;
                    } else if par_role == PortRole::Client
                        && !satisfies(&arg_entry.lts, &par_entry.lts)
                    {
                        self.sink.error(
                            arg_pos,
                            "argument protocol does not satisfy parameter protocol",
                        );
                        compatible = false;
                    }
                }
            }
            if compatible && arg_prot != par_prot {
                self.tie_fields(arg_prot, par_prot);
            }
            return arg;
        }
        if arg_is_port {
            self.sink
                .error(arg_pos, "argument is a port but parameter is not");
            return arg;
        }
        if par_is_port {
            self.sink
                .error(par_pos, "parameter is a port but argument is not");
            return arg;
        }

        if self.ast.is_alias(param) {
            if !self.ast.same_type(arg_ty, par_ty) {
                self.sink.error(arg_pos, "argument does not match parameter");
            } else if matches!(self.ast.kind(arg), NodeKind::Name { .. }) {
                if self.ast.is_constant_name(arg) {
                    self.sink
                        .error(arg_pos, "a constant cannot be passed as an alias");
                }
                if !self.ast.is_alias(arg) {
                    if let NodeKind::Name { by_reference, .. } = self.ast.kind_mut(arg) {
                        *by_reference = true;
                    }
                }
            } else {
                self.sink
                    .error(arg_pos, "argument must be a name to match an alias parameter");
            }
            return arg;
        }

        self.coerce(arg_ty, par_ty, arg)
    }

    /// Join the field-number classes of equally named fields in two
    /// protocols wired through one port.
    fn tie_fields(&mut self, arg_prot: NodeId, par_prot: NodeId) {
        let mut decs: Vec<NodeId> = Vec::new();
        for prot in [arg_prot, par_prot] {
            if let Some(entry) = self.protocols.get(&prot) {
                for &dec in &entry.fields {
                    if !decs.contains(&dec) {
                        decs.push(dec);
                    }
                }
            }
        }
        for i in 0..decs.len() {
            for j in (i + 1)..decs.len() {
                let name_i = match self.ast.kind(decs[i]) {
                    NodeKind::Dec { name, .. } => self.ast.name_text(*name).cloned(),
                    _ => None,
                };
                let name_j = match self.ast.kind(decs[j]) {
                    NodeKind::Dec { name, .. } => self.ast.name_text(*name).cloned(),
                    _ => None,
                };
                if let (Some(a), Some(b)) = (name_i, name_j) {
                    if a == b {
                        if let (Some(fa), Some(fb)) =
                            (self.field_slot(decs[i]), self.field_slot(decs[j]))
                        {
                            debug!(field = %a, "tying protocol fields");
                            self.ast.fields.union(fa, fb);
                        }
                    }
                }
            }
        }
    }

    /// Match an argument list positionally against a parameter list.
    fn match_arg_list(
        &mut self,
        args: &mut Vec<NodeId>,
        arg_tys: &[NodeId],
        params: &[NodeId],
        pos: Position,
    ) {
        if args.len() < params.len() {
            self.sink.error(pos, "too few arguments");
        } else if args.len() > params.len() {
            self.sink.error(pos, "too many arguments");
        } else {
            for index in 0..args.len() {
                args[index] = self.match_arg(args[index], arg_tys[index], params[index]);
            }
        }
    }

    // ==================================================================
    // Cell port wiring
    // ==================================================================

    fn add_port(&mut self, ports: &mut IndexMap<Name, PortEntry>, slot: NodeId, param: bool) {
        let pos = self.ast.pos(slot);
        match self.ast.kind(slot).clone() {
            NodeKind::Dec { name, role, .. } => {
                if self.ast.is_port(slot) {
                    if let Some(text) = self.ast.name_text(name).cloned() {
                        ports.insert(
                            text,
                            PortEntry {
                                param,
                                valid: true,
                                role,
                                pos,
                                servers: 0,
                                clients: 0,
                            },
                        );
                    }
                }
            }
            NodeKind::Instance { name, args, .. } => {
                let Some(def) = self.ast.definition(name) else {
                    return;
                };
                let NodeKind::Define { value, .. } = self.ast.kind(def) else {
                    return;
                };
                let params = closure_params(self.ast, *value);
                for (arg, param_dec) in args.iter().zip(params.iter()) {
                    let Some(text) = self.ast.name_text(*arg).cloned() else {
                        continue;
                    };
                    let is_port_param = matches!(self.ast.kind(*param_dec), NodeKind::Dec { .. })
                        && self.ast.is_port(*param_dec);
                    let entry = ports.entry(text).or_default();
                    if is_port_param {
                        match self.ast.port_role(*param_dec) {
                            PortRole::Server => entry.servers += 1,
                            PortRole::Client => entry.clients += 1,
                            _ => {}
                        }
                    } else {
                        entry.valid = false;
                    }
                }
            }
            _ => {
                self.sink
                    .error(pos, "internal error: strange declaration in cell");
            }
        }
    }

    fn check_cell_ports(&mut self, ports: &IndexMap<Name, PortEntry>) {
        for entry in ports.values() {
            if !entry.valid || entry.param {
                continue;
            }
            if !matches!(entry.role, PortRole::None | PortRole::Channel) {
                self.sink
                    .error(entry.pos, "port variable must not have a direction");
            }
            if entry.servers != 1 {
                self.sink.error(
                    entry.pos,
                    "a channel must be connected to exactly one server",
                );
            }
            if entry.clients != 1 {
                self.sink.error(
                    entry.pos,
                    "a channel must be connected to exactly one client",
                );
            }
        }
    }

    // ==================================================================
    // The walk
    // ==================================================================

    pub fn check_node(&mut self, id: NodeId, cd: &mut CheckData) -> Result<(), Fatal> {
        let pos = self.ast.pos(id);
        match self.ast.kind(id).clone() {
            NodeKind::Program { items } => {
                for item in items {
                    self.check_node(item, cd)?;
                }
                Ok(())
            }

            NodeKind::Define { name, value } => {
                self.check_node(name, cd)?;
                self.check_node(value, cd)
            }

            NodeKind::Constant { name, ty, value } => {
                self.check_node(name, cd)?;
                self.check_node(ty, cd)?;
                let declared = cd.ty;
                self.check_node(value, cd)?;
                let value_ty = cd.ty;
                let coerced = self.coerce(value_ty, declared, value);
                if let NodeKind::Constant { value: slot, .. } = self.ast.kind_mut(id) {
                    *slot = coerced;
                }
                Ok(())
            }

            NodeKind::Instance {
                name,
                mut args,
                top_level,
            } => {
                self.check_node(name, cd)?;
                let mut arg_tys = Vec::with_capacity(args.len());
                for &arg in &args {
                    self.check_node(arg, cd)?;
                    arg_tys.push(cd.ty);
                }
                if top_level && !args.is_empty() {
                    self.sink
                        .error(pos, "a top-level instance cannot have arguments");
                }
                if !matches!(self.ast.kind(name), NodeKind::Name { .. }) {
                    self.sink.error(pos, "simple name required here");
                    return Ok(());
                }
                let Some(def) = self.ast.definition(name) else {
                    return Ok(());
                };
                let NodeKind::Define { value, .. } = self.ast.kind(def) else {
                    self.sink
                        .error(pos, "invocation does not match declaration");
                    return Ok(());
                };
                let value = *value;
                if matches!(
                    self.ast.kind(value),
                    NodeKind::Process { .. }
                        | NodeKind::Cell { .. }
                        | NodeKind::Procedure { .. }
                        | NodeKind::NativeDec { .. }
                ) {
                    let params = closure_params(self.ast, value);
                    self.match_arg_list(&mut args, &arg_tys, &params, pos);
                    if let NodeKind::Instance { args: slot, .. } = self.ast.kind_mut(id) {
                        *slot = args;
                    }
                } else {
                    self.sink
                        .error(pos, "invocation does not match declaration");
                }
                Ok(())
            }

            NodeKind::NativeDec { params, result } => {
                let outer = std::mem::take(&mut cd.var_names);
                cd.within_param_list = true;
                for &param in &params {
                    self.check_node(param, cd)?;
                }
                cd.within_param_list = false;
                for &param in &params {
                    if matches!(self.ast.kind(param), NodeKind::Dec { .. }) {
                        self.mark_parameter(param);
                        if self.ast.is_port(param) {
                            let ppos = self.ast.pos(param);
                            self.sink
                                .error(ppos, "a port cannot be passed to a native routine");
                        }
                        if self.ast.is_alias(param) {
                            self.mark_reference(param);
                        }
                    }
                }
                cd.var_names = outer;
                if let Some(result) = result {
                    self.check_node(result, cd)?;
                }
                Ok(())
            }

            NodeKind::Procedure { params, body, .. } => {
                let outer = std::mem::take(&mut cd.var_names);
                cd.within_param_list = true;
                for &param in &params {
                    self.check_node(param, cd)?;
                }
                cd.within_param_list = false;
                self.check_node(body, cd)?;
                for &param in &params {
                    if matches!(self.ast.kind(param), NodeKind::Dec { .. }) {
                        self.mark_parameter(param);
                        if self.ast.is_port(param) {
                            let ppos = self.ast.pos(param);
                            self.sink
                                .error(ppos, "procedures cannot have ports as parameters");
                        }
                        if self.ast.is_alias(param) {
                            self.mark_reference(param);
                        }
                    }
                }
                cd.var_names = outer;
                Ok(())
            }

            NodeKind::Process {
                params, body, name, ..
            } => {
                let outer = std::mem::take(&mut cd.var_names);
                cd.within_param_list = true;
                for &param in &params {
                    self.check_node(param, cd)?;
                }
                cd.within_param_list = false;
                self.check_node(body, cd)?;
                for &param in &params {
                    if matches!(self.ast.kind(param), NodeKind::Dec { .. }) {
                        self.mark_parameter(param);
                        if self.ast.is_port(param) {
                            let role = self.ast.port_role(param);
                            self.check_port_protocol(param, &name, body, role);
                        }
                        if self.ast.is_alias(param) {
                            self.mark_reference(param);
                        }
                    }
                }
                cd.var_names = outer;
                Ok(())
            }

            NodeKind::Cell {
                params, instances, ..
            } => {
                let outer = std::mem::take(&mut cd.var_names);
                cd.within_param_list = true;
                for &param in &params {
                    self.check_node(param, cd)?;
                }
                for &param in &params {
                    if matches!(self.ast.kind(param), NodeKind::Dec { .. }) {
                        self.mark_reference(param);
                    }
                }
                cd.within_param_list = false;
                for &instance in &instances {
                    self.check_node(instance, cd)?;
                }
                // Every internal channel must end with exactly one server
                // and one client among the sub-instances.
                let mut ports: IndexMap<Name, PortEntry> = IndexMap::new();
                for &param in &params {
                    self.add_port(&mut ports, param, true);
                }
                for &instance in &instances {
                    self.add_port(&mut ports, instance, false);
                }
                self.check_cell_ports(&ports);
                cd.var_names = outer;
                Ok(())
            }

            NodeKind::Protocol { expr, .. } => {
                cd.within_protocol = true;
                cd.prot_names = FxHashSet::default();
                self.check_node(expr, cd)?;

                let mut gen = StateGen::new();
                let mut fields = Vec::new();
                let mut lts = protocol_graph(self.ast, expr, &mut gen, &mut fields);
                lts.collapse(gen.count());
                for &dec in &fields {
                    if self.field_slot(dec).is_none() {
                        let slot = self.ast.fields.alloc();
                        if let NodeKind::Dec { name, .. } = self.ast.kind(dec) {
                            let name = *name;
                            if let NodeKind::Name { field, .. } = self.ast.kind_mut(name) {
                                *field = Some(slot);
                            }
                        }
                    }
                }
                debug!(protocol = ?id, lts = %lts, "protocol checked");
                self.protocols.insert(id, ProtocolEntry { lts, fields });

                cd.within_protocol = false;
                Ok(())
            }

            NodeKind::Sequence { stmts } => {
                let outer = std::mem::take(&mut cd.var_names);
                for stmt in stmts {
                    self.check_node(stmt, cd)?;
                }
                cd.ty = self.ast.void_ty;
                cd.var_names = outer;
                Ok(())
            }

            NodeKind::Skip => Ok(()),

            NodeKind::Exit { .. } => {
                if !cd.within_loop {
                    self.sink
                        .error(pos, "'exit' can be used only within the body of a loop");
                }
                Ok(())
            }

            NodeKind::If { arms, alt, .. } => {
                for arm in arms {
                    self.check_node(arm, cd)?;
                }
                self.check_node(alt, cd)?;
                cd.ty = self.ast.void_ty;
                Ok(())
            }

            NodeKind::CondArm {
                decs, cond, body, ..
            } => {
                for dec in decs {
                    self.check_node(dec, cd)?;
                }
                self.check_node(cond, cd)?;
                if cd.ty != self.ast.bool_ty {
                    let cpos = self.ast.pos(cond);
                    self.sink
                        .error(cpos, "boolean expression required after 'if' or 'elif'");
                }
                self.check_node(body, cd)
            }

            NodeKind::Loop { body, .. } => {
                let outer = cd.within_loop;
                cd.within_loop = true;
                self.check_node(body, cd)?;
                cd.within_loop = outer;
                cd.ty = self.ast.void_ty;
                Ok(())
            }

            NodeKind::For { comp, body, .. } => {
                let outer = std::mem::take(&mut cd.var_names);
                self.check_node(comp, cd)?;
                self.check_node(body, cd)?;
                cd.var_names = outer;
                Ok(())
            }

            NodeKind::Any {
                comp, body, alt, ..
            } => {
                let outer = cd.var_names.clone();
                self.check_node(comp, cd)?;
                self.check_node(body, cd)?;
                self.check_node(alt, cd)?;
                cd.var_names = outer;
                Ok(())
            }

            NodeKind::Comprehension {
                var,
                ty,
                collection,
                pred,
                ..
            } => {
                self.check_node(var, cd)?;
                match ty {
                    Some(ty) => self.check_node(ty, cd)?,
                    None => {
                        // Default until the collection says otherwise.
                        let int_ty = self.ast.int_ty;
                        if let NodeKind::Comprehension { ty: slot, .. } = self.ast.kind_mut(id) {
                            *slot = Some(int_ty);
                        }
                    }
                }
                cd.index_ty = self.ast.void_ty;
                self.check_node(collection, cd)?;
                if cd.index_ty != self.ast.void_ty {
                    let inferred = cd.index_ty;
                    if let NodeKind::Comprehension { ty: slot, .. } = self.ast.kind_mut(id) {
                        *slot = Some(inferred);
                    }
                }
                if let Some(pred) = pred {
                    self.check_node(pred, cd)?;
                }
                Ok(())
            }

            NodeKind::EnumSet { ty, .. } => {
                cd.iter_ty = None;
                let Some(ty) = ty else {
                    self.sink.error(pos, "enumeration type expected");
                    return Ok(());
                };
                if self.ast.is_enum_type(ty) {
                    let size = self.ast.enum_size(ty).unwrap_or(0);
                    if let NodeKind::EnumSet { size: slot, .. } = self.ast.kind_mut(id) {
                        *slot = size;
                    }
                    cd.index_ty = self.ast.resolve_type(ty);
                } else {
                    let tpos = self.ast.pos(ty);
                    self.sink.error(tpos, "enumeration type expected");
                }
                Ok(())
            }

            NodeKind::RangeSet {
                start,
                finish,
                step,
                ..
            } => {
                cd.iter_ty = None;
                let mut var_ty = cd.ty;

                self.check_node(start, cd)?;
                let start_ty = cd.ty;
                if var_ty == self.ast.void_ty {
                    // Loop variable type was not declared: use the type of
                    // the start expression.
                    var_ty = start_ty;
                    cd.index_ty = start_ty;
                } else {
                    let coerced = self.coerce(start_ty, var_ty, start);
                    if let NodeKind::RangeSet { start: slot, .. } = self.ast.kind_mut(id) {
                        *slot = coerced;
                    }
                }

                self.check_node(finish, cd)?;
                let finish_ty = cd.ty;
                let coerced = self.coerce(finish_ty, var_ty, finish);
                if let NodeKind::RangeSet { finish: slot, .. } = self.ast.kind_mut(id) {
                    *slot = coerced;
                }

                if let Some(step) = step {
                    self.check_node(step, cd)?;
                    let step_ty = cd.ty;
                    let coerced = self.coerce(step_ty, var_ty, step);
                    if let NodeKind::RangeSet { step: slot, .. } = self.ast.kind_mut(id) {
                        *slot = Some(coerced);
                    }
                }
                Ok(())
            }

            NodeKind::MapSet { map, set_kind, .. } => {
                let var_ty = cd.ty;
                if let NodeKind::MapSet { ty: slot, .. } = self.ast.kind_mut(id) {
                    *slot = Some(var_ty);
                }
                self.check_node(map, cd)?;
                let map_ty = self.ast.resolve_type(cd.ty);
                cd.iter_ty = Some(map_ty);

                let map_kind = if self.ast.is_map_type(map_ty) {
                    MapKind::Indexed
                } else if self.ast.is_array_type(map_ty) {
                    MapKind::Array
                } else if map_ty == self.ast.text_ty {
                    MapKind::Text
                } else {
                    let mpos = self.ast.pos(map);
                    self.sink.error(mpos, "map expression has incorrect type");
                    MapKind::None
                };
                if let NodeKind::MapSet { map_kind: slot, .. } = self.ast.kind_mut(id) {
                    *slot = map_kind;
                }

                if matches!(self.ast.kind(map), NodeKind::Call { .. }) {
                    let mpos = self.ast.pos(map);
                    self.sink.error(
                        mpos,
                        "function calls in this context are not implemented yet",
                    );
                }

                let element_ty = match (set_kind, map_kind) {
                    (SetKind::Domain, MapKind::Array) | (SetKind::Domain, MapKind::Text) => {
                        Some(self.ast.int_ty)
                    }
                    (SetKind::Domain, _) => self.ast.domain_type(map_ty),
                    (SetKind::Range, MapKind::Text) => Some(self.ast.char_ty),
                    (SetKind::Range, _) => self.ast.range_type(map_ty),
                };
                if let Some(element_ty) = element_ty {
                    if var_ty == self.ast.void_ty {
                        cd.index_ty = element_ty;
                        if let NodeKind::MapSet { ty: slot, .. } = self.ast.kind_mut(id) {
                            *slot = Some(element_ty);
                        }
                    } else if !self.ast.same_type(var_ty, element_ty) {
                        let message = match set_kind {
                            SetKind::Domain => {
                                "the type of the loop variable is not the domain type"
                            }
                            SetKind::Range => {
                                "the type of the loop variable is not the range type"
                            }
                        };
                        self.sink.error(pos, message);
                    }
                }
                Ok(())
            }

            NodeKind::Select { options, .. } => {
                if options.is_empty() {
                    self.sink
                        .error(pos, "select statement must have at least one branch");
                }
                for option in options {
                    self.check_node(option, cd)?;
                }
                cd.ty = self.ast.void_ty;
                Ok(())
            }

            NodeKind::SelectOption { guard, body, .. } => {
                if let Some(guard) = guard {
                    cd.within_guard = true;
                    self.check_node(guard, cd)?;
                    cd.within_guard = false;
                }
                let body_empty =
                    matches!(self.ast.kind(body), NodeKind::Sequence { stmts } if stmts.is_empty());
                if body_empty {
                    self.sink
                        .error(pos, "select option must have at least one statement");
                } else {
                    self.check_node(body, cd)?;
                }
                Ok(())
            }

            NodeKind::Dot { port, field } => {
                if cd.within_guard {
                    self.sink.error(pos, "a guard must not communicate");
                }
                if !self.ast.is_port(self.ast.expr_type(port)) && !self.ast.is_port(port) {
                    self.sink
                        .error(pos, "port name required for communication");
                }
                self.check_node(field, cd)
            }

            NodeKind::Query { port, field, .. } => {
                if cd.within_guard {
                    self.sink.error(pos, "a guard must not communicate");
                }
                if !self.ast.is_port(self.ast.expr_type(port)) && !self.ast.is_port(port) {
                    self.sink
                        .error(pos, "port name required for communication");
                }
                self.check_node(field, cd)?;
                cd.ty = self.ast.bool_ty;
                Ok(())
            }

            NodeKind::BoolLit { .. } => {
                cd.ty = self.ast.bool_ty;
                Ok(())
            }
            NodeKind::CharLit { .. } => {
                cd.ty = self.ast.char_ty;
                Ok(())
            }
            NodeKind::TextLit { .. } => {
                cd.ty = self.ast.text_ty;
                Ok(())
            }
            NodeKind::NumLit { ty, .. } => {
                if self.ast.is_int_type(ty) || ty == self.ast.float_ty || ty == self.ast.decimal_ty
                {
                    cd.ty = ty;
                    Ok(())
                } else {
                    Err(emergency_stop("numeric literal", "type"))
                }
            }

            NodeKind::ProtoSeq { parts } | NodeKind::ProtoAlt { parts } => {
                for part in parts {
                    self.check_node(part, cd)?;
                }
                Ok(())
            }

            NodeKind::ProtoRep { operand, .. } => self.check_node(operand, cd),

            NodeKind::Binop { op, lhs, rhs, .. } => self.check_binop(id, op, lhs, rhs, cd),

            NodeKind::CondExpr { lhs, pred, rhs, .. } => {
                self.check_node(lhs, cd)?;
                let lhs_ty = cd.ty;
                self.check_node(pred, cd)?;
                let pred_ty = cd.ty;
                self.check_node(rhs, cd)?;
                let rhs_ty = cd.ty;
                if pred_ty != self.ast.bool_ty {
                    let ppos = self.ast.pos(pred);
                    self.sink.error(ppos, "predicate type must be Bool");
                }
                if self.ast.same_type(lhs_ty, rhs_ty) {
                    if let NodeKind::CondExpr { ty, .. } = self.ast.kind_mut(id) {
                        *ty = Some(lhs_ty);
                    }
                    cd.ty = lhs_ty;
                } else {
                    let rpos = self.ast.pos(rhs);
                    self.sink.error(
                        rpos,
                        "operands of if-else expression must have the same type",
                    );
                }
                Ok(())
            }

            NodeKind::Unop { op, operand, .. } => {
                self.check_node(operand, cd)?;
                if cd.within_protocol {
                    return Ok(());
                }
                let operand_ty = self.ast.resolve_type(cd.ty);
                if let NodeKind::Unop { ty, .. } = self.ast.kind_mut(id) {
                    *ty = Some(operand_ty);
                }
                match op {
                    UnOp::Not => {
                        if operand_ty != self.ast.bool_ty {
                            self.sink.error(pos, "'not' requires a Boolean operand");
                        }
                    }
                    UnOp::Minus => {
                        let negatable = operand_ty == self.ast.int_ty
                            || operand_ty == self.ast.uint_ty
                            || operand_ty == self.ast.float_ty
                            || operand_ty == self.ast.decimal_ty;
                        if !negatable {
                            self.sink.error(pos, "'-' requires a numeric operand");
                        }
                    }
                    UnOp::Execute => {
                        let byte_array = self.ast.is_array_type(operand_ty)
                            && self.ast.range_type(operand_ty) == Some(self.ast.ubyte_ty);
                        if !byte_array {
                            self.sink.error(
                                pos,
                                "'execute' requires an array of unsigned Bytes as its operand",
                            );
                        }
                        let int_ty = self.ast.int_ty;
                        if let NodeKind::Unop { ty, .. } = self.ast.kind_mut(id) {
                            *ty = Some(int_ty);
                        }
                        cd.ty = self.ast.int_ty;
                        return Ok(());
                    }
                }
                cd.ty = operand_ty;
                Ok(())
            }

            NodeKind::Subscript { base, index, .. } => {
                self.check_node(index, cd)?;
                self.check_node(base, cd)?;
                let base_ty = self.ast.resolve_type(cd.ty);
                let index_ty = self.ast.expr_type(index);
                if base_ty == self.ast.text_ty {
                    if !self.ast.is_int_type(self.ast.resolve_type(index_ty)) {
                        let spos = self.ast.pos(index);
                        self.sink
                            .error(spos, "subscript must be an integer expression");
                    }
                    cd.ty = self.ast.char_ty;
                } else if self.ast.is_array_type(base_ty) {
                    if !self.ast.is_int_type(self.ast.resolve_type(index_ty)) {
                        let spos = self.ast.pos(index);
                        self.sink
                            .error(spos, "subscript must be an integer expression");
                    }
                    cd.ty = self.ast.range_type(base_ty).unwrap_or(self.ast.void_ty);
                } else if self.ast.is_map_type(base_ty) {
                    let domain = self.ast.domain_type(base_ty).unwrap_or(self.ast.void_ty);
                    if !self.ast.same_type(index_ty, domain) {
                        let spos = self.ast.pos(index);
                        self.sink.error(spos, "subscript has wrong type");
                    }
                    cd.ty = self.ast.range_type(base_ty).unwrap_or(self.ast.void_ty);
                } else {
                    let bpos = self.ast.pos(base);
                    self.sink.error(bpos, "variable cannot be subscripted");
                }
                Ok(())
            }

            NodeKind::Subrange {
                base, lo, hi, lvalue,
            } => {
                self.check_node(lo, cd)?;
                self.check_node(hi, cd)?;
                self.check_node(base, cd)?;
                let base_ty = self.ast.resolve_type(cd.ty);
                if lvalue {
                    self.sink.error(
                        pos,
                        "assignment to characters in a text is not implemented",
                    );
                }
                if base_ty == self.ast.text_ty {
                    for sub in [lo, hi] {
                        let sub_ty = self.ast.resolve_type(self.ast.expr_type(sub));
                        if !self.ast.is_int_type(sub_ty) {
                            let spos = self.ast.pos(sub);
                            self.sink
                                .error(spos, "subscript must be an integer expression");
                        }
                    }
                    cd.ty = self.ast.text_ty;
                } else if self.ast.is_map_type(base_ty) {
                    self.sink
                        .error(pos, "subrange not allowed for indexed types");
                }
                Ok(())
            }

            NodeKind::IterOp { map, fun, .. } => {
                self.check_node(map, cd)?;
                let map_ty = self.ast.expr_type(map);
                cd.ty = match fun {
                    IterFun::Start | IterFun::Step => self.ast.void_ty,
                    IterFun::Finish => self.ast.bool_ty,
                    IterFun::Key => self.ast.domain_type(map_ty).unwrap_or(self.ast.void_ty),
                    IterFun::Value => self.ast.range_type(map_ty).unwrap_or(self.ast.void_ty),
                };
                Ok(())
            }

            NodeKind::Dec { .. } => self.check_dec(id, cd),

            NodeKind::VoidType
            | NodeKind::BoolType
            | NodeKind::ByteType { .. }
            | NodeKind::IntType { .. }
            | NodeKind::FloatType
            | NodeKind::DecimalType
            | NodeKind::CharType
            | NodeKind::TextType
            | NodeKind::FileType { .. } => {
                cd.ty = id;
                Ok(())
            }

            NodeKind::EnumType { values, .. } => {
                cd.ty = id;
                for (i, &value) in values.iter().enumerate() {
                    for &later in &values[i + 1..] {
                        let same = match (self.ast.kind(value), self.ast.kind(later)) {
                            (
                                NodeKind::EnumValue { name: a, .. },
                                NodeKind::EnumValue { name: b, .. },
                            ) => a == b,
                            _ => false,
                        };
                        if same {
                            let vpos = self.ast.pos(later);
                            self.sink.error(vpos, "enumeration name used twice");
                        }
                    }
                    self.check_node(value, cd)?;
                    cd.ty = id;
                }
                Ok(())
            }

            NodeKind::EnumValue { name, .. } => {
                let vpos = pos;
                let enum_ty = cd.ty;
                self.check_scope_name(cd, &name, vpos);
                if let NodeKind::EnumValue { ty, .. } = self.ast.kind_mut(id) {
                    *ty = Some(enum_ty);
                }
                Ok(())
            }

            NodeKind::ArrayType { elem, lo, hi } => {
                self.check_node(elem, cd)?;
                self.check_node(lo, cd)?;
                if cd.ty != self.ast.int_ty {
                    let lpos = self.ast.pos(lo);
                    self.sink
                        .error(lpos, "lower bound of array must be an integer");
                }
                self.check_node(hi, cd)?;
                if cd.ty != self.ast.int_ty {
                    let hpos = self.ast.pos(hi);
                    self.sink
                        .error(hpos, "upper bound of array must be an integer");
                }
                cd.ty = id;
                Ok(())
            }

            NodeKind::MapType { domain, range, .. } => {
                self.check_node(domain, cd)?;
                self.check_node(range, cd)?;
                cd.ty = id;
                Ok(())
            }

            NodeKind::IterType { .. } => {
                cd.ty = id;
                Ok(())
            }

            NodeKind::Call { .. } => self.check_call(id, cd),

            NodeKind::Name {
                text,
                defining,
                definition,
                ..
            } => {
                cd.ty = self.ast.void_ty;
                if defining {
                    if cd.within_protocol {
                        if cd.prot_names.contains(&text) {
                            self.sink.error(
                                pos,
                                format!("name '{text}' used more than once in protocol"),
                            );
                        } else {
                            cd.prot_names.insert(text);
                        }
                    } else {
                        self.check_scope_name(cd, &text, pos);
                    }
                } else if let Some(def) = definition {
                    cd.ty = self
                        .ast
                        .def_type(def)
                        .unwrap_or(self.ast.void_ty);
                }
                Ok(())
            }

            NodeKind::Thread {
                inputs,
                outputs,
                body,
                ..
            } => {
                let outer = std::mem::take(&mut cd.var_names);
                for input in inputs {
                    self.check_node(input, cd)?;
                }
                for output in outputs {
                    self.check_node(output, cd)?;
                }
                self.check_node(body, cd)?;
                cd.var_names = outer;
                Ok(())
            }

            NodeKind::ThreadParam { name, ty, .. } => {
                self.check_node(name, cd)?;
                self.check_node(ty, cd)?;
                cd.ty = self.ast.void_ty;
                Ok(())
            }

            NodeKind::Start { calls, body } => {
                for call in calls {
                    self.check_node(call, cd)?;
                }
                self.check_node(body, cd)
            }

            NodeKind::ThreadCall {
                name,
                inputs,
                outputs,
                ..
            } => {
                self.check_node(name, cd)?;
                let def = self.ast.definition(name);
                let is_thread = def.map_or(false, |d| {
                    matches!(self.ast.kind(d), NodeKind::Define { value, .. }
                        if matches!(self.ast.kind(*value), NodeKind::Thread { .. }))
                });
                if !is_thread {
                    let npos = self.ast.pos(name);
                    self.sink.error(npos, "thread name required here");
                }
                for input in inputs {
                    self.check_node(input, cd)?;
                }
                for output in outputs {
                    self.check_node(output, cd)?;
                }
                Ok(())
            }

            _ => Ok(()),
        }
    }

    // ==================================================================
    // Operators
    // ==================================================================

    fn check_binop(
        &mut self,
        id: NodeId,
        op: BinOp,
        lhs: NodeId,
        rhs: NodeId,
        cd: &mut CheckData,
    ) -> Result<(), Fatal> {
        let pos = self.ast.pos(id);
        self.check_node(lhs, cd)?;
        let lhs_ty = cd.ty;
        self.check_node(rhs, cd)?;
        let rhs_ty = cd.ty;
        if cd.within_protocol {
            return Ok(());
        }
        let lt = self.ast.resolve_type(lhs_ty);
        let rt = self.ast.resolve_type(rhs_ty);
        let bool_ty = self.ast.bool_ty;
        let void_ty = self.ast.void_ty;
        let text_ty = self.ast.text_ty;

        if op == BinOp::Extend {
            if !self.ast.is_array_type(lt) {
                let lpos = self.ast.pos(lhs);
                self.sink.error(lpos, "operand should be an array");
                return Ok(());
            }
            let range = self.ast.range_type(lt).unwrap_or(void_ty);
            let coerced = self.coerce(rt, range, rhs);
            self.replace_binop_rhs(id, coerced);
            self.set_binop_type(id, lt);
            cd.ty = lt;
            return Ok(());
        }

        if op.is_bool() {
            if lt != bool_ty {
                let lpos = self.ast.pos(lhs);
                self.sink.error(lpos, "operand should be Bool");
                return Ok(());
            }
            if rt != bool_ty {
                let rpos = self.ast.pos(rhs);
                self.sink.error(rpos, "operand should be Bool");
                return Ok(());
            }
            self.set_binop_type(id, bool_ty);
            cd.ty = bool_ty;
            return Ok(());
        }

        if op.is_equality() {
            let join = self.join_types(lt, rt);
            if join == void_ty {
                self.sink.error(pos, "expressions are incomparable");
            } else {
                let new_lhs = self.coerce(lt, join, lhs);
                let new_rhs = self.coerce(rt, join, rhs);
                self.replace_binop_operands(id, new_lhs, new_rhs);
            }
            self.set_binop_type(id, bool_ty);
            cd.ty = bool_ty;
            return Ok(());
        }

        if op.is_ordering() {
            let join = self.join_types(lt, rt);
            if join == bool_ty || join == void_ty {
                self.sink.error(pos, "expressions cannot be ordered");
            } else {
                let new_lhs = self.coerce(lt, join, lhs);
                let new_rhs = self.coerce(rt, join, rhs);
                self.replace_binop_operands(id, new_lhs, new_rhs);
            }
            self.set_binop_type(id, bool_ty);
            cd.ty = bool_ty;
            return Ok(());
        }

        if op.is_numeric() {
            // '+' doubles as text concatenation.
            if op != BinOp::Plus && (self.ast.is_text_type(lt) || self.ast.is_text_type(rt)) {
                self.sink.error(pos, "operands have incorrect types");
                self.set_binop_type(id, void_ty);
                cd.ty = void_ty;
                return Ok(());
            }
            let join = self.join_types(lt, rt);
            if join == void_ty {
                self.sink.error(pos, "operands have incorrect types");
            } else {
                let new_lhs = self.coerce(lt, join, lhs);
                let new_rhs = self.coerce(rt, join, rhs);
                self.replace_binop_operands(id, new_lhs, new_rhs);
            }
            self.set_binop_type(id, join);
            cd.ty = join;
            return Ok(());
        }

        if op == BinOp::Cat {
            let new_lhs = self.coerce(lt, text_ty, lhs);
            let new_rhs = self.coerce(rt, text_ty, rhs);
            self.replace_binop_operands(id, new_lhs, new_rhs);
            self.set_binop_type(id, text_ty);
            cd.ty = text_ty;
            return Ok(());
        }

        self.sink.error(pos, "operands have incorrect types");
        self.set_binop_type(id, void_ty);
        cd.ty = void_ty;
        Ok(())
    }

    fn set_binop_type(&mut self, id: NodeId, ty: NodeId) {
        if let NodeKind::Binop { ty: slot, .. } = self.ast.kind_mut(id) {
            *slot = Some(ty);
        }
    }

    fn replace_binop_operands(&mut self, id: NodeId, new_lhs: NodeId, new_rhs: NodeId) {
        if let NodeKind::Binop { lhs, rhs, .. } = self.ast.kind_mut(id) {
            *lhs = new_lhs;
            *rhs = new_rhs;
        }
    }

    fn replace_binop_rhs(&mut self, id: NodeId, new_rhs: NodeId) {
        if let NodeKind::Binop { rhs, .. } = self.ast.kind_mut(id) {
            *rhs = new_rhs;
        }
    }

    // ==================================================================
    // Function calls
    // ==================================================================

    fn check_call(&mut self, id: NodeId, cd: &mut CheckData) -> Result<(), Fatal> {
        let pos = self.ast.pos(id);
        let NodeKind::Call {
            name, mut args, ..
        } = self.ast.kind(id).clone()
        else {
            return Ok(());
        };
        let mut arg_tys = Vec::with_capacity(args.len());
        for &arg in &args {
            self.check_node(arg, cd)?;
            arg_tys.push(cd.ty);
        }

        // A name bound to a native-routine stub resolves like an instance.
        if let Some(def) = self.ast.definition(name) {
            if let NodeKind::Define { value, .. } = self.ast.kind(def) {
                if let NodeKind::NativeDec { params, result } = self.ast.kind(*value).clone() {
                    self.match_arg_list(&mut args, &arg_tys, &params, pos);
                    if let NodeKind::Call { args: slot, .. } = self.ast.kind_mut(id) {
                        *slot = args;
                    }
                    cd.ty = result.unwrap_or(self.ast.void_ty);
                    return Ok(());
                }
            }
        }

        let fun_name = self.ast.name_text(name).cloned().unwrap_or_default();

        if fun_name.as_str() == "exists" {
            if args.len() == 1 {
                if !matches!(self.ast.kind(args[0]), NodeKind::Subscript { .. }) {
                    self.sink
                        .error(pos, "the argument of 'exists' should be a map element");
                }
            } else {
                self.sink
                    .error(pos, "'exists' should have exactly one argument");
            }
            cd.ty = self.ast.bool_ty;
            if let NodeKind::Call { target, .. } = self.ast.kind_mut(id) {
                *target = Some(self.funcs.exists_index());
            }
            return Ok(());
        }

        // Choose the overload needing the fewest conversions.
        let mut min_conversions = MAX_CONV;
        let mut best: Option<usize> = None;
        let mut name_found = false;
        for (index, def) in self.funcs.defs().iter().enumerate() {
            if def.user_name == fun_name.as_str() && !def.user_name.is_empty() {
                name_found = true;
                if def.params.len() == args.len() {
                    let count = self
                        .funcs
                        .count_conversions(self.ast, &def.params, &arg_tys);
                    if count < min_conversions {
                        min_conversions = count;
                        best = Some(index);
                    }
                }
            }
        }

        if !name_found {
            self.sink
                .error(pos, "there is no function with this name");
            return Ok(());
        }
        let Some(best) = best.filter(|_| min_conversions < MAX_CONV) else {
            self.sink
                .error(pos, "the function cannot be applied to the given arguments");
            return Ok(());
        };

        let params = self.funcs.get(best).params.clone();
        for (index, &param) in params.iter().enumerate() {
            if let ParamTy::Exact(par_ty) = param {
                args[index] = self.coerce(arg_tys[index], par_ty, args[index]);
            }
        }
        let result = self.funcs.get(best).result;
        if let NodeKind::Call {
            args: slot, target, ..
        } = self.ast.kind_mut(id)
        {
            *slot = args;
            *target = Some(best);
        }
        cd.ty = result;
        Ok(())
    }

    // ==================================================================
    // Declarations and assignments
    // ==================================================================

    fn check_dec(&mut self, id: NodeId, cd: &mut CheckData) -> Result<(), Fatal> {
        let pos = self.ast.pos(id);
        let NodeKind::Dec {
            name,
            ty,
            value,
            generated,
            moved,
            ..
        } = self.ast.kind(id).clone()
        else {
            return Ok(());
        };

        if cd.within_protocol {
            if let Some(ty) = ty {
                if self.ast.is_map_type(ty) {
                    let tpos = self.ast.pos(ty);
                    self.sink
                        .error(tpos, "transfer of maps is not implemented yet");
                }
                if self.ast.is_array_type(ty) {
                    let tpos = self.ast.pos(ty);
                    self.sink
                        .error(tpos, "transfer of arrays is not implemented yet");
                }
                self.check_node(ty, cd)?;
            }
            if let Some(value) = value {
                let vpos = self.ast.pos(value);
                self.sink
                    .error(vpos, "default message values are not allowed");
            }
            self.check_node(name, cd)?;
            return Ok(());
        }

        let var_ty;
        if generated {
            // Created by extraction: the type comes from the initializer,
            // which is always present.
            let value = value.expect("generated declaration has a value");
            self.check_node(value, cd)?;
            var_ty = cd.ty;
            if let NodeKind::Dec { ty: slot, .. } = self.ast.kind_mut(id) {
                *slot = Some(var_ty);
            }
            self.check_node(name, cd)?;
        } else {
            self.check_node(name, cd)?;
            if let Some(ty) = ty {
                if self.ast.is_port(ty) && !self.ast.is_map_type(ty) {
                    // The "type" of a port is its protocol.
                    cd.ty = self.ast.protocol_of(ty).unwrap_or(self.ast.void_ty);
                } else {
                    self.check_node(ty, cd)?;
                }
            }
            var_ty = cd.ty;
        }

        if matches!(self.ast.kind(name), NodeKind::Subscript { .. }) && ty.is_some() {
            let npos = self.ast.pos(name);
            self.sink
                .error(npos, "a subscripted variable cannot be declared");
        }

        let name_is_dot = matches!(self.ast.kind(name), NodeKind::Dot { .. });
        let value_is_dot = value
            .map(|v| matches!(self.ast.kind(v), NodeKind::Dot { .. }))
            .unwrap_or(false);

        // Message direction of a send.
        if name_is_dot && value.is_some() {
            let role = self.ast.port_role(name);
            match self.ast.message_kind(name) {
                MessageKind::Reply => {
                    if role == PortRole::Client {
                        let npos = self.ast.pos(name);
                        self.sink.error(npos, "a client cannot send a reply");
                    }
                }
                MessageKind::Query => {
                    if role == PortRole::Server {
                        let npos = self.ast.pos(name);
                        self.sink.error(npos, "a server cannot send a query");
                    }
                }
                MessageKind::None => {
                    let npos = self.ast.pos(name);
                    self.sink
                        .error(npos, "field must be a reply or a query");
                }
            }
        }

        // Message direction of a receive.
        if value_is_dot {
            let value = value.expect("checked above");
            let role = self.ast.port_role(value);
            let msg = self.ast.message_kind(value);
            if role == PortRole::Client && msg == MessageKind::Query {
                let vpos = self.ast.pos(value);
                self.sink.error(vpos, "a client cannot receive a query");
            } else if role == PortRole::Server && msg == MessageKind::Reply {
                let vpos = self.ast.pos(value);
                self.sink.error(vpos, "a server cannot receive a reply");
            }
        }

        // A bare field mention is a signal; settle its direction.
        if value.is_none() && ty.is_none() {
            if !name_is_dot {
                self.sink.error(pos, "name used without context");
                return Ok(());
            }
            let role = self.ast.port_role(name);
            let msg = self.ast.message_kind(name);
            let comm = match (role, msg) {
                (PortRole::Client, MessageKind::Query)
                | (PortRole::Server, MessageKind::Reply) => CommKind::Send,
                (PortRole::Client, MessageKind::Reply)
                | (PortRole::Server, MessageKind::Query) => CommKind::Receive,
                _ => {
                    self.sink.error(pos, "signal direction error");
                    CommKind::None
                }
            };
            if let NodeKind::Dec { comm: slot, .. } = self.ast.kind_mut(id) {
                *slot = comm;
            }
            return Ok(());
        }

        // Sending the result of file_read is unsupported; the read and the
        // send must go through a variable.
        if name_is_dot {
            if let Some(value) = value {
                if self.ast.call_target_name(value).map(|n| n.as_str()) == Some("file_read") {
                    let vpos = self.ast.pos(value);
                    self.sink
                        .error(vpos, "sending from file_read is not implemented yet");
                }
            }
        }

        if let Some(value) = value {
            if ty.is_none() && self.ast.is_constant_name(name) {
                let npos = self.ast.pos(name);
                self.sink
                    .error(npos, "assignment to a constant is not allowed");
            }
            if cd.within_param_list {
                let vpos = self.ast.pos(value);
                self.sink
                    .error(vpos, "parameters cannot have default values");
            }
            if !name_is_dot && !self.ast.is_assignable(name) && !generated {
                let npos = self.ast.pos(name);
                self.sink
                    .error(npos, "assignment to this variable is not allowed");
            }
            if moved && !matches!(self.ast.kind(value), NodeKind::Name { .. }) {
                let vpos = self.ast.pos(value);
                self.sink.error(vpos, "an expression cannot be moved");
            }

            if !generated {
                self.check_node(value, cd)?;
                let value_ty = cd.ty;
                if value_ty != self.ast.void_ty || var_ty != self.ast.void_ty {
                    let coerced = self.coerce(value_ty, var_ty, value);
                    if let NodeKind::Dec { value: slot, .. } = self.ast.kind_mut(id) {
                        *slot = Some(coerced);
                    }
                }
            }
        }
        Ok(())
    }

    fn mark_parameter(&mut self, dec: NodeId) {
        if let NodeKind::Dec { parameter, .. } = self.ast.kind_mut(dec) {
            *parameter = true;
        }
    }

    fn mark_reference(&mut self, dec: NodeId) {
        if let NodeKind::Dec { reference, .. } = self.ast.kind_mut(dec) {
            *reference = true;
        }
    }
}

/// Parameter list of a closure or cell value node.
pub(crate) fn closure_params(ast: &Ast, value: NodeId) -> Vec<NodeId> {
    match ast.kind(value) {
        NodeKind::Process { params, .. }
        | NodeKind::Procedure { params, .. }
        | NodeKind::Cell { params, .. }
        | NodeKind::NativeDec { params, .. } => params.clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::sem::{bind, extract};

    fn checked(text: &str) -> (Ast, NodeId, DiagnosticSink, ProtocolMap) {
        let mut ast = Ast::new();
        let mut sink = DiagnosticSink::with_source(text);
        sink.warnings_enabled = true;
        let program = parser::parse(text, &mut ast, &mut sink).unwrap();
        extract(&mut ast, &mut sink, program);
        bind(&mut ast, &mut sink, program, None).unwrap();
        let funcs = FuncTable::new(&ast);
        let protocols = check(&mut ast, &mut sink, &funcs, program).unwrap();
        (ast, program, sink, protocols)
    }

    fn error_count(text: &str) -> usize {
        checked(text).2.error_count()
    }

    #[test]
    fn arithmetic_and_assignment_check_cleanly() {
        assert_eq!(
            error_count("Q = process | x : Integer := 3; x := x + 4 end"),
            0
        );
    }

    #[test]
    fn byte_range_boundary() {
        // -129 does not fit a Byte but is a fine Integer.
        assert_eq!(error_count("Q = process | x : Byte := -129 end"), 1);
        assert_eq!(error_count("Q = process | x : Integer := -129 end"), 0);
        assert_eq!(error_count("Q = process | x : Byte := -128 end"), 0);
    }

    #[test]
    fn select_needs_options() {
        assert_eq!(error_count("Q = process | select end end"), 1);
    }

    #[test]
    fn exit_outside_loop_is_rejected() {
        assert_eq!(error_count("Q = process | exit end"), 1);
        assert_eq!(error_count("Q = process | loop exit end end"), 0);
    }

    #[test]
    fn guards_must_not_communicate() {
        let text = "P = [ a : Integer ];\n\
                    Q = process p : +P | select | p?a | x : Integer := p.a end end";
        assert_eq!(error_count(text), 1);
    }

    #[test]
    fn duplicate_names_in_scope_are_rejected() {
        assert_eq!(
            error_count("Q = process | x : Integer := 1; x : Integer := 2 end"),
            1
        );
    }

    #[test]
    fn client_cannot_send_a_reply() {
        let text = "P = [ a : Integer ; ^b : Integer ];\n\
                    Q = process p : -P | p.b := 1 end";
        assert_eq!(error_count(text), 1);
    }

    #[test]
    fn server_conformance_warning_orders() {
        // Server in protocol order: no warning. Reversed order: warning.
        let good = "P = [ a ; b ];\n\
                    Q = process p : +P | p.a; p.b end";
        let bad = "P = [ a ; b ];\n\
                   Q = process p : +P | p.b; p.a end";
        let (_, _, sink, _) = checked(good);
        assert_eq!(sink.error_count(), 0);
        assert!(!sink
            .diagnostics()
            .iter()
            .any(|d| d.severity == crate::diag::Severity::Warning));
        let (_, _, sink, _) = checked(bad);
        assert_eq!(sink.error_count(), 0);
        assert!(sink
            .diagnostics()
            .iter()
            .any(|d| d.severity == crate::diag::Severity::Warning));
    }

    #[test]
    fn cell_channel_wiring_is_enforced() {
        let ok = "P = [ a ];\n\
                  S = process p : +P | p.a end;\n\
                  C = process p : -P | p.a end;\n\
                  Cell1 = cell ch : P; S(ch); C(ch) end";
        assert_eq!(error_count(ok), 0);
        let two_servers = "P = [ a ];\n\
                           S = process p : +P | p.a end;\n\
                           Cell1 = cell ch : P; S(ch); S(ch) end";
        assert!(error_count(two_servers) >= 1);
    }

    #[test]
    fn instance_protocol_mismatch_is_an_error() {
        let text = "P = [ a ; b ];\n\
                    R = [ b ; a ];\n\
                    S = process p : +P | p.a; p.b end;\n\
                    C = process p : -R | p.b; p.a end;\n\
                    Cell1 = cell ch : R; S(ch); C(ch) end";
        assert!(error_count(text) >= 1);
    }

    #[test]
    fn tied_fields_share_a_class() {
        let text = "P = [ msg : Text ];\n\
                    R = [ msg : Text ];\n\
                    S = process p : +P | v : Text := p.msg end;\n\
                    C = process p : -R | p.msg := \"hi\" end;\n\
                    Cell1 = cell ch : P; S(ch); C(ch) end";
        let (mut ast, _, sink, protocols) = checked(text);
        assert_eq!(sink.error_count(), 0, "{}", sink.render_all());
        let mut slots = Vec::new();
        for entry in protocols.values() {
            for &dec in &entry.fields {
                if let NodeKind::Dec { name, .. } = ast.kind(dec) {
                    if let NodeKind::Name {
                        field: Some(f), ..
                    } = ast.kind(*name)
                    {
                        slots.push(*f);
                    }
                }
            }
        }
        assert_eq!(slots.len(), 2);
        assert!(ast.fields.tied(slots[0], slots[1]));
    }

    #[test]
    fn overload_selection_minimizes_conversions() {
        let (ast, program, sink, _) =
            checked("Q = process | t : Text := text(42) end");
        assert_eq!(sink.error_count(), 0, "{}", sink.render_all());
        // Find the call and confirm it picked the Integer overload.
        let call = (0..ast.len() as u32)
            .map(NodeId)
            .find(|&id| matches!(ast.kind(id), NodeKind::Call { target: Some(_), .. }))
            .expect("resolved call");
        let NodeKind::Call { target: Some(t), .. } = ast.kind(call) else {
            unreachable!()
        };
        assert_eq!(
            FuncTable::new(&ast).get(*t).runtime_name,
            "int2string1"
        );
        let _ = program;
    }

    #[test]
    fn enum_for_loop_checks() {
        let text = "Color = <red, green, blue>;\n\
                    Q = process | for c in Color do t : Text := text(c) end end";
        assert_eq!(error_count(text), 0);
    }

    #[test]
    fn unknown_function_is_an_error() {
        assert_eq!(
            error_count("Q = process | x : Integer := mystery(1) end"),
            1
        );
    }
}
