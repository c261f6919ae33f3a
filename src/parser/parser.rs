//! Recursive descent parser for Oriel.
//!
//! Builds the arena tree from tokens. The parser recovers from most
//! mistakes by recording a diagnostic and pressing on; it unwinds with
//! [`Fatal`] only where continuing would leave the tree in a shape the
//! later passes cannot survive.

use crate::base::{LineIndex, Name, Position};
use crate::diag::{DiagnosticSink, Fatal};
use crate::syntax::{
    Ast, BinOp, CommKind, IterFun, MapKind, MessageKind, NodeId, NodeKind, Policy, PortRole,
    ProtoOp, SetKind, UnOp, NO_LABEL,
};

use super::lexer::{Lexer, TokKind};

/// A cooked token: kind, decoded text, and line/column position.
#[derive(Debug, Clone)]
struct Token {
    kind: TokKind,
    value: String,
    pos: Position,
}

/// Parse a compilation unit into the arena, returning the program node.
pub fn parse(text: &str, ast: &mut Ast, sink: &mut DiagnosticSink) -> Result<NodeId, Fatal> {
    Parser::new(text, ast, sink).parse_program()
}

/// The parser proper. One instance per compilation unit.
pub struct Parser<'a> {
    tokens: Vec<Token>,
    index: usize,
    ast: &'a mut Ast,
    sink: &'a mut DiagnosticSink,
    case_temp: u32,
}

impl<'a> Parser<'a> {
    pub fn new(text: &str, ast: &'a mut Ast, sink: &'a mut DiagnosticSink) -> Self {
        let index = LineIndex::new(text);
        let mut tokens: Vec<Token> = Lexer::new(text)
            .map(|raw| Token {
                kind: raw.kind,
                value: cook_value(raw.kind, raw.text),
                pos: index.position(raw.offset),
            })
            .collect();
        let eof_pos = tokens.last().map(|t| t.pos).unwrap_or_default();
        tokens.push(Token {
            kind: TokKind::Eof,
            value: String::new(),
            pos: eof_pos,
        });
        Self {
            tokens,
            index: 0,
            ast,
            sink,
            case_temp: 0,
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn kind(&self) -> TokKind {
        self.tokens[self.index].kind
    }

    fn value(&self) -> &str {
        &self.tokens[self.index].value
    }

    fn pos(&self) -> Position {
        self.tokens[self.index].pos
    }

    fn advance(&mut self) {
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
    }

    /// Advance past the current token if it has the expected kind.
    fn eat(&mut self, kind: TokKind) -> bool {
        if self.kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Require a token; report and continue without advancing if absent.
    fn expect(&mut self, kind: TokKind, message: &str) {
        if !self.eat(kind) {
            let pos = self.pos();
            self.sink.error(pos, message.to_string());
        }
    }

    // ------------------------------------------------------------------
    // Starter-set predicates
    // ------------------------------------------------------------------

    fn is_basic_type(&self) -> bool {
        matches!(
            self.kind(),
            TokKind::BoolKw
                | TokKind::ByteKw
                | TokKind::IntegerKw
                | TokKind::DecimalKw
                | TokKind::FloatKw
                | TokKind::CharKw
                | TokKind::TextKw
                | TokKind::InputFileKw
                | TokKind::OutputFileKw
                | TokKind::UnsignedKw
                | TokKind::VoidKw
        )
    }

    fn is_type(&self) -> bool {
        self.is_basic_type()
            || matches!(self.kind(), TokKind::Ident | TokKind::EnumKw | TokKind::Lt)
    }

    fn is_statement(&self) -> bool {
        matches!(
            self.kind(),
            TokKind::Ident
                | TokKind::SkipKw
                | TokKind::ExitKw
                | TokKind::UntilKw
                | TokKind::WhileKw
                | TokKind::IfKw
                | TokKind::CasesKw
                | TokKind::LoopKw
                | TokKind::ForKw
                | TokKind::AnyKw
                | TokKind::SelectKw
                | TokKind::LoopSelectKw
                | TokKind::StartKw
        )
    }

    fn is_slot(&self) -> bool {
        matches!(
            self.kind(),
            TokKind::Ident | TokKind::LBrace | TokKind::ProcessKw | TokKind::AliasKw
        )
    }

    fn is_expression(&self) -> bool {
        matches!(
            self.kind(),
            TokKind::TrueKw
                | TokKind::FalseKw
                | TokKind::ExecuteKw
                | TokKind::Char
                | TokKind::Text
                | TokKind::Int
                | TokKind::Decimal
                | TokKind::Ident
                | TokKind::LParen
                | TokKind::NotKw
                | TokKind::Minus
                | TokKind::Sharp
        )
    }

    fn is_argument(&self) -> bool {
        matches!(
            self.kind(),
            TokKind::TrueKw
                | TokKind::FalseKw
                | TokKind::Char
                | TokKind::Text
                | TokKind::Int
                | TokKind::Decimal
                | TokKind::Ident
                | TokKind::LParen
        )
    }

    // ------------------------------------------------------------------
    // Node helpers
    // ------------------------------------------------------------------

    fn mk_name(&mut self, pos: Position, text: &str, defining: bool) -> NodeId {
        self.ast.alloc(
            pos,
            NodeKind::Name {
                text: Name::new(text),
                defining,
                definition: None,
                owner: Name::default(),
                var_num: NO_LABEL,
                field: None,
                by_reference: false,
            },
        )
    }

    fn mk_dec(
        &mut self,
        pos: Position,
        name: NodeId,
        ty: Option<NodeId>,
        value: Option<NodeId>,
        role: PortRole,
        msg: MessageKind,
        generated: bool,
        constant: bool,
        moved: bool,
        alias: bool,
    ) -> NodeId {
        self.ast.alloc(
            pos,
            NodeKind::Dec {
                name,
                ty,
                value,
                role,
                msg,
                generated,
                constant,
                moved,
                alias,
                parameter: false,
                reference: false,
                comm: CommKind::None,
                transfer: NO_LABEL,
                temp_num: NO_LABEL,
                branch: false,
            },
        )
    }

    fn mk_empty_sequence(&mut self, pos: Position) -> NodeId {
        self.ast.alloc(pos, NodeKind::Sequence { stmts: Vec::new() })
    }

    fn set_defining(&mut self, id: NodeId, value: bool) {
        if let NodeKind::Name { defining, .. } = self.ast.kind_mut(id) {
            *defining = value;
        }
    }

    /// Report that only one target is allowed in this context.
    fn check_single_name(&mut self, names: &[NodeId], pos: Position) {
        if names.len() > 1 {
            self.sink
                .error(pos, "only one target is allowed in this context");
        }
    }

    // ------------------------------------------------------------------
    // Program
    // ------------------------------------------------------------------

    /// Parse an entire program: a list of top-level definitions.
    pub fn parse_program(&mut self) -> Result<NodeId, Fatal> {
        let start_pos = self.pos();
        let mut items = Vec::new();
        while self.kind() != TokKind::Eof {
            match self.kind() {
                TokKind::ImportKw => {
                    // Imports are resolved by the source loader; here they
                    // are recognized and skipped.
                    self.advance();
                    while self.kind() == TokKind::Ident {
                        self.advance();
                        if self.kind() == TokKind::Comma {
                            self.advance();
                        } else if self.kind() == TokKind::Semicolon {
                            self.advance();
                            break;
                        } else {
                            break;
                        }
                    }
                }
                TokKind::Ident => {
                    let name = self.parse_name(true)?;
                    match self.kind() {
                        // Name : Type = Expression
                        TokKind::Colon => {
                            self.advance();
                            let pos = self.pos();
                            let ty = self.parse_type()?;
                            self.expect(TokKind::Eq, "'=' expected or error in definition");
                            let value = self.parse_expression()?;
                            items.push(
                                self.ast
                                    .alloc(pos, NodeKind::Constant { name, ty, value }),
                            );
                        }
                        // Name = Declaration
                        TokKind::Eq => {
                            self.advance();
                            let pos = self.pos();
                            let value = if self.is_basic_type() || self.kind() == TokKind::Ident {
                                Some(self.parse_type()?)
                            } else {
                                match self.kind() {
                                    TokKind::EnumKw | TokKind::Lt => Some(self.parse_type()?),
                                    TokKind::LBracket | TokKind::ProtocolKw => {
                                        Some(self.parse_protocol()?)
                                    }
                                    TokKind::LParen | TokKind::CellKw => Some(self.parse_cell()?),
                                    TokKind::LBrace | TokKind::ProcessKw => {
                                        Some(self.parse_process()?)
                                    }
                                    TokKind::ThreadKw => Some(self.parse_thread()?),
                                    TokKind::NativeKw => Some(self.parse_native()?),
                                    TokKind::ProcedureKw => Some(self.parse_procedure()?),
                                    _ => {
                                        self.sink
                                            .error(pos, "missing ':' or error after '='");
                                        None
                                    }
                                }
                            };
                            if let Some(value) = value {
                                items.push(self.ast.alloc(pos, NodeKind::Define { name, value }));
                            }
                        }
                        // Top-level instance
                        TokKind::LParen => {
                            self.advance();
                            let pos = self.pos();
                            self.set_defining(name, false);
                            let mut args = Vec::new();
                            while self.is_expression() {
                                args.push(self.parse_expression()?);
                                if self.kind() == TokKind::Comma {
                                    self.advance();
                                }
                            }
                            self.expect(TokKind::RParen, "expression or ')' expected");
                            items.push(self.ast.alloc(
                                pos,
                                NodeKind::Instance {
                                    name,
                                    args,
                                    top_level: true,
                                },
                            ));
                        }
                        _ => {
                            let pos = self.pos();
                            return Err(self.sink.fatal(pos, "illegal top-level declaration"));
                        }
                    }
                }
                _ => {
                    let pos = self.pos();
                    self.sink
                        .error(pos, "unexpected token in top-level definition");
                    self.advance();
                }
            }
            if self.kind() == TokKind::Semicolon {
                self.advance();
            }
        }
        Ok(self.ast.alloc(start_pos, NodeKind::Program { items }))
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_basic_type(&mut self) -> Result<NodeId, Fatal> {
        let result = match self.kind() {
            TokKind::BoolKw => self.ast.bool_ty,
            TokKind::ByteKw => self.ast.byte_ty,
            TokKind::IntegerKw => self.ast.int_ty,
            TokKind::UnsignedKw => {
                self.advance();
                match self.kind() {
                    TokKind::ByteKw => self.ast.ubyte_ty,
                    TokKind::IntegerKw => self.ast.uint_ty,
                    _ => {
                        let pos = self.pos();
                        self.sink
                            .error(pos, "type cannot be qualified with 'unsigned'");
                        self.ast.int_ty
                    }
                }
            }
            TokKind::InputFileKw => self.ast.infile_ty,
            TokKind::OutputFileKw => self.ast.outfile_ty,
            TokKind::FloatKw => self.ast.float_ty,
            TokKind::DecimalKw => self.ast.decimal_ty,
            TokKind::CharKw => self.ast.char_ty,
            TokKind::TextKw => self.ast.text_ty,
            TokKind::VoidKw => self.ast.void_ty,
            _ => {
                let pos = self.pos();
                return Err(self.sink.fatal(pos, "basic type expected"));
            }
        };
        self.advance();
        Ok(result)
    }

    // Type -> '<' { Name }, '>'
    //      |  ( BasicType | Name ) [ '[' Expr [ ',' Expr ']' ] | 'indexes' Type ]
    fn parse_type(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        if self.kind() == TokKind::EnumKw || self.kind() == TokKind::Lt {
            let opener = self.kind();
            self.advance();
            let mut values = Vec::new();
            let mut position = 0u32;
            while self.kind() == TokKind::Ident {
                let vpos = self.pos();
                let text = Name::new(self.value());
                self.advance();
                values.push(self.ast.alloc(
                    vpos,
                    NodeKind::EnumValue {
                        name: text,
                        index: position,
                        ty: None,
                    },
                ));
                position += 1;
                if self.kind() == TokKind::Comma {
                    self.advance();
                }
            }
            if opener == TokKind::EnumKw {
                self.expect(TokKind::EndKw, "error in enumerated type definition");
            } else {
                self.expect(TokKind::Gt, "error in enumerated type definition");
            }
            Ok(self.ast.alloc(
                pos,
                NodeKind::EnumType {
                    values,
                    runtime_name: String::new(),
                },
            ))
        } else if self.is_basic_type() || self.kind() == TokKind::Ident {
            let base = if self.is_basic_type() {
                self.parse_basic_type()?
            } else {
                self.parse_name(false)?
            };
            if self.eat(TokKind::IndexesKw) {
                let polarity = if self.eat(TokKind::Plus) {
                    PortRole::Server
                } else if self.eat(TokKind::Minus) {
                    PortRole::Client
                } else {
                    PortRole::None
                };
                let range = self.parse_type()?;
                Ok(self.ast.alloc(
                    pos,
                    NodeKind::MapType {
                        domain: base,
                        range,
                        polarity,
                    },
                ))
            } else if self.eat(TokKind::LBracket) {
                let mut lo = self.ast.alloc(
                    pos,
                    NodeKind::NumLit {
                        text: "0".to_string(),
                        ty: self.ast.int_ty,
                    },
                );
                let mut hi = self.ast.alloc(
                    pos,
                    NodeKind::NumLit {
                        text: "0".to_string(),
                        ty: self.ast.int_ty,
                    },
                );
                if self.is_expression() {
                    hi = self.parse_expression()?;
                    if self.eat(TokKind::Comma) {
                        lo = hi;
                        hi = self.parse_expression()?;
                    }
                }
                self.expect(TokKind::RBracket, "error in array declaration: ']' missing");
                Ok(self
                    .ast
                    .alloc(pos, NodeKind::ArrayType { elem: base, lo, hi }))
            } else {
                Ok(base)
            }
        } else {
            let pos = self.pos();
            Err(self.sink.fatal(pos, "error in type definition"))
        }
    }

    // ------------------------------------------------------------------
    // Cells, slots, declarations
    // ------------------------------------------------------------------

    // Cell -> '(' Slots [ '|' Slots ] ')' | 'cell' ... 'end'
    fn parse_cell(&mut self) -> Result<NodeId, Fatal> {
        let keyword_syntax = self.kind() == TokKind::CellKw;
        let pos = self.pos();
        self.advance();
        let mut params = Vec::new();
        let mut instances = self.parse_slots()?;
        if self.eat(TokKind::Bar) {
            params = instances;
            instances = self.parse_slots()?;
        }
        if keyword_syntax {
            self.expect(TokKind::EndKw, "error in cell declaration or missing 'end'");
        } else {
            self.expect(TokKind::RParen, "error in cell declaration or missing ')'");
        }
        Ok(self.ast.alloc(
            pos,
            NodeKind::Cell {
                params,
                instances,
                name: Name::default(),
            },
        ))
    }

    // Slots -> { [ 'alias' ] SlotDeclaration };
    fn parse_slots(&mut self) -> Result<Vec<NodeId>, Fatal> {
        let mut slots = Vec::new();
        while self.is_slot() {
            let alias = self.eat(TokKind::AliasKw);
            let mut decs = self.parse_slot_declaration(alias)?;
            slots.append(&mut decs);
            if self.kind() == TokKind::Semicolon {
                self.advance();
            }
        }
        Ok(slots)
    }

    // SlotDeclaration -> Declaration | Process
    fn parse_slot_declaration(&mut self, alias: bool) -> Result<Vec<NodeId>, Fatal> {
        match self.kind() {
            TokKind::Ident => self.parse_declaration(true, MessageKind::None, alias),
            TokKind::LBrace | TokKind::ProcessKw => Ok(vec![self.parse_process()?]),
            _ => {
                let pos = self.pos();
                self.sink.error(pos, "declaration expected");
                Ok(Vec::new())
            }
        }
    }

    // Declaration -> { QualifiedName },
    //                (   ':' [ '+' | '-' ] Type [ ( ':=' | '=' | '<-' ) Expr ]
    //                  | ':=' Expr
    //                  | '<-' Expr
    //                  | ( '+=' | '-=' | '*=' | '/=' | '%=' ) Expr
    //                  | '&=' Expr { '&=' Expr }
    //                  | '(' { Expression }, [ '->' Lvalues ] ')'
    //                  | '@' ( 'begin' | 'next' )
    //                  | empty (signal)
    //                )
    fn parse_declaration(
        &mut self,
        defining: bool,
        msg: MessageKind,
        alias: bool,
    ) -> Result<Vec<NodeId>, Fatal> {
        if self.kind() != TokKind::Ident {
            let pos = self.pos();
            return Err(self.sink.fatal(pos, "identifier expected"));
        }
        let pos = self.pos();
        let names = self.parse_qualified_name_list(defining, true)?;
        let mut result = Vec::new();
        match self.kind() {
            // Variable declaration
            TokKind::Colon => {
                self.advance();
                let role = if self.eat(TokKind::Plus) {
                    PortRole::Server
                } else if self.eat(TokKind::Minus) {
                    PortRole::Client
                } else {
                    PortRole::None
                };
                let ty = self.parse_type()?;
                let mut value = None;
                let mut constant = false;
                let mut moved = false;
                if self.eat(TokKind::Assign) {
                    value = Some(self.parse_expression()?);
                } else if self.eat(TokKind::Eq) {
                    value = Some(self.parse_expression()?);
                    constant = true;
                } else if self.eat(TokKind::Move) {
                    value = Some(self.parse_expression()?);
                    moved = true;
                } else if matches!(
                    self.kind(),
                    TokKind::PlusEq
                        | TokKind::MinusEq
                        | TokKind::StarEq
                        | TokKind::SlashEq
                        | TokKind::PercentEq
                ) {
                    let bad = self.pos();
                    self.sink
                        .error(bad, "this operator is not allowed in a declaration");
                    self.advance();
                }
                for &name in &names {
                    if self.ast.name_text(name).is_none() {
                        let npos = self.ast.pos(name);
                        self.sink.error(npos, "a qualified name cannot be declared");
                    } else {
                        self.set_defining(name, true);
                        result.push(self.mk_dec(
                            pos,
                            name,
                            Some(ty),
                            value,
                            role,
                            msg,
                            false,
                            constant,
                            moved,
                            alias,
                        ));
                    }
                }
            }

            // Assignment
            TokKind::Assign => {
                self.advance();
                let value = self.parse_expression()?;
                for &name in &names {
                    self.set_defining(name, false);
                    result.push(self.mk_dec(
                        pos,
                        name,
                        None,
                        Some(value),
                        PortRole::None,
                        MessageKind::None,
                        false,
                        false,
                        false,
                        false,
                    ));
                }
            }

            // Move
            TokKind::Move => {
                self.advance();
                let value = self.parse_expression()?;
                for &name in &names {
                    self.set_defining(name, false);
                    result.push(self.mk_dec(
                        pos,
                        name,
                        None,
                        Some(value),
                        PortRole::None,
                        MessageKind::None,
                        false,
                        false,
                        true,
                        false,
                    ));
                }
            }

            // Compound assignment
            TokKind::PlusEq
            | TokKind::MinusEq
            | TokKind::StarEq
            | TokKind::SlashEq
            | TokKind::PercentEq => {
                let op = match self.kind() {
                    TokKind::PlusEq => BinOp::Plus,
                    TokKind::MinusEq => BinOp::Minus,
                    TokKind::StarEq => BinOp::Multiply,
                    TokKind::SlashEq => BinOp::Divide,
                    _ => BinOp::Mod,
                };
                self.advance();
                let rhs = self.parse_expression()?;
                for &name in &names {
                    self.set_defining(name, false);
                    let bin = self.ast.alloc(
                        pos,
                        NodeKind::Binop {
                            op,
                            lhs: name,
                            rhs,
                            ty: None,
                        },
                    );
                    result.push(self.mk_dec(
                        pos,
                        name,
                        None,
                        Some(bin),
                        PortRole::None,
                        MessageKind::None,
                        false,
                        false,
                        false,
                        false,
                    ));
                }
            }

            // Array extension: a &= e { &= e }
            TokKind::AndEq => {
                self.check_single_name(&names, pos);
                let mut expr = names[0];
                self.set_defining(expr, false);
                while self.kind() == TokKind::AndEq {
                    self.advance();
                    let rhs = self.parse_expression()?;
                    expr = self.ast.alloc(
                        pos,
                        NodeKind::Binop {
                            op: BinOp::Extend,
                            lhs: expr,
                            rhs,
                            ty: None,
                        },
                    );
                }
                result.push(expr);
            }

            // Instance of a cell or process, or thread invocation
            TokKind::LParen => {
                self.advance();
                let mut args = Vec::new();
                while self.is_expression() {
                    args.push(self.parse_expression()?);
                    if self.kind() == TokKind::Comma {
                        self.advance();
                    }
                }
                if self.eat(TokKind::Arrow) {
                    let outputs = self.parse_qualified_name_list(false, true)?;
                    self.expect(
                        TokKind::RParen,
                        "error in arguments of thread invocation or missing ')'",
                    );
                    self.set_defining(names[0], false);
                    let call = self.ast.alloc(
                        pos,
                        NodeKind::ThreadCall {
                            name: names[0],
                            inputs: args,
                            outputs,
                            channel: None,
                            num_fields: 0,
                            input_transfer: NO_LABEL,
                            output_transfer: NO_LABEL,
                        },
                    );
                    let body = self.mk_empty_sequence(pos);
                    result.push(self.ast.alloc(
                        pos,
                        NodeKind::Start {
                            calls: vec![call],
                            body,
                        },
                    ));
                } else {
                    self.expect(TokKind::RParen, "expression or ')' expected");
                    for &name in &names {
                        self.set_defining(name, false);
                        result.push(self.ast.alloc(
                            pos,
                            NodeKind::Instance {
                                name,
                                args: args.clone(),
                                top_level: false,
                            },
                        ));
                    }
                    self.check_single_name(&names, pos);
                }
            }

            // Iterator statement: it@begin, it@next
            TokKind::At => {
                self.advance();
                let fun = if self.kind() == TokKind::Ident {
                    match self.value() {
                        "begin" => Some(IterFun::Start),
                        "next" => Some(IterFun::Step),
                        _ => None,
                    }
                } else {
                    None
                };
                match fun {
                    Some(fun) => {
                        self.advance();
                        for &name in &names {
                            result.push(self.ast.alloc(
                                pos,
                                NodeKind::IterOp {
                                    map: name,
                                    fun,
                                    owner: Name::default(),
                                },
                            ));
                        }
                        self.check_single_name(&names, pos);
                    }
                    None => {
                        let bad = self.pos();
                        self.sink
                            .error(bad, "'@' should be followed by 'begin' or 'next'");
                    }
                }
            }

            // Signal declared in a protocol or used as a statement.
            _ => {
                for &name in &names {
                    result.push(self.mk_dec(
                        pos,
                        name,
                        None,
                        None,
                        PortRole::None,
                        msg,
                        false,
                        false,
                        false,
                        false,
                    ));
                }
                self.check_single_name(&names, pos);
            }
        }
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Protocols
    // ------------------------------------------------------------------

    // Protocol -> Iden | '[' Alternative ']' | 'protocol' Alternative 'end'
    fn parse_protocol(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        match self.kind() {
            TokKind::Ident => self.parse_name(false),
            TokKind::LBracket => {
                self.advance();
                let expr = self.parse_protocol_alternative()?;
                self.expect(TokKind::RBracket, "error in protocol: ']' expected");
                Ok(self.ast.alloc(
                    pos,
                    NodeKind::Protocol {
                        expr,
                        name: Name::default(),
                        num_fields: 0,
                    },
                ))
            }
            TokKind::ProtocolKw => {
                self.advance();
                let expr = self.parse_protocol_alternative()?;
                self.expect(TokKind::EndKw, "error in protocol: 'end' expected");
                Ok(self.ast.alloc(
                    pos,
                    NodeKind::Protocol {
                        expr,
                        name: Name::default(),
                        num_fields: 0,
                    },
                ))
            }
            _ => {
                let pos = self.pos();
                Err(self.sink.fatal(pos, "protocol expected"))
            }
        }
    }

    // Alternative -> Sequence $ '|'
    fn parse_protocol_alternative(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        let first = self.parse_protocol_sequence()?;
        if self.kind() == TokKind::Bar {
            let mut parts = vec![first];
            while self.eat(TokKind::Bar) {
                parts.push(self.parse_protocol_sequence()?);
            }
            Ok(self.ast.alloc(pos, NodeKind::ProtoAlt { parts }))
        } else {
            Ok(first)
        }
    }

    // Sequence -> Factor $ ';'
    fn parse_protocol_sequence(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        let first = self.parse_protocol_factor()?;
        if self.kind() == TokKind::Semicolon {
            let mut parts = vec![first];
            while self.eat(TokKind::Semicolon) {
                parts.push(self.parse_protocol_factor()?);
            }
            Ok(self.ast.alloc(pos, NodeKind::ProtoSeq { parts }))
        } else {
            Ok(first)
        }
    }

    // Factor -> [ '^' ] Declaration
    //        |  ( '*' | '+' | '?' ) Factor
    //        |  '(' Alternative ')'
    fn parse_protocol_factor(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        match self.kind() {
            TokKind::Ident => {
                let names = self.parse_declaration(true, MessageKind::Query, false)?;
                self.check_single_name(&names, pos);
                names.first().copied().ok_or_else(|| {
                    self.sink.fatal(pos, "error in protocol field declaration")
                })
            }
            TokKind::Caret => {
                self.advance();
                let names = self.parse_declaration(true, MessageKind::Reply, false)?;
                self.check_single_name(&names, pos);
                names.first().copied().ok_or_else(|| {
                    self.sink.fatal(pos, "error in protocol field declaration")
                })
            }
            TokKind::Star => {
                self.advance();
                let operand = self.parse_protocol_factor()?;
                Ok(self.ast.alloc(
                    pos,
                    NodeKind::ProtoRep {
                        op: ProtoOp::Many,
                        operand,
                    },
                ))
            }
            TokKind::Plus => {
                self.advance();
                let operand = self.parse_protocol_factor()?;
                Ok(self.ast.alloc(
                    pos,
                    NodeKind::ProtoRep {
                        op: ProtoOp::More,
                        operand,
                    },
                ))
            }
            TokKind::Question => {
                self.advance();
                let operand = self.parse_protocol_factor()?;
                Ok(self.ast.alloc(
                    pos,
                    NodeKind::ProtoRep {
                        op: ProtoOp::Opt,
                        operand,
                    },
                ))
            }
            TokKind::LParen => {
                self.advance();
                let result = self.parse_protocol_alternative()?;
                self.expect(TokKind::RParen, "error in protocol: ')' expected");
                Ok(result)
            }
            _ => {
                let pos = self.pos();
                Err(self.sink.fatal(pos, "error in protocol"))
            }
        }
    }

    // ------------------------------------------------------------------
    // Closures
    // ------------------------------------------------------------------

    // Native -> 'native' Slots [ '->' Type ] 'end'
    fn parse_native(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        self.advance();
        let params = self.parse_slots()?;
        let result = if self.eat(TokKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(TokKind::EndKw, "error in declaration or missing 'end'");
        Ok(self.ast.alloc(pos, NodeKind::NativeDec { params, result }))
    }

    // Procedure -> 'procedure' Slots [ '|' Sequence ] 'end'
    fn parse_procedure(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        self.advance();
        let params = self.parse_slots()?;
        let body = if self.eat(TokKind::Bar) {
            self.parse_sequence()?
        } else {
            self.mk_empty_sequence(pos)
        };
        self.expect(TokKind::EndKw, "error in statement or missing 'end'");
        Ok(self.ast.alloc(
            pos,
            NodeKind::Procedure {
                params,
                body,
                name: Name::default(),
                type_num: NO_LABEL,
                start: NO_LABEL,
            },
        ))
    }

    // Process -> '{' Slots [ '|' Sequence ] '}'
    //         |  'process' Slots [ '|' Sequence ] 'end'
    fn parse_process(&mut self) -> Result<NodeId, Fatal> {
        let keyword_syntax = self.kind() == TokKind::ProcessKw;
        let pos = self.pos();
        self.advance();
        let params = self.parse_slots()?;
        let body = if self.eat(TokKind::Bar) {
            self.parse_sequence()?
        } else {
            self.mk_empty_sequence(pos)
        };
        if keyword_syntax {
            self.expect(TokKind::EndKw, "'end' or '|' missing, or error in statement");
        } else {
            self.expect(TokKind::RBrace, "'}' or '|' missing, or error in statement");
        }
        Ok(self.ast.alloc(
            pos,
            NodeKind::Process {
                params,
                body,
                name: Name::default(),
                type_num: NO_LABEL,
                start: NO_LABEL,
            },
        ))
    }

    // Thread -> 'thread' Params [ '->' Params ] [ '|' Sequence ] 'end'
    fn parse_thread(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        let channel = self.mk_name(pos, "ch", true);
        self.advance();
        let inputs = self.parse_param_list(channel, true)?;
        let outputs = if self.eat(TokKind::Arrow) {
            self.parse_param_list(channel, false)?
        } else {
            Vec::new()
        };
        let body = if self.eat(TokKind::Bar) {
            self.parse_sequence()?
        } else {
            self.mk_empty_sequence(pos)
        };
        self.expect(
            TokKind::EndKw,
            "missing 'end', missing '|', or error in statement",
        );
        Ok(self.ast.alloc(
            pos,
            NodeKind::Thread {
                channel,
                inputs,
                outputs,
                body,
                name: Name::default(),
                start: NO_LABEL,
                num_fields: 0,
            },
        ))
    }

    // ParamList = { Name ':' [ '+' | '-' ] Type };
    fn parse_param_list(&mut self, port: NodeId, input: bool) -> Result<Vec<NodeId>, Fatal> {
        let mut result = Vec::new();
        while self.kind() == TokKind::Ident {
            let names = self.parse_qualified_name_list(true, true)?;
            self.expect(
                TokKind::Colon,
                "':' expected or error in parameter declaration",
            );
            let role = if self.eat(TokKind::Plus) {
                PortRole::Server
            } else if self.eat(TokKind::Minus) {
                PortRole::Client
            } else {
                PortRole::None
            };
            let ty = self.parse_type()?;
            for name in names {
                let npos = self.ast.pos(name);
                result.push(self.ast.alloc(
                    npos,
                    NodeKind::ThreadParam {
                        name,
                        role,
                        ty,
                        port,
                        input,
                        transfer: NO_LABEL,
                    },
                ));
            }
            if self.kind() == TokKind::Semicolon {
                self.advance();
            }
        }
        Ok(result)
    }

    // ThreadCall = Name '(' { Rvalue }, [ '->' { Lvalue }, ] ')'
    fn parse_thread_call(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        let name = self.parse_name(false)?;
        self.expect(TokKind::LParen, "'(' expected in thread invocation");
        let mut inputs = Vec::new();
        while self.is_expression() {
            inputs.push(self.parse_expression()?);
            if self.kind() == TokKind::Comma {
                self.advance();
            }
        }
        let outputs = if self.eat(TokKind::Arrow) {
            self.parse_qualified_name_list(false, true)?
        } else {
            Vec::new()
        };
        self.expect(
            TokKind::RParen,
            "')' expected or error in arguments of thread invocation",
        );
        Ok(self.ast.alloc(
            pos,
            NodeKind::ThreadCall {
                name,
                inputs,
                outputs,
                channel: None,
                num_fields: 0,
                input_transfer: NO_LABEL,
                output_transfer: NO_LABEL,
            },
        ))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    // Sequence -> Statement $ ';'
    fn parse_sequence(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        let mut stmts = Vec::new();
        while self.is_statement() {
            let mut more = self.parse_statement()?;
            stmts.append(&mut more);
            self.eat(TokKind::Semicolon);
        }
        Ok(self.ast.alloc(pos, NodeKind::Sequence { stmts }))
    }

    /// Parse a statement. May return more than one node, e.g. when a
    /// `cases` scrutinee is hoisted into a temporary.
    fn parse_statement(&mut self) -> Result<Vec<NodeId>, Fatal> {
        let mut result = Vec::new();
        match self.kind() {
            TokKind::SkipKw => {
                result.push(self.ast.alloc(self.pos(), NodeKind::Skip));
                self.advance();
            }

            TokKind::ExitKw => {
                result.push(self.ast.alloc(
                    self.pos(),
                    NodeKind::Exit {
                        loop_end: NO_LABEL,
                    },
                ));
                self.advance();
            }

            // until e  ==  if e then exit end
            TokKind::UntilKw => {
                let pos = self.pos();
                self.advance();
                let cond = self.parse_expression()?;
                result.push(self.mk_cond_exit(pos, cond));
            }

            // while e  ==  if not e then exit end
            TokKind::WhileKw => {
                let pos = self.pos();
                self.advance();
                let inner = self.parse_expression()?;
                let cond = self.ast.alloc(
                    pos,
                    NodeKind::Unop {
                        op: UnOp::Not,
                        operand: inner,
                        ty: None,
                    },
                );
                result.push(self.mk_cond_exit(pos, cond));
            }

            TokKind::IfKw => {
                let start_pos = self.pos();
                self.advance();
                let mut arms = Vec::new();
                let pos = self.pos();
                let cond = self.parse_expression()?;
                self.expect(TokKind::ThenKw, "bad expression or missing 'then'");
                let body = self.parse_sequence()?;
                arms.push(self.mk_cond_arm(pos, cond, body));
                while self.eat(TokKind::ElifKw) {
                    let pos = self.pos();
                    let cond = self.parse_expression()?;
                    self.expect(TokKind::ThenKw, "bad expression or missing 'then'");
                    let body = self.parse_sequence()?;
                    arms.push(self.mk_cond_arm(pos, cond, body));
                }
                let alt = self.parse_alternative()?;
                result.push(self.ast.alloc(
                    start_pos,
                    NodeKind::If {
                        arms,
                        alt,
                        if_end: NO_LABEL,
                    },
                ));
            }

            // cases [ e ] { '|' [ e ] '|' seq } end
            // Sugar for an if/elif chain over equality with the scrutinee.
            TokKind::CasesKw => {
                let start_pos = self.pos();
                self.advance();
                let mut scrutinee = None;
                if self.is_expression() {
                    let pos = self.pos();
                    let expr = self.parse_expression()?;
                    self.case_temp += 1;
                    let temp = format!("casetemp{}", self.case_temp);
                    let def_name = self.mk_name(pos, &temp, true);
                    let dec = self.mk_dec(
                        pos,
                        def_name,
                        None,
                        Some(expr),
                        PortRole::None,
                        MessageKind::None,
                        true,
                        false,
                        false,
                        false,
                    );
                    result.push(dec);
                    scrutinee = Some(self.mk_name(pos, &temp, false));
                }
                let mut arms = Vec::new();
                while self.eat(TokKind::Bar) {
                    let pos = self.pos();
                    let rhs = if self.is_expression() {
                        Some(self.parse_expression()?)
                    } else {
                        None
                    };
                    let cond = match (scrutinee, rhs) {
                        (Some(lhs), Some(rhs)) => self.ast.alloc(
                            pos,
                            NodeKind::Binop {
                                op: BinOp::Eq,
                                lhs,
                                rhs,
                                ty: None,
                            },
                        ),
                        (None, Some(rhs)) => rhs,
                        _ => self.ast.alloc(pos, NodeKind::BoolLit { value: true }),
                    };
                    self.expect(TokKind::Bar, "error in guard or '|' missing");
                    let body = self.parse_sequence()?;
                    arms.push(self.mk_cond_arm(pos, cond, body));
                }
                let alt = self.mk_empty_sequence(start_pos);
                result.push(self.ast.alloc(
                    start_pos,
                    NodeKind::If {
                        arms,
                        alt,
                        if_end: NO_LABEL,
                    },
                ));
                self.expect(
                    TokKind::EndKw,
                    "'end' missing (possibly in an inner scope)",
                );
            }

            TokKind::LoopKw => {
                let pos = self.pos();
                self.advance();
                let body = self.parse_sequence()?;
                result.push(self.ast.alloc(
                    pos,
                    NodeKind::Loop {
                        body,
                        loop_start: NO_LABEL,
                        loop_end: NO_LABEL,
                    },
                ));
                self.expect(TokKind::EndKw, "'end' missing (possibly in inner scope)");
            }

            TokKind::ForKw => {
                let pos = self.pos();
                self.advance();
                let comp = self.parse_comprehension()?;
                self.expect(TokKind::DoKw, "'do' expected");
                let body = self.parse_sequence()?;
                result.push(self.ast.alloc(
                    pos,
                    NodeKind::For {
                        comp,
                        body,
                        more: NO_LABEL,
                        matched: NO_LABEL,
                        body_label: NO_LABEL,
                        step: NO_LABEL,
                        end: NO_LABEL,
                    },
                ));
                self.expect(TokKind::EndKw, "'end' missing (possibly in inner scope)");
            }

            TokKind::AnyKw => {
                let pos = self.pos();
                self.advance();
                let comp = self.parse_comprehension()?;
                self.expect(TokKind::DoKw, "'do' expected");
                let body = self.parse_sequence()?;
                let alt = self.parse_alternative()?;
                result.push(self.ast.alloc(
                    pos,
                    NodeKind::Any {
                        comp,
                        body,
                        alt,
                        more: NO_LABEL,
                        found: NO_LABEL,
                        step: NO_LABEL,
                        body_label: NO_LABEL,
                        alt_label: NO_LABEL,
                        end: NO_LABEL,
                    },
                ));
            }

            TokKind::SelectKw => {
                result.push(self.parse_select(false)?);
            }

            TokKind::LoopSelectKw => {
                result.push(self.parse_select(true)?);
            }

            TokKind::StartKw => {
                let pos = self.pos();
                self.advance();
                let mut calls = Vec::new();
                while self.kind() == TokKind::Ident {
                    calls.push(self.parse_thread_call()?);
                    if self.kind() == TokKind::Semicolon {
                        self.advance();
                    }
                }
                self.expect(TokKind::DoKw, "'do' expected or error in thread invocation");
                let body = self.parse_sequence()?;
                result.push(self.ast.alloc(pos, NodeKind::Start { calls, body }));
                self.expect(TokKind::EndKw, "'end' missing (possibly in inner scope)");
            }

            TokKind::Ident => {
                // A few builtins are procedures rather than expressions.
                if matches!(self.value(), "assert" | "file_close" | "file_write") {
                    let pos = self.pos();
                    let text = self.value().to_string();
                    let name = self.mk_name(pos, &text, false);
                    self.advance();
                    let mut args = Vec::new();
                    if self.eat(TokKind::LParen) {
                        while self.is_expression() {
                            args.push(self.parse_expression()?);
                            if self.kind() == TokKind::Comma {
                                self.advance();
                            }
                        }
                        self.expect(
                            TokKind::RParen,
                            "error in procedure call or ')' missing",
                        );
                    } else {
                        args.push(self.parse_factor()?);
                    }
                    result.push(self.ast.alloc(
                        pos,
                        NodeKind::Call {
                            name,
                            args,
                            target: None,
                        },
                    ));
                } else {
                    result = self.parse_declaration(false, MessageKind::None, false)?;
                }
            }

            _ => {}
        }
        Ok(result)
    }

    /// `if cond then exit end` used by the `while`/`until` sugar.
    fn mk_cond_exit(&mut self, pos: Position, cond: NodeId) -> NodeId {
        let exit = self.ast.alloc(
            pos,
            NodeKind::Exit {
                loop_end: NO_LABEL,
            },
        );
        let body = self.ast.alloc(pos, NodeKind::Sequence { stmts: vec![exit] });
        let arm = self.mk_cond_arm(pos, cond, body);
        let alt = self.mk_empty_sequence(pos);
        self.ast.alloc(
            pos,
            NodeKind::If {
                arms: vec![arm],
                alt,
                if_end: NO_LABEL,
            },
        )
    }

    fn mk_cond_arm(&mut self, pos: Position, cond: NodeId, body: NodeId) -> NodeId {
        self.ast.alloc(
            pos,
            NodeKind::CondArm {
                decs: Vec::new(),
                cond,
                body,
                cond_true: NO_LABEL,
                cond_false: NO_LABEL,
                if_end: NO_LABEL,
            },
        )
    }

    // Select -> ( 'select' | 'loopselect' ) [ Policy ]
    //           { '|' [ Expr ] '|' Sequence } 'end'
    fn parse_select(&mut self, looped: bool) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        self.advance();
        let policy = self.parse_policy();
        let mut options = Vec::new();
        while self.kind() == TokKind::Bar {
            let opos = self.pos();
            self.advance();
            let guard = if self.is_expression() {
                Some(self.parse_expression()?)
            } else {
                None
            };
            self.expect(TokKind::Bar, "error in guard or '|' missing");
            let body = self.parse_sequence()?;
            options.push(self.ast.alloc(
                opos,
                NodeKind::SelectOption {
                    policy,
                    guard,
                    body,
                    owner: Name::default(),
                    sel_num: NO_LABEL,
                    select_start: NO_LABEL,
                    select_end: NO_LABEL,
                    test_guard: NO_LABEL,
                    exec_branch: NO_LABEL,
                },
            ));
        }
        self.expect(TokKind::EndKw, "bad statement or missing 'end'");
        let select = self.ast.alloc(
            pos,
            NodeKind::Select {
                policy,
                options,
                owner: Name::default(),
                sel_num: NO_LABEL,
                num_branches: 0,
                select_start: NO_LABEL,
                select_end: NO_LABEL,
            },
        );
        if looped {
            let body = self
                .ast
                .alloc(pos, NodeKind::Sequence { stmts: vec![select] });
            Ok(self.ast.alloc(
                pos,
                NodeKind::Loop {
                    body,
                    loop_start: NO_LABEL,
                    loop_end: NO_LABEL,
                },
            ))
        } else {
            Ok(select)
        }
    }

    // Policy -> 'fair' | 'ordered' | 'random' | empty
    fn parse_policy(&mut self) -> Policy {
        match self.kind() {
            TokKind::FairKw => {
                self.advance();
                Policy::Fair
            }
            TokKind::OrderedKw => {
                self.advance();
                Policy::Ordered
            }
            TokKind::RandomKw => {
                self.advance();
                Policy::Random
            }
            _ => Policy::Default,
        }
    }

    // Alternative -> [ 'else' Sequence ] 'end'
    fn parse_alternative(&mut self) -> Result<NodeId, Fatal> {
        let result = if self.eat(TokKind::ElseKw) {
            self.parse_sequence()?
        } else {
            self.mk_empty_sequence(self.pos())
        };
        self.expect(TokKind::EndKw, "bad statement or missing 'end'");
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Comprehensions
    // ------------------------------------------------------------------

    // Comprehension -> Var [ ':' Type ] [ 'in' Set ] [ 'such' 'that' Expr ]
    fn parse_comprehension(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        let var = self.parse_name(true)?;
        let iter_name = format!(
            "{}_iter",
            self.ast
                .name_text(var)
                .map(|n| n.to_string())
                .unwrap_or_default()
        );
        let iter = self.mk_name(pos, &iter_name, true);
        let ty = if self.eat(TokKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let collection = if self.eat(TokKind::InKw) {
            self.parse_collection(ty)?
        } else {
            // No 'in': the declared type itself is the collection.
            self.ast.alloc(
                pos,
                NodeKind::EnumSet {
                    ty,
                    size: 0,
                    owner: Name::default(),
                },
            )
        };
        let pred = if self.kind() == TokKind::SuchKw {
            let such_pos = self.pos();
            self.advance();
            if !self.eat(TokKind::ThatKw) {
                self.sink.warning(such_pos, "'that' inserted after 'such'");
            }
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(self.ast.alloc(
            pos,
            NodeKind::Comprehension {
                var,
                ty,
                collection,
                pred,
                iter: Some(iter),
            },
        ))
    }

    // Step = '(' [ Sum ] ')'
    fn parse_step(&mut self) -> Result<Option<NodeId>, Fatal> {
        self.expect(TokKind::LParen, "missing '(' or error in step expression");
        let step = if self.is_expression() {
            Some(self.parse_sum()?)
        } else {
            None
        };
        self.expect(TokKind::RParen, "missing ')' or error in step expression");
        Ok(step)
    }

    // Set -> ( 'domain' | 'range' ) Expr
    //     |  Sum 'to' Sum [ 'step' Sum ]
    //     |  Sum '<=' Step ( '<=' | '<' ) Sum
    //     |  Sum '>=' Step ( '>=' | '>' ) Sum
    //     |  Sum
    fn parse_collection(&mut self, ty: Option<NodeId>) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        if self.eat(TokKind::DomainKw) {
            let map = self.parse_expression()?;
            return Ok(self.ast.alloc(
                pos,
                NodeKind::MapSet {
                    map,
                    set_kind: SetKind::Domain,
                    map_kind: MapKind::None,
                    ty: None,
                    index_name: String::new(),
                    owner: Name::default(),
                },
            ));
        }
        if self.eat(TokKind::RangeKw) {
            let map = self.parse_expression()?;
            return Ok(self.ast.alloc(
                pos,
                NodeKind::MapSet {
                    map,
                    set_kind: SetKind::Range,
                    map_kind: MapKind::None,
                    ty: None,
                    index_name: String::new(),
                    owner: Name::default(),
                },
            ));
        }
        if !self.is_expression() {
            let pos = self.pos();
            return Err(self.sink.fatal(pos, "set expression expected"));
        }
        let start = self.parse_sum()?;
        match self.kind() {
            TokKind::ToKw => {
                self.advance();
                let finish = self.parse_sum()?;
                let step = if self.eat(TokKind::StepKw) {
                    Some(self.parse_sum()?)
                } else {
                    None
                };
                Ok(self.mk_range(pos, ty, start, finish, step, false, true))
            }
            TokKind::Le => {
                self.advance();
                let step = self.parse_step()?;
                let open = if self.eat(TokKind::Le) {
                    false
                } else if self.eat(TokKind::Lt) {
                    true
                } else {
                    let bad = self.pos();
                    self.sink.error(bad, "'<' or '<=' expected");
                    false
                };
                let finish = self.parse_sum()?;
                Ok(self.mk_range(pos, ty, start, finish, step, open, true))
            }
            TokKind::Ge => {
                self.advance();
                let step = self.parse_step()?;
                let open = if self.eat(TokKind::Ge) {
                    false
                } else if self.eat(TokKind::Gt) {
                    true
                } else {
                    let bad = self.pos();
                    self.sink.error(bad, "'>' or '>=' expected");
                    false
                };
                let finish = self.parse_sum()?;
                Ok(self.mk_range(pos, ty, start, finish, step, open, false))
            }
            _ => Ok(self.ast.alloc(
                pos,
                NodeKind::EnumSet {
                    ty: Some(start),
                    size: 0,
                    owner: Name::default(),
                },
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn mk_range(
        &mut self,
        pos: Position,
        ty: Option<NodeId>,
        start: NodeId,
        finish: NodeId,
        step: Option<NodeId>,
        open: bool,
        ascending: bool,
    ) -> NodeId {
        self.ast.alloc(
            pos,
            NodeKind::RangeSet {
                ty,
                start,
                finish,
                step,
                open,
                ascending,
                finish_num: NO_LABEL,
                step_num: NO_LABEL,
                owner: Name::default(),
            },
        )
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    // Expression = CondExpr $ '//'
    fn parse_expression(&mut self) -> Result<NodeId, Fatal> {
        let mut result = self.parse_conditional_expression()?;
        while self.kind() == TokKind::Cat {
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_conditional_expression()?;
            result = self.ast.alloc(
                pos,
                NodeKind::Binop {
                    op: BinOp::Cat,
                    lhs: result,
                    rhs,
                    ty: None,
                },
            );
        }
        Ok(result)
    }

    // CondExpr -> Disjunction [ 'if' Disjunction 'else' Expression ]
    fn parse_conditional_expression(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        let lhs = self.parse_disjunction()?;
        if self.eat(TokKind::IfKw) {
            let pred = self.parse_disjunction()?;
            self.expect(
                TokKind::ElseKw,
                "error in conditional expression: possible missing 'else'",
            );
            let rhs = self.parse_expression()?;
            Ok(self.ast.alloc(
                pos,
                NodeKind::CondExpr {
                    lhs,
                    pred,
                    rhs,
                    ty: None,
                },
            ))
        } else {
            Ok(lhs)
        }
    }

    // Disjunction -> Conjunction $ 'or'
    fn parse_disjunction(&mut self) -> Result<NodeId, Fatal> {
        let mut result = self.parse_conjunction()?;
        while self.kind() == TokKind::OrKw {
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_conjunction()?;
            result = self.ast.alloc(
                pos,
                NodeKind::Binop {
                    op: BinOp::Or,
                    lhs: result,
                    rhs,
                    ty: None,
                },
            );
        }
        Ok(result)
    }

    // Conjunction -> Comparison $ 'and'
    fn parse_conjunction(&mut self) -> Result<NodeId, Fatal> {
        let mut result = self.parse_comparison()?;
        while self.kind() == TokKind::AndKw {
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_comparison()?;
            result = self.ast.alloc(
                pos,
                NodeKind::Binop {
                    op: BinOp::And,
                    lhs: result,
                    rhs,
                    ty: None,
                },
            );
        }
        Ok(result)
    }

    // Comparison -> Ordering [ ( '=' | '~=' ) Ordering ]
    fn parse_comparison(&mut self) -> Result<NodeId, Fatal> {
        let mut result = self.parse_ordering()?;
        let pos = self.pos();
        let op = match self.kind() {
            TokKind::Eq => Some(BinOp::Eq),
            TokKind::Ne => Some(BinOp::Ne),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_ordering()?;
            result = self.ast.alloc(
                pos,
                NodeKind::Binop {
                    op,
                    lhs: result,
                    rhs,
                    ty: None,
                },
            );
        }
        Ok(result)
    }

    // Ordering -> Sum [ ( '<' | '<=' | '>' | '>=' ) Ordering ]
    fn parse_ordering(&mut self) -> Result<NodeId, Fatal> {
        let mut result = self.parse_sum()?;
        let pos = self.pos();
        let op = match self.kind() {
            TokKind::Lt => Some(BinOp::Lt),
            TokKind::Le => Some(BinOp::Le),
            TokKind::Gt => Some(BinOp::Gt),
            TokKind::Ge => Some(BinOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_ordering()?;
            result = self.ast.alloc(
                pos,
                NodeKind::Binop {
                    op,
                    lhs: result,
                    rhs,
                    ty: None,
                },
            );
        }
        Ok(result)
    }

    // Sum -> Product $ ( '+' | '-' )
    fn parse_sum(&mut self) -> Result<NodeId, Fatal> {
        let mut result = self.parse_product()?;
        while matches!(self.kind(), TokKind::Plus | TokKind::Minus) {
            let pos = self.pos();
            let op = if self.kind() == TokKind::Plus {
                BinOp::Plus
            } else {
                BinOp::Minus
            };
            self.advance();
            let rhs = self.parse_product()?;
            result = self.ast.alloc(
                pos,
                NodeKind::Binop {
                    op,
                    lhs: result,
                    rhs,
                    ty: None,
                },
            );
        }
        Ok(result)
    }

    // Product -> Factor $ ( '*' | '/' | 'div' | '%' | 'mod' | 'rem' )
    fn parse_product(&mut self) -> Result<NodeId, Fatal> {
        let mut result = self.parse_factor()?;
        loop {
            let op = match self.kind() {
                TokKind::Star => BinOp::Multiply,
                TokKind::Slash | TokKind::DivKw => BinOp::Divide,
                TokKind::Percent | TokKind::ModKw | TokKind::RemKw => BinOp::Mod,
                _ => break,
            };
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_factor()?;
            result = self.ast.alloc(
                pos,
                NodeKind::Binop {
                    op,
                    lhs: result,
                    rhs,
                    ty: None,
                },
            );
        }
        Ok(result)
    }

    // Factor -> 'true' | 'false' | Char | Text | Number
    //        |  'execute' Factor | 'not' Factor | '-' Factor
    //        |  '#' Args | '(' Expression ')'
    //        |  QualifiedName [ Args | '@' Identifier ]
    fn parse_factor(&mut self) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        match self.kind() {
            TokKind::TrueKw => {
                self.advance();
                Ok(self.ast.alloc(pos, NodeKind::BoolLit { value: true }))
            }
            TokKind::FalseKw => {
                self.advance();
                Ok(self.ast.alloc(pos, NodeKind::BoolLit { value: false }))
            }
            TokKind::ExecuteKw => {
                self.advance();
                let operand = self.parse_factor()?;
                Ok(self.ast.alloc(
                    pos,
                    NodeKind::Unop {
                        op: UnOp::Execute,
                        operand,
                        ty: None,
                    },
                ))
            }
            TokKind::Char => {
                let value = self.value().chars().next().unwrap_or('\0');
                self.advance();
                Ok(self.ast.alloc(pos, NodeKind::CharLit { value }))
            }
            TokKind::Text => {
                let value = self.value().to_string();
                self.advance();
                Ok(self.ast.alloc(pos, NodeKind::TextLit { value }))
            }
            TokKind::Int => {
                let text = self.value().to_string();
                self.advance();
                let ty = self.ast.int_ty;
                Ok(self.ast.alloc(pos, NodeKind::NumLit { text, ty }))
            }
            TokKind::Decimal => {
                let text = self.value().to_string();
                self.advance();
                let ty = self.ast.decimal_ty;
                Ok(self.ast.alloc(pos, NodeKind::NumLit { text, ty }))
            }
            TokKind::LParen => {
                self.advance();
                let result = self.parse_expression()?;
                self.expect(TokKind::RParen, "bad expression or ')' missing");
                Ok(result)
            }
            TokKind::NotKw => {
                self.advance();
                let operand = self.parse_factor()?;
                Ok(self.ast.alloc(
                    pos,
                    NodeKind::Unop {
                        op: UnOp::Not,
                        operand,
                        ty: None,
                    },
                ))
            }
            TokKind::Minus => {
                self.advance();
                let operand = self.parse_factor()?;
                // Negated literals fold into the literal text.
                if let NodeKind::NumLit { text, .. } = self.ast.kind_mut(operand) {
                    if let Some(stripped) = text.strip_prefix('-') {
                        *text = stripped.to_string();
                    } else {
                        *text = format!("-{text}");
                    }
                    Ok(operand)
                } else {
                    Ok(self.ast.alloc(
                        pos,
                        NodeKind::Unop {
                            op: UnOp::Minus,
                            operand,
                            ty: None,
                        },
                    ))
                }
            }
            TokKind::Sharp => {
                self.advance();
                if self.is_argument() {
                    let args = self.parse_call_args()?;
                    let name = self.mk_name(pos, "#", false);
                    Ok(self.ast.alloc(
                        pos,
                        NodeKind::Call {
                            name,
                            args,
                            target: None,
                        },
                    ))
                } else {
                    let bad = self.pos();
                    Err(self.sink.fatal(bad, "'#' requires a right operand"))
                }
            }
            TokKind::Ident => {
                let result = self.parse_qualified_name(false, false)?;
                if self.is_argument() {
                    let args = self.parse_call_args()?;
                    Ok(self.ast.alloc(
                        pos,
                        NodeKind::Call {
                            name: result,
                            args,
                            target: None,
                        },
                    ))
                } else if self.eat(TokKind::At) {
                    let fun = if self.kind() == TokKind::Ident {
                        match self.value() {
                            "finish" => Some(IterFun::Finish),
                            "key" => Some(IterFun::Key),
                            "value" => Some(IterFun::Value),
                            _ => None,
                        }
                    } else {
                        None
                    };
                    match fun {
                        Some(fun) => {
                            self.advance();
                            Ok(self.ast.alloc(
                                pos,
                                NodeKind::IterOp {
                                    map: result,
                                    fun,
                                    owner: Name::default(),
                                },
                            ))
                        }
                        None => {
                            let bad = self.pos();
                            Err(self.sink.fatal(
                                bad,
                                "'@' should be followed by 'finish', 'key', or 'value'",
                            ))
                        }
                    }
                } else {
                    Ok(result)
                }
            }
            _ => {
                let pos = self.pos();
                Err(self.sink.fatal(pos, "bad factor"))
            }
        }
    }

    /// Arguments of a function call: parenthesized list or a single factor.
    fn parse_call_args(&mut self) -> Result<Vec<NodeId>, Fatal> {
        let mut args = Vec::new();
        if self.eat(TokKind::LParen) {
            while self.is_expression() {
                args.push(self.parse_expression()?);
                if self.kind() == TokKind::Comma {
                    self.advance();
                }
            }
            self.expect(TokKind::RParen, "bad argument list or missing ')'");
        } else {
            args.push(self.parse_factor()?);
        }
        Ok(args)
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    // QualifiedNameList -> QualifiedName $ ','
    fn parse_qualified_name_list(
        &mut self,
        definition: bool,
        lvalue: bool,
    ) -> Result<Vec<NodeId>, Fatal> {
        let mut result = Vec::new();
        while self.kind() == TokKind::Ident {
            result.push(self.parse_qualified_name(definition, lvalue)?);
            if self.kind() == TokKind::Comma {
                self.advance();
            }
        }
        Ok(result)
    }

    // QualifiedName -> Name { '[' Sum [ '..' Sum ] ']' } [ '.' Name | '?' Name ]
    fn parse_qualified_name(&mut self, definition: bool, lvalue: bool) -> Result<NodeId, Fatal> {
        let pos = self.pos();
        let mut result = self.parse_name(definition)?;
        while self.eat(TokKind::LBracket) {
            let sub = self.parse_sum()?;
            if self.eat(TokKind::Dots) {
                let hi = self.parse_sum()?;
                result = self.ast.alloc(
                    pos,
                    NodeKind::Subrange {
                        base: result,
                        lo: sub,
                        hi,
                        lvalue,
                    },
                );
            } else {
                result = self.ast.alloc(
                    pos,
                    NodeKind::Subscript {
                        base: result,
                        index: sub,
                        lvalue,
                    },
                );
            }
            self.eat(TokKind::RBracket);
        }
        if self.eat(TokKind::Dot) {
            let field = self.parse_name(false)?;
            result = self.ast.alloc(
                pos,
                NodeKind::Dot {
                    port: result,
                    field,
                },
            );
        } else if self.eat(TokKind::Question) {
            let field = self.parse_name(false)?;
            result = self.ast.alloc(
                pos,
                NodeKind::Query {
                    port: result,
                    field,
                    target: None,
                    phase: 1,
                },
            );
        }
        Ok(result)
    }

    // Name -> Identifier
    fn parse_name(&mut self, definition: bool) -> Result<NodeId, Fatal> {
        if self.kind() == TokKind::Ident {
            let pos = self.pos();
            let text = self.value().to_string();
            self.advance();
            Ok(self.mk_name(pos, &text, definition))
        } else {
            let pos = self.pos();
            Err(self.sink.fatal(pos, "identifier expected"))
        }
    }
}

/// Decode the raw slice of a token: strip quotes and process escapes for
/// character and text literals, pass everything else through.
fn cook_value(kind: TokKind, text: &str) -> String {
    match kind {
        TokKind::Char | TokKind::Text => {
            let inner = &text[1..text.len() - 1];
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    match chars.next() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some('\'') => out.push('\''),
                        Some('"') => out.push('"'),
                        Some('\\') => out.push('\\'),
                        Some(other) => out.push(other),
                        None => {}
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(text: &str) -> (Ast, NodeId) {
        let mut ast = Ast::new();
        let mut sink = DiagnosticSink::with_source(text);
        let program = parse(text, &mut ast, &mut sink).expect("parse should not unwind");
        assert_eq!(sink.error_count(), 0, "{}", sink.render_all());
        (ast, program)
    }

    fn program_items(ast: &Ast, program: NodeId) -> Vec<NodeId> {
        match ast.kind(program) {
            NodeKind::Program { items } => items.clone(),
            other => panic!("expected program, got {}", other.tag()),
        }
    }

    #[test]
    fn parses_a_protocol_definition() {
        let (ast, program) = parse_ok("P = [ a : Integer ; ^b : Text ]");
        let items = program_items(&ast, program);
        assert_eq!(items.len(), 1);
        let NodeKind::Define { value, .. } = ast.kind(items[0]) else {
            panic!("expected definition");
        };
        let NodeKind::Protocol { expr, .. } = ast.kind(*value) else {
            panic!("expected protocol");
        };
        let NodeKind::ProtoSeq { parts } = ast.kind(*expr) else {
            panic!("expected sequence");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(ast.message_kind(parts[0]), MessageKind::Query);
        assert_eq!(ast.message_kind(parts[1]), MessageKind::Reply);
    }

    #[test]
    fn parses_process_with_port_parameter() {
        let (ast, program) = parse_ok("P = [ a ]; Q = process p : +P | p.a end");
        let items = program_items(&ast, program);
        let NodeKind::Define { value, .. } = ast.kind(items[1]) else {
            panic!("expected definition");
        };
        let NodeKind::Process { params, body, .. } = ast.kind(*value) else {
            panic!("expected process");
        };
        assert_eq!(params.len(), 1);
        assert_eq!(ast.port_role(params[0]), PortRole::Server);
        let NodeKind::Sequence { stmts } = ast.kind(*body) else {
            panic!("expected sequence");
        };
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn while_desugars_to_if_exit() {
        let (ast, program) = parse_ok("Q = process | loop while x; skip end end");
        let items = program_items(&ast, program);
        let NodeKind::Define { value, .. } = ast.kind(items[0]) else {
            panic!()
        };
        let NodeKind::Process { body, .. } = ast.kind(*value) else {
            panic!()
        };
        let NodeKind::Sequence { stmts } = ast.kind(*body) else {
            panic!()
        };
        let NodeKind::Loop { body: loop_body, .. } = ast.kind(stmts[0]) else {
            panic!("expected loop")
        };
        let NodeKind::Sequence { stmts: inner } = ast.kind(*loop_body) else {
            panic!()
        };
        let NodeKind::If { arms, .. } = ast.kind(inner[0]) else {
            panic!("while should desugar to if");
        };
        let NodeKind::CondArm { cond, .. } = ast.kind(arms[0]) else {
            panic!()
        };
        assert!(matches!(
            ast.kind(*cond),
            NodeKind::Unop {
                op: UnOp::Not,
                ..
            }
        ));
    }

    #[test]
    fn negative_literal_folds_into_text() {
        let (ast, program) = parse_ok("k : Integer = -129");
        let items = program_items(&ast, program);
        let NodeKind::Constant { value, .. } = ast.kind(items[0]) else {
            panic!()
        };
        assert_eq!(ast.int_value(*value), Some(-129));
    }

    #[test]
    fn cases_hoists_a_scrutinee_temporary() {
        let (ast, program) =
            parse_ok("Q = process | cases x + 1 | 1 | skip | 2 | skip end end");
        let items = program_items(&ast, program);
        let NodeKind::Define { value, .. } = ast.kind(items[0]) else {
            panic!()
        };
        let NodeKind::Process { body, .. } = ast.kind(*value) else {
            panic!()
        };
        let NodeKind::Sequence { stmts } = ast.kind(*body) else {
            panic!()
        };
        // Hoisted temp declaration plus the if-chain.
        assert_eq!(stmts.len(), 2);
        assert!(matches!(
            ast.kind(stmts[0]),
            NodeKind::Dec {
                generated: true,
                ..
            }
        ));
        assert!(matches!(ast.kind(stmts[1]), NodeKind::If { .. }));
    }

    #[test]
    fn select_with_policy_and_guards() {
        let (ast, program) = parse_ok(
            "Q = process p : +P | select ordered | x | p.a | | p.b end end",
        );
        let items = program_items(&ast, program);
        let NodeKind::Define { value, .. } = ast.kind(items[0]) else {
            panic!()
        };
        let NodeKind::Process { body, .. } = ast.kind(*value) else {
            panic!()
        };
        let NodeKind::Sequence { stmts } = ast.kind(*body) else {
            panic!()
        };
        let NodeKind::Select { policy, options, .. } = ast.kind(stmts[0]) else {
            panic!("expected select");
        };
        assert_eq!(*policy, Policy::Ordered);
        assert_eq!(options.len(), 2);
        let NodeKind::SelectOption { guard, .. } = ast.kind(options[0]) else {
            panic!()
        };
        assert!(guard.is_some());
        let NodeKind::SelectOption { guard, .. } = ast.kind(options[1]) else {
            panic!()
        };
        assert!(guard.is_none());
    }

    #[test]
    fn loopselect_wraps_select_in_a_loop() {
        let (ast, program) = parse_ok("Q = process | loopselect | | skip end end");
        let items = program_items(&ast, program);
        let NodeKind::Define { value, .. } = ast.kind(items[0]) else {
            panic!()
        };
        let NodeKind::Process { body, .. } = ast.kind(*value) else {
            panic!()
        };
        let NodeKind::Sequence { stmts } = ast.kind(*body) else {
            panic!()
        };
        assert!(matches!(ast.kind(stmts[0]), NodeKind::Loop { .. }));
    }

    #[test]
    fn thread_with_inputs_and_outputs() {
        let (ast, program) = parse_ok("T = thread a : Integer -> b : Integer | b := a end");
        let items = program_items(&ast, program);
        let NodeKind::Define { value, .. } = ast.kind(items[0]) else {
            panic!()
        };
        let NodeKind::Thread {
            inputs, outputs, ..
        } = ast.kind(*value)
        else {
            panic!("expected thread");
        };
        assert_eq!(inputs.len(), 1);
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn query_parses_with_phase_one() {
        let (ast, program) = parse_ok("Q = process p : -P | b := p?a end");
        let items = program_items(&ast, program);
        let NodeKind::Define { value, .. } = ast.kind(items[0]) else {
            panic!()
        };
        let NodeKind::Process { body, .. } = ast.kind(*value) else {
            panic!()
        };
        let NodeKind::Sequence { stmts } = ast.kind(*body) else {
            panic!()
        };
        let NodeKind::Dec { value: Some(v), .. } = ast.kind(stmts[0]) else {
            panic!()
        };
        assert!(matches!(
            ast.kind(*v),
            NodeKind::Query { phase: 1, .. }
        ));
    }

    #[test]
    fn cell_wires_params_and_instances() {
        let (ast, program) = parse_ok(
            "P = [ a ]; S = process p : +P | p.a end; C = cell c : P; S(c) end",
        );
        let items = program_items(&ast, program);
        let NodeKind::Define { value, .. } = ast.kind(items[2]) else {
            panic!()
        };
        let NodeKind::Cell {
            params, instances, ..
        } = ast.kind(*value)
        else {
            panic!("expected cell");
        };
        assert!(params.is_empty());
        assert_eq!(instances.len(), 2);
    }
}
