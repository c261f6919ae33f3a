//! Node kinds and the small enumerations they carry.

use crate::base::{Name, Position};

use super::fields::FieldId;
use super::tree::NodeId;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Or,
    And,
    Plus,
    Minus,
    Multiply,
    Divide,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    /// Array extension `a &= e`.
    Extend,
    /// Text concatenation `//`.
    Cat,
}

impl BinOp {
    /// OR and AND.
    pub fn is_bool(self) -> bool {
        matches!(self, BinOp::Or | BinOp::And)
    }

    /// Equality comparisons.
    pub fn is_equality(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne)
    }

    /// Orderings other than EQ and NE.
    pub fn is_ordering(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    /// Arithmetic operators.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            BinOp::Plus | BinOp::Minus | BinOp::Multiply | BinOp::Divide | BinOp::Mod
        )
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Minus,
    Not,
    /// `execute` of a byte array.
    Execute,
}

/// Protocol repetition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtoOp {
    /// `*p` - zero or more.
    Many,
    /// `+p` - one or more.
    More,
    /// `?p` - optional.
    Opt,
}

/// Role carried by a port declaration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PortRole {
    #[default]
    None,
    Channel,
    Client,
    Server,
}

impl PortRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PortRole::None => "no role",
            PortRole::Channel => "channel",
            PortRole::Client => "client",
            PortRole::Server => "server",
        }
    }
}

/// Direction of a protocol field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MessageKind {
    #[default]
    None,
    /// Caller to callee.
    Query,
    /// Callee to caller, marked with a caret.
    Reply,
}

/// Communication performed by a declaration-or-assignment statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CommKind {
    #[default]
    None,
    Send,
    Receive,
}

/// Scheduling policy of a select statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Policy {
    #[default]
    Default,
    Fair,
    Ordered,
    Random,
}

impl Policy {
    pub fn as_str(self) -> &'static str {
        match self {
            Policy::Default | Policy::Fair => "fair",
            Policy::Ordered => "ordered",
            Policy::Random => "random",
        }
    }
}

/// Iterator operations (`m@finish`, `it@begin`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterFun {
    Start,
    Finish,
    Key,
    Value,
    Step,
}

/// Which side of a map a comprehension ranges over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetKind {
    Domain,
    Range,
}

/// Shape of the collection behind a map comprehension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MapKind {
    #[default]
    None,
    /// A map proper.
    Indexed,
    Array,
    Text,
}

/// File or system stream attached to a communication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FileMode {
    #[default]
    None,
    SysIn,
    SysOut,
    SysErr,
    FileInput,
    FileOutput,
}

/// One tree node: a source position plus the kind payload.
#[derive(Debug, Clone)]
pub struct Node {
    pub pos: Position,
    pub kind: NodeKind,
}

/// Block-address sentinel: labels start at 1, so 0 and below mean unset.
pub const NO_LABEL: i32 = -1;

/// The tree variants.
///
/// Label fields (`i32`) hold basic-block addresses assigned by the `gen`
/// pass; they are [`NO_LABEL`] until then. `owner` fields hold the name of
/// the enclosing closure, also assigned by `gen`.
#[derive(Debug, Clone)]
pub enum NodeKind {
    // ------------------------------------------------------------------
    // Top level
    // ------------------------------------------------------------------
    Program {
        items: Vec<NodeId>,
    },
    /// `name = value` definition.
    Define {
        name: NodeId,
        value: NodeId,
    },
    /// `name : Type = expr` pervasive constant.
    Constant {
        name: NodeId,
        ty: NodeId,
        value: NodeId,
    },
    /// Instantiation of a cell, process, or procedure.
    Instance {
        name: NodeId,
        args: Vec<NodeId>,
        top_level: bool,
    },

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------
    Cell {
        params: Vec<NodeId>,
        instances: Vec<NodeId>,
        name: Name,
    },
    Process {
        params: Vec<NodeId>,
        body: NodeId,
        name: Name,
        type_num: i32,
        start: i32,
    },
    Procedure {
        params: Vec<NodeId>,
        body: NodeId,
        name: Name,
        type_num: i32,
        start: i32,
    },
    Thread {
        channel: NodeId,
        inputs: Vec<NodeId>,
        outputs: Vec<NodeId>,
        body: NodeId,
        name: Name,
        start: i32,
        num_fields: u32,
    },
    ThreadParam {
        name: NodeId,
        role: PortRole,
        ty: NodeId,
        port: NodeId,
        input: bool,
        transfer: i32,
    },
    /// External-routine stub: parameters and an optional result type.
    NativeDec {
        params: Vec<NodeId>,
        result: Option<NodeId>,
    },
    Protocol {
        expr: NodeId,
        name: Name,
        num_fields: u32,
    },

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------
    VoidType,
    BoolType,
    ByteType {
        signed: bool,
    },
    IntType {
        signed: bool,
    },
    FloatType,
    DecimalType,
    CharType,
    TextType,
    FileType {
        output: bool,
    },
    EnumType {
        values: Vec<NodeId>,
        runtime_name: String,
    },
    EnumValue {
        name: Name,
        index: u32,
        ty: Option<NodeId>,
    },
    ArrayType {
        elem: NodeId,
        lo: NodeId,
        hi: NodeId,
    },
    MapType {
        domain: NodeId,
        range: NodeId,
        polarity: PortRole,
    },
    IterType {
        domain: NodeId,
        range: NodeId,
    },

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------
    Sequence {
        stmts: Vec<NodeId>,
    },
    Skip,
    Exit {
        loop_end: i32,
    },
    If {
        arms: Vec<NodeId>,
        alt: NodeId,
        if_end: i32,
    },
    /// One `cond -> body` arm of an if/elif chain, with the declarations
    /// hoisted out of the condition by extraction.
    CondArm {
        decs: Vec<NodeId>,
        cond: NodeId,
        body: NodeId,
        cond_true: i32,
        cond_false: i32,
        if_end: i32,
    },
    Loop {
        body: NodeId,
        loop_start: i32,
        loop_end: i32,
    },
    For {
        comp: NodeId,
        body: NodeId,
        more: i32,
        matched: i32,
        body_label: i32,
        step: i32,
        end: i32,
    },
    Any {
        comp: NodeId,
        body: NodeId,
        alt: NodeId,
        more: i32,
        found: i32,
        step: i32,
        body_label: i32,
        alt_label: i32,
        end: i32,
    },
    Select {
        policy: Policy,
        options: Vec<NodeId>,
        owner: Name,
        sel_num: i32,
        num_branches: u32,
        select_start: i32,
        select_end: i32,
    },
    SelectOption {
        policy: Policy,
        guard: Option<NodeId>,
        body: NodeId,
        owner: Name,
        sel_num: i32,
        select_start: i32,
        select_end: i32,
        test_guard: i32,
        exec_branch: i32,
    },
    /// Declaration, assignment, send, receive, or signal. Which one it is
    /// depends on the name/type/value combination; `comm` is settled during
    /// checking.
    Dec {
        name: NodeId,
        ty: Option<NodeId>,
        value: Option<NodeId>,
        role: PortRole,
        msg: MessageKind,
        generated: bool,
        constant: bool,
        moved: bool,
        alias: bool,
        parameter: bool,
        reference: bool,
        comm: CommKind,
        transfer: i32,
        temp_num: i32,
        /// True when this is the first statement of a select option.
        branch: bool,
    },
    Start {
        calls: Vec<NodeId>,
        body: NodeId,
    },
    ThreadCall {
        name: NodeId,
        inputs: Vec<NodeId>,
        outputs: Vec<NodeId>,
        channel: Option<NodeId>,
        num_fields: u32,
        input_transfer: i32,
        output_transfer: i32,
    },

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------
    Name {
        text: Name,
        defining: bool,
        definition: Option<NodeId>,
        owner: Name,
        var_num: i32,
        field: Option<FieldId>,
        by_reference: bool,
    },
    BoolLit {
        value: bool,
    },
    CharLit {
        value: char,
    },
    TextLit {
        value: String,
    },
    /// Numeric literal; `ty` is the Integer or Decimal singleton, possibly
    /// rewritten in place by a coercion.
    NumLit {
        text: String,
        ty: NodeId,
    },
    Binop {
        op: BinOp,
        lhs: NodeId,
        rhs: NodeId,
        ty: Option<NodeId>,
    },
    Unop {
        op: UnOp,
        operand: NodeId,
        ty: Option<NodeId>,
    },
    /// `lhs if pred else rhs`.
    CondExpr {
        lhs: NodeId,
        pred: NodeId,
        rhs: NodeId,
        ty: Option<NodeId>,
    },
    Call {
        name: NodeId,
        args: Vec<NodeId>,
        /// Index into the builtin function table, chosen during checking.
        target: Option<usize>,
    },
    Subscript {
        base: NodeId,
        index: NodeId,
        lvalue: bool,
    },
    Subrange {
        base: NodeId,
        lo: NodeId,
        hi: NodeId,
        lvalue: bool,
    },
    /// `port.field` communication.
    Dot {
        port: NodeId,
        field: NodeId,
    },
    /// `port?field` non-blocking peek. Phase 1 issues the query; the
    /// generated phase-2 node fetches the result into `target`.
    Query {
        port: NodeId,
        field: NodeId,
        target: Option<NodeId>,
        phase: u8,
    },
    IterOp {
        map: NodeId,
        fun: IterFun,
        owner: Name,
    },

    // ------------------------------------------------------------------
    // Protocol operators
    // ------------------------------------------------------------------
    ProtoSeq {
        parts: Vec<NodeId>,
    },
    ProtoAlt {
        parts: Vec<NodeId>,
    },
    ProtoRep {
        op: ProtoOp,
        operand: NodeId,
    },

    // ------------------------------------------------------------------
    // Comprehensions
    // ------------------------------------------------------------------
    Comprehension {
        var: NodeId,
        ty: Option<NodeId>,
        collection: NodeId,
        pred: Option<NodeId>,
        iter: Option<NodeId>,
    },
    RangeSet {
        ty: Option<NodeId>,
        start: NodeId,
        finish: NodeId,
        step: Option<NodeId>,
        open: bool,
        ascending: bool,
        finish_num: i32,
        step_num: i32,
        owner: Name,
    },
    MapSet {
        map: NodeId,
        set_kind: SetKind,
        map_kind: MapKind,
        ty: Option<NodeId>,
        index_name: String,
        owner: Name,
    },
    EnumSet {
        ty: Option<NodeId>,
        size: u32,
        owner: Name,
    },

    // ------------------------------------------------------------------
    // Compiler-generated
    // ------------------------------------------------------------------
    Send {
        value: Option<NodeId>,
        port: NodeId,
        field_num: u32,
        buffer: Name,
        temp: String,
        mode: FileMode,
    },
    Receive {
        target: NodeId,
        port: NodeId,
        ty: Option<NodeId>,
        field_num: u32,
        buffer: Name,
        signal: bool,
        mode: FileMode,
    },
    SendOption {
        value: Option<NodeId>,
        port: NodeId,
        field_num: u32,
        buffer: Name,
    },
    ReceiveOption {
        target: NodeId,
        port: NodeId,
        ty: Option<NodeId>,
        field_num: u32,
        buffer: Name,
        signal: bool,
    },
    ThreadStart {
        name: NodeId,
        channel: NodeId,
        num_fields: u32,
    },
    ThreadStop {
        name: NodeId,
        channel: NodeId,
    },
    /// Terminal marker: detach the process from the ready queue.
    Remove,
    RangeInit {
        owner: Name,
        ty: Option<NodeId>,
        var: NodeId,
        start: NodeId,
        finish: NodeId,
        step: Option<NodeId>,
        finish_num: i32,
        step_num: i32,
    },
    RangeTerm {
        owner: Name,
        ty: Option<NodeId>,
        var: NodeId,
        step: Option<NodeId>,
        step_num: i32,
        finish: NodeId,
        finish_num: i32,
        open: bool,
        ascending: bool,
    },
    RangeStep {
        owner: Name,
        ty: Option<NodeId>,
        var: NodeId,
        step: Option<NodeId>,
        step_num: i32,
        ascending: bool,
    },
    MapInit {
        owner: Name,
        ty: Option<NodeId>,
        var: NodeId,
        map_kind: MapKind,
        set_kind: SetKind,
        map: NodeId,
        index_name: String,
    },
    MapTerm {
        owner: Name,
        ty: Option<NodeId>,
        var: NodeId,
        map_kind: MapKind,
        set_kind: SetKind,
        map: NodeId,
        index_name: String,
    },
    MapStep {
        owner: Name,
        ty: Option<NodeId>,
        var: NodeId,
        map_kind: MapKind,
        set_kind: SetKind,
        map: NodeId,
        index_name: String,
    },
    EnumInit {
        owner: Name,
        var: NodeId,
    },
    EnumTerm {
        owner: Name,
        var: NodeId,
        size: u32,
    },
    EnumStep {
        owner: Name,
        var: NodeId,
    },
    /// Match predicate of a comprehension; `None` when no `such that`.
    MatchTest {
        pred: Option<NodeId>,
    },
}

impl NodeKind {
    /// A short name for diagnostics and emergency stops.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Program { .. } => "program",
            NodeKind::Define { .. } => "definition",
            NodeKind::Constant { .. } => "constant",
            NodeKind::Instance { .. } => "instance",
            NodeKind::Cell { .. } => "cell",
            NodeKind::Process { .. } => "process",
            NodeKind::Procedure { .. } => "procedure",
            NodeKind::Thread { .. } => "thread",
            NodeKind::ThreadParam { .. } => "thread parameter",
            NodeKind::NativeDec { .. } => "native declaration",
            NodeKind::Protocol { .. } => "protocol",
            NodeKind::VoidType => "Void",
            NodeKind::BoolType => "Bool",
            NodeKind::ByteType { signed: true } => "Byte",
            NodeKind::ByteType { signed: false } => "unsigned Byte",
            NodeKind::IntType { signed: true } => "Integer",
            NodeKind::IntType { signed: false } => "unsigned Integer",
            NodeKind::FloatType => "Float",
            NodeKind::DecimalType => "Decimal",
            NodeKind::CharType => "Char",
            NodeKind::TextType => "Text",
            NodeKind::FileType { output: false } => "input File",
            NodeKind::FileType { output: true } => "output File",
            NodeKind::EnumType { .. } => "enumeration",
            NodeKind::EnumValue { .. } => "enumeration value",
            NodeKind::ArrayType { .. } => "array type",
            NodeKind::MapType { .. } => "map type",
            NodeKind::IterType { .. } => "iterator type",
            NodeKind::Sequence { .. } => "sequence",
            NodeKind::Skip => "skip",
            NodeKind::Exit { .. } => "exit",
            NodeKind::If { .. } => "if",
            NodeKind::CondArm { .. } => "condition arm",
            NodeKind::Loop { .. } => "loop",
            NodeKind::For { .. } => "for",
            NodeKind::Any { .. } => "any",
            NodeKind::Select { .. } => "select",
            NodeKind::SelectOption { .. } => "select option",
            NodeKind::Dec { .. } => "declaration",
            NodeKind::Start { .. } => "start",
            NodeKind::ThreadCall { .. } => "thread call",
            NodeKind::Name { .. } => "name",
            NodeKind::BoolLit { .. } => "Bool literal",
            NodeKind::CharLit { .. } => "Char literal",
            NodeKind::TextLit { .. } => "Text literal",
            NodeKind::NumLit { .. } => "numeric literal",
            NodeKind::Binop { .. } => "binary operator",
            NodeKind::Unop { .. } => "unary operator",
            NodeKind::CondExpr { .. } => "conditional expression",
            NodeKind::Call { .. } => "function call",
            NodeKind::Subscript { .. } => "subscript",
            NodeKind::Subrange { .. } => "subrange",
            NodeKind::Dot { .. } => "dot",
            NodeKind::Query { .. } => "query",
            NodeKind::IterOp { .. } => "iterator operation",
            NodeKind::ProtoSeq { .. } => "protocol sequence",
            NodeKind::ProtoAlt { .. } => "protocol alternation",
            NodeKind::ProtoRep { .. } => "protocol repetition",
            NodeKind::Comprehension { .. } => "comprehension",
            NodeKind::RangeSet { .. } => "range",
            NodeKind::MapSet { .. } => "map set",
            NodeKind::EnumSet { .. } => "enumeration set",
            NodeKind::Send { .. } => "send",
            NodeKind::Receive { .. } => "receive",
            NodeKind::SendOption { .. } => "send option",
            NodeKind::ReceiveOption { .. } => "receive option",
            NodeKind::ThreadStart { .. } => "thread start",
            NodeKind::ThreadStop { .. } => "thread stop",
            NodeKind::Remove => "remove",
            NodeKind::RangeInit { .. } => "range init",
            NodeKind::RangeTerm { .. } => "range termination test",
            NodeKind::RangeStep { .. } => "range step",
            NodeKind::MapInit { .. } => "map init",
            NodeKind::MapTerm { .. } => "map termination test",
            NodeKind::MapStep { .. } => "map step",
            NodeKind::EnumInit { .. } => "enum init",
            NodeKind::EnumTerm { .. } => "enum termination test",
            NodeKind::EnumStep { .. } => "enum step",
            NodeKind::MatchTest { .. } => "match test",
        }
    }
}
