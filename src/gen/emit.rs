//! Output assembly.
//!
//! The output file is a skeleton: runtime-template sections interleaved
//! with the compiled block lists. Each closure becomes a switch over its
//! block labels; each block ends by storing its successor into the
//! process's program counter and either breaking back to the dispatch
//! loop or returning to the scheduler (for blocks that unlock).
//!
//! Statement rendering here is deliberately compact; the full textual
//! back end consumes the same block list through [`BlockList`].

use std::fmt::Write as _;

use crate::syntax::{Ast, BinOp, IterFun, NodeId, NodeKind, UnOp};

use super::blocks::{BasicBlock, BlockList};
use super::template::Template;

/// Assemble the complete output text.
pub fn emit(
    ast: &Ast,
    blocks: &BlockList,
    template: &Template,
    native_sources: &[(String, String)],
    tracing: Option<u32>,
) -> String {
    let mut out = String::new();
    if let Some(section) = template.section('A') {
        out.push_str(section);
    }

    for (name, text) in native_sources {
        let _ = writeln!(out, "// Function definitions from '{name}'");
        out.push_str(text);
        if !text.ends_with('\n') {
            out.push('\n');
        }
    }

    out.push_str("// Compiled blocks\n\n");
    write_blocks(&mut out, ast, blocks);

    if let Some(section) = template.section('B') {
        out.push_str(section);
    }
    if let Some(cycles) = tracing {
        let _ = writeln!(out, "   int cycles = {cycles};");
    }
    if let Some(section) = template.section('C') {
        out.push_str(section);
    }
    if tracing.is_some() {
        if let Some(section) = template.section('E') {
            out.push_str(section);
        }
    }
    if let Some(section) = template.section('F') {
        out.push_str(section);
    }
    out
}

/// Render every closure's blocks as a labeled switch body.
pub fn write_blocks(out: &mut String, ast: &Ast, blocks: &BlockList) {
    for block in blocks {
        if let Some(closure) = block.closure {
            let name = closure_name(ast, closure);
            let _ = writeln!(out, "// closure {name}");
        }
        write_block(out, ast, block);
    }
}

fn write_block(out: &mut String, ast: &Ast, block: &BasicBlock) {
    let _ = writeln!(out, "case {}: {{", block.start);
    let stmts = &block.stmts;
    let (body, condition) = if !block.write_transfer && block.alt_transfer > 0 {
        // Two-way block: the last statement is the decision.
        match stmts.split_last() {
            Some((last, rest)) => (rest, Some(*last)),
            None => (&stmts[..], None),
        }
    } else {
        (&stmts[..], None)
    };
    for &stmt in body {
        let _ = writeln!(out, "    {};", render(ast, stmt));
    }
    if let Some(condition) = condition {
        let _ = writeln!(
            out,
            "    pc = ({}) ? {} : {};",
            render_decision(ast, condition),
            block.transfer,
            block.alt_transfer
        );
    } else if block.write_transfer {
        let _ = writeln!(out, "    pc = {};", block.transfer);
    }
    if block.unlock {
        out.push_str("    return;\n");
    } else {
        out.push_str("    break;\n");
    }
    out.push_str("}\n");
}

fn closure_name(ast: &Ast, closure: NodeId) -> String {
    match ast.kind(closure) {
        NodeKind::Process { name, .. }
        | NodeKind::Procedure { name, .. }
        | NodeKind::Thread { name, .. } => name.to_string(),
        _ => String::new(),
    }
}

/// The decision expression of a two-way block.
fn render_decision(ast: &Ast, node: NodeId) -> String {
    match ast.kind(node) {
        // Decision blocks for comprehension tests render the whole test.
        NodeKind::CondArm { cond, .. } => render(ast, *cond),
        _ => render(ast, node),
    }
}

/// Compact rendering of one node.
pub fn render(ast: &Ast, id: NodeId) -> String {
    match ast.kind(id) {
        NodeKind::Name { text, .. } => text.to_string(),
        NodeKind::BoolLit { value } => value.to_string(),
        NodeKind::CharLit { value } => format!("'{value}'"),
        NodeKind::TextLit { value } => format!("{value:?}"),
        NodeKind::NumLit { text, .. } => text.clone(),
        NodeKind::Binop { op, lhs, rhs, .. } => format!(
            "({} {} {})",
            render(ast, *lhs),
            binop_symbol(*op),
            render(ast, *rhs)
        ),
        NodeKind::Unop { op, operand, .. } => match op {
            UnOp::Minus => format!("-{}", render(ast, *operand)),
            UnOp::Not => format!("not {}", render(ast, *operand)),
            UnOp::Execute => format!("execute {}", render(ast, *operand)),
        },
        NodeKind::CondExpr { lhs, pred, rhs, .. } => format!(
            "({} if {} else {})",
            render(ast, *lhs),
            render(ast, *pred),
            render(ast, *rhs)
        ),
        NodeKind::Call { name, args, .. } => {
            let args: Vec<String> = args.iter().map(|&a| render(ast, a)).collect();
            format!("{}({})", render(ast, *name), args.join(", "))
        }
        NodeKind::Subscript { base, index, .. } => {
            format!("{}[{}]", render(ast, *base), render(ast, *index))
        }
        NodeKind::Subrange { base, lo, hi, .. } => format!(
            "{}[{}..{}]",
            render(ast, *base),
            render(ast, *lo),
            render(ast, *hi)
        ),
        NodeKind::Dot { port, field } => {
            format!("{}.{}", render(ast, *port), render(ast, *field))
        }
        NodeKind::Query {
            port,
            field,
            target,
            phase,
        } => match (phase, target) {
            (2, Some(target)) => format!(
                "{} := query_result({}, {})",
                render(ast, *target),
                render(ast, *port),
                render(ast, *field)
            ),
            _ => format!("query({}, {})", render(ast, *port), render(ast, *field)),
        },
        NodeKind::IterOp { map, fun, .. } => {
            let op = match fun {
                IterFun::Start => "begin",
                IterFun::Finish => "finish",
                IterFun::Key => "key",
                IterFun::Value => "value",
                IterFun::Step => "next",
            };
            format!("{}@{}", render(ast, *map), op)
        }
        NodeKind::Dec {
            name, ty, value, ..
        } => match (ty, value) {
            (Some(_), Some(value)) | (None, Some(value)) => {
                format!("{} := {}", render(ast, *name), render(ast, *value))
            }
            (Some(_), None) => format!("declare {}", render(ast, *name)),
            (None, None) => render(ast, *name),
        },
        NodeKind::Instance { name, args, .. } => {
            let args: Vec<String> = args.iter().map(|&a| render(ast, a)).collect();
            format!("create {}({})", render(ast, *name), args.join(", "))
        }
        NodeKind::Send {
            value,
            port,
            field_num,
            buffer,
            mode,
            ..
        } => {
            let payload = value.map(|v| render(ast, v)).unwrap_or_default();
            match mode {
                crate::syntax::FileMode::SysOut => format!("sys_out({payload})"),
                crate::syntax::FileMode::SysErr => format!("sys_err({payload})"),
                _ => format!(
                    "send({}, {field_num}, {buffer}, {payload})",
                    render(ast, *port)
                ),
            }
        }
        NodeKind::Receive {
            target,
            port,
            field_num,
            buffer,
            signal,
            mode,
            ..
        } => match mode {
            crate::syntax::FileMode::SysIn => {
                format!("{} := sys_in()", render(ast, *target))
            }
            _ if *signal => format!(
                "receive_signal({}, {field_num})",
                render(ast, *port)
            ),
            _ => format!(
                "{} := receive({}, {field_num}, {buffer})",
                render(ast, *target),
                render(ast, *port)
            ),
        },
        NodeKind::SendOption {
            value,
            port,
            field_num,
            ..
        } => {
            let payload = value.map(|v| render(ast, v)).unwrap_or_default();
            format!(
                "send_option({}, {field_num}, {payload})",
                render(ast, *port)
            )
        }
        NodeKind::ReceiveOption {
            target,
            port,
            field_num,
            signal,
            ..
        } => {
            if *signal {
                format!("receive_option_signal({}, {field_num})", render(ast, *port))
            } else {
                format!(
                    "{} := receive_option({}, {field_num})",
                    render(ast, *target),
                    render(ast, *port)
                )
            }
        }
        NodeKind::Select {
            policy,
            sel_num,
            num_branches,
            ..
        } => format!(
            "select_dispatch({sel_num}, {num_branches}, {})",
            policy.as_str()
        ),
        NodeKind::SelectOption {
            guard, body: _, ..
        } => match guard {
            Some(guard) => format!("option_test({})", render(ast, *guard)),
            None => "option_test(true)".to_string(),
        },
        NodeKind::ThreadStart {
            name,
            channel,
            num_fields,
        } => format!(
            "thread_start({}, {}, {num_fields})",
            render(ast, *name),
            render(ast, *channel)
        ),
        NodeKind::ThreadStop { name, channel } => format!(
            "thread_stop({}, {})",
            render(ast, *name),
            render(ast, *channel)
        ),
        NodeKind::Remove => "remove_process()".to_string(),
        NodeKind::RangeInit {
            var, start, step, ..
        } => {
            let step = step
                .map(|s| render(ast, s))
                .unwrap_or_else(|| "1".to_string());
            format!(
                "{} := {}; step := {step}",
                render(ast, *var),
                render(ast, *start)
            )
        }
        NodeKind::RangeTerm {
            var,
            finish,
            open,
            ascending,
            ..
        } => {
            let relation = match (ascending, open) {
                (true, false) => "<=",
                (true, true) => "<",
                (false, false) => ">=",
                (false, true) => ">",
            };
            format!(
                "{} {relation} {}",
                render(ast, *var),
                render(ast, *finish)
            )
        }
        NodeKind::RangeStep { var, ascending, .. } => {
            if *ascending {
                format!("{} += step", render(ast, *var))
            } else {
                format!("{} -= step", render(ast, *var))
            }
        }
        NodeKind::MapInit {
            var, map, index_name, ..
        } => format!(
            "{index_name} := begin({}); {} := element({index_name})",
            render(ast, *map),
            render(ast, *var)
        ),
        NodeKind::MapTerm { map, index_name, .. } => {
            format!("{index_name} ~= end({})", render(ast, *map))
        }
        NodeKind::MapStep {
            var, index_name, ..
        } => format!(
            "{index_name} := next({index_name}); {} := element({index_name})",
            render(ast, *var)
        ),
        NodeKind::EnumInit { var, .. } => format!("{} := 0", render(ast, *var)),
        NodeKind::EnumTerm { var, size, .. } => {
            format!("{} < {size}", render(ast, *var))
        }
        NodeKind::EnumStep { var, .. } => format!("{} += 1", render(ast, *var)),
        NodeKind::MatchTest { pred } => match pred {
            Some(pred) => render(ast, *pred),
            None => "true".to_string(),
        },
        NodeKind::CondArm { cond, .. } => render(ast, *cond),
        other => format!("/* {} */", other.tag()),
    }
}

fn binop_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Or => "or",
        BinOp::And => "and",
        BinOp::Plus => "+",
        BinOp::Minus => "-",
        BinOp::Multiply => "*",
        BinOp::Divide => "/",
        BinOp::Mod => "%",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::Eq => "==",
        BinOp::Ne => "~=",
        BinOp::Extend => "&=",
        BinOp::Cat => "//",
    }
}
