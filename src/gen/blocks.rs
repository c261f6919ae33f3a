//! Basic blocks and the flattening pass.
//!
//! A block holds a run of statements, a case label (`start`), and its
//! successor labels. Blocks are not true basic blocks: a two-way block
//! carries both `transfer` and `alt_transfer`, and a select block picks
//! its successor from the option table at run time. A block whose
//! `unlock` flag is set cedes control to the scheduler after its last
//! statement; execution resumes at `transfer` when the process is next
//! scheduled.

use rustc_hash::FxHashSet;

use crate::base::Name;
use crate::syntax::{Ast, BinOp, CommKind, FileMode, IterFun, NodeId, NodeKind, NO_LABEL};

/// One basic block.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Nodes for the code in this block.
    pub stmts: Vec<NodeId>,
    /// Case label; negative means unreachable.
    pub start: i32,
    /// Whether the successor address must be written at the block's end.
    pub write_transfer: bool,
    /// Successor label.
    pub transfer: i32,
    /// Second successor of a two-way block.
    pub alt_transfer: i32,
    /// Set on the first block of a closure.
    pub closure: Option<NodeId>,
    /// Cede control to the scheduler at the end of this block.
    pub unlock: bool,
    /// The select dispatcher jumps here: the label is live even when no
    /// other block transfers to it.
    pub dispatch: bool,
}

impl BasicBlock {
    pub fn new(start: i32) -> Self {
        Self {
            stmts: Vec::new(),
            start,
            write_transfer: true,
            transfer: 0,
            alt_transfer: 0,
            closure: None,
            unlock: false,
            dispatch: false,
        }
    }

    pub fn add(&mut self, stmt: NodeId) {
        self.stmts.push(stmt);
    }
}

pub type BlockList = Vec<BasicBlock>;

/// Close the current block and open a new one.
///
/// `end_label` becomes the current block's transfer; `start_label` labels
/// the new block. A positive `alt_label` makes the current block two-way.
fn add_block(blocks: &mut BlockList, end_label: i32, start_label: i32, alt_label: i32) {
    if let Some(last) = blocks.last_mut() {
        last.transfer = end_label;
        if alt_label > 0 {
            last.write_transfer = false;
            last.alt_transfer = alt_label;
        }
    }
    blocks.push(BasicBlock::new(start_label));
}

/// Flatten a numbered program into its block list.
pub fn flatten(ast: &mut Ast, program: NodeId) -> BlockList {
    let mut blocks = BlockList::new();
    walk(ast, &mut blocks, program);
    blocks
}

fn walk(ast: &mut Ast, blocks: &mut BlockList, id: NodeId) {
    match ast.kind(id).clone() {
        NodeKind::Program { items } => {
            for item in items {
                walk(ast, blocks, item);
            }
        }

        NodeKind::Define { name, value } => {
            walk(ast, blocks, name);
            walk(ast, blocks, value);
        }

        NodeKind::Instance { .. } => {
            if let Some(last) = blocks.last_mut() {
                last.add(id);
            }
        }

        NodeKind::Procedure { params, body, start, .. } => {
            let mut block = BasicBlock::new(start);
            block.closure = Some(id);
            blocks.push(block);
            for param in params {
                walk(ast, blocks, param);
            }
            walk(ast, blocks, body);
            if let Some(last) = blocks.last_mut() {
                last.write_transfer = false;
                last.unlock = true;
            }
            optimize(blocks);
        }

        NodeKind::Process { params, body, start, .. } => {
            let mut block = BasicBlock::new(start);
            block.closure = Some(id);
            blocks.push(block);
            for param in params {
                walk(ast, blocks, param);
            }
            walk(ast, blocks, body);
            let pos = ast.pos(id);
            let remove = ast.alloc(pos, NodeKind::Remove);
            if let Some(last) = blocks.last_mut() {
                last.add(remove);
                last.write_transfer = false;
                last.unlock = true;
            }
            optimize(blocks);
        }

        NodeKind::Thread {
            inputs,
            outputs,
            body,
            start,
            ..
        } => {
            let mut block = BasicBlock::new(start);
            block.closure = Some(id);
            blocks.push(block);
            for input in inputs {
                thread_param_blocks(ast, blocks, input);
            }
            walk(ast, blocks, body);
            for output in outputs {
                thread_param_blocks(ast, blocks, output);
            }
            let pos = ast.pos(id);
            let remove = ast.alloc(pos, NodeKind::Remove);
            if let Some(last) = blocks.last_mut() {
                last.add(remove);
                last.write_transfer = false;
                last.unlock = true;
            }
            optimize(blocks);
        }

        NodeKind::Sequence { stmts } => {
            for stmt in stmts {
                walk(ast, blocks, stmt);
            }
        }

        NodeKind::Skip => {}

        NodeKind::Exit { loop_end } => {
            if let Some(last) = blocks.last_mut() {
                last.transfer = loop_end;
            }
            blocks.push(BasicBlock::new(NO_LABEL));
        }

        NodeKind::If { arms, alt, if_end } => {
            for arm in arms {
                walk(ast, blocks, arm);
            }
            walk(ast, blocks, alt);
            add_block(blocks, if_end, if_end, -1);
        }

        NodeKind::CondArm {
            decs,
            cond,
            body,
            cond_true,
            cond_false,
            if_end,
        } => {
            for dec in decs {
                walk(ast, blocks, dec);
            }
            if let Some(last) = blocks.last_mut() {
                last.add(cond);
            }
            add_block(blocks, cond_true, cond_true, cond_false);
            walk(ast, blocks, body);
            add_block(blocks, if_end, cond_false, -1);
        }

        NodeKind::Loop {
            body,
            loop_start,
            loop_end,
        } => {
            add_block(blocks, loop_start, loop_start, -1);
            walk(ast, blocks, body);
            add_block(blocks, loop_start, loop_end, -1);
        }

        NodeKind::For {
            comp,
            body,
            more,
            matched,
            body_label,
            step,
            end,
        } => {
            let init = make_init(ast, comp);
            if let (Some(last), Some(init)) = (blocks.last_mut(), init) {
                last.add(init);
            }
            add_block(blocks, more, more, -1);
            let term = make_term_test(ast, comp);
            if let (Some(last), Some(term)) = (blocks.last_mut(), term) {
                last.add(term);
            }
            add_block(blocks, end, matched, matched);
            let matcher = make_match_test(ast, comp);
            if let (Some(last), Some(matcher)) = (blocks.last_mut(), matcher) {
                last.add(matcher);
            }
            add_block(blocks, step, body_label, body_label);
            walk(ast, blocks, body);
            add_block(blocks, step, step, -1);
            let stepper = make_step(ast, comp);
            if let (Some(last), Some(stepper)) = (blocks.last_mut(), stepper) {
                last.add(stepper);
            }
            add_block(blocks, more, end, -1);
        }

        NodeKind::Any {
            comp,
            body,
            alt,
            more,
            found,
            step,
            body_label,
            alt_label,
            end,
        } => {
            let init = make_init(ast, comp);
            if let (Some(last), Some(init)) = (blocks.last_mut(), init) {
                last.add(init);
            }
            add_block(blocks, more, more, -1);
            let term = make_term_test(ast, comp);
            if let (Some(last), Some(term)) = (blocks.last_mut(), term) {
                last.add(term);
            }
            add_block(blocks, alt_label, found, found);
            let matcher = make_match_test(ast, comp);
            if let (Some(last), Some(matcher)) = (blocks.last_mut(), matcher) {
                last.add(matcher);
            }
            add_block(blocks, step, step, body_label);
            let stepper = make_step(ast, comp);
            if let (Some(last), Some(stepper)) = (blocks.last_mut(), stepper) {
                last.add(stepper);
            }
            add_block(blocks, more, body_label, -1);
            walk(ast, blocks, body);
            add_block(blocks, end, alt_label, -1);
            walk(ast, blocks, alt);
            add_block(blocks, end, end, -1);
        }

        NodeKind::Select {
            options,
            select_start,
            select_end,
            ..
        } => {
            add_block(blocks, select_start, select_start, -1);
            if let Some(last) = blocks.last_mut() {
                last.add(id);
                // The successor is computed at run time from the option
                // table.
                last.write_transfer = false;
                last.unlock = true;
            }
            for option in options {
                walk(ast, blocks, option);
            }
            add_block(blocks, select_end, select_end, -1);
        }

        NodeKind::SelectOption {
            body,
            test_guard,
            exec_branch,
            select_end,
            ..
        } => {
            blocks.push(BasicBlock::new(test_guard));
            if let Some(last) = blocks.last_mut() {
                last.write_transfer = false;
                last.dispatch = true;
                last.add(id);
            }
            blocks.push(BasicBlock::new(exec_branch));
            if let Some(last) = blocks.last_mut() {
                last.dispatch = true;
            }
            walk(ast, blocks, body);
            if let Some(last) = blocks.last_mut() {
                last.transfer = select_end;
            }
        }

        NodeKind::Dec { .. } => dec_blocks(ast, blocks, id),

        NodeKind::Query { .. } => {
            if let Some(last) = blocks.last_mut() {
                last.add(id);
            }
        }

        NodeKind::Binop { op, .. } => {
            // Array extension is a statement in its own right.
            if op == BinOp::Extend {
                if let Some(last) = blocks.last_mut() {
                    last.add(id);
                }
            }
        }

        NodeKind::IterOp { fun, .. } => {
            if matches!(fun, IterFun::Start | IterFun::Step) {
                if let Some(last) = blocks.last_mut() {
                    last.add(id);
                }
            }
        }

        NodeKind::Call { name, .. } => {
            // Procedure-like builtins execute for effect.
            let is_statement = ast
                .name_text(name)
                .map(|n| matches!(n.as_str(), "assert" | "file_close" | "file_write"))
                .unwrap_or(false);
            if is_statement {
                if let Some(last) = blocks.last_mut() {
                    last.add(id);
                }
            }
        }

        NodeKind::Start { calls, body } => {
            for &call in &calls {
                if let Some(last) = blocks.last_mut() {
                    last.add(call);
                }
            }
            // Create the threads and send their inputs.
            for &call in &calls {
                start_thread(ast, blocks, call);
            }
            walk(ast, blocks, body);
            // Receive the results and retire the threads.
            for &call in &calls {
                stop_thread(ast, blocks, call);
            }
        }

        _ => {}
    }
}

// ======================================================================
// Declarations, sends, receives
// ======================================================================

/// What a declaration-or-assignment statement does at run time.
enum DecAction {
    Assignment,
    Sending,
    Receiving,
    Query,
}

fn dec_blocks(ast: &mut Ast, blocks: &mut BlockList, id: NodeId) {
    let NodeKind::Dec {
        name,
        ty,
        value,
        comm,
        transfer,
        temp_num,
        branch,
        ..
    } = ast.kind(id).clone()
    else {
        return;
    };

    // Find the communication, if any.
    let name_is_dot = matches!(ast.kind(name), NodeKind::Dot { .. });
    let value_dot = value.filter(|&v| matches!(ast.kind(v), NodeKind::Dot { .. }));
    let comm_node = if name_is_dot {
        Some(name)
    } else {
        value_dot
    };
    let (port, field_num, buffer, mode) = match comm_node {
        Some(dot) => {
            let NodeKind::Dot { port, field } = ast.kind(dot).clone() else {
                return;
            };
            let field_num = field_number(ast, field);
            let buffer = field_buffer(ast, field);
            (Some(port), field_num, buffer, ast.sys_io(dot))
        }
        None => (None, 0, Name::default(), FileMode::None),
    };

    let mut signal = false;
    let action = if name_is_dot {
        if value.is_some() {
            DecAction::Sending
        } else {
            signal = true;
            match comm {
                CommKind::Receive => DecAction::Receiving,
                _ => DecAction::Sending,
            }
        }
    } else if value_dot.is_some() {
        DecAction::Receiving
    } else if value
        .map(|v| matches!(ast.kind(v), NodeKind::Query { .. }))
        .unwrap_or(false)
    {
        DecAction::Query
    } else {
        DecAction::Assignment
    };

    let pos = ast.pos(id);
    match action {
        DecAction::Assignment => {
            if let Some(last) = blocks.last_mut() {
                last.add(id);
            }
        }

        DecAction::Sending => {
            let port = port.expect("send has a port");
            if branch {
                // First statement of a select option.
                let node = ast.alloc(
                    pos,
                    NodeKind::SendOption {
                        value,
                        port,
                        field_num,
                        buffer,
                    },
                );
                if let Some(last) = blocks.last_mut() {
                    last.add(node);
                    last.unlock = true;
                }
                add_block(blocks, transfer, transfer, -1);
            } else {
                let node = ast.alloc(
                    pos,
                    NodeKind::Send {
                        value,
                        port,
                        field_num,
                        buffer,
                        temp: format!("temp{temp_num}"),
                        mode,
                    },
                );
                if let Some(last) = blocks.last_mut() {
                    last.add(node);
                }
                // System output streams never block.
                if !matches!(mode, FileMode::SysOut | FileMode::SysErr) {
                    if let Some(last) = blocks.last_mut() {
                        last.unlock = true;
                    }
                    add_block(blocks, transfer, transfer, -1);
                }
            }
        }

        DecAction::Receiving => {
            let (target, port_node) = if signal {
                (name, port.expect("signal has a port"))
            } else {
                let value = value.expect("receive has a value");
                let NodeKind::Dot { port, .. } = ast.kind(value).clone() else {
                    return;
                };
                (name, port)
            };
            if branch {
                let node = ast.alloc(
                    pos,
                    NodeKind::ReceiveOption {
                        target,
                        port: port_node,
                        ty,
                        field_num,
                        buffer,
                        signal,
                    },
                );
                if let Some(last) = blocks.last_mut() {
                    last.add(node);
                    last.unlock = true;
                }
                add_block(blocks, transfer, transfer, -1);
            } else {
                let node = ast.alloc(
                    pos,
                    NodeKind::Receive {
                        target,
                        port: port_node,
                        ty,
                        field_num,
                        buffer,
                        signal,
                        mode,
                    },
                );
                if let Some(last) = blocks.last_mut() {
                    last.add(node);
                }
                // Reading the system input stream does not suspend.
                if mode != FileMode::SysIn {
                    if let Some(last) = blocks.last_mut() {
                        last.unlock = true;
                    }
                    add_block(blocks, transfer, transfer, -1);
                }
            }
        }

        DecAction::Query => {
            let value = value.expect("query has a value");
            if let Some(last) = blocks.last_mut() {
                last.add(value);
                last.unlock = true;
            }
            add_block(blocks, transfer, transfer, -1);
            // Phase two fetches the answer into the target.
            let NodeKind::Query { port, field, .. } = ast.kind(value).clone() else {
                return;
            };
            let vpos = ast.pos(value);
            let fetch = ast.alloc(
                vpos,
                NodeKind::Query {
                    port,
                    field,
                    target: Some(name),
                    phase: 2,
                },
            );
            if let Some(last) = blocks.last_mut() {
                last.add(fetch);
            }
        }
    }
}

/// Field number of a bound field name, through the tie classes.
fn field_number(ast: &mut Ast, field: NodeId) -> u32 {
    let def = ast.definition(field);
    let slot = def.and_then(|d| match ast.kind(d) {
        NodeKind::Dec { name, .. } => match ast.kind(*name) {
            NodeKind::Name { field: Some(f), .. } => Some(*f),
            _ => None,
        },
        NodeKind::ThreadParam { name, .. } => match ast.kind(*name) {
            NodeKind::Name { field: Some(f), .. } => Some(*f),
            _ => None,
        },
        _ => None,
    });
    match slot {
        Some(slot) => {
            let number = ast.fields.number(slot);
            if number >= 0 {
                number as u32
            } else {
                0
            }
        }
        None => 0,
    }
}

/// Runtime buffer tag of a field's payload type.
fn field_buffer(ast: &Ast, field: NodeId) -> Name {
    match ast.definition(field) {
        Some(def) => match ast.def_type(def) {
            Some(ty) => ast.buffer_name(ty),
            None => Name::default(),
        },
        None => Name::default(),
    }
}

// ======================================================================
// Threads
// ======================================================================

/// Blocks for one thread parameter: a receive for an input, a send for
/// an output, each owning its block.
fn thread_param_blocks(ast: &mut Ast, blocks: &mut BlockList, param: NodeId) {
    let NodeKind::ThreadParam {
        name,
        ty,
        port,
        input,
        transfer,
        ..
    } = ast.kind(param).clone()
    else {
        return;
    };
    let pos = ast.pos(param);
    let buffer = ast.buffer_name(ty);
    let field_num = field_number_of_name(ast, name);
    if input {
        let node = ast.alloc(
            pos,
            NodeKind::Receive {
                target: name,
                port,
                ty: Some(ty),
                field_num,
                buffer,
                signal: false,
                mode: FileMode::None,
            },
        );
        if let Some(last) = blocks.last_mut() {
            last.add(node);
            last.unlock = true;
        }
        add_block(blocks, transfer, transfer, -1);
    } else {
        let node = ast.alloc(
            pos,
            NodeKind::Send {
                value: Some(name),
                port,
                field_num,
                buffer,
                temp: "tempName".to_string(),
                mode: FileMode::None,
            },
        );
        if let Some(last) = blocks.last_mut() {
            last.add(node);
            last.unlock = true;
        }
        add_block(blocks, transfer, transfer, -1);
    }
}

fn field_number_of_name(ast: &mut Ast, name: NodeId) -> u32 {
    match ast.kind(name) {
        NodeKind::Name { field: Some(f), .. } => {
            let f = *f;
            let number = ast.fields.number(f);
            if number >= 0 {
                number as u32
            } else {
                0
            }
        }
        _ => 0,
    }
}

/// Create a thread and send its input arguments.
fn start_thread(ast: &mut Ast, blocks: &mut BlockList, call: NodeId) {
    let NodeKind::ThreadCall {
        name,
        inputs,
        channel,
        num_fields,
        input_transfer,
        ..
    } = ast.kind(call).clone()
    else {
        return;
    };
    let Some(channel) = channel else {
        return;
    };
    let pos = ast.pos(call);
    let start = ast.alloc(
        pos,
        NodeKind::ThreadStart {
            name,
            channel,
            num_fields,
        },
    );
    if let Some(last) = blocks.last_mut() {
        last.add(start);
    }
    let mut transfer = input_transfer;
    for (index, input) in inputs.iter().enumerate() {
        let ty = ast.expr_type(*input);
        let buffer = ast.buffer_name(ty);
        let ipos = ast.pos(*input);
        let send = ast.alloc(
            ipos,
            NodeKind::Send {
                value: Some(*input),
                port: channel,
                field_num: index as u32,
                buffer,
                temp: "tempName".to_string(),
                mode: FileMode::None,
            },
        );
        if let Some(last) = blocks.last_mut() {
            last.add(send);
            last.unlock = true;
        }
        add_block(blocks, transfer, transfer, -1);
        transfer += 1;
    }
}

/// Receive a thread's results and destroy it.
fn stop_thread(ast: &mut Ast, blocks: &mut BlockList, call: NodeId) {
    let NodeKind::ThreadCall {
        name,
        inputs,
        outputs,
        channel,
        output_transfer,
        ..
    } = ast.kind(call).clone()
    else {
        return;
    };
    let Some(channel) = channel else {
        return;
    };
    let mut field_num = inputs.len() as u32;
    let mut transfer = output_transfer;
    for output in outputs {
        let ty = ast.expr_type(output);
        let buffer = ast.buffer_name(ty);
        let opos = ast.pos(output);
        let receive = ast.alloc(
            opos,
            NodeKind::Receive {
                target: output,
                port: channel,
                ty: Some(ty),
                field_num,
                buffer,
                signal: false,
                mode: FileMode::None,
            },
        );
        if let Some(last) = blocks.last_mut() {
            last.add(receive);
            last.unlock = true;
        }
        add_block(blocks, transfer, transfer, -1);
        field_num += 1;
        transfer += 1;
    }
    let pos = ast.pos(call);
    let stop = ast.alloc(pos, NodeKind::ThreadStop { name, channel });
    if let Some(last) = blocks.last_mut() {
        last.add(stop);
    }
}

// ======================================================================
// Comprehension triples
// ======================================================================

fn make_init(ast: &mut Ast, comp: NodeId) -> Option<NodeId> {
    let NodeKind::Comprehension {
        var, collection, ..
    } = ast.kind(comp).clone()
    else {
        return None;
    };
    let pos = ast.pos(comp);
    match ast.kind(collection).clone() {
        NodeKind::RangeSet {
            ty,
            start,
            finish,
            step,
            finish_num,
            step_num,
            owner,
            ..
        } => Some(ast.alloc(
            pos,
            NodeKind::RangeInit {
                owner,
                ty,
                var,
                start,
                finish,
                step,
                finish_num,
                step_num,
            },
        )),
        NodeKind::MapSet {
            map,
            set_kind,
            map_kind,
            ty,
            index_name,
            owner,
        } => Some(ast.alloc(
            pos,
            NodeKind::MapInit {
                owner,
                ty,
                var,
                map_kind,
                set_kind,
                map,
                index_name,
            },
        )),
        NodeKind::EnumSet { owner, .. } => {
            Some(ast.alloc(pos, NodeKind::EnumInit { owner, var }))
        }
        _ => None,
    }
}

fn make_term_test(ast: &mut Ast, comp: NodeId) -> Option<NodeId> {
    let NodeKind::Comprehension {
        var, collection, ..
    } = ast.kind(comp).clone()
    else {
        return None;
    };
    let pos = ast.pos(comp);
    match ast.kind(collection).clone() {
        NodeKind::RangeSet {
            ty,
            finish,
            step,
            finish_num,
            step_num,
            open,
            ascending,
            owner,
            ..
        } => Some(ast.alloc(
            pos,
            NodeKind::RangeTerm {
                owner,
                ty,
                var,
                step,
                step_num,
                finish,
                finish_num,
                open,
                ascending,
            },
        )),
        NodeKind::MapSet {
            map,
            set_kind,
            map_kind,
            ty,
            index_name,
            owner,
        } => Some(ast.alloc(
            pos,
            NodeKind::MapTerm {
                owner,
                ty,
                var,
                map_kind,
                set_kind,
                map,
                index_name,
            },
        )),
        NodeKind::EnumSet { size, owner, .. } => {
            Some(ast.alloc(pos, NodeKind::EnumTerm { owner, var, size }))
        }
        _ => None,
    }
}

fn make_step(ast: &mut Ast, comp: NodeId) -> Option<NodeId> {
    let NodeKind::Comprehension {
        var, collection, ..
    } = ast.kind(comp).clone()
    else {
        return None;
    };
    let pos = ast.pos(comp);
    match ast.kind(collection).clone() {
        NodeKind::RangeSet {
            ty,
            step,
            step_num,
            ascending,
            owner,
            ..
        } => Some(ast.alloc(
            pos,
            NodeKind::RangeStep {
                owner,
                ty,
                var,
                step,
                step_num,
                ascending,
            },
        )),
        NodeKind::MapSet {
            map,
            set_kind,
            map_kind,
            ty,
            index_name,
            owner,
        } => Some(ast.alloc(
            pos,
            NodeKind::MapStep {
                owner,
                ty,
                var,
                map_kind,
                set_kind,
                map,
                index_name,
            },
        )),
        NodeKind::EnumSet { owner, .. } => {
            Some(ast.alloc(pos, NodeKind::EnumStep { owner, var }))
        }
        _ => None,
    }
}

fn make_match_test(ast: &mut Ast, comp: NodeId) -> Option<NodeId> {
    let NodeKind::Comprehension { pred, .. } = ast.kind(comp).clone() else {
        return None;
    };
    let pos = ast.pos(comp);
    Some(ast.alloc(pos, NodeKind::MatchTest { pred }))
}

// ======================================================================
// Dead-block elimination
// ======================================================================

/// Remove unreachable blocks, merge empty ones, and drop unreferenced
/// labels. Iterates to a fixed point.
pub fn optimize(blocks: &mut BlockList) {
    let mut changed = true;
    while changed {
        changed = false;

        // Unreachable blocks carry a negative start label.
        let before = blocks.len();
        blocks.retain(|b| b.start >= 0);
        if blocks.len() != before {
            changed = true;
        }

        // A block with no statements that does not change locking status
        // is transparent: substitute its transfer address for its label.
        // Two exceptions: a block that transfers to itself is a loop's
        // back edge and must survive, and a closure entry may only merge
        // when its marker has a block to move to.
        let mut index = 0;
        while index < blocks.len() {
            let candidate = &blocks[index];
            let mergeable = candidate.stmts.is_empty()
                && !candidate.unlock
                && candidate.transfer != candidate.start
                && (candidate.closure.is_none()
                    || blocks
                        .iter()
                        .any(|b| b.start == candidate.transfer && b.start != candidate.start));
            if mergeable {
                let start = blocks[index].start;
                let transfer = blocks[index].transfer;
                let closure = blocks[index].closure;
                blocks.remove(index);
                for b in blocks.iter_mut() {
                    if b.start == transfer && closure.is_some() {
                        b.closure = closure;
                    }
                    if b.transfer == start {
                        b.transfer = transfer;
                    }
                    if b.alt_transfer == start {
                        b.alt_transfer = transfer;
                    }
                }
                changed = true;
            } else {
                index += 1;
            }
        }

        // Collect every label still referenced. Select dispatch jumps to
        // the option blocks, so dispatch targets keep their own labels
        // alive.
        let mut labels: FxHashSet<i32> = FxHashSet::default();
        for b in blocks.iter() {
            labels.insert(b.transfer);
            labels.insert(b.alt_transfer);
            if b.dispatch {
                labels.insert(b.start);
            }
        }

        let before = blocks.len();
        blocks.retain(|b| b.closure.is_some() || labels.contains(&b.start));
        if blocks.len() != before {
            changed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_blocks_are_removed() {
        let mut blocks = vec![BasicBlock::new(1), BasicBlock::new(-1)];
        blocks[0].stmts.push(NodeId(0));
        blocks[0].closure = Some(NodeId(0));
        optimize(&mut blocks);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn empty_blocks_are_spliced_out() {
        // 1 -> 2 (empty) -> 3
        let mut a = BasicBlock::new(1);
        a.closure = Some(NodeId(0));
        a.stmts.push(NodeId(0));
        a.transfer = 2;
        let mut b = BasicBlock::new(2);
        b.transfer = 3;
        let mut c = BasicBlock::new(3);
        c.closure = Some(NodeId(1));
        c.stmts.push(NodeId(1));
        c.transfer = 1;
        let mut blocks = vec![a, b, c];
        optimize(&mut blocks);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].transfer, 3);
    }

    #[test]
    fn unlocking_blocks_survive_even_when_empty() {
        let mut a = BasicBlock::new(1);
        a.closure = Some(NodeId(0));
        a.stmts.push(NodeId(0));
        a.transfer = 2;
        let mut b = BasicBlock::new(2);
        b.unlock = true;
        b.transfer = 1;
        let mut blocks = vec![a, b];
        optimize(&mut blocks);
        assert_eq!(blocks.len(), 2);
    }
}
