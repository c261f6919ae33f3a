//! The numbering pass.
//!
//! Walks the tree once and assigns every machine address the flattener
//! will need: block labels for control-flow joins, closure type ordinals,
//! variable ordinals, select ordinals, and protocol field numbers. It
//! also records on each definition the name of its owning closure, which
//! downstream code uses to qualify generated names.
//!
//! Field numbers within a protocol are assigned in document order, but a
//! field already tied to an earlier-numbered class keeps the class
//! number; the counter resumes past the highest number present.

use crate::base::Name;
use crate::syntax::{Ast, Counters, NodeId, NodeKind};

/// Addresses handed down the walk. Passed by value: each statement sees
/// its enclosing statement's labels without unwinding.
#[derive(Debug, Clone, Default)]
pub struct GenData {
    /// Name of the nearest enclosing definition.
    pub entity: Name,
    pub sel_num: i32,
    pub loop_end: i32,
    pub if_end: i32,
    pub test_guard: i32,
    pub exec_branch: i32,
    pub select_start: i32,
    pub select_end: i32,
    /// Statement index inside a select option; -1 elsewhere. The first
    /// statement of an option is its queue test and is flattened
    /// differently.
    pub seq_index: i32,
}

/// Run the numbering pass over a program.
pub fn number(ast: &mut Ast, counters: &mut Counters, program: NodeId) {
    let gd = GenData {
        sel_num: -1,
        loop_end: -1,
        if_end: -1,
        test_guard: -1,
        exec_branch: -1,
        select_start: -1,
        select_end: -1,
        seq_index: -1,
        ..GenData::default()
    };
    walk(ast, counters, program, gd);
}

fn walk(ast: &mut Ast, counters: &mut Counters, id: NodeId, mut gd: GenData) {
    match ast.kind(id).clone() {
        NodeKind::Program { items } => {
            for item in items {
                walk(ast, counters, item, gd.clone());
            }
        }

        NodeKind::Define { name, value } => {
            // Order matters: the definition's name becomes the owner of
            // everything below it.
            walk(ast, counters, name, gd.clone());
            gd.entity = ast.name_text(name).cloned().unwrap_or_default();
            walk(ast, counters, value, gd);
        }

        NodeKind::Constant { name, ty, value } => {
            walk(ast, counters, name, gd.clone());
            walk(ast, counters, ty, gd.clone());
            walk(ast, counters, value, gd);
        }

        NodeKind::Instance { name, args, .. } => {
            walk(ast, counters, name, gd.clone());
            for arg in args {
                walk(ast, counters, arg, gd.clone());
            }
        }

        NodeKind::Procedure { params, body, .. } => {
            counters.select = 0;
            let type_num = counters.next_closure_type();
            let start = counters.next_block();
            if let NodeKind::Procedure {
                type_num: tslot,
                start: sslot,
                ..
            } = ast.kind_mut(id)
            {
                *tslot = type_num;
                *sslot = start;
            }
            for param in params {
                walk(ast, counters, param, gd.clone());
            }
            walk(ast, counters, body, gd);
        }

        NodeKind::Process { params, body, .. } => {
            counters.select = 0;
            let type_num = counters.next_closure_type();
            let start = counters.next_block();
            if let NodeKind::Process {
                type_num: tslot,
                start: sslot,
                ..
            } = ast.kind_mut(id)
            {
                *tslot = type_num;
                *sslot = start;
            }
            for param in params {
                walk(ast, counters, param, gd.clone());
            }
            walk(ast, counters, body, gd);
        }

        NodeKind::Cell {
            params, instances, ..
        } => {
            for param in params {
                walk(ast, counters, param, gd.clone());
            }
            for instance in instances {
                walk(ast, counters, instance, gd.clone());
            }
        }

        NodeKind::Protocol { expr, .. } => {
            // Resume numbering past anything already tied in.
            counters.field = highest_assigned(ast, expr);
            walk(ast, counters, expr, gd);
            let num_fields = counters.field as u32;
            if let NodeKind::Protocol { num_fields: slot, .. } = ast.kind_mut(id) {
                *slot = num_fields;
            }
        }

        NodeKind::ProtoSeq { parts } | NodeKind::ProtoAlt { parts } => {
            for part in parts {
                walk(ast, counters, part, gd.clone());
            }
        }

        NodeKind::ProtoRep { operand, .. } => walk(ast, counters, operand, gd),

        NodeKind::Sequence { stmts } => {
            for stmt in stmts {
                walk(ast, counters, stmt, gd.clone());
                if gd.seq_index >= 0 {
                    gd.seq_index += 1;
                }
            }
        }

        NodeKind::Skip => {}

        NodeKind::Exit { .. } => {
            let loop_end = gd.loop_end;
            if let NodeKind::Exit { loop_end: slot } = ast.kind_mut(id) {
                *slot = loop_end;
            }
        }

        NodeKind::If { arms, alt, .. } => {
            let if_end = counters.next_block();
            if let NodeKind::If { if_end: slot, .. } = ast.kind_mut(id) {
                *slot = if_end;
            }
            gd.if_end = if_end;
            for arm in arms {
                walk(ast, counters, arm, gd.clone());
            }
            walk(ast, counters, alt, gd);
        }

        NodeKind::CondArm {
            decs, cond, body, ..
        } => {
            let cond_true = counters.next_block();
            let cond_false = counters.next_block();
            if let NodeKind::CondArm {
                cond_true: tslot,
                cond_false: fslot,
                if_end: eslot,
                ..
            } = ast.kind_mut(id)
            {
                *tslot = cond_true;
                *fslot = cond_false;
                *eslot = gd.if_end;
            }
            for dec in decs {
                walk(ast, counters, dec, gd.clone());
            }
            walk(ast, counters, cond, gd.clone());
            walk(ast, counters, body, gd);
        }

        NodeKind::Loop { body, .. } => {
            let loop_start = counters.next_block();
            let loop_end = counters.next_block();
            if let NodeKind::Loop {
                loop_start: sslot,
                loop_end: eslot,
                ..
            } = ast.kind_mut(id)
            {
                *sslot = loop_start;
                *eslot = loop_end;
            }
            gd.loop_end = loop_end;
            walk(ast, counters, body, gd);
        }

        NodeKind::For { comp, body, .. } => {
            let more = counters.next_block();
            let matched = counters.next_block();
            let body_label = counters.next_block();
            let step = counters.next_block();
            let end = counters.next_block();
            if let NodeKind::For {
                more: m,
                matched: t,
                body_label: b,
                step: s,
                end: e,
                ..
            } = ast.kind_mut(id)
            {
                *m = more;
                *t = matched;
                *b = body_label;
                *s = step;
                *e = end;
            }
            walk(ast, counters, comp, gd.clone());
            walk(ast, counters, body, gd);
        }

        NodeKind::Any {
            comp, body, alt, ..
        } => {
            let more = counters.next_block();
            let found = counters.next_block();
            let step = counters.next_block();
            let body_label = counters.next_block();
            let alt_label = counters.next_block();
            let end = counters.next_block();
            if let NodeKind::Any {
                more: m,
                found: f,
                step: s,
                body_label: b,
                alt_label: a,
                end: e,
                ..
            } = ast.kind_mut(id)
            {
                *m = more;
                *f = found;
                *s = step;
                *b = body_label;
                *a = alt_label;
                *e = end;
            }
            walk(ast, counters, comp, gd.clone());
            walk(ast, counters, body, gd.clone());
            walk(ast, counters, alt, gd);
        }

        NodeKind::Comprehension {
            var,
            ty,
            collection,
            pred,
            iter,
        } => {
            walk(ast, counters, var, gd.clone());
            if let Some(iter) = iter {
                walk(ast, counters, iter, gd.clone());
            }
            if let Some(ty) = ty {
                walk(ast, counters, ty, gd.clone());
            }
            walk(ast, counters, collection, gd.clone());
            if let Some(pred) = pred {
                walk(ast, counters, pred, gd);
            }
        }

        NodeKind::RangeSet {
            start,
            finish,
            step,
            ..
        } => {
            let finish_num = counters.next_block();
            let step_num = counters.next_block();
            let entity = gd.entity.clone();
            if let NodeKind::RangeSet {
                finish_num: fslot,
                step_num: sslot,
                owner,
                ..
            } = ast.kind_mut(id)
            {
                *fslot = finish_num;
                *sslot = step_num;
                *owner = entity;
            }
            walk(ast, counters, start, gd.clone());
            walk(ast, counters, finish, gd.clone());
            if let Some(step) = step {
                walk(ast, counters, step, gd);
            }
        }

        NodeKind::MapSet { map, .. } => {
            let index_name = format!("index{}", counters.next_block());
            let entity = gd.entity.clone();
            if let NodeKind::MapSet {
                index_name: islot,
                owner,
                ..
            } = ast.kind_mut(id)
            {
                *islot = index_name;
                *owner = entity;
            }
            walk(ast, counters, map, gd);
        }

        NodeKind::EnumSet { .. } => {
            let entity = gd.entity.clone();
            if let NodeKind::EnumSet { owner, .. } = ast.kind_mut(id) {
                *owner = entity;
            }
        }

        NodeKind::Select { options, .. } => {
            let sel_num = counters.next_select();
            let select_start = counters.next_block();
            let select_end = counters.next_block();
            let entity = gd.entity.clone();
            let num_branches = options.len() as u32;
            if let NodeKind::Select {
                owner,
                sel_num: nslot,
                num_branches: bslot,
                select_start: sslot,
                select_end: eslot,
                ..
            } = ast.kind_mut(id)
            {
                *owner = entity;
                *nslot = sel_num;
                *bslot = num_branches;
                *sslot = select_start;
                *eslot = select_end;
            }
            gd.sel_num = sel_num;
            gd.select_start = select_start;
            gd.select_end = select_end;
            for option in options {
                gd.test_guard = counters.next_block();
                gd.exec_branch = counters.next_block();
                walk(ast, counters, option, gd.clone());
            }
        }

        NodeKind::SelectOption { guard, body, .. } => {
            let entity = gd.entity.clone();
            if let NodeKind::SelectOption {
                owner,
                sel_num: nslot,
                select_start: sslot,
                select_end: eslot,
                test_guard: tslot,
                exec_branch: xslot,
                ..
            } = ast.kind_mut(id)
            {
                *owner = entity;
                *nslot = gd.sel_num;
                *sslot = gd.select_start;
                *eslot = gd.select_end;
                *tslot = gd.test_guard;
                *xslot = gd.exec_branch;
            }
            if let Some(guard) = guard {
                walk(ast, counters, guard, gd.clone());
            }
            // Lets the first statement of the option identify itself.
            gd.seq_index = 0;
            walk(ast, counters, body, gd);
        }

        NodeKind::Dec {
            name, ty, value, ..
        } => {
            walk(ast, counters, name, gd.clone());
            if let Some(ty) = ty {
                walk(ast, counters, ty, gd.clone());
            }
            if let Some(value) = value {
                walk(ast, counters, value, gd.clone());
            }
            let transfer = counters.next_block();
            let temp_num = counters.next_block();
            let branch = gd.seq_index == 0;
            if let NodeKind::Dec {
                transfer: tslot,
                temp_num: nslot,
                branch: bslot,
                ..
            } = ast.kind_mut(id)
            {
                *tslot = transfer;
                *nslot = temp_num;
                *bslot = branch;
            }
        }

        NodeKind::Dot { port, field } | NodeKind::Query { port, field, .. } => {
            walk(ast, counters, port, gd.clone());
            walk(ast, counters, field, gd);
        }

        NodeKind::Binop { lhs, rhs, .. } => {
            walk(ast, counters, lhs, gd.clone());
            walk(ast, counters, rhs, gd);
        }

        NodeKind::Unop { operand, .. } => walk(ast, counters, operand, gd),

        NodeKind::CondExpr { lhs, pred, rhs, .. } => {
            walk(ast, counters, lhs, gd.clone());
            walk(ast, counters, pred, gd.clone());
            walk(ast, counters, rhs, gd);
        }

        NodeKind::Subscript { base, index, .. } => {
            walk(ast, counters, base, gd.clone());
            walk(ast, counters, index, gd);
        }

        NodeKind::Subrange { base, lo, hi, .. } => {
            walk(ast, counters, base, gd.clone());
            walk(ast, counters, lo, gd.clone());
            walk(ast, counters, hi, gd);
        }

        NodeKind::IterOp { map, .. } => {
            let entity = gd.entity.clone();
            if let NodeKind::IterOp { owner, .. } = ast.kind_mut(id) {
                *owner = entity;
            }
            walk(ast, counters, map, gd);
        }

        NodeKind::Call { args, .. } => {
            for arg in args {
                walk(ast, counters, arg, gd.clone());
            }
        }

        NodeKind::ArrayType { lo, hi, .. } => {
            walk(ast, counters, lo, gd.clone());
            walk(ast, counters, hi, gd);
        }

        NodeKind::EnumType { .. } => {
            let runtime_name = format!("enum_values_{}", counters.next_block());
            if let NodeKind::EnumType {
                runtime_name: slot, ..
            } = ast.kind_mut(id)
            {
                *slot = runtime_name;
            }
        }

        NodeKind::Name {
            defining,
            definition,
            field,
            ..
        } => {
            if defining {
                let var_num = counters.next_block();
                let entity = gd.entity.clone();
                // Tied fields keep the lowest number in their class.
                if let Some(slot) = field {
                    if ast.fields.number(slot) < 0 {
                        let assigned = counters.field;
                        counters.field += 1;
                        ast.fields.set_number(slot, assigned);
                    }
                }
                if let NodeKind::Name {
                    var_num: vslot,
                    owner,
                    ..
                } = ast.kind_mut(id)
                {
                    *vslot = var_num;
                    *owner = entity;
                }
            } else if let Some(def) = definition {
                let (owner, var_num) = owner_of_definition(ast, def);
                if let NodeKind::Name {
                    owner: oslot,
                    var_num: vslot,
                    ..
                } = ast.kind_mut(id)
                {
                    *oslot = owner;
                    *vslot = var_num;
                }
            }
        }

        NodeKind::Thread {
            inputs,
            outputs,
            body,
            ..
        } => {
            let start = counters.next_block();
            counters.field = 0;
            for param in inputs.iter().chain(outputs.iter()) {
                number_thread_param(ast, counters, *param, &gd);
            }
            let num_fields = counters.field as u32;
            if let NodeKind::Thread {
                start: sslot,
                num_fields: fslot,
                ..
            } = ast.kind_mut(id)
            {
                *sslot = start;
                *fslot = num_fields;
            }
            walk(ast, counters, body, gd);
        }

        NodeKind::Start { calls, body } => {
            for call in calls {
                walk(ast, counters, call, gd.clone());
            }
            walk(ast, counters, body, gd);
        }

        NodeKind::ThreadCall {
            name,
            inputs,
            outputs,
            ..
        } => {
            walk(ast, counters, name, gd.clone());
            let pos = ast.pos(id);
            let channel = ast.alloc(
                pos,
                NodeKind::Name {
                    text: Name::new("ch"),
                    defining: true,
                    definition: None,
                    owner: gd.entity.clone(),
                    var_num: -1,
                    field: None,
                    by_reference: false,
                },
            );
            let num_fields = (inputs.len() + outputs.len()) as u32;
            // Reserve one block per message exchanged, bracketed by the
            // thread start and stop blocks.
            let _start_transfer = counters.next_block();
            let input_transfer = counters.block + 1;
            counters.block += inputs.len() as i32;
            let output_transfer = counters.block + 1;
            counters.block += outputs.len() as i32;
            let _stop_transfer = counters.next_block();
            if let NodeKind::ThreadCall {
                channel: cslot,
                num_fields: fslot,
                input_transfer: islot,
                output_transfer: oslot,
                ..
            } = ast.kind_mut(id)
            {
                *cslot = Some(channel);
                *fslot = num_fields;
                *islot = input_transfer;
                *oslot = output_transfer;
            }
            for input in inputs {
                walk(ast, counters, input, gd.clone());
            }
            for output in outputs {
                walk(ast, counters, output, gd.clone());
            }
        }

        _ => {}
    }
}

/// Number a thread parameter: a transfer block plus a positional field
/// number shared with the calling side.
fn number_thread_param(ast: &mut Ast, counters: &mut Counters, param: NodeId, gd: &GenData) {
    let NodeKind::ThreadParam { name, .. } = ast.kind(param).clone() else {
        return;
    };
    let transfer = counters.next_block();
    if let NodeKind::ThreadParam { transfer: slot, .. } = ast.kind_mut(param) {
        *slot = transfer;
    }
    let slot = match ast.kind(name) {
        NodeKind::Name { field: Some(f), .. } => *f,
        _ => {
            let f = ast.fields.alloc();
            if let NodeKind::Name { field, .. } = ast.kind_mut(name) {
                *field = Some(f);
            }
            f
        }
    };
    let assigned = counters.field;
    counters.field += 1;
    ast.fields.set_number(slot, assigned);
    let var_num = counters.next_block();
    let entity = gd.entity.clone();
    if let NodeKind::Name {
        var_num: vslot,
        owner,
        ..
    } = ast.kind_mut(name)
    {
        *vslot = var_num;
        *owner = entity;
    }
}

/// Highest field number already assigned below a protocol expression,
/// plus one; zero when nothing is assigned yet.
fn highest_assigned(ast: &mut Ast, expr: NodeId) -> i32 {
    match ast.kind(expr).clone() {
        NodeKind::Dec { name, .. } => match ast.kind(name) {
            NodeKind::Name { field: Some(f), .. } => {
                let f = *f;
                let number = ast.fields.number(f);
                if number >= 0 {
                    number + 1
                } else {
                    0
                }
            }
            _ => 0,
        },
        NodeKind::ProtoSeq { parts } | NodeKind::ProtoAlt { parts } => parts
            .iter()
            .map(|&p| highest_assigned(ast, p))
            .max()
            .unwrap_or(0),
        NodeKind::ProtoRep { operand, .. } => highest_assigned(ast, operand),
        _ => 0,
    }
}

/// Owner and variable ordinal recorded on a definition's name.
fn owner_of_definition(ast: &Ast, def: NodeId) -> (Name, i32) {
    let name = match ast.kind(def) {
        NodeKind::Dec { name, .. }
        | NodeKind::Constant { name, .. }
        | NodeKind::ThreadParam { name, .. }
        | NodeKind::Define { name, .. } => Some(*name),
        NodeKind::Comprehension { var, .. } => Some(*var),
        _ => None,
    };
    match name.map(|n| ast.kind(n)) {
        Some(NodeKind::Name { owner, var_num, .. }) => (owner.clone(), *var_num),
        _ => (Name::default(), -1),
    }
}
