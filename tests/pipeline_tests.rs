//! End-to-end pipeline scenarios and the tree/block invariants that must
//! hold after each stage.

mod helpers;

use helpers::{compile_ok, errors_of};
use oriel::gen::BasicBlock;
use oriel::syntax::{NodeId, NodeKind};
use rstest::rstest;
use rustc_hash::{FxHashMap, FxHashSet};

// ======================================================================
// Scenarios
// ======================================================================

#[test]
fn arithmetic_assignment_and_assert() {
    compile_ok(
        "Q = process | x : Integer := 3; x := x + 4; assert(x = 7) end",
    );
}

#[test]
fn enum_loop_renders_value_names() {
    let outcome = compile_ok(
        "Color = <red, green, blue>;\n\
         Q = process | for c in Color do sys.out := text(c) end end",
    );
    // The send must go through the enumeration renderer, not the integer
    // one: find the call wrapped around the loop variable.
    let ast = &outcome.ast;
    let funcs = oriel::sem::FuncTable::new(ast);
    let mut renderers = Vec::new();
    for id in (0..ast.len() as u32).map(NodeId) {
        if let NodeKind::Call {
            target: Some(t), ..
        } = ast.kind(id)
        {
            renderers.push(funcs.get(*t).runtime_name);
        }
    }
    assert!(renderers.contains(&"enum2string"), "{renderers:?}");
}

#[test]
fn text_message_transfer() {
    compile_ok(
        "P = [ msg : Text ];\n\
         S = process p : +P | v : Text := p.msg end;\n\
         C = process p : -P | p.msg := \"hi\" end;\n\
         Net = cell ch : P; S(ch); C(ch) end;\n\
         Net()",
    );
}

#[test]
fn threads_started_and_stopped_around_a_body() {
    let outcome = compile_ok(
        "Double = thread a : Integer -> b : Integer | b := a + a end;\n\
         Q = process |\n\
           x : Integer := 1; b : Integer := 0; c : Integer := 0;\n\
           start Double(x -> b); Double(b -> c) do skip end;\n\
           assert(c = c)\n\
         end",
    );
    let ast = &outcome.ast;
    let mut starts = 0;
    let mut stops = 0;
    for id in (0..ast.len() as u32).map(NodeId) {
        match ast.kind(id) {
            NodeKind::ThreadStart { .. } => starts += 1,
            NodeKind::ThreadStop { .. } => stops += 1,
            _ => {}
        }
    }
    assert_eq!(starts, 2);
    assert_eq!(stops, 2);
}

#[test]
fn empty_loop_body_still_produces_blocks() {
    let outcome = compile_ok("Q = process | loop skip end end");
    // The back-edge block survives optimization.
    assert!(!outcome.blocks.is_empty());
    let outcome = compile_ok("Q = process | loop end end");
    assert!(!outcome.blocks.is_empty());
}

#[test]
fn literate_envelope_and_imports_are_understood() {
    let tex = "Before.\n\\begin{code}\nQ = process | skip end\n\\end{code}\nAfter.\n";
    let code = oriel::source::extract_literate(tex);
    compile_ok(&code);
}

#[test]
fn select_policies_are_recorded() {
    let outcome = compile_ok(
        "P = [ *(a | b) ];\n\
         S = process p : +P | loopselect random | | p.a | | p.b end end",
    );
    let ast = &outcome.ast;
    let select = (0..ast.len() as u32)
        .map(NodeId)
        .find(|&id| matches!(ast.kind(id), NodeKind::Select { .. }))
        .expect("select exists");
    let NodeKind::Select {
        policy,
        num_branches,
        ..
    } = ast.kind(select)
    else {
        unreachable!()
    };
    assert_eq!(policy.as_str(), "random");
    assert_eq!(*num_branches, 2);
}

// ======================================================================
// Invariants
// ======================================================================

/// After binding, every name is a defining occurrence or has a
/// definition. Callee names are exempt: builtins resolve through the
/// function table rather than the scope chain.
#[test]
fn binding_invariant() {
    let outcome = compile_ok(
        "P = [ *(req : Integer ; ^rep : Integer) ];\n\
         S = process p : +P | loop x : Integer := p.req; p.rep := x + 1 end end;\n\
         C = process p : -P | p.req := 2; y : Integer := p.rep; sys.out := text(y) end;\n\
         Net = cell ch : P; S(ch); C(ch) end;\n\
         Net()",
    );
    let ast = &outcome.ast;
    let mut callees = FxHashSet::default();
    for id in (0..ast.len() as u32).map(NodeId) {
        if let NodeKind::Call { name, .. } = ast.kind(id) {
            callees.insert(*name);
        }
    }
    for id in (0..ast.len() as u32).map(NodeId) {
        if callees.contains(&id) {
            continue;
        }
        if let NodeKind::Name {
            defining,
            definition,
            text,
            ..
        } = ast.kind(id)
        {
            assert!(
                *defining || definition.is_some(),
                "name '{text}' is neither defining nor bound"
            );
        }
    }
}

/// Fields tied through a port share one field number after numbering.
#[test]
fn tied_fields_share_numbers() {
    let outcome = compile_ok(
        "P = [ msg : Text ; ^ack : Text ];\n\
         R = [ msg : Text ; ^ack : Text ];\n\
         S = process p : +P | v : Text := p.msg; p.ack := v end;\n\
         C = process p : -R | p.msg := \"hi\"; w : Text := p.ack end;\n\
         Net = cell ch : P; S(ch); C(ch) end;\n\
         Net()",
    );
    let mut ast = outcome.ast;
    // Collect field numbers by field name across both protocols.
    let mut by_name: FxHashMap<String, Vec<i32>> = FxHashMap::default();
    for id in (0..ast.len() as u32).map(NodeId) {
        let NodeKind::Name {
            text,
            field: Some(slot),
            defining: true,
            ..
        } = ast.kind(id).clone()
        else {
            continue;
        };
        let number = ast.fields.number(slot);
        by_name.entry(text.to_string()).or_default().push(number);
    }
    let msg = &by_name["msg"];
    let ack = &by_name["ack"];
    assert_eq!(msg.len(), 2);
    assert_eq!(ack.len(), 2);
    assert_eq!(msg[0], msg[1], "tied msg fields diverge: {by_name:?}");
    assert_eq!(ack[0], ack[1], "tied ack fields diverge: {by_name:?}");
    assert_ne!(msg[0], ack[0]);
    assert!(msg.iter().chain(ack).all(|&n| n >= 0));
}

/// Block labels are unique within a closure, and every written transfer
/// lands on a block of the same closure.
#[test]
fn block_labels_are_unique_and_resolved() {
    let outcome = compile_ok(
        "F = [ ^flag : Bool ];\n\
         Q = process f : -F |\n\
           x : Bool := f.flag;\n\
           i : Integer := 0;\n\
           loop\n\
             if x then i := i + 1 else exit end\n\
           end;\n\
           for k in 1 to 3 do i := i + k end\n\
         end",
    );
    for segment in closures(&outcome.blocks) {
        let mut labels = FxHashSet::default();
        for block in segment {
            assert!(
                labels.insert(block.start),
                "duplicate label {}",
                block.start
            );
        }
        for block in segment {
            if block.write_transfer {
                assert!(
                    labels.contains(&block.transfer),
                    "transfer {} does not label any block",
                    block.transfer
                );
            }
            if block.alt_transfer > 0 {
                assert!(
                    labels.contains(&block.alt_transfer),
                    "alt transfer {} does not label any block",
                    block.alt_transfer
                );
            }
        }
    }
}

/// After optimization, the blocks of a closure are exactly the blocks
/// reachable from its start by transfer, alt-transfer, and select
/// dispatch edges.
#[test]
fn optimized_blocks_equal_reachable_blocks() {
    let outcome = compile_ok(
        "P = [ *(a | b) ];\n\
         S = process p : +P |\n\
           i : Integer := 0;\n\
           loopselect | i < 10 | p.a; i := i + 1 | | p.b end\n\
         end",
    );
    let ast = &outcome.ast;
    for segment in closures(&outcome.blocks) {
        let by_label: FxHashMap<i32, &BasicBlock> =
            segment.iter().map(|b| (b.start, b)).collect();
        let mut reachable = FxHashSet::default();
        let mut queue = vec![segment[0].start];
        while let Some(label) = queue.pop() {
            if !reachable.insert(label) {
                continue;
            }
            let Some(block) = by_label.get(&label) else {
                continue;
            };
            if block.write_transfer || block.alt_transfer > 0 {
                queue.push(block.transfer);
            }
            if block.alt_transfer > 0 {
                queue.push(block.alt_transfer);
            }
            // Select dispatch edges come from the option table.
            for &stmt in &block.stmts {
                match ast.kind(stmt) {
                    NodeKind::Select { options, .. } => {
                        for &option in options {
                            if let NodeKind::SelectOption {
                                test_guard,
                                exec_branch,
                                ..
                            } = ast.kind(option)
                            {
                                queue.push(*test_guard);
                                queue.push(*exec_branch);
                            }
                        }
                    }
                    NodeKind::SelectOption { select_end, .. } => {
                        queue.push(*select_end);
                    }
                    _ => {}
                }
            }
        }
        for block in segment {
            assert!(
                reachable.contains(&block.start),
                "block {} survives optimization but is unreachable",
                block.start
            );
        }
    }
}

// ======================================================================
// Boundary behaviors
// ======================================================================

#[rstest]
#[case("Byte", "-129", 1)]
#[case("Integer", "-129", 0)]
#[case("Byte", "-128", 0)]
#[case("Byte", "127", 0)]
#[case("Byte", "128", 1)]
#[case("unsigned Byte", "255", 0)]
#[case("unsigned Byte", "256", 1)]
#[case("unsigned Integer", "-1", 1)]
fn literal_range_boundaries(#[case] ty: &str, #[case] literal: &str, #[case] expected: usize) {
    let text = format!("Q = process | x : {ty} := {literal} end");
    assert_eq!(errors_of(&text), expected, "{text}");
}

#[test]
fn select_without_options_is_rejected() {
    assert_eq!(errors_of("Q = process | select end end"), 1);
}

#[test]
fn both_arms_communicating_in_conditional_expression() {
    let text = "P = [ ^a : Integer ; ^b : Integer ];\n\
                Q = process p : -P | x : Integer := p.a if true else p.b end";
    assert!(errors_of(text) >= 1);
}

#[test]
fn sending_file_read_results_is_rejected() {
    let text = "P = [ msg : Text ];\n\
                Q = process p : -P |\n\
                  f : InputFile := file_open_read(\"data.txt\");\n\
                  p.msg := file_read(f)\n\
                end";
    assert!(errors_of(text) >= 1);
}

// ======================================================================
// Helpers
// ======================================================================

/// Split a block list into per-closure segments.
fn closures(blocks: &[BasicBlock]) -> Vec<&[BasicBlock]> {
    let mut bounds = Vec::new();
    for (index, block) in blocks.iter().enumerate() {
        if block.closure.is_some() {
            bounds.push(index);
        }
    }
    bounds.push(blocks.len());
    bounds
        .windows(2)
        .map(|w| &blocks[w[0]..w[1]])
        .filter(|s| !s.is_empty())
        .collect()
}
