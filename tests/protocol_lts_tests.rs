//! Shape checks for the LTS a protocol expression compiles into: after
//! ε-elimination every transition carries a field label or the wildcard,
//! and each operator leaves its characteristic state/transition shape.

mod helpers;

use helpers::compile_ok;
use oriel::lts::{Label, Lts};
use oriel::syntax::NodeKind;

/// The LTS of the single protocol in a one-definition program.
fn protocol_lts(text: &str) -> Lts {
    let outcome = compile_ok(text);
    let ast = &outcome.ast;
    let entry = outcome
        .protocols
        .iter()
        .find(|(&id, _)| {
            // Skip the injected sys protocol; the user's protocol carries
            // the name bound by its definition.
            matches!(ast.kind(id), NodeKind::Protocol { name, .. } if name.as_str() == "P")
        })
        .map(|(_, entry)| entry)
        .expect("protocol P was checked");
    entry.lts.clone()
}

fn labels_of(lts: &Lts) -> Vec<String> {
    let mut labels: Vec<String> = lts
        .transitions()
        .iter()
        .map(|t| t.label.to_string())
        .collect();
    labels.sort();
    labels
}

#[test]
fn single_field_is_one_transition() {
    let lts = protocol_lts("P = [ a ]");
    assert_eq!(lts.transitions().len(), 1);
    assert_eq!(lts.states().len(), 2);
    assert_ne!(lts.start(), lts.finish());
}

#[test]
fn sequence_chains_states() {
    let lts = protocol_lts("P = [ a ; b ; c ]");
    assert_eq!(lts.transitions().len(), 3);
    assert_eq!(lts.states().len(), 4);
    assert_eq!(labels_of(&lts), vec!["a", "b", "c"]);
}

#[test]
fn alternation_shares_start_and_finish() {
    let lts = protocol_lts("P = [ a | b | c ]");
    assert_eq!(lts.transitions().len(), 3);
    // All branches collapse onto one start and one finish.
    assert_eq!(lts.states().len(), 2);
    for t in lts.transitions() {
        assert_eq!(t.start, lts.start());
        assert_eq!(t.finish, lts.finish());
    }
}

#[test]
fn repetition_merges_finish_into_start() {
    let lts = protocol_lts("P = [ *(a) ]");
    assert_eq!(lts.start(), lts.finish());
    assert_eq!(lts.transitions().len(), 1);
    let t = &lts.transitions()[0];
    assert_eq!(t.start, t.finish);
}

#[test]
fn one_or_more_keeps_two_copies() {
    let lts = protocol_lts("P = [ +(a) ]");
    // One mandatory pass plus a looping second copy.
    assert_eq!(lts.transitions().len(), 2);
    assert!(labels_of(&lts).iter().all(|l| l == "a"));
    assert_ne!(lts.start(), lts.finish());
}

#[test]
fn option_adds_a_wildcard_bypass() {
    let lts = protocol_lts("P = [ ?a ]");
    assert_eq!(lts.transitions().len(), 2);
    let wildcards = lts
        .transitions()
        .iter()
        .filter(|t| t.label == Label::Wildcard)
        .count();
    assert_eq!(wildcards, 1);
}

#[test]
fn no_silent_transitions_survive_collapse() {
    let lts = protocol_lts("P = [ *( a ; (b | c) ; ?d ) ]");
    assert!(lts
        .transitions()
        .iter()
        .all(|t| t.label != Label::Silent));
    // Every state appears on some transition.
    for t in lts.transitions() {
        assert!(lts.states().contains(&t.start));
        assert!(lts.states().contains(&t.finish));
    }
}

#[test]
fn request_reply_cycle_has_two_states() {
    let lts = protocol_lts("P = [ *(req : Integer ; ^rep : Integer) ]");
    assert_eq!(lts.states().len(), 2);
    assert_eq!(lts.start(), lts.finish());
    assert_eq!(labels_of(&lts), vec!["rep", "req"]);
}
