//! Protocol-conformance scenarios: each process's use of a port is
//! checked against the port's protocol by LTS refinement, clients and
//! servers dually. Refinement is a conservative approximation, so
//! mismatches surface as suppressible warnings, never errors; only
//! instance wiring treats incompatibility as an error.

mod helpers;

use helpers::{compile_ok, has_warning};

#[test]
fn server_in_protocol_order_conforms() {
    assert!(!has_warning(
        "P = [ a ; b ];\n\
         S = process p : +P | p.a; p.b end"
    ));
}

#[test]
fn server_out_of_order_does_not_conform() {
    assert!(has_warning(
        "P = [ a ; b ];\n\
         S = process p : +P | p.b; p.a end"
    ));
}

#[test]
fn client_mirror_of_the_protocol_conforms() {
    assert!(!has_warning(
        "P = [ a ; b ];\n\
         C = process p : -P | p.a; p.b end"
    ));
}

#[test]
fn alternation_accepts_a_select_over_both_branches() {
    assert!(!has_warning(
        "P = [ a | b ];\n\
         S = process p : +P | select | | p.a | | p.b end end"
    ));
}

#[test]
fn optional_field_still_names_a_real_branch() {
    // ?a adds a wildcard bypass; the a branch itself stays real, so a
    // server offering a conforms.
    assert!(!has_warning(
        "P = [ ?a ];\n\
         S = process p : +P | p.a end"
    ));
}

#[test]
fn client_if_without_else_uses_the_wildcard() {
    // The empty else branch of the client becomes a wildcard transition
    // in its LTS and is not required of the protocol.
    assert!(!has_warning(
        "F = [ ^flag : Bool ];\n\
         P = [ ?a ];\n\
         C = process f : -F; p : -P |\n\
           x : Bool := f.flag;\n\
           if x then p.a end\n\
         end"
    ));
}

#[test]
fn missing_required_exchange_is_flagged() {
    assert!(has_warning(
        "P = [ a ; b ];\n\
         S = process p : +P | p.a end"
    ));
}

#[test]
fn perpetual_servers_are_conservatively_flagged() {
    // A loop body never reaches its finish state, so the injective
    // mapping cannot pin the protocol's finish; the approximation warns
    // even though every finite trace is legal. Suppressed by default.
    assert!(has_warning(
        "P = [ *(req : Integer ; ^rep : Integer) ];\n\
         S = process p : +P | loop x : Integer := p.req; p.rep := x end end"
    ));
}

#[test]
fn operations_on_other_ports_are_invisible() {
    // Conformance is per port: traffic on q collapses away when p is
    // checked, and vice versa.
    assert!(!has_warning(
        "P = [ a ; b ];\n\
         R = [ c ];\n\
         S = process p : +P; q : +R | p.a; q.c; p.b end"
    ));
}

#[test]
fn conditional_branches_must_each_conform() {
    // Both arms of the if talk to p; each arm alone satisfies [ a | b ].
    assert!(!has_warning(
        "F = [ ^flag : Bool ];\n\
         P = [ a | b ];\n\
         S = process p : +P; f : -F |\n\
           x : Bool := f.flag;\n\
           if x then p.a else p.b end\n\
         end"
    ));
}

#[test]
fn instance_wiring_requires_compatible_protocols() {
    let text = "P = [ a ; b ];\n\
                R = [ b ; a ];\n\
                S = process p : +P | p.a; p.b end;\n\
                C = process p : -R | p.b; p.a end;\n\
                W = cell ch : R; S(ch); C(ch) end";
    assert!(helpers::errors_of(text) >= 1);
}

#[test]
fn matched_request_reply_cell_is_clean() {
    let outcome = compile_ok(
        "P = [ *(req : Integer ; ^rep : Integer) ];\n\
         S = process p : +P | loop x : Integer := p.req; p.rep := x + 1 end end;\n\
         C = process p : -P | p.req := 41; y : Integer := p.rep end;\n\
         Net = cell ch : P; S(ch); C(ch) end;\n\
         Net()",
    );
    assert!(!outcome.blocks.is_empty());
}
