//! Labeled transition systems.
//!
//! Protocols and process behaviors are both modeled as LTSs: numbered
//! states with labeled transitions. Construction leaves silent (ε)
//! transitions everywhere; [`Lts::collapse`] removes them by merging their
//! endpoints, so every surviving transition carries a field label or the
//! wildcard. Refinement ([`satisfies`]) decides whether one LTS implements
//! another by searching for an injective state mapping.

mod build;

pub use build::{process_graph, protocol_graph};

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::base::Name;

/// Transition label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    /// Empty transition, removed by collapse.
    Silent,
    /// The "other branch" produced by the `?` protocol operator. Skipped
    /// during refinement on the specification side and never required of
    /// the implementation.
    Wildcard,
    /// A message field.
    Field(Name),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Silent => write!(f, "ε"),
            Label::Wildcard => write!(f, "?"),
            Label::Field(name) => write!(f, "{name}"),
        }
    }
}

/// A transition from `start` to `finish`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Trans {
    pub start: u32,
    pub finish: u32,
    pub label: Label,
}

/// State number source, reset per protocol or per process check.
#[derive(Debug, Default, Clone)]
pub struct StateGen {
    next: u32,
}

impl StateGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> u32 {
        let state = self.next;
        self.next += 1;
        state
    }

    /// Number of states handed out so far.
    pub fn count(&self) -> u32 {
        self.next
    }
}

/// A labeled transition system with distinguished start and finish states.
#[derive(Debug, Clone)]
pub struct Lts {
    start: u32,
    finish: u32,
    trans: Vec<Trans>,
    /// Populated by [`Lts::collapse`].
    states: BTreeSet<u32>,
}

impl Lts {
    /// Two fresh states, no transitions.
    pub fn new(gen: &mut StateGen) -> Self {
        Self {
            start: gen.fresh(),
            finish: gen.fresh(),
            trans: Vec::new(),
            states: BTreeSet::new(),
        }
    }

    /// Two fresh states joined by a silent transition: the unit of
    /// sequential composition.
    pub fn unit(gen: &mut StateGen) -> Self {
        let mut lts = Self::new(gen);
        lts.insert(lts.start, lts.finish, Label::Silent);
        lts
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn finish(&self) -> u32 {
        self.finish
    }

    pub fn states(&self) -> &BTreeSet<u32> {
        &self.states
    }

    pub fn transitions(&self) -> &[Trans] {
        &self.trans
    }

    /// Insert one transition.
    pub fn insert(&mut self, start: u32, finish: u32, label: Label) {
        self.trans.push(Trans {
            start,
            finish,
            label,
        });
    }

    /// Adopt all transitions of another LTS.
    pub fn adopt(&mut self, other: &Lts) {
        self.trans.extend(other.trans.iter().cloned());
    }

    pub fn has_trans(&self, start: u32, finish: u32, label: &Label) -> bool {
        self.trans
            .iter()
            .any(|t| t.start == start && t.finish == finish && &t.label == label)
    }

    /// Remove silent transitions by merging their endpoints.
    ///
    /// Endpoint classes are kept in a union-find whose representative is
    /// the smallest member, so the surviving state numbers are stable.
    /// `state_count` is the number of states the generator has produced.
    /// Collapsing an already collapsed LTS is a no-op.
    pub fn collapse(&mut self, state_count: u32) {
        let mut classes = MinUnionFind::new(state_count);
        self.trans.retain(|t| {
            if t.label == Label::Silent {
                classes.union(t.start, t.finish);
                false
            } else {
                true
            }
        });
        self.start = classes.find(self.start);
        self.finish = classes.find(self.finish);
        self.states.clear();
        for t in &mut self.trans {
            t.start = classes.find(t.start);
            t.finish = classes.find(t.finish);
            self.states.insert(t.start);
            self.states.insert(t.finish);
        }
    }
}

impl fmt::Display for Lts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s={} f={} <", self.start, self.finish)?;
        for (i, t) in self.trans.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}->{}->{}", t.start, t.label, t.finish)?;
        }
        write!(f, ">")
    }
}

/// Union-find whose class representative is the smallest member.
struct MinUnionFind {
    parent: Vec<u32>,
}

impl MinUnionFind {
    fn new(size: u32) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, state: u32) -> u32 {
        let mut i = state as usize;
        while self.parent[i] != i as u32 {
            let grandparent = self.parent[self.parent[i] as usize];
            self.parent[i] = grandparent;
            i = grandparent as usize;
        }
        i as u32
    }

    fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[merge as usize] = keep;
    }
}

/// Decide whether `server` satisfies `spec`.
///
/// True iff there is an injection `m` from the states of `spec` into the
/// states of `server` with `m(spec.start) = server.start`,
/// `m(spec.finish) = server.finish`, and for every transition
/// `p --a--> q` of `spec` whose label is not the wildcard, a transition
/// `m(p) --a--> m(q)` in `server`. The search extends the mapping state by
/// state, depth first, backtracking whenever the partial map violates the
/// conditions.
pub fn satisfies(server: &Lts, spec: &Lts) -> bool {
    let mut mapping = FxHashMap::default();
    let mut used = FxHashSet::default();
    extend(&mut mapping, &mut used, spec, server)
}

fn extend(
    mapping: &mut FxHashMap<u32, u32>,
    used: &mut FxHashSet<u32>,
    spec: &Lts,
    server: &Lts,
) -> bool {
    let unmapped = spec.states.iter().find(|s| !mapping.contains_key(s));
    let Some(&p) = unmapped else {
        // All states mapped.
        return true;
    };
    for &q in &server.states {
        if used.contains(&q) {
            continue;
        }
        mapping.insert(p, q);
        used.insert(q);
        if consistent(mapping, spec, server) && extend(mapping, used, spec, server) {
            return true;
        }
        mapping.remove(&p);
        used.remove(&q);
    }
    false
}

/// The partial map is good if start and finish are pinned and every fully
/// mapped, non-wildcard transition of the spec has an image in the server.
fn consistent(mapping: &FxHashMap<u32, u32>, spec: &Lts, server: &Lts) -> bool {
    if let Some(&image) = mapping.get(&spec.start) {
        if image != server.start {
            return false;
        }
    }
    if let Some(&image) = mapping.get(&spec.finish) {
        if image != server.finish {
            return false;
        }
    }
    for t in &spec.trans {
        if t.label == Label::Wildcard {
            continue;
        }
        if let (Some(&s), Some(&f)) = (mapping.get(&t.start), mapping.get(&t.finish)) {
            if !server.has_trans(s, f, &t.label) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Label {
        Label::Field(Name::new(name))
    }

    /// LTS for the protocol `a ; b`, collapsed.
    fn seq_ab(gen: &mut StateGen) -> Lts {
        let mut a = Lts::new(gen);
        let (a_start, a_finish) = (a.start, a.finish);
        a.insert(a_start, a_finish, field("a"));
        let mut b = Lts::new(gen);
        let (b_start, b_finish) = (b.start, b.finish);
        b.insert(b_start, b_finish, field("b"));
        let mut seq = Lts::new(gen);
        seq.adopt(&a);
        seq.adopt(&b);
        seq.insert(seq.start, a.start, Label::Silent);
        seq.insert(a.finish, b.start, Label::Silent);
        seq.insert(b.finish, seq.finish, Label::Silent);
        seq.collapse(gen.count());
        seq
    }

    #[test]
    fn collapse_removes_silent_transitions() {
        let mut gen = StateGen::new();
        let lts = seq_ab(&mut gen);
        assert_eq!(lts.transitions().len(), 2);
        assert!(lts
            .transitions()
            .iter()
            .all(|t| t.label != Label::Silent));
        assert_eq!(lts.states().len(), 3);
    }

    #[test]
    fn collapse_is_idempotent() {
        let mut gen = StateGen::new();
        let mut lts = seq_ab(&mut gen);
        let before = (
            lts.start(),
            lts.finish(),
            lts.transitions().to_vec(),
            lts.states().clone(),
        );
        lts.collapse(gen.count());
        assert_eq!(before.0, lts.start());
        assert_eq!(before.1, lts.finish());
        assert_eq!(before.2, lts.transitions());
        assert_eq!(&before.3, lts.states());
    }

    #[test]
    fn every_lts_satisfies_itself() {
        let mut gen = StateGen::new();
        let lts = seq_ab(&mut gen);
        assert!(satisfies(&lts, &lts));
    }

    #[test]
    fn order_mismatch_is_rejected() {
        let mut gen = StateGen::new();
        let ab = seq_ab(&mut gen);
        // b ; a with fresh states
        let mut b = Lts::new(&mut gen);
        let (bs, bf) = (b.start, b.finish);
        b.insert(bs, bf, field("b"));
        let mut a = Lts::new(&mut gen);
        let (as_, af) = (a.start, a.finish);
        a.insert(as_, af, field("a"));
        let mut ba = Lts::new(&mut gen);
        ba.adopt(&b);
        ba.adopt(&a);
        ba.insert(ba.start, b.start, Label::Silent);
        ba.insert(b.finish, a.start, Label::Silent);
        ba.insert(a.finish, ba.finish, Label::Silent);
        ba.collapse(gen.count());
        assert!(!satisfies(&ba, &ab));
        assert!(!satisfies(&ab, &ba));
    }

    #[test]
    fn wildcard_is_not_required_of_the_server() {
        let mut gen = StateGen::new();
        // Spec: a | ? (an optional branch the server need not offer).
        let mut spec = Lts::new(&mut gen);
        let (s, f) = (spec.start, spec.finish);
        spec.insert(s, f, field("a"));
        spec.insert(s, f, Label::Wildcard);
        spec.collapse(gen.count());
        // Server offers only a.
        let mut server = Lts::new(&mut gen);
        let (s, f) = (server.start, server.finish);
        server.insert(s, f, field("a"));
        server.collapse(gen.count());
        assert!(satisfies(&server, &spec));
        // But a wildcard in the implementation buys nothing: a server
        // offering only the wildcard does not satisfy a spec demanding a.
        let mut lazy = Lts::new(&mut gen);
        let (s, f) = (lazy.start, lazy.finish);
        lazy.insert(s, f, Label::Wildcard);
        lazy.collapse(gen.count());
        let mut want_a = Lts::new(&mut gen);
        let (s, f) = (want_a.start, want_a.finish);
        want_a.insert(s, f, field("a"));
        want_a.collapse(gen.count());
        assert!(!satisfies(&lazy, &want_a));
    }

    #[test]
    fn repetition_maps_into_a_looping_server() {
        let mut gen = StateGen::new();
        // Spec: *(a) — one state after collapse, self-loop on a.
        let mut spec = Lts::new(&mut gen);
        let (s, f) = (spec.start, spec.finish);
        spec.insert(s, f, field("a"));
        spec.insert(f, s, Label::Silent);
        spec.collapse(gen.count());
        assert!(satisfies(&spec, &spec));
    }
}
