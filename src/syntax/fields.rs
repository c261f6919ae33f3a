//! Protocol field table.
//!
//! Fields with the same name in two protocols connected through a port must
//! share one field number. The table keeps a union-find structure over
//! field slots: instance matching unions the slots of same-named fields,
//! and the `gen` pass assigns a number to each class representative once.

/// Index of one protocol field declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(pub u32);

/// Union-find over protocol field slots, with a per-class field number.
#[derive(Debug, Default, Clone)]
pub struct FieldTable {
    parent: Vec<u32>,
    number: Vec<i32>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new field slot in a class of its own, with no number.
    pub fn alloc(&mut self) -> FieldId {
        let id = self.parent.len() as u32;
        self.parent.push(id);
        self.number.push(-1);
        FieldId(id)
    }

    /// Representative of the class containing `field`, with path halving.
    pub fn find(&mut self, field: FieldId) -> FieldId {
        let mut i = field.0 as usize;
        while self.parent[i] != i as u32 {
            let grandparent = self.parent[self.parent[i] as usize];
            self.parent[i] = grandparent;
            i = grandparent as usize;
        }
        FieldId(i as u32)
    }

    /// Join the classes of two fields. The surviving representative keeps
    /// the lower of the two assigned numbers, so tied fields settle on the
    /// lowest number in the equivalence class.
    pub fn union(&mut self, a: FieldId, b: FieldId) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let na = self.number[ra.0 as usize];
        let nb = self.number[rb.0 as usize];
        let merged = match (na, nb) {
            (-1, n) | (n, -1) => n,
            (a, b) => a.min(b),
        };
        self.parent[rb.0 as usize] = ra.0;
        self.number[ra.0 as usize] = merged;
    }

    /// The field number of the class containing `field`, or -1 if none has
    /// been assigned yet.
    pub fn number(&mut self, field: FieldId) -> i32 {
        let root = self.find(field);
        self.number[root.0 as usize]
    }

    /// Assign a number to the class containing `field`.
    pub fn set_number(&mut self, field: FieldId, number: i32) {
        let root = self.find(field);
        self.number[root.0 as usize] = number;
    }

    /// True when the two fields are in the same class.
    pub fn tied(&mut self, a: FieldId, b: FieldId) -> bool {
        self.find(a) == self.find(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slots_are_unnumbered_singletons() {
        let mut table = FieldTable::new();
        let a = table.alloc();
        let b = table.alloc();
        assert!(!table.tied(a, b));
        assert_eq!(table.number(a), -1);
    }

    #[test]
    fn union_shares_the_lowest_number() {
        let mut table = FieldTable::new();
        let a = table.alloc();
        let b = table.alloc();
        let c = table.alloc();
        table.set_number(a, 3);
        table.set_number(b, 1);
        table.union(a, b);
        assert_eq!(table.number(a), 1);
        assert_eq!(table.number(b), 1);
        table.union(c, a);
        assert_eq!(table.number(c), 1);
    }

    #[test]
    fn numbering_reaches_every_member() {
        let mut table = FieldTable::new();
        let a = table.alloc();
        let b = table.alloc();
        table.union(a, b);
        table.set_number(b, 7);
        assert_eq!(table.number(a), 7);
    }
}
