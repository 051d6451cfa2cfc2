use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;

/// Index used for reads of a variable that was never assigned.
pub const UNINITIALIZED_INDEX: u32 = 1;

/// Per-variable SSA version counters.
///
/// # Invariants
///
/// - Every stored index is `>= UNINITIALIZED_INDEX`.
/// - Indices of a variable only grow along a path.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct SsaMap {
    indices: BTreeMap<Rc<str>, u32>,
}

impl SsaMap {
    pub fn get(&self, name: &str) -> Option<u32> {
        self.indices.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn index_or_uninitialized(&self, name: &str) -> u32 {
        self.get(name).unwrap_or(UNINITIALIZED_INDEX)
    }

    /// Index the next assignment to `name` will get.
    pub fn fresh_index(&self, name: &str) -> u32 {
        self.index_or_uninitialized(name) + 1
    }

    pub fn set(&mut self, name: impl Into<Rc<str>>, index: u32) {
        assert!(index >= UNINITIALIZED_INDEX, "SSA index should be positive");
        self.indices.insert(name.into(), index);
    }

    pub fn with(mut self, name: impl Into<Rc<str>>, index: u32) -> Self {
        self.set(name, index);
        self
    }

    pub fn variables(&self) -> impl Iterator<Item = &Rc<str>> + '_ {
        self.indices.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, u32)> + '_ {
        self.indices.iter().map(|(k, &v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Pointwise maximum of two maps.
    ///
    /// Also returns the variables whose indices differ, as
    /// `(name, index in self, index in other)`. A variable missing from one
    /// map counts as [`UNINITIALIZED_INDEX`] there.
    pub fn merge(&self, other: &SsaMap) -> (SsaMap, Vec<(Rc<str>, u32, u32)>) {
        let mut merged = self.clone();
        let mut differences = Vec::new();
        for (name, j) in other.iter() {
            let i = self.index_or_uninitialized(name);
            if i != j {
                differences.push((name.clone(), i, j));
                merged.set(name.clone(), i.max(j));
            } else if !self.contains(name) {
                merged.set(name.clone(), j);
            }
        }
        for (name, i) in self.iter() {
            if !other.contains(name) && i != UNINITIALIZED_INDEX {
                differences.push((name.clone(), i, UNINITIALIZED_INDEX));
            }
        }
        (merged, differences)
    }
}

impl Display for SsaMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, index)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}@{}", name, index)?;
        }
        write!(f, "}}")
    }
}

impl Debug for SsaMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_fresh_index() {
        let ssa = SsaMap::default().with("x", 3);
        assert_eq!(ssa.fresh_index("x"), 4);
        assert_eq!(ssa.fresh_index("y"), 2);
        assert_eq!(ssa.index_or_uninitialized("y"), UNINITIALIZED_INDEX);
    }

    #[test]
    fn test_merge() {
        let a = SsaMap::default().with("x", 2).with("y", 5);
        let b = SsaMap::default().with("x", 4).with("z", 2).with("y", 5);
        let (merged, diff) = a.merge(&b);
        assert_eq!(merged, SsaMap::default().with("x", 4).with("y", 5).with("z", 2));
        assert_eq!(diff, vec![(Rc::from("x"), 2, 4), (Rc::from("z"), 1, 2)]);
        assert_eq!(merged.to_string(), "{x@4, y@5, z@2}");
    }

    #[test]
    fn test_merge_with_variable_on_one_side() {
        let a = SsaMap::default().with("x", 3);
        let b = SsaMap::default().with("y", 1);
        let (merged, diff) = a.merge(&b);
        assert_eq!(merged, SsaMap::default().with("x", 3).with("y", 1));
        assert_eq!(diff, vec![(Rc::from("x"), 3, 1)]);

        let (merged, diff) = b.merge(&a);
        assert_eq!(merged, SsaMap::default().with("x", 3).with("y", 1));
        assert_eq!(diff, vec![(Rc::from("x"), 1, 3)]);
    }
}
