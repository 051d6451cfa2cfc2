//! Region algebra backed by reduced ordered BDDs with complement edges.
//!
//! A [`Region`] is a lightweight signed handle into the [`RegionManager`].
//! A negative handle denotes the complement of the node it points to, so
//! negation is free. All operations go through the manager, which keeps the
//! unique table (hash consing) and the ITE computed table.
//!
//! Variables are allocated on demand with [`RegionManager::new_var`], and the
//! variable index doubles as the level in the ordering.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Debug, Display, Formatter};
use std::ops::Neg;

use log::debug;
use num_bigint::BigUint;

use crate::cache::{pairing2, pairing3, CacheKey, OpCache};

/// Handle to a region node.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Region(i32);

impl Region {
    /// The constant true region.
    pub const TRUE: Region = Region(1);
    /// The constant false region.
    pub const FALSE: Region = Region(-1);

    const fn new(index: u32, negated: bool) -> Self {
        if negated {
            Self(-(index as i32))
        } else {
            Self(index as i32)
        }
    }

    pub const fn is_negated(self) -> bool {
        self.0 < 0
    }

    pub const fn index(self) -> usize {
        self.0.unsigned_abs() as usize
    }

    /// Signed-to-unsigned encoding used for cache keys.
    fn unsigned(self) -> u64 {
        ((self.0.unsigned_abs() as u64) << 1) | (self.0 < 0) as u64
    }
}

impl Neg for Region {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", if self.is_negated() { "~" } else { "" }, self.index())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
struct Node {
    variable: u32,
    low: Region,
    high: Region,
}

#[derive(Debug, Eq, PartialEq, Clone)]
enum OpKey {
    Ite(Region, Region, Region),
    Exists(Region, Region),
}

impl CacheKey for OpKey {
    fn key_hash(&self) -> u64 {
        match self {
            OpKey::Ite(f, g, h) => pairing3(f.unsigned(), g.unsigned(), h.unsigned()) << 1,
            OpKey::Exists(f, cube) => (pairing2(f.unsigned(), cube.unsigned()) << 1) | 1,
        }
    }
}

/// A literal of a satisfying cube: variable and its polarity.
pub type Literal = (u32, bool);

pub struct RegionManager {
    nodes: RefCell<Vec<Node>>,
    unique: RefCell<HashMap<Node, u32>>,
    cache: RefCell<OpCache<OpKey, Region>>,
    num_vars: Cell<u32>,
    one: Region,
    zero: Region,
}

impl RegionManager {
    pub fn new(cache_bits: usize) -> Self {
        // Slot 0 is a sentry, slot 1 is the terminal.
        let sentry = Node {
            variable: 0,
            low: Region(0),
            high: Region(0),
        };
        let one = Region::TRUE;
        Self {
            nodes: RefCell::new(vec![sentry, sentry]),
            unique: RefCell::new(HashMap::new()),
            cache: RefCell::new(OpCache::new(cache_bits)),
            num_vars: Cell::new(0),
            one,
            zero: -one,
        }
    }
}

impl Default for RegionManager {
    fn default() -> Self {
        RegionManager::new(16)
    }
}

impl Debug for RegionManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.borrow();
        f.debug_struct("RegionManager")
            .field("nodes", &(self.nodes.borrow().len() - 2))
            .field("vars", &self.num_vars.get())
            .field("cache_hits", &cache.hits())
            .field("cache_misses", &cache.misses())
            .finish()
    }
}

impl RegionManager {
    pub fn make_true(&self) -> Region {
        self.one
    }
    pub fn make_false(&self) -> Region {
        self.zero
    }

    pub fn is_true(&self, r: Region) -> bool {
        r == self.one
    }
    pub fn is_false(&self, r: Region) -> bool {
        r == self.zero
    }
    pub fn is_terminal(&self, r: Region) -> bool {
        r.index() == 1
    }

    pub fn num_vars(&self) -> u32 {
        self.num_vars.get()
    }

    /// Number of allocated decision nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.borrow().len() - 2
    }

    /// Allocate a fresh variable and return its index together with its region.
    pub fn new_var(&self) -> (u32, Region) {
        let v = self.num_vars.get() + 1;
        self.num_vars.set(v);
        debug!("new_var() -> {}", v);
        (v, self.mk_node(v, self.zero, self.one))
    }

    /// The region of an already allocated variable.
    pub fn var(&self, v: u32) -> Region {
        assert!(v != 0 && v <= self.num_vars.get(), "Unknown variable {}", v);
        self.mk_node(v, self.zero, self.one)
    }

    /// Decision variable of the node, `0` for the terminal.
    pub fn variable(&self, r: Region) -> u32 {
        self.nodes.borrow()[r.index()].variable
    }

    pub fn low_node(&self, r: Region) -> Region {
        let low = self.nodes.borrow()[r.index()].low;
        if r.is_negated() {
            -low
        } else {
            low
        }
    }
    pub fn high_node(&self, r: Region) -> Region {
        let high = self.nodes.borrow()[r.index()].high;
        if r.is_negated() {
            -high
        } else {
            high
        }
    }

    fn mk_node(&self, v: u32, low: Region, high: Region) -> Region {
        debug!("mk(v = {}, low = {}, high = {})", v, low, high);
        assert_ne!(v, 0, "Variable index should not be zero");

        // Canonical form keeps the high edge regular.
        if high.is_negated() {
            return -self.mk_node(v, -low, -high);
        }
        if low == high {
            return low;
        }

        let node = Node {
            variable: v,
            low,
            high,
        };
        if let Some(&index) = self.unique.borrow().get(&node) {
            return Region::new(index, false);
        }
        let mut nodes = self.nodes.borrow_mut();
        let index = nodes.len() as u32;
        nodes.push(node);
        self.unique.borrow_mut().insert(node, index);
        Region::new(index, false)
    }

    fn top_cofactors(&self, r: Region, v: u32) -> (Region, Region) {
        if self.is_terminal(r) || v < self.variable(r) {
            return (r, r);
        }
        (self.low_node(r), self.high_node(r))
    }

    fn top_variable(&self, regions: &[Region]) -> u32 {
        regions
            .iter()
            .map(|&r| self.variable(r))
            .filter(|&v| v != 0)
            .min()
            .unwrap_or(0)
    }

    /// `ITE(f, g, h) = (f ∧ g) ∨ (¬f ∧ h)`.
    pub fn ite(&self, f: Region, g: Region, h: Region) -> Region {
        debug!("ite(f = {}, g = {}, h = {})", f, g, h);

        if self.is_true(f) {
            return g;
        }
        if self.is_false(f) {
            return h;
        }
        if g == h {
            return g;
        }
        if self.is_true(g) && self.is_false(h) {
            return f;
        }
        if self.is_false(g) && self.is_true(h) {
            return -f;
        }

        // Standard triples:
        //   ite(F,F,H) => ite(F,1,H)
        //   ite(F,G,F) => ite(F,G,0)
        //   ite(F,~F,H) => ite(F,0,H)
        //   ite(F,G,~F) => ite(F,G,1)
        if g == f {
            return self.ite(f, self.one, h);
        }
        if h == f {
            return self.ite(f, g, self.zero);
        }
        if g == -f {
            return self.ite(f, self.zero, h);
        }
        if h == -f {
            return self.ite(f, g, self.one);
        }

        // ite(~F,G,H) => ite(F,H,G)
        let (f, g, h) = if f.is_negated() { (-f, h, g) } else { (f, g, h) };
        // ite(F,~G,H) => ~ite(F,G,~H)
        let (g, h, negate) = if g.is_negated() { (-g, -h, true) } else { (g, h, false) };

        let key = OpKey::Ite(f, g, h);
        if let Some(&res) = self.cache.borrow().get(&key) {
            debug!("cache: ite(f = {}, g = {}, h = {}) -> {}", f, g, h, res);
            return if negate { -res } else { res };
        }

        let m = self.top_variable(&[f, g, h]);
        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let (h0, h1) = self.top_cofactors(h, m);
        let e = self.ite(f0, g0, h0);
        let t = self.ite(f1, g1, h1);
        let res = self.mk_node(m, e, t);
        debug!("computed: ite(f = {}, g = {}, h = {}) -> {}", f, g, h, res);
        self.cache.borrow_mut().insert(&key, res);

        if negate {
            -res
        } else {
            res
        }
    }

    fn maybe_constant(&self, r: Region) -> Option<bool> {
        if self.is_true(r) {
            Some(true)
        } else if self.is_false(r) {
            Some(false)
        } else {
            None
        }
    }

    /// Decide whether `ITE(f, g, h)` is a constant without building it.
    pub fn ite_constant(&self, f: Region, g: Region, h: Region) -> Option<bool> {
        if self.is_true(f) {
            return self.maybe_constant(g);
        }
        if self.is_false(f) {
            return self.maybe_constant(h);
        }
        if g == h {
            return self.maybe_constant(g);
        }
        if (self.is_true(g) && h == -f) || (g == f && self.is_true(h)) {
            return Some(true);
        }
        if (g == -f && self.is_false(h)) || (self.is_false(g) && h == f) {
            return Some(false);
        }
        if self.is_terminal(g) && self.is_terminal(h) {
            // ite(F,1,0) or ite(F,0,1) with non-constant F.
            return None;
        }

        let m = self.top_variable(&[f, g, h]);
        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let (h0, h1) = self.top_cofactors(h, m);

        let t = self.ite_constant(f1, g1, h1)?;
        let e = self.ite_constant(f0, g0, h0)?;
        if t == e {
            Some(t)
        } else {
            None
        }
    }

    /// Entailment check `f ⇒ g`.
    pub fn entails(&self, f: Region, g: Region) -> bool {
        debug!("entails(f = {}, g = {})", f, g);
        self.ite_constant(f, g, self.one) == Some(true)
    }

    pub fn make_not(&self, f: Region) -> Region {
        -f
    }

    pub fn make_and(&self, u: Region, v: Region) -> Region {
        self.ite(u, v, self.zero)
    }

    pub fn make_or(&self, u: Region, v: Region) -> Region {
        self.ite(u, self.one, v)
    }

    pub fn make_and_many(&self, regions: impl IntoIterator<Item = Region>) -> Region {
        let mut res = self.one;
        for r in regions {
            res = self.make_and(res, r);
            if self.is_false(res) {
                break;
            }
        }
        res
    }

    pub fn make_or_many(&self, regions: impl IntoIterator<Item = Region>) -> Region {
        let mut res = self.zero;
        for r in regions {
            res = self.make_or(res, r);
            if self.is_true(res) {
                break;
            }
        }
        res
    }

    /// Conjunction of literals.
    pub fn cube(&self, literals: impl IntoIterator<Item = Literal>) -> Region {
        let mut literals = literals.into_iter().collect::<Vec<_>>();
        literals.sort_by_key(|&(v, _)| std::cmp::Reverse(v));
        let mut current = self.one;
        for (v, positive) in literals {
            current = if positive {
                self.mk_node(v, self.zero, current)
            } else {
                self.mk_node(v, current, self.zero)
            };
        }
        current
    }

    /// Existential quantification `∃ vars . f`.
    pub fn make_exists(&self, f: Region, vars: impl IntoIterator<Item = u32>) -> Region {
        let cube = self.cube(vars.into_iter().map(|v| (v, true)));
        debug!("exists(f = {}, cube = {})", f, cube);
        self.exists_cube(f, cube)
    }

    fn exists_cube(&self, f: Region, mut cube: Region) -> Region {
        if self.is_terminal(f) {
            return f;
        }
        let v = self.variable(f);
        while !self.is_true(cube) && self.variable(cube) < v {
            cube = self.high_node(cube);
        }
        if self.is_true(cube) {
            return f;
        }

        let key = OpKey::Exists(f, cube);
        if let Some(&res) = self.cache.borrow().get(&key) {
            return res;
        }

        let low = self.low_node(f);
        let high = self.high_node(f);
        let res = if self.variable(cube) == v {
            let rest = self.high_node(cube);
            let e = self.exists_cube(low, rest);
            if self.is_true(e) {
                e
            } else {
                self.make_or(e, self.exists_cube(high, rest))
            }
        } else {
            let e = self.exists_cube(low, cube);
            let t = self.exists_cube(high, cube);
            self.mk_node(v, e, t)
        };
        self.cache.borrow_mut().insert(&key, res);
        res
    }

    /// Variables the region depends on.
    pub fn support(&self, f: Region) -> BTreeSet<u32> {
        let mut vars = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut stack = vec![f.index()];
        while let Some(i) = stack.pop() {
            if i <= 1 || !visited.insert(i) {
                continue;
            }
            let node = self.nodes.borrow()[i];
            vars.insert(node.variable);
            stack.push(node.low.index());
            stack.push(node.high.index());
        }
        vars
    }

    /// All paths from `f` to the true terminal, as disjoint cubes.
    pub fn cubes(&self, f: Region) -> Vec<Vec<Literal>> {
        let mut result = Vec::new();
        let mut path = Vec::new();
        self.collect_cubes(f, &mut path, &mut result);
        result
    }

    fn collect_cubes(&self, f: Region, path: &mut Vec<Literal>, result: &mut Vec<Vec<Literal>>) {
        if self.is_false(f) {
            return;
        }
        if self.is_true(f) {
            result.push(path.clone());
            return;
        }
        let v = self.variable(f);
        path.push((v, false));
        self.collect_cubes(self.low_node(f), path, result);
        path.pop();
        path.push((v, true));
        self.collect_cubes(self.high_node(f), path, result);
        path.pop();
    }

    /// Number of satisfying assignments over the first `num_vars` variables.
    pub fn sat_count(&self, f: Region, num_vars: u32) -> BigUint {
        let mut cache = HashMap::new();
        let max = BigUint::from(1u8) << num_vars;
        self.sat_count_(f, &max, &mut cache)
    }

    fn sat_count_(&self, f: Region, max: &BigUint, cache: &mut HashMap<Region, BigUint>) -> BigUint {
        if self.is_false(f) {
            return BigUint::from(0u8);
        }
        if self.is_true(f) {
            return max.clone();
        }
        if let Some(count) = cache.get(&f) {
            return count.clone();
        }
        let low = self.sat_count_(self.low_node(f), max, cache);
        let high = self.sat_count_(self.high_node(f), max, cache);
        let count: BigUint = (low + high) >> 1;
        cache.insert(f, count.clone());
        count
    }
}
