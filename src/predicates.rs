//! Abstraction predicates and their binding to region variables.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use log::debug;

use crate::formula::{Formula, FormulaKind};
use crate::region::{Region, RegionManager};

struct PredicateData {
    id: usize,
    atom: Formula,
    variable: u32,
    region: Region,
}

/// An uninstantiated atom bound to a region variable.
///
/// Predicates are interned by [`AbstractionManager`]: equal atoms always give
/// the same predicate, so equality and ordering only look at the id.
#[derive(Clone)]
pub struct AbstractionPredicate(Rc<PredicateData>);

impl AbstractionPredicate {
    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn atom(&self) -> &Formula {
        &self.0.atom
    }

    /// Index of the region variable.
    pub fn variable(&self) -> u32 {
        self.0.variable
    }

    pub fn region(&self) -> Region {
        self.0.region
    }

    pub fn is_false(&self) -> bool {
        self.0.atom.is_false()
    }
}

impl PartialEq for AbstractionPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for AbstractionPredicate {}

impl PartialOrd for AbstractionPredicate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AbstractionPredicate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(&other.id())
    }
}

impl Hash for AbstractionPredicate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl Display for AbstractionPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.atom())
    }
}

impl Debug for AbstractionPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}<{}>", self.id(), self.atom())
    }
}

/// Owner of the region manager and the predicate table.
pub struct AbstractionManager {
    rmgr: RegionManager,
    by_atom: RefCell<HashMap<Formula, AbstractionPredicate>>,
    by_var: RefCell<BTreeMap<u32, AbstractionPredicate>>,
}

impl AbstractionManager {
    pub fn new(rmgr: RegionManager) -> Self {
        Self {
            rmgr,
            by_atom: RefCell::new(HashMap::new()),
            by_var: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn region_manager(&self) -> &RegionManager {
        &self.rmgr
    }

    pub fn num_predicates(&self) -> usize {
        self.by_atom.borrow().len()
    }

    /// Interned predicate for `atom`, whose SSA indices are stripped first.
    pub fn make_predicate(&self, atom: &Formula) -> AbstractionPredicate {
        let atom = atom.uninstantiate();
        if let Some(p) = self.by_atom.borrow().get(&atom) {
            return p.clone();
        }
        let (variable, region) = self.rmgr.new_var();
        let predicate = AbstractionPredicate(Rc::new(PredicateData {
            id: self.by_atom.borrow().len(),
            atom: atom.clone(),
            variable,
            region,
        }));
        debug!("New predicate {:?} on variable {}", predicate, variable);
        self.by_atom.borrow_mut().insert(atom, predicate.clone());
        self.by_var.borrow_mut().insert(variable, predicate.clone());
        predicate
    }

    /// The predicate `false`, meaning "check satisfiability".
    pub fn make_false_predicate(&self) -> AbstractionPredicate {
        self.make_predicate(&Formula::ff())
    }

    pub fn predicate_for_var(&self, variable: u32) -> Option<AbstractionPredicate> {
        self.by_var.borrow().get(&variable).cloned()
    }

    /// Predicates whose variables occur in `region`.
    pub fn extract_predicates(&self, region: Region) -> BTreeSet<AbstractionPredicate> {
        let by_var = self.by_var.borrow();
        self.rmgr
            .support(region)
            .into_iter()
            .filter_map(|v| by_var.get(&v).cloned())
            .collect()
    }

    /// Uninstantiated formula equivalent to `region`.
    pub fn to_concrete(&self, region: Region) -> Formula {
        let mut memo = HashMap::new();
        self.to_concrete_rec(region, &mut memo)
    }

    fn to_concrete_rec(&self, region: Region, memo: &mut HashMap<Region, Formula>) -> Formula {
        if self.rmgr.is_true(region) {
            return Formula::tt();
        }
        if self.rmgr.is_false(region) {
            return Formula::ff();
        }
        if let Some(f) = memo.get(&region) {
            return f.clone();
        }
        let v = self.rmgr.variable(region);
        let atom = match self.predicate_for_var(v) {
            Some(p) => p.atom().clone(),
            None => Formula::prop(&format!("__region_var_{}", v)),
        };
        let high = self.to_concrete_rec(self.rmgr.high_node(region), memo);
        let low = self.to_concrete_rec(self.rmgr.low_node(region), memo);
        let f = if high.is_true() && low.is_false() {
            atom
        } else if high.is_false() && low.is_true() {
            Formula::not(&atom)
        } else {
            atom.and(&high).or(&Formula::not(&atom).and(&low))
        };
        memo.insert(region, f.clone());
        f
    }

    /// Region of a formula over predicate atoms; unknown atoms become new predicates.
    pub fn build_region(&self, formula: &Formula) -> Region {
        match formula.kind() {
            FormulaKind::True => self.rmgr.make_true(),
            FormulaKind::False => self.rmgr.make_false(),
            FormulaKind::Prop(_) | FormulaKind::Atom(..) => self.make_predicate(formula).region(),
            FormulaKind::Not(g) => self.rmgr.make_not(self.build_region(g)),
            FormulaKind::And(gs) => self.rmgr.make_and_many(gs.iter().map(|g| self.build_region(g))),
            FormulaKind::Or(gs) => self.rmgr.make_or_many(gs.iter().map(|g| self.build_region(g))),
        }
    }
}

impl Default for AbstractionManager {
    fn default() -> Self {
        Self::new(RegionManager::default())
    }
}

impl Debug for AbstractionManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbstractionManager")
            .field("predicates", &self.num_predicates())
            .field("rmgr", &self.rmgr)
            .finish()
    }
}
