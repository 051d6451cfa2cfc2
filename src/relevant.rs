//! Selection of the predicates that matter inside a block.
//!
//! A [`RelevantPredicatesComputer`] decides which predicates survive when an
//! abstraction or a precision is reduced to a block. Results are cached per
//! (block, predicate set). [`RefineableRelevantPredicatesComputer`] wraps
//! another computer and additionally treats an explicit, growing set of facts
//! as relevant; the refiner extends these facts when a counterexample repeats
//! because reduction was too coarse.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::rc::Rc;

use log::trace;

use crate::blocks::{Block, BlockId};
use crate::predicates::AbstractionPredicate;

type CacheKey = (BlockId, BTreeSet<AbstractionPredicate>);

pub trait RelevantPredicatesComputer: Debug {
    fn relevant(&self, block: &Block, predicates: &BTreeSet<AbstractionPredicate>) -> BTreeSet<AbstractionPredicate>;

    fn irrelevant(&self, block: &Block, predicates: &BTreeSet<AbstractionPredicate>) -> BTreeSet<AbstractionPredicate> {
        let relevant = self.relevant(block, predicates);
        predicates.difference(&relevant).cloned().collect()
    }

    fn as_refineable(&self) -> Option<&RefineableRelevantPredicatesComputer> {
        None
    }
}

fn cached(
    cache: &RefCell<HashMap<CacheKey, BTreeSet<AbstractionPredicate>>>,
    block: &Block,
    predicates: &BTreeSet<AbstractionPredicate>,
    compute: impl FnOnce() -> BTreeSet<AbstractionPredicate>,
) -> BTreeSet<AbstractionPredicate> {
    let key = (block.id, predicates.clone());
    if let Some(result) = cache.borrow().get(&key) {
        return result.clone();
    }
    let result = compute();
    trace!("Relevant predicates for {}: {:?}", block, result);
    cache.borrow_mut().insert(key, result.clone());
    result
}

/// A predicate is relevant if it mentions a variable referenced in the block.
///
/// Predicates without variables (such as `false`) are always relevant.
#[derive(Debug, Default)]
pub struct OccurrenceComputer {
    cache: RefCell<HashMap<CacheKey, BTreeSet<AbstractionPredicate>>>,
}

impl OccurrenceComputer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelevantPredicatesComputer for OccurrenceComputer {
    fn relevant(&self, block: &Block, predicates: &BTreeSet<AbstractionPredicate>) -> BTreeSet<AbstractionPredicate> {
        cached(&self.cache, block, predicates, || {
            predicates
                .iter()
                .filter(|p| {
                    let vars = p.atom().variable_names();
                    vars.is_empty() || !vars.is_disjoint(&block.referenced_variables)
                })
                .cloned()
                .collect()
        })
    }
}

/// Occurrence closed under shared variables: a predicate that shares a
/// variable with a relevant predicate is relevant as well.
#[derive(Debug, Default)]
pub struct AuxiliaryComputer {
    cache: RefCell<HashMap<CacheKey, BTreeSet<AbstractionPredicate>>>,
}

impl AuxiliaryComputer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelevantPredicatesComputer for AuxiliaryComputer {
    fn relevant(&self, block: &Block, predicates: &BTreeSet<AbstractionPredicate>) -> BTreeSet<AbstractionPredicate> {
        cached(&self.cache, block, predicates, || {
            let mut variables = block.referenced_variables.clone();
            let mut relevant = BTreeSet::new();
            loop {
                let mut changed = false;
                for p in predicates {
                    if relevant.contains(p) {
                        continue;
                    }
                    let vars = p.atom().variable_names();
                    if vars.is_empty() || !vars.is_disjoint(&variables) {
                        variables.extend(vars);
                        relevant.insert(p.clone());
                        changed = true;
                    }
                }
                if !changed {
                    break relevant;
                }
            }
        })
    }
}

/// Wrapper that also accepts explicit "relevant in this block" facts.
#[derive(Debug)]
pub struct RefineableRelevantPredicatesComputer {
    base: Rc<dyn RelevantPredicatesComputer>,
    facts: BTreeMap<BlockId, BTreeSet<AbstractionPredicate>>,
    cache: RefCell<HashMap<CacheKey, BTreeSet<AbstractionPredicate>>>,
}

impl RefineableRelevantPredicatesComputer {
    pub fn new(base: Rc<dyn RelevantPredicatesComputer>) -> Self {
        Self {
            base,
            facts: BTreeMap::new(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn facts(&self) -> &BTreeMap<BlockId, BTreeSet<AbstractionPredicate>> {
        &self.facts
    }

    /// A copy that additionally considers `predicates` relevant for `block`.
    pub fn with_facts<'a>(
        &self,
        block: BlockId,
        predicates: impl IntoIterator<Item = &'a AbstractionPredicate>,
    ) -> Self {
        let mut facts = self.facts.clone();
        for predicate in predicates {
            facts.entry(block).or_default().insert(predicate.clone());
        }
        Self {
            base: self.base.clone(),
            facts,
            cache: RefCell::new(HashMap::new()),
        }
    }
}

impl PartialEq for RefineableRelevantPredicatesComputer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.base, &other.base) && self.facts == other.facts
    }
}

impl RelevantPredicatesComputer for RefineableRelevantPredicatesComputer {
    fn relevant(&self, block: &Block, predicates: &BTreeSet<AbstractionPredicate>) -> BTreeSet<AbstractionPredicate> {
        cached(&self.cache, block, predicates, || {
            let mut relevant = self.base.relevant(block, predicates);
            if let Some(facts) = self.facts.get(&block.id) {
                relevant.extend(predicates.intersection(facts).cloned());
            }
            relevant
        })
    }

    fn as_refineable(&self) -> Option<&RefineableRelevantPredicatesComputer> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::Location;
    use crate::formula::Term;
    use crate::predicates::AbstractionManager;
    use test_log::test;

    fn block(vars: &[&str]) -> Block {
        Block {
            id: BlockId::default(),
            call_nodes: BTreeSet::from([Location::new(1)]),
            return_nodes: BTreeSet::from([Location::new(2)]),
            nodes: BTreeSet::from([Location::new(1), Location::new(2)]),
            referenced_variables: vars.iter().map(|v| Rc::from(*v)).collect(),
        }
    }

    #[test]
    fn test_occurrence() {
        let amgr = AbstractionManager::default();
        let px = amgr.make_predicate(&Term::var("x").eq(0));
        let pxy = amgr.make_predicate(&Term::var("x").lt(Term::var("y")));
        let pz = amgr.make_predicate(&Term::var("z").gt(1));
        let pf = amgr.make_false_predicate();
        let all = BTreeSet::from([px.clone(), pxy.clone(), pz.clone(), pf.clone()]);

        let computer = OccurrenceComputer::new();
        let b = block(&["y"]);
        assert_eq!(computer.relevant(&b, &all), BTreeSet::from([pxy, pf]));
        assert_eq!(computer.irrelevant(&b, &all), BTreeSet::from([px, pz]));
    }

    #[test]
    fn test_auxiliary_closure() {
        let amgr = AbstractionManager::default();
        let px = amgr.make_predicate(&Term::var("x").eq(0));
        let pxy = amgr.make_predicate(&Term::var("x").lt(Term::var("y")));
        let pz = amgr.make_predicate(&Term::var("z").gt(1));
        let all = BTreeSet::from([px.clone(), pxy.clone(), pz]);

        let computer = AuxiliaryComputer::new();
        assert_eq!(computer.relevant(&block(&["y"]), &all), BTreeSet::from([px, pxy]));
    }

    #[test]
    fn test_refineable_facts() {
        let amgr = AbstractionManager::default();
        let px = amgr.make_predicate(&Term::var("x").eq(0));
        let all = BTreeSet::from([px.clone()]);
        let b = block(&["y"]);

        let base: Rc<dyn RelevantPredicatesComputer> = Rc::new(OccurrenceComputer::new());
        let computer = RefineableRelevantPredicatesComputer::new(base);
        assert!(computer.relevant(&b, &all).is_empty());

        let refined = computer.with_facts(b.id, [&px]);
        assert!(refined != computer);
        assert_eq!(refined.relevant(&b, &all), all);
        assert!(refined.with_facts(b.id, [&px]) == refined);
        assert!(refined.as_refineable().is_some());
    }
}
