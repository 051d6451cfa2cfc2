//! Predicate precisions and their block-reduced views.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use log::warn;

use crate::blocks::Block;
use crate::cfa::Location;
use crate::predicates::AbstractionPredicate;
use crate::relevant::RelevantPredicatesComputer;

pub type PredicateSet = BTreeSet<AbstractionPredicate>;

/// The predicates used to compute abstractions, per location instance,
/// per location, and globally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PredicatePrecision {
    location_instance: BTreeMap<(Location, u32), PredicateSet>,
    local: BTreeMap<Location, PredicateSet>,
    global: PredicateSet,
}

impl PredicatePrecision {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.location_instance.values().all(|s| s.is_empty())
            && self.local.values().all(|s| s.is_empty())
            && self.global.is_empty()
    }

    /// Predicates for the `instance`-th abstraction at `loc`.
    pub fn predicates(&self, loc: Location, instance: u32) -> PredicateSet {
        let mut result = self.global.clone();
        if let Some(preds) = self.local.get(&loc) {
            result.extend(preds.iter().cloned());
        }
        if let Some(preds) = self.location_instance.get(&(loc, instance)) {
            result.extend(preds.iter().cloned());
        }
        result
    }

    /// Union of everything the precision mentions for `loc`, over all instances.
    pub fn predicates_at(&self, loc: Location) -> PredicateSet {
        let mut result = self.predicates(loc, 0);
        for (_, preds) in self.location_instance.range((loc, 0)..=(loc, u32::MAX)) {
            result.extend(preds.iter().cloned());
        }
        result
    }

    pub fn location_instance_predicates(&self) -> &BTreeMap<(Location, u32), PredicateSet> {
        &self.location_instance
    }

    pub fn local_predicates(&self) -> &BTreeMap<Location, PredicateSet> {
        &self.local
    }

    pub fn global_predicates(&self) -> &PredicateSet {
        &self.global
    }

    pub fn add_location_instance<'a>(
        &mut self,
        loc: Location,
        instance: u32,
        preds: impl IntoIterator<Item = &'a AbstractionPredicate>,
    ) {
        self.location_instance
            .entry((loc, instance))
            .or_default()
            .extend(preds.into_iter().cloned());
    }

    pub fn add_local<'a>(&mut self, loc: Location, preds: impl IntoIterator<Item = &'a AbstractionPredicate>) {
        self.local.entry(loc).or_default().extend(preds.into_iter().cloned());
    }

    pub fn add_global<'a>(&mut self, preds: impl IntoIterator<Item = &'a AbstractionPredicate>) {
        self.global.extend(preds.into_iter().cloned());
    }

    /// Union of both precisions.
    pub fn merge(&self, other: &PredicatePrecision) -> PredicatePrecision {
        let mut result = self.clone();
        for (&(loc, inst), preds) in &other.location_instance {
            result.add_location_instance(loc, inst, preds);
        }
        for (&loc, preds) in &other.local {
            result.add_local(loc, preds);
        }
        result.add_global(&other.global);
        result
    }

    /// Number of predicates in `self` that `other` lacks at the same key.
    pub fn difference(&self, other: &PredicatePrecision) -> usize {
        fn missing<K: Ord>(a: &BTreeMap<K, PredicateSet>, b: &BTreeMap<K, PredicateSet>) -> usize {
            a.iter()
                .map(|(k, preds)| match b.get(k) {
                    Some(other) => preds.difference(other).count(),
                    None => preds.len(),
                })
                .sum()
        }
        missing(&self.location_instance, &other.location_instance)
            + missing(&self.local, &other.local)
            + self.global.difference(&other.global).count()
    }

    pub fn size(&self) -> usize {
        self.location_instance.values().map(|s| s.len()).sum::<usize>()
            + self.local.values().map(|s| s.len()).sum::<usize>()
            + self.global.len()
    }
}

impl Display for PredicatePrecision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "global: {:?}", self.global)?;
        for (loc, preds) in &self.local {
            write!(f, "; {}: {:?}", loc, preds)?;
        }
        for ((loc, inst), preds) in &self.location_instance {
            write!(f, "; {}#{}: {:?}", loc, inst, preds)?;
        }
        Ok(())
    }
}

/// Precision restricted to the predicates relevant inside a block.
///
/// Keeps a link to the precision it was reduced from so that expansion can
/// recover the caller-level predicates.
#[derive(Debug)]
pub struct ReducedPrecision {
    root: Rc<PredicatePrecision>,
    block: Rc<Block>,
    view: PredicatePrecision,
    computer: Rc<dyn RelevantPredicatesComputer>,
}

impl ReducedPrecision {
    pub(crate) fn new(
        root: Rc<PredicatePrecision>,
        block: Rc<Block>,
        computer: Rc<dyn RelevantPredicatesComputer>,
    ) -> Self {
        let mut view = PredicatePrecision::empty();
        for (&(loc, inst), preds) in &root.location_instance {
            if block.contains(loc) {
                view.add_location_instance(loc, inst, &computer.relevant(&block, preds));
            }
        }
        for (&loc, preds) in &root.local {
            if block.contains(loc) {
                view.add_local(loc, &computer.relevant(&block, preds));
            }
        }
        view.add_global(&computer.relevant(&block, &root.global));
        Self {
            root,
            block,
            view,
            computer,
        }
    }

    pub fn root(&self) -> &Rc<PredicatePrecision> {
        &self.root
    }

    pub fn block(&self) -> &Rc<Block> {
        &self.block
    }

    pub fn view(&self) -> &PredicatePrecision {
        &self.view
    }

    pub fn predicates(&self, loc: Location, instance: u32) -> PredicateSet {
        if !self.block.contains(loc) {
            warn!(
                "Block {} was left in an unexpected way at {}. Analysis might be unsound.",
                self.block, loc
            );
            return self.computer.relevant(&self.block, &self.root.predicates(loc, instance));
        }
        self.view.predicates(loc, instance)
    }
}

/// The precision attached to a reached state.
#[derive(Debug, Clone)]
pub enum Precision {
    Full(Rc<PredicatePrecision>),
    Reduced(Rc<ReducedPrecision>),
}

impl Precision {
    pub fn empty() -> Self {
        Precision::Full(Rc::new(PredicatePrecision::empty()))
    }

    pub fn predicates(&self, loc: Location, instance: u32) -> PredicateSet {
        match self {
            Precision::Full(p) => p.predicates(loc, instance),
            Precision::Reduced(r) => r.predicates(loc, instance),
        }
    }

    /// The precision as seen by the states it is attached to.
    pub fn effective(&self) -> &PredicatePrecision {
        match self {
            Precision::Full(p) => p,
            Precision::Reduced(r) => r.view(),
        }
    }

    /// The unreduced precision at the outermost level.
    pub fn root(&self) -> &Rc<PredicatePrecision> {
        match self {
            Precision::Full(p) => p,
            Precision::Reduced(r) => r.root(),
        }
    }

    pub fn is_same(&self, other: &Precision) -> bool {
        match (self, other) {
            (Precision::Full(a), Precision::Full(b)) => Rc::ptr_eq(a, b),
            (Precision::Reduced(a), Precision::Reduced(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<PredicatePrecision> for Precision {
    fn from(p: PredicatePrecision) -> Self {
        Precision::Full(Rc::new(p))
    }
}

impl PartialEq for Precision {
    fn eq(&self, other: &Self) -> bool {
        self.effective() == other.effective()
    }
}

impl Eq for Precision {}

impl Hash for Precision {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.effective().hash(state);
    }
}
