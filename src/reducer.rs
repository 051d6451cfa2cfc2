//! Reduction and expansion of states and precisions at block boundaries.
//!
//! When the analysis enters a block, the state at the block entry is reduced
//! to the predicates the block can observe; when it leaves, the summary is
//! expanded again with the caller's knowledge about everything that was
//! quantified away. Precisions undergo the same projection, and reduced
//! precisions are memoized so that the same (precision, block) pair always
//! yields the same object.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use log::{debug, trace};

use crate::blocks::{Block, BlockId};
use crate::engine::AbstractionEngine;
use crate::error::{Error, Result};
use crate::precision::{Precision, PredicatePrecision, ReducedPrecision};
use crate::relevant::RelevantPredicatesComputer;
use crate::state::PredicateAbstractState;

type PrecisionKey = (*const PredicatePrecision, BlockId);

pub struct PredicateReducer {
    engine: Rc<AbstractionEngine>,
    computer: RefCell<Rc<dyn RelevantPredicatesComputer>>,
    // Values keep their root alive, so the pointer in the key stays valid.
    precision_cache: RefCell<HashMap<PrecisionKey, Rc<ReducedPrecision>>>,
}

impl PredicateReducer {
    pub fn new(engine: Rc<AbstractionEngine>, computer: Rc<dyn RelevantPredicatesComputer>) -> Self {
        Self {
            engine,
            computer: RefCell::new(computer),
            precision_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Rc<AbstractionEngine> {
        &self.engine
    }

    pub fn relevant_computer(&self) -> Rc<dyn RelevantPredicatesComputer> {
        self.computer.borrow().clone()
    }

    /// Installs a new relevance policy; cached reductions are dropped.
    pub fn set_relevant_computer(&self, computer: Rc<dyn RelevantPredicatesComputer>) {
        *self.computer.borrow_mut() = computer;
        self.clear_caches();
    }

    pub fn clear_caches(&self) {
        self.precision_cache.borrow_mut().clear();
    }

    pub fn reduce_state(&self, state: &PredicateAbstractState, block: &Block) -> Result<PredicateAbstractState> {
        if !state.is_abstraction_state() {
            return Ok(state.clone());
        }
        if !state.path_formula().is_trivial() {
            return Err(Error::inconsistent(format!(
                "abstraction state entering {} has pending path formula {}",
                block,
                state.path_formula()
            )));
        }
        let stats = &self.engine.stats().reducer;
        stats.reduce_calls.inc();
        let _timer = stats.reduce_time.start();

        let old = state.abstraction();
        let predicates = self.engine.extract_predicates_from_region(old.region());
        let remove = self.computer.borrow().irrelevant(block, &predicates);
        trace!("Reducing {} to {}: removing {:?}", old, block, remove);
        let reduced = self.engine.reduce(old, &remove, old.block_formula().ssa());
        debug!("Reduced {} to {}", old, reduced);
        Ok(PredicateAbstractState::abstraction_state(
            state.path_formula().clone(),
            reduced,
            state.abstraction_locations().clone(),
        ))
    }

    /// Expands the summary `reduced` of `block` in the context of `root`, the
    /// state from which the block was entered.
    pub fn expand_state(
        &self,
        root: &PredicateAbstractState,
        block: &Block,
        reduced: &PredicateAbstractState,
    ) -> Result<PredicateAbstractState> {
        if !reduced.is_abstraction_state() {
            return Ok(reduced.clone());
        }
        if !root.is_abstraction_state() {
            return Err(Error::inconsistent(format!("root of {} is not an abstraction state", block)));
        }
        let stats = &self.engine.stats().reducer;
        stats.expand_calls.inc();
        let _timer = stats.expand_time.start();

        let root_abstraction = root.abstraction();
        let reduced_abstraction = reduced.abstraction();
        let predicates = self.engine.extract_predicates_from_region(root_abstraction.region());
        let relevant = self.computer.borrow().relevant(block, &predicates);

        // Variables untouched by the block keep the caller's index.
        let mut ssa = reduced_abstraction.block_formula().ssa().clone();
        for (name, index) in root_abstraction.block_formula().ssa().iter() {
            if !ssa.contains(name) {
                ssa.set(name.clone(), index);
            }
        }

        let expanded = self.engine.expand(reduced_abstraction, root_abstraction, &relevant, &ssa);
        debug!("Expanded {} with {} to {}", reduced_abstraction, root_abstraction, expanded);
        let pfmgr = self.engine.path_formula_manager();
        let path_formula = pfmgr.make_empty_with(expanded.block_formula());
        Ok(PredicateAbstractState::abstraction_state(
            path_formula,
            expanded,
            reduced.abstraction_locations().clone(),
        ))
    }

    /// Restriction of `precision` to `block`; reducing an already reduced
    /// precision starts again from its root.
    pub fn reduce_precision(&self, precision: &Precision, block: &Rc<Block>) -> Rc<ReducedPrecision> {
        let stats = &self.engine.stats().reducer;
        stats.precision_reduce_calls.inc();
        let root = precision.root();
        let key = (Rc::as_ptr(root), block.id);
        if let Some(reduced) = self.precision_cache.borrow().get(&key) {
            stats.precision_cache_hits.inc();
            return reduced.clone();
        }
        let reduced = Rc::new(ReducedPrecision::new(
            root.clone(),
            block.clone(),
            self.relevant_computer(),
        ));
        self.precision_cache.borrow_mut().insert(key, reduced.clone());
        reduced
    }

    /// Precision of the caller after `reduced` was used inside a block.
    ///
    /// `root_context` is the block the caller itself lives in, if any; the
    /// merged precision is reduced to it again.
    pub fn expand_precision(
        &self,
        root_precision: &Precision,
        root_context: Option<&Rc<Block>>,
        reduced: &Rc<ReducedPrecision>,
    ) -> Precision {
        let stats = &self.engine.stats().reducer;
        stats.precision_expand_calls.inc();
        let root = root_precision.root();
        if Rc::ptr_eq(root, reduced.root()) || **root == **reduced.root() {
            stats.precision_fast_path.inc();
            return root_precision.clone();
        }
        let merged = Precision::Full(Rc::new(root.merge(reduced.root())));
        match root_context {
            Some(block) => Precision::Reduced(self.reduce_precision(&merged, block)),
            None => merged,
        }
    }

    /// Hash consistent with the reduced view of `precision`.
    pub fn hash_for_state(&self, state: &PredicateAbstractState, precision: &Precision) -> u64 {
        let mut hasher = DefaultHasher::new();
        state.abstraction().region().hash(&mut hasher);
        precision.hash(&mut hasher);
        hasher.finish()
    }

    /// Number of predicates of `precision` missing from `other`.
    pub fn measure_precision_difference(&self, precision: &Precision, other: &Precision) -> usize {
        precision.effective().difference(other.effective())
    }
}

impl Debug for PredicateReducer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateReducer")
            .field("computer", &self.computer.borrow())
            .field("cached_precisions", &self.precision_cache.borrow().len())
            .finish()
    }
}
