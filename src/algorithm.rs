//! Reachability analysis driving the abstraction and the refinement loop.
//!
//! [`CpaAlgorithm`] explores the ARG from a waitlist until it reaches an error
//! state or runs out of work. [`CegarAlgorithm`] alternates exploration and
//! refinement until the program is proved safe, a feasible counterexample is
//! found or the refinement budget is exhausted. [`Analysis`] wires all
//! components together from an [`AnalysisConfig`].
//!
//! With block summarization, the state at the call node of a function block
//! is reduced to what the block can observe and explored with the reduced
//! precision. At the block's return node the result is expanded again with
//! the state and precision the block was entered from.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use log::{debug, info, trace};

use crate::arg::StateId;
use crate::block_operator::BlockOperator;
use crate::blocks::{BlockId, BlockPartitioning};
use crate::cfa::{Cfa, CfaEdge, EdgeKind};
use crate::config::{AlgorithmOptions, AnalysisConfig, RelevanceKind};
use crate::engine::AbstractionEngine;
use crate::error::{Error, Result};
use crate::interpolation::InterpolationManager;
use crate::pathformula::{PathFormulaManager, SsaPathFormulaManager};
use crate::precision::{Precision, PredicatePrecision};
use crate::precision_adjustment::{AdjustmentResult, PrecisionAdjustment};
use crate::predicates::AbstractionManager;
use crate::reached::{same_context, BlockContext, ReachedSet};
use crate::reducer::PredicateReducer;
use crate::refiner::{Counterexample, CounterexampleOutcome, PredicateRefiner};
use crate::relevant::{
    AuxiliaryComputer, OccurrenceComputer, RefineableRelevantPredicatesComputer, RelevantPredicatesComputer,
};
use crate::shutdown::ShutdownNotifier;
use crate::solver::EnumerativeSolver;
use crate::state::{PredicateAbstractState, StateKind};
use crate::stats::Statistics;
use crate::transfer::{Successor, TransferRelation};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunResult {
    /// The waitlist is empty.
    Finished,
    TargetReached(StateId),
}

#[derive(Debug)]
struct BlockSummarization {
    reducer: Rc<PredicateReducer>,
    partitioning: Rc<BlockPartitioning>,
    /// Hashes of the reduced states and precisions blocks were entered with.
    entries: RefCell<HashSet<(BlockId, u64)>>,
}

#[derive(Debug)]
pub struct CpaAlgorithm {
    transfer: TransferRelation,
    adjustment: PrecisionAdjustment,
    engine: Rc<AbstractionEngine>,
    options: AlgorithmOptions,
    shutdown: ShutdownNotifier,
    summarization: Option<BlockSummarization>,
}

impl CpaAlgorithm {
    pub fn new(
        transfer: TransferRelation,
        engine: Rc<AbstractionEngine>,
        options: AlgorithmOptions,
        shutdown: ShutdownNotifier,
    ) -> Self {
        Self {
            transfer,
            adjustment: PrecisionAdjustment::new(engine.clone()),
            engine,
            options,
            shutdown,
            summarization: None,
        }
    }

    /// Reduces states and precisions to the blocks of `partitioning` while
    /// exploring them.
    pub fn with_block_summarization(mut self, reducer: Rc<PredicateReducer>, partitioning: Rc<BlockPartitioning>) -> Self {
        self.transfer = self.transfer.with_block_partitioning(partitioning.clone());
        self.summarization = Some(BlockSummarization {
            reducer,
            partitioning,
            entries: RefCell::new(HashSet::new()),
        });
        self
    }

    pub fn cfa(&self) -> &Rc<Cfa> {
        self.transfer.cfa()
    }

    /// Reached set containing only the program entry with abstraction `true`.
    pub fn initial_reached_set(&self, precision: Precision) -> ReachedSet {
        let pfmgr = self.engine.path_formula_manager();
        let empty = pfmgr.make_empty();
        let state = PredicateAbstractState::abstraction_state(
            empty.clone(),
            self.engine.make_true_abstraction(&empty),
            Default::default(),
        );
        ReachedSet::new(self.cfa().entry(), state, precision)
    }

    /// Explores states from the waitlist. Returns as soon as an error state
    /// has been added, after all successors of its parent are in.
    pub fn run(&self, reached: &mut ReachedSet) -> Result<RunResult> {
        while let Some(id) = reached.pop() {
            self.shutdown.check()?;
            let state = reached.arg().state(id)?;
            if state.is_covered() {
                trace!("Skipping covered state {}", id);
                continue;
            }
            let location = state.location();
            let callstack = state.callstack().clone();
            let predicate_state = state.predicate_state().clone();
            let context = reached.context(id).cloned();
            let precision = self.precision_in_context(reached, id, context.as_ref())?;

            let mut target = None;
            for successor in self.transfer.successors(location, &callstack, &predicate_state)? {
                let state = match self.adjustment.compute_abstraction_if_needed(&successor.state, &precision)? {
                    AdjustmentResult::Continue(state) => state,
                    AdjustmentResult::Bottom => {
                        trace!("Successor of {} along {} is infeasible", id, successor.edge);
                        continue;
                    }
                };
                let (state, precision, context) = match &self.summarization {
                    Some(summarization) => {
                        summarization.apply(&successor.edge, state, &precision, context.as_ref(), self.engine.stats())?
                    }
                    None => (state, precision.clone(), None),
                };
                if self.options.merge_non_abstraction_states && state.kind() == StateKind::NonAbstraction {
                    if let Some(merged) = self.merge_into_waiting(reached, id, &successor, &state, context.as_ref())? {
                        trace!("Merged successor of {} into {}", id, merged);
                        continue;
                    }
                }

                let is_target = self.cfa().is_error_location(successor.edge.target);
                let child = reached
                    .arg_mut()
                    .add_child(id, successor.edge, successor.callstack, state)?;
                reached.set_context(child, context);
                if let Some(covering) = self.find_covering_state(reached, child)? {
                    reached.arg_mut().cover(child, covering)?;
                    reached.add_without_waiting(child, precision);
                    continue;
                }
                reached.add(child, precision);
                if is_target {
                    debug!("Reached error state {}", child);
                    target = Some(child);
                }
            }
            if let Some(target) = target {
                return Ok(RunResult::TargetReached(target));
            }
        }
        Ok(RunResult::Finished)
    }

    /// Precision to explore `id` with. Refinement hands out full precisions,
    /// which are reduced again for states inside a summarized block.
    fn precision_in_context(
        &self,
        reached: &mut ReachedSet,
        id: StateId,
        context: Option<&Rc<BlockContext>>,
    ) -> Result<Precision> {
        let precision = reached.precision(id)?.clone();
        let (Some(summarization), Some(context), Precision::Full(_)) = (&self.summarization, context, &precision)
        else {
            return Ok(precision);
        };
        let reduced = Precision::Reduced(summarization.reducer.reduce_precision(&precision, &context.block));
        trace!("Reduced precision of {} to {}", id, context.block);
        reached.set_precision(id, reduced.clone());
        Ok(reduced)
    }

    /// Joins `state` into a waiting non-abstraction state in the same block
    /// at the same location and callstack.
    fn merge_into_waiting(
        &self,
        reached: &mut ReachedSet,
        parent: StateId,
        successor: &Successor,
        state: &PredicateAbstractState,
        context: Option<&Rc<BlockContext>>,
    ) -> Result<Option<StateId>> {
        let candidate = reached
            .states_at(successor.edge.target, &successor.callstack)
            .filter(|&other| reached.is_waiting(other))
            .filter(|&other| same_context(reached.context(other), context))
            .find(|&other| {
                reached.arg().state(other).is_ok_and(|s| {
                    let existing = s.predicate_state();
                    existing.kind() == StateKind::NonAbstraction
                        && existing.abstraction().id() == state.abstraction().id()
                        && existing.abstraction_locations() == state.abstraction_locations()
                })
            });
        let Some(existing) = candidate else {
            return Ok(None);
        };

        let pfmgr = self.engine.path_formula_manager();
        let old = reached.arg().state(existing)?.predicate_state();
        let path_formula = pfmgr.make_or(old.path_formula(), state.path_formula());
        let merged = PredicateAbstractState::non_abstraction_state(
            path_formula,
            old.abstraction().clone(),
            old.abstraction_locations().clone(),
        );
        reached.arg_mut().state_mut(existing)?.set_predicate_state(merged);
        reached.arg_mut().add_edge(parent, existing, successor.edge.clone())?;
        Ok(Some(existing))
    }

    /// An uncovered abstraction state at the same location and callstack
    /// whose abstraction is implied by the one of `id`.
    fn find_covering_state(&self, reached: &ReachedSet, id: StateId) -> Result<Option<StateId>> {
        let arg = reached.arg();
        let state = arg.state(id)?;
        if !state.predicate_state().is_abstraction_state() {
            return Ok(None);
        }
        let abstraction = state.predicate_state().abstraction();
        for other in reached.states_at(state.location(), state.callstack()) {
            if other == id || !same_context(reached.context(id), reached.context(other)) {
                continue;
            }
            let candidate = arg.state(other)?;
            if candidate.is_covered() || !candidate.predicate_state().is_abstraction_state() {
                continue;
            }
            if self.engine.check_coverage(abstraction, candidate.predicate_state().abstraction()) {
                return Ok(Some(other));
            }
        }
        Ok(None)
    }
}

impl BlockSummarization {
    /// Enters a block on a call into its call node and leaves the innermost
    /// block at its return node. Returns the state, precision and context of
    /// the successor.
    fn apply(
        &self,
        edge: &CfaEdge,
        state: PredicateAbstractState,
        precision: &Precision,
        context: Option<&Rc<BlockContext>>,
        stats: &Statistics,
    ) -> Result<(PredicateAbstractState, Precision, Option<Rc<BlockContext>>)> {
        let mut state = state;
        let mut precision = precision.clone();
        let mut context = context.cloned();
        if !state.is_abstraction_state() {
            return Ok((state, precision, context));
        }

        let main = self.partitioning.main_block().id;
        if let EdgeKind::Call { .. } = &edge.kind {
            if let Some(block) = self.partitioning.block_for_call_node(edge.target).filter(|b| b.id != main) {
                let reduced = self.reducer.reduce_state(&state, block)?;
                let reduced_precision = Precision::Reduced(self.reducer.reduce_precision(&precision, block));
                stats.reducer.block_entries.inc();
                let hash = self.reducer.hash_for_state(&reduced, &reduced_precision);
                if !self.entries.borrow_mut().insert((block.id, hash)) {
                    debug!("Entering {} again with the same reduced state", block);
                    stats.reducer.repeated_block_entries.inc();
                }
                let entered = BlockContext {
                    block: block.clone(),
                    root: state,
                    root_precision: precision,
                    outer: context,
                };
                trace!("Entered {} at depth {}", block, entered.depth());
                context = Some(Rc::new(entered));
                state = reduced;
                precision = reduced_precision;
            }
        }

        if let Some(inner) = context.clone().filter(|c| c.block.is_return_node(edge.target)) {
            let reducer = &self.reducer;
            let expanded = reducer.expand_state(&inner.root, &inner.block, &state)?;
            let reduced = reducer.reduce_precision(&precision, &inner.block);
            let outer = inner.outer.as_ref().map(|o| &o.block);
            let expanded_precision = reducer.expand_precision(&inner.root_precision, outer, &reduced);
            let gained = reducer.measure_precision_difference(&expanded_precision, &inner.root_precision);
            if gained > 0 {
                debug!("Leaving {} with {} new predicates for the caller", inner.block, gained);
                stats.reducer.precision_growth.add(gained);
            }
            state = expanded;
            precision = expanded_precision;
            context = inner.outer.clone();
        }
        Ok((state, precision, context))
    }
}

#[derive(Debug)]
pub enum Verdict {
    Safe,
    Unsafe(Counterexample),
    Unknown(String),
    Interrupted,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Safe => write!(f, "SAFE"),
            Verdict::Unsafe(cex) => write!(f, "UNSAFE, error path {}", cex.path),
            Verdict::Unknown(reason) => write!(f, "UNKNOWN ({})", reason),
            Verdict::Interrupted => write!(f, "INTERRUPTED"),
        }
    }
}

#[derive(Debug)]
pub struct CegarAlgorithm {
    cpa: CpaAlgorithm,
    refiner: PredicateRefiner,
    max_refinements: usize,
}

impl CegarAlgorithm {
    pub fn new(cpa: CpaAlgorithm, refiner: PredicateRefiner, max_refinements: usize) -> Self {
        Self {
            cpa,
            refiner,
            max_refinements,
        }
    }

    pub fn cpa(&self) -> &CpaAlgorithm {
        &self.cpa
    }

    pub fn run(&mut self, reached: &mut ReachedSet) -> Result<Verdict> {
        let mut refinements = 0;
        loop {
            let target = match self.cpa.run(reached) {
                Ok(RunResult::Finished) => {
                    info!("No error state reachable after {} refinements", refinements);
                    return Ok(Verdict::Safe);
                }
                Ok(RunResult::TargetReached(target)) => target,
                Err(Error::Interrupted) => return Ok(Verdict::Interrupted),
                Err(e) => return Err(e),
            };
            if refinements == self.max_refinements {
                return Ok(Verdict::Unknown(format!(
                    "gave up after {} refinements",
                    self.max_refinements
                )));
            }
            refinements += 1;

            let path = reached.arg().path_to(target)?;
            info!("Refinement {} for error path {}", refinements, path);
            match self.refiner.perform_refinement(reached, &path) {
                CounterexampleOutcome::Spurious => {}
                CounterexampleOutcome::Feasible(cex) => return Ok(Verdict::Unsafe(cex)),
                CounterexampleOutcome::Interrupted => return Ok(Verdict::Interrupted),
                CounterexampleOutcome::Fatal(e) => return Err(e),
            }
        }
    }
}

/// All components of one analysis run.
#[derive(Debug)]
pub struct Analysis {
    config: AnalysisConfig,
    stats: Rc<Statistics>,
    shutdown: ShutdownNotifier,
    engine: Rc<AbstractionEngine>,
    reducer: Option<Rc<PredicateReducer>>,
    cegar: CegarAlgorithm,
}

impl Analysis {
    pub fn new(cfa: Rc<Cfa>, config: AnalysisConfig) -> Result<Self> {
        let stats = Rc::new(Statistics::default());
        let shutdown = ShutdownNotifier::new();
        let solver = Rc::new(EnumerativeSolver::new(
            config.solver.clone(),
            shutdown.clone(),
            stats.clone(),
        ));
        let pfmgr: Rc<dyn PathFormulaManager> = Rc::new(SsaPathFormulaManager::new());
        let engine = Rc::new(AbstractionEngine::new(
            Rc::new(AbstractionManager::default()),
            solver.clone(),
            pfmgr,
            config.abstraction.clone(),
            stats.clone(),
        ));

        let block_operator = BlockOperator::new(cfa.clone(), config.blocks.clone(), stats.clone());
        let transfer = TransferRelation::new(
            cfa.clone(),
            engine.clone(),
            block_operator,
            config.abstraction.target_state_sat_check,
        );
        let mut cpa = CpaAlgorithm::new(transfer, engine.clone(), config.algorithm.clone(), shutdown.clone());

        let interpolation = InterpolationManager::new(
            solver.clone(),
            solver,
            config.refinement.verify_interpolants,
            stats.clone(),
        );
        let mut refiner = PredicateRefiner::new(
            engine.clone(),
            interpolation,
            config.refinement.clone(),
            shutdown.clone(),
        );

        let mut reducer = None;
        if config.algorithm.block_summarization {
            let partitioning = Rc::new(BlockPartitioning::by_functions(&cfa));
            let r = Rc::new(PredicateReducer::new(engine.clone(), relevant_computer(&config)));
            refiner = refiner.with_reducer(r.clone(), partitioning.clone())?;
            cpa = cpa.with_block_summarization(r.clone(), partitioning);
            reducer = Some(r);
        }

        let cegar = CegarAlgorithm::new(cpa, refiner, config.algorithm.max_refinements);
        Ok(Self {
            config,
            stats,
            shutdown,
            engine,
            reducer,
            cegar,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn stats(&self) -> &Rc<Statistics> {
        &self.stats
    }

    pub fn shutdown_notifier(&self) -> &ShutdownNotifier {
        &self.shutdown
    }

    pub fn engine(&self) -> &Rc<AbstractionEngine> {
        &self.engine
    }

    pub fn reducer(&self) -> Option<&Rc<PredicateReducer>> {
        self.reducer.as_ref()
    }

    pub fn initial_reached_set(&self, precision: PredicatePrecision) -> ReachedSet {
        self.cegar.cpa().initial_reached_set(Precision::from(precision))
    }

    pub fn run(&mut self, reached: &mut ReachedSet) -> Result<Verdict> {
        let verdict = self.cegar.run(reached)?;
        info!("Verification result: {}", verdict);
        Ok(verdict)
    }
}

fn relevant_computer(config: &AnalysisConfig) -> Rc<dyn RelevantPredicatesComputer> {
    let base: Rc<dyn RelevantPredicatesComputer> = match config.refinement.relevance {
        RelevanceKind::Occurrence => Rc::new(OccurrenceComputer::new()),
        RelevanceKind::Auxiliary => Rc::new(AuxiliaryComputer::new()),
    };
    if config.refinement.refineable_relevance {
        Rc::new(RefineableRelevantPredicatesComputer::new(base))
    } else {
        base
    }
}
