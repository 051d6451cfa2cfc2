//! Counterexample-guided refinement of the predicate precision.
//!
//! When the analysis reaches an error location, [`PredicateRefiner`] collects
//! the block formulas along the path to it and asks the interpolating prover
//! whether the path is feasible. A feasible path is returned as a
//! [`Counterexample`]. A spurious path yields interpolants, whose atoms become
//! new predicates; the ARG is then cut back to the first state where something
//! was learned and explored again with the refined precision.
//!
//! A counterexample that comes back with nothing new to learn is tolerated
//! once. The second time in a row, the refiner widens the set of predicates
//! the reducer keeps for the blocks on the path. If that changes nothing
//! either, refinement fails with [`RefinementFailure::RepeatedCounterexample`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

use log::{debug, info, trace, warn};

use crate::arg::{Arg, ArgPath, StateId};
use crate::blocks::{BlockId, BlockPartitioning};
use crate::cfa::{EdgeKind, Location};
use crate::config::{
    PathStrategy, PredicateSharing, RefinementOptions, RefinementStrategyKind, RepeatedCounterexampleCheck,
};
use crate::engine::AbstractionEngine;
use crate::error::{Error, RefinementFailure, Result};
use crate::formula::Formula;
use crate::impact::ImpactStrategy;
use crate::interpolation::{CounterexampleTraceInfo, InterpolationManager};
use crate::pathformula::{branching_symbol, update_indices_after_return, PathFormula};
use crate::precision::{Precision, PredicatePrecision, PredicateSet};
use crate::reached::ReachedSet;
use crate::reducer::PredicateReducer;
use crate::shutdown::ShutdownNotifier;
use crate::solver::Model;

/// A feasible error path.
#[derive(Debug, Clone)]
pub struct Counterexample {
    pub path: ArgPath,
    pub model: Model,
    /// `false` if the ARG branches below the path and the model might
    /// describe a different path to the same error state.
    pub precise: bool,
}

#[derive(Debug)]
pub enum CounterexampleOutcome {
    /// The path was infeasible and the ARG has been refined.
    Spurious,
    Feasible(Counterexample),
    Interrupted,
    Fatal(Error),
}

impl CounterexampleOutcome {
    pub fn is_spurious(&self) -> bool {
        matches!(self, CounterexampleOutcome::Spurious)
    }
}

/// An abstraction state on the error path with the predicates of its interpolant.
#[derive(Debug)]
struct InterpolationPoint {
    state: StateId,
    location: Location,
    instance: u32,
    interpolant: Formula,
    predicates: PredicateSet,
}

pub struct PredicateRefiner {
    engine: Rc<AbstractionEngine>,
    interpolation: InterpolationManager,
    options: RefinementOptions,
    shutdown: ShutdownNotifier,
    impact: Option<ImpactStrategy>,
    blocks: Option<(Rc<PredicateReducer>, Rc<BlockPartitioning>)>,
    last_formulas: Option<Vec<Formula>>,
    last_locations: Option<Vec<Location>>,
    repeated_once: bool,
}

impl PredicateRefiner {
    pub fn new(
        engine: Rc<AbstractionEngine>,
        interpolation: InterpolationManager,
        options: RefinementOptions,
        shutdown: ShutdownNotifier,
    ) -> Self {
        let impact = match options.strategy {
            RefinementStrategyKind::Lazy => None,
            RefinementStrategyKind::Impact => Some(ImpactStrategy::new(engine.clone())),
        };
        Self {
            engine,
            interpolation,
            options,
            shutdown,
            impact,
            blocks: None,
            last_formulas: None,
            last_locations: None,
            repeated_once: false,
        }
    }

    /// Enables refinement of the reducer's relevance policy on repeated
    /// counterexamples.
    pub fn with_reducer(mut self, reducer: Rc<PredicateReducer>, partitioning: Rc<BlockPartitioning>) -> Result<Self> {
        if self.impact.is_some() {
            return Err(Error::Configuration(
                "impact refinement cannot be combined with block summarization".into(),
            ));
        }
        if self.options.path_strategy != PathStrategy::Rederive {
            return Err(Error::Configuration(
                "block summarization requires the rederive path strategy".into(),
            ));
        }
        self.blocks = Some((reducer, partitioning));
        Ok(self)
    }

    pub fn options(&self) -> &RefinementOptions {
        &self.options
    }

    /// Analyzes the error path ending in `path.last()`.
    ///
    /// A spurious path leaves `reached` refined and ready for further
    /// exploration.
    pub fn perform_refinement(&mut self, reached: &mut ReachedSet, path: &ArgPath) -> CounterexampleOutcome {
        let stats = self.engine.stats().clone();
        stats.refinement.refinements.inc();
        let _timer = stats.refinement.total_time.start();
        match self.refine(reached, path) {
            Ok(outcome) => outcome,
            Err(Error::Interrupted) => {
                info!("Refinement interrupted");
                CounterexampleOutcome::Interrupted
            }
            Err(e) => CounterexampleOutcome::Fatal(e),
        }
    }

    fn refine(&mut self, reached: &mut ReachedSet, path: &ArgPath) -> Result<CounterexampleOutcome> {
        let stats = self.engine.stats().clone();
        debug!("Starting interpolation-based refinement");

        let abstraction_path = abstraction_states(reached.arg(), path)?;
        let formulas = {
            let _timer = stats.refinement.path_time.start();
            match self.options.path_strategy {
                PathStrategy::Direct => block_formulas(reached.arg(), &abstraction_path)?,
                PathStrategy::Rederive => self.rederive_block_formulas(reached.arg(), path.last())?,
            }
        };
        if formulas.len() != abstraction_path.len() {
            return Err(Error::inconsistent(format!(
                "{} block formulas for {} abstraction states",
                formulas.len(),
                abstraction_path.len()
            )));
        }
        trace!("Abstraction trace is {:?}", abstraction_path);

        match self.interpolation.build_counterexample_trace(&formulas)? {
            CounterexampleTraceInfo::Spurious { interpolants } => {
                stats.refinement.spurious.inc();
                self.refine_spurious(reached, path, &abstraction_path, formulas, interpolants)
            }
            CounterexampleTraceInfo::Feasible { model } => {
                stats.refinement.feasible.inc();
                let cex = self.analyze_feasible(reached.arg(), path, &formulas, model)?;
                Ok(CounterexampleOutcome::Feasible(cex))
            }
        }
    }

    /// Recomputes the block formulas of all paths to `target` by a
    /// breadth-first traversal of the ARG. Converging paths are joined by
    /// disjunction, and after a function return the caller's variables get
    /// back the indices they had at the call.
    fn rederive_block_formulas(&self, arg: &Arg, target: StateId) -> Result<Vec<Formula>> {
        let pfmgr = self.engine.path_formula_manager();
        let on_path = arg.states_on_paths_to(target)?;
        let root = arg.root();

        // State at the innermost pending call for every finished state.
        let mut call_states: BTreeMap<StateId, Option<StateId>> = BTreeMap::from([(root, None)]);
        let mut finished: BTreeMap<StateId, PathFormula> = BTreeMap::from([(root, pfmgr.make_empty())]);
        let mut formulas = Vec::new();
        let mut waitlist: VecDeque<StateId> = arg
            .state(root)?
            .children()
            .map(|(child, _)| child)
            .filter(|child| on_path.contains(child))
            .collect();

        while let Some(id) = waitlist.pop_front() {
            self.shutdown.check()?;
            if finished.contains_key(&id) {
                continue;
            }
            let state = arg.state(id)?;
            if !state.parents().all(|p| finished.contains_key(&p)) {
                waitlist.push_back(id);
                continue;
            }

            let mut candidates = Vec::new();
            for parent in state.parents() {
                let edge = arg
                    .state(parent)?
                    .edge_to(id)
                    .ok_or_else(|| Error::inconsistent(format!("no edge from {} to {}", parent, id)))?;
                let mut formula = finished[&parent].clone();
                let call_state = match &edge.kind {
                    EdgeKind::Call { .. } => Some(parent),
                    EdgeKind::Return { function, .. } => {
                        let call = call_states[&parent].ok_or_else(|| {
                            Error::inconsistent(format!("return from {} without a pending call", function))
                        })?;
                        let ssa = update_indices_after_return(finished[&call].ssa(), formula.ssa(), function);
                        formula = pfmgr.make_new(&formula, ssa);
                        call_states[&call]
                    }
                    _ => call_states[&parent],
                };
                candidates.push((pfmgr.make_and(&formula, edge)?, call_state));
            }

            let call_state = match candidates.first() {
                Some((_, call_state)) => *call_state,
                None => return Err(Error::inconsistent(format!("state {} has no parent", id))),
            };
            if candidates.iter().any(|(_, c)| *c != call_state) {
                return Err(Error::inconsistent(format!(
                    "state {} is reached from different call states",
                    id
                )));
            }
            call_states.insert(id, call_state);

            let mut joined = candidates.into_iter().map(|(formula, _)| formula);
            let mut formula = joined.next().ok_or_else(|| Error::inconsistent("missing path formula"))?;
            if state.predicate_state().is_abstraction_state() {
                if joined.next().is_some() {
                    return Err(Error::inconsistent(format!(
                        "abstraction state {} has more than one parent",
                        id
                    )));
                }
                formulas.push(formula.formula().clone());
                formula = pfmgr.make_empty_with(&formula);
            } else {
                formula = joined.fold(formula, |acc, f| pfmgr.make_or(&acc, &f));
            }
            finished.insert(id, formula);
            waitlist.extend(
                state
                    .children()
                    .map(|(child, _)| child)
                    .filter(|child| on_path.contains(child)),
            );
        }
        Ok(formulas)
    }

    fn refine_spurious(
        &mut self,
        reached: &mut ReachedSet,
        path: &ArgPath,
        abstraction_path: &[StateId],
        formulas: Vec<Formula>,
        mut interpolants: Vec<Formula>,
    ) -> Result<CounterexampleOutcome> {
        let stats = self.engine.stats().clone();
        // The error state itself is the last point, where nothing holds.
        interpolants.push(Formula::ff());
        if interpolants.len() != abstraction_path.len() {
            return Err(Error::inconsistent(format!(
                "{} interpolants for {} abstraction states",
                interpolants.len() - 1,
                abstraction_path.len()
            )));
        }
        for itp in &interpolants {
            if itp.is_false() {
                break;
            }
            if itp.is_true() {
                stats.refinement.true_interpolants.inc();
            }
        }

        if let Some(impact) = &self.impact {
            let _timer = stats.refinement.arg_update_time.start();
            impact.refine(reached, abstraction_path, &interpolants)?;
            self.last_formulas = Some(formulas);
            return Ok(CounterexampleOutcome::Spurious);
        }

        let target = path.last();
        let old = reached.precision(target)?.root().clone();
        let points = self.interpolation_points(reached.arg(), abstraction_path, interpolants)?;
        let (precision, first_learned) = {
            let _timer = stats.refinement.precision_update_time.start();
            self.update_precision(&old, &points)
        };

        let locations: Vec<Location> = points.iter().map(|p| p.location).collect();
        let same_path = match self.options.repeated_check {
            RepeatedCounterexampleCheck::BlockFormulas => self.last_formulas.as_ref() == Some(&formulas),
            RepeatedCounterexampleCheck::ArgPath => self.last_locations.as_ref() == Some(&locations),
        };
        let repeated = first_learned.is_none() && same_path;
        self.last_formulas = Some(formulas);
        self.last_locations = Some(locations);

        if !repeated {
            self.repeated_once = false;
        } else {
            stats.refinement.repeated_counterexamples.inc();
            if !self.repeated_once {
                info!("Counterexample repeated without new predicates");
                self.repeated_once = true;
            } else if self.refine_relevant_computer(reached.arg(), &points, &old)? {
                info!("Counterexample repeated again, refined the relevant predicates of the blocks on the path");
                self.repeated_once = false;
            } else {
                let location = reached.arg().state(target)?.location();
                let formulas = self
                    .last_formulas
                    .iter()
                    .flatten()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Ok(CounterexampleOutcome::Fatal(Error::RefinementFailed {
                    reason: RefinementFailure::RepeatedCounterexample { location, formulas },
                }));
            }
        }

        let root = match first_learned {
            Some(state) => state,
            None => highest_state_for_first_interpolant(reached.arg(), path, &points)?,
        };
        info!(
            "Refinement root is {}, precision grows from {} to {} predicates",
            root,
            old.size(),
            precision.size()
        );
        let _timer = stats.refinement.arg_update_time.start();
        reached.remove_subtree(root, &Precision::from(precision))?;
        Ok(CounterexampleOutcome::Spurious)
    }

    fn interpolation_points(
        &self,
        arg: &Arg,
        abstraction_path: &[StateId],
        interpolants: Vec<Formula>,
    ) -> Result<Vec<InterpolationPoint>> {
        let mut points = Vec::with_capacity(abstraction_path.len());
        for (&state, interpolant) in abstraction_path.iter().zip(interpolants) {
            let arg_state = arg.state(state)?;
            let location = arg_state.location();
            let instance = arg_state
                .predicate_state()
                .abstraction_locations()
                .get(&location)
                .copied()
                .unwrap_or(0);
            let predicates = if interpolant.is_true() {
                PredicateSet::new()
            } else {
                self.engine
                    .extract_predicates(&interpolant, self.options.split_equalities)
                    .into_iter()
                    .collect()
            };
            points.push(InterpolationPoint {
                state,
                location,
                instance,
                interpolant,
                predicates,
            });
        }
        Ok(points)
    }

    /// Adds the predicates of all points to `old`. Also returns the first
    /// state at which a predicate was not known before.
    fn update_precision(
        &self,
        old: &PredicatePrecision,
        points: &[InterpolationPoint],
    ) -> (PredicatePrecision, Option<StateId>) {
        let stats = &self.engine.stats().refinement;
        let mut precision = old.clone();
        let mut first_learned = None;
        for point in points {
            let known = old.predicates(point.location, point.instance);
            let new = point.predicates.difference(&known).count();
            if new == 0 {
                stats.unchanged_interpolants.inc();
                continue;
            }
            debug!(
                "Learned {} predicates at {} from interpolant {}",
                new, point.location, point.interpolant
            );
            stats.predicates_learned.add(new);
            first_learned.get_or_insert(point.state);
            match self.options.predicate_sharing {
                PredicateSharing::Location => precision.add_local(point.location, &point.predicates),
                PredicateSharing::LocationInstance => {
                    precision.add_location_instance(point.location, point.instance, &point.predicates)
                }
                PredicateSharing::Global => precision.add_global(&point.predicates),
            }
        }
        (precision, first_learned)
    }

    /// Marks the predicates used at each point as relevant for every block
    /// that is open there. Returns whether the reducer's policy changed.
    fn refine_relevant_computer(
        &self,
        arg: &Arg,
        points: &[InterpolationPoint],
        precision: &PredicatePrecision,
    ) -> Result<bool> {
        let Some((reducer, partitioning)) = &self.blocks else {
            return Ok(false);
        };
        let current = reducer.relevant_computer();
        let Some(refineable) = current.as_refineable() else {
            warn!("Relevant predicates computer {:?} cannot be refined", current);
            return Ok(false);
        };

        let main = partitioning.main_block();
        let mut open = vec![main];
        let mut facts: BTreeMap<BlockId, PredicateSet> = BTreeMap::new();
        for point in points {
            self.shutdown.check()?;
            let location = arg.state(point.state)?.location();
            while open.len() > 1 && open.last().is_some_and(|b| b.is_return_node(location)) {
                open.pop();
            }
            if let Some(block) = partitioning.block_for_call_node(location) {
                if block.id != main.id {
                    open.push(block);
                }
            }
            let local = precision.predicates(location, point.instance);
            for block in &open {
                facts.entry(block.id).or_default().extend(local.iter().cloned());
            }
        }

        let mut refined = None;
        for (block, predicates) in &facts {
            let next = refined.as_ref().unwrap_or(refineable).with_facts(*block, predicates);
            refined = Some(next);
        }
        match refined {
            Some(refined) if refined != *refineable => {
                debug!("New relevance facts: {:?}", refined.facts());
                self.engine.stats().refinement.computer_refinements.inc();
                reducer.set_relevant_computer(Rc::new(refined));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn analyze_feasible(&self, arg: &Arg, path: &ArgPath, formulas: &[Formula], model: Model) -> Result<Counterexample> {
        let on_path = arg.states_on_paths_to(path.last())?;
        if on_path.len() == path.len() {
            info!("Error path {} is feasible", path);
            return Ok(Counterexample {
                path: path.clone(),
                model,
                precise: true,
            });
        }
        if self.options.precise_error_path {
            if let Some((precise, model)) = self.find_precise_error_path(arg, path.last(), &on_path, formulas)? {
                info!("Error path {} is feasible", precise);
                return Ok(Counterexample {
                    path: precise,
                    model,
                    precise: true,
                });
            }
        }
        warn!("The error path and the satisfying assignment may be imprecise!");
        self.engine.stats().refinement.imprecise_paths.inc();
        Ok(Counterexample {
            path: path.clone(),
            model,
            precise: false,
        })
    }

    /// Picks the path to `target` that the solver takes at every branch, and
    /// replays it on its own for a model of exactly that path.
    fn find_precise_error_path(
        &self,
        arg: &Arg,
        target: StateId,
        on_path: &BTreeSet<StateId>,
        formulas: &[Formula],
    ) -> Result<Option<(ArgPath, Model)>> {
        let pfmgr = self.engine.path_formula_manager();
        let mut query = formulas.to_vec();
        query.push(pfmgr.build_branching_formula(arg, on_path)?);
        let Some(model) = self.interpolation.check_path(&query)? else {
            warn!("Inconsistent replayed error path!");
            return Ok(None);
        };

        let branches: BTreeMap<StateId, bool> = on_path
            .iter()
            .filter_map(|&id| model.get_bool(&branching_symbol(id)).map(|taken| (id, taken)))
            .collect();
        if branches.is_empty() {
            warn!("No information about ARG branches available!");
            return Ok(None);
        }
        let precise = match arg.path_from_branching(target, on_path, &branches) {
            Ok(precise) => precise,
            Err(e) => {
                warn!("Could not reconstruct the error path: {}", e);
                return Ok(None);
            }
        };

        let mut pf = pfmgr.make_empty();
        for edge in precise.edges() {
            pf = pfmgr.make_and(&pf, edge)?;
        }
        match self.interpolation.check_path(&[pf.formula().clone()])? {
            Some(model) => Ok(Some((precise, model))),
            None => {
                warn!("Inconsistent replayed error path!");
                Ok(None)
            }
        }
    }
}

impl Debug for PredicateRefiner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateRefiner")
            .field("options", &self.options)
            .field("repeated_once", &self.repeated_once)
            .finish()
    }
}

/// Abstraction states of `path` without the root. The last one must be the
/// error state.
fn abstraction_states(arg: &Arg, path: &ArgPath) -> Result<Vec<StateId>> {
    let mut result = Vec::new();
    for &id in path.states().iter().skip(1) {
        if arg.state(id)?.predicate_state().is_abstraction_state() {
            result.push(id);
        }
    }
    if result.last() != Some(&path.last()) {
        return Err(Error::RefinementFailed {
            reason: RefinementFailure::NoTargetAbstraction,
        });
    }
    Ok(result)
}

fn block_formulas(arg: &Arg, abstraction_path: &[StateId]) -> Result<Vec<Formula>> {
    abstraction_path
        .iter()
        .map(|&id| {
            let state = arg.state(id)?.predicate_state();
            Ok(state.abstraction().block_formula().formula().clone())
        })
        .collect()
}

/// The first state on `path` at the location of the first point with a
/// non-trivial interpolant.
fn highest_state_for_first_interpolant(arg: &Arg, path: &ArgPath, points: &[InterpolationPoint]) -> Result<StateId> {
    let point = points
        .iter()
        .find(|p| !p.interpolant.is_true())
        .ok_or_else(|| Error::inconsistent("spurious path without a non-trivial interpolant"))?;
    for &id in path.states().iter().skip(1) {
        if arg.state(id)?.location() == point.location {
            return Ok(id);
        }
    }
    Ok(point.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{CpaAlgorithm, RunResult};
    use crate::block_operator::BlockOperator;
    use crate::cfa::{Cfa, CfaBuilder};
    use crate::config::{AbstractionOptions, AlgorithmOptions, BlockOperatorOptions};
    use crate::engine::tests::{fixture, Fixture};
    use crate::formula::{Symbol, Term};
    use crate::relevant::{OccurrenceComputer, RefineableRelevantPredicatesComputer};
    use crate::transfer::TransferRelation;
    use test_log::test;

    /// `x = 0; f(); if (x != 0) error;` with an empty `f`.
    fn call_program() -> Rc<Cfa> {
        let mut b = CfaBuilder::new("main");
        let m0 = b.entry();
        let m1 = b.location("main");
        let m2 = b.location("main");
        let err = b.location("main");
        let exit = b.location("main");
        let f0 = b.function("f");
        let f1 = b.location("f");
        b.set_function_exit("f", f1);
        b.error(err);
        b.edge(
            m0,
            m1,
            EdgeKind::Assign {
                variable: "x".into(),
                value: Term::int(0),
            },
        );
        b.edge(
            m1,
            f0,
            EdgeKind::Call {
                function: "f".into(),
                arguments: vec![],
                return_site: m2,
            },
        );
        b.edge(f0, f1, EdgeKind::Blank);
        b.edge(
            f1,
            m2,
            EdgeKind::Return {
                function: "f".into(),
                result: None,
            },
        );
        b.branch(m2, Term::var("x").ne(0), err, exit);
        Rc::new(b.build(exit))
    }

    /// `if (y > 0) x = 1; else x = 2; if (x == 2) error;`
    fn diamond_program() -> Rc<Cfa> {
        let mut b = CfaBuilder::new("main");
        let l0 = b.entry();
        let then_loc = b.location("main");
        let else_loc = b.location("main");
        let join = b.location("main");
        let err = b.location("main");
        let exit = b.location("main");
        b.error(err);
        b.branch(l0, Term::var("y").gt(0), then_loc, else_loc);
        for (loc, value) in [(then_loc, 1), (else_loc, 2)] {
            b.edge(
                loc,
                join,
                EdgeKind::Assign {
                    variable: "x".into(),
                    value: Term::int(value),
                },
            );
        }
        b.branch(join, Term::var("x").eq(2), err, exit);
        Rc::new(b.build(exit))
    }

    fn cpa(fx: &Fixture, cfa: &Rc<Cfa>, options: AlgorithmOptions) -> CpaAlgorithm {
        let block_operator = BlockOperator::new(cfa.clone(), BlockOperatorOptions::default(), fx.stats.clone());
        let transfer = TransferRelation::new(cfa.clone(), fx.engine.clone(), block_operator, true);
        CpaAlgorithm::new(transfer, fx.engine.clone(), options, ShutdownNotifier::new())
    }

    fn refiner(fx: &Fixture, options: RefinementOptions) -> PredicateRefiner {
        let interpolation = InterpolationManager::new(fx.solver.clone(), fx.solver.clone(), true, fx.stats.clone());
        PredicateRefiner::new(fx.engine.clone(), interpolation, options, ShutdownNotifier::new())
    }

    fn explore(cpa: &CpaAlgorithm) -> (ReachedSet, ArgPath) {
        let mut reached = cpa.initial_reached_set(Precision::empty());
        let RunResult::TargetReached(target) = cpa.run(&mut reached).unwrap() else {
            panic!("error state not reached");
        };
        let path = reached.arg().path_to(target).unwrap();
        (reached, path)
    }

    #[test]
    fn test_rederived_formulas_match_stored_ones() {
        let fx = fixture(AbstractionOptions::default());
        let cfa = call_program();
        let cpa = cpa(&fx, &cfa, AlgorithmOptions::default());
        let (reached, path) = explore(&cpa);
        let refiner = refiner(&fx, RefinementOptions::default());

        let states = abstraction_states(reached.arg(), &path).unwrap();
        assert_eq!(states.len(), 3);
        let direct = block_formulas(reached.arg(), &states).unwrap();
        let rederived = refiner.rederive_block_formulas(reached.arg(), path.last()).unwrap();
        assert_eq!(direct, rederived);
    }

    #[test]
    fn test_spurious_path_learns_predicates() {
        let fx = fixture(AbstractionOptions::default());
        let cfa = call_program();
        let cpa = cpa(&fx, &cfa, AlgorithmOptions::default());
        let (mut reached, path) = explore(&cpa);
        let mut refiner = refiner(&fx, RefinementOptions::default());

        let outcome = refiner.perform_refinement(&mut reached, &path);
        assert!(outcome.is_spurious(), "{:?}", outcome);
        assert!(!reached.contains(path.last()));
        // The refinement root is the function entry, its parent is explored again.
        let parent = reached.pop().unwrap();
        assert_eq!(parent, path.states()[1]);
        let precision = reached.precision(parent).unwrap();
        let x_is_zero = fx.engine.abstraction_manager().make_predicate(&Term::var("x").eq(0));
        assert!(precision.effective().predicates_at(cfa.function("f").unwrap().entry).contains(&x_is_zero));
        assert_eq!(fx.stats.refinement.spurious.get(), 1);
    }

    #[test]
    fn test_repeated_counterexample_escalates() {
        let fx = fixture(AbstractionOptions::default());
        let cfa = call_program();
        let cpa = cpa(&fx, &cfa, AlgorithmOptions::default());
        let base: Rc<dyn crate::relevant::RelevantPredicatesComputer> = Rc::new(OccurrenceComputer::new());
        let reducer = Rc::new(PredicateReducer::new(
            fx.engine.clone(),
            Rc::new(RefineableRelevantPredicatesComputer::new(base)),
        ));
        let options = RefinementOptions {
            path_strategy: PathStrategy::Rederive,
            ..Default::default()
        };
        let mut refiner = refiner(&fx, options)
            .with_reducer(reducer.clone(), Rc::new(BlockPartitioning::by_functions(&cfa)))
            .unwrap();

        let (mut reached, path) = explore(&cpa);
        assert!(refiner.perform_refinement(&mut reached, &path).is_spurious());
        let parent = reached.pop().unwrap();
        let learned = reached.precision(parent).unwrap().clone();

        // The abstraction keeps ignoring the precision, so the same path
        // comes back with nothing new to learn.
        let mut outcomes = Vec::new();
        for _ in 0..4 {
            let (mut reached, path) = explore(&cpa);
            reached.set_precision(path.last(), learned.clone());
            outcomes.push(refiner.perform_refinement(&mut reached, &path));
        }
        assert!(outcomes[..3].iter().all(|o| o.is_spurious()), "{:?}", outcomes);
        assert!(matches!(
            outcomes[3],
            CounterexampleOutcome::Fatal(Error::RefinementFailed {
                reason: RefinementFailure::RepeatedCounterexample { .. }
            })
        ));
        assert_eq!(fx.stats.refinement.repeated_counterexamples.get(), 4);
        assert_eq!(fx.stats.refinement.computer_refinements.get(), 1);
        let computer = reducer.relevant_computer();
        let facts = computer.as_refineable().unwrap().facts();
        assert!(facts.values().any(|preds| !preds.is_empty()));
    }

    #[test]
    fn test_relevance_escalation_changes_block_entry_abstraction() {
        let fx = fixture(AbstractionOptions::default());
        let cfa = call_program();
        let partitioning = Rc::new(BlockPartitioning::by_functions(&cfa));
        let base: Rc<dyn crate::relevant::RelevantPredicatesComputer> = Rc::new(OccurrenceComputer::new());
        let reducer = Rc::new(PredicateReducer::new(
            fx.engine.clone(),
            Rc::new(RefineableRelevantPredicatesComputer::new(base)),
        ));
        let summarizing =
            cpa(&fx, &cfa, AlgorithmOptions::default()).with_block_summarization(reducer.clone(), partitioning.clone());
        let options = RefinementOptions {
            path_strategy: PathStrategy::Rederive,
            ..Default::default()
        };
        let mut refiner = refiner(&fx, options).with_reducer(reducer.clone(), partitioning).unwrap();

        let f0 = cfa.function("f").unwrap().entry;
        let entry_abstraction = |precision: &Precision| {
            let mut reached = summarizing.initial_reached_set(precision.clone());
            assert_eq!(summarizing.run(&mut reached).unwrap(), RunResult::Finished);
            let entry = reached
                .states()
                .map(|id| reached.arg().state(id).unwrap())
                .find(|s| s.location() == f0)
                .unwrap();
            entry.predicate_state().abstraction().formula().clone()
        };

        let (mut reached, path) = explore(&summarizing);
        assert_eq!(abstraction_states(reached.arg(), &path).unwrap().len(), 4);
        assert!(refiner.perform_refinement(&mut reached, &path).is_spurious());
        let parent = reached.pop().unwrap();
        let learned = reached.precision(parent).unwrap().clone();

        // `f` never mentions `x`, so `x == 0` is dropped when entering it.
        assert!(entry_abstraction(&learned).is_true());

        for _ in 0..2 {
            let (mut reached, path) = explore(&summarizing);
            reached.set_precision(path.last(), learned.clone());
            assert!(refiner.perform_refinement(&mut reached, &path).is_spurious());
        }
        assert_eq!(fx.stats.refinement.computer_refinements.get(), 1);

        // The escalated relevance keeps `x == 0` inside `f`.
        assert_eq!(entry_abstraction(&learned), Term::var("x").eq(0));
    }

    #[test]
    fn test_repeated_counterexample_without_reducer_fails() {
        let fx = fixture(AbstractionOptions::default());
        let cfa = call_program();
        let cpa = cpa(&fx, &cfa, AlgorithmOptions::default());
        let options = RefinementOptions {
            repeated_check: RepeatedCounterexampleCheck::ArgPath,
            ..Default::default()
        };
        let mut refiner = refiner(&fx, options);

        let (mut reached, path) = explore(&cpa);
        assert!(refiner.perform_refinement(&mut reached, &path).is_spurious());
        let parent = reached.pop().unwrap();
        let learned = reached.precision(parent).unwrap().clone();

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let (mut reached, path) = explore(&cpa);
            reached.set_precision(path.last(), learned.clone());
            outcomes.push(refiner.perform_refinement(&mut reached, &path));
        }
        assert!(outcomes[0].is_spurious());
        let CounterexampleOutcome::Fatal(e) = &outcomes[1] else {
            panic!("expected a fatal outcome, got {:?}", outcomes[1]);
        };
        assert!(e.to_string().contains("repeated counterexample"));
    }

    #[test]
    fn test_feasible_path_without_branching() {
        let fx = fixture(AbstractionOptions::default());
        let cfa = diamond_program();
        let cpa = cpa(&fx, &cfa, AlgorithmOptions::default());
        let (mut reached, path) = explore(&cpa);
        let mut refiner = refiner(&fx, RefinementOptions::default());

        let CounterexampleOutcome::Feasible(cex) = refiner.perform_refinement(&mut reached, &path) else {
            panic!("expected a feasible path");
        };
        assert!(cex.precise);
        assert_eq!(cex.path, path);
        assert_eq!(cex.model.get_int(&Symbol::indexed("x", 2)), Some(2));
        assert_eq!(fx.stats.refinement.feasible.get(), 1);
    }

    #[test]
    fn test_precise_error_path_through_merged_branches() {
        let fx = fixture(AbstractionOptions::default());
        let cfa = diamond_program();
        let options = AlgorithmOptions {
            merge_non_abstraction_states: true,
            ..Default::default()
        };
        let cpa = cpa(&fx, &cfa, options);
        let (mut reached, path) = explore(&cpa);
        assert_eq!(reached.arg().states_on_paths_to(path.last()).unwrap().len(), 5);
        let mut refiner = refiner(&fx, RefinementOptions::default());

        let CounterexampleOutcome::Feasible(cex) = refiner.perform_refinement(&mut reached, &path) else {
            panic!("expected a feasible path");
        };
        assert!(cex.precise);
        assert_eq!(cex.path.len(), 4);
        assert!(matches!(cex.path.edges()[0].kind, EdgeKind::Assume { truth: false, .. }));
        assert!(cex.model.get_int(&Symbol::indexed("y", 1)).is_some_and(|y| y <= 0));
        assert_eq!(fx.stats.refinement.imprecise_paths.get(), 0);
    }

    #[test]
    fn test_imprecise_path_is_reported() {
        let fx = fixture(AbstractionOptions::default());
        let cfa = diamond_program();
        let options = AlgorithmOptions {
            merge_non_abstraction_states: true,
            ..Default::default()
        };
        let cpa = cpa(&fx, &cfa, options);
        let (mut reached, path) = explore(&cpa);
        let mut refiner = refiner(
            &fx,
            RefinementOptions {
                precise_error_path: false,
                ..Default::default()
            },
        );

        let CounterexampleOutcome::Feasible(cex) = refiner.perform_refinement(&mut reached, &path) else {
            panic!("expected a feasible path");
        };
        assert!(!cex.precise);
        assert_eq!(cex.path, path);
        assert_eq!(fx.stats.refinement.imprecise_paths.get(), 1);
    }

    #[test]
    fn test_impact_with_reducer_is_rejected() {
        let fx = fixture(AbstractionOptions::default());
        let cfa = call_program();
        let reducer = Rc::new(PredicateReducer::new(fx.engine.clone(), Rc::new(OccurrenceComputer::new())));
        let options = RefinementOptions {
            strategy: RefinementStrategyKind::Impact,
            path_strategy: PathStrategy::Rederive,
            ..Default::default()
        };
        let err = refiner(&fx, options)
            .with_reducer(reducer, Rc::new(BlockPartitioning::by_functions(&cfa)))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
