//! Computation of predicate abstractions.
//!
//! [`AbstractionEngine`] turns the conjunction of a previous abstraction and a
//! path formula into a region over a set of predicates, either by enumerating
//! all satisfying predicate assignments (Boolean abstraction) or by deciding
//! each predicate on its own (Cartesian abstraction). Results are memoized per
//! (formula, relevant predicates), and formulas found infeasible are
//! remembered so that later blocks containing them skip the solver entirely.
//!
//! The engine also provides the region-level primitives used for block
//! summarization: [`reduce`](AbstractionEngine::reduce) quantifies predicates
//! out of an abstraction and [`expand`](AbstractionEngine::expand) puts the
//! caller's knowledge about them back.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

use log::{debug, trace, warn};
use num_bigint::BigUint;

use crate::abstraction::AbstractionFormula;
use crate::config::AbstractionOptions;
use crate::error::{Error, Result};
use crate::formula::{Formula, Symbol};
use crate::pathformula::{PathFormula, PathFormulaManager};
use crate::predicates::{AbstractionManager, AbstractionPredicate};
use crate::region::{Region, RegionManager};
use crate::solver::{ProverEnvironment, Solver};
use crate::ssa::SsaMap;
use crate::stats::Statistics;

type AbstractionKey = (Formula, BTreeSet<AbstractionPredicate>);

pub struct AbstractionEngine {
    amgr: Rc<AbstractionManager>,
    solver: Rc<dyn Solver>,
    pfmgr: Rc<dyn PathFormulaManager>,
    options: AbstractionOptions,
    stats: Rc<Statistics>,
    next_id: Cell<usize>,
    abstraction_cache: RefCell<HashMap<AbstractionKey, AbstractionFormula>>,
    unsat_cache: RefCell<HashSet<Formula>>,
    cartesian_cache: RefCell<HashMap<(Formula, AbstractionPredicate), Option<bool>>>,
    warned_cartesian: Cell<bool>,
}

impl AbstractionEngine {
    pub fn new(
        amgr: Rc<AbstractionManager>,
        solver: Rc<dyn Solver>,
        pfmgr: Rc<dyn PathFormulaManager>,
        options: AbstractionOptions,
        stats: Rc<Statistics>,
    ) -> Self {
        Self {
            amgr,
            solver,
            pfmgr,
            options,
            stats,
            next_id: Cell::new(0),
            abstraction_cache: RefCell::new(HashMap::new()),
            unsat_cache: RefCell::new(HashSet::new()),
            cartesian_cache: RefCell::new(HashMap::new()),
            warned_cartesian: Cell::new(false),
        }
    }

    pub fn abstraction_manager(&self) -> &Rc<AbstractionManager> {
        &self.amgr
    }

    pub fn region_manager(&self) -> &RegionManager {
        self.amgr.region_manager()
    }

    pub fn solver(&self) -> &Rc<dyn Solver> {
        &self.solver
    }

    pub fn path_formula_manager(&self) -> &Rc<dyn PathFormulaManager> {
        &self.pfmgr
    }

    pub fn stats(&self) -> &Rc<Statistics> {
        &self.stats
    }

    fn fresh_id(&self) -> usize {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn make_abstraction_formula(&self, region: Region, ssa: &SsaMap, block_formula: PathFormula) -> AbstractionFormula {
        let formula = {
            let _timer = self.stats.abstraction.region_time.start();
            self.amgr.to_concrete(region)
        };
        let instantiated = formula.instantiate(ssa);
        AbstractionFormula::new(self.fresh_id(), region, formula, instantiated, block_formula)
    }

    pub fn make_true_abstraction(&self, block_formula: &PathFormula) -> AbstractionFormula {
        AbstractionFormula::new(
            self.fresh_id(),
            Region::TRUE,
            Formula::tt(),
            Formula::tt(),
            block_formula.clone(),
        )
    }

    fn make_false_abstraction(&self, block_formula: &PathFormula) -> AbstractionFormula {
        AbstractionFormula::new(
            self.fresh_id(),
            Region::FALSE,
            Formula::ff(),
            Formula::ff(),
            block_formula.clone(),
        )
    }

    /// Number of valuations of all predicates known so far that satisfy
    /// `abstraction`.
    pub fn model_count(&self, abstraction: &AbstractionFormula) -> BigUint {
        let rmgr = self.region_manager();
        rmgr.sat_count(abstraction.region(), rmgr.num_vars())
    }

    /// Abstraction of `old ∧ pf` over `predicates`.
    pub fn build_abstraction(
        &self,
        old: &AbstractionFormula,
        pf: &PathFormula,
        predicates: &BTreeSet<AbstractionPredicate>,
    ) -> Result<AbstractionFormula> {
        let stats = &self.stats.abstraction;
        stats.calls.inc();
        let _timer = stats.total_time.start();

        if predicates.is_empty() {
            debug!("Abstraction {} with empty precision is true", stats.calls.get());
            stats.symbolic_checks.inc();
            return Ok(self.make_true_abstraction(pf));
        }

        debug!(
            "Computing abstraction {} with {} predicates",
            stats.calls.get(),
            predicates.len()
        );
        trace!("Old abstraction: {}", old);
        trace!("Path formula: {}", pf);

        let symbolic = pf.formula().clone();
        let f = old.instantiated().and(&symbolic);
        let ssa = pf.ssa();

        let relevant = self.relevant_predicates(predicates, &f, ssa);

        let key = (f.clone(), relevant.clone());
        if self.options.use_cache {
            if let Some(cached) = self.abstraction_cache.borrow().get(&key) {
                debug!("Abstraction {} was cached", stats.calls.get());
                stats.cache_hits.inc();
                let formula = cached.formula().clone();
                let instantiated = formula.instantiate(ssa);
                return Ok(AbstractionFormula::new(
                    self.fresh_id(),
                    cached.region(),
                    formula,
                    instantiated,
                    pf.clone(),
                ));
            }
            let unsat_cache = self.unsat_cache.borrow();
            if unsat_cache.contains(&symbolic) || unsat_cache.contains(&f) {
                debug!("Block feasibility of abstraction {} was cached and is false", stats.calls.get());
                stats.unsat_cache_hits.inc();
                return Ok(self.make_false_abstraction(pf));
            }
        }

        let rmgr = self.region_manager();
        let (remaining, mut region) = if self.options.identify_trivial_predicates {
            self.identify_trivial_predicates(relevant, old, pf)
        } else {
            (relevant, rmgr.make_true())
        };

        let mut prover = ProverEnvironment::new(self.solver.as_ref());
        prover.push(f.clone());
        if remaining.is_empty() {
            stats.sat_checks.inc();
            let unsat = {
                let _timer = stats.solve_time.start();
                prover.is_unsat()?
            };
            if unsat {
                region = rmgr.make_false();
            }
        } else if self.options.cartesian {
            let cartesian = self.build_cartesian_abstraction(&f, ssa, &mut prover, &remaining)?;
            region = rmgr.make_and(region, cartesian);
        } else {
            let boolean = self.build_boolean_abstraction(ssa, &prover, &remaining)?;
            region = rmgr.make_and(region, boolean);
        }

        let result = self.make_abstraction_formula(region, ssa, pf.clone());
        debug!("Abstraction result is {}", result);

        if self.options.use_cache {
            self.abstraction_cache.borrow_mut().insert(key, result.clone());
            if result.is_false() {
                self.unsat_cache.borrow_mut().insert(f);
            }
        }
        Ok(result)
    }

    /// Predicates sharing an instantiated variable with `f`; `false` is dropped.
    fn relevant_predicates(
        &self,
        predicates: &BTreeSet<AbstractionPredicate>,
        f: &Formula,
        ssa: &SsaMap,
    ) -> BTreeSet<AbstractionPredicate> {
        let symbols = |g: &Formula| -> BTreeSet<Symbol> {
            let mut all = g.variables();
            all.extend(g.propositions());
            all
        };
        let variables = symbols(f);
        let mut relevant = BTreeSet::new();
        for predicate in predicates {
            if predicate.is_false() {
                trace!("Ignoring predicate 'false'");
                continue;
            }
            let predicate_vars = symbols(&predicate.atom().instantiate(ssa));
            if predicate_vars.is_disjoint(&variables) {
                self.stats.abstraction.irrelevant_predicates.inc();
                trace!("Ignoring predicate about variables {:?}", predicate_vars);
            } else {
                relevant.insert(predicate.clone());
            }
        }
        relevant
    }

    /// Split off predicates untouched by `pf` whose value the old abstraction
    /// already decides, returning the rest and the region they contribute.
    fn identify_trivial_predicates(
        &self,
        predicates: BTreeSet<AbstractionPredicate>,
        old: &AbstractionFormula,
        pf: &PathFormula,
    ) -> (BTreeSet<AbstractionPredicate>, Region) {
        let rmgr = self.region_manager();
        let block_variables = pf.formula().variable_names();
        let old_region = old.region();
        let mut region = rmgr.make_true();
        let mut remaining = BTreeSet::new();

        for predicate in predicates {
            if predicate.atom().variable_names().is_disjoint(&block_variables) {
                let var = predicate.region();
                if rmgr.entails(old_region, var) {
                    region = rmgr.make_and(region, var);
                    self.stats.abstraction.trivial_predicates.inc();
                    trace!("Predicate {} is unconditionally true in old abstraction", predicate);
                    continue;
                }
                let negated = rmgr.make_not(var);
                if rmgr.entails(old_region, negated) {
                    region = rmgr.make_and(region, negated);
                    self.stats.abstraction.trivial_predicates.inc();
                    trace!("Negation of predicate {} is unconditionally true in old abstraction", predicate);
                    continue;
                }
            }
            remaining.insert(predicate);
        }
        debug_assert!(rmgr.entails(old_region, region));
        (remaining, region)
    }

    fn build_boolean_abstraction(
        &self,
        ssa: &SsaMap,
        prover: &ProverEnvironment<'_>,
        predicates: &BTreeSet<AbstractionPredicate>,
    ) -> Result<Region> {
        let stats = &self.stats.abstraction;
        let atoms: Vec<Formula> = predicates.iter().map(|p| p.atom().instantiate(ssa)).collect();
        let models = {
            let _timer = stats.solve_time.start();
            prover.all_sat(&atoms)?
        };
        stats.all_sat_models.add(models.len());
        stats.max_all_sat_models.max(models.len());
        trace!("All-sat returned {} models", models.len());

        let _timer = stats.region_time.start();
        let rmgr = self.region_manager();
        Ok(rmgr.make_or_many(models.iter().map(|model| {
            rmgr.cube(
                predicates
                    .iter()
                    .zip(model)
                    .map(|(p, &value)| (p.variable(), value)),
            )
        })))
    }

    fn build_cartesian_abstraction(
        &self,
        f: &Formula,
        ssa: &SsaMap,
        prover: &mut ProverEnvironment<'_>,
        predicates: &BTreeSet<AbstractionPredicate>,
    ) -> Result<Region> {
        let stats = &self.stats.abstraction;
        let rmgr = self.region_manager();

        let feasible = {
            let _timer = stats.solve_time.start();
            !prover.is_unsat()?
        };
        if !feasible {
            return Ok(rmgr.make_false());
        }

        if !self.warned_cartesian.get() && !f.is_purely_conjunctive() {
            warn!(
                "Using cartesian abstraction when formulas contain disjunctions may be imprecise. \
                 This might lead to failing refinements."
            );
            self.warned_cartesian.set(true);
            stats.cartesian_warnings.inc();
        }

        let mut region = rmgr.make_true();
        for predicate in predicates {
            let key = (f.clone(), predicate.clone());
            let cached = if self.options.use_cache {
                self.cartesian_cache.borrow().get(&key).copied()
            } else {
                None
            };
            let value = match cached {
                Some(value) => {
                    stats.cartesian_cache_hits.inc();
                    value
                }
                None => {
                    let atom = predicate.atom().instantiate(ssa);
                    let _timer = stats.solve_time.start();
                    prover.push(Formula::not(&atom));
                    let is_true = prover.is_unsat();
                    prover.pop();
                    let value = if is_true? {
                        Some(true)
                    } else {
                        prover.push(atom);
                        let is_false = prover.is_unsat();
                        prover.pop();
                        if is_false? {
                            Some(false)
                        } else {
                            None
                        }
                    };
                    if self.options.use_cache {
                        self.cartesian_cache.borrow_mut().insert(key, value);
                    }
                    value
                }
            };
            match value {
                Some(true) => region = rmgr.make_and(region, predicate.region()),
                Some(false) => region = rmgr.make_and(region, rmgr.make_not(predicate.region())),
                None => {}
            }
        }
        Ok(region)
    }

    /// `region(a1) ⇒ region(a2)`.
    pub fn check_coverage(&self, a1: &AbstractionFormula, a2: &AbstractionFormula) -> bool {
        self.region_manager().entails(a1.region(), a2.region())
    }

    /// `(a1 ∧ pf) ⇒ a2`, with `a2` instantiated at the indices of `pf`.
    pub fn check_coverage_with(&self, a1: &AbstractionFormula, pf: &PathFormula, a2: &AbstractionFormula) -> Result<bool> {
        let a = a1.instantiated().and(pf.formula());
        let b = a2.formula().instantiate(pf.ssa());
        self.solver.implies(&a, &b)
    }

    pub fn unsat(&self, abstraction: &AbstractionFormula, pf: &PathFormula) -> Result<bool> {
        let f = abstraction.instantiated().and(pf.formula());
        trace!("Checking satisfiability of formula {}", f);
        self.solver.is_unsat(&f)
    }

    /// Conjunction of two abstractions with the same block formula.
    pub fn make_and(&self, a1: &AbstractionFormula, a2: &AbstractionFormula) -> Result<AbstractionFormula> {
        if a1.block_formula() != a2.block_formula() {
            return Err(Error::inconsistent(format!(
                "cannot conjoin abstractions {} and {} with different block formulas",
                a1.id(),
                a2.id()
            )));
        }
        let region = self.region_manager().make_and(a1.region(), a2.region());
        Ok(AbstractionFormula::new(
            self.fresh_id(),
            region,
            a1.formula().and(a2.formula()),
            a1.instantiated().and(a2.instantiated()),
            a1.block_formula().clone(),
        ))
    }

    /// `abstraction ∧ formula`, where `formula` is instantiated at the indices
    /// of the abstraction's block formula. Atoms of `formula` become predicates.
    pub fn strengthen(&self, abstraction: &AbstractionFormula, formula: &Formula) -> AbstractionFormula {
        let rmgr = self.region_manager();
        let region = rmgr.make_and(abstraction.region(), self.amgr.build_region(&formula.uninstantiate()));
        let block_formula = abstraction.block_formula().clone();
        self.make_abstraction_formula(region, block_formula.ssa(), block_formula.clone())
    }

    /// Quantify `remove` out of `abstraction`, instantiating the result at `ssa`.
    pub fn reduce(
        &self,
        abstraction: &AbstractionFormula,
        remove: &BTreeSet<AbstractionPredicate>,
        ssa: &SsaMap,
    ) -> AbstractionFormula {
        let region = self
            .region_manager()
            .make_exists(abstraction.region(), remove.iter().map(|p| p.variable()));
        let block_formula = self.pfmgr.make_new(abstraction.block_formula(), ssa.clone());
        self.make_abstraction_formula(region, ssa, block_formula)
    }

    /// `reduced ∧ ∃relevant. source`, instantiated at `new_ssa`.
    pub fn expand(
        &self,
        reduced: &AbstractionFormula,
        source: &AbstractionFormula,
        relevant: &BTreeSet<AbstractionPredicate>,
        new_ssa: &SsaMap,
    ) -> AbstractionFormula {
        let rmgr = self.region_manager();
        let context = rmgr.make_exists(source.region(), relevant.iter().map(|p| p.variable()));
        let region = rmgr.make_and(reduced.region(), context);
        let block_formula = self.pfmgr.make_new(reduced.block_formula(), new_ssa.clone());
        self.make_abstraction_formula(region, new_ssa, block_formula)
    }

    /// Predicates for the atoms of an interpolant.
    ///
    /// The interpolant `false` yields the single predicate `false`.
    pub fn extract_predicates(&self, formula: &Formula, split_equalities: bool) -> Vec<AbstractionPredicate> {
        if formula.is_false() {
            return vec![self.amgr.make_false_predicate()];
        }
        formula
            .extract_atoms(split_equalities)
            .iter()
            .map(|atom| self.amgr.make_predicate(atom))
            .collect()
    }

    pub fn extract_predicates_from_region(&self, region: Region) -> BTreeSet<AbstractionPredicate> {
        self.amgr.extract_predicates(region)
    }
}

impl Debug for AbstractionEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbstractionEngine")
            .field("options", &self.options)
            .field("cached", &self.abstraction_cache.borrow().len())
            .field("unsat_cached", &self.unsat_cache.borrow().len())
            .finish()
    }
}
