//! Counters and timers collected during an analysis run.
//!
//! A single [`Statistics`] value is created by the driver and shared (via
//! `Rc`) with every component at construction time.

use std::cell::{Cell, RefCell};
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use num_bigint::BigUint;

#[derive(Debug, Default)]
pub struct Counter(Cell<usize>);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: usize) {
        self.0.set(self.0.get() + n);
    }

    pub fn max(&self, n: usize) {
        self.0.set(self.0.get().max(n));
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}

/// Running maximum of counts that may not fit a `usize`.
#[derive(Debug, Default)]
pub struct BigMax(RefCell<BigUint>);

impl BigMax {
    pub fn max(&self, n: BigUint) {
        let mut current = self.0.borrow_mut();
        if n > *current {
            *current = n;
        }
    }

    pub fn get(&self) -> BigUint {
        self.0.borrow().clone()
    }
}

/// Accumulating stopwatch.
#[derive(Debug, Default)]
pub struct Timer {
    total: Cell<Duration>,
    max: Cell<Duration>,
    intervals: Cell<usize>,
}

impl Timer {
    /// Start an interval; it stops when the guard is dropped.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            timer: self,
            started: Instant::now(),
        }
    }

    fn record(&self, elapsed: Duration) {
        self.total.set(self.total.get() + elapsed);
        self.max.set(self.max.get().max(elapsed));
        self.intervals.set(self.intervals.get() + 1);
    }

    pub fn total(&self) -> Duration {
        self.total.get()
    }

    pub fn max(&self) -> Duration {
        self.max.get()
    }

    pub fn intervals(&self) -> usize {
        self.intervals.get()
    }
}

pub struct TimerGuard<'a> {
    timer: &'a Timer,
    started: Instant,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.record(self.started.elapsed());
    }
}

#[derive(Debug, Default)]
pub struct AbstractionStatistics {
    pub calls: Counter,
    pub cache_hits: Counter,
    pub unsat_cache_hits: Counter,
    pub irrelevant_predicates: Counter,
    pub trivial_predicates: Counter,
    pub symbolic_checks: Counter,
    pub sat_checks: Counter,
    pub cartesian_cache_hits: Counter,
    pub cartesian_warnings: Counter,
    pub all_sat_models: Counter,
    pub max_all_sat_models: Counter,
    pub total_time: Timer,
    pub solve_time: Timer,
    pub region_time: Timer,
}

#[derive(Debug, Default)]
pub struct ReducerStatistics {
    pub reduce_calls: Counter,
    pub expand_calls: Counter,
    pub precision_reduce_calls: Counter,
    pub precision_cache_hits: Counter,
    pub precision_expand_calls: Counter,
    pub precision_fast_path: Counter,
    pub block_entries: Counter,
    pub repeated_block_entries: Counter,
    pub precision_growth: Counter,
    pub reduce_time: Timer,
    pub expand_time: Timer,
}

#[derive(Debug, Default)]
pub struct BlockOperatorStatistics {
    pub blocks_at_functions: Counter,
    pub blocks_at_loops: Counter,
    pub blocks_at_threshold: Counter,
    pub blocks_at_explicit_nodes: Counter,
}

#[derive(Debug, Default)]
pub struct TransferStatistics {
    pub target_sat_checks: Counter,
    pub infeasible_targets: Counter,
    pub sat_check_time: Timer,
}

#[derive(Debug, Default)]
pub struct PrecisionAdjustmentStatistics {
    pub abstractions: Counter,
    pub false_abstractions: Counter,
    pub max_block_size: Counter,
    /// Predicate valuations allowed by the weakest abstraction computed.
    pub max_abstraction_models: BigMax,
    pub total_time: Timer,
    pub abstraction_time: Timer,
}

#[derive(Debug, Default)]
pub struct RefinementStatistics {
    pub refinements: Counter,
    pub spurious: Counter,
    pub feasible: Counter,
    pub unchanged_interpolants: Counter,
    pub true_interpolants: Counter,
    pub predicates_learned: Counter,
    pub repeated_counterexamples: Counter,
    pub computer_refinements: Counter,
    pub imprecise_paths: Counter,
    pub strengthened_states: Counter,
    pub path_time: Timer,
    pub interpolation_time: Timer,
    pub precision_update_time: Timer,
    pub arg_update_time: Timer,
    pub total_time: Timer,
}

#[derive(Debug, Default)]
pub struct Statistics {
    pub abstraction: AbstractionStatistics,
    pub reducer: ReducerStatistics,
    pub blocks: BlockOperatorStatistics,
    pub transfer: TransferStatistics,
    pub adjustment: PrecisionAdjustmentStatistics,
    pub refinement: RefinementStatistics,
    pub solver_calls: Counter,
    pub solver_time: Timer,
}

fn ms(d: Duration) -> String {
    format!("{:.3}s", d.as_secs_f64())
}

impl Display for Statistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let a = &self.abstraction;
        writeln!(f, "Predicate abstraction:")?;
        writeln!(f, "  Number of abstractions:            {}", a.calls.get())?;
        writeln!(f, "  Cached abstractions:               {}", a.cache_hits.get())?;
        writeln!(f, "  Unsat cache hits:                  {}", a.unsat_cache_hits.get())?;
        writeln!(f, "  Irrelevant predicates:             {}", a.irrelevant_predicates.get())?;
        writeln!(f, "  Trivial predicates:                {}", a.trivial_predicates.get())?;
        writeln!(f, "  Symbolic checks:                   {}", a.symbolic_checks.get())?;
        writeln!(f, "  Satisfiability checks:             {}", a.sat_checks.get())?;
        writeln!(f, "  Cartesian disjunction warnings:    {}", a.cartesian_warnings.get())?;
        writeln!(
            f,
            "  All-sat models:                    {} (max {})",
            a.all_sat_models.get(),
            a.max_all_sat_models.get()
        )?;
        writeln!(f, "  Time for abstraction:              {}", ms(a.total_time.total()))?;
        writeln!(f, "    Solving:                         {}", ms(a.solve_time.total()))?;
        writeln!(f, "    Region construction:             {}", ms(a.region_time.total()))?;

        let r = &self.reducer;
        writeln!(f, "Block reduction:")?;
        writeln!(f, "  Reduce / expand:                   {} / {}", r.reduce_calls.get(), r.expand_calls.get())?;
        writeln!(
            f,
            "  Precision reduce (cached):         {} ({})",
            r.precision_reduce_calls.get(),
            r.precision_cache_hits.get()
        )?;
        writeln!(
            f,
            "  Precision expand (unchanged):      {} ({})",
            r.precision_expand_calls.get(),
            r.precision_fast_path.get()
        )?;
        writeln!(
            f,
            "  Block entries (repeated):          {} ({})",
            r.block_entries.get(),
            r.repeated_block_entries.get()
        )?;
        writeln!(f, "  Predicates gained on expand:       {}", r.precision_growth.get())?;
        writeln!(
            f,
            "  Time for reduce / expand:          {} / {}",
            ms(r.reduce_time.total()),
            ms(r.expand_time.total())
        )?;

        let b = &self.blocks;
        writeln!(f, "Block operator:")?;
        writeln!(
            f,
            "  Blocks at functions/loops/threshold/explicit: {}/{}/{}/{}",
            b.blocks_at_functions.get(),
            b.blocks_at_loops.get(),
            b.blocks_at_threshold.get(),
            b.blocks_at_explicit_nodes.get()
        )?;

        let t = &self.transfer;
        writeln!(f, "Transfer relation:")?;
        writeln!(
            f,
            "  Target sat checks (infeasible):    {} ({})",
            t.target_sat_checks.get(),
            t.infeasible_targets.get()
        )?;
        writeln!(f, "  Time for target sat checks:        {}", ms(t.sat_check_time.total()))?;

        let p = &self.adjustment;
        writeln!(f, "Precision adjustment:")?;
        writeln!(
            f,
            "  Abstractions (false):              {} ({})",
            p.abstractions.get(),
            p.false_abstractions.get()
        )?;
        writeln!(f, "  Max block size:                    {}", p.max_block_size.get())?;
        writeln!(f, "  Max models of an abstraction:      {}", p.max_abstraction_models.get())?;
        writeln!(f, "  Time for precision adjustment:     {}", ms(p.total_time.total()))?;
        writeln!(f, "    Computing abstractions:          {}", ms(p.abstraction_time.total()))?;

        let c = &self.refinement;
        writeln!(f, "Refinement:")?;
        writeln!(
            f,
            "  Refinements (spurious/feasible):   {} ({}/{})",
            c.refinements.get(),
            c.spurious.get(),
            c.feasible.get()
        )?;
        writeln!(f, "  Predicates learned:                {}", c.predicates_learned.get())?;
        writeln!(
            f,
            "  True / unchanged interpolants:     {} / {}",
            c.true_interpolants.get(),
            c.unchanged_interpolants.get()
        )?;
        writeln!(f, "  Repeated counterexamples:          {}", c.repeated_counterexamples.get())?;
        writeln!(f, "  Relevance refinements:             {}", c.computer_refinements.get())?;
        writeln!(f, "  Imprecise error paths:             {}", c.imprecise_paths.get())?;
        writeln!(f, "  Strengthened states:               {}", c.strengthened_states.get())?;
        writeln!(f, "  Time for refinement:               {}", ms(c.total_time.total()))?;
        writeln!(f, "    Path formulas:                   {}", ms(c.path_time.total()))?;
        writeln!(f, "    Interpolation:                   {}", ms(c.interpolation_time.total()))?;
        writeln!(f, "    Precision update:                {}", ms(c.precision_update_time.total()))?;
        writeln!(f, "    ARG update:                      {}", ms(c.arg_update_time.total()))?;

        writeln!(f, "Solver:")?;
        writeln!(f, "  Calls:                             {}", self.solver_calls.get())?;
        write!(f, "  Time:                              {}", ms(self.solver_time.total()))
    }
}
