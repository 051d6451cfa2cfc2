//! Solver interfaces and a bounded enumerative backend.
//!
//! The analysis talks to decision procedures only through the [`Solver`] and
//! [`InterpolatingProver`] traits. [`EnumerativeSolver`] implements both by
//! exhaustive search over a finite integer window, which is exact for programs
//! whose values stay inside that window. It prunes with three-valued
//! evaluation of partial assignments and gives up with a timeout once its
//! step budget is exhausted. A formula without models inside the window is
//! reported unsatisfiable only after a second search, with the ranges below
//! and above the window as extra values, rules out models outside it.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use log::{debug, trace};

use crate::config::SolverOptions;
use crate::error::{Result, SolverError};
use crate::formula::{Cmp, Formula, FormulaKind, Symbol, Term};
use crate::shutdown::ShutdownNotifier;
use crate::stats::Statistics;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Int(i64),
    Bool(bool),
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Satisfying assignment of a formula.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    values: BTreeMap<Symbol, Value>,
}

impl Model {
    pub fn get(&self, symbol: &Symbol) -> Option<Value> {
        self.values.get(symbol).copied()
    }

    pub fn get_int(&self, symbol: &Symbol) -> Option<i64> {
        match self.get(symbol) {
            Some(Value::Int(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_bool(&self, symbol: &Symbol) -> Option<bool> {
        match self.get(symbol) {
            Some(Value::Bool(b)) => Some(b),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &Value)> + '_ {
        self.values.iter()
    }

    pub fn evaluate(&self, f: &Formula) -> Option<bool> {
        let assignment = Assignment {
            values: self.values.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            outside: HashMap::new(),
        };
        assignment.eval(f)
    }
}

impl Display for Model {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, (s, v)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} = {}", s, v)?;
        }
        Ok(())
    }
}

pub trait Solver {
    fn is_unsat(&self, f: &Formula) -> Result<bool>;

    fn model(&self, f: &Formula) -> Result<Option<Model>>;

    /// Distinct truth-value vectors of `atoms` over all models of `f`.
    fn all_sat(&self, f: &Formula, atoms: &[Formula]) -> Result<Vec<Vec<bool>>>;

    fn implies(&self, a: &Formula, b: &Formula) -> Result<bool> {
        self.is_unsat(&a.and(&Formula::not(b)))
    }
}

pub enum InterpolationResult {
    /// The conjunction is unsatisfiable; one interpolant per cut point.
    Spurious(Vec<Formula>),
    Feasible(Model),
}

pub trait InterpolatingProver {
    /// Sequence interpolants for `formulas[..i]` against `formulas[i..]`.
    fn interpolate(&self, formulas: &[Formula]) -> Result<InterpolationResult>;
}

/// Push/pop scoped query context on top of a [`Solver`].
pub struct ProverEnvironment<'a> {
    solver: &'a dyn Solver,
    stack: Vec<Formula>,
}

impl<'a> ProverEnvironment<'a> {
    pub fn new(solver: &'a dyn Solver) -> Self {
        Self {
            solver,
            stack: Vec::new(),
        }
    }

    pub fn push(&mut self, f: Formula) {
        self.stack.push(f);
    }

    pub fn pop(&mut self) -> Option<Formula> {
        self.stack.pop()
    }

    pub fn size(&self) -> usize {
        self.stack.len()
    }

    fn conjunction(&self) -> Formula {
        Formula::and_all(self.stack.iter().cloned())
    }

    pub fn is_unsat(&self) -> Result<bool> {
        self.solver.is_unsat(&self.conjunction())
    }

    pub fn model(&self) -> Result<Option<Model>> {
        self.solver.model(&self.conjunction())
    }

    pub fn all_sat(&self, atoms: &[Formula]) -> Result<Vec<Vec<bool>>> {
        self.solver.all_sat(&self.conjunction(), atoms)
    }
}

/// Closed integer range; `i64::MIN` and `i64::MAX` stand for unbounded ends.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Interval {
    lo: i64,
    hi: i64,
}

impl Interval {
    fn point(v: i64) -> Self {
        Self { lo: v, hi: v }
    }

    fn exact(self) -> Option<i64> {
        (self.lo == self.hi && self.lo != i64::MIN && self.lo != i64::MAX).then_some(self.lo)
    }

    fn add(self, other: Interval) -> Self {
        Self {
            lo: self.lo.saturating_add(other.lo),
            hi: self.hi.saturating_add(other.hi),
        }
    }

    fn scale(self, k: i64) -> Self {
        let (a, b) = (self.lo.saturating_mul(k), self.hi.saturating_mul(k));
        Self {
            lo: a.min(b),
            hi: a.max(b),
        }
    }

    fn compare(cmp: Cmp, a: Interval, b: Interval) -> Option<bool> {
        if let (Some(x), Some(y)) = (a.exact(), b.exact()) {
            return Some(cmp.holds(x, y));
        }
        let definite = |yes: bool, no: bool| match (yes, no) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        let disjoint = a.hi < b.lo || b.hi < a.lo;
        match cmp {
            Cmp::Lt => definite(a.hi < b.lo, a.lo >= b.hi),
            Cmp::Le => definite(a.hi <= b.lo, a.lo > b.hi),
            Cmp::Gt => definite(a.lo > b.hi, a.hi <= b.lo),
            Cmp::Ge => definite(a.lo >= b.hi, a.hi < b.lo),
            Cmp::Eq => definite(false, disjoint),
            Cmp::Ne => definite(disjoint, false),
        }
    }
}

/// Partial assignment: exact values, plus integer variables only known to
/// lie in some range outside the search window.
#[derive(Default)]
struct Assignment {
    values: HashMap<Symbol, Value>,
    outside: HashMap<Symbol, Interval>,
}

impl Assignment {
    fn int(&self, s: &Symbol) -> Option<i64> {
        match self.values.get(s) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    fn bounds(&self, t: &Term) -> Option<Interval> {
        match t {
            Term::Const(c) => Some(Interval::point(*c)),
            Term::Var(s) => self.int(s).map(Interval::point).or_else(|| self.outside.get(s).copied()),
            Term::Add(a, b) => Some(self.bounds(a)?.add(self.bounds(b)?)),
            Term::Sub(a, b) => Some(self.bounds(a)?.add(self.bounds(b)?.scale(-1))),
            Term::Scale(k, t) => Some(self.bounds(t)?.scale(*k)),
        }
    }

    /// Three-valued evaluation.
    fn eval(&self, f: &Formula) -> Option<bool> {
        match f.kind() {
            FormulaKind::True => Some(true),
            FormulaKind::False => Some(false),
            FormulaKind::Prop(s) => match self.values.get(s) {
                Some(Value::Bool(b)) => Some(*b),
                _ => None,
            },
            FormulaKind::Atom(cmp, a, b) => {
                let value_of = |s: &Symbol| self.int(s);
                if let (Some(x), Some(y)) = (a.evaluate(&value_of), b.evaluate(&value_of)) {
                    return Some(cmp.holds(x, y));
                }
                if self.outside.is_empty() {
                    return None;
                }
                Interval::compare(*cmp, self.bounds(a)?, self.bounds(b)?)
            }
            FormulaKind::Not(g) => self.eval(g).map(|b| !b),
            FormulaKind::And(gs) => {
                let mut result = Some(true);
                for g in gs {
                    match self.eval(g) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            FormulaKind::Or(gs) => {
                let mut result = Some(false);
                for g in gs {
                    match self.eval(g) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
    Int(Symbol),
    Bool(Symbol),
}

impl Slot {
    fn symbol(&self) -> &Symbol {
        match self {
            Slot::Int(s) | Slot::Bool(s) => s,
        }
    }
}

fn slots_of(f: &Formula) -> BTreeSet<Slot> {
    let ints = f.variables().into_iter().map(Slot::Int);
    let bools = f.propositions().into_iter().map(Slot::Bool);
    ints.chain(bools).collect()
}

/// Bisections of outside ranges along one search path.
const MAX_SPLITS: u32 = 128;

enum Flow {
    Continue,
    Stop,
}

struct Search<'s> {
    solver: &'s EnumerativeSolver,
    formula: &'s Formula,
    slots: Vec<Slot>,
    /// Number of leading slots to enumerate exhaustively.
    interest: usize,
    assignment: Assignment,
    steps: u64,
}

impl<'s> Search<'s> {
    fn new(solver: &'s EnumerativeSolver, formula: &'s Formula, slots: Vec<Slot>, interest: usize) -> Self {
        Self {
            solver,
            formula,
            slots,
            interest,
            assignment: Assignment::default(),
            steps: 0,
        }
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.solver.options.max_steps {
            return Err(SolverError::Timeout {
                steps: self.steps,
                variables: self.slots.len(),
                size: self.formula.size(),
            }
            .into());
        }
        if self.steps % 1024 == 0 {
            self.solver.shutdown.check()?;
        }
        Ok(())
    }

    fn domain(&self, slot: &Slot) -> Vec<Value> {
        match slot {
            Slot::Int(_) => self.solver.domain.iter().map(|&v| Value::Int(v)).collect(),
            Slot::Bool(_) => vec![Value::Bool(false), Value::Bool(true)],
        }
    }

    fn run(&mut self, depth: usize, on_model: &mut dyn FnMut(&Assignment) -> Flow) -> Result<Flow> {
        self.tick()?;
        match self.assignment.eval(self.formula) {
            Some(false) => return Ok(Flow::Continue),
            Some(true) if depth >= self.interest => return Ok(on_model(&self.assignment)),
            _ => {}
        }
        if depth >= self.interest {
            if self.complete(depth)? {
                return Ok(on_model(&self.assignment));
            }
            return Ok(Flow::Continue);
        }
        let slot = self.slots[depth].clone();
        for value in self.domain(&slot) {
            self.assignment.values.insert(slot.symbol().clone(), value);
            if let Flow::Stop = self.run(depth + 1, on_model)? {
                self.assignment.values.remove(slot.symbol());
                return Ok(Flow::Stop);
            }
        }
        self.assignment.values.remove(slot.symbol());
        Ok(Flow::Continue)
    }

    /// Whether the current assignment extends to a model, leaving it unchanged.
    fn complete(&mut self, depth: usize) -> Result<bool> {
        self.tick()?;
        if let Some(b) = self.assignment.eval(self.formula) {
            return Ok(b);
        }
        if depth == self.slots.len() {
            return Ok(false);
        }
        let slot = self.slots[depth].clone();
        let mut found = false;
        for value in self.domain(&slot) {
            self.assignment.values.insert(slot.symbol().clone(), value);
            if self.complete(depth + 1)? {
                found = true;
                break;
            }
        }
        self.assignment.values.remove(slot.symbol());
        Ok(found)
    }

    /// Whether the formula may have a model that puts some integer outside
    /// the window. Such integers range over the whole interval below or
    /// above the window, so a `false` answer rules out every such model.
    fn escapes(&mut self, depth: usize, splits: u32) -> Result<bool> {
        self.tick()?;
        match self.assignment.eval(self.formula) {
            Some(b) => return Ok(b),
            None if depth == self.slots.len() => return self.split_outside(depth, splits),
            None => {}
        }
        let slot = self.slots[depth].clone();
        let symbol = slot.symbol().clone();
        let mut found = false;
        if let Slot::Int(_) = slot {
            for range in self.solver.outside_ranges() {
                self.assignment.outside.insert(symbol.clone(), range);
                if self.escapes(depth + 1, splits)? {
                    found = true;
                    break;
                }
            }
            self.assignment.outside.remove(&symbol);
        }
        if !found {
            for value in self.domain(&slot) {
                self.assignment.values.insert(symbol.clone(), value);
                if self.escapes(depth + 1, splits)? {
                    found = true;
                    break;
                }
            }
            self.assignment.values.remove(&symbol);
        }
        Ok(found)
    }

    /// Bisects the widest outside range and searches both halves.
    fn split_outside(&mut self, depth: usize, splits: u32) -> Result<bool> {
        let widest = self
            .assignment
            .outside
            .iter()
            .filter(|(_, r)| r.lo < r.hi)
            .max_by_key(|(s, r)| (r.hi as i128 - r.lo as i128, (*s).clone()))
            .map(|(s, r)| (s.clone(), *r));
        let Some((symbol, range)) = widest else {
            return Ok(true);
        };
        if splits >= MAX_SPLITS {
            return Ok(true);
        }
        let mid = (range.lo as i128 + (range.hi as i128 - range.lo as i128) / 2) as i64;
        let halves = [
            Interval { lo: range.lo, hi: mid },
            Interval {
                lo: mid + 1,
                hi: range.hi,
            },
        ];
        let mut found = false;
        for half in halves {
            self.assignment.outside.insert(symbol.clone(), half);
            if self.escapes(depth, splits + 1)? {
                found = true;
                break;
            }
        }
        self.assignment.outside.insert(symbol, range);
        Ok(found)
    }
}

/// Exhaustive solver over `[min_value, max_value]`.
pub struct EnumerativeSolver {
    options: SolverOptions,
    domain: Vec<i64>,
    shutdown: ShutdownNotifier,
    stats: Rc<Statistics>,
    calls: Cell<usize>,
}

impl EnumerativeSolver {
    pub fn new(options: SolverOptions, shutdown: ShutdownNotifier, stats: Rc<Statistics>) -> Self {
        // Small magnitudes first, so models prefer values near zero.
        let mut domain: Vec<i64> = (options.min_value..=options.max_value).collect();
        domain.sort_by_key(|v| (v.unsigned_abs(), *v < 0));
        Self {
            options,
            domain,
            shutdown,
            stats,
            calls: Cell::new(0),
        }
    }

    /// Number of queries answered so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    fn begin_query(&self) -> Result<()> {
        self.shutdown.check()?;
        self.calls.set(self.calls.get() + 1);
        self.stats.solver_calls.inc();
        Ok(())
    }

    fn outside_ranges(&self) -> [Interval; 2] {
        [
            Interval {
                lo: i64::MIN,
                hi: self.options.min_value.saturating_sub(1),
            },
            Interval {
                lo: self.options.max_value.saturating_add(1),
                hi: i64::MAX,
            },
        ]
    }

    /// Fails unless `f`, which has no model inside the window, has none
    /// outside it either.
    fn ensure_no_model_outside(&self, f: &Formula) -> Result<()> {
        let slots: Vec<Slot> = slots_of(f).into_iter().collect();
        let mut search = Search::new(self, f, slots, 0);
        if search.escapes(0, 0)? {
            debug!("{} may have models outside [{}, {}]", f, self.options.min_value, self.options.max_value);
            return Err(SolverError::OutOfRange {
                min: self.options.min_value,
                max: self.options.max_value,
            }
            .into());
        }
        Ok(())
    }

    /// Assignments of `vars` that extend to a model of `f`.
    fn project(&self, f: &Formula, vars: &[Slot]) -> Result<BTreeSet<Vec<Value>>> {
        let mut slots = vars.to_vec();
        slots.extend(slots_of(f).into_iter().filter(|s| !vars.contains(s)));
        let mut search = Search::new(self, f, slots, vars.len());
        let mut tuples = BTreeSet::new();
        let mut hit = |assignment: &Assignment| {
            let tuple = vars
                .iter()
                .map(|s| assignment.values.get(s.symbol()).copied())
                .collect::<Option<Vec<_>>>();
            if let Some(tuple) = tuple {
                tuples.insert(tuple);
            }
            Flow::Continue
        };
        search.run(0, &mut hit)?;
        Ok(tuples)
    }

    fn render_values(&self, slot: &Slot, values: &BTreeSet<Value>) -> Formula {
        match slot {
            Slot::Bool(s) => {
                let p = Formula::prop_symbol(s.clone());
                match (values.contains(&Value::Bool(true)), values.contains(&Value::Bool(false))) {
                    (true, true) => Formula::tt(),
                    (true, false) => p,
                    (false, true) => Formula::not(&p),
                    (false, false) => Formula::ff(),
                }
            }
            Slot::Int(s) => {
                let var = Term::Var(s.clone());
                let mut ints: Vec<i64> = values
                    .iter()
                    .filter_map(|v| match v {
                        Value::Int(i) => Some(*i),
                        Value::Bool(_) => None,
                    })
                    .collect();
                ints.sort_unstable();
                let mut runs: Vec<(i64, i64)> = Vec::new();
                for v in ints {
                    match runs.last_mut() {
                        Some((_, hi)) if *hi + 1 == v => *hi = v,
                        _ => runs.push((v, v)),
                    }
                }
                Formula::or_all(runs.into_iter().map(|(lo, hi)| {
                    if lo == hi {
                        var.clone().eq(lo)
                    } else {
                        let lower = if lo <= self.options.min_value {
                            Formula::tt()
                        } else {
                            var.clone().ge(lo)
                        };
                        let upper = if hi >= self.options.max_value {
                            Formula::tt()
                        } else {
                            var.clone().le(hi)
                        };
                        lower & upper
                    }
                }))
            }
        }
    }

    /// Formula over `vars` describing exactly the given tuples.
    fn render(&self, vars: &[Slot], tuples: &BTreeSet<Vec<Value>>) -> Formula {
        if tuples.is_empty() {
            return Formula::ff();
        }
        let columns: Vec<BTreeSet<Value>> = (0..vars.len())
            .map(|k| tuples.iter().map(|t| t[k]).collect())
            .collect();
        let product: usize = columns.iter().map(|c| c.len()).product();
        if product == tuples.len() {
            return Formula::and_all(vars.iter().zip(&columns).map(|(s, c)| self.render_values(s, c)));
        }
        Formula::or_all(tuples.iter().map(|t| {
            Formula::and_all(
                vars.iter()
                    .zip(t)
                    .map(|(s, v)| self.render_values(s, &BTreeSet::from([*v]))),
            )
        }))
    }
}

impl Solver for EnumerativeSolver {
    fn is_unsat(&self, f: &Formula) -> Result<bool> {
        self.begin_query()?;
        let _timer = self.stats.solver_time.start();
        let slots: Vec<Slot> = slots_of(f).into_iter().collect();
        let mut search = Search::new(self, f, slots, 0);
        let unsat = !search.complete(0)?;
        trace!("is_unsat({}) -> {} after {} steps", f, unsat, search.steps);
        if unsat {
            self.ensure_no_model_outside(f)?;
        }
        Ok(unsat)
    }

    fn model(&self, f: &Formula) -> Result<Option<Model>> {
        self.begin_query()?;
        let _timer = self.stats.solver_time.start();
        let slots: Vec<Slot> = slots_of(f).into_iter().collect();
        let n = slots.len();
        let mut search = Search::new(self, f, slots.clone(), n);
        let mut found = None;
        search.run(0, &mut |assignment| {
            found = Some(assignment.values.clone());
            Flow::Stop
        })?;
        if found.is_none() {
            self.ensure_no_model_outside(f)?;
        }
        Ok(found.map(|values| {
            let mut model = Model::default();
            for slot in slots {
                let value = values.get(slot.symbol()).copied().unwrap_or(match slot {
                    Slot::Int(_) => Value::Int(0),
                    Slot::Bool(_) => Value::Bool(false),
                });
                model.values.insert(slot.symbol().clone(), value);
            }
            model
        }))
    }

    fn all_sat(&self, f: &Formula, atoms: &[Formula]) -> Result<Vec<Vec<bool>>> {
        self.begin_query()?;
        let _timer = self.stats.solver_time.start();
        let mut interest: BTreeSet<Slot> = BTreeSet::new();
        for atom in atoms {
            interest.extend(slots_of(atom));
        }
        let mut slots: Vec<Slot> = interest.iter().cloned().collect();
        let n = slots.len();
        slots.extend(slots_of(f).into_iter().filter(|s| !interest.contains(s)));

        let mut search = Search::new(self, f, slots, n);
        let mut vectors = BTreeSet::new();
        search.run(0, &mut |assignment| {
            let vector: Vec<bool> = atoms.iter().map(|a| assignment.eval(a).unwrap_or(false)).collect();
            vectors.insert(vector);
            Flow::Continue
        })?;
        trace!("all_sat({}) -> {} vectors", f, vectors.len());

        // Truth vectors realized only outside the window would be lost.
        let missed = vectors.iter().map(|vector| {
            let cube = atoms
                .iter()
                .zip(vector)
                .map(|(a, &b)| if b { a.clone() } else { Formula::not(a) });
            Formula::not(&Formula::and_all(cube))
        });
        let rest = Formula::and_all(std::iter::once(f.clone()).chain(missed));
        if !rest.is_false() {
            self.ensure_no_model_outside(&rest)?;
        }
        Ok(vectors.into_iter().collect())
    }
}

impl InterpolatingProver for EnumerativeSolver {
    fn interpolate(&self, formulas: &[Formula]) -> Result<InterpolationResult> {
        let all = Formula::and_all(formulas.iter().cloned());
        if let Some(model) = self.model(&all)? {
            debug!("interpolate: path is feasible");
            return Ok(InterpolationResult::Feasible(model));
        }

        let mut interpolants = Vec::with_capacity(formulas.len().saturating_sub(1));
        for i in 1..formulas.len() {
            if interpolants.last().is_some_and(|itp: &Formula| itp.is_false()) {
                interpolants.push(Formula::ff());
                continue;
            }
            self.begin_query()?;
            let _timer = self.stats.solver_time.start();
            let a = Formula::and_all(formulas[..i].iter().cloned());
            let b = Formula::and_all(formulas[i..].iter().cloned());
            let b_slots = slots_of(&b);
            let shared: Vec<Slot> = slots_of(&a).into_iter().filter(|s| b_slots.contains(s)).collect();
            let tuples = self.project(&a, &shared)?;
            let itp = self.render(&shared, &tuples);
            debug!("interpolant {} = {}", i, itp);
            interpolants.push(itp);
        }
        Ok(InterpolationResult::Spurious(interpolants))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ssa::SsaMap;
    use test_log::test;

    fn solver() -> EnumerativeSolver {
        EnumerativeSolver::new(SolverOptions::default(), ShutdownNotifier::new(), Rc::new(Statistics::default()))
    }

    fn at(name: &str, index: u32) -> Term {
        Term::Var(Symbol::indexed(name, index))
    }

    #[test]
    fn test_is_unsat() {
        let s = solver();
        let x = at("x", 1);
        assert!(!s.is_unsat(&x.clone().eq(3)).unwrap());
        assert!(s.is_unsat(&(x.clone().eq(3) & x.clone().lt(2))).unwrap());
        assert!(s.is_unsat(&Formula::ff()).unwrap());
        assert_eq!(s.calls(), 3);
    }

    #[test]
    fn test_model() {
        let s = solver();
        let f = at("y", 2).eq(at("x", 1) + 1) & at("x", 1).eq(4) & Formula::prop("b");
        let model = s.model(&f).unwrap().unwrap();
        assert_eq!(model.get_int(&Symbol::indexed("y", 2)), Some(5));
        assert_eq!(model.get_bool(&Symbol::new("b")), Some(true));
        assert_eq!(model.evaluate(&f), Some(true));
    }

    #[test]
    fn test_implies() {
        let s = solver();
        let x = at("x", 1);
        assert!(s.implies(&x.clone().eq(1), &x.clone().gt(0)).unwrap());
        assert!(!s.implies(&x.clone().ge(0), &x.clone().gt(0)).unwrap());
    }

    #[test]
    fn test_all_sat() {
        let s = solver();
        let x = at("x", 1);
        let f = x.clone().ge(0) & x.clone().le(2);
        let atoms = [x.clone().eq(0), x.clone().eq(1)];
        let vectors = s.all_sat(&f, &atoms).unwrap();
        assert_eq!(vectors, vec![vec![false, false], vec![false, true], vec![true, false]]);
    }

    #[test]
    fn test_prover_environment() {
        let s = solver();
        let x = at("x", 1);
        let mut env = ProverEnvironment::new(&s);
        env.push(x.clone().gt(0));
        assert!(!env.is_unsat().unwrap());
        env.push(x.clone().lt(0));
        assert!(env.is_unsat().unwrap());
        env.pop();
        assert!(!env.is_unsat().unwrap());
        assert_eq!(env.size(), 1);
    }

    #[test]
    fn test_interpolants_for_spurious_path() {
        let s = solver();
        let b0 = at("x", 1).eq(0) & at("y", 2).eq(at("x", 1) + 1);
        let b1 = at("y", 2).eq(2);
        match s.interpolate(&[b0, b1]).unwrap() {
            InterpolationResult::Spurious(itps) => {
                assert_eq!(itps, vec![at("y", 2).eq(1)]);
            }
            InterpolationResult::Feasible(_) => panic!("path should be spurious"),
        }
    }

    #[test]
    fn test_interpolants_use_intervals() {
        let s = solver();
        let x = Term::var("x");
        let ssa = SsaMap::default().with("x", 1);
        let b0 = x.clone().gt(2).instantiate(&ssa);
        let b1 = x.clone().lt(1).instantiate(&ssa);
        match s.interpolate(&[b0, b1]).unwrap() {
            InterpolationResult::Spurious(itps) => assert_eq!(itps, vec![at("x", 1).ge(3)]),
            InterpolationResult::Feasible(_) => panic!("path should be spurious"),
        }
    }

    #[test]
    fn test_feasible_path_yields_model() {
        let s = solver();
        let b0 = at("x", 2).eq(1);
        let b1 = at("x", 2).gt(0);
        match s.interpolate(&[b0, b1]).unwrap() {
            InterpolationResult::Feasible(model) => assert_eq!(model.get_int(&Symbol::indexed("x", 2)), Some(1)),
            InterpolationResult::Spurious(_) => panic!("path should be feasible"),
        }
    }

    #[test]
    fn test_step_budget_is_a_timeout() {
        let options = SolverOptions {
            max_steps: 10,
            ..SolverOptions::default()
        };
        let s = EnumerativeSolver::new(options, ShutdownNotifier::new(), Rc::new(Statistics::default()));
        let f = at("a", 1).eq(at("b", 1) + at("c", 1)) & at("a", 1).eq(100);
        assert!(matches!(s.is_unsat(&f), Err(Error::Solver(SolverError::Timeout { .. }))));
    }

    #[test]
    fn test_models_outside_window_are_not_unsat() {
        let s = solver();
        let out_of_range = |r: Result<bool>| matches!(r, Err(Error::Solver(SolverError::OutOfRange { min: -8, max: 8 })));

        // `x = 9` only has a model one above the window.
        let x = at("x", 2);
        assert!(out_of_range(s.is_unsat(&x.clone().eq(9))));
        assert!(matches!(
            s.model(&x.clone().eq(9)),
            Err(Error::Solver(SolverError::OutOfRange { .. }))
        ));
        // Constants inside the window can still force values outside it.
        let y = at("y", 2);
        let f = at("x", 1).eq(8) & y.clone().eq(at("x", 1) + 1);
        assert!(out_of_range(s.is_unsat(&(f.clone() & y.clone().gt(8)))));
        assert!(matches!(
            s.all_sat(&f, &[y.clone().gt(8)]),
            Err(Error::Solver(SolverError::OutOfRange { .. }))
        ));

        // Unsatisfiable over all integers.
        assert!(s.is_unsat(&(x.clone().gt(10) & x.clone().lt(5))).unwrap());
        assert!(s.is_unsat(&(at("x", 1).eq(8) & y.clone().eq(at("x", 1) + 1) & y.clone().lt(0))).unwrap());
        assert!(s.is_unsat(&(x.clone().gt(20) & x.clone().lt(10))).unwrap());
        assert!(matches!(
            s.all_sat(&x.clone().gt(20), &[]),
            Err(Error::Solver(SolverError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_shutdown_interrupts() {
        let shutdown = ShutdownNotifier::new();
        let s = EnumerativeSolver::new(SolverOptions::default(), shutdown.clone(), Rc::new(Statistics::default()));
        shutdown.request_shutdown();
        assert!(matches!(s.is_unsat(&Formula::tt()), Err(Error::Interrupted)));
    }
}
