//! Path formulas: SSA-encoded symbolic effects of a sequence of edges.

use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;

use log::debug;

use crate::arg::{Arg, StateId};
use crate::cfa::{is_local_of, return_variable, CfaEdge, EdgeKind};
use crate::error::{Error, Result};
use crate::formula::{Formula, Symbol, Term};
use crate::ssa::SsaMap;

/// Symbolic transition formula of a path segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathFormula {
    formula: Formula,
    ssa: SsaMap,
    length: usize,
}

impl PathFormula {
    pub fn new(formula: Formula, ssa: SsaMap, length: usize) -> Self {
        Self { formula, ssa, length }
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    pub fn ssa(&self) -> &SsaMap {
        &self.ssa
    }

    /// Number of edges this formula was built from.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_trivial(&self) -> bool {
        self.formula.is_true()
    }
}

impl Display for PathFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.formula, self.ssa)
    }
}

/// Name of the proposition recording the branch taken at `state`.
pub fn branching_symbol(state: StateId) -> Symbol {
    Symbol::new(format!("__ARG_BRANCH_{}", state.index()))
}

/// Conversion of edges into path formulas.
pub trait PathFormulaManager: Debug {
    fn make_empty(&self) -> PathFormula;

    /// Empty formula that continues the SSA numbering of `basis`.
    fn make_empty_with(&self, basis: &PathFormula) -> PathFormula;

    fn make_and(&self, pf: &PathFormula, edge: &CfaEdge) -> Result<PathFormula>;

    fn make_or(&self, pf1: &PathFormula, pf2: &PathFormula) -> PathFormula;

    fn make_new(&self, pf: &PathFormula, ssa: SsaMap) -> PathFormula;

    /// Formula defining one proposition per branching state of `states`,
    /// true iff the then-branch is taken.
    fn build_branching_formula(&self, arg: &Arg, states: &BTreeSet<StateId>) -> Result<Formula>;
}

/// SSA encoding of the edge language of [`crate::cfa`].
#[derive(Debug, Default)]
pub struct SsaPathFormulaManager;

impl SsaPathFormulaManager {
    pub fn new() -> Self {
        Self
    }

    fn assign(&self, ssa: &mut SsaMap, variable: &Rc<str>, value: &Term, value_ssa: &SsaMap) -> Formula {
        let rhs = value.instantiate(value_ssa);
        let index = ssa.fresh_index(variable);
        ssa.set(variable.clone(), index);
        Term::Var(Symbol::indexed(variable.clone(), index)).eq(rhs)
    }

    fn edge_formula(&self, ssa: &mut SsaMap, edge: &CfaEdge) -> Result<Formula> {
        let f = match &edge.kind {
            EdgeKind::Blank => Formula::tt(),
            EdgeKind::Assume { condition, truth } => {
                let c = condition.instantiate(ssa);
                if *truth {
                    c
                } else {
                    Formula::not(&c)
                }
            }
            EdgeKind::Assign { variable, value } => {
                let before = ssa.clone();
                self.assign(ssa, variable, value, &before)
            }
            EdgeKind::Havoc { variable } => {
                let index = ssa.fresh_index(variable);
                ssa.set(variable.clone(), index);
                Formula::tt()
            }
            EdgeKind::Call {
                function, arguments, ..
            } => {
                let before = ssa.clone();
                let mut parts = Vec::with_capacity(arguments.len());
                for (param, arg) in arguments {
                    if !is_local_of(param, function) {
                        return Err(Error::UnsupportedEdge {
                            edge: edge.to_string(),
                            reason: format!("parameter {} is not local to {}", param, function),
                        });
                    }
                    parts.push(self.assign(ssa, param, arg, &before));
                }
                Formula::and_all(parts)
            }
            EdgeKind::Return { function, result } => match result {
                Some(var) => {
                    let before = ssa.clone();
                    let value = Term::Var(Symbol::new(return_variable(function)));
                    self.assign(ssa, var, &value, &before)
                }
                None => Formula::tt(),
            },
        };
        Ok(f)
    }
}

impl PathFormulaManager for SsaPathFormulaManager {
    fn make_empty(&self) -> PathFormula {
        PathFormula::new(Formula::tt(), SsaMap::default(), 0)
    }

    fn make_empty_with(&self, basis: &PathFormula) -> PathFormula {
        PathFormula::new(Formula::tt(), basis.ssa.clone(), 0)
    }

    fn make_and(&self, pf: &PathFormula, edge: &CfaEdge) -> Result<PathFormula> {
        let mut ssa = pf.ssa.clone();
        let f = self.edge_formula(&mut ssa, edge)?;
        debug!("make_and({}) -> {}", edge, f);
        Ok(PathFormula::new(pf.formula.and(&f), ssa, pf.length + 1))
    }

    fn make_or(&self, pf1: &PathFormula, pf2: &PathFormula) -> PathFormula {
        let (ssa, differences) = pf1.ssa.merge(&pf2.ssa);
        let mut left = vec![pf1.formula.clone()];
        let mut right = vec![pf2.formula.clone()];
        for (name, i1, i2) in differences {
            let target = Term::Var(Symbol::indexed(name.clone(), i1.max(i2)));
            if i1 < i2 {
                left.push(target.eq(Term::Var(Symbol::indexed(name, i1))));
            } else {
                right.push(target.eq(Term::Var(Symbol::indexed(name, i2))));
            }
        }
        let formula = Formula::and_all(left).or(&Formula::and_all(right));
        PathFormula::new(formula, ssa, pf1.length.max(pf2.length))
    }

    fn make_new(&self, pf: &PathFormula, ssa: SsaMap) -> PathFormula {
        PathFormula::new(pf.formula.clone(), ssa, pf.length)
    }

    fn build_branching_formula(&self, arg: &Arg, states: &BTreeSet<StateId>) -> Result<Formula> {
        let mut parts = Vec::new();
        for &id in states {
            let state = arg.state(id)?;
            let assumes: Vec<_> = state
                .children()
                .filter(|(child, _)| states.contains(child))
                .filter_map(|(_, edge)| match &edge.kind {
                    EdgeKind::Assume { condition, truth } => Some((condition.clone(), *truth)),
                    _ => None,
                })
                .collect();
            if assumes.len() < 2 {
                continue;
            }
            if let Some((condition, truth)) = assumes.into_iter().find(|(_, truth)| *truth) {
                debug_assert!(truth);
                let condition = condition.instantiate(state.predicate_state().path_formula().ssa());
                let pred = Formula::prop_symbol(branching_symbol(id));
                parts.push(pred.iff(&condition));
            }
        }
        Ok(Formula::and_all(parts))
    }
}

/// SSA map after returning from `function`.
///
/// Variables local to other functions (the caller's frame) get back the index
/// they had before the call; globals and the callee's own variables keep the
/// index reached inside the callee.
pub fn update_indices_after_return(caller: &SsaMap, callee: &SsaMap, function: &str) -> SsaMap {
    let mut result = callee.clone();
    for (name, index) in caller.iter() {
        let global = !name.contains("::");
        if !global && !is_local_of(name, function) {
            result.set(name.clone(), index);
        }
    }
    result
}
