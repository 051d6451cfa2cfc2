//! Feasibility checks and interpolation over counterexample traces.

use std::rc::Rc;

use log::{debug, info};

use crate::error::{Result, SolverError};
use crate::formula::Formula;
use crate::solver::{InterpolatingProver, InterpolationResult, Model, Solver};
use crate::stats::Statistics;

#[derive(Debug, Clone)]
pub enum CounterexampleTraceInfo {
    /// `interpolants[i]` holds after the first `i + 1` block formulas.
    Spurious { interpolants: Vec<Formula> },
    Feasible { model: Model },
}

impl CounterexampleTraceInfo {
    pub fn is_spurious(&self) -> bool {
        matches!(self, CounterexampleTraceInfo::Spurious { .. })
    }
}

pub struct InterpolationManager {
    prover: Rc<dyn InterpolatingProver>,
    solver: Rc<dyn Solver>,
    verify_interpolants: bool,
    stats: Rc<Statistics>,
}

impl InterpolationManager {
    pub fn new(
        prover: Rc<dyn InterpolatingProver>,
        solver: Rc<dyn Solver>,
        verify_interpolants: bool,
        stats: Rc<Statistics>,
    ) -> Self {
        Self {
            prover,
            solver,
            verify_interpolants,
            stats,
        }
    }

    pub fn build_counterexample_trace(&self, formulas: &[Formula]) -> Result<CounterexampleTraceInfo> {
        let _timer = self.stats.refinement.interpolation_time.start();
        debug!("Interpolating {} block formulas", formulas.len());
        match self.prover.interpolate(formulas)? {
            InterpolationResult::Feasible(model) => {
                info!("Error path is feasible");
                Ok(CounterexampleTraceInfo::Feasible { model })
            }
            InterpolationResult::Spurious(interpolants) => {
                info!("Error path is spurious");
                if self.verify_interpolants {
                    self.verify(formulas, &interpolants)?;
                }
                Ok(CounterexampleTraceInfo::Spurious { interpolants })
            }
        }
    }

    /// Checks `f0 ⇒ I1`, `I(i) ∧ f(i) ⇒ I(i+1)`, `I(n) ∧ f(n) ⇒ false`
    /// and that every interpolant only mentions variables shared by its prefix
    /// and suffix.
    fn verify(&self, formulas: &[Formula], interpolants: &[Formula]) -> Result<()> {
        let n = formulas.len();
        if interpolants.len() + 1 != n {
            return Err(SolverError::InvalidInterpolants(format!(
                "{} interpolants for {} formulas",
                interpolants.len(),
                n
            ))
            .into());
        }
        for (i, f) in formulas.iter().enumerate() {
            let pre = if i == 0 { Formula::tt() } else { interpolants[i - 1].clone() };
            let post = if i + 1 == n { Formula::ff() } else { interpolants[i].clone() };
            if !self.solver.implies(&pre.and(f), &post)? {
                return Err(SolverError::InvalidInterpolants(format!(
                    "interpolant {} and block formula {} do not imply {}",
                    pre, i, post
                ))
                .into());
            }
        }
        for (i, itp) in interpolants.iter().enumerate() {
            let prefix = Formula::and_all(formulas[..=i].iter().cloned()).variables();
            let suffix = Formula::and_all(formulas[i + 1..].iter().cloned()).variables();
            if let Some(var) = itp
                .variables()
                .into_iter()
                .find(|v| !prefix.contains(v) || !suffix.contains(v))
            {
                return Err(SolverError::InvalidInterpolants(format!(
                    "interpolant {} mentions {} outside the shared vocabulary",
                    itp, var
                ))
                .into());
            }
        }
        debug!("Interpolants verified");
        Ok(())
    }

    /// A model of the conjunction of `formulas`, if there is one.
    pub fn check_path(&self, formulas: &[Formula]) -> Result<Option<Model>> {
        self.solver.model(&Formula::and_all(formulas.iter().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverOptions;
    use crate::error::Error;
    use crate::formula::{Symbol, Term};
    use crate::shutdown::ShutdownNotifier;
    use crate::solver::EnumerativeSolver;
    use test_log::test;

    struct WrongProver;

    impl InterpolatingProver for WrongProver {
        fn interpolate(&self, formulas: &[Formula]) -> Result<InterpolationResult> {
            Ok(InterpolationResult::Spurious(vec![Formula::tt(); formulas.len() - 1]))
        }
    }

    fn at(name: &str, index: u32) -> Term {
        Term::Var(Symbol::indexed(name, index))
    }

    fn manager(prover: Option<Rc<dyn InterpolatingProver>>) -> InterpolationManager {
        let stats = Rc::new(Statistics::default());
        let solver = Rc::new(EnumerativeSolver::new(
            SolverOptions::default(),
            ShutdownNotifier::new(),
            stats.clone(),
        ));
        let prover = prover.unwrap_or_else(|| solver.clone() as Rc<dyn InterpolatingProver>);
        InterpolationManager::new(prover, solver, true, stats)
    }

    fn spurious_trace() -> Vec<Formula> {
        vec![
            at("x", 1).eq(0),
            at("y", 2).eq(at("x", 1) + 1) & at("y", 2).eq(2),
        ]
    }

    #[test]
    fn test_spurious_trace_is_verified() {
        let manager = manager(None);
        let info = manager.build_counterexample_trace(&spurious_trace()).unwrap();
        let CounterexampleTraceInfo::Spurious { interpolants } = info else {
            panic!("expected a spurious trace");
        };
        assert_eq!(interpolants.len(), 1);
        assert!(!interpolants[0].is_true());
        assert!(manager.check_path(&spurious_trace()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_interpolants_are_rejected() {
        let manager = manager(Some(Rc::new(WrongProver)));
        let err = manager.build_counterexample_trace(&spurious_trace()).unwrap_err();
        assert!(matches!(err, Error::Solver(SolverError::InvalidInterpolants(_))));
    }

    #[test]
    fn test_feasible_trace() {
        let manager = manager(None);
        let trace = vec![at("x", 1).eq(0), at("y", 2).eq(at("x", 1) + 1)];
        let info = manager.build_counterexample_trace(&trace).unwrap();
        let CounterexampleTraceInfo::Feasible { model } = info else {
            panic!("expected a feasible trace");
        };
        assert_eq!(model.get_int(&Symbol::indexed("y", 2)), Some(1));
    }
}
